//! Replay queue for confirmed payments whose pending->confirmed update hit
//! a transport failure. Rather than creating a duplicate confirmed order
//! inline, the verifier enqueues a task here and a background worker
//! replays the idempotent conditional transition until it lands.

use crate::entities::reconciliation_task::{self, TaskStatus};
use crate::errors::ServiceError;
use crate::services::orders::{ConfirmationUpdate, OrderService};
use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, Set,
};
use serde_json::Value;
use std::sync::Arc;
use tokio::time::{sleep, Duration};
use tracing::{error, info, warn};
use uuid::Uuid;

const MAX_ATTEMPTS: i32 = 8;
const POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Enqueues a reconciliation task. Called by the settlement verifier when
/// the conditional confirm update fails on transport.
pub async fn enqueue(
    db: &DatabaseConnection,
    order_id: Uuid,
    gateway_order_id: &str,
    payment_id: &str,
    payload: Value,
) -> Result<Uuid, ServiceError> {
    let id = Uuid::new_v4();
    let task = reconciliation_task::ActiveModel {
        id: Set(id),
        order_id: Set(order_id),
        gateway_order_id: Set(gateway_order_id.to_string()),
        payment_id: Set(payment_id.to_string()),
        payload: Set(payload),
        attempts: Set(0),
        status: Set(TaskStatus::Queued),
        last_error: Set(None),
        created_at: Set(Utc::now()),
        updated_at: Set(Some(Utc::now())),
    };
    task.insert(db).await.map_err(ServiceError::DatabaseError)?;
    info!(task_id = %id, order_id = %order_id, "enqueued settlement reconciliation task");
    Ok(id)
}

/// Spawns the background worker that drains queued tasks.
pub fn start_worker(db: Arc<DatabaseConnection>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        info!("Settlement reconciliation worker started");
        loop {
            if let Err(e) = drain_once(&db, 20).await {
                error!("reconciliation worker error: {}", e);
            }
            sleep(POLL_INTERVAL).await;
        }
    })
}

/// Processes one batch of queued tasks. Each replay is the same atomic
/// "confirm if still pending" update the verifier uses, so a task racing a
/// concurrent settlement path resolves to a no-op.
pub async fn drain_once(db: &DatabaseConnection, batch_size: u64) -> Result<(), ServiceError> {
    let tasks = reconciliation_task::Entity::find()
        .filter(reconciliation_task::Column::Status.eq(TaskStatus::Queued))
        .order_by_asc(reconciliation_task::Column::CreatedAt)
        .all(db)
        .await
        .map_err(ServiceError::DatabaseError)?;

    for task in tasks.into_iter().take(batch_size as usize) {
        let update = confirmation_from_payload(&task);
        let outcome = OrderService::apply_confirmation(db, task.order_id, &update).await;

        let mut active: reconciliation_task::ActiveModel = task.clone().into();
        active.attempts = Set(task.attempts + 1);
        active.updated_at = Set(Some(Utc::now()));

        match outcome {
            // Either this replay landed the transition or a concurrent
            // path already settled the order; both mean we are finished.
            Ok(_) => {
                active.status = Set(TaskStatus::Done);
                active.last_error = Set(None);
            }
            Err(e) if task.attempts + 1 >= MAX_ATTEMPTS => {
                warn!(task_id = %task.id, "reconciliation task exhausted retries");
                active.status = Set(TaskStatus::Dead);
                active.last_error = Set(Some(e.to_string()));
            }
            Err(e) => {
                active.last_error = Set(Some(e.to_string()));
            }
        }

        if let Err(e) = active.update(db).await {
            warn!(task_id = %task.id, "failed updating reconciliation task: {}", e);
        }
    }

    Ok(())
}

fn confirmation_from_payload(task: &reconciliation_task::Model) -> ConfirmationUpdate {
    let decimal = |key: &str| {
        task.payload
            .get(key)
            .and_then(|v| v.as_str())
            .and_then(|s| s.parse().ok())
            .unwrap_or_default()
    };
    ConfirmationUpdate {
        payment_id: task.payment_id.clone(),
        gateway_order_id: task.gateway_order_id.clone(),
        discount_amount: decimal("discount_amount"),
        final_total: decimal("final_total"),
        customer_id: task
            .payload
            .get("customer_id")
            .and_then(|v| v.as_str())
            .and_then(|s| s.parse().ok()),
    }
}
