use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};
use uuid::Uuid;

pub mod reconciliation;

/// Domain events emitted by the settlement pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    OrderCreated(Uuid),
    OrderConfirmed {
        order_id: Uuid,
        payment_id: String,
    },
    OrderExpired(Uuid),
    PaymentRefunded {
        order_id: Uuid,
        refund_id: String,
    },
    ShipmentCreated {
        order_id: Uuid,
        carrier_order_id: String,
    },
    CarrierStatusChanged {
        order_id: Uuid,
        old_status: Option<String>,
        new_status: String,
    },
}

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Sends an event asynchronously.
    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }
}

/// Carrier status update fanned out to live subscribers. Subscribers filter
/// on `origin_store_ids` for per-store dashboards; a broadcast topic (rather
/// than an in-memory subscriber set) keeps this valid across processes when
/// backed by a real message broker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShipmentUpdate {
    pub order_id: Uuid,
    pub origin_store_ids: Vec<Uuid>,
    pub carrier_status: String,
    pub awb_code: Option<String>,
    pub tracking_url: Option<String>,
    pub eta_date: Option<String>,
}

/// Creates the shipment-update broadcast topic.
pub fn shipment_update_channel(capacity: usize) -> broadcast::Sender<ShipmentUpdate> {
    let (tx, _rx) = broadcast::channel(capacity);
    tx
}

/// Background consumer for domain events. Side effects here are strictly
/// observational; settlement correctness never depends on this task.
pub async fn process_events(mut receiver: mpsc::Receiver<Event>) {
    info!("Event processor started");
    while let Some(event) = receiver.recv().await {
        match &event {
            Event::OrderCreated(id) => debug!(order_id = %id, "order created"),
            Event::OrderConfirmed { order_id, payment_id } => {
                info!(order_id = %order_id, payment_id = %payment_id, "order confirmed")
            }
            Event::OrderExpired(id) => info!(order_id = %id, "order expired"),
            Event::PaymentRefunded { order_id, refund_id } => {
                warn!(order_id = %order_id, refund_id = %refund_id, "late payment refunded")
            }
            Event::ShipmentCreated {
                order_id,
                carrier_order_id,
            } => info!(order_id = %order_id, carrier_order_id = %carrier_order_id, "shipment created"),
            Event::CarrierStatusChanged {
                order_id,
                new_status,
                ..
            } => debug!(order_id = %order_id, status = %new_status, "carrier status changed"),
        }
    }
    info!("Event processor stopped");
}
