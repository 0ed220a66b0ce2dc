use crate::errors::ServiceError;
use async_trait::async_trait;
use tracing::info;
use uuid::Uuid;

/// Outbound customer messaging. Callers must treat every method as
/// best-effort; a failed notification never fails the surrounding
/// operation.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn order_confirmed(&self, order_id: Uuid, order_number: &str)
        -> Result<(), ServiceError>;

    async fn shipment_status(
        &self,
        order_id: Uuid,
        status: &str,
        tracking_url: Option<&str>,
    ) -> Result<(), ServiceError>;
}

/// Sink that only logs. The production SMS/email gateway slots in behind
/// the same trait.
pub struct LogNotifier;

#[async_trait]
impl NotificationSink for LogNotifier {
    async fn order_confirmed(
        &self,
        order_id: Uuid,
        order_number: &str,
    ) -> Result<(), ServiceError> {
        info!(order_id = %order_id, order_number = %order_number, "notify: order confirmed");
        Ok(())
    }

    async fn shipment_status(
        &self,
        order_id: Uuid,
        status: &str,
        tracking_url: Option<&str>,
    ) -> Result<(), ServiceError> {
        info!(
            order_id = %order_id,
            status = %status,
            tracking_url = tracking_url.unwrap_or("-"),
            "notify: shipment status"
        );
        Ok(())
    }
}
