use crate::{
    clients::carrier::{CarrierApi, ShipmentOrderRequest},
    entities::order::{self, Entity as OrderEntity, Model as OrderModel, OrderStatus},
    errors::ServiceError,
    events::{Event, EventSender, ShipmentUpdate},
    services::notifications::NotificationSink,
    services::orders::OrderService,
    services::shipping::{self, QuoteItem, ShippingRateService},
};
use chrono::Utc;
use sea_orm::sea_query::Expr;
use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;

/// Carrier webhook envelope as the aggregator posts it.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CarrierWebhookPayload {
    pub event_type: String,
    pub data: CarrierWebhookData,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CarrierWebhookData {
    /// The carrier-side order id, matched against `orders.carrier_order_id`.
    pub order_id: String,
    pub shipment_id: Option<String>,
    pub awb_code: Option<String>,
    pub status: String,
    pub courier_name: Option<String>,
    pub estimated_delivery_date: Option<String>,
    pub tracking_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ShipmentCreated {
    pub order_id: Uuid,
    pub carrier_order_id: String,
    pub carrier_status: String,
}

/// Internal ordering of carrier statuses; webhooks can arrive out of
/// order and must never move a shipment backwards.
fn status_rank(status: &str) -> Option<u8> {
    match status {
        "pending" => Some(0),
        "picked" => Some(1),
        "in_transit" => Some(2),
        "delivered" => Some(3),
        "cancelled" => Some(4),
        _ => None,
    }
}

/// Fixed mapping from the aggregator's status vocabulary to ours. Unknown
/// statuses pass through verbatim so nothing is silently dropped.
pub fn map_carrier_status(external: &str) -> String {
    match external.to_lowercase().as_str() {
        "created" => "pending".to_string(),
        "picked" => "picked".to_string(),
        "shipped" => "in_transit".to_string(),
        "delivered" => "delivered".to_string(),
        "cancelled" | "failed" => "cancelled".to_string(),
        other => other.to_string(),
    }
}

/// Pushes confirmed orders to the carrier and folds carrier webhooks back
/// into the order store.
#[derive(Clone)]
pub struct FulfillmentService {
    db: Arc<DatabaseConnection>,
    carrier: Arc<dyn CarrierApi>,
    shipping: Arc<ShippingRateService>,
    orders: Arc<OrderService>,
    notifier: Arc<dyn NotificationSink>,
    event_sender: Arc<EventSender>,
    shipment_updates: broadcast::Sender<ShipmentUpdate>,
    pickup_location: String,
}

impl FulfillmentService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        db: Arc<DatabaseConnection>,
        carrier: Arc<dyn CarrierApi>,
        shipping: Arc<ShippingRateService>,
        orders: Arc<OrderService>,
        notifier: Arc<dyn NotificationSink>,
        event_sender: Arc<EventSender>,
        shipment_updates: broadcast::Sender<ShipmentUpdate>,
        pickup_location: String,
    ) -> Self {
        Self {
            db,
            carrier,
            shipping,
            orders,
            notifier,
            event_sender,
            shipment_updates,
            pickup_location,
        }
    }

    /// Registers a shipment with the carrier for a confirmed order and
    /// records the carrier-side ids.
    #[instrument(skip(self))]
    pub async fn create_shipment(&self, order_id: Uuid) -> Result<ShipmentCreated, ServiceError> {
        let (order, items) = self
            .orders
            .get_order(order_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;

        if order.status != OrderStatus::Confirmed && order.status != OrderStatus::Shipped {
            return Err(ServiceError::InvalidOperation(format!(
                "Order {} is {} and cannot be shipped",
                order_id, order.status
            )));
        }
        if let Some(existing) = order.carrier_order_id.as_deref() {
            // Already registered; idempotent re-trigger.
            return Ok(ShipmentCreated {
                order_id,
                carrier_order_id: existing.to_string(),
                carrier_status: order.carrier_status.unwrap_or_else(|| "pending".to_string()),
            });
        }

        let quote_items: Vec<QuoteItem> = items
            .iter()
            .map(|i| QuoteItem {
                quantity: i.quantity,
                unit_price: i.unit_price,
                weight_kg: i.weight_kg,
            })
            .collect();

        let token = self.shipping.bearer_token().await?;
        let shipment = self
            .carrier
            .create_order(
                &token,
                &ShipmentOrderRequest {
                    reference: order.order_number.clone(),
                    pickup_location: self.pickup_location.clone(),
                    delivery_zip: order.ship_zip.clone(),
                    recipient_name: order.ship_name.clone(),
                    recipient_phone: order.ship_phone.clone(),
                    weight_kg: shipping::total_weight(&quote_items),
                    declared_value: shipping::declared_value(&quote_items),
                },
            )
            .await?;

        let carrier_status = map_carrier_status(&shipment.status);
        OrderEntity::update_many()
            .col_expr(
                order::Column::CarrierOrderId,
                Expr::value(Some(shipment.order_id.clone())),
            )
            .col_expr(
                order::Column::CarrierStatus,
                Expr::value(Some(carrier_status.clone())),
            )
            .col_expr(order::Column::UpdatedAt, Expr::value(Some(Utc::now())))
            .filter(order::Column::Id.eq(order_id))
            .exec(&*self.db)
            .await
            .map_err(ServiceError::DatabaseError)?;

        info!(order_id = %order_id, carrier_order_id = %shipment.order_id, "shipment registered");
        if let Err(e) = self
            .event_sender
            .send(Event::ShipmentCreated {
                order_id,
                carrier_order_id: shipment.order_id.clone(),
            })
            .await
        {
            warn!(order_id = %order_id, "failed to send shipment event: {}", e);
        }

        Ok(ShipmentCreated {
            order_id,
            carrier_order_id: shipment.order_id,
            carrier_status,
        })
    }

    /// Post-confirmation trigger. Carrier trouble becomes a warning string
    /// for the settlement response; confirmation itself already happened.
    pub async fn create_shipment_with_warning(&self, order_id: Uuid) -> Option<String> {
        match self.create_shipment(order_id).await {
            Ok(_) => None,
            Err(e) => {
                warn!(order_id = %order_id, "shipment creation deferred: {}", e);
                Some(format!("shipment creation deferred: {}", e))
            }
        }
    }

    /// Folds a carrier webhook into the order store. Regressive updates
    /// (an earlier status arriving late) are acknowledged and dropped.
    #[instrument(skip(self, payload), fields(event_type = %payload.event_type))]
    pub async fn ingest_webhook(
        &self,
        payload: CarrierWebhookPayload,
    ) -> Result<OrderModel, ServiceError> {
        let new_status = map_carrier_status(&payload.data.status);

        let order = OrderEntity::find()
            .filter(order::Column::CarrierOrderId.eq(payload.data.order_id.as_str()))
            .one(&*self.db)
            .await
            .map_err(ServiceError::DatabaseError)?
            .ok_or_else(|| {
                ServiceError::NotFound(format!(
                    "No order for carrier order {}",
                    payload.data.order_id
                ))
            })?;

        let old_status = order.carrier_status.clone();
        let regressive = match (
            old_status.as_deref().and_then(status_rank),
            status_rank(&new_status),
        ) {
            (Some(old), Some(new)) => new < old,
            _ => false,
        };
        if regressive {
            info!(order_id = %order.id, old = ?old_status, new = %new_status, "dropping regressive carrier update");
            return Ok(order);
        }

        let order_status = match new_status.as_str() {
            "in_transit" => Some(OrderStatus::Shipped),
            "delivered" => Some(OrderStatus::Delivered),
            "cancelled" => Some(OrderStatus::Cancelled),
            _ => None,
        };

        let mut update = OrderEntity::update_many()
            .col_expr(
                order::Column::CarrierStatus,
                Expr::value(Some(new_status.clone())),
            )
            .col_expr(
                order::Column::TrackingUrl,
                Expr::value(payload.data.tracking_url.clone().or(order.tracking_url.clone())),
            )
            .col_expr(order::Column::UpdatedAt, Expr::value(Some(Utc::now())))
            .col_expr(
                order::Column::Version,
                Expr::col(order::Column::Version).add(1),
            )
            .filter(order::Column::Id.eq(order.id));
        if let Some(status) = order_status {
            update = update.col_expr(order::Column::Status, Expr::value(status));
        }
        update
            .exec(&*self.db)
            .await
            .map_err(ServiceError::DatabaseError)?;

        let items = self.orders.order_items(order.id).await?;
        let update = ShipmentUpdate {
            order_id: order.id,
            origin_store_ids: items.iter().map(|i| i.origin_store_id).collect(),
            carrier_status: new_status.clone(),
            awb_code: payload.data.awb_code.clone(),
            tracking_url: payload.data.tracking_url.clone(),
            eta_date: payload.data.estimated_delivery_date.clone(),
        };
        // Zero subscribers is normal; the send error only means that.
        let _ = self.shipment_updates.send(update);

        if let Err(e) = self
            .event_sender
            .send(Event::CarrierStatusChanged {
                order_id: order.id,
                old_status,
                new_status: new_status.clone(),
            })
            .await
        {
            warn!(order_id = %order.id, "failed to send carrier status event: {}", e);
        }

        if let Err(e) = self
            .notifier
            .shipment_status(
                order.id,
                &new_status,
                payload.data.tracking_url.as_deref(),
            )
            .await
        {
            warn!(order_id = %order.id, "shipment notification failed: {}", e);
        }

        let refreshed = OrderEntity::find_by_id(order.id)
            .one(&*self.db)
            .await
            .map_err(ServiceError::DatabaseError)?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order.id)))?;
        Ok(refreshed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn carrier_status_table_is_fixed() {
        assert_eq!(map_carrier_status("created"), "pending");
        assert_eq!(map_carrier_status("PICKED"), "picked");
        assert_eq!(map_carrier_status("shipped"), "in_transit");
        assert_eq!(map_carrier_status("delivered"), "delivered");
        assert_eq!(map_carrier_status("cancelled"), "cancelled");
        assert_eq!(map_carrier_status("failed"), "cancelled");
        assert_eq!(map_carrier_status("rto_initiated"), "rto_initiated");
    }

    #[test]
    fn delivered_outranks_transit() {
        assert!(status_rank("delivered") > status_rank("in_transit"));
        assert!(status_rank("in_transit") > status_rank("pending"));
        assert_eq!(status_rank("rto_initiated"), None);
    }
}
