pub mod orders;
pub mod payments;
pub mod shipping;

use crate::cache::CacheBackend;
use crate::clients::carrier::CarrierApi;
use crate::clients::payment_gateway::PaymentGateway;
use crate::config::AppConfig;
use crate::db::DbPool;
use crate::events::{EventSender, ShipmentUpdate};
use crate::services::{
    catalog::ProductCatalog,
    coupons::CouponService,
    customers::CustomerService,
    fulfillment::FulfillmentService,
    notifications::NotificationSink,
    orders::OrderService,
    payments::PaymentService,
    shipping::ShippingRateService,
};
use std::sync::Arc;
use tokio::sync::broadcast;

pub use crate::AppState;

/// Business services used by the HTTP handlers, constructed once at
/// startup.
#[derive(Clone)]
pub struct AppServices {
    pub orders: Arc<OrderService>,
    pub coupons: Arc<CouponService>,
    pub customers: Arc<CustomerService>,
    pub shipping: Arc<ShippingRateService>,
    pub fulfillment: Arc<FulfillmentService>,
    pub payments: Arc<PaymentService>,
}

impl AppServices {
    /// Wires the full service graph from its external edges: database,
    /// gateway/carrier clients, token cache, catalog, and notifier.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        db: Arc<DbPool>,
        config: &AppConfig,
        gateway: Arc<dyn PaymentGateway>,
        carrier: Arc<dyn CarrierApi>,
        cache: Arc<dyn CacheBackend>,
        catalog: Arc<dyn ProductCatalog>,
        notifier: Arc<dyn NotificationSink>,
        event_sender: Arc<EventSender>,
        shipment_updates: broadcast::Sender<ShipmentUpdate>,
    ) -> Self {
        let coupons = Arc::new(CouponService::new(db.clone()));
        let customers = Arc::new(CustomerService::new(db.clone()));
        let shipping = Arc::new(ShippingRateService::new(
            carrier.clone(),
            cache,
            config.carrier.clone(),
        ));
        let orders = Arc::new(OrderService::new(
            db.clone(),
            event_sender.clone(),
            shipping.clone(),
            coupons.clone(),
            config.pending_ttl(),
        ));
        let fulfillment = Arc::new(FulfillmentService::new(
            db.clone(),
            carrier,
            shipping.clone(),
            orders.clone(),
            notifier.clone(),
            event_sender.clone(),
            shipment_updates,
            config.carrier.pickup_location.clone(),
        ));
        let payments = Arc::new(PaymentService::new(
            db,
            gateway,
            orders.clone(),
            coupons.clone(),
            customers.clone(),
            catalog,
            fulfillment.clone(),
            notifier,
            event_sender,
            config.gateway.clone(),
        ));

        Self {
            orders,
            coupons,
            customers,
            shipping,
            fulfillment,
            payments,
        }
    }
}
