#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{Method, Request, StatusCode},
    Router,
};
use chrono::{DateTime, Utc};
use ornata_api::{
    app_router,
    cache::InMemoryCache,
    clients::carrier::{
        CarrierApi, CarrierQuote, CarrierToken, RateQuoteRequest, ShipmentOrder,
        ShipmentOrderRequest,
    },
    clients::payment_gateway::{GatewayOrder, GatewayRefund, PaymentGateway},
    config::AppConfig,
    db,
    entities::{coupon, order},
    errors::ServiceError,
    events::{self, EventSender},
    handlers::AppServices,
    services::{catalog::PassthroughCatalog, notifications::LogNotifier},
    AppState,
};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use sea_orm::{ActiveModelTrait, EntityTrait, Set};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tower::ServiceExt;
use uuid::Uuid;

/// Gateway double. Orders get sequential ids; refunds are recorded so
/// tests can assert money went back.
pub struct MockGateway {
    counter: AtomicU32,
    pub refunds: Mutex<Vec<(String, i64)>>,
    pub fail_refunds: AtomicBool,
}

impl MockGateway {
    pub fn new() -> Self {
        Self {
            counter: AtomicU32::new(0),
            refunds: Mutex::new(Vec::new()),
            fail_refunds: AtomicBool::new(false),
        }
    }

    pub fn refund_count(&self) -> usize {
        self.refunds.lock().unwrap().len()
    }
}

#[async_trait]
impl PaymentGateway for MockGateway {
    async fn create_order(
        &self,
        amount_minor: i64,
        currency: &str,
        _receipt: &str,
    ) -> Result<GatewayOrder, ServiceError> {
        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        Ok(GatewayOrder {
            id: format!("order_GW{n:04}"),
            amount_minor,
            currency: currency.to_string(),
        })
    }

    async fn refund(
        &self,
        payment_id: &str,
        amount_minor: i64,
    ) -> Result<GatewayRefund, ServiceError> {
        if self.fail_refunds.load(Ordering::SeqCst) {
            return Err(ServiceError::PaymentFailed("refund rejected".to_string()));
        }
        self.refunds
            .lock()
            .unwrap()
            .push((payment_id.to_string(), amount_minor));
        Ok(GatewayRefund {
            id: format!("rfnd_{payment_id}"),
            payment_id: payment_id.to_string(),
        })
    }
}

/// Carrier double with switchable failure per operation.
pub struct MockCarrier {
    pub fail_auth: AtomicBool,
    pub fail_quotes: AtomicBool,
    pub fail_orders: AtomicBool,
    counter: AtomicU32,
}

impl MockCarrier {
    pub fn new() -> Self {
        Self {
            fail_auth: AtomicBool::new(false),
            fail_quotes: AtomicBool::new(false),
            fail_orders: AtomicBool::new(false),
            counter: AtomicU32::new(0),
        }
    }
}

#[async_trait]
impl CarrierApi for MockCarrier {
    async fn authenticate(&self) -> Result<CarrierToken, ServiceError> {
        if self.fail_auth.load(Ordering::SeqCst) {
            return Err(ServiceError::CarrierUnavailable("login".to_string()));
        }
        Ok(CarrierToken {
            token: "test-token".to_string(),
            expires_in_secs: 864_000,
        })
    }

    async fn rate_quote(
        &self,
        _token: &str,
        _request: &RateQuoteRequest,
    ) -> Result<CarrierQuote, ServiceError> {
        if self.fail_quotes.load(Ordering::SeqCst) {
            return Err(ServiceError::CarrierUnavailable("rate quote".to_string()));
        }
        Ok(CarrierQuote {
            charge: dec!(85),
            eta_days: 3,
            courier_name: "BlueDart Air".to_string(),
        })
    }

    async fn create_order(
        &self,
        _token: &str,
        _request: &ShipmentOrderRequest,
    ) -> Result<ShipmentOrder, ServiceError> {
        if self.fail_orders.load(Ordering::SeqCst) {
            return Err(ServiceError::CarrierUnavailable("order create".to_string()));
        }
        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        Ok(ShipmentOrder {
            order_id: format!("SR-{n:04}"),
            shipment_id: format!("SHIP-{n:04}"),
            status: "created".to_string(),
        })
    }
}

/// In-process application over an in-memory sqlite database.
pub struct TestApp {
    router: Router,
    pub state: AppState,
    pub gateway: Arc<MockGateway>,
    pub carrier: Arc<MockCarrier>,
}

impl TestApp {
    pub async fn new() -> Self {
        let mut cfg = AppConfig::new("sqlite::memory:".to_string(), "test".to_string());
        // A single pooled connection keeps the in-memory database alive
        // and shared for the whole test.
        cfg.db_max_connections = 1;
        cfg.db_min_connections = 1;

        let pool = db::establish_connection_from_app_config(&cfg)
            .await
            .expect("failed to open test database");
        db::run_migrations(&pool)
            .await
            .expect("failed to run migrations");
        let db = Arc::new(pool);

        let (event_tx, event_rx) = mpsc::channel(256);
        let event_sender = Arc::new(EventSender::new(event_tx));
        tokio::spawn(events::process_events(event_rx));
        let shipment_updates = events::shipment_update_channel(16);

        let gateway = Arc::new(MockGateway::new());
        let carrier = Arc::new(MockCarrier::new());
        let services = AppServices::new(
            db.clone(),
            &cfg,
            gateway.clone(),
            carrier.clone(),
            Arc::new(InMemoryCache::new()),
            Arc::new(PassthroughCatalog),
            Arc::new(LogNotifier),
            event_sender.clone(),
            shipment_updates.clone(),
        );

        let state = AppState {
            db,
            config: Arc::new(cfg),
            event_sender,
            services,
            shipment_updates,
        };

        Self {
            router: app_router(state.clone()),
            state,
            gateway,
            carrier,
        }
    }

    pub async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(path);
        let request = match body {
            Some(body) => {
                builder = builder.header("content-type", "application/json");
                builder.body(Body::from(body.to_string())).unwrap()
            }
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("request failed");
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("failed reading body");
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, json)
    }

    /// Computes the settlement callback signature the way the gateway does.
    pub fn sign(&self, gateway_order_id: &str, payment_id: &str) -> String {
        ornata_api::clients::payment_gateway::compute_callback_signature(
            &self.state.config.gateway.callback_secret,
            gateway_order_id,
            payment_id,
        )
    }

    pub async fn seed_coupon(
        &self,
        code: &str,
        percent: Decimal,
        applies_to_shipping: bool,
        for_new_user_only: bool,
    ) -> coupon::Model {
        let model = coupon::ActiveModel {
            id: Set(Uuid::new_v4()),
            code: Set(code.to_lowercase()),
            discount_percent: Set(percent),
            minimum_order_amount: Set(Decimal::ZERO),
            for_new_user_only: Set(for_new_user_only),
            applies_to_shipping: Set(applies_to_shipping),
            expires_at: Set(None),
            used_count: Set(0),
            created_at: Set(Utc::now()),
            updated_at: Set(None),
        };
        model
            .insert(&*self.state.db)
            .await
            .expect("failed seeding coupon")
    }

    pub async fn fetch_order(&self, id: Uuid) -> order::Model {
        order::Entity::find_by_id(id)
            .one(&*self.state.db)
            .await
            .expect("order query failed")
            .expect("order missing")
    }

    pub async fn fetch_coupon(&self, code: &str) -> coupon::Model {
        self.state
            .services
            .coupons
            .find_by_code(code)
            .await
            .expect("coupon query failed")
            .expect("coupon missing")
    }

    /// Rewrites an order's expiry deadline directly, to simulate the
    /// passage of time.
    pub async fn set_expires_at(&self, id: Uuid, expires_at: DateTime<Utc>) {
        let order = self.fetch_order(id).await;
        let mut active: order::ActiveModel = order.into();
        active.expires_at = Set(Some(expires_at));
        active
            .update(&*self.state.db)
            .await
            .expect("failed to rewrite expiry");
    }

    /// Writes carrier linkage directly, standing in for an earlier
    /// create-shipment call.
    pub async fn set_carrier_order(&self, id: Uuid, carrier_order_id: &str, status: &str) {
        let order = self.fetch_order(id).await;
        let mut active: order::ActiveModel = order.into();
        active.carrier_order_id = Set(Some(carrier_order_id.to_string()));
        active.carrier_status = Set(Some(status.to_string()));
        active
            .update(&*self.state.db)
            .await
            .expect("failed to link carrier order");
    }
}

/// One-item order payload used across tests: 1.0 kg, price 1000, zip in
/// zone two.
pub fn pending_order_body(customer_ref: &str, coupon: Option<&str>) -> Value {
    json!({
        "customer_ref": customer_ref,
        "coupon_code": coupon,
        "address": {
            "name": "Asha Verma",
            "phone": "9810000001",
            "zip": "226010",
            "address": "14 Hazratganj"
        },
        "items": [{
            "product_id": Uuid::new_v4(),
            "name": "Gold-plated jhumka",
            "quantity": 1,
            "unit_price": "1000",
            "weight_kg": "1.0",
            "origin_store_id": Uuid::new_v4()
        }]
    })
}
