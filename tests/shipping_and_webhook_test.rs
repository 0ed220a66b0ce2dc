mod common;

use axum::http::{Method, StatusCode};
use common::{pending_order_body, TestApp};
use ornata_api::entities::order::OrderStatus;
use serde_json::json;
use std::sync::atomic::Ordering;
use uuid::Uuid;

fn estimate_body(zip: &str) -> serde_json::Value {
    json!({
        "items": [{ "quantity": 1, "unit_price": "1000", "weight_kg": "1.0" }],
        "destination_zip": zip,
        "coupon_code": null,
    })
}

#[tokio::test]
async fn estimate_uses_live_carrier_rate() {
    let app = TestApp::new().await;
    let (status, body) = app
        .request(
            Method::POST,
            "/api/v1/shipping/estimate",
            Some(estimate_body("226010")),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["charge"], json!("85"));
    assert_eq!(body["data"]["carrier_name"], json!("BlueDart Air"));
}

#[tokio::test]
async fn estimate_degrades_to_deterministic_fallback() {
    let app = TestApp::new().await;
    app.carrier.fail_auth.store(true, Ordering::SeqCst);

    let (status, body) = app
        .request(
            Method::POST,
            "/api/v1/shipping/estimate",
            Some(estimate_body("226010")),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "estimate never fails on an outage");
    // 60 + ceil(1.0/0.5)*20 + zone surcharge 30
    assert_eq!(body["data"]["charge"], json!("130"));
    assert_eq!(body["data"]["carrier_name"], json!("flat-rate"));
}

async fn confirmed_order_with_carrier_link(app: &TestApp) -> Uuid {
    let (_, created) = app
        .request(
            Method::POST,
            "/api/v1/orders/pending",
            Some(pending_order_body("buyer-wh", None)),
        )
        .await;
    let order_id: Uuid = created["data"]["order_id"].as_str().unwrap().parse().unwrap();

    let (_, intent) = app
        .request(
            Method::POST,
            "/api/v1/payments/intent",
            Some(json!({ "order_id": order_id })),
        )
        .await;
    let gateway_order_id = intent["data"]["gateway_order_id"].as_str().unwrap();
    let signature = app.sign(gateway_order_id, "pay_wh");
    let (status, _) = app
        .request(
            Method::POST,
            "/api/v1/payments/verify",
            Some(json!({
                "order_id": order_id,
                "gateway_order_id": gateway_order_id,
                "gateway_payment_id": "pay_wh",
                "gateway_signature": signature,
            })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    order_id
}

fn webhook_body(carrier_order_id: &str, status: &str) -> serde_json::Value {
    json!({
        "event_type": "shipment_status",
        "data": {
            "order_id": carrier_order_id,
            "shipment_id": "SHIP-0001",
            "awb_code": "AWB123",
            "status": status,
            "courier_name": "BlueDart Air",
            "estimated_delivery_date": "2026-09-03",
            "tracking_url": "https://track.example/AWB123"
        }
    })
}

#[tokio::test]
async fn webhook_progresses_order_and_fans_out() {
    let app = TestApp::new().await;
    let order_id = confirmed_order_with_carrier_link(&app).await;
    let carrier_order_id = app
        .fetch_order(order_id)
        .await
        .carrier_order_id
        .expect("shipment registered at settlement");

    let mut updates = app.state.shipment_updates.subscribe();

    let (status, _) = app
        .request(
            Method::POST,
            "/api/v1/shipping/webhook",
            Some(webhook_body(&carrier_order_id, "shipped")),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let order = app.fetch_order(order_id).await;
    assert_eq!(order.status, OrderStatus::Shipped);
    assert_eq!(order.carrier_status.as_deref(), Some("in_transit"));
    assert_eq!(
        order.tracking_url.as_deref(),
        Some("https://track.example/AWB123")
    );

    let update = updates.try_recv().expect("subscriber sees the update");
    assert_eq!(update.order_id, order_id);
    assert_eq!(update.carrier_status, "in_transit");
    assert_eq!(update.origin_store_ids.len(), 1);
}

#[tokio::test]
async fn regressive_webhook_is_dropped() {
    let app = TestApp::new().await;
    let order_id = confirmed_order_with_carrier_link(&app).await;
    let carrier_order_id = app
        .fetch_order(order_id)
        .await
        .carrier_order_id
        .unwrap();

    let (status, _) = app
        .request(
            Method::POST,
            "/api/v1/shipping/webhook",
            Some(webhook_body(&carrier_order_id, "delivered")),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(app.fetch_order(order_id).await.status, OrderStatus::Delivered);

    // A late "picked" event must not rewind the shipment.
    let (status, _) = app
        .request(
            Method::POST,
            "/api/v1/shipping/webhook",
            Some(webhook_body(&carrier_order_id, "picked")),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    let order = app.fetch_order(order_id).await;
    assert_eq!(order.status, OrderStatus::Delivered);
    assert_eq!(order.carrier_status.as_deref(), Some("delivered"));
}

#[tokio::test]
async fn webhook_for_unknown_carrier_order_is_404() {
    let app = TestApp::new().await;
    let (status, _) = app
        .request(
            Method::POST,
            "/api/v1/shipping/webhook",
            Some(webhook_body("SR-MISSING", "shipped")),
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn manual_create_shipment_is_idempotent() {
    let app = TestApp::new().await;
    let order_id = confirmed_order_with_carrier_link(&app).await;
    let first = app.fetch_order(order_id).await.carrier_order_id.unwrap();

    let (status, body) = app
        .request(
            Method::POST,
            "/api/v1/shipping/create-shipment",
            Some(json!({ "order_id": order_id })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["carrier_order_id"], json!(first));
}
