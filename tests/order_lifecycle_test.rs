mod common;

use axum::http::{Method, StatusCode};
use common::{pending_order_body, TestApp};
use chrono::{Duration, Utc};
use ornata_api::entities::order::OrderStatus;
use serde_json::json;
use uuid::Uuid;

#[tokio::test]
async fn duplicate_checkout_click_returns_same_order() {
    let app = TestApp::new().await;
    let mut body = pending_order_body("buyer-dup", None);
    body["idempotency_key"] = json!("click-abc-123");

    let (status, first) = app
        .request(Method::POST, "/api/v1/orders/pending", Some(body.clone()))
        .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, second) = app
        .request(Method::POST, "/api/v1/orders/pending", Some(body))
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(
        first["data"]["order_id"], second["data"]["order_id"],
        "same idempotency key must map to one pending order"
    );

    let (_, list) = app.request(Method::GET, "/api/v1/orders", None).await;
    assert_eq!(list["data"]["total"], json!(1));
}

#[tokio::test]
async fn reap_expires_only_overdue_pending_orders() {
    let app = TestApp::new().await;

    let (status, overdue) = app
        .request(
            Method::POST,
            "/api/v1/orders/pending",
            Some(pending_order_body("buyer-a", None)),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    let overdue_id: Uuid = overdue["data"]["order_id"].as_str().unwrap().parse().unwrap();
    app.set_expires_at(overdue_id, Utc::now() - Duration::minutes(5))
        .await;

    let (status, fresh) = app
        .request(
            Method::POST,
            "/api/v1/orders/pending",
            Some(pending_order_body("buyer-b", None)),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    let fresh_id: Uuid = fresh["data"]["order_id"].as_str().unwrap().parse().unwrap();

    let (status, body) = app
        .request(Method::POST, "/api/v1/orders/expire", None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["expired"], json!(1));

    assert_eq!(app.fetch_order(overdue_id).await.status, OrderStatus::Expired);
    assert_eq!(app.fetch_order(fresh_id).await.status, OrderStatus::Pending);
}

#[tokio::test]
async fn get_order_returns_items() {
    let app = TestApp::new().await;
    let (_, created) = app
        .request(
            Method::POST,
            "/api/v1/orders/pending",
            Some(pending_order_body("buyer-get", None)),
        )
        .await;
    let order_id = created["data"]["order_id"].as_str().unwrap();

    let (status, body) = app
        .request(Method::GET, &format!("/api/v1/orders/{order_id}"), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["items"].as_array().map(|a| a.len()), Some(1));
    assert_eq!(body["data"]["items"][0]["name"], json!("Gold-plated jhumka"));
}

#[tokio::test]
async fn unknown_order_is_404() {
    let app = TestApp::new().await;
    let (status, _) = app
        .request(
            Method::GET,
            &format!("/api/v1/orders/{}", Uuid::new_v4()),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn empty_item_list_is_rejected() {
    let app = TestApp::new().await;
    let mut body = pending_order_body("buyer-empty", None);
    body["items"] = json!([]);
    let (status, _) = app
        .request(Method::POST, "/api/v1/orders/pending", Some(body))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn unknown_coupon_is_404() {
    let app = TestApp::new().await;
    let (status, _) = app
        .request(
            Method::POST,
            "/api/v1/orders/pending",
            Some(pending_order_body("buyer-c", Some("NOPE"))),
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn opening_an_intent_arms_the_expiry_timer() {
    let app = TestApp::new().await;
    let (status, created) = app
        .request(
            Method::POST,
            "/api/v1/orders/pending",
            Some(pending_order_body("buyer-timer", None)),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    let order_id: Uuid = created["data"]["order_id"].as_str().unwrap().parse().unwrap();

    // Shrink the deadline so the countdown fires within the test.
    app.set_expires_at(order_id, Utc::now() + Duration::milliseconds(300))
        .await;

    let (status, body) = app
        .request(
            Method::POST,
            "/api/v1/payments/intent",
            Some(json!({ "order_id": order_id })),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "open intent failed: {body}");
    assert_eq!(app.fetch_order(order_id).await.status, OrderStatus::Pending);

    tokio::time::sleep(std::time::Duration::from_millis(1200)).await;
    assert_eq!(
        app.fetch_order(order_id).await.status,
        OrderStatus::Expired,
        "the armed countdown must reap the pending order on its own"
    );
}
