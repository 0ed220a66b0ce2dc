mod common;

use axum::http::{Method, StatusCode};
use common::{pending_order_body, TestApp};
use ornata_api::entities::order::OrderStatus;
use ornata_api::entities::reconciliation_task::{self, TaskStatus};
use ornata_api::events::reconciliation;
use sea_orm::EntityTrait;
use serde_json::json;
use uuid::Uuid;

#[tokio::test]
async fn queued_confirmation_lands_on_drain() {
    let app = TestApp::new().await;
    let (status, created) = app
        .request(
            Method::POST,
            "/api/v1/orders/pending",
            Some(pending_order_body("buyer-recon", None)),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    let order_id: Uuid = created["data"]["order_id"].as_str().unwrap().parse().unwrap();

    let payload = json!({
        "discount_amount": "0",
        "final_total": "1085",
        "customer_id": Uuid::new_v4().to_string(),
    });
    reconciliation::enqueue(&app.state.db, order_id, "order_GW0000", "pay_recon", payload)
        .await
        .expect("enqueue failed");

    reconciliation::drain_once(&app.state.db, 20)
        .await
        .expect("drain failed");

    let order = app.fetch_order(order_id).await;
    assert_eq!(order.status, OrderStatus::Confirmed);
    assert!(order.is_paid);
    assert_eq!(order.payment_id.as_deref(), Some("pay_recon"));
    assert_eq!(order.final_total.to_string(), "1085");

    let tasks = reconciliation_task::Entity::find()
        .all(&*app.state.db)
        .await
        .unwrap();
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].status, TaskStatus::Done);
    assert_eq!(tasks[0].attempts, 1);
}

#[tokio::test]
async fn drain_resolves_tasks_for_already_settled_orders() {
    let app = TestApp::new().await;
    let (_, created) = app
        .request(
            Method::POST,
            "/api/v1/orders/pending",
            Some(pending_order_body("buyer-recon2", None)),
        )
        .await;
    let order_id: Uuid = created["data"]["order_id"].as_str().unwrap().parse().unwrap();

    // Settle through the normal path first.
    let (_, intent) = app
        .request(
            Method::POST,
            "/api/v1/payments/intent",
            Some(json!({ "order_id": order_id })),
        )
        .await;
    let gateway_order_id = intent["data"]["gateway_order_id"].as_str().unwrap();
    let signature = app.sign(gateway_order_id, "pay_settled");
    let (status, _) = app
        .request(
            Method::POST,
            "/api/v1/payments/verify",
            Some(json!({
                "order_id": order_id,
                "gateway_order_id": gateway_order_id,
                "gateway_payment_id": "pay_settled",
                "gateway_signature": signature,
            })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    // A stale replay task races a finished settlement and resolves quietly.
    reconciliation::enqueue(
        &app.state.db,
        order_id,
        gateway_order_id,
        "pay_settled",
        json!({ "discount_amount": "0", "final_total": "1085" }),
    )
    .await
    .unwrap();
    reconciliation::drain_once(&app.state.db, 20).await.unwrap();

    let order = app.fetch_order(order_id).await;
    assert_eq!(order.status, OrderStatus::Confirmed);
    assert_eq!(order.payment_id.as_deref(), Some("pay_settled"));

    let tasks = reconciliation_task::Entity::find()
        .all(&*app.state.db)
        .await
        .unwrap();
    assert_eq!(tasks[0].status, TaskStatus::Done);
}
