use axum::{
    extract::State,
    response::IntoResponse,
    routing::post,
    Json, Router,
};
use serde::Deserialize;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::services::fulfillment::{CarrierWebhookPayload, ShipmentCreated};
use crate::services::shipping::{QuoteItem, ShippingQuote};
use crate::{errors::ServiceError, ApiResponse, AppState};

#[derive(Debug, Deserialize, ToSchema)]
pub struct EstimateRequest {
    pub items: Vec<QuoteItem>,
    pub destination_zip: String,
    pub coupon_code: Option<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateShipmentRequest {
    pub order_id: Uuid,
}

/// Always answers with a charge; a carrier outage silently degrades to
/// the deterministic fallback pricing.
#[utoipa::path(
    post,
    path = "/api/v1/shipping/estimate",
    request_body = EstimateRequest,
    responses(
        (status = 200, description = "Shipping quote", body = ShippingQuote)
    ),
    tag = "Shipping"
)]
pub async fn estimate(
    State(state): State<AppState>,
    Json(request): Json<EstimateRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    let coupon = match request.coupon_code.as_deref() {
        Some(code) => state.services.coupons.find_by_code(code).await?,
        None => None,
    };
    let quote = state
        .services
        .shipping
        .resolve(&request.items, &request.destination_zip, coupon.as_ref())
        .await;
    Ok(Json(ApiResponse::success(quote)))
}

/// Manual fulfillment trigger for orders whose automatic shipment
/// creation degraded to a warning at settlement time.
#[utoipa::path(
    post,
    path = "/api/v1/shipping/create-shipment",
    request_body = CreateShipmentRequest,
    responses(
        (status = 200, description = "Shipment registered", body = ShipmentCreated),
        (status = 400, description = "Order not shippable", body = crate::errors::ErrorResponse),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse),
        (status = 502, description = "Carrier unavailable", body = crate::errors::ErrorResponse)
    ),
    tag = "Shipping"
)]
pub async fn create_shipment(
    State(state): State<AppState>,
    Json(request): Json<CreateShipmentRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    let created = state
        .services
        .fulfillment
        .create_shipment(request.order_id)
        .await?;
    Ok(Json(ApiResponse::success(created)))
}

#[utoipa::path(
    post,
    path = "/api/v1/shipping/webhook",
    request_body = CarrierWebhookPayload,
    responses(
        (status = 200, description = "Status update folded in"),
        (status = 404, description = "Unknown carrier order", body = crate::errors::ErrorResponse)
    ),
    tag = "Shipping"
)]
pub async fn carrier_webhook(
    State(state): State<AppState>,
    Json(payload): Json<CarrierWebhookPayload>,
) -> Result<impl IntoResponse, ServiceError> {
    let order = state.services.fulfillment.ingest_webhook(payload).await?;
    Ok(Json(ApiResponse::success(serde_json::json!({
        "order_id": order.id,
        "carrier_status": order.carrier_status,
        "status": order.status,
    }))))
}

pub fn shipping_routes() -> Router<AppState> {
    Router::new()
        .route("/estimate", post(estimate))
        .route("/create-shipment", post(create_shipment))
        .route("/webhook", post(carrier_webhook))
}
