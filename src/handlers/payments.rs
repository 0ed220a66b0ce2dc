use axum::{
    extract::State,
    response::IntoResponse,
    routing::post,
    Json, Router,
};
use serde::Serialize;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::services::payments::{IntentResponse, OpenIntentRequest, VerifyOutcome, VerifyRequest};
use crate::{errors::ServiceError, ApiResponse, AppState};

/// Settlement callback result. Refunds are orderly outcomes, so both
/// shapes ride a 200.
#[derive(Debug, Serialize, ToSchema)]
pub struct VerifyResponse {
    pub ok: bool,
    pub order_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refunded: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refund_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

impl From<VerifyOutcome> for VerifyResponse {
    fn from(outcome: VerifyOutcome) -> Self {
        match outcome {
            VerifyOutcome::Confirmed { order_id, warning } => VerifyResponse {
                ok: true,
                order_id,
                refunded: None,
                refund_id: None,
                warning,
            },
            VerifyOutcome::Refunded {
                order_id,
                refund_id,
            } => VerifyResponse {
                ok: false,
                order_id,
                refunded: Some(true),
                refund_id,
                warning: None,
            },
        }
    }
}

#[utoipa::path(
    post,
    path = "/api/v1/payments/intent",
    request_body = OpenIntentRequest,
    responses(
        (status = 200, description = "Gateway intent opened", body = IntentResponse),
        (status = 400, description = "Order not payable", body = crate::errors::ErrorResponse),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse),
        (status = 502, description = "Gateway unavailable", body = crate::errors::ErrorResponse)
    ),
    tag = "Payments"
)]
pub async fn open_intent(
    State(state): State<AppState>,
    Json(request): Json<OpenIntentRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    let intent = state.services.payments.open_intent(request.order_id).await?;
    Ok(Json(ApiResponse::success(intent)))
}

#[utoipa::path(
    post,
    path = "/api/v1/payments/verify",
    request_body = VerifyRequest,
    responses(
        (status = 200, description = "Settlement resolved", body = VerifyResponse),
        (status = 401, description = "Invalid signature", body = crate::errors::ErrorResponse),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse)
    ),
    tag = "Payments"
)]
pub async fn verify_payment(
    State(state): State<AppState>,
    Json(request): Json<VerifyRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    let outcome = state.services.payments.verify(request).await?;
    Ok(Json(VerifyResponse::from(outcome)))
}

pub fn payment_routes() -> Router<AppState> {
    Router::new()
        .route("/intent", post(open_intent))
        .route("/verify", post(verify_payment))
}
