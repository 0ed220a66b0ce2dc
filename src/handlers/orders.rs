use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::entities::{order, order_item};
use crate::services::orders::{CreatePendingOrderRequest, PendingOrderResponse};
use crate::{errors::ServiceError, ApiResponse, AppState, PaginatedResponse};

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    #[serde(default = "default_page")]
    pub page: u64,
    #[serde(default = "default_limit")]
    pub limit: u64,
}

fn default_page() -> u64 {
    1
}

fn default_limit() -> u64 {
    20
}

#[derive(Debug, Serialize, ToSchema)]
pub struct OrderDetailResponse {
    #[serde(flatten)]
    pub order: order::Model,
    pub items: Vec<order_item::Model>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ReapResponse {
    pub expired: u64,
}

#[utoipa::path(
    post,
    path = "/api/v1/orders/pending",
    request_body = CreatePendingOrderRequest,
    responses(
        (status = 201, description = "Pending order created", body = PendingOrderResponse),
        (status = 400, description = "Invalid order payload", body = crate::errors::ErrorResponse),
        (status = 404, description = "Unknown coupon code", body = crate::errors::ErrorResponse)
    ),
    tag = "Orders"
)]
pub async fn create_pending_order(
    State(state): State<AppState>,
    Json(request): Json<CreatePendingOrderRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    let response = state.services.orders.create_pending(request).await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::success(response))))
}

#[utoipa::path(
    get,
    path = "/api/v1/orders/{id}",
    params(("id" = Uuid, Path, description = "Order id")),
    responses(
        (status = 200, description = "Order found", body = OrderDetailResponse),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse)
    ),
    tag = "Orders"
)]
pub async fn get_order(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ServiceError> {
    let (order, items) = state
        .services
        .orders
        .get_order(id)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", id)))?;
    Ok(Json(ApiResponse::success(OrderDetailResponse {
        order,
        items,
    })))
}

#[utoipa::path(
    get,
    path = "/api/v1/orders",
    responses(
        (status = 200, description = "Orders page")
    ),
    tag = "Orders"
)]
pub async fn list_orders(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<impl IntoResponse, ServiceError> {
    let limit = query.limit.clamp(1, 100);
    let (orders, total) = state.services.orders.list_orders(query.page, limit).await?;
    let total_pages = total.div_ceil(limit);
    Ok(Json(ApiResponse::success(PaginatedResponse {
        items: orders,
        total,
        page: query.page,
        limit,
        total_pages,
    })))
}

/// Server-side cron hook; clients never call this.
#[utoipa::path(
    post,
    path = "/api/v1/orders/expire",
    responses(
        (status = 200, description = "Expired pending orders reaped", body = ReapResponse)
    ),
    tag = "Orders"
)]
pub async fn reap_expired_orders(
    State(state): State<AppState>,
) -> Result<impl IntoResponse, ServiceError> {
    let expired = state.services.orders.reap_expired().await?;
    Ok(Json(ApiResponse::success(ReapResponse { expired })))
}

pub fn order_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list_orders))
        .route("/pending", post(create_pending_order))
        .route("/expire", post(reap_expired_orders))
        .route("/:id", get(get_order))
}
