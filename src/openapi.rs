use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Ornata API",
        version = "0.1.0",
        description = r#"
Jewelry storefront backend built around the order settlement pipeline:
pending orders, payment intent and verification, coupon application,
shipping rate resolution, and carrier fulfillment sync.

All successful business outcomes ride a 200/201; a refund of a late
payment is an orderly outcome, not an error.
"#
    ),
    paths(
        crate::handlers::orders::create_pending_order,
        crate::handlers::orders::get_order,
        crate::handlers::orders::list_orders,
        crate::handlers::orders::reap_expired_orders,
        crate::handlers::payments::open_intent,
        crate::handlers::payments::verify_payment,
        crate::handlers::shipping::estimate,
        crate::handlers::shipping::create_shipment,
        crate::handlers::shipping::carrier_webhook,
    ),
    components(schemas(
        crate::errors::ErrorResponse,
        crate::entities::order::OrderStatus,
        crate::services::orders::AddressInput,
        crate::services::orders::PendingItemInput,
        crate::services::orders::CreatePendingOrderRequest,
        crate::services::orders::PendingOrderResponse,
        crate::services::payments::OpenIntentRequest,
        crate::services::payments::IntentResponse,
        crate::services::payments::VerifyRequest,
        crate::services::shipping::QuoteItem,
        crate::services::shipping::ShippingQuote,
        crate::services::fulfillment::CarrierWebhookPayload,
        crate::services::fulfillment::CarrierWebhookData,
        crate::services::fulfillment::ShipmentCreated,
        crate::entities::order::Model,
        crate::entities::order_item::Model,
        crate::handlers::payments::VerifyResponse,
        crate::handlers::orders::OrderDetailResponse,
        crate::handlers::orders::ReapResponse,
        crate::handlers::shipping::EstimateRequest,
        crate::handlers::shipping::CreateShipmentRequest,
    )),
    tags(
        (name = "Orders", description = "Pending order creation and lifecycle"),
        (name = "Payments", description = "Payment intent and settlement verification"),
        (name = "Shipping", description = "Rate estimates and carrier fulfillment")
    )
)]
pub struct ApiDoc;

/// Mounts the interactive API docs.
pub fn swagger_ui() -> SwaggerUi {
    SwaggerUi::new("/docs").url("/api-docs/openapi.json", ApiDoc::openapi())
}
