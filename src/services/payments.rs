use crate::{
    clients::payment_gateway::{self, PaymentGateway},
    config::GatewayConfig,
    entities::order::{self, Entity as OrderEntity, Model as OrderModel, OrderStatus},
    entities::order_item::{self, Entity as OrderItemEntity},
    errors::ServiceError,
    events::{reconciliation, Event, EventSender},
    services::catalog::ProductCatalog,
    services::coupons::{self, CouponService},
    services::customers::CustomerService,
    services::fulfillment::FulfillmentService,
    services::notifications::NotificationSink,
    services::orders::{self, ConfirmOutcome, ConfirmationUpdate, OrderService},
};
use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::sea_query::Expr;
use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct OpenIntentRequest {
    pub order_id: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct IntentResponse {
    pub order_id: Uuid,
    pub gateway_order_id: String,
    pub amount_minor: i64,
    pub currency: String,
}

/// Settlement callback as posted back by the storefront client after the
/// gateway checkout completes.
#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct VerifyRequest {
    pub order_id: Uuid,
    #[validate(length(min = 1, message = "gateway_order_id is required"))]
    pub gateway_order_id: String,
    #[validate(length(min = 1, message = "gateway_payment_id is required"))]
    pub gateway_payment_id: String,
    #[validate(length(min = 1, message = "gateway_signature is required"))]
    pub gateway_signature: String,
}

/// Terminal result of a settlement callback. Both arms are successful HTTP
/// responses; a refund is an orderly outcome, not an error.
#[derive(Debug, Clone)]
pub enum VerifyOutcome {
    Confirmed {
        order_id: Uuid,
        /// Set when a post-confirmation side effect degraded (carrier down,
        /// confirmation queued for reconciliation).
        warning: Option<String>,
    },
    Refunded {
        order_id: Uuid,
        /// None when the refund call itself failed; the payment stays
        /// captured for manual follow-up, the order is still expired.
        refund_id: Option<String>,
    },
}

/// Payment intent bridge and settlement verifier.
#[derive(Clone)]
pub struct PaymentService {
    db: Arc<DatabaseConnection>,
    gateway: Arc<dyn PaymentGateway>,
    orders: Arc<OrderService>,
    coupons: Arc<CouponService>,
    customers: Arc<CustomerService>,
    catalog: Arc<dyn ProductCatalog>,
    fulfillment: Arc<FulfillmentService>,
    notifier: Arc<dyn NotificationSink>,
    event_sender: Arc<EventSender>,
    config: GatewayConfig,
}

impl PaymentService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        db: Arc<DatabaseConnection>,
        gateway: Arc<dyn PaymentGateway>,
        orders: Arc<OrderService>,
        coupons: Arc<CouponService>,
        customers: Arc<CustomerService>,
        catalog: Arc<dyn ProductCatalog>,
        fulfillment: Arc<FulfillmentService>,
        notifier: Arc<dyn NotificationSink>,
        event_sender: Arc<EventSender>,
        config: GatewayConfig,
    ) -> Self {
        Self {
            db,
            gateway,
            orders,
            coupons,
            customers,
            catalog,
            fulfillment,
            notifier,
            event_sender,
            config,
        }
    }

    /// Opens a gateway-side transaction for a pending order and arms the
    /// expiry countdown. No local state transition happens here; a gateway
    /// failure leaves the order pending and retryable.
    #[instrument(skip(self))]
    pub async fn open_intent(&self, order_id: Uuid) -> Result<IntentResponse, ServiceError> {
        let (order, _items) = self
            .orders
            .get_order(order_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;

        if order.status != OrderStatus::Pending {
            return Err(ServiceError::InvalidOperation(format!(
                "Order {} is {}, payment can only be opened while pending",
                order_id, order.status
            )));
        }
        if let Some(expires_at) = order.expires_at {
            if expires_at < Utc::now() {
                let status = self.orders.mark_expired(order_id).await?;
                return Err(ServiceError::InvalidOperation(format!(
                    "Order {} is {}",
                    order_id, status
                )));
            }
        }

        let amount_minor = payment_gateway::to_minor_units(order.final_total)?;
        if amount_minor == 0 {
            return Err(ServiceError::ValidationError(
                "Order total must be positive to open a payment".to_string(),
            ));
        }

        let gateway_order = self
            .gateway
            .create_order(amount_minor, &self.config.currency, &order.order_number)
            .await?;

        // Linking the gateway order id back is best-effort; verification
        // carries the id in the callback anyway.
        if let Err(e) = self
            .orders
            .attach_gateway_order(order_id, &gateway_order.id)
            .await
        {
            warn!(order_id = %order_id, "could not persist gateway order id: {}", e);
        }

        if let Some(expires_at) = order.expires_at {
            orders::spawn_expiry_reaper(self.orders.clone(), order_id, expires_at);
        }

        info!(order_id = %order_id, gateway_order_id = %gateway_order.id, "payment intent opened");
        Ok(IntentResponse {
            order_id,
            gateway_order_id: gateway_order.id,
            amount_minor: gateway_order.amount_minor,
            currency: gateway_order.currency,
        })
    }

    /// The settlement verifier. Authenticates the callback, resolves the
    /// expiry race, recomputes the money, and lands the one conditional
    /// pending->confirmed update. Idempotent under replay.
    #[instrument(skip(self, request), fields(order_id = %request.order_id))]
    pub async fn verify(&self, request: VerifyRequest) -> Result<VerifyOutcome, ServiceError> {
        request.validate()?;

        if !payment_gateway::verify_callback_signature(
            &self.config.callback_secret,
            &request.gateway_order_id,
            &request.gateway_payment_id,
            &request.gateway_signature,
        ) {
            warn!(order_id = %request.order_id, "settlement callback failed signature check");
            return Err(ServiceError::AuthenticityError);
        }

        let (order, items) = self
            .orders
            .get_order(request.order_id)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Order {} not found", request.order_id))
            })?;

        // Expiry precedes confirmation: money for a dead order goes back.
        let past_deadline = order
            .expires_at
            .map(|at| at < Utc::now())
            .unwrap_or(false);
        match order.status {
            status if refund_due(status) => {
                return Ok(self.refund_late_payment(&order, &request).await);
            }
            OrderStatus::Pending if past_deadline => {
                // The expiry transition races with a concurrent confirm on
                // the same conditional update; honor whichever landed.
                let status = self.orders.mark_expired(order.id).await?;
                if !refund_due(status) {
                    info!(order_id = %order.id, status = %status, "concurrent settlement beat the expiry check");
                    return Ok(VerifyOutcome::Confirmed {
                        order_id: order.id,
                        warning: None,
                    });
                }
                return Ok(self.refund_late_payment(&order, &request).await);
            }
            OrderStatus::Pending => {}
            // Callback replay for an already-confirmed order.
            _ => {
                info!(order_id = %order.id, "settlement callback replayed, order already confirmed");
                return Ok(VerifyOutcome::Confirmed {
                    order_id: order.id,
                    warning: None,
                });
            }
        }

        self.refresh_display_fields(&items).await;

        let customer = self
            .customers
            .ensure_customer(&order.customer_ref, &order.ship_name, Some(&order.ship_phone))
            .await?;

        let (discount, coupon_code) = self.settle_discount(&order).await?;
        let final_total = (order.subtotal + order.shipping_charge - discount).max(Decimal::ZERO);

        let update = ConfirmationUpdate {
            payment_id: request.gateway_payment_id.clone(),
            gateway_order_id: request.gateway_order_id.clone(),
            discount_amount: discount,
            final_total,
            customer_id: Some(customer.id),
        };

        match OrderService::apply_confirmation(&self.db, order.id, &update).await {
            Ok(ConfirmOutcome::Applied) => {
                info!(order_id = %order.id, payment_id = %request.gateway_payment_id, "order confirmed");

                if let Some(code) = coupon_code {
                    // Monotonic counter; a failed increment is logged, never
                    // undone and never blocks settlement.
                    if let Err(e) = self.coupons.increment_used_count(&code).await {
                        warn!(order_id = %order.id, coupon = %code, "coupon usage increment failed: {}", e);
                    }
                }

                if let Err(e) = self
                    .event_sender
                    .send(Event::OrderConfirmed {
                        order_id: order.id,
                        payment_id: request.gateway_payment_id.clone(),
                    })
                    .await
                {
                    warn!(order_id = %order.id, "failed to send confirmation event: {}", e);
                }
                if let Err(e) = self
                    .notifier
                    .order_confirmed(order.id, &order.order_number)
                    .await
                {
                    warn!(order_id = %order.id, "confirmation notification failed: {}", e);
                }

                let warning = self.fulfillment.create_shipment_with_warning(order.id).await;
                Ok(VerifyOutcome::Confirmed {
                    order_id: order.id,
                    warning,
                })
            }

            Ok(ConfirmOutcome::AlreadySettled(current)) => {
                if refund_due(current.status) {
                    Ok(self.refund_late_payment(&current, &request).await)
                } else {
                    info!(order_id = %current.id, "concurrent settlement won, treating as confirmed");
                    Ok(VerifyOutcome::Confirmed {
                        order_id: current.id,
                        warning: None,
                    })
                }
            }

            // The payment is captured; never drop it because our own store
            // hiccuped. Queue the confirmation for replay instead.
            Err(ServiceError::DatabaseError(db_err)) => {
                error!(order_id = %order.id, "confirm update failed, queueing reconciliation: {}", db_err);
                let payload = serde_json::json!({
                    "discount_amount": discount.to_string(),
                    "final_total": final_total.to_string(),
                    "customer_id": customer.id.to_string(),
                });
                reconciliation::enqueue(
                    &self.db,
                    order.id,
                    &request.gateway_order_id,
                    &request.gateway_payment_id,
                    payload,
                )
                .await?;
                Ok(VerifyOutcome::Confirmed {
                    order_id: order.id,
                    warning: Some("confirmation queued for reconciliation".to_string()),
                })
            }

            Err(e) => Err(e),
        }
    }

    /// Refunds a payment that arrived for an order past saving. Refund
    /// failure is logged and reported as `refund_id: None`; the order state
    /// is already correct either way.
    async fn refund_late_payment(
        &self,
        order: &OrderModel,
        request: &VerifyRequest,
    ) -> VerifyOutcome {
        // A replayed callback must not move money twice.
        if let Some(existing) = order.refund_id.clone() {
            info!(order_id = %order.id, refund_id = %existing, "late payment already refunded");
            return VerifyOutcome::Refunded {
                order_id: order.id,
                refund_id: Some(existing),
            };
        }

        let refund_id = match payment_gateway::to_minor_units(order.final_total) {
            Ok(amount_minor) => match self
                .gateway
                .refund(&request.gateway_payment_id, amount_minor)
                .await
            {
                Ok(refund) => {
                    info!(order_id = %order.id, refund_id = %refund.id, "late payment refunded");
                    self.record_refund(order.id, &refund.id).await;
                    if let Err(e) = self
                        .event_sender
                        .send(Event::PaymentRefunded {
                            order_id: order.id,
                            refund_id: refund.id.clone(),
                        })
                        .await
                    {
                        warn!(order_id = %order.id, "failed to send refund event: {}", e);
                    }
                    Some(refund.id)
                }
                Err(e) => {
                    error!(order_id = %order.id, "refund failed, payment needs manual follow-up: {}", e);
                    None
                }
            },
            Err(e) => {
                error!(order_id = %order.id, "unrefundable amount: {}", e);
                None
            }
        };

        VerifyOutcome::Refunded {
            order_id: order.id,
            refund_id,
        }
    }

    /// Persists the refund id so replays resolve from the stored record
    /// instead of calling the gateway again. First writer wins.
    async fn record_refund(&self, order_id: Uuid, refund_id: &str) {
        let result = OrderEntity::update_many()
            .col_expr(
                order::Column::RefundId,
                Expr::value(Some(refund_id.to_string())),
            )
            .col_expr(order::Column::UpdatedAt, Expr::value(Some(Utc::now())))
            .filter(order::Column::Id.eq(order_id))
            .filter(order::Column::RefundId.is_null())
            .exec(&*self.db)
            .await;
        if let Err(e) = result {
            warn!(order_id = %order_id, "could not persist refund id: {}", e);
        }
    }

    /// Recomputes the discount at settlement time against the live coupon
    /// row. Returns the discount and the code to increment on first
    /// confirmation.
    async fn settle_discount(
        &self,
        order: &OrderModel,
    ) -> Result<(Decimal, Option<String>), ServiceError> {
        let Some(code) = order.coupon_code.as_deref() else {
            return Ok((Decimal::ZERO, None));
        };

        let coupon = self
            .coupons
            .find_by_code(code)
            .await?
            .ok_or_else(|| ServiceError::ValidationError(format!("Coupon {} not found", code)))?;

        let prior = self
            .orders
            .prior_order_count(&order.customer_ref, Some(order.id))
            .await?;

        let discount =
            coupons::evaluate(&coupon, order.subtotal, order.shipping_charge, prior)
                .map_err(|r| ServiceError::ValidationError(r.to_string()))?;
        Ok((discount, Some(coupon.code)))
    }

    /// Refreshes item display fields from the catalog read-side. Snapshot
    /// prices stand; only names are updated, and only best-effort.
    async fn refresh_display_fields(&self, items: &[order_item::Model]) {
        let ids: Vec<Uuid> = items.iter().map(|i| i.product_id).collect();
        let display = match self.catalog.display_fields(&ids).await {
            Ok(map) => map,
            Err(e) => {
                warn!("catalog lookup failed, keeping snapshot display fields: {}", e);
                return;
            }
        };

        for item in items {
            let Some(product) = display.get(&item.product_id) else {
                continue;
            };
            if product.name == item.name {
                continue;
            }
            let result = OrderItemEntity::update_many()
                .col_expr(
                    order_item::Column::Name,
                    Expr::value(product.name.clone()),
                )
                .filter(order_item::Column::Id.eq(item.id))
                .exec(&*self.db)
                .await;
            if let Err(e) = result {
                warn!(item_id = %item.id, "display refresh failed: {}", e);
            }
        }
    }
}

/// True for settled states that keep none of the money: a payment landing
/// on such an order goes back to the buyer.
fn refund_due(status: OrderStatus) -> bool {
    matches!(
        status,
        OrderStatus::Expired | OrderStatus::Cancelled | OrderStatus::Failed
    )
}
