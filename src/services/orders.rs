use crate::{
    entities::order::{self, Entity as OrderEntity, Model as OrderModel, OrderStatus},
    entities::order_item::{self, Entity as OrderItemEntity},
    errors::ServiceError,
    events::{Event, EventSender},
    services::coupons::{self, CouponService},
    services::shipping::{QuoteItem, ShippingRateService},
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct AddressInput {
    #[validate(length(min = 1, message = "Recipient name is required"))]
    pub name: String,
    #[validate(length(min = 1, message = "Phone is required"))]
    pub phone: String,
    #[validate(length(min = 1, message = "Zip is required"))]
    pub zip: String,
    pub address: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct PendingItemInput {
    pub product_id: Uuid,
    #[validate(length(min = 1, message = "Item name is required"))]
    pub name: String,
    #[validate(range(min = 1, message = "Quantity must be positive"))]
    pub quantity: i32,
    /// Price snapshot as supplied by the caller; not re-priced against the
    /// catalog at this step.
    pub unit_price: Decimal,
    pub weight_kg: Decimal,
    pub origin_store_id: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct CreatePendingOrderRequest {
    #[validate(length(min = 1, message = "Customer reference is required"))]
    pub customer_ref: String,

    /// Client-supplied dedup token; retried checkout clicks with the same
    /// key map to one pending order.
    pub idempotency_key: Option<String>,

    pub coupon_code: Option<String>,

    #[validate]
    pub address: AddressInput,

    #[validate(length(min = 1, message = "Order must contain at least one item"))]
    pub items: Vec<PendingItemInput>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PendingOrderResponse {
    pub order_id: Uuid,
    pub order_number: String,
    pub status: OrderStatus,
    pub subtotal: Decimal,
    pub shipping_charge: Decimal,
    pub discount_amount: Decimal,
    pub final_total: Decimal,
    pub expires_at: Option<DateTime<Utc>>,
}

/// Fields written by the pending->confirmed conditional transition.
#[derive(Debug, Clone)]
pub struct ConfirmationUpdate {
    pub payment_id: String,
    pub gateway_order_id: String,
    pub discount_amount: Decimal,
    pub final_total: Decimal,
    pub customer_id: Option<Uuid>,
}

/// Result of an attempted settlement transition.
#[derive(Debug)]
pub enum ConfirmOutcome {
    /// This call won the transition.
    Applied,
    /// A concurrent path settled the order first; holds the re-read row.
    AlreadySettled(OrderModel),
}

/// Pending order store: creation, reads, and the expiry side of the
/// settlement state machine.
#[derive(Clone)]
pub struct OrderService {
    db: Arc<DatabaseConnection>,
    event_sender: Arc<EventSender>,
    shipping: Arc<ShippingRateService>,
    coupons: Arc<CouponService>,
    pending_ttl: chrono::Duration,
}

impl OrderService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        event_sender: Arc<EventSender>,
        shipping: Arc<ShippingRateService>,
        coupons: Arc<CouponService>,
        pending_ttl: chrono::Duration,
    ) -> Self {
        Self {
            db,
            event_sender,
            shipping,
            coupons,
            pending_ttl,
        }
    }

    /// Creates a pending order with estimated totals. Subtotal comes from
    /// caller-supplied price snapshots; shipping from the rate resolver;
    /// discount is a provisional estimate re-computed at settlement.
    #[instrument(skip(self, request), fields(customer_ref = %request.customer_ref))]
    pub async fn create_pending(
        &self,
        request: CreatePendingOrderRequest,
    ) -> Result<PendingOrderResponse, ServiceError> {
        request.validate()?;
        for item in &request.items {
            item.validate()?;
            if item.unit_price < Decimal::ZERO {
                return Err(ServiceError::ValidationError(
                    "Unit price cannot be negative".to_string(),
                ));
            }
        }

        if let Some(key) = request.idempotency_key.as_deref() {
            if let Some(existing) = self.find_by_idempotency_key(key).await? {
                info!(order_id = %existing.id, "returning existing order for idempotency key");
                return Ok(Self::pending_response(existing));
            }
        }

        let subtotal: Decimal = request
            .items
            .iter()
            .map(|i| i.unit_price * Decimal::from(i.quantity))
            .sum();

        let coupon = match request.coupon_code.as_deref() {
            Some(code) => Some(
                self.coupons
                    .find_by_code(code)
                    .await?
                    .ok_or_else(|| ServiceError::NotFound(format!("Coupon {} not found", code)))?,
            ),
            None => None,
        };

        let quote_items: Vec<QuoteItem> = request
            .items
            .iter()
            .map(|i| QuoteItem {
                quantity: i.quantity,
                unit_price: i.unit_price,
                weight_kg: i.weight_kg,
            })
            .collect();
        // The stored charge is the resolver's value; a shipping coupon
        // discounts through `evaluate` below, exactly once.
        let quote = self
            .shipping
            .resolve(&quote_items, &request.address.zip, None)
            .await;

        let discount = match coupon.as_ref() {
            Some(c) => {
                let prior = self.prior_order_count(&request.customer_ref, None).await?;
                coupons::evaluate(c, subtotal, quote.charge, prior)
                    .map_err(|r| ServiceError::ValidationError(r.to_string()))?
            }
            None => Decimal::ZERO,
        };

        let final_total = (subtotal + quote.charge - discount).max(Decimal::ZERO);

        let now = Utc::now();
        let order_id = Uuid::new_v4();
        let expires_at = now + self.pending_ttl;

        let txn = self.db.begin().await.map_err(|e| {
            error!(error = %e, "Failed to start transaction for pending order");
            ServiceError::DatabaseError(e)
        })?;

        let order_model = order::ActiveModel {
            id: Set(order_id),
            order_number: Set(format!("ORN-{}", &order_id.simple().to_string()[..8].to_uppercase())),
            customer_ref: Set(request.customer_ref.clone()),
            customer_id: Set(None),
            status: Set(OrderStatus::Pending),
            subtotal: Set(subtotal),
            shipping_charge: Set(quote.charge),
            discount_amount: Set(discount),
            final_total: Set(final_total),
            coupon_code: Set(request.coupon_code.map(|c| c.trim().to_lowercase())),
            ship_name: Set(request.address.name.clone()),
            ship_phone: Set(request.address.phone.clone()),
            ship_zip: Set(request.address.zip.clone()),
            ship_address: Set(request.address.address.clone()),
            gateway_order_id: Set(None),
            payment_id: Set(None),
            is_paid: Set(false),
            refund_id: Set(None),
            expires_at: Set(Some(expires_at)),
            idempotency_key: Set(request.idempotency_key.clone()),
            carrier_order_id: Set(None),
            carrier_status: Set(None),
            tracking_url: Set(None),
            created_at: Set(now),
            updated_at: Set(Some(now)),
            version: Set(1),
        };

        let inserted = match order_model.insert(&txn).await {
            Ok(model) => model,
            Err(e) => {
                // A concurrent request with the same idempotency key may
                // have won the unique-index race; surface its order.
                if let Some(key) = request.idempotency_key.as_deref() {
                    if let Some(existing) = self.find_by_idempotency_key(key).await? {
                        return Ok(Self::pending_response(existing));
                    }
                }
                error!(error = %e, order_id = %order_id, "Failed to insert pending order");
                return Err(ServiceError::DatabaseError(e));
            }
        };

        for item in &request.items {
            let item_model = order_item::ActiveModel {
                id: Set(Uuid::new_v4()),
                order_id: Set(order_id),
                product_id: Set(item.product_id),
                name: Set(item.name.clone()),
                quantity: Set(item.quantity),
                unit_price: Set(item.unit_price),
                weight_kg: Set(item.weight_kg),
                origin_store_id: Set(item.origin_store_id),
            };
            item_model.insert(&txn).await.map_err(|e| {
                error!(error = %e, order_id = %order_id, "Failed to insert order item");
                ServiceError::DatabaseError(e)
            })?;
        }

        txn.commit().await.map_err(ServiceError::DatabaseError)?;

        info!(order_id = %order_id, subtotal = %subtotal, "Pending order created");
        if let Err(e) = self.event_sender.send(Event::OrderCreated(order_id)).await {
            warn!(error = %e, order_id = %order_id, "Failed to send order created event");
        }

        Ok(Self::pending_response(inserted))
    }

    /// Retrieves an order with its items.
    #[instrument(skip(self))]
    pub async fn get_order(
        &self,
        order_id: Uuid,
    ) -> Result<Option<(OrderModel, Vec<order_item::Model>)>, ServiceError> {
        let order = OrderEntity::find_by_id(order_id)
            .one(&*self.db)
            .await
            .map_err(ServiceError::DatabaseError)?;

        match order {
            Some(order) => {
                let items = self.order_items(order_id).await?;
                Ok(Some((order, items)))
            }
            None => Ok(None),
        }
    }

    pub async fn order_items(
        &self,
        order_id: Uuid,
    ) -> Result<Vec<order_item::Model>, ServiceError> {
        OrderItemEntity::find()
            .filter(order_item::Column::OrderId.eq(order_id))
            .all(&*self.db)
            .await
            .map_err(ServiceError::DatabaseError)
    }

    /// Lists orders with pagination, newest first.
    #[instrument(skip(self))]
    pub async fn list_orders(
        &self,
        page: u64,
        per_page: u64,
    ) -> Result<(Vec<OrderModel>, u64), ServiceError> {
        let paginator = OrderEntity::find()
            .order_by_desc(order::Column::CreatedAt)
            .paginate(&*self.db, per_page.max(1));

        let total = paginator
            .num_items()
            .await
            .map_err(ServiceError::DatabaseError)?;
        let orders = paginator
            .fetch_page(page.saturating_sub(1))
            .await
            .map_err(ServiceError::DatabaseError)?;
        Ok((orders, total))
    }

    /// Marks a single pending order expired. A no-op when the order has
    /// already settled; returns the order's final status either way.
    #[instrument(skip(self))]
    pub async fn mark_expired(&self, order_id: Uuid) -> Result<OrderStatus, ServiceError> {
        let result = OrderEntity::update_many()
            .col_expr(order::Column::Status, Expr::value(OrderStatus::Expired))
            .col_expr(order::Column::UpdatedAt, Expr::value(Some(Utc::now())))
            .col_expr(
                order::Column::Version,
                Expr::col(order::Column::Version).add(1),
            )
            .filter(order::Column::Id.eq(order_id))
            .filter(order::Column::Status.eq(OrderStatus::Pending))
            .exec(&*self.db)
            .await
            .map_err(ServiceError::DatabaseError)?;

        if result.rows_affected > 0 {
            info!(order_id = %order_id, "Pending order expired");
            if let Err(e) = self.event_sender.send(Event::OrderExpired(order_id)).await {
                warn!(error = %e, order_id = %order_id, "Failed to send order expired event");
            }
            return Ok(OrderStatus::Expired);
        }

        // Lost the race to a concurrent settlement path; report what won.
        let current = OrderEntity::find_by_id(order_id)
            .one(&*self.db)
            .await
            .map_err(ServiceError::DatabaseError)?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;
        Ok(current.status)
    }

    /// Bulk-expires every pending order past its deadline. Backs the
    /// server-side cron endpoint; returns the number of orders reaped.
    #[instrument(skip(self))]
    pub async fn reap_expired(&self) -> Result<u64, ServiceError> {
        let result = OrderEntity::update_many()
            .col_expr(order::Column::Status, Expr::value(OrderStatus::Expired))
            .col_expr(order::Column::UpdatedAt, Expr::value(Some(Utc::now())))
            .col_expr(
                order::Column::Version,
                Expr::col(order::Column::Version).add(1),
            )
            .filter(order::Column::Status.eq(OrderStatus::Pending))
            .filter(order::Column::ExpiresAt.lt(Utc::now()))
            .exec(&*self.db)
            .await
            .map_err(ServiceError::DatabaseError)?;

        if result.rows_affected > 0 {
            info!(count = result.rows_affected, "Reaped expired pending orders");
        }
        Ok(result.rows_affected)
    }

    /// The settlement transition: update the order to confirmed only if it
    /// is still pending. This must stay a single conditional UPDATE; the
    /// races between callback replay, webhook ingestion, and the expiry
    /// timer are all resolved by whichever statement lands first.
    pub async fn apply_confirmation(
        db: &DatabaseConnection,
        order_id: Uuid,
        update: &ConfirmationUpdate,
    ) -> Result<ConfirmOutcome, ServiceError> {
        let result = OrderEntity::update_many()
            .col_expr(order::Column::Status, Expr::value(OrderStatus::Confirmed))
            .col_expr(order::Column::IsPaid, Expr::value(true))
            .col_expr(
                order::Column::PaymentId,
                Expr::value(Some(update.payment_id.clone())),
            )
            .col_expr(
                order::Column::GatewayOrderId,
                Expr::value(Some(update.gateway_order_id.clone())),
            )
            .col_expr(
                order::Column::DiscountAmount,
                Expr::value(update.discount_amount),
            )
            .col_expr(order::Column::FinalTotal, Expr::value(update.final_total))
            .col_expr(order::Column::CustomerId, Expr::value(update.customer_id))
            .col_expr(order::Column::UpdatedAt, Expr::value(Some(Utc::now())))
            .col_expr(
                order::Column::Version,
                Expr::col(order::Column::Version).add(1),
            )
            .filter(order::Column::Id.eq(order_id))
            .filter(order::Column::Status.eq(OrderStatus::Pending))
            .exec(db)
            .await
            .map_err(ServiceError::DatabaseError)?;

        if result.rows_affected > 0 {
            return Ok(ConfirmOutcome::Applied);
        }

        let current = OrderEntity::find_by_id(order_id)
            .one(db)
            .await
            .map_err(ServiceError::DatabaseError)?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;
        Ok(ConfirmOutcome::AlreadySettled(current))
    }

    /// Best-effort link from the order to the gateway-side transaction.
    pub async fn attach_gateway_order(
        &self,
        order_id: Uuid,
        gateway_order_id: &str,
    ) -> Result<(), ServiceError> {
        OrderEntity::update_many()
            .col_expr(
                order::Column::GatewayOrderId,
                Expr::value(Some(gateway_order_id.to_string())),
            )
            .col_expr(order::Column::UpdatedAt, Expr::value(Some(Utc::now())))
            .filter(order::Column::Id.eq(order_id))
            .exec(&*self.db)
            .await
            .map_err(ServiceError::DatabaseError)?;
        Ok(())
    }

    /// Number of prior settled orders for a buyer; feeds the
    /// new-user-only coupon rule.
    pub async fn prior_order_count(
        &self,
        customer_ref: &str,
        exclude_order: Option<Uuid>,
    ) -> Result<u64, ServiceError> {
        let mut query = OrderEntity::find()
            .filter(order::Column::CustomerRef.eq(customer_ref))
            .filter(order::Column::Status.is_in([
                OrderStatus::Confirmed,
                OrderStatus::Shipped,
                OrderStatus::Delivered,
            ]));
        if let Some(id) = exclude_order {
            query = query.filter(order::Column::Id.ne(id));
        }
        query
            .count(&*self.db)
            .await
            .map_err(ServiceError::DatabaseError)
    }

    async fn find_by_idempotency_key(
        &self,
        key: &str,
    ) -> Result<Option<OrderModel>, ServiceError> {
        OrderEntity::find()
            .filter(order::Column::IdempotencyKey.eq(key))
            .one(&*self.db)
            .await
            .map_err(ServiceError::DatabaseError)
    }

    fn pending_response(model: OrderModel) -> PendingOrderResponse {
        PendingOrderResponse {
            order_id: model.id,
            order_number: model.order_number,
            status: model.status,
            subtotal: model.subtotal,
            shipping_charge: model.shipping_charge,
            discount_amount: model.discount_amount,
            final_total: model.final_total,
            expires_at: model.expires_at,
        }
    }
}

/// Arms the client-side countdown for a pending order. Advisory only: the
/// settlement verifier independently enforces expiry, so a late or missed
/// timer can never leave a paid order wrongly active.
pub fn spawn_expiry_reaper(
    orders: Arc<OrderService>,
    order_id: Uuid,
    expires_at: DateTime<Utc>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let remaining = (expires_at - Utc::now())
            .to_std()
            .unwrap_or(std::time::Duration::ZERO);
        tokio::time::sleep(remaining).await;
        match orders.mark_expired(order_id).await {
            Ok(status) => info!(order_id = %order_id, status = %status, "expiry timer fired"),
            Err(e) => warn!(order_id = %order_id, "expiry timer failed: {}", e),
        }
    })
}
