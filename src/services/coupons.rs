use crate::{
    entities::coupon::{self, Entity as CouponEntity, Model as CouponModel},
    errors::ServiceError,
};
use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, Set,
};
use std::sync::Arc;
use tracing::{debug, instrument, warn};

/// Why a coupon was not applied. Checked in order; evaluation
/// short-circuits on the first failing rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CouponRejection {
    Expired,
    NewUserOnly,
    BelowMinimum { required: Decimal },
}

impl std::fmt::Display for CouponRejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CouponRejection::Expired => write!(f, "coupon expired"),
            CouponRejection::NewUserOnly => write!(f, "coupon is valid for first orders only"),
            CouponRejection::BelowMinimum { required } => {
                write!(f, "order subtotal is below the coupon minimum of {}", required)
            }
        }
    }
}

/// Pure discount evaluation: coupon + order context -> discount amount or
/// rejection reason. No I/O, no clock injection beyond `Utc::now`.
pub fn evaluate(
    coupon: &CouponModel,
    subtotal: Decimal,
    shipping: Decimal,
    prior_order_count: u64,
) -> Result<Decimal, CouponRejection> {
    if let Some(expires_at) = coupon.expires_at {
        if expires_at < Utc::now() {
            return Err(CouponRejection::Expired);
        }
    }

    if coupon.for_new_user_only && prior_order_count > 0 {
        return Err(CouponRejection::NewUserOnly);
    }

    if subtotal < coupon.minimum_order_amount {
        return Err(CouponRejection::BelowMinimum {
            required: coupon.minimum_order_amount,
        });
    }

    let base = if coupon.applies_to_shipping {
        subtotal + shipping
    } else {
        subtotal
    };

    let discount = coupon.discount_percent / Decimal::from(100) * base;
    Ok(discount.max(Decimal::ZERO))
}

/// Lookup and bookkeeping around coupon rows.
#[derive(Clone)]
pub struct CouponService {
    db: Arc<DatabaseConnection>,
}

impl CouponService {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Finds a coupon by code, case-insensitively. Codes are stored
    /// lowercase at creation time.
    #[instrument(skip(self))]
    pub async fn find_by_code(&self, code: &str) -> Result<Option<CouponModel>, ServiceError> {
        let normalized = code.trim().to_lowercase();
        let coupon = CouponEntity::find()
            .filter(coupon::Column::Code.eq(normalized))
            .one(&*self.db)
            .await
            .map_err(ServiceError::DatabaseError)?;
        Ok(coupon)
    }

    /// Increments `used_count` after a successful settlement. Monotonic;
    /// never undone even if later side effects fail.
    #[instrument(skip(self))]
    pub async fn increment_used_count(&self, code: &str) -> Result<(), ServiceError> {
        let Some(coupon) = self.find_by_code(code).await? else {
            warn!(code = %code, "coupon vanished before usage increment");
            return Ok(());
        };

        let current = coupon.used_count;
        let mut active: coupon::ActiveModel = coupon.into();
        active.used_count = Set(current + 1);
        active.updated_at = Set(Some(Utc::now()));
        active.update(&*self.db).await?;
        debug!(code = %code, used_count = current + 1, "coupon usage incremented");
        Ok(())
    }
}
