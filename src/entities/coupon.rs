use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Coupon definition. Created and edited through administrative screens
/// outside this core; `used_count` is the only field settlement mutates.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "coupons")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    /// Stored lowercase; lookups are case-insensitive.
    #[sea_orm(unique)]
    pub code: String,

    /// Percent in (0, 100].
    pub discount_percent: Decimal,
    pub minimum_order_amount: Decimal,
    pub for_new_user_only: bool,
    pub applies_to_shipping: bool,

    /// None means the coupon never expires.
    pub expires_at: Option<DateTime<Utc>>,

    /// Monotonic; incremented once per successful settlement, never undone.
    pub used_count: i32,

    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
