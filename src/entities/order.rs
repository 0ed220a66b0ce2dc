use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

/// Order lifecycle status. `Pending -> Confirmed` and `Pending -> Expired`
/// are mutually exclusive transitions enforced by a conditional update;
/// everything after confirmation is additive progression.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    EnumIter,
    DeriveActiveEnum,
    Serialize,
    Deserialize,
    ToSchema,
    strum::Display,
    strum::EnumString,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(32))")]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum OrderStatus {
    #[sea_orm(string_value = "pending")]
    Pending,
    #[sea_orm(string_value = "confirmed")]
    Confirmed,
    #[sea_orm(string_value = "expired")]
    Expired,
    #[sea_orm(string_value = "shipped")]
    Shipped,
    #[sea_orm(string_value = "delivered")]
    Delivered,
    #[sea_orm(string_value = "cancelled")]
    Cancelled,
    #[sea_orm(string_value = "failed")]
    Failed,
}

impl OrderStatus {
    /// True once the order has left `pending` for good.
    pub fn is_settled(&self) -> bool {
        !matches!(self, OrderStatus::Pending)
    }
}

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize, ToSchema)]
#[schema(as = Order)]
#[sea_orm(table_name = "orders")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    pub order_number: String,

    /// Stable buyer identifier; synthesized for guests.
    pub customer_ref: String,
    /// Local customer record, linked by the settlement verifier.
    pub customer_id: Option<Uuid>,

    pub status: OrderStatus,

    /// Money snapshot; `final_total = subtotal + shipping - discount`.
    pub subtotal: Decimal,
    pub shipping_charge: Decimal,
    pub discount_amount: Decimal,
    pub final_total: Decimal,

    pub coupon_code: Option<String>,

    /// Shipping/contact snapshot, required non-empty before confirmation.
    pub ship_name: String,
    pub ship_phone: String,
    pub ship_zip: String,
    pub ship_address: Option<String>,

    /// Populated only by the settlement verifier.
    pub gateway_order_id: Option<String>,
    pub payment_id: Option<String>,
    pub is_paid: bool,
    /// Gateway refund issued for a payment that arrived after expiry; set
    /// at most once, replayed callbacks resolve from it.
    pub refund_id: Option<String>,

    /// Meaningful only while `status = pending`.
    pub expires_at: Option<DateTime<Utc>>,

    /// Client-supplied checkout dedup token.
    #[sea_orm(unique)]
    pub idempotency_key: Option<String>,

    /// Populated only by the fulfillment synchronizer; never required for
    /// order correctness.
    pub carrier_order_id: Option<String>,
    pub carrier_status: Option<String>,
    pub tracking_url: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
    pub version: i32,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::order_item::Entity")]
    OrderItem,
}

impl Related<super::order_item::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::OrderItem.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn status_round_trips_through_strings() {
        assert_eq!(OrderStatus::Pending.to_string(), "pending");
        assert_eq!(
            OrderStatus::from_str("in_transit").ok(),
            None,
            "carrier vocabulary is not an order status"
        );
        assert_eq!(
            OrderStatus::from_str("confirmed").unwrap(),
            OrderStatus::Confirmed
        );
    }

    #[test]
    fn settled_statuses() {
        assert!(!OrderStatus::Pending.is_settled());
        assert!(OrderStatus::Confirmed.is_settled());
        assert!(OrderStatus::Expired.is_settled());
    }
}
