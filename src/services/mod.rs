//! Service layer. Each service owns one slice of the settlement pipeline
//! and is constructed once at startup with `Arc`'d dependencies.

pub mod catalog;
pub mod coupons;
pub mod customers;
pub mod fulfillment;
pub mod notifications;
pub mod orders;
pub mod payments;
pub mod shipping;
