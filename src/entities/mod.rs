pub mod coupon;
pub mod customer;
pub mod order;
pub mod order_item;
pub mod reconciliation_task;

pub use coupon::Entity as Coupon;
pub use customer::Entity as Customer;
pub use order::Entity as Order;
pub use order_item::Entity as OrderItem;
pub use reconciliation_task::Entity as ReconciliationTask;
