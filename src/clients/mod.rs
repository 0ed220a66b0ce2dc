pub mod carrier;
pub mod payment_gateway;
