//! Payment gateway client: order create and refund, plus the HMAC helpers
//! used to verify settlement callbacks.

use crate::config::GatewayConfig;
use crate::errors::ServiceError;
use async_trait::async_trait;
use hmac::{Hmac, Mac};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use tracing::{error, instrument};

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayOrder {
    pub id: String,
    pub amount_minor: i64,
    pub currency: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayRefund {
    pub id: String,
    pub payment_id: String,
}

/// Gateway operations needed by the settlement pipeline. Kept narrow on
/// purpose; this is not a general payment-gateway abstraction.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Opens a gateway-side transaction for the given minor-unit amount.
    async fn create_order(
        &self,
        amount_minor: i64,
        currency: &str,
        receipt: &str,
    ) -> Result<GatewayOrder, ServiceError>;

    /// Refunds a captured payment in full.
    async fn refund(&self, payment_id: &str, amount_minor: i64)
        -> Result<GatewayRefund, ServiceError>;
}

/// Converts a decimal amount to the gateway's minor-unit convention (x100).
pub fn to_minor_units(amount: Decimal) -> Result<i64, ServiceError> {
    let minor = (amount * Decimal::from(100)).trunc();
    minor
        .to_i64()
        .filter(|v| *v >= 0)
        .ok_or_else(|| ServiceError::ValidationError(format!("invalid payment amount: {amount}")))
}

/// Expected callback signature: hex HMAC-SHA256 over
/// `gateway_order_id|gateway_payment_id`.
pub fn compute_callback_signature(secret: &str, gateway_order_id: &str, payment_id: &str) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .expect("HMAC accepts keys of any length");
    mac.update(format!("{gateway_order_id}|{payment_id}").as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

/// Constant-time callback signature check.
pub fn verify_callback_signature(
    secret: &str,
    gateway_order_id: &str,
    payment_id: &str,
    supplied: &str,
) -> bool {
    let expected = compute_callback_signature(secret, gateway_order_id, payment_id);
    constant_time_eq(&expected, supplied)
}

fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut res = 0u8;
    for (x, y) in a.as_bytes().iter().zip(b.as_bytes()) {
        res |= x ^ y;
    }
    res == 0
}

/// HTTP implementation against the real gateway.
#[derive(Clone)]
pub struct HttpPaymentGateway {
    http: reqwest::Client,
    config: GatewayConfig,
}

#[derive(Debug, Serialize)]
struct CreateOrderBody<'a> {
    amount: i64,
    currency: &'a str,
    receipt: &'a str,
}

#[derive(Debug, Deserialize)]
struct GatewayOrderBody {
    id: String,
    amount: i64,
    currency: String,
}

#[derive(Debug, Deserialize)]
struct GatewayRefundBody {
    id: String,
}

impl HttpPaymentGateway {
    pub fn new(config: GatewayConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            config,
        }
    }
}

#[async_trait]
impl PaymentGateway for HttpPaymentGateway {
    #[instrument(skip(self), fields(amount_minor = amount_minor))]
    async fn create_order(
        &self,
        amount_minor: i64,
        currency: &str,
        receipt: &str,
    ) -> Result<GatewayOrder, ServiceError> {
        if amount_minor <= 0 {
            return Err(ServiceError::ValidationError(
                "payment amount must be positive".to_string(),
            ));
        }

        let url = format!("{}/orders", self.config.base_url);
        let resp = self
            .http
            .post(&url)
            .basic_auth(&self.config.key_id, Some(&self.config.key_secret))
            .json(&CreateOrderBody {
                amount: amount_minor,
                currency,
                receipt,
            })
            .send()
            .await
            .map_err(|e| {
                error!("gateway order create failed: {}", e);
                ServiceError::PaymentFailed("could not create payment".to_string())
            })?;

        if !resp.status().is_success() {
            error!(status = %resp.status(), "gateway rejected order create");
            return Err(ServiceError::PaymentFailed(
                "could not create payment".to_string(),
            ));
        }

        let body: GatewayOrderBody = resp
            .json()
            .await
            .map_err(|e| ServiceError::PaymentFailed(format!("malformed gateway response: {e}")))?;

        Ok(GatewayOrder {
            id: body.id,
            amount_minor: body.amount,
            currency: body.currency,
        })
    }

    #[instrument(skip(self))]
    async fn refund(
        &self,
        payment_id: &str,
        amount_minor: i64,
    ) -> Result<GatewayRefund, ServiceError> {
        let url = format!("{}/payments/{}/refund", self.config.base_url, payment_id);
        let resp = self
            .http
            .post(&url)
            .basic_auth(&self.config.key_id, Some(&self.config.key_secret))
            .json(&serde_json::json!({ "amount": amount_minor }))
            .send()
            .await
            .map_err(|e| {
                error!("gateway refund failed: {}", e);
                ServiceError::PaymentFailed("could not issue refund".to_string())
            })?;

        if !resp.status().is_success() {
            error!(status = %resp.status(), "gateway rejected refund");
            return Err(ServiceError::PaymentFailed(
                "could not issue refund".to_string(),
            ));
        }

        let body: GatewayRefundBody = resp
            .json()
            .await
            .map_err(|e| ServiceError::PaymentFailed(format!("malformed gateway response: {e}")))?;

        Ok(GatewayRefund {
            id: body.id,
            payment_id: payment_id.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn minor_units_conversion_is_deterministic() {
        assert_eq!(to_minor_units(dec!(1499.99)).unwrap(), 149999);
        assert_eq!(to_minor_units(dec!(0)).unwrap(), 0);
        assert_eq!(to_minor_units(dec!(10)).unwrap(), 1000);
        assert!(to_minor_units(dec!(-1)).is_err());
    }

    #[test]
    fn callback_signature_round_trip() {
        let secret = "test_callback_secret_32_characters";
        let sig = compute_callback_signature(secret, "order_abc", "pay_xyz");
        assert!(verify_callback_signature(secret, "order_abc", "pay_xyz", &sig));
    }

    #[test]
    fn single_byte_mutation_rejects() {
        let secret = "test_callback_secret_32_characters";
        let sig = compute_callback_signature(secret, "order_abc", "pay_xyz");
        for i in 0..sig.len() {
            let mut bytes = sig.clone().into_bytes();
            bytes[i] = if bytes[i] == b'0' { b'1' } else { b'0' };
            let mutated = String::from_utf8(bytes).unwrap();
            assert!(
                !verify_callback_signature(secret, "order_abc", "pay_xyz", &mutated),
                "mutation at byte {i} should invalidate the signature"
            );
        }
    }

    #[test]
    fn signature_length_mismatch_rejects() {
        let secret = "test_callback_secret_32_characters";
        assert!(!verify_callback_signature(secret, "order_abc", "pay_xyz", "short"));
    }
}
