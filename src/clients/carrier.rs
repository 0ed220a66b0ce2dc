//! Carrier aggregator client: auth login, rate serviceability, and
//! shipment order creation. Every call carries a bounded timeout so a slow
//! aggregator degrades to the fallback pricing path instead of stalling
//! checkout.

use crate::config::CarrierConfig;
use crate::errors::ServiceError;
use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{error, instrument};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CarrierToken {
    pub token: String,
    /// Seconds until the aggregator invalidates this token.
    pub expires_in_secs: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct RateQuoteRequest {
    pub pickup_zip: String,
    pub delivery_zip: String,
    pub weight_kg: Decimal,
    pub declared_value: Decimal,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CarrierQuote {
    pub charge: Decimal,
    pub eta_days: u32,
    pub courier_name: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ShipmentOrderRequest {
    pub reference: String,
    pub pickup_location: String,
    pub delivery_zip: String,
    pub recipient_name: String,
    pub recipient_phone: String,
    pub weight_kg: Decimal,
    pub declared_value: Decimal,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ShipmentOrder {
    pub order_id: String,
    pub shipment_id: String,
    pub status: String,
}

#[async_trait]
pub trait CarrierApi: Send + Sync {
    async fn authenticate(&self) -> Result<CarrierToken, ServiceError>;
    async fn rate_quote(
        &self,
        token: &str,
        request: &RateQuoteRequest,
    ) -> Result<CarrierQuote, ServiceError>;
    async fn create_order(
        &self,
        token: &str,
        request: &ShipmentOrderRequest,
    ) -> Result<ShipmentOrder, ServiceError>;
}

#[derive(Clone)]
pub struct HttpCarrierClient {
    http: reqwest::Client,
    config: CarrierConfig,
}

#[derive(Debug, Deserialize)]
struct LoginBody {
    token: String,
    #[serde(default = "default_token_lifetime")]
    expires_in: u64,
}

fn default_token_lifetime() -> u64 {
    // Aggregator tokens are valid for ten days unless told otherwise.
    10 * 24 * 3600
}

#[derive(Debug, Deserialize)]
struct QuoteBody {
    rate: Decimal,
    estimated_delivery_days: u32,
    courier_name: String,
}

impl HttpCarrierClient {
    pub fn new(config: CarrierConfig) -> Result<Self, ServiceError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| ServiceError::InternalError(format!("http client build failed: {e}")))?;
        Ok(Self { http, config })
    }

    fn unavailable(context: &str, err: impl std::fmt::Display) -> ServiceError {
        error!("carrier {context} failed: {err}");
        ServiceError::CarrierUnavailable(context.to_string())
    }
}

#[async_trait]
impl CarrierApi for HttpCarrierClient {
    #[instrument(skip(self))]
    async fn authenticate(&self) -> Result<CarrierToken, ServiceError> {
        let url = format!("{}/auth/login", self.config.base_url);
        let resp = self
            .http
            .post(&url)
            .json(&serde_json::json!({
                "email": self.config.email,
                "password": self.config.password,
            }))
            .send()
            .await
            .map_err(|e| Self::unavailable("login", e))?;

        if !resp.status().is_success() {
            return Err(Self::unavailable("login", resp.status()));
        }

        let body: LoginBody = resp
            .json()
            .await
            .map_err(|e| Self::unavailable("login", e))?;

        Ok(CarrierToken {
            token: body.token,
            expires_in_secs: body.expires_in,
        })
    }

    #[instrument(skip(self, token))]
    async fn rate_quote(
        &self,
        token: &str,
        request: &RateQuoteRequest,
    ) -> Result<CarrierQuote, ServiceError> {
        let url = format!("{}/courier/serviceability", self.config.base_url);
        let resp = self
            .http
            .get(&url)
            .bearer_auth(token)
            .query(&[
                ("pickup_postcode", request.pickup_zip.as_str()),
                ("delivery_postcode", request.delivery_zip.as_str()),
                ("weight", &request.weight_kg.to_string()),
                ("declared_value", &request.declared_value.to_string()),
            ])
            .send()
            .await
            .map_err(|e| Self::unavailable("rate quote", e))?;

        if !resp.status().is_success() {
            return Err(Self::unavailable("rate quote", resp.status()));
        }

        let body: QuoteBody = resp
            .json()
            .await
            .map_err(|e| Self::unavailable("rate quote", e))?;

        Ok(CarrierQuote {
            charge: body.rate,
            eta_days: body.estimated_delivery_days,
            courier_name: body.courier_name,
        })
    }

    #[instrument(skip(self, token), fields(reference = %request.reference))]
    async fn create_order(
        &self,
        token: &str,
        request: &ShipmentOrderRequest,
    ) -> Result<ShipmentOrder, ServiceError> {
        let url = format!("{}/orders/create/adhoc", self.config.base_url);
        let resp = self
            .http
            .post(&url)
            .bearer_auth(token)
            .json(request)
            .send()
            .await
            .map_err(|e| Self::unavailable("order create", e))?;

        if !resp.status().is_success() {
            return Err(Self::unavailable("order create", resp.status()));
        }

        resp.json()
            .await
            .map_err(|e| Self::unavailable("order create", e))
    }
}
