use crate::{
    cache::CacheBackend,
    clients::carrier::{CarrierApi, RateQuoteRequest},
    config::CarrierConfig,
    entities::coupon::Model as CouponModel,
    errors::ServiceError,
};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{instrument, warn};
use utoipa::ToSchema;

const TOKEN_CACHE_KEY: &str = "carrier:auth_token";
const MIN_TOKEN_TTL_SECS: u64 = 60;

/// Fallback pricing constants. These must stay deterministic: the display
/// path renders whatever this returns, and checkout must never block on a
/// carrier outage.
const FALLBACK_BASE: Decimal = dec!(60);
const FALLBACK_PER_HALF_KG: Decimal = dec!(20);
const FALLBACK_WEIGHT_STEP_KG: Decimal = dec!(0.5);
const FALLBACK_ETA_DAYS: u32 = 5;
const FALLBACK_CARRIER_NAME: &str = "flat-rate";
const DEFAULT_ZONE_SURCHARGE: Decimal = dec!(50);

/// Item facts needed to price a shipment.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct QuoteItem {
    pub quantity: i32,
    pub unit_price: Decimal,
    pub weight_kg: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ShippingQuote {
    pub charge: Decimal,
    pub eta_days: u32,
    pub carrier_name: String,
}

/// Resolves a shipping charge for a destination and item set, preferring
/// the live carrier rate and falling back to deterministic zone pricing.
#[derive(Clone)]
pub struct ShippingRateService {
    carrier: Arc<dyn CarrierApi>,
    cache: Arc<dyn CacheBackend>,
    config: CarrierConfig,
}

impl ShippingRateService {
    pub fn new(
        carrier: Arc<dyn CarrierApi>,
        cache: Arc<dyn CacheBackend>,
        config: CarrierConfig,
    ) -> Self {
        Self {
            carrier,
            cache,
            config,
        }
    }

    /// Returns a bearer token for the aggregator, from cache when fresh.
    /// The cache TTL ends one refresh margin before the real expiry so a
    /// token is never used close to invalidation.
    pub async fn bearer_token(&self) -> Result<String, ServiceError> {
        if let Ok(Some(token)) = self.cache.get(TOKEN_CACHE_KEY).await {
            return Ok(token);
        }

        let auth = self.carrier.authenticate().await?;
        let ttl_secs = auth
            .expires_in_secs
            .saturating_sub(self.config.token_refresh_margin_secs)
            .max(MIN_TOKEN_TTL_SECS);
        if let Err(e) = self
            .cache
            .set(TOKEN_CACHE_KEY, &auth.token, Some(Duration::from_secs(ttl_secs)))
            .await
        {
            warn!("failed caching carrier token: {}", e);
        }
        Ok(auth.token)
    }

    /// Resolves a charge. Never errors for a carrier outage; any failure
    /// on the live path degrades to `fallback_quote`.
    #[instrument(skip(self, items, coupon), fields(destination_zip = %destination_zip))]
    pub async fn resolve(
        &self,
        items: &[QuoteItem],
        destination_zip: &str,
        coupon: Option<&CouponModel>,
    ) -> ShippingQuote {
        let total_weight = total_weight(items);
        let declared_value = declared_value(items);

        let mut quote = match self.live_quote(total_weight, declared_value, destination_zip).await {
            Ok(q) => q,
            Err(e) => {
                warn!("carrier rate lookup failed, using fallback pricing: {}", e);
                fallback_quote(total_weight, destination_zip)
            }
        };

        if let Some(coupon) = coupon {
            if coupon.applies_to_shipping {
                let discount = quote.charge * coupon.discount_percent / Decimal::from(100);
                quote.charge = (quote.charge - discount).max(Decimal::ZERO);
            }
        }

        quote
    }

    async fn live_quote(
        &self,
        total_weight: Decimal,
        declared_value: Decimal,
        destination_zip: &str,
    ) -> Result<ShippingQuote, ServiceError> {
        let token = self.bearer_token().await?;
        let carrier_quote = self
            .carrier
            .rate_quote(
                &token,
                &RateQuoteRequest {
                    pickup_zip: self.config.pickup_location.clone(),
                    delivery_zip: destination_zip.to_string(),
                    weight_kg: total_weight,
                    declared_value,
                },
            )
            .await;

        // A rejected token may simply be stale; drop it so the next call
        // re-authenticates.
        if carrier_quote.is_err() {
            let _ = self.cache.delete(TOKEN_CACHE_KEY).await;
        }

        let q = carrier_quote?;
        Ok(ShippingQuote {
            charge: q.charge,
            eta_days: q.eta_days,
            carrier_name: q.courier_name,
        })
    }
}

pub fn total_weight(items: &[QuoteItem]) -> Decimal {
    items
        .iter()
        .map(|i| i.weight_kg * Decimal::from(i.quantity.max(0)))
        .sum()
}

pub fn declared_value(items: &[QuoteItem]) -> Decimal {
    items
        .iter()
        .map(|i| i.unit_price * Decimal::from(i.quantity.max(0)))
        .sum()
}

/// Deterministic zone pricing:
/// `base + ceil(weight / 0.5kg) * step + zone_surcharge(first zip digit)`.
pub fn fallback_quote(total_weight: Decimal, destination_zip: &str) -> ShippingQuote {
    let steps = (total_weight / FALLBACK_WEIGHT_STEP_KG).ceil();
    let charge = FALLBACK_BASE + steps * FALLBACK_PER_HALF_KG + zone_surcharge(destination_zip);
    ShippingQuote {
        charge,
        eta_days: FALLBACK_ETA_DAYS,
        carrier_name: FALLBACK_CARRIER_NAME.to_string(),
    }
}

fn zone_surcharge(destination_zip: &str) -> Decimal {
    match destination_zip.chars().next() {
        Some('1') => dec!(20),
        Some('2') => dec!(30),
        Some('3') => dec!(30),
        Some('4') => dec!(40),
        Some('5') => dec!(40),
        Some('6') => dec!(50),
        Some('7') => dec!(50),
        Some('8') => dec!(60),
        Some('9') => dec!(60),
        // Unknown or malformed zips get the fixed default.
        _ => DEFAULT_ZONE_SURCHARGE,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::carrier::{CarrierQuote, CarrierToken, ShipmentOrder, ShipmentOrderRequest};
    use crate::cache::InMemoryCache;
    use async_trait::async_trait;
    use chrono::Utc;
    use std::sync::atomic::{AtomicU32, Ordering};
    use uuid::Uuid;

    struct FailingCarrier;

    #[async_trait]
    impl CarrierApi for FailingCarrier {
        async fn authenticate(&self) -> Result<CarrierToken, ServiceError> {
            Err(ServiceError::CarrierUnavailable("login".to_string()))
        }
        async fn rate_quote(
            &self,
            _token: &str,
            _request: &RateQuoteRequest,
        ) -> Result<CarrierQuote, ServiceError> {
            Err(ServiceError::CarrierUnavailable("rate quote".to_string()))
        }
        async fn create_order(
            &self,
            _token: &str,
            _request: &ShipmentOrderRequest,
        ) -> Result<ShipmentOrder, ServiceError> {
            Err(ServiceError::CarrierUnavailable("order create".to_string()))
        }
    }

    struct CountingCarrier {
        logins: AtomicU32,
    }

    #[async_trait]
    impl CarrierApi for CountingCarrier {
        async fn authenticate(&self) -> Result<CarrierToken, ServiceError> {
            self.logins.fetch_add(1, Ordering::SeqCst);
            Ok(CarrierToken {
                token: "tok".to_string(),
                expires_in_secs: 864_000,
            })
        }
        async fn rate_quote(
            &self,
            _token: &str,
            _request: &RateQuoteRequest,
        ) -> Result<CarrierQuote, ServiceError> {
            Ok(CarrierQuote {
                charge: dec!(85),
                eta_days: 3,
                courier_name: "BlueDart Air".to_string(),
            })
        }
        async fn create_order(
            &self,
            _token: &str,
            _request: &ShipmentOrderRequest,
        ) -> Result<ShipmentOrder, ServiceError> {
            unimplemented!("not used in rate tests")
        }
    }

    fn carrier_config() -> CarrierConfig {
        crate::config::AppConfig::new("sqlite::memory:".to_string(), "test".to_string()).carrier
    }

    fn one_kilo_item() -> Vec<QuoteItem> {
        vec![QuoteItem {
            quantity: 1,
            unit_price: dec!(1000),
            weight_kg: dec!(1.0),
        }]
    }

    #[tokio::test]
    async fn fallback_is_deterministic_for_zone_two() {
        let svc = ShippingRateService::new(
            Arc::new(FailingCarrier),
            Arc::new(InMemoryCache::new()),
            carrier_config(),
        );
        let quote = svc.resolve(&one_kilo_item(), "226010", None).await;
        // 60 + ceil(1.0/0.5)*20 + 30
        assert_eq!(quote.charge, dec!(130));
        assert_eq!(quote.carrier_name, FALLBACK_CARRIER_NAME);
    }

    #[tokio::test]
    async fn fallback_applies_shipping_coupon() {
        let coupon = CouponModel {
            id: Uuid::new_v4(),
            code: "freeship50".to_string(),
            discount_percent: dec!(50),
            minimum_order_amount: Decimal::ZERO,
            for_new_user_only: false,
            applies_to_shipping: true,
            expires_at: None,
            used_count: 0,
            created_at: Utc::now(),
            updated_at: None,
        };
        let svc = ShippingRateService::new(
            Arc::new(FailingCarrier),
            Arc::new(InMemoryCache::new()),
            carrier_config(),
        );
        let quote = svc.resolve(&one_kilo_item(), "226010", Some(&coupon)).await;
        assert_eq!(quote.charge, dec!(65));
    }

    #[tokio::test]
    async fn token_is_cached_between_quotes() {
        let carrier = Arc::new(CountingCarrier {
            logins: AtomicU32::new(0),
        });
        let svc = ShippingRateService::new(
            carrier.clone(),
            Arc::new(InMemoryCache::new()),
            carrier_config(),
        );
        let a = svc.resolve(&one_kilo_item(), "110001", None).await;
        let b = svc.resolve(&one_kilo_item(), "110001", None).await;
        assert_eq!(a.charge, dec!(85));
        assert_eq!(b.carrier_name, "BlueDart Air");
        assert_eq!(carrier.logins.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn unknown_zip_gets_default_surcharge() {
        let quote = fallback_quote(dec!(0.4), "");
        assert_eq!(quote.charge, dec!(60) + dec!(20) + DEFAULT_ZONE_SURCHARGE);
    }

    #[test]
    fn weight_rounds_up_to_half_kilo_steps() {
        assert_eq!(fallback_quote(dec!(0.6), "110001").charge, dec!(60) + dec!(40) + dec!(20));
        assert_eq!(fallback_quote(dec!(0.5), "110001").charge, dec!(60) + dec!(20) + dec!(20));
    }
}
