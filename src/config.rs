use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::path::Path;
use tracing::info;
use validator::Validate;

const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_ENV: &str = "development";
const DEFAULT_PORT: u16 = 8080;
const CONFIG_DIR: &str = "config";
const DEFAULT_CURRENCY: &str = "INR";
const DEFAULT_PENDING_TTL_MINUTES: i64 = 10;
const DEFAULT_CARRIER_TIMEOUT_SECS: u64 = 3;
// Refresh the carrier token well before it actually lapses.
const DEFAULT_TOKEN_REFRESH_MARGIN_SECS: u64 = 3600;

/// Payment gateway configuration (order create / refund APIs).
#[derive(Clone, Debug, Deserialize, Validate)]
pub struct GatewayConfig {
    #[serde(default = "default_gateway_base_url")]
    pub base_url: String,

    /// API key pair used for basic auth against the gateway.
    pub key_id: String,
    pub key_secret: String,

    /// Secret used to verify HMAC-signed settlement callbacks.
    #[validate(length(min = 16))]
    pub callback_secret: String,

    #[serde(default = "default_currency")]
    pub currency: String,
}

/// Carrier aggregator configuration (auth login, rates, order create).
#[derive(Clone, Debug, Deserialize)]
pub struct CarrierConfig {
    #[serde(default = "default_carrier_base_url")]
    pub base_url: String,

    pub email: String,
    pub password: String,

    /// Pickup location registered with the aggregator.
    #[serde(default = "default_pickup_location")]
    pub pickup_location: String,

    /// Hard ceiling on carrier API latency so checkout is never dominated
    /// by a slow external dependency.
    #[serde(default = "default_carrier_timeout_secs")]
    pub timeout_secs: u64,

    /// Seconds before real token expiry at which we refresh.
    #[serde(default = "default_token_refresh_margin_secs")]
    pub token_refresh_margin_secs: u64,
}

/// Application configuration with validation.
#[derive(Clone, Debug, Deserialize, Validate)]
pub struct AppConfig {
    /// Database connection URL
    pub database_url: String,

    /// Server host address
    #[serde(default = "default_host")]
    pub host: String,

    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Application environment
    #[serde(default = "default_environment")]
    pub environment: String,

    /// Logging level
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Log in JSON format (structured logging)
    #[serde(default)]
    pub log_json: bool,

    /// Whether to run database migrations on startup
    #[serde(default)]
    pub auto_migrate: bool,

    /// DB pool: max connections
    #[serde(default = "default_db_max_connections")]
    pub db_max_connections: u32,

    /// DB pool: min connections
    #[serde(default = "default_db_min_connections")]
    pub db_min_connections: u32,

    /// DB timeouts (seconds)
    #[serde(default = "default_db_connect_timeout_secs")]
    pub db_connect_timeout_secs: u64,
    #[serde(default = "default_db_acquire_timeout_secs")]
    pub db_acquire_timeout_secs: u64,

    /// Minutes a pending order stays payable before it expires.
    #[serde(default = "default_pending_ttl_minutes")]
    pub pending_order_ttl_minutes: i64,

    #[validate]
    pub gateway: GatewayConfig,

    pub carrier: CarrierConfig,

    /// CORS: comma-separated list of allowed origins
    #[serde(default)]
    pub cors_allowed_origins: Option<String>,
}

impl AppConfig {
    /// Minimal constructor used by tests and tooling.
    pub fn new(database_url: String, environment: String) -> Self {
        Self {
            database_url,
            host: default_host(),
            port: DEFAULT_PORT,
            environment,
            log_level: DEFAULT_LOG_LEVEL.to_string(),
            log_json: false,
            auto_migrate: false,
            db_max_connections: default_db_max_connections(),
            db_min_connections: default_db_min_connections(),
            db_connect_timeout_secs: default_db_connect_timeout_secs(),
            db_acquire_timeout_secs: default_db_acquire_timeout_secs(),
            pending_order_ttl_minutes: DEFAULT_PENDING_TTL_MINUTES,
            gateway: GatewayConfig {
                base_url: default_gateway_base_url(),
                key_id: "test_key".to_string(),
                key_secret: "test_secret".to_string(),
                callback_secret: "test_callback_secret_32_characters".to_string(),
                currency: default_currency(),
            },
            carrier: CarrierConfig {
                base_url: default_carrier_base_url(),
                email: "ops@example.com".to_string(),
                password: "password".to_string(),
                pickup_location: default_pickup_location(),
                timeout_secs: default_carrier_timeout_secs(),
                token_refresh_margin_secs: default_token_refresh_margin_secs(),
            },
            cors_allowed_origins: None,
        }
    }

    pub fn is_development(&self) -> bool {
        self.environment.eq_ignore_ascii_case("development") || self.environment == "dev"
    }

    pub fn log_level(&self) -> &str {
        &self.log_level
    }

    pub fn pending_ttl(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.pending_order_ttl_minutes)
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_environment() -> String {
    DEFAULT_ENV.to_string()
}
fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}
fn default_db_max_connections() -> u32 {
    10
}
fn default_db_min_connections() -> u32 {
    1
}
fn default_db_connect_timeout_secs() -> u64 {
    30
}
fn default_db_acquire_timeout_secs() -> u64 {
    8
}
fn default_pending_ttl_minutes() -> i64 {
    DEFAULT_PENDING_TTL_MINUTES
}
fn default_gateway_base_url() -> String {
    "https://api.razorpay.com/v1".to_string()
}
fn default_carrier_base_url() -> String {
    "https://apiv2.shiprocket.in/v1/external".to_string()
}
fn default_pickup_location() -> String {
    "Primary".to_string()
}
fn default_currency() -> String {
    DEFAULT_CURRENCY.to_string()
}
fn default_carrier_timeout_secs() -> u64 {
    DEFAULT_CARRIER_TIMEOUT_SECS
}
fn default_token_refresh_margin_secs() -> u64 {
    DEFAULT_TOKEN_REFRESH_MARGIN_SECS
}

/// Loads configuration from layered sources: `config/default.toml`, an
/// environment-specific file, then `APP__*` environment overrides.
pub fn load_config() -> Result<AppConfig, ConfigError> {
    let environment = std::env::var("APP_ENVIRONMENT").unwrap_or_else(|_| DEFAULT_ENV.to_string());

    let mut builder = Config::builder();

    let default_path = Path::new(CONFIG_DIR).join("default.toml");
    if default_path.exists() {
        builder = builder.add_source(File::from(default_path));
    }
    let env_path = Path::new(CONFIG_DIR).join(format!("{environment}.toml"));
    if env_path.exists() {
        builder = builder.add_source(File::from(env_path));
    }

    let settings = builder
        .add_source(Environment::with_prefix("APP").separator("__"))
        .build()?;

    let config: AppConfig = settings.try_deserialize()?;
    config
        .validate()
        .map_err(|e| ConfigError::Message(format!("invalid configuration: {e}")))?;

    info!(environment = %config.environment, "Configuration loaded");
    Ok(config)
}

/// Initializes the global tracing subscriber.
pub fn init_tracing(log_level: &str, json: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level.to_string()));

    if json {
        let _ = fmt().with_env_filter(filter).json().try_init();
    } else {
        let _ = fmt().with_env_filter(filter).try_init();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let cfg = AppConfig::new("sqlite::memory:".to_string(), "test".to_string());
        assert_eq!(cfg.port, DEFAULT_PORT);
        assert_eq!(cfg.pending_order_ttl_minutes, 10);
        assert_eq!(cfg.carrier.timeout_secs, 3);
        assert!(!cfg.is_development());
    }

    #[test]
    fn test_pending_ttl_duration() {
        let cfg = AppConfig::new("sqlite::memory:".to_string(), "test".to_string());
        assert_eq!(cfg.pending_ttl(), chrono::Duration::minutes(10));
    }
}
