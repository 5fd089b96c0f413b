//! Configuration management for Tollgate.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::info;

use crate::error::{Result, TollgateError};

/// Prefix for environment variable overrides, e.g. `TOLLGATE__LIMITS__LIMIT`.
pub const ENV_PREFIX: &str = "TOLLGATE";

/// Main configuration for the Tollgate engine.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TollgateConfig {
    /// Quota configuration
    #[serde(default)]
    pub limits: LimitsConfig,

    /// Pricing configuration
    #[serde(default)]
    pub billing: BillingConfig,

    /// Counter store connection
    #[serde(default)]
    pub counter_store: CounterStoreConfig,

    /// Durable usage ledger connection
    #[serde(default)]
    pub ledger: LedgerConfig,
}

/// What a caller should do when the limiter cannot reach its store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailurePolicy {
    /// Deny the request
    #[default]
    Closed,
    /// Admit the request without metering it
    Open,
}

/// Sliding-window quota configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Length of the trailing window in seconds
    #[serde(default = "default_window_seconds")]
    pub window_seconds: u64,

    /// Admitted requests allowed per window
    #[serde(default = "default_limit")]
    pub limit: u64,

    /// Extra lifetime given to a window key beyond the window itself
    #[serde(default = "default_grace")]
    pub store_ttl_grace_seconds: u64,

    /// Use the atomic store-side admission instead of trim/count/add
    #[serde(default)]
    pub strict: bool,

    /// Policy applied by callers on `StoreUnavailable`
    #[serde(default)]
    pub on_unavailable: FailurePolicy,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            window_seconds: default_window_seconds(),
            limit: default_limit(),
            store_ttl_grace_seconds: default_grace(),
            strict: false,
            on_unavailable: FailurePolicy::default(),
        }
    }
}

fn default_window_seconds() -> u64 {
    86400
}

fn default_limit() -> u64 {
    1000
}

fn default_grace() -> u64 {
    60
}

/// Pricing configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BillingConfig {
    /// Price of one metered request
    #[serde(default = "default_unit_price")]
    pub unit_price: Decimal,

    /// Trailing period billed when no explicit bounds are given
    #[serde(default = "default_period_seconds")]
    pub default_period_seconds: u64,
}

impl Default for BillingConfig {
    fn default() -> Self {
        Self {
            unit_price: default_unit_price(),
            default_period_seconds: default_period_seconds(),
        }
    }
}

fn default_unit_price() -> Decimal {
    // 0.01
    Decimal::new(1, 2)
}

fn default_period_seconds() -> u64 {
    24 * 3600
}

/// Counter store (Redis) configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CounterStoreConfig {
    /// Redis connection URL
    #[serde(default = "default_redis_url")]
    pub url: String,

    /// Prefix for per-identity window keys
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,

    /// Deadline for each store round-trip
    #[serde(default = "default_counter_timeout")]
    pub timeout_ms: u64,
}

impl Default for CounterStoreConfig {
    fn default() -> Self {
        Self {
            url: default_redis_url(),
            key_prefix: default_key_prefix(),
            timeout_ms: default_counter_timeout(),
        }
    }
}

impl CounterStoreConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

fn default_redis_url() -> String {
    "redis://127.0.0.1:6379/0".to_string()
}

fn default_key_prefix() -> String {
    "user:".to_string()
}

fn default_counter_timeout() -> u64 {
    1000
}

/// Durable ledger (SQLite) configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerConfig {
    /// sqlx connection URL
    #[serde(default = "default_database_url")]
    pub database_url: String,

    /// Pool size
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Deadline for each ledger query
    #[serde(default = "default_ledger_timeout")]
    pub timeout_ms: u64,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            database_url: default_database_url(),
            max_connections: default_max_connections(),
            timeout_ms: default_ledger_timeout(),
        }
    }
}

impl LedgerConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

fn default_database_url() -> String {
    "sqlite://tollgate.db".to_string()
}

fn default_max_connections() -> u32 {
    10
}

fn default_ledger_timeout() -> u64 {
    5000
}

impl TollgateConfig {
    /// Load configuration from a YAML file path.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: TollgateConfig = serde_yaml::from_str(yaml)
            .map_err(|e| TollgateError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from an optional file overlaid with
    /// `TOLLGATE__SECTION__KEY` environment variables.
    pub fn load(path: Option<&str>) -> Result<Self> {
        let mut builder = ::config::Config::builder();
        if let Some(path) = path {
            info!(path = %path, "Loading configuration file");
            builder = builder.add_source(::config::File::with_name(path));
        }
        builder = builder.add_source(
            ::config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let config: TollgateConfig = builder
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| TollgateError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.limits.window_seconds == 0 {
            return Err(TollgateError::Config(
                "limits.window_seconds must be greater than zero".to_string(),
            ));
        }
        if self.billing.unit_price.is_sign_negative() && !self.billing.unit_price.is_zero() {
            return Err(TollgateError::Config(format!(
                "billing.unit_price must not be negative, got {}",
                self.billing.unit_price
            )));
        }
        if self.counter_store.timeout_ms == 0 || self.ledger.timeout_ms == 0 {
            return Err(TollgateError::Config(
                "store timeouts must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}
