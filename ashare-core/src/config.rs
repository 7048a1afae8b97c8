//! TOML configuration for the market data handler.
//!
//! ```toml
//! start_date = "20240101"
//! end_date = "20240331"
//! frequency = "D"
//! fields = ["close", "vol"]
//! pause_ms = 300
//! index_code = "000016.SH"
//!
//! [provider]
//! timeout_secs = 30
//! max_retries = 3
//! calls_per_minute = 200
//! ```

use crate::data::circuit_breaker::CircuitBreaker;
use crate::data::pacing::RateLimit;
use crate::data::provider::{DataError, DateRange};
use crate::data::tushare::{ClientSettings, DEFAULT_ENDPOINT};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::num::NonZeroU32;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Environment variable consulted when no token is configured.
pub const TOKEN_ENV_VAR: &str = "TUSHARE_TOKEN";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Bar frequency. Only daily bars are served.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Frequency {
    #[default]
    Daily,
}

impl FromStr for Frequency {
    type Err = DataError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "D" | "d" => Ok(Frequency::Daily),
            other => Err(DataError::UnsupportedFrequency(other.to_string())),
        }
    }
}

impl fmt::Display for Frequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Frequency::Daily => write!(f, "D"),
        }
    }
}

fn default_frequency() -> String {
    "D".to_string()
}

fn default_endpoint() -> String {
    DEFAULT_ENDPOINT.to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_base_delay_ms() -> u64 {
    500
}

fn default_breaker_cooldown_secs() -> u64 {
    60
}

fn default_breaker_threshold() -> u32 {
    5
}

/// `[provider]` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderSettings {
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,
    #[serde(default = "default_breaker_cooldown_secs")]
    pub breaker_cooldown_secs: u64,
    #[serde(default = "default_breaker_threshold")]
    pub breaker_threshold: u32,
    /// Account quota. When set, every fetch waits for a free slot before
    /// each call instead of sleeping a fixed pause.
    #[serde(default)]
    pub calls_per_minute: Option<NonZeroU32>,
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            breaker_cooldown_secs: default_breaker_cooldown_secs(),
            breaker_threshold: default_breaker_threshold(),
            calls_per_minute: None,
        }
    }
}

impl ProviderSettings {
    pub fn client_settings(&self) -> ClientSettings {
        ClientSettings {
            endpoint: self.endpoint.clone(),
            timeout: Duration::from_secs(self.timeout_secs),
            max_retries: self.max_retries,
            retry_base_delay: Duration::from_millis(self.retry_base_delay_ms),
        }
    }

    pub fn circuit_breaker(&self) -> CircuitBreaker {
        CircuitBreaker::new(
            Duration::from_secs(self.breaker_cooldown_secs),
            self.breaker_threshold,
        )
    }

    pub fn rate_limit(&self) -> Option<RateLimit> {
        self.calls_per_minute.map(RateLimit::per_minute)
    }
}

/// Everything needed to build a handler and run a fetch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HandlerConfig {
    pub start_date: String,
    pub end_date: String,
    #[serde(default = "default_frequency")]
    pub frequency: String,
    /// Requested fields; empty means the endpoint's default field.
    #[serde(default)]
    pub fields: Vec<String>,
    #[serde(default)]
    pub pause_ms: u64,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub symbols: Vec<String>,
    #[serde(default)]
    pub index_code: Option<String>,
    #[serde(default)]
    pub provider: ProviderSettings,
}

impl HandlerConfig {
    pub fn new(start_date: impl Into<String>, end_date: impl Into<String>) -> Self {
        Self {
            start_date: start_date.into(),
            end_date: end_date.into(),
            frequency: default_frequency(),
            fields: Vec::new(),
            pause_ms: 0,
            token: None,
            symbols: Vec::new(),
            index_code: None,
            provider: ProviderSettings::default(),
        }
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    pub fn date_range(&self) -> Result<DateRange, DataError> {
        DateRange::parse(&self.start_date, &self.end_date)
    }

    pub fn frequency(&self) -> Result<Frequency, DataError> {
        self.frequency.parse()
    }

    pub fn pause(&self) -> Duration {
        Duration::from_millis(self.pause_ms)
    }

    /// Pick the token: `explicit`, then the config file, then `TUSHARE_TOKEN`.
    pub fn resolve_token(&self, explicit: Option<&str>) -> Result<String, DataError> {
        let env = std::env::var(TOKEN_ENV_VAR).ok();
        pick_token(explicit, self.token.as_deref(), env.as_deref())
    }
}

fn pick_token(
    explicit: Option<&str>,
    configured: Option<&str>,
    env: Option<&str>,
) -> Result<String, DataError> {
    [explicit, configured, env]
        .into_iter()
        .flatten()
        .map(str::trim)
        .find(|t| !t.is_empty())
        .map(str::to_string)
        .ok_or(DataError::MissingToken)
}
