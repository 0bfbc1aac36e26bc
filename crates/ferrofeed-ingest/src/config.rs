//! Environment-driven run configuration.
//!
//! | Variable | Default |
//! |----------|---------|
//! | `FERROFEED_HOME` | `$HOME/.ferrofeed` |
//! | `FERROFEED_API_KEYS` | comma separated; falls back to `ALPHAVANTAGE_API_KEY` |
//! | `FERROFEED_BASE_URL` | provider query endpoint |
//! | `FERROFEED_REQUESTS_PER_MINUTE` | `75` per credential |
//! | `FERROFEED_REQUESTS_PER_DAY` | `25000` per credential |
//! | `FERROFEED_WRITE_BATCH_SIZE` | `500` |
//! | `FERROFEED_UNIVERSE_FILE` | built-in universe |

use std::env;
use std::path::PathBuf;
use std::str::FromStr;

use ferrofeed_core::{CredentialQuota, FetcherConfig, DEFAULT_BASE_URL};
use ferrofeed_warehouse::WarehouseConfig;
use thiserror::Error;

pub const DEFAULT_WRITE_BATCH_SIZE: usize = 500;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{name} must be a positive integer, got '{value}'")]
    InvalidNumber { name: &'static str, value: String },

    #[error("no API keys configured; set FERROFEED_API_KEYS or ALPHAVANTAGE_API_KEY")]
    MissingApiKeys,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestConfig {
    pub home: PathBuf,
    pub api_keys: Vec<String>,
    pub base_url: String,
    pub requests_per_minute: u32,
    pub requests_per_day: u32,
    pub write_batch_size: usize,
    pub universe_file: Option<PathBuf>,
    /// Endpoint subset; empty means the whole catalog.
    pub endpoints: Vec<String>,
}

impl Default for IngestConfig {
    fn default() -> Self {
        let quota = CredentialQuota::default();
        Self {
            home: ferrofeed_warehouse::resolve_home(),
            api_keys: Vec::new(),
            base_url: String::from(DEFAULT_BASE_URL),
            requests_per_minute: quota.per_minute,
            requests_per_day: quota.per_day,
            write_batch_size: DEFAULT_WRITE_BATCH_SIZE,
            universe_file: None,
            endpoints: Vec::new(),
        }
    }
}

impl IngestConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Resolve from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let lookup = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());
        let mut config = Self::default();

        if let Some(home) = lookup("FERROFEED_HOME") {
            config.home = PathBuf::from(home);
        }
        config.api_keys = lookup("FERROFEED_API_KEYS")
            .or_else(|| lookup("ALPHAVANTAGE_API_KEY"))
            .map(|keys| split_list(&keys))
            .unwrap_or_default();
        if let Some(base_url) = lookup("FERROFEED_BASE_URL") {
            config.base_url = base_url.trim().to_owned();
        }
        if let Some(value) = lookup("FERROFEED_REQUESTS_PER_MINUTE") {
            config.requests_per_minute = positive("FERROFEED_REQUESTS_PER_MINUTE", &value)?;
        }
        if let Some(value) = lookup("FERROFEED_REQUESTS_PER_DAY") {
            config.requests_per_day = positive("FERROFEED_REQUESTS_PER_DAY", &value)?;
        }
        if let Some(value) = lookup("FERROFEED_WRITE_BATCH_SIZE") {
            config.write_batch_size = positive("FERROFEED_WRITE_BATCH_SIZE", &value)?;
        }
        config.universe_file = lookup("FERROFEED_UNIVERSE_FILE").map(PathBuf::from);

        Ok(config)
    }

    /// Fails when no API key survived trimming.
    pub fn require_api_keys(&self) -> Result<&[String], ConfigError> {
        if self.api_keys.is_empty() {
            return Err(ConfigError::MissingApiKeys);
        }
        Ok(&self.api_keys)
    }

    pub fn warehouse_config(&self) -> WarehouseConfig {
        WarehouseConfig::in_home(self.home.clone())
    }

    pub fn credential_quota(&self) -> CredentialQuota {
        CredentialQuota {
            per_minute: self.requests_per_minute,
            per_day: self.requests_per_day,
            ..CredentialQuota::default()
        }
    }

    pub fn fetcher_config(&self) -> FetcherConfig {
        FetcherConfig {
            base_url: self.base_url.clone(),
            ..FetcherConfig::default()
        }
    }
}

pub(crate) fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(ToOwned::to_owned)
        .collect()
}

fn positive<T>(name: &'static str, value: &str) -> Result<T, ConfigError>
where
    T: FromStr + PartialOrd + Default,
{
    match value.trim().parse::<T>() {
        Ok(parsed) if parsed > T::default() => Ok(parsed),
        _ => Err(ConfigError::InvalidNumber {
            name,
            value: value.to_owned(),
        }),
    }
}
