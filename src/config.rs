//! Configuration for the event relay binary.

use std::time::Duration;

use anyhow::{Context, Result};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use relay_core::BatchEnvironment;
use relay_delivery::{
    retry::{DEFAULT_BASE_TIMEOUT_SECONDS, MIN_BACKOFF_FACTOR},
    PoolConfig, ProcessorConfig, RetryPolicy,
};
use serde::{Deserialize, Deserializer, Serialize};
use tracing::warn;

const CONFIG_FILE: &str = "relay.toml";

/// Relay configuration with defaults, file, and environment overrides.
///
/// Configuration is loaded in priority order:
/// 1. Environment variables (highest priority)
/// 2. Configuration file (`relay.toml`)
/// 3. Built-in defaults (lowest priority)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Base redelivery timeout in seconds.
    ///
    /// Environment variable: `BASE_TIMEOUT`
    #[serde(default = "default_base_timeout", deserialize_with = "base_timeout_or_default")]
    pub base_timeout: u64,

    /// Backoff multiplier per prior delivery; values below 2 are raised.
    ///
    /// Environment variable: `TIMEOUT_FACTOR`
    #[serde(default = "default_timeout_factor", deserialize_with = "timeout_factor_or_default")]
    pub timeout_factor: u32,

    /// Idle keep-alive for pooled connections in seconds.
    ///
    /// Environment variable: `KEEP_ALIVE_SECONDS`
    #[serde(default = "default_keep_alive")]
    pub keep_alive_seconds: u64,

    /// Submission request timeout in seconds.
    ///
    /// Environment variable: `SUBMIT_TIMEOUT_SECONDS`
    #[serde(default = "default_submit_timeout")]
    pub submit_timeout_seconds: u64,

    /// Records processed concurrently per batch.
    ///
    /// Environment variable: `MAX_CONCURRENCY`
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,

    /// Validate records without submitting them.
    ///
    /// Environment variable: `SUBMISSION_DISABLED`
    #[serde(default, deserialize_with = "flexible_bool")]
    pub submission_disabled: bool,

    /// Environment tag for outbound batches.
    ///
    /// Environment variable: `BATCH_ENVIRONMENT`
    #[serde(default = "default_batch_environment")]
    pub batch_environment: String,

    /// Queue the relay consumes, used to label visibility changes.
    ///
    /// Environment variable: `QUEUE_URL`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queue_url: Option<String>,
}

impl Config {
    /// Load configuration from defaults, config file, and environment.
    pub fn load() -> Result<Self> {
        let figment = Figment::new()
            .merge(Serialized::defaults(Self::default()))
            .merge(Toml::file(CONFIG_FILE))
            .merge(Env::prefixed(""));

        let config: Self = figment.extract().context("Failed to load configuration")?;
        config.validate()
    }

    /// Outbound batch environment.
    pub fn environment(&self) -> Result<BatchEnvironment> {
        self.batch_environment.parse().context("Invalid BATCH_ENVIRONMENT")
    }

    /// Convert to the delivery crate's processor configuration.
    pub fn to_processor_config(&self) -> Result<ProcessorConfig> {
        Ok(ProcessorConfig {
            pool: self.to_pool_config(),
            retry_policy: self.to_retry_policy(),
            max_concurrency: self.max_concurrency,
            submission_disabled: self.submission_disabled,
            environment: self.environment()?,
        })
    }

    /// Convert to the shared transport pool configuration.
    pub fn to_pool_config(&self) -> PoolConfig {
        PoolConfig {
            keep_alive: Duration::from_secs(self.keep_alive_seconds),
            timeout: Duration::from_secs(self.submit_timeout_seconds),
            ..PoolConfig::default()
        }
    }

    /// Convert to the redelivery policy.
    pub fn to_retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(Duration::from_secs(self.base_timeout), self.timeout_factor)
    }

    /// Validate and normalize configuration values.
    fn validate(mut self) -> Result<Self> {
        if self.timeout_factor < MIN_BACKOFF_FACTOR {
            warn!(
                timeout_factor = self.timeout_factor,
                minimum = MIN_BACKOFF_FACTOR,
                "TIMEOUT_FACTOR below minimum, using minimum"
            );
            self.timeout_factor = MIN_BACKOFF_FACTOR;
        }

        if self.max_concurrency == 0 {
            warn!("MAX_CONCURRENCY must be at least 1, using 1");
            self.max_concurrency = 1;
        }

        if self.base_timeout == 0 {
            anyhow::bail!("base_timeout must be greater than 0");
        }

        if self.submit_timeout_seconds == 0 {
            anyhow::bail!("submit_timeout_seconds must be greater than 0");
        }

        self.environment()?;

        if self.submission_disabled {
            warn!("submission disabled, records will be validated and acknowledged only");
        }

        Ok(self)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_timeout: default_base_timeout(),
            timeout_factor: default_timeout_factor(),
            keep_alive_seconds: default_keep_alive(),
            submit_timeout_seconds: default_submit_timeout(),
            max_concurrency: default_max_concurrency(),
            submission_disabled: false,
            batch_environment: default_batch_environment(),
            queue_url: None,
        }
    }
}

fn default_base_timeout() -> u64 {
    DEFAULT_BASE_TIMEOUT_SECONDS
}

fn default_timeout_factor() -> u32 {
    MIN_BACKOFF_FACTOR
}

fn default_keep_alive() -> u64 {
    relay_delivery::cache::DEFAULT_KEEP_ALIVE_SECONDS
}

fn default_submit_timeout() -> u64 {
    relay_delivery::DEFAULT_TIMEOUT_SECONDS
}

fn default_max_concurrency() -> usize {
    relay_delivery::DEFAULT_MAX_CONCURRENCY
}

fn default_batch_environment() -> String {
    BatchEnvironment::default().to_string()
}

fn base_timeout_or_default<'de, D>(deserializer: D) -> std::result::Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    number_or_default(deserializer, "BASE_TIMEOUT", default_base_timeout)
}

fn timeout_factor_or_default<'de, D>(deserializer: D) -> std::result::Result<u32, D::Error>
where
    D: Deserializer<'de>,
{
    number_or_default(deserializer, "TIMEOUT_FACTOR", default_timeout_factor)
}

/// Falls back to the default, with a warning, when the value is not a number.
fn number_or_default<'de, D, T>(
    deserializer: D,
    name: &str,
    default: fn() -> T,
) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + std::fmt::Display,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Lenient<T> {
        Number(T),
        Other(figment::value::Value),
    }

    match Lenient::<T>::deserialize(deserializer)? {
        Lenient::Number(value) => Ok(value),
        Lenient::Other(raw) => {
            let value = default();
            warn!(variable = name, raw = ?raw, default = %value, "invalid number, using default");
            Ok(value)
        },
    }
}

/// Accepts `true`/`false`, `1`/`0` and their string forms.
fn flexible_bool<'de, D>(deserializer: D) -> std::result::Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Flexible {
        Bool(bool),
        Int(i64),
        Text(String),
    }

    match Flexible::deserialize(deserializer)? {
        Flexible::Bool(value) => Ok(value),
        Flexible::Int(value) => Ok(value != 0),
        Flexible::Text(text) => match text.trim().to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" => Ok(true),
            "false" | "0" | "no" | "" => Ok(false),
            other => Err(serde::de::Error::custom(format!("invalid boolean: {other}"))),
        },
    }
}
