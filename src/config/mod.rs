//! Typed controller configuration.
//!
//! Built from defaults, then optionally a TOML file, then environment
//! variables. Validated once at startup; invalid values fail fast.

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;

use crate::controller::RetryPolicy;
use crate::error::{Error, Result};
use crate::queue::ExponentialBackoff;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ControllerConfig {
    /// Number of worker loops draining the queue.
    pub workers: usize,
    /// Failures tolerated before a key is dropped.
    pub max_retries: u32,
    /// First retry delay; doubles per failure.
    pub base_delay_ms: u64,
    /// Upper bound on the retry delay.
    pub max_delay_ms: u64,
    /// Periodic resync of every cached object. Off when unset.
    pub resync_secs: Option<u64>,
    /// Restrict the informer to one namespace.
    pub namespace: Option<String>,
    pub log_level: String,
    pub otel_endpoint: Option<String>,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            workers: 1,
            max_retries: 5,
            base_delay_ms: 5,
            max_delay_ms: 1_000_000,
            resync_secs: None,
            namespace: None,
            log_level: "info".to_string(),
            otel_endpoint: None,
        }
    }
}

impl ControllerConfig {
    /// Load configuration from environment variables on top of the defaults.
    ///
    /// In local dev, call `dotenvy::dotenv().ok()` before this.
    pub fn from_env() -> Result<Self> {
        Self::default().merge_env()
    }

    /// Load a TOML file. Missing keys keep their defaults.
    pub fn from_toml_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("cannot read config file {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&content)
            .map_err(|e| Error::Config(format!("bad config file {}: {e}", path.display())))
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Override fields with any `KEYQ_*`, `LOG_LEVEL` or `OTEL_ENDPOINT`
    /// variables that are set.
    pub fn merge_env(mut self) -> Result<Self> {
        if let Some(v) = parse_var("KEYQ_WORKERS")? {
            self.workers = v;
        }
        if let Some(v) = parse_var("KEYQ_MAX_RETRIES")? {
            self.max_retries = v;
        }
        if let Some(v) = parse_var("KEYQ_BASE_DELAY_MS")? {
            self.base_delay_ms = v;
        }
        if let Some(v) = parse_var("KEYQ_MAX_DELAY_MS")? {
            self.max_delay_ms = v;
        }
        if let Some(v) = parse_var("KEYQ_RESYNC_SECS")? {
            self.resync_secs = Some(v);
        }
        if let Ok(ns) = std::env::var("KEYQ_NAMESPACE") {
            self.namespace = Some(ns).filter(|ns| !ns.is_empty());
        }
        if let Ok(level) = std::env::var("LOG_LEVEL") {
            self.log_level = level;
        }
        if let Ok(endpoint) = std::env::var("OTEL_ENDPOINT") {
            self.otel_endpoint = Some(endpoint);
        }
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(Error::Config("workers must be at least 1".to_string()));
        }
        if self.base_delay_ms > self.max_delay_ms {
            return Err(Error::Config(format!(
                "base delay {}ms exceeds max delay {}ms",
                self.base_delay_ms, self.max_delay_ms
            )));
        }
        Ok(())
    }

    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    pub fn resync_period(&self) -> Option<Duration> {
        self.resync_secs.filter(|s| *s > 0).map(Duration::from_secs)
    }

    pub fn rate_limiter(&self) -> ExponentialBackoff {
        ExponentialBackoff::new(self.base_delay(), self.max_delay())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_retries)
    }
}

fn parse_var<T>(name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| Error::Config(format!("invalid {name}={raw:?}: {e}"))),
        Err(_) => Ok(None),
    }
}
