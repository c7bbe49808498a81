use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_CONFIG_PATH: &str = "config/agent.toml";

/// Upper bound on `rate_limit`; it sizes both the worker pool and the
/// client semaphore.
pub const MAX_RATE_LIMIT: usize = 1024;

#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    #[serde(default = "default_server_address")]
    pub server_address: String,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_report_interval")]
    pub report_interval_secs: u64,
    /// HMAC key for request signing. Signing is off when unset or empty.
    pub secret_key: Option<String>,
    /// Concurrent delivery cap; `0` means unlimited.
    #[serde(default)]
    pub rate_limit: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: usize,
    #[serde(default = "default_retry_delays")]
    pub retry_delays_secs: Vec<u64>,
    /// PEM public key of the collector. Encryption is off when unset.
    pub crypto_key: Option<PathBuf>,
    #[serde(default = "default_compression")]
    pub compression: bool,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    /// Metric names never included in a delivery batch.
    #[serde(default)]
    pub exclude_metrics: Vec<String>,
    pub log_level: Option<String>,
}

fn default_server_address() -> String {
    "http://localhost:8080".to_string()
}

fn default_poll_interval() -> u64 {
    2
}

fn default_report_interval() -> u64 {
    10
}

fn default_max_retries() -> usize {
    3
}

fn default_retry_delays() -> Vec<u64> {
    vec![1, 3, 5]
}

fn default_compression() -> bool {
    true
}

fn default_request_timeout() -> u64 {
    20
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            server_address: default_server_address(),
            poll_interval_secs: default_poll_interval(),
            report_interval_secs: default_report_interval(),
            secret_key: None,
            rate_limit: 0,
            max_retries: default_max_retries(),
            retry_delays_secs: default_retry_delays(),
            crypto_key: None,
            compression: default_compression(),
            request_timeout_secs: default_request_timeout(),
            exclude_metrics: Vec::new(),
            log_level: None,
        }
    }
}

impl AgentConfig {
    /// Reads `path` (a missing file yields the defaults), applies
    /// environment overrides and validates the result.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let mut config = Self::from_file(path.as_ref())?;
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "Config file not found, using defaults");
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        Ok(config)
    }

    /// Overrides fields from variables returned by `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(address) = lookup("ADDRESS") {
            self.server_address = address;
        }
        if let Some(value) = lookup("POLL_INTERVAL") {
            self.poll_interval_secs = parse_env("POLL_INTERVAL", &value)?;
        }
        if let Some(value) = lookup("REPORT_INTERVAL") {
            self.report_interval_secs = parse_env("REPORT_INTERVAL", &value)?;
        }
        if let Some(key) = lookup("KEY") {
            self.secret_key = Some(key);
        }
        if let Some(value) = lookup("RATE_LIMIT") {
            self.rate_limit = parse_env("RATE_LIMIT", &value)?;
        }
        if let Some(value) = lookup("MAX_RETRIES") {
            self.max_retries = parse_env("MAX_RETRIES", &value)?;
        }
        if let Some(value) = lookup("RETRY_DELAYS") {
            self.retry_delays_secs = value
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(|s| parse_env("RETRY_DELAYS", s.trim_end_matches('s')))
                .collect::<Result<_>>()?;
        }
        if let Some(path) = lookup("CRYPTO_KEY") {
            self.crypto_key = (!path.is_empty()).then(|| PathBuf::from(path));
        }
        if let Some(level) = lookup("LOG_LEVEL") {
            self.log_level = Some(level);
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.server_address.trim().is_empty() {
            anyhow::bail!("server_address must not be empty");
        }
        if self.poll_interval_secs == 0 {
            anyhow::bail!("poll_interval_secs must be greater than zero");
        }
        if self.report_interval_secs == 0 {
            anyhow::bail!("report_interval_secs must be greater than zero");
        }
        if self.rate_limit > MAX_RATE_LIMIT {
            anyhow::bail!(
                "rate_limit {} exceeds the maximum of {MAX_RATE_LIMIT}",
                self.rate_limit
            );
        }
        if self.request_timeout_secs == 0 {
            anyhow::bail!("request_timeout_secs must be greater than zero");
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn report_interval(&self) -> Duration {
        Duration::from_secs(self.report_interval_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// `None` when no delays are configured, so the client falls back to its
    /// defaults.
    pub fn retry_delays(&self) -> Option<Vec<Duration>> {
        if self.retry_delays_secs.is_empty() {
            return None;
        }
        Some(
            self.retry_delays_secs
                .iter()
                .map(|secs| Duration::from_secs(*secs))
                .collect(),
        )
    }

    /// The signing key, ignoring an empty string.
    pub fn signing_key(&self) -> Option<&str> {
        self.secret_key.as_deref().filter(|key| !key.is_empty())
    }
}

fn parse_env<T>(name: &str, value: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    value
        .trim()
        .parse()
        .with_context(|| format!("invalid value for {name}: {value:?}"))
}
