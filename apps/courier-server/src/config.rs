//! Application configuration loaded from environment variables.
//!
//! Loading is fail-fast: a variable that is set but invalid stops startup
//! with a clear error message. Unset variables fall back to defaults.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use courier_webhooks::services::dispatcher::{
    DispatcherConfig, DEFAULT_ATTEMPT_TIMEOUT_SECS, DEFAULT_USER_AGENT,
};
use courier_webhooks::WorkerConfig;

/// Configuration errors that can occur during environment loading.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid value for {var}: {message}")]
    InvalidValue { var: String, message: String },
}

impl ConfigError {
    fn invalid(var: &str, message: impl Into<String>) -> Self {
        Self::InvalidValue {
            var: var.to_string(),
            message: message.into(),
        }
    }
}

/// Server configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub rust_log: String,
    pub worker_concurrency: usize,
    pub poll_interval_ms: u64,
    pub batch_size: u64,
    pub attempt_timeout_secs: u64,
    pub stale_after_secs: u64,
    pub user_agent: String,
    /// Allow HTTP and internal endpoint URLs (development only).
    pub allow_private_urls: bool,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Optional Variables
    ///
    /// - `COURIER_HOST` - Bind address (default: "0.0.0.0")
    /// - `COURIER_PORT` - Listen port (default: 8080)
    /// - `RUST_LOG` - Log level filter (default: "info")
    /// - `COURIER_WORKER_CONCURRENCY` - Parallel delivery attempts (default: 4)
    /// - `COURIER_POLL_INTERVAL_MS` - Worker poll interval (default: 1000)
    /// - `COURIER_BATCH_SIZE` - Deliveries fetched per poll (default: 50)
    /// - `COURIER_ATTEMPT_TIMEOUT_SECS` - Per-attempt HTTP timeout (default: 10)
    /// - `COURIER_STALE_AFTER_SECS` - Age at which a claim is abandoned (default: 300)
    /// - `COURIER_USER_AGENT` - Outbound user agent
    /// - `COURIER_ALLOW_PRIVATE_URLS` - Accept internal endpoint URLs (default: false)
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if present (development only)
        let _ = dotenvy::dotenv();
        Self::from_lookup(|var| env::var(var).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let value = |var: &str| lookup(var).filter(|v| !v.trim().is_empty());

        let port: u16 = parse_or(value("COURIER_PORT"), "COURIER_PORT", 8080)?;
        if port == 0 {
            return Err(ConfigError::invalid(
                "COURIER_PORT",
                "Port must be between 1 and 65535",
            ));
        }

        let worker_concurrency: usize = parse_or(
            value("COURIER_WORKER_CONCURRENCY"),
            "COURIER_WORKER_CONCURRENCY",
            4,
        )?;
        if worker_concurrency == 0 {
            return Err(ConfigError::invalid(
                "COURIER_WORKER_CONCURRENCY",
                "Must be at least 1",
            ));
        }

        let poll_interval_ms: u64 = parse_or(
            value("COURIER_POLL_INTERVAL_MS"),
            "COURIER_POLL_INTERVAL_MS",
            1000,
        )?;
        if poll_interval_ms == 0 {
            return Err(ConfigError::invalid(
                "COURIER_POLL_INTERVAL_MS",
                "Must be at least 1",
            ));
        }

        let batch_size: u64 = parse_or(value("COURIER_BATCH_SIZE"), "COURIER_BATCH_SIZE", 50)?;
        if !(1..=100).contains(&batch_size) {
            return Err(ConfigError::invalid(
                "COURIER_BATCH_SIZE",
                "Must be between 1 and 100",
            ));
        }

        let attempt_timeout_secs: u64 = parse_or(
            value("COURIER_ATTEMPT_TIMEOUT_SECS"),
            "COURIER_ATTEMPT_TIMEOUT_SECS",
            DEFAULT_ATTEMPT_TIMEOUT_SECS,
        )?;
        if attempt_timeout_secs == 0 {
            return Err(ConfigError::invalid(
                "COURIER_ATTEMPT_TIMEOUT_SECS",
                "Must be at least 1",
            ));
        }

        let stale_after_secs: u64 = parse_or(
            value("COURIER_STALE_AFTER_SECS"),
            "COURIER_STALE_AFTER_SECS",
            300,
        )?;
        if stale_after_secs <= attempt_timeout_secs {
            return Err(ConfigError::invalid(
                "COURIER_STALE_AFTER_SECS",
                "Must exceed COURIER_ATTEMPT_TIMEOUT_SECS",
            ));
        }

        let allow_private_urls = match value("COURIER_ALLOW_PRIVATE_URLS") {
            None => false,
            Some(v) => parse_bool(&v)
                .ok_or_else(|| ConfigError::invalid("COURIER_ALLOW_PRIVATE_URLS", "Expected true or false"))?,
        };

        Ok(Self {
            host: value("COURIER_HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
            port,
            rust_log: value("RUST_LOG").unwrap_or_else(|| "info".to_string()),
            worker_concurrency,
            poll_interval_ms,
            batch_size,
            attempt_timeout_secs,
            stale_after_secs,
            user_agent: value("COURIER_USER_AGENT")
                .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string()),
            allow_private_urls,
        })
    }

    /// Get the server bind address.
    #[must_use]
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn dispatcher_config(&self) -> DispatcherConfig {
        DispatcherConfig::default()
            .with_timeout(Duration::from_secs(self.attempt_timeout_secs))
            .with_user_agent(self.user_agent.clone())
    }

    pub fn worker_config(&self) -> WorkerConfig {
        WorkerConfig::default()
            .with_concurrency(self.worker_concurrency)
            .with_poll_interval(Duration::from_millis(self.poll_interval_ms))
            .with_batch_size(self.batch_size)
            .with_stale_after(Duration::from_secs(self.stale_after_secs))
    }
}

fn parse_or<T>(raw: Option<String>, var: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match raw {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e: T::Err| ConfigError::invalid(var, e.to_string())),
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" => Some(true),
        "false" | "0" | "no" => Some(false),
        _ => None,
    }
}
