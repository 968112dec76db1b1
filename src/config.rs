//! Environment-driven configuration for orchestrator and hub processes.

use crate::constants::defaults;
use crate::error::{CoreError, Result};

#[derive(Debug, Clone)]
pub struct CoreConfig {
    /// Relational store URL. When absent the process runs on in-memory
    /// stores and an in-memory bus (test and single-process mode).
    pub database_url: Option<String>,
    pub bind_addr: String,
    /// Gates background topic consumers. Test processes set this to false
    /// so they never race live consumers for queue messages.
    pub enable_consumers: bool,
    pub poll_interval_ms: u64,
    pub heartbeat_timeout_secs: u64,
    pub dispatch_timeout_ms: u64,
    pub notify: NotifyConfig,
}

#[derive(Debug, Clone)]
pub struct NotifyConfig {
    pub webhook_url: Option<String>,
    pub failure_threshold: u32,
    pub open_secs: u64,
    pub max_retry_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            webhook_url: None,
            failure_threshold: defaults::CIRCUIT_FAILURE_THRESHOLD,
            open_secs: defaults::CIRCUIT_OPEN_SECS,
            max_retry_attempts: defaults::MAX_RETRY_ATTEMPTS,
            base_delay_ms: defaults::RETRY_BASE_DELAY_MS,
            max_delay_ms: defaults::RETRY_MAX_DELAY_MS,
        }
    }
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            bind_addr: "0.0.0.0:8080".to_string(),
            enable_consumers: true,
            poll_interval_ms: defaults::POLL_INTERVAL_MS,
            heartbeat_timeout_secs: defaults::HEARTBEAT_TIMEOUT_SECS,
            dispatch_timeout_ms: defaults::DISPATCH_TIMEOUT_MS,
            notify: NotifyConfig::default(),
        }
    }
}

impl CoreConfig {
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(url) = std::env::var("DATABASE_URL") {
            config.database_url = Some(url);
        }
        if let Ok(addr) = std::env::var("REELFORGE_BIND_ADDR") {
            config.bind_addr = addr;
        }
        if let Ok(flag) = std::env::var("REELFORGE_ENABLE_CONSUMERS") {
            config.enable_consumers = !matches!(flag.as_str(), "0" | "false" | "no");
        }
        if let Ok(raw) = std::env::var("REELFORGE_POLL_INTERVAL_MS") {
            config.poll_interval_ms = parse(&raw, "poll_interval_ms")?;
        }
        if let Ok(raw) = std::env::var("REELFORGE_HEARTBEAT_TIMEOUT_SECS") {
            config.heartbeat_timeout_secs = parse(&raw, "heartbeat_timeout_secs")?;
        }
        if let Ok(raw) = std::env::var("REELFORGE_DISPATCH_TIMEOUT_MS") {
            config.dispatch_timeout_ms = parse(&raw, "dispatch_timeout_ms")?;
        }
        if let Ok(url) = std::env::var("REELFORGE_ALERT_WEBHOOK_URL") {
            config.notify.webhook_url = Some(url);
        }
        if let Ok(raw) = std::env::var("REELFORGE_ALERT_MAX_RETRIES") {
            config.notify.max_retry_attempts = parse(&raw, "alert_max_retries")?;
        }

        Ok(config)
    }
}

fn parse<T: std::str::FromStr>(raw: &str, field: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    raw.parse()
        .map_err(|e| CoreError::Configuration(format!("invalid {field}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = CoreConfig::default();
        assert!(config.enable_consumers);
        assert_eq!(config.heartbeat_timeout_secs, 60);
        assert_eq!(config.notify.failure_threshold, 3);
        assert_eq!(config.notify.base_delay_ms, 1000);
    }

    #[test]
    fn consumer_toggle_parses_falsy_values() {
        std::env::set_var("REELFORGE_ENABLE_CONSUMERS", "0");
        let config = CoreConfig::from_env().unwrap();
        assert!(!config.enable_consumers);
        std::env::remove_var("REELFORGE_ENABLE_CONSUMERS");
    }
}
