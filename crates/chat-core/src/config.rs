use std::time::Duration;

use chat_protocol::RetentionLimits;
use serde::{Deserialize, Serialize};

pub const DEFAULT_BROKER_URL: &str = "nats://localhost:4222";

/// Env var overriding [`ChatConfig::broker_url`].
pub const BROKER_URL_ENV: &str = "NATS_URL";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatConfig {
    pub broker_url: String,
    pub default_read_limit: usize,
    pub fetch_expiry: Duration,
    pub consumer_inactive_threshold: Duration,
    pub retention: RetentionLimits,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            broker_url: DEFAULT_BROKER_URL.to_owned(),
            default_read_limit: 50,
            fetch_expiry: Duration::from_secs(5),
            consumer_inactive_threshold: Duration::from_secs(60),
            retention: RetentionLimits::default(),
        }
    }
}

impl ChatConfig {
    /// Defaults, with the broker address taken from `NATS_URL` when set.
    pub fn from_env() -> Self {
        Self::default().broker_url_override(std::env::var(BROKER_URL_ENV).ok())
    }

    /// Replace the broker address when `url` is present and not blank.
    pub fn broker_url_override(self, url: Option<String>) -> Self {
        match url {
            Some(url) if !url.trim().is_empty() => self.broker_url(url),
            _ => self,
        }
    }

    pub fn broker_url(mut self, broker_url: impl Into<String>) -> Self {
        self.broker_url = broker_url.into();
        self
    }

    pub fn fetch_expiry(mut self, fetch_expiry: Duration) -> Self {
        self.fetch_expiry = fetch_expiry;
        self
    }

    pub fn default_read_limit(mut self, limit: usize) -> Self {
        self.default_read_limit = limit;
        self
    }

    pub fn retention(mut self, retention: RetentionLimits) -> Self {
        self.retention = retention;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_channel_contract() {
        let config = ChatConfig::default();
        assert_eq!(config.broker_url, "nats://localhost:4222");
        assert_eq!(config.default_read_limit, 50);
        assert_eq!(config.fetch_expiry, Duration::from_secs(5));
        assert_eq!(config.retention.max_messages, 10_000);
        assert_eq!(config.retention.max_age, Duration::from_secs(604_800));
    }

    #[test]
    fn setters_override_defaults() {
        let config = ChatConfig::default()
            .broker_url("nats://broker:4222")
            .fetch_expiry(Duration::from_millis(10))
            .default_read_limit(5);
        assert_eq!(config.broker_url, "nats://broker:4222");
        assert_eq!(config.fetch_expiry, Duration::from_millis(10));
        assert_eq!(config.default_read_limit, 5);
    }

    #[test]
    fn blank_override_keeps_current_address() {
        let config = ChatConfig::default()
            .broker_url_override(Some("  ".into()))
            .broker_url_override(None);
        assert_eq!(config.broker_url, DEFAULT_BROKER_URL);

        let config = config.broker_url_override(Some("nats://elsewhere:4222".into()));
        assert_eq!(config.broker_url, "nats://elsewhere:4222");
    }

    #[test]
    fn retention_setter_replaces_limits() {
        let limits = RetentionLimits {
            max_messages: 3,
            max_age: Duration::from_secs(60),
        };
        assert_eq!(ChatConfig::default().retention(limits).retention, limits);
    }
}
