//! Subscription manager configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use crate::breaker::HealthCheckConfig;
use crate::events::DEFAULT_CHANNEL_CAPACITY;
use crate::retry::RetryPolicy;

/// Subscription manager configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManagerConfig {
    /// Backoff schedule for failed feeds
    #[serde(default)]
    pub retry: RetryPolicy,

    /// How long an open circuit stays open
    #[serde(rename = "cooldown-secs", default = "default_cooldown_secs")]
    pub cooldown_secs: u64,

    /// Seconds between fallback refreshes while a feed is down
    #[serde(rename = "poll-interval-secs", default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,

    #[serde(rename = "polling-enabled", default = "default_true")]
    pub polling_enabled: bool,

    /// Reconnect as soon as a circuit closes
    #[serde(rename = "resubscribe-after-cooldown", default = "default_true")]
    pub resubscribe_after_cooldown: bool,

    #[serde(rename = "health-check", default)]
    pub health_check: HealthCheckConfig,

    /// Buffered events per observer before the oldest are dropped
    #[serde(rename = "event-capacity", default = "default_event_capacity")]
    pub event_capacity: usize,
}

fn default_cooldown_secs() -> u64 {
    debug!("default_cooldown_secs: called");
    60
}

fn default_poll_interval_secs() -> u64 {
    debug!("default_poll_interval_secs: called");
    30
}

fn default_true() -> bool {
    true
}

fn default_event_capacity() -> usize {
    debug!("default_event_capacity: called");
    DEFAULT_CHANNEL_CAPACITY
}

impl Default for ManagerConfig {
    fn default() -> Self {
        debug!("ManagerConfig::default: called");
        Self {
            retry: RetryPolicy::default(),
            cooldown_secs: default_cooldown_secs(),
            poll_interval_secs: default_poll_interval_secs(),
            polling_enabled: true,
            resubscribe_after_cooldown: true,
            health_check: HealthCheckConfig::default(),
            event_capacity: default_event_capacity(),
        }
    }
}

impl ManagerConfig {
    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs.max(1))
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown_secs = cooldown.as_secs();
        self
    }

    pub fn without_polling(mut self) -> Self {
        self.polling_enabled = false;
        self
    }

    pub fn without_health_check(mut self) -> Self {
        self.health_check.enabled = false;
        self
    }

    pub fn with_resubscribe_after_cooldown(mut self, resubscribe: bool) -> Self {
        self.resubscribe_after_cooldown = resubscribe;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retry::BackoffStrategy;

    #[test]
    fn test_defaults() {
        let config = ManagerConfig::default();
        assert_eq!(config.cooldown(), Duration::from_secs(60));
        assert_eq!(config.poll_interval(), Duration::from_secs(30));
        assert!(config.polling_enabled);
        assert!(config.resubscribe_after_cooldown);
        assert!(config.health_check.enabled);
        assert_eq!(config.retry.max_retries, 3);
        assert_eq!(config.event_capacity, 1024);
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let yaml = r#"
cooldown-secs: 30
retry:
  strategy: exponential
  base-ms: 500
  max-retries: 5
health-check:
  enabled: false
"#;
        let config: ManagerConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.cooldown(), Duration::from_secs(30));
        assert_eq!(config.retry.strategy, BackoffStrategy::Exponential);
        assert_eq!(config.retry.base_ms, 500);
        assert_eq!(config.retry.max_retries, 5);
        assert!(!config.health_check.enabled);
        assert_eq!(config.health_check.interval_secs, 60);
        assert_eq!(config.poll_interval_secs, 30);
        assert!(config.polling_enabled);
    }

    #[test]
    fn test_builders() {
        let config = ManagerConfig::default()
            .with_cooldown(Duration::from_secs(5))
            .without_polling()
            .without_health_check()
            .with_resubscribe_after_cooldown(false);
        assert_eq!(config.cooldown_secs, 5);
        assert!(!config.polling_enabled);
        assert!(!config.health_check.enabled);
        assert!(!config.resubscribe_after_cooldown);
    }
}
