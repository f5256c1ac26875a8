//! Aggregate health check across all channels

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use crate::state::{ConnectionPhase, ConnectionState};

/// Health check configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthCheckConfig {
    pub enabled: bool,

    /// Seconds between checks
    #[serde(rename = "interval-secs")]
    pub interval_secs: u64,

    /// Share of failing channels (0.0..=1.0) that triggers a reset of all open breakers
    #[serde(rename = "error-rate-threshold")]
    pub error_rate_threshold: f64,

    /// Minimum registered channels before the error rate is trusted
    #[serde(rename = "min-channels")]
    pub min_channels: usize,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 60,
            error_rate_threshold: 0.5,
            min_channels: 2,
        }
    }
}

impl HealthCheckConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs.max(1))
    }
}

/// Outcome of one health evaluation
#[derive(Debug, Clone, PartialEq)]
pub struct HealthReport {
    pub total: usize,
    /// Channels in error or circuit-open
    pub failing: usize,
    pub circuit_open: usize,
    pub error_rate: f64,
    pub should_reset: bool,
}

/// Decides when open breakers should be force-reset
#[derive(Debug, Clone)]
pub struct HealthMonitor {
    config: HealthCheckConfig,
}

impl HealthMonitor {
    pub fn new(config: HealthCheckConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &HealthCheckConfig {
        &self.config
    }

    pub fn enabled(&self) -> bool {
        self.config.enabled
    }

    /// Evaluate a snapshot of channel states
    pub fn evaluate(&self, states: &[(String, ConnectionState)]) -> HealthReport {
        let total = states.len();
        let circuit_open = states.iter().filter(|(_, s)| s.circuit_open()).count();
        let failing = states
            .iter()
            .filter(|(_, s)| matches!(s.phase, ConnectionPhase::Error | ConnectionPhase::CircuitOpen))
            .count();
        let error_rate = if total == 0 { 0.0 } else { failing as f64 / total as f64 };

        let should_reset =
            total >= self.config.min_channels && circuit_open > 0 && error_rate >= self.config.error_rate_threshold;

        debug!(
            total,
            failing,
            circuit_open,
            error_rate,
            should_reset,
            "HealthMonitor::evaluate: done"
        );

        HealthReport {
            total,
            failing,
            circuit_open,
            error_rate,
            should_reset,
        }
    }
}
