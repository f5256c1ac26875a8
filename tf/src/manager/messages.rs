//! Message types for the subscription manager actor

use serde::Serialize;
use thiserror::Error;
use tokio::sync::oneshot;

use crate::domain::SubscriptionRequest;
use crate::platform::ChannelStatus;

/// Requests processed by the manager task, in arrival order
#[derive(Debug)]
pub(crate) enum ManagerCommand {
    // === Consumer requests ===
    Subscribe {
        request: SubscriptionRequest,
        reply: oneshot::Sender<()>,
    },
    Unsubscribe {
        channel: String,
        reply: oneshot::Sender<()>,
    },
    UnsubscribeAll {
        reply: oneshot::Sender<()>,
    },
    /// Reset one channel's breaker, or every open breaker when `channel` is None
    ResetCircuit {
        channel: Option<String>,
        reply: oneshot::Sender<usize>,
    },
    GetMetrics {
        reply: oneshot::Sender<ManagerMetrics>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },

    // === Internal (platform callbacks and timers) ===
    /// Status reported by the feed opened as `generation`
    Status {
        channel: String,
        generation: u64,
        status: ChannelStatus,
    },
    /// Retry timer fired; `token` must match the entry's current retry token
    RetryDue { channel: String, token: u64 },
    /// Cooldown timer fired for breaker trip number `trip`
    CooldownElapsed { channel: String, trip: u64 },
    /// Open a fresh feed after a circuit reset
    Reconnect { channel: String },
}

/// Manager counters for observability
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ManagerMetrics {
    pub active_channels: usize,
    pub feeds_opened: u64,
    pub feeds_closed: u64,
    pub status_events: u64,
    /// Status callbacks dropped because they came from a superseded feed
    pub stale_events_ignored: u64,
    pub retries_scheduled: u64,
    pub circuits_opened: u64,
    pub circuit_resets: u64,
    pub subscribes_skipped: u64,
    /// Successful consumer callback invocations
    pub callbacks_delivered: u64,
    pub refreshes: u64,
    pub callback_failures: u64,
}

/// Errors returned by manager queries
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ManagerError {
    #[error("Subscription manager has stopped")]
    Stopped,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_serialize() {
        let metrics = ManagerMetrics {
            active_channels: 2,
            retries_scheduled: 3,
            ..Default::default()
        };
        let json = serde_json::to_value(&metrics).unwrap();
        assert_eq!(json["active_channels"], 2);
        assert_eq!(json["retries_scheduled"], 3);
        assert_eq!(json["circuits_opened"], 0);
    }

    #[test]
    fn test_error_display() {
        assert_eq!(ManagerError::Stopped.to_string(), "Subscription manager has stopped");
    }
}
