//! Event types emitted by the subscription manager

use serde::{Deserialize, Serialize};

/// Why a circuit was closed again
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResetReason {
    Cooldown,
    Manual,
    HealthCheck,
}

impl std::fmt::Display for ResetReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cooldown => write!(f, "cooldown"),
            Self::Manual => write!(f, "manual"),
            Self::HealthCheck => write!(f, "health-check"),
        }
    }
}

/// Observable manager activity
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ManagerEvent {
    // === Feed lifecycle ===
    /// A new feed was opened through the platform
    FeedOpened { channel: String, generation: u64 },
    /// Platform acknowledged the feed
    Subscribed { channel: String },
    /// Platform reported a channel error
    ChannelError {
        channel: String,
        error: String,
        retry_count: u32,
    },
    /// Platform closed the feed
    Closed { channel: String },
    /// Consumer unsubscribed; all resources released
    Unsubscribed { channel: String },

    // === Recovery ===
    /// A retry timer was started
    RetryScheduled { channel: String, attempt: u32, delay_ms: u64 },
    /// Retries exhausted; the breaker opened
    CircuitOpened { channel: String, cooldown_ms: u64 },
    /// The breaker closed again
    CircuitReset { channel: String, reason: ResetReason },
    /// A subscribe or retry was dropped without an attempt
    SubscribeSkipped { channel: String, reason: String },

    // === Delivery ===
    /// Polling fallback asked the consumer to refetch
    PollRefresh { channel: String },
    /// The consumer callback returned an error or panicked
    CallbackFailed { channel: String, error: String },
}

impl ManagerEvent {
    /// Short event name for logging
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::FeedOpened { .. } => "feed_opened",
            Self::Subscribed { .. } => "subscribed",
            Self::ChannelError { .. } => "channel_error",
            Self::Closed { .. } => "closed",
            Self::Unsubscribed { .. } => "unsubscribed",
            Self::RetryScheduled { .. } => "retry_scheduled",
            Self::CircuitOpened { .. } => "circuit_opened",
            Self::CircuitReset { .. } => "circuit_reset",
            Self::SubscribeSkipped { .. } => "subscribe_skipped",
            Self::PollRefresh { .. } => "poll_refresh",
            Self::CallbackFailed { .. } => "callback_failed",
        }
    }

    /// Channel the event concerns
    pub fn channel(&self) -> &str {
        match self {
            Self::FeedOpened { channel, .. }
            | Self::Subscribed { channel }
            | Self::ChannelError { channel, .. }
            | Self::Closed { channel }
            | Self::Unsubscribed { channel }
            | Self::RetryScheduled { channel, .. }
            | Self::CircuitOpened { channel, .. }
            | Self::CircuitReset { channel, .. }
            | Self::SubscribeSkipped { channel, .. }
            | Self::PollRefresh { channel }
            | Self::CallbackFailed { channel, .. } => channel,
        }
    }
}
