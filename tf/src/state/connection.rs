//! Per-channel connection state

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle phase of a channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConnectionPhase {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    /// Last attempt failed; a retry is pending
    Error,
    /// Retries exhausted; waiting for the cooldown
    CircuitOpen,
}

impl std::fmt::Display for ConnectionPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::Connecting => write!(f, "connecting"),
            Self::Connected => write!(f, "connected"),
            Self::Error => write!(f, "error"),
            Self::CircuitOpen => write!(f, "circuit-open"),
        }
    }
}

/// Read-only snapshot of one channel's connection state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionState {
    pub phase: ConnectionPhase,
    pub retry_count: u32,
    pub last_error: Option<String>,
    /// When `phase` last changed
    pub last_change: DateTime<Utc>,
}

impl Default for ConnectionState {
    fn default() -> Self {
        Self {
            phase: ConnectionPhase::Disconnected,
            retry_count: 0,
            last_error: None,
            last_change: Utc::now(),
        }
    }
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        self.phase == ConnectionPhase::Connected
    }

    pub fn is_connecting(&self) -> bool {
        self.phase == ConnectionPhase::Connecting
    }

    pub fn circuit_open(&self) -> bool {
        self.phase == ConnectionPhase::CircuitOpen
    }

    /// Connected or connecting; a new subscribe would duplicate the feed
    pub fn is_active(&self) -> bool {
        self.is_connected() || self.is_connecting()
    }

    /// Data shown from this channel may be stale (only polling keeps it fresh)
    pub fn is_stale(&self) -> bool {
        !self.is_connected()
    }

    /// Merge a partial update into this state
    pub fn apply(&mut self, update: StateUpdate) {
        if let Some(phase) = update.phase
            && phase != self.phase
        {
            self.phase = phase;
            self.last_change = Utc::now();
        }
        if let Some(retry_count) = update.retry_count {
            self.retry_count = retry_count;
        }
        if let Some(last_error) = update.last_error {
            self.last_error = last_error;
        }
    }
}

/// Partial update merged by [`ConnectionState::apply`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StateUpdate {
    pub phase: Option<ConnectionPhase>,
    pub retry_count: Option<u32>,
    /// `Some(None)` clears the error
    pub last_error: Option<Option<String>>,
}

impl StateUpdate {
    pub fn phase(phase: ConnectionPhase) -> Self {
        Self {
            phase: Some(phase),
            ..Default::default()
        }
    }

    pub fn with_retry_count(mut self, retry_count: u32) -> Self {
        self.retry_count = Some(retry_count);
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.last_error = Some(Some(error.into()));
        self
    }

    pub fn clear_error(mut self) -> Self {
        self.last_error = Some(None);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.phase.is_none() && self.retry_count.is_none() && self.last_error.is_none()
    }
}
