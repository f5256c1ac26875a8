//! Realtime platform abstraction
//!
//! The manager only ever talks to a backend through [`RealtimePlatform`] and
//! the [`RealtimeChannel`] handles it hands out. Two implementations ship:
//! [`MemoryPlatform`] (scripted, in-process) and [`SsePlatform`] (HTTP
//! server-sent events).

use std::sync::Arc;

use async_trait::async_trait;

use crate::domain::ChangeEvent;

mod error;
mod memory;
mod sse;

pub use error::PlatformError;
pub use memory::MemoryPlatform;
pub use sse::SsePlatform;

/// Receives row changes for one table binding
pub type ChangeCallback = Arc<dyn Fn(ChangeEvent) + Send + Sync>;

/// Receives feed status transitions
pub type StatusCallback = Arc<dyn Fn(ChannelStatus) + Send + Sync>;

/// Status reported by a feed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelStatus {
    Subscribed,
    ChannelError(String),
    Closed,
}

impl std::fmt::Display for ChannelStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Subscribed => write!(f, "SUBSCRIBED"),
            Self::ChannelError(_) => write!(f, "CHANNEL_ERROR"),
            Self::Closed => write!(f, "CLOSED"),
        }
    }
}

/// One live feed handle
///
/// Bind tables with [`on_change`](Self::on_change) first, then start the
/// feed with [`subscribe`](Self::subscribe).
pub trait RealtimeChannel: Send {
    fn name(&self) -> &str;

    /// Register a change callback for `table`, optionally narrowed by a row filter
    fn on_change(&mut self, table: &str, filter: Option<&str>, callback: ChangeCallback);

    /// Start the feed; `status` receives every status transition
    fn subscribe(&mut self, status: StatusCallback);

    /// Stop delivering callbacks and release transport resources
    fn unsubscribe(&mut self);
}

/// Opens and closes live feeds
#[async_trait]
pub trait RealtimePlatform: Send + Sync {
    fn open_channel(&self, name: &str) -> Box<dyn RealtimeChannel>;

    async fn close_channel(&self, channel: Box<dyn RealtimeChannel>);
}
