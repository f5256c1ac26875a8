//! TourFeed - resilient realtime subscriptions for dashboards
//!
//! Dashboards keep live feeds open for the tables they display. Feeds fail:
//! the backend drops them, networks flap, quotas run out. TourFeed keeps one
//! feed per channel name, retries failures with deterministic backoff, stops
//! retrying behind a circuit breaker once retries run out, and keeps the
//! consumer fresh by polling until the feed is back.
//!
//! # Core Concepts
//!
//! - **One feed per channel name**: repeated subscribes reuse the live feed
//! - **Pure transitions**: [`state::transition`] decides, the manager task executes
//! - **Refresh, don't replay**: consumers refetch on [`DataChange::Refresh`]
//! - **Failures stay contained**: callback errors and panics are logged, never propagated
//!
//! # Modules
//!
//! - [`manager`] - The subscription manager task and its handle
//! - [`state`] - Connection state, the shared store and the transition function
//! - [`retry`] - Backoff policy
//! - [`breaker`] - Circuit breaker and aggregate health check
//! - [`polling`] - Polling fallback
//! - [`platform`] - Realtime backend trait plus in-memory and SSE implementations
//! - [`events`] - Manager event stream
//! - [`config`] - Configuration types and loading
//! - [`cli`] - Command-line interface

pub mod breaker;
pub mod cli;
pub mod config;
pub mod dispatch;
pub mod domain;
pub mod events;
pub mod manager;
pub mod platform;
pub mod polling;
pub mod retry;
pub mod state;

// Re-export commonly used types
pub use breaker::{CircuitBreaker, CircuitState, HealthCheckConfig, HealthMonitor, HealthReport};
pub use config::{ChannelSpec, Config, PlatformConfig};
pub use dispatch::{DeliveryStats, Dispatcher};
pub use domain::{ChangeEvent, ChangeKind, DataChange, DataChangeHandler, RefreshReason, SubscriptionRequest};
pub use events::{EventBus, ManagerEvent, ResetReason};
pub use manager::{ManagerConfig, ManagerError, ManagerMetrics, SubscriptionManager};
pub use platform::{
    ChangeCallback, ChannelStatus, MemoryPlatform, PlatformError, RealtimeChannel, RealtimePlatform, SsePlatform,
    StatusCallback,
};
pub use polling::PollingFallback;
pub use retry::{Backoff, BackoffStrategy, RetryPolicy};
pub use state::{ConnectionPhase, ConnectionState, StateStore};
