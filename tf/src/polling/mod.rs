//! Polling fallback
//!
//! While a live feed is unhealthy, a [`PollingFallback`] periodically asks
//! the consumer to refetch. The manager runs one per subscription; callers
//! that watch several channels with one refresh routine can spawn their own.

mod fallback;

pub use fallback::PollingFallback;
