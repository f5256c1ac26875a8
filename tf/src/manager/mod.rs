//! Subscription manager
//!
//! [`SubscriptionManager`] is the consumer-facing handle. Behind it a single
//! task deduplicates feeds by channel name, retries failed feeds with
//! backoff, opens the circuit when retries run out, and keeps consumers fed
//! through polling while a feed is down.

mod config;
mod core;
mod handle;
mod messages;
mod registry;

pub use config::ManagerConfig;
pub use handle::SubscriptionManager;
pub use messages::{ManagerError, ManagerMetrics};
