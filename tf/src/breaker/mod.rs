//! Circuit breaking for live feeds
//!
//! - [`CircuitBreaker`]: per-channel open/closed bookkeeping and cooldown
//! - [`HealthMonitor`]: aggregate check that force-resets open breakers when
//!   the global error rate crosses a threshold

mod circuit;
mod health;

pub use circuit::{CircuitBreaker, CircuitState};
pub use health::{HealthCheckConfig, HealthMonitor, HealthReport};
