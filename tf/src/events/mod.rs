//! Manager event stream
//!
//! Every retry, breaker transition and delivery failure is emitted as a
//! [`ManagerEvent`] on the [`EventBus`]. The CLI prints them; tests collect
//! them to assert exact retry schedules.

mod bus;
mod types;

pub use bus::{DEFAULT_CHANNEL_CAPACITY, EventBus};
pub use types::{ManagerEvent, ResetReason};
