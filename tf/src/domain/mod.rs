//! Domain types shared by the manager, the platform adapters and consumers

mod change;
mod request;

pub use change::{ChangeEvent, ChangeKind, DataChange, RefreshReason};
pub use request::{DataChangeHandler, SubscriptionRequest};
