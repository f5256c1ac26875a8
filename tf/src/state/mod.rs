//! Connection state for every managed channel
//!
//! The [`StateStore`] is the single source of truth read by the registry, the
//! breaker, the polling fallback and consumers. Only the manager actor writes
//! to it, and every write goes through [`StateStore::update`] with a
//! [`StateUpdate`] computed by [`transition`].

mod connection;
mod machine;
mod store;

pub use connection::{ConnectionPhase, ConnectionState, StateUpdate};
pub use machine::{Effect, Input, Transition, transition};
pub use store::StateStore;
