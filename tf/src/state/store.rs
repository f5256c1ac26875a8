//! StateStore - shared, read-mostly map of channel states

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use tracing::debug;

use super::connection::{ConnectionState, StateUpdate};

/// Per-channel connection state, keyed by channel name
#[derive(Debug, Default)]
pub struct StateStore {
    states: RwLock<HashMap<String, ConnectionState>>,
}

impl StateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current state, or a fresh disconnected record for unknown channels
    pub fn get(&self, channel: &str) -> ConnectionState {
        let states = self.states.read().unwrap_or_else(PoisonError::into_inner);
        states.get(channel).cloned().unwrap_or_default()
    }

    pub fn contains(&self, channel: &str) -> bool {
        let states = self.states.read().unwrap_or_else(PoisonError::into_inner);
        states.contains_key(channel)
    }

    pub fn len(&self) -> usize {
        self.states.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Sorted channel names
    pub fn names(&self) -> Vec<String> {
        let states = self.states.read().unwrap_or_else(PoisonError::into_inner);
        let mut names: Vec<String> = states.keys().cloned().collect();
        names.sort();
        names
    }

    /// Sorted (name, state) pairs
    pub fn snapshot(&self) -> Vec<(String, ConnectionState)> {
        let states = self.states.read().unwrap_or_else(PoisonError::into_inner);
        let mut entries: Vec<(String, ConnectionState)> =
            states.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
    }

    /// Merge `update` into the channel's state, creating it if needed; returns the new state
    pub(crate) fn update(&self, channel: &str, update: StateUpdate) -> ConnectionState {
        debug!(%channel, ?update, "StateStore::update: called");
        let mut states = self.states.write().unwrap_or_else(PoisonError::into_inner);
        let state = states.entry(channel.to_string()).or_default();
        state.apply(update);
        state.clone()
    }

    pub(crate) fn remove(&self, channel: &str) -> Option<ConnectionState> {
        debug!(%channel, "StateStore::remove: called");
        self.states
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(channel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::ConnectionPhase;

    #[test]
    fn test_get_unknown_returns_default() {
        let store = StateStore::new();
        let state = store.get("missing");
        assert_eq!(state.phase, ConnectionPhase::Disconnected);
        assert_eq!(state.retry_count, 0);
        assert!(!store.contains("missing"));
        assert!(store.is_empty());
    }

    #[test]
    fn test_update_creates_and_merges() {
        let store = StateStore::new();
        store.update("a", StateUpdate::phase(ConnectionPhase::Connecting));
        let state = store.update("a", StateUpdate::default().with_retry_count(1));

        assert_eq!(state.phase, ConnectionPhase::Connecting);
        assert_eq!(state.retry_count, 1);
        assert_eq!(store.get("a"), state);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_remove() {
        let store = StateStore::new();
        store.update("a", StateUpdate::phase(ConnectionPhase::Connected));
        assert!(store.remove("a").is_some());
        assert!(store.remove("a").is_none());
        assert!(!store.contains("a"));
    }

    #[test]
    fn test_names_and_snapshot_sorted() {
        let store = StateStore::new();
        store.update("zeta", StateUpdate::default());
        store.update("alpha", StateUpdate::phase(ConnectionPhase::Error));

        assert_eq!(store.names(), vec!["alpha".to_string(), "zeta".to_string()]);
        let snapshot = store.snapshot();
        assert_eq!(snapshot[0].0, "alpha");
        assert_eq!(snapshot[0].1.phase, ConnectionPhase::Error);
    }
}
