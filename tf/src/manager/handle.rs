//! SubscriptionManager - client interface to the manager task

use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, warn};

use super::config::ManagerConfig;
use super::core::ManagerActor;
use super::messages::{ManagerCommand, ManagerError, ManagerMetrics};
use crate::dispatch::Dispatcher;
use crate::domain::SubscriptionRequest;
use crate::events::{EventBus, ManagerEvent};
use crate::platform::RealtimePlatform;
use crate::state::{ConnectionState, StateStore};

/// Handle to a running subscription manager
///
/// Cheap to clone. Mutating calls return once the manager task has processed
/// them; they never fail, and only log if the task has already stopped.
/// State reads go straight to the shared [`StateStore`]. The task tears every
/// feed down when [`shutdown`](Self::shutdown) is called or the last handle
/// is dropped.
#[derive(Clone)]
pub struct SubscriptionManager {
    tx: mpsc::UnboundedSender<ManagerCommand>,
    store: Arc<StateStore>,
    events: EventBus,
}

impl SubscriptionManager {
    /// Start the manager task on the current tokio runtime
    pub fn spawn(config: ManagerConfig, platform: Arc<dyn RealtimePlatform>) -> Self {
        debug!(?config, "SubscriptionManager::spawn: called");
        let (tx, rx) = mpsc::unbounded_channel();
        let store = Arc::new(StateStore::new());
        let events = EventBus::new(config.event_capacity);
        let dispatcher = Dispatcher::new(events.clone());

        let actor = ManagerActor::new(config, platform, store.clone(), dispatcher, tx.downgrade());
        tokio::spawn(actor.run(rx));

        Self { tx, store, events }
    }

    /// Open or reuse a live feed for the request's channel name
    pub async fn subscribe(&self, request: SubscriptionRequest) {
        debug!(channel = %request.channel_name, "SubscriptionManager::subscribe: called");
        let (reply, done) = oneshot::channel();
        self.call(ManagerCommand::Subscribe { request, reply }, done, "subscribe")
            .await;
    }

    /// Close the channel's feed and release its timers, poller and state; no-op when unknown
    pub async fn unsubscribe(&self, channel: &str) {
        debug!(%channel, "SubscriptionManager::unsubscribe: called");
        let (reply, done) = oneshot::channel();
        let command = ManagerCommand::Unsubscribe {
            channel: channel.to_string(),
            reply,
        };
        self.call(command, done, "unsubscribe").await;
    }

    pub async fn unsubscribe_all(&self) {
        debug!("SubscriptionManager::unsubscribe_all: called");
        let (reply, done) = oneshot::channel();
        self.call(ManagerCommand::UnsubscribeAll { reply }, done, "unsubscribe_all")
            .await;
    }

    /// Snapshot of one channel's state; unknown channels read as disconnected
    pub fn connection_status(&self, channel: &str) -> ConnectionState {
        self.store.get(channel)
    }

    /// Registered channel names, sorted
    pub fn channels(&self) -> Vec<String> {
        self.store.names()
    }

    /// Sorted snapshot of every registered channel's state
    pub fn statuses(&self) -> Vec<(String, ConnectionState)> {
        self.store.snapshot()
    }

    /// Close one channel's open circuit now; returns whether it was open
    pub async fn reset_circuit(&self, channel: &str) -> bool {
        debug!(%channel, "SubscriptionManager::reset_circuit: called");
        let (reply, done) = oneshot::channel();
        let command = ManagerCommand::ResetCircuit {
            channel: Some(channel.to_string()),
            reply,
        };
        self.call(command, done, "reset_circuit").await.unwrap_or(0) > 0
    }

    /// Close every open circuit now; returns how many were open
    pub async fn reset_all_circuits(&self) -> usize {
        debug!("SubscriptionManager::reset_all_circuits: called");
        let (reply, done) = oneshot::channel();
        let command = ManagerCommand::ResetCircuit { channel: None, reply };
        self.call(command, done, "reset_all_circuits").await.unwrap_or(0)
    }

    /// Receive every manager event emitted after this call
    pub fn events(&self) -> broadcast::Receiver<ManagerEvent> {
        self.events.subscribe()
    }

    pub async fn metrics(&self) -> Result<ManagerMetrics, ManagerError> {
        let (reply, done) = oneshot::channel();
        self.tx
            .send(ManagerCommand::GetMetrics { reply })
            .map_err(|_| ManagerError::Stopped)?;
        done.await.map_err(|_| ManagerError::Stopped)
    }

    /// Unsubscribe everything and stop the manager task
    pub async fn shutdown(&self) {
        debug!("SubscriptionManager::shutdown: called");
        let (reply, done) = oneshot::channel();
        self.call(ManagerCommand::Shutdown { reply }, done, "shutdown").await;
    }

    pub fn is_running(&self) -> bool {
        !self.tx.is_closed()
    }

    async fn call<T>(&self, command: ManagerCommand, done: oneshot::Receiver<T>, op: &str) -> Option<T> {
        if self.tx.send(command).is_err() {
            warn!(op, "Subscription manager has stopped; request dropped");
            return None;
        }
        match done.await {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(op, "Subscription manager stopped before replying");
                None
            }
        }
    }
}
