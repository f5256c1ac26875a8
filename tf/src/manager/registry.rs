//! Channel registry owned by the manager task

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::debug;

use crate::breaker::CircuitBreaker;
use crate::domain::{DataChange, DataChangeHandler, SubscriptionRequest};
use crate::platform::RealtimeChannel;
use crate::polling::PollingFallback;

/// Lets changes through only while their feed is the one attached to the entry
#[derive(Clone)]
pub(crate) struct ChangeGate {
    live: Arc<AtomicU64>,
}

impl ChangeGate {
    pub fn is_open(&self, generation: u64) -> bool {
        self.live.load(Ordering::SeqCst) == generation
    }
}

/// Everything the manager holds for one channel name
pub(crate) struct ChannelEntry {
    pub request: SubscriptionRequest,
    /// Current feed handle; None between attempts and while the circuit is open
    pub feed: Option<Box<dyn RealtimeChannel>>,
    /// Manager-wide generation of the current feed; status from older feeds is stale
    pub generation: u64,
    /// Generation whose live changes reach the consumer; 0 while no feed is held
    live_generation: Arc<AtomicU64>,
    /// Consumer handler shared with the poller so a replacement request keeps its interval
    handler: Arc<RwLock<DataChangeHandler>>,
    /// Incremented for every scheduled retry; older retry timers are ignored
    pub retry_token: u64,
    pub breaker: CircuitBreaker,
    pub retry_timer: Option<JoinHandle<()>>,
    pub cooldown_timer: Option<JoinHandle<()>>,
    pub poller: Option<PollingFallback>,
}

impl ChannelEntry {
    pub fn new(request: SubscriptionRequest, cooldown: Duration) -> Self {
        let handler = Arc::new(RwLock::new(request.on_data_change.clone()));
        Self {
            request,
            feed: None,
            generation: 0,
            live_generation: Arc::new(AtomicU64::new(0)),
            handler,
            retry_token: 0,
            breaker: CircuitBreaker::new(cooldown),
            retry_timer: None,
            cooldown_timer: None,
            poller: None,
        }
    }

    /// Swap in a new request; a running poller picks up its handler on the next tick
    pub fn replace_request(&mut self, request: SubscriptionRequest) {
        *self.handler.write().unwrap_or_else(PoisonError::into_inner) = request.on_data_change.clone();
        self.request = request;
    }

    /// Handler that always forwards to the current request's handler
    pub fn shared_handler(&self) -> DataChangeHandler {
        let slot = self.handler.clone();
        Arc::new(move |change: DataChange| {
            let handler = slot.read().unwrap_or_else(PoisonError::into_inner).clone();
            handler(change)
        })
    }

    /// Store a newly opened feed and let its changes through
    pub fn attach_feed(&mut self, feed: Box<dyn RealtimeChannel>, generation: u64) -> &mut Box<dyn RealtimeChannel> {
        self.generation = generation;
        self.live_generation.store(generation, Ordering::SeqCst);
        self.feed.insert(feed)
    }

    /// Detach the current feed; changes it still emits are dropped
    pub fn take_feed(&mut self) -> Option<Box<dyn RealtimeChannel>> {
        self.live_generation.store(0, Ordering::SeqCst);
        self.feed.take()
    }

    /// Gate for a feed's change callback
    pub fn change_gate(&self) -> ChangeGate {
        ChangeGate {
            live: self.live_generation.clone(),
        }
    }

    pub fn cancel_retry(&mut self) {
        if let Some(timer) = self.retry_timer.take() {
            timer.abort();
        }
    }

    pub fn cancel_cooldown(&mut self) {
        if let Some(timer) = self.cooldown_timer.take() {
            timer.abort();
        }
    }

    /// Abort both timers and the poller
    pub fn cancel_background(&mut self) {
        self.cancel_retry();
        self.cancel_cooldown();
        if let Some(poller) = self.poller.take() {
            poller.stop();
        }
    }
}

impl Drop for ChannelEntry {
    fn drop(&mut self) {
        self.live_generation.store(0, Ordering::SeqCst);
        self.cancel_background();
    }
}

/// Channel entries keyed by logical channel name
#[derive(Default)]
pub(crate) struct ChannelRegistry {
    entries: HashMap<String, ChannelEntry>,
}

impl ChannelRegistry {
    pub fn get(&self, channel: &str) -> Option<&ChannelEntry> {
        self.entries.get(channel)
    }

    pub fn get_mut(&mut self, channel: &str) -> Option<&mut ChannelEntry> {
        self.entries.get_mut(channel)
    }

    pub fn insert(&mut self, channel: String, entry: ChannelEntry) {
        debug!(%channel, "ChannelRegistry::insert: called");
        self.entries.insert(channel, entry);
    }

    pub fn remove(&mut self, channel: &str) -> Option<ChannelEntry> {
        debug!(%channel, "ChannelRegistry::remove: called");
        self.entries.remove(channel)
    }

    /// Registered names, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.entries.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}
