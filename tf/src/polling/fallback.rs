//! Interval task that refreshes consumers of unhealthy channels

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tracing::{debug, info};

use crate::dispatch::Dispatcher;
use crate::domain::{DataChange, DataChangeHandler, RefreshReason};
use crate::events::ManagerEvent;
use crate::state::StateStore;

/// Handle to a running poll loop; dropping it stops the loop
#[derive(Debug)]
pub struct PollingFallback {
    channels: Vec<String>,
    interval: Duration,
    task: JoinHandle<()>,
}

impl PollingFallback {
    /// Poll a single channel
    pub fn spawn(
        channel: impl Into<String>,
        interval: Duration,
        store: Arc<StateStore>,
        handler: DataChangeHandler,
        dispatcher: Dispatcher,
    ) -> Self {
        Self::spawn_many(vec![channel.into()], interval, store, handler, dispatcher)
    }

    /// Poll several channels with one refresh routine
    ///
    /// Each tick delivers at most one `Refresh`, and only if at least one of
    /// `channels` is not connected. The first tick fires one `interval` after spawn.
    pub fn spawn_many(
        channels: Vec<String>,
        interval: Duration,
        store: Arc<StateStore>,
        handler: DataChangeHandler,
        dispatcher: Dispatcher,
    ) -> Self {
        let interval = interval.max(Duration::from_millis(1));
        debug!(?channels, interval_ms = interval.as_millis() as u64, "PollingFallback::spawn_many: called");

        let watched = channels.clone();
        let task = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;
                poll_once(&watched, &store, &handler, &dispatcher);
            }
        });

        Self {
            channels,
            interval,
            task,
        }
    }

    pub fn channels(&self) -> &[String] {
        &self.channels
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }

    pub fn stop(&self) {
        debug!(channels = ?self.channels, "PollingFallback::stop: called");
        self.task.abort();
    }
}

impl Drop for PollingFallback {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// One tick: refresh if any watched channel is not live; returns whether a refresh was delivered
fn poll_once(channels: &[String], store: &StateStore, handler: &DataChangeHandler, dispatcher: &Dispatcher) -> bool {
    let unhealthy: Vec<&String> = channels.iter().filter(|c| !store.get(c).is_connected()).collect();
    let Some(first) = unhealthy.first() else {
        debug!(?channels, "poll_once: all channels connected");
        return false;
    };

    info!(channels = ?unhealthy, "Polling for changes while live feed is down");
    for channel in &unhealthy {
        dispatcher.events().emit(ManagerEvent::PollRefresh {
            channel: channel.to_string(),
        });
    }
    dispatcher.deliver(first, handler, DataChange::Refresh(RefreshReason::Poll));
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventBus;
    use crate::state::{ConnectionPhase, StateUpdate};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_handler() -> (DataChangeHandler, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let handler: DataChangeHandler = Arc::new(move |change| {
            assert_eq!(change, DataChange::Refresh(RefreshReason::Poll));
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        (handler, calls)
    }

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[test]
    fn test_poll_once_skips_connected() {
        let store = StateStore::new();
        store.update("a", StateUpdate::phase(ConnectionPhase::Connected));
        store.update("b", StateUpdate::phase(ConnectionPhase::Connected));
        let (handler, calls) = counting_handler();
        let dispatcher = Dispatcher::new(EventBus::default());

        assert!(!poll_once(&["a".into(), "b".into()], &store, &handler, &dispatcher));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_poll_once_refreshes_once_for_many_unhealthy() {
        let store = StateStore::new();
        store.update("a", StateUpdate::phase(ConnectionPhase::CircuitOpen));
        store.update("b", StateUpdate::phase(ConnectionPhase::Error));
        let (handler, calls) = counting_handler();
        let bus = EventBus::default();
        let mut rx = bus.subscribe();
        let dispatcher = Dispatcher::new(bus);

        assert!(poll_once(&["a".into(), "b".into()], &store, &handler, &dispatcher));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(rx.recv().await.unwrap().channel(), "a");
        assert_eq!(rx.recv().await.unwrap().channel(), "b");
    }

    #[tokio::test(start_paused = true)]
    async fn test_ticks_only_while_unhealthy() {
        let store = Arc::new(StateStore::new());
        store.update("offers", StateUpdate::phase(ConnectionPhase::Error));
        let (handler, calls) = counting_handler();
        let dispatcher = Dispatcher::new(EventBus::default());

        let poller = PollingFallback::spawn("offers", Duration::from_secs(30), store.clone(), handler, dispatcher);
        settle().await;
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        tokio::time::advance(Duration::from_secs(30)).await;
        settle().await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        store.update("offers", StateUpdate::phase(ConnectionPhase::Connected));
        tokio::time::advance(Duration::from_secs(30)).await;
        settle().await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        assert!(poller.is_running());
        poller.stop();
        settle().await;
        assert!(!poller.is_running());
    }
}
