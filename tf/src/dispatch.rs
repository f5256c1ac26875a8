//! Guarded delivery of data changes to consumer callbacks
//!
//! Both the live-feed path and the polling fallback deliver through a
//! [`Dispatcher`]. A callback that returns `Err` or panics is logged and
//! reported; it never takes the subscription machinery down with it.

use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;
use tracing::{debug, error, warn};

use crate::domain::{DataChange, DataChangeHandler};
use crate::events::{EventBus, ManagerEvent};

/// Delivery counters shared by every clone of a dispatcher
#[derive(Debug, Default)]
struct Counters {
    delivered: AtomicU64,
    refreshes: AtomicU64,
    failed: AtomicU64,
}

/// Point-in-time copy of the delivery counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DeliveryStats {
    /// Successful callback invocations (live and refresh)
    pub delivered: u64,
    /// Refresh deliveries attempted
    pub refreshes: u64,
    pub failed: u64,
}

/// Invokes consumer callbacks with failure isolation
#[derive(Clone)]
pub struct Dispatcher {
    events: EventBus,
    counters: Arc<Counters>,
}

impl Dispatcher {
    pub fn new(events: EventBus) -> Self {
        Self {
            events,
            counters: Arc::new(Counters::default()),
        }
    }

    /// Invoke `handler` with `change`; returns true if the callback succeeded
    pub fn deliver(&self, channel: &str, handler: &DataChangeHandler, change: DataChange) -> bool {
        debug!(%channel, refresh = change.is_refresh(), "Dispatcher::deliver: called");
        if change.is_refresh() {
            self.counters.refreshes.fetch_add(1, Ordering::Relaxed);
        }

        let failure = match catch_unwind(AssertUnwindSafe(|| handler(change))) {
            Ok(Ok(())) => None,
            Ok(Err(e)) => {
                warn!(%channel, error = %e, "Data change callback failed");
                Some(e.to_string())
            }
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                error!(%channel, panic = %message, "Data change callback panicked");
                Some(format!("panicked: {}", message))
            }
        };

        match failure {
            None => {
                self.counters.delivered.fetch_add(1, Ordering::Relaxed);
                true
            }
            Some(error) => {
                self.counters.failed.fetch_add(1, Ordering::Relaxed);
                self.events.emit(ManagerEvent::CallbackFailed {
                    channel: channel.to_string(),
                    error,
                });
                false
            }
        }
    }

    pub fn stats(&self) -> DeliveryStats {
        DeliveryStats {
            delivered: self.counters.delivered.load(Ordering::Relaxed),
            refreshes: self.counters.refreshes.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
        }
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ChangeEvent, ChangeKind, RefreshReason};
    use std::sync::atomic::AtomicUsize;

    fn live() -> DataChange {
        DataChange::Live(ChangeEvent::new("offers", ChangeKind::Insert, serde_json::json!({"id": 1})))
    }

    #[test]
    fn test_successful_delivery() {
        let dispatcher = Dispatcher::new(EventBus::default());
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let handler: DataChangeHandler = Arc::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        assert!(dispatcher.deliver("offers", &handler, live()));
        assert!(dispatcher.deliver("offers", &handler, DataChange::Refresh(RefreshReason::Poll)));

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        let stats = dispatcher.stats();
        assert_eq!(stats.delivered, 2);
        assert_eq!(stats.refreshes, 1);
        assert_eq!(stats.failed, 0);
    }

    #[tokio::test]
    async fn test_error_is_reported_not_propagated() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();
        let dispatcher = Dispatcher::new(bus);
        let handler: DataChangeHandler = Arc::new(|_| Err(eyre::eyre!("refetch failed")));

        assert!(!dispatcher.deliver("inbox", &handler, live()));
        assert_eq!(dispatcher.stats().failed, 1);

        match rx.recv().await.unwrap() {
            ManagerEvent::CallbackFailed { channel, error } => {
                assert_eq!(channel, "inbox");
                assert!(error.contains("refetch failed"));
            }
            other => panic!("Expected CallbackFailed, got {:?}", other),
        }
    }

    #[test]
    fn test_panic_is_caught_and_later_deliveries_continue() {
        let dispatcher = Dispatcher::new(EventBus::default());
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let handler: DataChangeHandler = Arc::new(move |change| {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                panic!("first delivery explodes");
            }
            assert!(!change.is_refresh());
            Ok(())
        });

        assert!(!dispatcher.deliver("feed", &handler, live()));
        assert!(dispatcher.deliver("feed", &handler, live()));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(dispatcher.stats().failed, 1);
        assert_eq!(dispatcher.stats().delivered, 1);
    }

    #[test]
    fn test_panic_message() {
        assert_eq!(panic_message(&"static"), "static");
        assert_eq!(panic_message(&"owned".to_string()), "owned");
        assert_eq!(panic_message(&42u8), "unknown panic payload");
    }
}
