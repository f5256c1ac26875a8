//! In-process scripted platform
//!
//! Records every open and close, and lets callers push status and change
//! events into the newest open feed of a channel. Queued scripts answer
//! `subscribe` calls immediately, which is how tests model a backend that
//! keeps refusing a channel.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tracing::debug;

use super::{ChangeCallback, ChannelStatus, RealtimeChannel, RealtimePlatform, StatusCallback};
use crate::domain::ChangeEvent;

struct Binding {
    table: String,
    filter: Option<String>,
    callback: ChangeCallback,
}

struct Slot {
    id: u64,
    name: String,
    bindings: Vec<Binding>,
    status: Option<StatusCallback>,
    open: bool,
}

#[derive(Default)]
struct Inner {
    next_id: u64,
    slots: Vec<Slot>,
    closed: usize,
    scripts: HashMap<String, VecDeque<ChannelStatus>>,
    auto_subscribe: bool,
}

impl Inner {
    fn slot_mut(&mut self, id: u64) -> Option<&mut Slot> {
        self.slots.iter_mut().find(|s| s.id == id)
    }

    fn latest_open(&self, name: &str) -> Option<&Slot> {
        self.slots.iter().rev().find(|s| s.open && s.name == name)
    }
}

/// Scripted in-memory [`RealtimePlatform`]
#[derive(Clone, Default)]
pub struct MemoryPlatform {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryPlatform {
    /// Feeds stay silent after `subscribe` until told otherwise
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds report `Subscribed` as soon as they start, unless a script says otherwise
    pub fn with_auto_subscribe() -> Self {
        let platform = Self::new();
        platform.lock().auto_subscribe = true;
        platform
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue statuses for `name`; each `subscribe` on that channel consumes one
    pub fn script(&self, name: &str, statuses: impl IntoIterator<Item = ChannelStatus>) {
        debug!(%name, "MemoryPlatform::script: called");
        self.lock()
            .scripts
            .entry(name.to_string())
            .or_default()
            .extend(statuses);
    }

    /// Report `status` on the newest open feed for `name`; false if none is listening
    pub fn emit_status(&self, name: &str, status: ChannelStatus) -> bool {
        debug!(%name, %status, "MemoryPlatform::emit_status: called");
        let callback = {
            let inner = self.lock();
            inner.latest_open(name).and_then(|slot| slot.status.clone())
        };
        match callback {
            Some(callback) => {
                callback(status);
                true
            }
            None => false,
        }
    }

    /// Deliver `event` to the bindings for its table; returns how many callbacks ran
    pub fn emit_change(&self, name: &str, event: ChangeEvent) -> usize {
        debug!(%name, table = %event.table, "MemoryPlatform::emit_change: called");
        let callbacks: Vec<ChangeCallback> = {
            let inner = self.lock();
            inner
                .latest_open(name)
                .map(|slot| {
                    slot.bindings
                        .iter()
                        .filter(|b| b.table == event.table)
                        .map(|b| b.callback.clone())
                        .collect()
                })
                .unwrap_or_default()
        };
        for callback in &callbacks {
            callback(event.clone());
        }
        callbacks.len()
    }

    /// Total `open_channel` calls
    pub fn open_count(&self) -> usize {
        self.lock().slots.len()
    }

    /// `open_channel` calls for one channel name
    pub fn open_count_for(&self, name: &str) -> usize {
        self.lock().slots.iter().filter(|s| s.name == name).count()
    }

    /// Total `close_channel` calls
    pub fn close_count(&self) -> usize {
        self.lock().closed
    }

    /// Whether any feed for `name` is still open
    pub fn is_open(&self, name: &str) -> bool {
        self.lock().latest_open(name).is_some()
    }

    /// Table and filter bindings of the newest open feed for `name`
    pub fn bindings(&self, name: &str) -> Vec<(String, Option<String>)> {
        self.lock()
            .latest_open(name)
            .map(|slot| {
                slot.bindings
                    .iter()
                    .map(|b| (b.table.clone(), b.filter.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[async_trait]
impl RealtimePlatform for MemoryPlatform {
    fn open_channel(&self, name: &str) -> Box<dyn RealtimeChannel> {
        let mut inner = self.lock();
        inner.next_id += 1;
        let id = inner.next_id;
        debug!(%name, id, "MemoryPlatform::open_channel: called");
        inner.slots.push(Slot {
            id,
            name: name.to_string(),
            bindings: Vec::new(),
            status: None,
            open: true,
        });
        Box::new(MemoryChannel {
            id,
            name: name.to_string(),
            platform: self.clone(),
        })
    }

    async fn close_channel(&self, mut channel: Box<dyn RealtimeChannel>) {
        debug!(name = %channel.name(), "MemoryPlatform::close_channel: called");
        channel.unsubscribe();
        self.lock().closed += 1;
    }
}

struct MemoryChannel {
    id: u64,
    name: String,
    platform: MemoryPlatform,
}

impl RealtimeChannel for MemoryChannel {
    fn name(&self) -> &str {
        &self.name
    }

    fn on_change(&mut self, table: &str, filter: Option<&str>, callback: ChangeCallback) {
        if let Some(slot) = self.platform.lock().slot_mut(self.id) {
            slot.bindings.push(Binding {
                table: table.to_string(),
                filter: filter.map(str::to_string),
                callback,
            });
        }
    }

    fn subscribe(&mut self, status: StatusCallback) {
        let initial = {
            let mut inner = self.platform.lock();
            let scripted = inner.scripts.get_mut(&self.name).and_then(VecDeque::pop_front);
            let initial = scripted.or_else(|| inner.auto_subscribe.then_some(ChannelStatus::Subscribed));
            if let Some(slot) = inner.slot_mut(self.id) {
                slot.status = Some(status.clone());
            }
            initial
        };
        debug!(name = %self.name, id = self.id, ?initial, "MemoryChannel::subscribe: called");
        if let Some(initial) = initial {
            status(initial);
        }
    }

    fn unsubscribe(&mut self) {
        if let Some(slot) = self.platform.lock().slot_mut(self.id) {
            slot.open = false;
            slot.status = None;
            slot.bindings.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ChangeKind;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn recorder() -> (StatusCallback, Arc<Mutex<Vec<ChannelStatus>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let callback: StatusCallback = Arc::new(move |status| sink.lock().unwrap().push(status));
        (callback, seen)
    }

    #[test]
    fn test_silent_by_default() {
        let platform = MemoryPlatform::new();
        let mut channel = platform.open_channel("offers");
        let (callback, seen) = recorder();
        channel.subscribe(callback);

        assert!(seen.lock().unwrap().is_empty());
        assert!(platform.emit_status("offers", ChannelStatus::Subscribed));
        assert_eq!(*seen.lock().unwrap(), vec![ChannelStatus::Subscribed]);
    }

    #[test]
    fn test_script_is_consumed_per_subscribe() {
        let platform = MemoryPlatform::with_auto_subscribe();
        platform.script("inbox", [ChannelStatus::ChannelError("denied".into())]);

        let (first_cb, first) = recorder();
        platform.open_channel("inbox").subscribe(first_cb);
        let (second_cb, second) = recorder();
        platform.open_channel("inbox").subscribe(second_cb);

        assert_eq!(*first.lock().unwrap(), vec![ChannelStatus::ChannelError("denied".into())]);
        assert_eq!(*second.lock().unwrap(), vec![ChannelStatus::Subscribed]);
        assert_eq!(platform.open_count_for("inbox"), 2);
    }

    #[tokio::test]
    async fn test_close_stops_delivery() {
        let platform = MemoryPlatform::new();
        let mut channel = platform.open_channel("showings");
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        channel.on_change(
            "showing_requests",
            Some("agent_id=eq.7"),
            Arc::new(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );
        let (callback, _) = recorder();
        channel.subscribe(callback);

        assert_eq!(
            platform.bindings("showings"),
            vec![("showing_requests".to_string(), Some("agent_id=eq.7".to_string()))]
        );

        let event = ChangeEvent::new("showing_requests", ChangeKind::Update, serde_json::json!({"id": 3}));
        assert_eq!(platform.emit_change("showings", event.clone()), 1);
        assert_eq!(platform.emit_change("showings", ChangeEvent::new("other", ChangeKind::Insert, serde_json::json!({}))), 0);

        platform.close_channel(channel).await;
        assert!(!platform.is_open("showings"));
        assert_eq!(platform.close_count(), 1);
        assert_eq!(platform.emit_change("showings", event), 0);
        assert!(!platform.emit_status("showings", ChannelStatus::Closed));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_emit_targets_newest_feed() {
        let platform = MemoryPlatform::new();
        let (old_cb, old) = recorder();
        platform.open_channel("a").subscribe(old_cb);
        let (new_cb, new) = recorder();
        platform.open_channel("a").subscribe(new_cb);

        platform.emit_status("a", ChannelStatus::Closed);
        assert!(old.lock().unwrap().is_empty());
        assert_eq!(*new.lock().unwrap(), vec![ChannelStatus::Closed]);
    }
}
