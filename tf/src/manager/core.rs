//! Subscription manager task
//!
//! One task owns the channel registry, every feed handle and every timer.
//! Consumer requests, platform status callbacks and timer expiries all arrive
//! as [`ManagerCommand`]s on one queue, so transitions for a channel never
//! interleave.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tracing::{debug, info, warn};

use super::config::ManagerConfig;
use super::messages::{ManagerCommand, ManagerMetrics};
use super::registry::{ChannelEntry, ChannelRegistry};
use crate::breaker::HealthMonitor;
use crate::dispatch::Dispatcher;
use crate::domain::{DataChange, SubscriptionRequest};
use crate::events::{ManagerEvent, ResetReason};
use crate::platform::{ChangeCallback, ChannelStatus, RealtimePlatform, StatusCallback};
use crate::polling::PollingFallback;
use crate::state::{ConnectionPhase, Effect, Input, StateStore, StateUpdate, transition};

pub(crate) struct ManagerActor {
    config: ManagerConfig,
    platform: Arc<dyn RealtimePlatform>,
    registry: ChannelRegistry,
    store: Arc<StateStore>,
    dispatcher: Dispatcher,
    health: HealthMonitor,
    /// Weak so that the task stops once every handle is dropped
    tx: mpsc::WeakUnboundedSender<ManagerCommand>,
    /// Last feed generation handed out, across every channel and re-registration
    next_generation: u64,
    metrics: ManagerMetrics,
}

impl ManagerActor {
    pub fn new(
        config: ManagerConfig,
        platform: Arc<dyn RealtimePlatform>,
        store: Arc<StateStore>,
        dispatcher: Dispatcher,
        tx: mpsc::WeakUnboundedSender<ManagerCommand>,
    ) -> Self {
        let health = HealthMonitor::new(config.health_check.clone());
        Self {
            config,
            platform,
            registry: ChannelRegistry::default(),
            store,
            dispatcher,
            health,
            tx,
            next_generation: 0,
            metrics: ManagerMetrics::default(),
        }
    }

    /// Process commands until shutdown or until every handle is gone
    pub async fn run(mut self, mut rx: mpsc::UnboundedReceiver<ManagerCommand>) {
        let health_enabled = self.health.enabled();
        let period = self.health.config().interval();
        let mut health_tick = interval_at(Instant::now() + period, period);
        health_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            cooldown_secs = self.config.cooldown_secs,
            max_retries = self.config.retry.max_retries,
            health_check = health_enabled,
            "Subscription manager started"
        );

        loop {
            tokio::select! {
                command = rx.recv() => match command {
                    Some(ManagerCommand::Shutdown { reply }) => {
                        info!("Subscription manager shutting down");
                        self.unsubscribe_all().await;
                        let _ = reply.send(());
                        break;
                    }
                    Some(command) => self.handle(command).await,
                    None => {
                        debug!("run: all handles dropped");
                        self.unsubscribe_all().await;
                        break;
                    }
                },
                _ = health_tick.tick(), if health_enabled => self.check_health().await,
            }
        }

        info!("Subscription manager stopped");
    }

    async fn handle(&mut self, command: ManagerCommand) {
        match command {
            ManagerCommand::Subscribe { request, reply } => {
                self.subscribe(request).await;
                let _ = reply.send(());
            }
            ManagerCommand::Unsubscribe { channel, reply } => {
                self.unsubscribe(&channel).await;
                let _ = reply.send(());
            }
            ManagerCommand::UnsubscribeAll { reply } => {
                self.unsubscribe_all().await;
                let _ = reply.send(());
            }
            ManagerCommand::ResetCircuit { channel, reply } => {
                let count = match channel {
                    Some(channel) => usize::from(self.reset_circuit(&channel, ResetReason::Manual).await),
                    None => self.reset_open_circuits(ResetReason::Manual).await,
                };
                let _ = reply.send(count);
            }
            ManagerCommand::GetMetrics { reply } => {
                let _ = reply.send(self.metrics());
            }
            ManagerCommand::Shutdown { reply } => {
                // handled in run()
                let _ = reply.send(());
            }
            ManagerCommand::Status {
                channel,
                generation,
                status,
            } => self.on_status(&channel, generation, status).await,
            ManagerCommand::RetryDue { channel, token } => self.on_retry_due(&channel, token).await,
            ManagerCommand::CooldownElapsed { channel, trip } => self.on_cooldown_elapsed(&channel, trip).await,
            ManagerCommand::Reconnect { channel } => self.on_reconnect(&channel).await,
        }
    }

    // === Consumer requests ===

    async fn subscribe(&mut self, request: SubscriptionRequest) {
        let channel = request.channel_name.clone();
        debug!(%channel, table = %request.table, enabled = request.enabled, "subscribe: called");

        if !request.enabled {
            self.unsubscribe(&channel).await;
            return;
        }

        let state = self.store.get(&channel);
        let registered = self.registry.get(&channel).is_some();
        if registered && (state.is_active() || state.circuit_open()) {
            // existing request and handler stay in place
            self.apply(&channel, Input::Open).await;
            return;
        }

        match self.registry.get_mut(&channel) {
            Some(entry) => {
                debug!(%channel, "subscribe: replacing inactive request");
                entry.replace_request(request);
            }
            None => {
                self.registry
                    .insert(channel.clone(), ChannelEntry::new(request, self.config.cooldown()));
                self.store.update(&channel, StateUpdate::phase(ConnectionPhase::Disconnected));
            }
        }
        self.ensure_poller(&channel);

        self.apply(&channel, Input::Open).await;
    }

    /// Start the channel's poller unless one is already ticking
    fn ensure_poller(&mut self, channel: &str) {
        if !self.config.polling_enabled {
            return;
        }
        let Some(entry) = self.registry.get_mut(channel) else {
            return;
        };
        if entry.poller.as_ref().is_some_and(PollingFallback::is_running) {
            debug!(%channel, "ensure_poller: keeping running poller");
            return;
        }
        entry.poller = Some(PollingFallback::spawn(
            channel,
            self.config.poll_interval(),
            self.store.clone(),
            entry.shared_handler(),
            self.dispatcher.clone(),
        ));
    }

    async fn unsubscribe(&mut self, channel: &str) {
        let Some(mut entry) = self.registry.remove(channel) else {
            debug!(%channel, "unsubscribe: not registered");
            return;
        };

        entry.cancel_background();
        if let Some(feed) = entry.take_feed() {
            self.platform.close_channel(feed).await;
            self.metrics.feeds_closed += 1;
        }
        self.store.remove(channel);

        info!(%channel, "Unsubscribed");
        self.dispatcher.events().emit(ManagerEvent::Unsubscribed {
            channel: channel.to_string(),
        });
    }

    async fn unsubscribe_all(&mut self) {
        let names = self.registry.names();
        debug!(count = names.len(), "unsubscribe_all: called");
        for name in names {
            self.unsubscribe(&name).await;
        }
    }

    /// Reset one open breaker; false if the channel is unknown or its circuit is closed
    async fn reset_circuit(&mut self, channel: &str, reason: ResetReason) -> bool {
        if self.registry.get(channel).is_none() || !self.store.get(channel).circuit_open() {
            debug!(%channel, %reason, "reset_circuit: circuit not open");
            return false;
        }

        self.apply(channel, Input::CircuitReset).await;
        self.metrics.circuit_resets += 1;

        info!(%channel, %reason, "Circuit reset");
        self.dispatcher.events().emit(ManagerEvent::CircuitReset {
            channel: channel.to_string(),
            reason,
        });
        true
    }

    async fn reset_open_circuits(&mut self, reason: ResetReason) -> usize {
        let mut count = 0;
        for name in self.registry.names() {
            if self.reset_circuit(&name, reason).await {
                count += 1;
            }
        }
        count
    }

    fn metrics(&self) -> ManagerMetrics {
        let delivery = self.dispatcher.stats();
        ManagerMetrics {
            active_channels: self.registry.len(),
            callbacks_delivered: delivery.delivered,
            refreshes: delivery.refreshes,
            callback_failures: delivery.failed,
            ..self.metrics.clone()
        }
    }

    // === Platform callbacks and timers ===

    async fn on_status(&mut self, channel: &str, generation: u64, status: ChannelStatus) {
        self.metrics.status_events += 1;

        let current = self
            .registry
            .get(channel)
            .is_some_and(|entry| entry.feed.is_some() && entry.generation == generation);
        if !current {
            debug!(%channel, generation, %status, "on_status: ignoring stale status");
            self.metrics.stale_events_ignored += 1;
            return;
        }

        debug!(%channel, generation, %status, "on_status: called");
        let input = match status {
            ChannelStatus::Subscribed => {
                info!(%channel, "Live feed subscribed");
                self.dispatcher.events().emit(ManagerEvent::Subscribed {
                    channel: channel.to_string(),
                });
                Input::Subscribed
            }
            ChannelStatus::ChannelError(error) => {
                let retry_count = self.store.get(channel).retry_count;
                warn!(%channel, %error, retry_count, "Channel error");
                self.dispatcher.events().emit(ManagerEvent::ChannelError {
                    channel: channel.to_string(),
                    error: error.clone(),
                    retry_count,
                });
                Input::ChannelError(error)
            }
            ChannelStatus::Closed => {
                info!(%channel, "Live feed closed");
                self.dispatcher.events().emit(ManagerEvent::Closed {
                    channel: channel.to_string(),
                });
                Input::Closed
            }
        };
        self.apply(channel, input).await;
    }

    async fn on_retry_due(&mut self, channel: &str, token: u64) {
        let Some(entry) = self.registry.get_mut(channel) else {
            return;
        };
        if entry.retry_timer.is_none() || entry.retry_token != token {
            debug!(%channel, token, "on_retry_due: superseded retry");
            return;
        }
        entry.retry_timer = None;

        debug!(%channel, token, "on_retry_due: retrying");
        self.apply(channel, Input::Open).await;
    }

    async fn on_cooldown_elapsed(&mut self, channel: &str, trip: u64) {
        let Some(entry) = self.registry.get_mut(channel) else {
            return;
        };
        if entry.cooldown_timer.is_none() || !entry.breaker.is_open() || entry.breaker.trips() != trip {
            debug!(%channel, trip, "on_cooldown_elapsed: superseded cooldown");
            return;
        }
        entry.cooldown_timer = None;

        self.reset_circuit(channel, ResetReason::Cooldown).await;
    }

    async fn on_reconnect(&mut self, channel: &str) {
        let enabled = self.registry.get(channel).is_some_and(|entry| entry.request.enabled);
        if enabled {
            debug!(%channel, "on_reconnect: reopening after reset");
            self.apply(channel, Input::Open).await;
        }
    }

    async fn check_health(&mut self) {
        let report = self.health.evaluate(&self.store.snapshot());
        if report.should_reset {
            warn!(
                failing = report.failing,
                total = report.total,
                error_rate = report.error_rate,
                "Error rate above threshold, resetting open circuits"
            );
            self.reset_open_circuits(ResetReason::HealthCheck).await;
        }
    }

    // === Transition execution ===

    async fn apply(&mut self, channel: &str, input: Input) {
        let state = self.store.get(channel);
        let transition = transition(&state, input, &self.config.retry);
        if let Some(update) = transition.update {
            self.store.update(channel, update);
        }
        for effect in transition.effects {
            self.execute(channel, effect).await;
        }
    }

    async fn execute(&mut self, channel: &str, effect: Effect) {
        debug!(%channel, ?effect, "execute: called");
        match effect {
            Effect::OpenFeed => self.open_feed(channel).await,
            Effect::Reuse => {
                debug!(%channel, "execute: feed already live or pending");
            }
            Effect::Skip { reason } => {
                info!(%channel, %reason, "Subscribe skipped");
                self.metrics.subscribes_skipped += 1;
                self.dispatcher.events().emit(ManagerEvent::SubscribeSkipped {
                    channel: channel.to_string(),
                    reason,
                });
            }
            Effect::CloseFeed => {
                let feed = self.registry.get_mut(channel).and_then(|entry| entry.take_feed());
                if let Some(feed) = feed {
                    self.platform.close_channel(feed).await;
                    self.metrics.feeds_closed += 1;
                }
            }
            Effect::ScheduleRetry { attempt, delay } => {
                let Some(entry) = self.registry.get_mut(channel) else {
                    return;
                };
                entry.cancel_retry();
                entry.retry_token += 1;
                let token = entry.retry_token;
                entry.retry_timer = Some(schedule(
                    &self.tx,
                    delay,
                    ManagerCommand::RetryDue {
                        channel: channel.to_string(),
                        token,
                    },
                ));
                self.metrics.retries_scheduled += 1;

                info!(%channel, attempt, delay_ms = delay.as_millis() as u64, "Retry scheduled");
                self.dispatcher.events().emit(ManagerEvent::RetryScheduled {
                    channel: channel.to_string(),
                    attempt,
                    delay_ms: delay.as_millis() as u64,
                });
            }
            Effect::OpenCircuit => {
                let Some(entry) = self.registry.get_mut(channel) else {
                    return;
                };
                if !entry.breaker.trip() {
                    return;
                }
                let cooldown = entry.breaker.cooldown();
                entry.cancel_cooldown();
                entry.cooldown_timer = Some(schedule(
                    &self.tx,
                    cooldown,
                    ManagerCommand::CooldownElapsed {
                        channel: channel.to_string(),
                        trip: entry.breaker.trips(),
                    },
                ));
                self.metrics.circuits_opened += 1;

                warn!(%channel, cooldown_secs = cooldown.as_secs(), "Retries exhausted, circuit opened");
                self.dispatcher.events().emit(ManagerEvent::CircuitOpened {
                    channel: channel.to_string(),
                    cooldown_ms: cooldown.as_millis() as u64,
                });
            }
            Effect::CloseCircuit => {
                if let Some(entry) = self.registry.get_mut(channel) {
                    entry.breaker.reset();
                    entry.cancel_cooldown();
                    entry.cancel_retry();
                }
            }
            Effect::Resubscribe => {
                if !self.config.resubscribe_after_cooldown {
                    debug!(%channel, "execute: resubscribe after reset disabled");
                    return;
                }
                if let Some(tx) = self.tx.upgrade() {
                    let _ = tx.send(ManagerCommand::Reconnect {
                        channel: channel.to_string(),
                    });
                }
            }
            Effect::Refresh(reason) => {
                let Some(handler) = self.registry.get(channel).map(|entry| entry.request.on_data_change.clone())
                else {
                    return;
                };
                debug!(%channel, ?reason, "execute: refreshing consumer");
                self.dispatcher.deliver(channel, &handler, DataChange::Refresh(reason));
            }
        }
    }

    async fn open_feed(&mut self, channel: &str) {
        let Some(entry) = self.registry.get_mut(channel) else {
            return;
        };

        if let Some(previous) = entry.take_feed() {
            self.platform.close_channel(previous).await;
            self.metrics.feeds_closed += 1;
        }
        entry.cancel_retry();
        self.next_generation += 1;
        let generation = self.next_generation;

        let mut feed = self.platform.open_channel(channel);

        let handler = entry.request.on_data_change.clone();
        let dispatcher = self.dispatcher.clone();
        let gate = entry.change_gate();
        let name = channel.to_string();
        let on_change: ChangeCallback = Arc::new(move |event| {
            if !gate.is_open(generation) {
                debug!(channel = %name, generation, "on_change: dropping change from superseded feed");
                return;
            }
            dispatcher.deliver(&name, &handler, DataChange::Live(event));
        });
        feed.on_change(&entry.request.table, entry.request.filter.as_deref(), on_change);

        let tx = self.tx.clone();
        let name = channel.to_string();
        let on_status: StatusCallback = Arc::new(move |status| {
            if let Some(tx) = tx.upgrade() {
                let _ = tx.send(ManagerCommand::Status {
                    channel: name.clone(),
                    generation,
                    status,
                });
            }
        });
        entry.attach_feed(feed, generation).subscribe(on_status);
        self.metrics.feeds_opened += 1;

        info!(%channel, generation, "Opened live feed");
        self.dispatcher.events().emit(ManagerEvent::FeedOpened {
            channel: channel.to_string(),
            generation,
        });
    }
}

/// Post `command` back to the manager after `delay`
fn schedule(tx: &mpsc::WeakUnboundedSender<ManagerCommand>, delay: Duration, command: ManagerCommand) -> JoinHandle<()> {
    let tx = tx.clone();
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        if let Some(tx) = tx.upgrade() {
            let _ = tx.send(command);
        }
    })
}
