//! Pure connection state machine
//!
//! ```text
//! Disconnected -> Connecting -> Connected
//! Connecting   -> Error (retry pending) -> Connecting
//! Error        -> CircuitOpen (retries exhausted)
//! CircuitOpen  -> Disconnected (cooldown elapsed or reset, retry count 0)
//! ```
//!
//! [`transition`] maps the current state plus one input to a state update and
//! a list of effects. The manager actor executes the effects; nothing here
//! touches timers or the platform.

use std::time::Duration;

use crate::domain::RefreshReason;
use crate::retry::{Backoff, RetryPolicy};

use super::connection::{ConnectionPhase, ConnectionState, StateUpdate};

/// Something that happened to a channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    /// A subscribe call or a due retry wants a live feed
    Open,
    /// Platform acknowledged the feed
    Subscribed,
    /// Platform reported a channel error
    ChannelError(String),
    /// Platform closed the feed
    Closed,
    /// Cooldown elapsed, or a manual / health-check reset
    CircuitReset,
}

/// Work the manager must do after a transition
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Open a new feed through the platform
    OpenFeed,
    /// A feed is already connected or connecting; nothing to open
    Reuse,
    /// The request is dropped without an attempt
    Skip { reason: String },
    /// Release the current feed handle
    CloseFeed,
    /// Start a retry timer
    ScheduleRetry { attempt: u32, delay: Duration },
    /// Trip the breaker and start the cooldown timer
    OpenCircuit,
    /// Reset the breaker and cancel the cooldown timer
    CloseCircuit,
    /// Attempt a fresh connection if the manager is configured to
    Resubscribe,
    /// Ask the consumer to refetch
    Refresh(RefreshReason),
}

/// Result of [`transition`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Transition {
    pub update: Option<StateUpdate>,
    pub effects: Vec<Effect>,
}

impl Transition {
    fn ignore() -> Self {
        Self::default()
    }

    fn effects(effects: Vec<Effect>) -> Self {
        Self { update: None, effects }
    }

    fn to(update: StateUpdate, effects: Vec<Effect>) -> Self {
        Self {
            update: Some(update),
            effects,
        }
    }

    /// Phase after the transition, given the phase before it
    pub fn next_phase(&self, current: ConnectionPhase) -> ConnectionPhase {
        self.update.as_ref().and_then(|u| u.phase).unwrap_or(current)
    }
}

/// Compute the next state and effects for one input
pub fn transition(state: &ConnectionState, input: Input, policy: &RetryPolicy) -> Transition {
    use ConnectionPhase::*;

    match input {
        Input::Open => match state.phase {
            CircuitOpen => Transition::effects(vec![Effect::Skip {
                reason: "circuit open".to_string(),
            }]),
            Connected | Connecting => Transition::effects(vec![Effect::Reuse]),
            Disconnected | Error => Transition::to(StateUpdate::phase(Connecting), vec![Effect::OpenFeed]),
        },

        Input::Subscribed => match state.phase {
            Connecting => {
                let mut effects = Vec::new();
                if state.retry_count > 0 {
                    effects.push(Effect::Refresh(RefreshReason::Reconnected));
                }
                Transition::to(
                    StateUpdate::phase(Connected).with_retry_count(0).clear_error(),
                    effects,
                )
            }
            _ => Transition::ignore(),
        },

        Input::ChannelError(error) => match state.phase {
            CircuitOpen | Disconnected => Transition::ignore(),
            Connecting | Connected | Error => match policy.next_delay(state.retry_count) {
                Backoff::Retry(delay) => {
                    let attempt = state.retry_count + 1;
                    let mut effects = vec![Effect::CloseFeed, Effect::ScheduleRetry { attempt, delay }];
                    let phase = if policy.is_exhausted(attempt) {
                        effects.push(Effect::OpenCircuit);
                        CircuitOpen
                    } else {
                        Error
                    };
                    Transition::to(
                        StateUpdate::phase(phase).with_retry_count(attempt).with_error(error),
                        effects,
                    )
                }
                Backoff::Exhausted => Transition::to(
                    StateUpdate::phase(CircuitOpen).with_error(error),
                    vec![Effect::CloseFeed, Effect::OpenCircuit],
                ),
            },
        },

        Input::Closed => match state.phase {
            Connected | Connecting => Transition::to(StateUpdate::phase(Disconnected), vec![Effect::CloseFeed]),
            _ => Transition::ignore(),
        },

        Input::CircuitReset => match state.phase {
            CircuitOpen => Transition::to(
                StateUpdate::phase(Disconnected).with_retry_count(0),
                vec![Effect::CloseCircuit, Effect::Resubscribe],
            ),
            _ => Transition::ignore(),
        },
    }
}
