//! Per-channel circuit breaker

use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

/// Breaker position
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Retries allowed
    Closed,
    /// Retries suspended until the cooldown elapses
    Open,
}

/// Tracks when a channel's circuit opened and how often it has tripped
///
/// Uses `tokio::time::Instant` so paused-clock tests see the cooldown move.
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    cooldown: Duration,
    opened_at: Option<Instant>,
    trips: u64,
}

impl CircuitBreaker {
    pub fn new(cooldown: Duration) -> Self {
        Self {
            cooldown,
            opened_at: None,
            trips: 0,
        }
    }

    pub fn state(&self) -> CircuitState {
        if self.opened_at.is_some() {
            CircuitState::Open
        } else {
            CircuitState::Closed
        }
    }

    pub fn is_open(&self) -> bool {
        self.state() == CircuitState::Open
    }

    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }

    /// Number of times the breaker has opened; doubles as the cooldown timer token
    pub fn trips(&self) -> u64 {
        self.trips
    }

    /// Open the circuit; returns false if it was already open
    pub fn trip(&mut self) -> bool {
        if self.is_open() {
            debug!("CircuitBreaker::trip: already open");
            return false;
        }
        self.opened_at = Some(Instant::now());
        self.trips += 1;
        debug!(trips = self.trips, cooldown_ms = self.cooldown.as_millis() as u64, "CircuitBreaker::trip: opened");
        true
    }

    /// Close the circuit; returns false if it was already closed
    pub fn reset(&mut self) -> bool {
        if self.opened_at.take().is_some() {
            debug!("CircuitBreaker::reset: closed");
            true
        } else {
            false
        }
    }

    /// Time left until the cooldown elapses, if open
    pub fn remaining(&self) -> Option<Duration> {
        self.opened_at
            .map(|opened| self.cooldown.saturating_sub(opened.elapsed()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_starts_closed() {
        let breaker = CircuitBreaker::new(Duration::from_secs(60));
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.trips(), 0);
        assert!(breaker.remaining().is_none());
    }

    #[test]
    fn test_trip_and_reset() {
        let mut breaker = CircuitBreaker::new(Duration::from_secs(60));
        assert!(breaker.trip());
        assert!(!breaker.trip());
        assert!(breaker.is_open());
        assert_eq!(breaker.trips(), 1);

        assert!(breaker.reset());
        assert!(!breaker.reset());
        assert_eq!(breaker.state(), CircuitState::Closed);

        breaker.trip();
        assert_eq!(breaker.trips(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_remaining_counts_down() {
        let mut breaker = CircuitBreaker::new(Duration::from_secs(60));
        breaker.trip();
        assert_eq!(breaker.remaining(), Some(Duration::from_secs(60)));

        tokio::time::advance(Duration::from_secs(45)).await;
        assert_eq!(breaker.remaining(), Some(Duration::from_secs(15)));

        tokio::time::advance(Duration::from_secs(30)).await;
        assert_eq!(breaker.remaining(), Some(Duration::ZERO));
    }
}
