//! Backoff policy implementation

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Largest accepted `max-retries`
pub const MAX_RETRIES_LIMIT: u32 = 1000;

/// How delays are derived from the retry count
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BackoffStrategy {
    /// Look the delay up in `delays-ms`; the last entry repeats
    #[default]
    Table,
    /// `base-ms * 2^retry_count`
    Exponential,
}

/// Outcome of asking the policy for the next delay
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    /// Wait this long, then reattempt
    Retry(Duration),
    /// No retries left; the circuit breaker takes over
    Exhausted,
}

/// Retry policy configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub strategy: BackoffStrategy,

    /// Retries allowed before the policy reports exhaustion
    #[serde(rename = "max-retries")]
    pub max_retries: u32,

    /// Delay table used by the table strategy
    #[serde(rename = "delays-ms")]
    pub delays_ms: Vec<u64>,

    /// Base delay for the exponential strategy (and for an empty table)
    #[serde(rename = "base-ms")]
    pub base_ms: u64,

    /// Upper bound applied to every computed delay
    #[serde(rename = "max-delay-ms")]
    pub max_delay_ms: Option<u64>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            strategy: BackoffStrategy::Table,
            max_retries: 3,
            delays_ms: vec![2000, 4000, 8000, 16000, 32000],
            base_ms: 2000,
            max_delay_ms: None,
        }
    }
}

impl RetryPolicy {
    /// Table-driven policy
    pub fn table(delays_ms: Vec<u64>, max_retries: u32) -> Self {
        Self {
            strategy: BackoffStrategy::Table,
            max_retries,
            delays_ms,
            ..Default::default()
        }
    }

    /// Exponential policy: `base_ms * 2^retry_count`
    pub fn exponential(base_ms: u64, max_retries: u32) -> Self {
        Self {
            strategy: BackoffStrategy::Exponential,
            max_retries,
            base_ms,
            delays_ms: Vec::new(),
            max_delay_ms: None,
        }
    }

    pub fn with_max_delay(mut self, max_delay_ms: u64) -> Self {
        self.max_delay_ms = Some(max_delay_ms);
        self
    }

    /// Reject settings that would hand out a shrinking or unbounded schedule
    ///
    /// `delays-ms` must be non-decreasing, `max-delay-ms` may not undercut the
    /// first delay, and `max-retries` is bounded by [`MAX_RETRIES_LIMIT`].
    pub fn validate(&self) -> eyre::Result<()> {
        if self.max_retries > MAX_RETRIES_LIMIT {
            eyre::bail!(
                "max-retries {} exceeds the limit of {}",
                self.max_retries,
                MAX_RETRIES_LIMIT
            );
        }

        let decreasing = match self.strategy {
            BackoffStrategy::Table => self.delays_ms.windows(2).find(|pair| pair[0] > pair[1]),
            BackoffStrategy::Exponential => None,
        };
        if let Some(pair) = decreasing {
            eyre::bail!(
                "delays-ms must be non-decreasing, but {} is followed by {}",
                pair[0],
                pair[1]
            );
        }

        if let Some(cap) = self.max_delay_ms {
            let first = self.first_delay_ms();
            if cap < first {
                eyre::bail!("max-delay-ms {} is below the first delay of {} ms", cap, first);
            }
        }

        Ok(())
    }

    fn first_delay_ms(&self) -> u64 {
        match self.strategy {
            BackoffStrategy::Table => self.delays_ms.first().copied().unwrap_or(self.base_ms),
            BackoffStrategy::Exponential => self.base_ms,
        }
    }

    /// True once `retry_count` has used up every allowed retry
    pub fn is_exhausted(&self, retry_count: u32) -> bool {
        retry_count >= self.max_retries
    }

    /// Delay before the retry that follows `retry_count` failed retries (0-indexed)
    pub fn next_delay(&self, retry_count: u32) -> Backoff {
        if self.is_exhausted(retry_count) {
            return Backoff::Exhausted;
        }

        let raw_ms = match self.strategy {
            BackoffStrategy::Table => {
                // largest entry so far; delays never shrink
                let end = (retry_count as usize).saturating_add(1).min(self.delays_ms.len());
                self.delays_ms[..end].iter().copied().max().unwrap_or(self.base_ms)
            }
            BackoffStrategy::Exponential => {
                let factor = 2u64.checked_pow(retry_count).unwrap_or(u64::MAX);
                self.base_ms.saturating_mul(factor)
            }
        };

        let ms = match self.max_delay_ms {
            Some(cap) => raw_ms.min(cap),
            None => raw_ms,
        };

        Backoff::Retry(Duration::from_millis(ms))
    }

    /// Every delay the policy hands out before exhaustion, in order
    pub fn schedule(&self) -> Vec<Duration> {
        (0..self.max_retries)
            .filter_map(|count| match self.next_delay(count) {
                Backoff::Retry(delay) => Some(delay),
                Backoff::Exhausted => None,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn ms(values: &[u64]) -> Vec<Duration> {
        values.iter().map(|v| Duration::from_millis(*v)).collect()
    }

    #[test]
    fn test_default_policy() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.strategy, BackoffStrategy::Table);
        assert_eq!(policy.max_retries, 3);
        assert_eq!(policy.schedule(), ms(&[2000, 4000, 8000]));
    }

    #[test]
    fn test_table_sequence_then_exhausted() {
        let policy = RetryPolicy::table(vec![2000, 4000, 8000], 3);
        assert_eq!(policy.next_delay(0), Backoff::Retry(Duration::from_millis(2000)));
        assert_eq!(policy.next_delay(1), Backoff::Retry(Duration::from_millis(4000)));
        assert_eq!(policy.next_delay(2), Backoff::Retry(Duration::from_millis(8000)));
        assert_eq!(policy.next_delay(3), Backoff::Exhausted);
        assert_eq!(policy.next_delay(10), Backoff::Exhausted);
    }

    #[test]
    fn test_short_table_repeats_last_entry() {
        let policy = RetryPolicy::table(vec![1000, 5000], 4);
        assert_eq!(policy.schedule(), ms(&[1000, 5000, 5000, 5000]));
    }

    #[test]
    fn test_empty_table_uses_base() {
        let policy = RetryPolicy {
            base_ms: 750,
            ..RetryPolicy::table(vec![], 2)
        };
        assert_eq!(policy.schedule(), ms(&[750, 750]));
    }

    #[test]
    fn test_exponential_sequence() {
        let policy = RetryPolicy::exponential(1000, 5);
        assert_eq!(policy.schedule(), ms(&[1000, 2000, 4000, 8000, 16000]));
        assert_eq!(policy.next_delay(5), Backoff::Exhausted);
    }

    #[test]
    fn test_exponential_capped() {
        let policy = RetryPolicy::exponential(1000, 6).with_max_delay(10_000);
        assert_eq!(policy.schedule(), ms(&[1000, 2000, 4000, 8000, 10_000, 10_000]));
    }

    #[test]
    fn test_exponential_saturates() {
        let policy = RetryPolicy::exponential(u64::MAX / 2, 100);
        assert_eq!(policy.next_delay(90), Backoff::Retry(Duration::from_millis(u64::MAX)));
    }

    #[test]
    fn test_zero_retries_is_immediately_exhausted() {
        let policy = RetryPolicy::table(vec![2000], 0);
        assert_eq!(policy.next_delay(0), Backoff::Exhausted);
        assert!(policy.schedule().is_empty());
    }

    #[test]
    fn test_deserialize_policy() {
        let yaml = r#"
strategy: exponential
max-retries: 5
base-ms: 1000
max-delay-ms: 30000
"#;
        let policy: RetryPolicy = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(policy.strategy, BackoffStrategy::Exponential);
        assert_eq!(policy.max_retries, 5);
        assert_eq!(policy.max_delay_ms, Some(30000));
    }

    #[test]
    fn test_unsorted_table_never_shrinks() {
        let policy = RetryPolicy::table(vec![8000, 2000, 1000], 3);
        assert_eq!(policy.schedule(), ms(&[8000, 8000, 8000]));

        let policy = RetryPolicy::table(vec![1000, 4000, 2000, 6000], 5);
        assert_eq!(policy.schedule(), ms(&[1000, 4000, 4000, 6000, 6000]));
    }

    #[test]
    fn test_validate_accepts_defaults() {
        assert!(RetryPolicy::default().validate().is_ok());
        assert!(RetryPolicy::table(vec![1000, 1000, 5000], 3).validate().is_ok());
        assert!(RetryPolicy::exponential(500, 4).with_max_delay(3000).validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_decreasing_table() {
        let err = RetryPolicy::table(vec![8000, 2000, 1000], 3).validate().unwrap_err();
        assert!(err.to_string().contains("non-decreasing"));
    }

    #[test]
    fn test_validate_rejects_cap_below_first_delay() {
        let table = RetryPolicy::table(vec![2000, 4000], 2).with_max_delay(1000);
        assert!(table.validate().unwrap_err().to_string().contains("max-delay-ms"));

        let exponential = RetryPolicy::exponential(5000, 3).with_max_delay(4999);
        assert!(exponential.validate().is_err());
    }

    #[test]
    fn test_validate_bounds_max_retries() {
        assert!(RetryPolicy::exponential(100, MAX_RETRIES_LIMIT).validate().is_ok());
        let err = RetryPolicy::exponential(100, 4_000_000_000).validate().unwrap_err();
        assert!(err.to_string().contains("max-retries"));
    }

    proptest! {
        #[test]
        fn prop_exponential_non_decreasing(base in 1u64..10_000, max_retries in 1u32..20) {
            let schedule = RetryPolicy::exponential(base, max_retries).schedule();
            prop_assert_eq!(schedule.len(), max_retries as usize);
            prop_assert!(schedule.windows(2).all(|w| w[0] <= w[1]));
        }

        #[test]
        fn prop_sorted_table_non_decreasing(mut delays in proptest::collection::vec(1u64..60_000, 1..8), max_retries in 1u32..12) {
            delays.sort_unstable();
            let policy = RetryPolicy::table(delays.clone(), max_retries);
            let schedule = policy.schedule();
            prop_assert!(schedule.windows(2).all(|w| w[0] <= w[1]));
            for (i, delay) in schedule.iter().enumerate() {
                let expected = delays.get(i).copied().unwrap_or(*delays.last().unwrap());
                prop_assert_eq!(*delay, Duration::from_millis(expected));
            }
        }

        #[test]
        fn prop_any_table_non_decreasing(
            delays in proptest::collection::vec(0u64..60_000, 0..8),
            max_retries in 0u32..12,
            cap in proptest::option::of(0u64..60_000),
        ) {
            let mut policy = RetryPolicy::table(delays, max_retries);
            policy.max_delay_ms = cap;
            let schedule = policy.schedule();
            prop_assert_eq!(schedule.len(), max_retries as usize);
            prop_assert!(schedule.windows(2).all(|w| w[0] <= w[1]));
        }

        #[test]
        fn prop_exhausted_exactly_at_max(max_retries in 0u32..50, extra in 0u32..10) {
            let policy = RetryPolicy::exponential(100, max_retries);
            prop_assert_eq!(policy.next_delay(max_retries + extra), Backoff::Exhausted);
            if max_retries > 0 {
                prop_assert!(matches!(policy.next_delay(max_retries - 1), Backoff::Retry(_)));
            }
        }
    }
}
