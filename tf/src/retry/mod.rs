//! Retry/backoff policy for failed subscription attempts
//!
//! The policy is a pure function of the retry count so delay sequences can be
//! asserted exactly in tests. There is no jitter.

mod policy;

pub use policy::{Backoff, BackoffStrategy, MAX_RETRIES_LIMIT, RetryPolicy};
