//! Retry policy evaluation for failed step attempts.
//!
//! Stateless: the step runner owns the attempt counter and asks the handler
//! whether another attempt is allowed and how long to wait before it.

use std::time::Duration;

use stepflow_types::workflow::RetryPolicy;

/// Stateless retry handler for workflow step failures.
pub struct RetryHandler;

impl RetryHandler {
    /// Whether a step that just failed attempt `attempt` may run again.
    ///
    /// `attempt` is 1-based (first execution is attempt 1). A step is
    /// attempted at most `max_attempts` times in total.
    pub fn should_retry(policy: &RetryPolicy, attempt: u32) -> bool {
        attempt < policy.max_attempts
    }

    /// Delay before the attempt following `attempt`.
    ///
    /// Linear backoff: `backoff_ms * attempt`.
    pub fn backoff_delay(policy: &RetryPolicy, attempt: u32) -> Duration {
        Duration::from_millis(policy.backoff_ms.saturating_mul(u64::from(attempt)))
    }
}
