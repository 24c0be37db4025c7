use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::error::FetchError;
use crate::pacing;

type BackoffFn = dyn Fn(u32) -> Duration + Send + Sync;

/// The one retry rule applied around every fetch: `max_retries` extra
/// attempts, each preceded by `backoff(attempt)`.
#[derive(Clone)]
pub struct RetryPolicy {
    max_retries: u32,
    backoff: Arc<BackoffFn>,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, backoff: impl Fn(u32) -> Duration + Send + Sync + 'static) -> Self {
        Self {
            max_retries,
            backoff: Arc::new(backoff),
        }
    }

    /// Jittered exponential backoff from the pacing engine.
    pub fn human(max_retries: u32) -> Self {
        Self::new(max_retries, |attempt| {
            pacing::retry_delay(attempt, &mut rand::thread_rng())
        })
    }

    pub fn immediate(max_retries: u32) -> Self {
        Self::new(max_retries, |_| Duration::ZERO)
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_retries + 1
    }

    /// `attempt` is 1-based: the number of attempts already made.
    pub fn should_retry(&self, error: &FetchError, attempt: u32) -> bool {
        error.is_retryable() && attempt <= self.max_retries
    }

    pub fn delay_for(&self, attempt: u32) -> Duration {
        (self.backoff)(attempt)
    }
}

impl fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_retries", &self.max_retries)
            .finish_non_exhaustive()
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::human(3)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attempt_budget() {
        let policy = RetryPolicy::immediate(3);
        let error = FetchError::Network("reset".to_string());

        assert_eq!(policy.max_attempts(), 4);
        assert!(policy.should_retry(&error, 1));
        assert!(policy.should_retry(&error, 3));
        assert!(!policy.should_retry(&error, 4));
    }

    #[test]
    fn test_filesystem_errors_are_never_retried() {
        let policy = RetryPolicy::immediate(3);
        let error = FetchError::Filesystem("read-only".to_string());
        assert!(!policy.should_retry(&error, 1));
    }

    #[test]
    fn test_custom_backoff_is_used() {
        let policy = RetryPolicy::new(2, |attempt| Duration::from_millis(attempt as u64 * 10));
        assert_eq!(policy.delay_for(1), Duration::from_millis(10));
        assert_eq!(policy.delay_for(2), Duration::from_millis(20));
    }

    #[test]
    fn test_human_backoff_is_capped() {
        let policy = RetryPolicy::human(3);
        for attempt in 1..=20 {
            assert!(policy.delay_for(attempt) <= Duration::from_secs(60));
        }
    }
}
