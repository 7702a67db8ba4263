use backoff::{ExponentialBackoff, ExponentialBackoffBuilder};
use std::time::Duration;

use crate::cryptopay::ProviderError;

/// Retry policy for provider calls: bounded attempts, exponential delay,
/// transient errors only.
pub struct RetryStrategy {
    max_attempts: u32,
}

impl RetryStrategy {
    pub fn new(max_attempts: u32) -> Self {
        Self { max_attempts }
    }

    pub fn create_backoff(&self) -> ExponentialBackoff {
        ExponentialBackoffBuilder::new()
            .with_initial_interval(Duration::from_millis(500))
            .with_max_interval(Duration::from_secs(10))
            .with_multiplier(2.0)
            .with_max_elapsed_time(Some(Duration::from_secs(60)))
            .build()
    }

    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }

    pub fn is_retryable(&self, error: &ProviderError) -> bool {
        error.is_transient()
    }
}
