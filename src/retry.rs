//! Fixed-delay retry policy for flaky discovery providers

use crate::error::{DiscoveryError, Result};
use backoff::backoff::Backoff;
use serde::{Deserialize, Serialize};
use std::{future::Future, time::Duration};
use tracing::warn;

/// Default number of attempts before a failure becomes terminal
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default delay between attempts
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(2000);

/// Bounds how often a failing operation is retried
///
/// The n-th failure of one activation is retried after `retry_delay` while
/// `n < max_retries`. From then on the failure is still delayed by
/// `retry_delay` and then handed back to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    max_retries: u32,
    retry_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            retry_delay: DEFAULT_RETRY_DELAY,
        }
    }
}

impl RetryPolicy {
    /// Create a new retry policy
    ///
    /// # Errors
    ///
    /// Returns an error if `max_retries` is zero
    pub fn new(max_retries: u32, retry_delay: Duration) -> Result<Self> {
        if max_retries == 0 {
            return Err(DiscoveryError::configuration(
                "max_retries must be greater than 0",
            ));
        }
        Ok(Self {
            max_retries,
            retry_delay,
        })
    }

    /// Get the failure count at which failures become terminal
    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Get the delay applied after every failure
    pub fn retry_delay(&self) -> Duration {
        self.retry_delay
    }

    /// Start a new activation with its own failure counter
    pub fn activate(&self) -> RetryWithDelay {
        RetryWithDelay {
            policy: *self,
            failures: 0,
        }
    }

    /// Run `operation` until it succeeds or the policy gives up
    pub async fn run<T, F, Fut>(&self, what: &str, mut operation: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut retry = self.activate();
        loop {
            let err = match operation().await {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };

            match retry.next_backoff() {
                Some(delay) => {
                    warn!(
                        "{} failed (attempt {}/{}): {}, retrying in {:?}",
                        what,
                        retry.failures(),
                        self.max_retries,
                        err,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                }
                None => {
                    tokio::time::sleep(self.retry_delay).await;
                    return Err(err);
                }
            }
        }
    }
}

/// Failure counter for one activation of a [`RetryPolicy`]
#[derive(Debug, Clone)]
pub struct RetryWithDelay {
    policy: RetryPolicy,
    failures: u32,
}

impl RetryWithDelay {
    /// Number of failures recorded so far
    pub fn failures(&self) -> u32 {
        self.failures
    }

    /// Get the policy this activation follows
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }
}

impl Backoff for RetryWithDelay {
    /// Record a failure; `None` means the failure is terminal
    fn next_backoff(&mut self) -> Option<Duration> {
        self.failures = self.failures.saturating_add(1);
        (self.failures < self.policy.max_retries).then_some(self.policy.retry_delay)
    }

    fn reset(&mut self) {
        self.failures = 0;
    }
}
