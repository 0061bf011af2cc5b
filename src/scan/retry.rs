//! Retry policy and executor for remote calls.
//!
//! Errors classify themselves as fatal or transient at the point of
//! origin. Fatal errors propagate immediately; transient ones retry on an
//! exponential schedule until the attempt budget runs out, and the last
//! error is returned once it does.

use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Classification contract for retried operations.
///
/// Unrecognized failures should report retryable: aborting a whole scan
/// over one unclassified error is the worse failure mode.
pub trait Retryable {
    fn is_retryable(&self) -> bool;
}

/// Exponential backoff parameters applied to every remote call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    #[serde(with = "humantime_serde")]
    pub initial_interval: Duration,
    pub backoff_multiplier: f64,
    #[serde(with = "humantime_serde")]
    pub max_interval: Duration,
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_interval: Duration::from_secs(2),
            backoff_multiplier: 2.0,
            max_interval: Duration::from_secs(60),
            max_attempts: 5,
        }
    }
}

impl RetryPolicy {
    /// Delay after the given failed attempt (1-based): the initial
    /// interval doubled per attempt, capped at `max_interval`.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1) as i32;
        let delay = self.initial_interval.as_secs_f64() * self.backoff_multiplier.powi(exponent);
        Duration::from_secs_f64(delay.min(self.max_interval.as_secs_f64()))
    }
}

/// Run `operation` under `policy`, retrying transient failures.
///
/// `description` names the operation in log lines.
pub async fn execute_with_retry<T, E, F, Fut>(
    policy: &RetryPolicy,
    description: &str,
    mut operation: F,
) -> Result<T, E>
where
    E: Retryable + Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut attempt = 1;
    loop {
        match operation().await {
            Ok(value) => {
                if attempt > 1 {
                    debug!("{description} succeeded on attempt {attempt}");
                }
                return Ok(value);
            }
            Err(error) if !error.is_retryable() => {
                warn!("{description} failed fatally: {error}");
                return Err(error);
            }
            Err(error) if attempt >= policy.max_attempts => {
                warn!("{description} failed after {attempt} attempts: {error}");
                return Err(error);
            }
            Err(error) => {
                let delay = policy.backoff_delay(attempt);
                warn!(
                    "{description} failed on attempt {attempt}/{}: {error}; retrying in {delay:?}",
                    policy.max_attempts
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}
