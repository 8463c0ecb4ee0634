//! Retry with exponential backoff for notification delivery.
//!
//! One [`RetryPolicy`] is applied uniformly to every transport call made
//! by the coordinator. Only transient errors are retried; the delay
//! doubles after each failure up to `max_delay`, and a server-provided
//! `Retry-After` is honoured when it is longer than the computed delay.

use std::future::Future;
use std::time::Duration;

use crate::transport::TransportError;

/// Tunable parameters for the exponential-backoff strategy.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts per transport call, including the first one.
    pub max_attempts: u32,
    /// Delay before the second attempt.
    pub base_delay: Duration,
    /// Upper bound on the computed delay between attempts.
    pub max_delay: Duration,
    /// Factor by which the delay grows after each failure.
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Calculate the next backoff delay from the current one.
    ///
    /// The result is clamped to [`RetryPolicy::max_delay`].
    pub fn next_delay(&self, current: Duration) -> Duration {
        let next_ms = (current.as_millis() as f64 * self.multiplier) as u64;
        Duration::from_millis(next_ms).min(self.max_delay)
    }
}

/// A transport call that kept failing.
#[derive(Debug, thiserror::Error)]
#[error("delivery failed after {attempts} attempt(s): {source}")]
pub struct DeliveryFailed {
    pub attempts: u32,
    #[source]
    pub source: TransportError,
}

/// Run `op` until it succeeds, fails permanently, or the attempt budget
/// is spent.
pub async fn with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    label: &str,
    mut op: F,
) -> Result<T, DeliveryFailed>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, TransportError>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut delay = policy.base_delay;
    let mut attempt = 0u32;

    loop {
        attempt += 1;
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && attempt < max_attempts => {
                let wait = e.retry_after().map_or(delay, |after| after.max(delay));
                tracing::warn!(
                    label,
                    attempt,
                    delay_ms = wait.as_millis() as u64,
                    error = %e,
                    "Notification delivery attempt failed, retrying"
                );
                tokio::time::sleep(wait).await;
                delay = policy.next_delay(delay);
            }
            Err(e) => {
                return Err(DeliveryFailed {
                    attempts: attempt,
                    source: e,
                })
            }
        }
    }
}
