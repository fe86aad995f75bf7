//! Bounded retry with exponential backoff and full jitter.
//!
//! Only errors for which [`FetchError::is_retryable`] holds are retried. The
//! loop stops at `max_attempts` or when the next sleep would overrun the
//! `max_elapsed` wall-clock budget, whichever comes first.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::catalog::errors::FetchError;

pub const DEFAULT_MAX_ATTEMPTS: u32 = 10;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub max_elapsed: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(10),
            max_elapsed: Duration::from_secs(120),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, max_elapsed: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            max_elapsed,
            ..Default::default()
        }
    }

    /// Upper bound of the sleep before attempt `attempt + 1` (1-based `attempt`).
    pub fn backoff_ceiling(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(20);
        self.base_delay
            .saturating_mul(1u32 << exp)
            .min(self.max_delay)
    }

    fn jittered_delay(&self, attempt: u32) -> Duration {
        let ceiling = self.backoff_ceiling(attempt).as_millis() as u64;
        Duration::from_millis(rand::thread_rng().gen_range(0..=ceiling))
    }
}

/// Runs `op` until it succeeds, fails with a non-retryable error, or the
/// policy is exhausted. `op` receives the 1-based attempt number.
pub async fn with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    label: &str,
    mut op: F,
) -> Result<T, FetchError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, FetchError>>,
{
    let started = Instant::now();
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;
        let err = match op(attempt).await {
            Ok(value) => {
                if attempt > 1 {
                    debug!("{label}: succeeded on attempt {attempt}");
                }
                return Ok(value);
            }
            Err(e) if !e.is_retryable() => return Err(e),
            Err(e) => e,
        };

        if attempt >= max_attempts {
            return Err(FetchError::RetriesExhausted {
                attempts: attempt,
                last: err.to_string(),
            });
        }

        let delay = policy.jittered_delay(attempt);
        if started.elapsed() + delay > policy.max_elapsed {
            warn!(
                "{label}: retry budget of {}s spent after {attempt} attempts",
                policy.max_elapsed.as_secs()
            );
            return Err(FetchError::RetriesExhausted {
                attempts: attempt,
                last: err.to_string(),
            });
        }

        warn!(
            "{label}: {err}, retrying {} more attempts after {}ms",
            max_attempts - attempt,
            delay.as_millis()
        );
        tokio::time::sleep(delay).await;
    }
}
