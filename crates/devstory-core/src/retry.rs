//! Bounded retry with exponential backoff for transient stage errors.

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::domain::{StageError, StageName};
use crate::metrics::METRICS;
use crate::obs;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Maximum number of retries (0 = no retries, run once).
    pub max_retries: u32,
    /// Base delay for exponential backoff between retries (milliseconds).
    pub backoff_base_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            backoff_base_ms: 500,
        }
    }
}

impl RetryPolicy {
    /// Delay before attempt `attempt + 1`: `base * 2^(attempt-1)`.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let factor = 2u64.saturating_pow(attempt.saturating_sub(1));
        Duration::from_millis(self.backoff_base_ms.saturating_mul(factor))
    }
}

/// Final error of a retried operation and how many attempts were made.
#[derive(Debug)]
pub struct RetryExhausted {
    pub error: StageError,
    pub attempts: u32,
}

/// Run `op` until it succeeds, fails with a non-transient error, or the
/// policy's attempts are used up. Returns the value and the attempt count.
pub async fn run_with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    stage: StageName,
    mut op: F,
) -> Result<(T, u32), RetryExhausted>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, StageError>>,
{
    let max_attempts = policy.max_retries + 1;
    let mut attempt = 1;

    loop {
        match op().await {
            Ok(value) => return Ok((value, attempt)),
            Err(error) if error.is_transient() && attempt < max_attempts => {
                let delay = policy.delay_after(attempt);
                obs::emit_stage_retry(stage, attempt, delay.as_millis() as u64, &error);
                METRICS.inc_stage_retries();
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(error) => {
                return Err(RetryExhausted {
                    error,
                    attempts: attempt,
                })
            }
        }
    }
}
