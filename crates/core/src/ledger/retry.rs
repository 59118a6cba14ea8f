//! Bounded exponential backoff for optimistic-concurrency conflicts.

use std::future::Future;
use std::time::Duration;

use moeda_shared::RetryConfig;

use super::error::LedgerError;
use super::store::LedgerResult;

/// How often and how patiently to retry `StaleVersion` failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Cap on a single delay.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
        }
    }
}

impl RetryPolicy {
    /// A policy that never sleeps, for tests.
    #[must_use]
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    /// Delay after the given failed attempt (1-based).
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1_u32.checked_shl(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

/// Runs `operation` until it stops failing with a retryable error.
///
/// Non-retryable results are returned as-is. Once the attempts run out the
/// call fails with `ConcurrencyExhausted`.
pub async fn retry_stale<T, F, Fut>(
    policy: &RetryPolicy,
    operation: &str,
    mut attempt_fn: F,
) -> LedgerResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = LedgerResult<T>>,
{
    let attempts = policy.max_attempts.max(1);
    for attempt in 1..=attempts {
        match attempt_fn().await {
            Err(err) if err.is_retryable() => {
                if attempt == attempts {
                    break;
                }
                let delay = policy.delay_for(attempt);
                tracing::debug!(operation, attempt, ?delay, error = %err, "Retrying after conflict");
                tokio::time::sleep(delay).await;
            }
            other => return other,
        }
    }

    tracing::warn!(operation, attempts, "Concurrency retries exhausted");
    Err(LedgerError::ConcurrencyExhausted { attempts })
}
