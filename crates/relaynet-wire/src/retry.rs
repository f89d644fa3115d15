//! Bounded retry for async operations.
//!
//! Used by `Host::open` to ride out peers that are still starting up. The
//! delay grows as `min_delay * 2^attempt` capped at `max_delay`; setting both
//! to the same value gives a fixed delay, which is what dialing uses. The
//! dial policy also waits after its final failure, so a dial that never
//! connects takes `max_attempts * delay` in total.

use relaynet_types::DialConfig;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Configuration for retry behavior.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryConfig {
    /// Maximum number of attempts (including the first try).
    pub max_attempts: u32,
    /// Delay after the first failure, in milliseconds.
    pub min_delay_ms: u64,
    /// Upper bound on any single delay, in milliseconds.
    pub max_delay_ms: u64,
    /// Also sleep after the last failed attempt before giving up.
    pub delay_after_final: bool,
}

impl RetryConfig {
    /// Same delay between every pair of attempts.
    pub fn fixed(max_attempts: u32, delay_ms: u64) -> Self {
        Self {
            max_attempts,
            min_delay_ms: delay_ms,
            max_delay_ms: delay_ms,
            delay_after_final: false,
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        dial_retry_config()
    }
}

/// Result of a retry operation.
#[derive(Debug)]
pub enum RetryOutcome<T, E> {
    Success {
        result: T,
        /// 1 when the first try succeeded.
        attempts: u32,
    },
    Exhausted {
        /// The error from the last attempt.
        last_error: E,
        attempts: u32,
    },
}

// ---------------------------------------------------------------------------
// Backoff computation
// ---------------------------------------------------------------------------

/// Delay to wait after the failure of `attempt` (0-indexed).
pub fn compute_backoff(config: &RetryConfig, attempt: u32) -> Duration {
    let base = config
        .min_delay_ms
        .saturating_mul(1u64.checked_shl(attempt).unwrap_or(u64::MAX));
    Duration::from_millis(base.min(config.max_delay_ms))
}

// ---------------------------------------------------------------------------
// Core retry function
// ---------------------------------------------------------------------------

/// Run `operation` until it succeeds, `should_retry` rejects its error, or
/// `max_attempts` is reached. The final failure is followed by a delay only
/// when [`RetryConfig::delay_after_final`] is set.
pub async fn retry_async<F, Fut, T, E, P>(
    config: &RetryConfig,
    mut operation: F,
    should_retry: P,
) -> RetryOutcome<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: Fn(&E) -> bool,
    E: std::fmt::Display,
{
    let max = config.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        match operation(attempt).await {
            Ok(result) => {
                if attempt > 0 {
                    debug!(attempt = attempt + 1, "retry succeeded");
                }
                return RetryOutcome::Success {
                    result,
                    attempts: attempt + 1,
                };
            }
            Err(err) => {
                if !should_retry(&err) {
                    debug!(attempt = attempt + 1, error = %err, "error is not retryable");
                    return RetryOutcome::Exhausted {
                        last_error: err,
                        attempts: attempt + 1,
                    };
                }
                if attempt + 1 >= max {
                    if config.delay_after_final {
                        tokio::time::sleep(compute_backoff(config, attempt)).await;
                    }
                    warn!(attempts = max, error = %err, "all retry attempts exhausted");
                    return RetryOutcome::Exhausted {
                        last_error: err,
                        attempts: max,
                    };
                }

                let delay = compute_backoff(config, attempt);
                debug!(
                    attempt = attempt + 1,
                    max_attempts = max,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "retrying after error"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Pre-built configs
// ---------------------------------------------------------------------------

impl From<&DialConfig> for RetryConfig {
    fn from(dial: &DialConfig) -> Self {
        Self {
            delay_after_final: true,
            ..Self::fixed(dial.max_attempts, dial.retry_delay_ms)
        }
    }
}

/// Dial policy: 5 attempts, each failure followed by a 1 s wait.
pub fn dial_retry_config() -> RetryConfig {
    RetryConfig::from(&DialConfig::default())
}

// ===========================================================================
// Tests
// ===========================================================================
