//! Bounded retry with exponential backoff for transient store conflicts.
//!
//! SQLite reports write contention as SQLITE_BUSY (5) or SQLITE_LOCKED (6), or
//! one of their extended codes (e.g. 517 SQLITE_BUSY_SNAPSHOT). Those, and pool
//! acquisition timeouts, are the only failures worth retrying; everything else is
//! returned on the first attempt.

use std::future::Future;
use std::time::Duration;

use sqlx::Error as SqlxError;

/// Default number of retries after the first attempt.
const DEFAULT_MAX_RETRIES: u32 = 5;

/// Configuration for retry behavior.
#[derive(Clone, Debug)]
pub struct RetryConfig {
    /// Maximum number of retry attempts.
    pub max_retries: u32,
    /// Base delay in milliseconds for exponential backoff.
    pub base_delay_ms: u64,
    /// Maximum delay in milliseconds (caps the exponential growth).
    pub max_delay_ms: u64,
    /// Jitter factor (0.0 to 1.0) to add randomness to delays.
    pub jitter_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            base_delay_ms: 50,
            max_delay_ms: 2000,
            jitter_factor: 0.2,
        }
    }
}

impl RetryConfig {
    pub fn new(max_retries: u32, base_delay_ms: u64, max_delay_ms: u64) -> Self {
        Self {
            max_retries,
            base_delay_ms,
            max_delay_ms,
            jitter_factor: 0.2,
        }
    }

    /// Defaults, with `TASKBOARD_MOVE_MAX_RETRIES` (0..=20) overriding the count.
    pub fn from_env() -> Self {
        Self {
            max_retries: utils::env::parsed_or(
                "TASKBOARD_MOVE_MAX_RETRIES",
                DEFAULT_MAX_RETRIES,
                |n| *n <= 20,
            ),
            ..Self::default()
        }
    }

    /// Never retry; the first conflict is surfaced to the caller.
    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Calculate delay for a given attempt using exponential backoff with jitter.
    fn calculate_delay(&self, attempt: u32) -> Duration {
        let base_delay = self
            .base_delay_ms
            .saturating_mul(2u64.saturating_pow(attempt));
        let capped_delay = base_delay.min(self.max_delay_ms);

        // Add jitter to prevent thundering herd
        let jitter = if self.jitter_factor > 0.0 {
            let jitter_range = (capped_delay as f64 * self.jitter_factor) as u64;
            if jitter_range > 0 {
                let now = std::time::SystemTime::now()
                    .duration_since(std::time::UNIX_EPOCH)
                    .unwrap_or_default()
                    .subsec_nanos() as u64;
                now % jitter_range
            } else {
                0
            }
        } else {
            0
        };

        Duration::from_millis(capped_delay + jitter)
    }
}

/// Errors that know whether another attempt could succeed.
pub trait Retryable {
    fn is_retryable(&self) -> bool;
}

impl Retryable for SqlxError {
    fn is_retryable(&self) -> bool {
        is_retryable_error(self)
    }
}

/// Check if a sqlx error is transient contention that should be retried.
///
/// SQLite error codes considered retryable:
/// - 5 = SQLITE_BUSY and its extended codes (261, 517, ...)
/// - 6 = SQLITE_LOCKED and its extended codes (262, ...)
///
/// Pool acquisition timeouts are included: they mean every connection is held by
/// another writer.
pub fn is_retryable_error(e: &SqlxError) -> bool {
    match e {
        SqlxError::PoolTimedOut => true,
        SqlxError::Database(db_err) => db_err
            .code()
            .and_then(|code| code.parse::<u32>().ok())
            .is_some_and(|code| matches!(code & 0xFF, 5 | 6)),
        _ => false,
    }
}

/// Execute an operation with exponential backoff retry.
///
/// The operation is re-run up to `config.max_retries` times while it fails with a
/// retryable error. The last error is returned once retries are exhausted.
///
/// # Example
/// ```ignore
/// use db::retry::{RetryConfig, with_retry};
///
/// let result = with_retry(&RetryConfig::default(), "move_list", || async {
///     service.try_move_list(dragged, target).await
/// }).await?;
/// ```
pub async fn with_retry<F, Fut, T, E>(
    config: &RetryConfig,
    operation_name: &str,
    mut f: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Retryable + std::fmt::Debug,
{
    let mut attempt = 0;

    loop {
        match f().await {
            Ok(result) => {
                if attempt > 0 {
                    tracing::debug!(
                        operation = operation_name,
                        attempts = attempt + 1,
                        "Operation succeeded after retry"
                    );
                }
                return Ok(result);
            }
            Err(e) if e.is_retryable() && attempt < config.max_retries => {
                let delay = config.calculate_delay(attempt);

                tracing::warn!(
                    operation = operation_name,
                    attempt = attempt + 1,
                    max_retries = config.max_retries,
                    delay_ms = delay.as_millis() as u64,
                    error = ?e,
                    "Concurrent modification, retrying with backoff"
                );

                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => {
                if attempt > 0 {
                    tracing::error!(
                        operation = operation_name,
                        attempts = attempt + 1,
                        error = ?e,
                        "Operation failed after all retries"
                    );
                }
                return Err(e);
            }
        }
    }
}
