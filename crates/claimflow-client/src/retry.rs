//! Retry Logic with Exponential Backoff
//!
//! Transient failures at a component boundary (stream sends, metadata writes)
//! are retried here rather than surfaced to the caller.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────┐
//! │  RetryPolicy                 │
//! │  - max_retries: 5            │
//! │  - initial_backoff: 100ms    │
//! │  - max_backoff: 30s          │
//! │  - backoff_multiplier: 2.0   │
//! └──────┬───────────────────────┘
//!        │
//!        ├─→ Attempt 1: Immediate
//!        ├─→ Attempt 2: Wait 100ms (backoff)
//!        ├─→ Attempt 3: Wait 200ms (backoff * 2)
//!        ├─→ Attempt 4: Wait 400ms (backoff * 4)
//!        └─→ ...       capped at max_backoff
//! ```
//!
//! Whether an error is worth retrying is decided by the [`Retryable`] trait,
//! so the same loop serves stream errors and metadata errors.
//!
//! ## Examples
//!
//! ```ignore
//! use claimflow_client::retry::{retry_with_jittered_backoff, RetryPolicy};
//!
//! let policy = RetryPolicy::default();
//! let offset = retry_with_jittered_backoff(&policy, || transport.send(batch.clone())).await?;
//! ```

use crate::error::ClientError;
use claimflow_metadata::MetadataError;
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

/// Errors that know whether a retry may help.
pub trait Retryable: Display {
    fn is_retryable(&self) -> bool;
}

impl Retryable for ClientError {
    fn is_retryable(&self) -> bool {
        ClientError::is_retryable(self)
    }
}

impl Retryable for MetadataError {
    /// Database failures (busy, I/O, pool exhaustion) are transient; data
    /// errors are not.
    fn is_retryable(&self) -> bool {
        matches!(self, MetadataError::DatabaseError(_))
    }
}

/// Retry policy configuration for exponential backoff.
///
/// # Backoff Calculation
///
/// ```text
/// backoff = min(initial_backoff * multiplier^attempt, max_backoff)
/// ```
///
/// # Examples
///
/// ```ignore
/// // Fast retries for tests
/// let policy = RetryPolicy::new(
///     2,
///     Duration::from_millis(1),
///     Duration::from_millis(10),
///     2.0,
/// );
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of retry attempts
    pub max_retries: usize,

    /// Initial backoff duration
    pub initial_backoff: Duration,

    /// Maximum backoff duration
    pub max_backoff: Duration,

    /// Backoff multiplier for exponential growth
    pub backoff_multiplier: f64,
}

impl Default for RetryPolicy {
    /// 5 retries, 100ms initial backoff doubling up to 30s.
    fn default() -> Self {
        Self {
            max_retries: 5,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(30),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    pub fn new(
        max_retries: usize,
        initial_backoff: Duration,
        max_backoff: Duration,
        backoff_multiplier: f64,
    ) -> Self {
        Self {
            max_retries,
            initial_backoff,
            max_backoff,
            backoff_multiplier,
        }
    }

    /// Backoff before retry number `attempt` (0-indexed).
    pub fn backoff(&self, attempt: usize) -> Duration {
        let backoff_ms =
            self.initial_backoff.as_millis() as f64 * self.backoff_multiplier.powi(attempt as i32);
        let backoff = Duration::from_millis(backoff_ms as u64);
        backoff.min(self.max_backoff)
    }

    /// `backoff(attempt)` scaled by a random factor in `[0.75, 1.25)`.
    pub fn jittered_backoff(&self, attempt: usize) -> Duration {
        let jitter = 0.75 + (rand::random::<f64>() * 0.5);
        Duration::from_millis((self.backoff(attempt).as_millis() as f64 * jitter) as u64)
    }
}

/// Retry an operation with exponential backoff.
///
/// # Behavior
///
/// 1. Try operation
/// 2. If success, return result
/// 3. If error is non-retryable, return error immediately
/// 4. If retries remain, sleep `policy.backoff(attempt)` and try again
/// 5. Otherwise return the last error
pub async fn retry_with_backoff<F, Fut, T, E>(policy: &RetryPolicy, operation: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: Retryable,
{
    retry_inner(policy, operation, false).await
}

/// Retry an operation with jittered exponential backoff.
///
/// Adds ±25% jitter so that many chunk processors retrying after the same
/// outage do not hit the transport in lockstep.
pub async fn retry_with_jittered_backoff<F, Fut, T, E>(
    policy: &RetryPolicy,
    operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: Retryable,
{
    retry_inner(policy, operation, true).await
}

async fn retry_inner<F, Fut, T, E>(policy: &RetryPolicy, mut operation: F, jitter: bool) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: Retryable,
{
    let mut attempt = 0;

    loop {
        match operation().await {
            Ok(result) => {
                if attempt > 0 {
                    debug!(attempt = attempt + 1, "Operation succeeded after retry");
                }
                return Ok(result);
            }
            Err(err) => {
                if !err.is_retryable() {
                    warn!(error = %err, "Non-retryable error, giving up");
                    return Err(err);
                }

                if attempt >= policy.max_retries {
                    warn!(
                        attempt = attempt + 1,
                        max_retries = policy.max_retries,
                        error = %err,
                        "Max retries exhausted, giving up"
                    );
                    return Err(err);
                }

                let backoff = if jitter {
                    policy.jittered_backoff(attempt)
                } else {
                    policy.backoff(attempt)
                };
                warn!(
                    attempt = attempt + 1,
                    max_retries = policy.max_retries,
                    backoff_ms = backoff.as_millis() as u64,
                    error = %err,
                    "Retryable error, backing off"
                );

                sleep(backoff).await;
                attempt += 1;
            }
        }
    }
}
