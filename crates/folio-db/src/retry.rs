//! # Transient Failure Retry
//!
//! Bounded exponential backoff around idempotent ledger operations.
//!
//! ## Which Operations Retry
//! ```text
//! ┌────────────────────────────┬─────────┬──────────────────────────────┐
//! │ Operation                  │ Retried │ Why it is safe               │
//! ├────────────────────────────┼─────────┼──────────────────────────────┤
//! │ reads                      │   yes   │ no writes                    │
//! │ cart add / remove / clear  │   yes   │ unique key, delete by key    │
//! │ tier replace_all           │   yes   │ whole table in one tx        │
//! │ create_single              │   yes   │ returns the existing pending │
//! │ request_payment            │   yes   │ recomputed from fresh rows   │
//! │ mark_paid                  │   yes   │ replay surfaces AlreadyPaid  │
//! │ mark_failed / refunded     │   yes   │ compare-and-swap on status   │
//! │ create_bundle              │   no    │ multi-row, caller re-checks  │
//! │ mark_bundle_paid           │   no    │ multi-row, caller re-checks  │
//! │ record_download / append   │   no    │ replay would log twice       │
//! └────────────────────────────┴─────────┴──────────────────────────────┘
//! ```

use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

use crate::error::DbResult;

/// Retry limits for transient store failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,

    /// Delay before the second attempt.
    pub initial_backoff: Duration,

    /// Upper bound on any single delay.
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(50),
            max_backoff: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// A policy that makes exactly one attempt.
    pub fn none() -> Self {
        RetryPolicy {
            max_attempts: 1,
            ..RetryPolicy::default()
        }
    }

    /// Sets the total attempt count (at least 1).
    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    /// Sets the backoff bounds.
    pub fn backoff(mut self, initial: Duration, max: Duration) -> Self {
        self.initial_backoff = initial;
        self.max_backoff = max.max(initial);
        self
    }

    fn create_backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff {
            initial_interval: self.initial_backoff,
            max_interval: self.max_backoff,
            multiplier: 2.0,
            randomization_factor: 0.2,
            // Attempts are bounded by max_attempts, not by elapsed time
            max_elapsed_time: None,
            ..ExponentialBackoff::default()
        }
    }

    /// Runs `op` until it succeeds, fails permanently or attempts run out.
    ///
    /// Only errors with [`DbError::is_transient`](crate::DbError::is_transient)
    /// are retried. The last error is returned when attempts are exhausted.
    pub async fn run<T, F, Fut>(&self, operation: &str, mut op: F) -> DbResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = DbResult<T>>,
    {
        let mut backoff = self.create_backoff();
        let mut attempt = 1;

        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_transient() && attempt < self.max_attempts => {
                    let delay = backoff.next_backoff().unwrap_or(self.max_backoff);
                    warn!(
                        operation,
                        attempt,
                        max_attempts = self.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Transient store failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
