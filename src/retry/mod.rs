//! # Retry
//!
//! Retry combinator used by the policy propagator and the environment
//! importer. The caller supplies the operation, a classifier deciding which
//! failures are worth another attempt, and a [`RetryPolicy`]; the combinator
//! returns a typed [`RetryError`] instead of unwinding across iterations.

mod backoff;

pub use backoff::FibonacciBackoff;

use crate::constants::{DEFAULT_RETRY_ATTEMPTS, DEFAULT_RETRY_BASE_MS, DEFAULT_RETRY_MAX_MS};
use crate::context::Context;
use crate::observability::metrics;
use std::fmt;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

/// Bounded retry schedule
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first one
    pub attempts: u32,
    /// First backoff delay
    pub base: Duration,
    /// Cap for any single delay
    pub max: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: DEFAULT_RETRY_ATTEMPTS,
            base: Duration::from_millis(DEFAULT_RETRY_BASE_MS),
            max: Duration::from_millis(DEFAULT_RETRY_MAX_MS),
        }
    }
}

impl RetryPolicy {
    /// Fresh backoff sequence for this policy
    #[must_use]
    pub fn backoff(&self) -> FibonacciBackoff {
        FibonacciBackoff::new(self.base, self.max)
    }
}

/// Why a retried operation gave up
#[derive(Debug, Error)]
pub enum RetryError<E> {
    /// Classifier rejected the error; no further attempts were made
    #[error("{0}")]
    Fatal(E),
    /// Every attempt failed with a retryable error
    #[error("gave up after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: E },
    /// Context was cancelled between attempts
    #[error("cancelled while retrying")]
    Cancelled,
}

impl<E> RetryError<E> {
    /// Last underlying error, if any attempt ran
    pub fn into_inner(self) -> Option<E> {
        match self {
            RetryError::Fatal(e) | RetryError::Exhausted { last: e, .. } => Some(e),
            RetryError::Cancelled => None,
        }
    }
}

/// Run `op` until it succeeds, fails fatally, exhausts `policy` or `ctx`
/// is cancelled
///
/// `op` receives the 1-based attempt number. Cancellation is checked before
/// every attempt and while sleeping, never during an attempt.
///
/// # Errors
/// Returns [`RetryError`] describing why the loop stopped.
pub async fn retry<T, E, F, Fut, C>(
    ctx: &Context,
    policy: &RetryPolicy,
    operation: &'static str,
    is_retryable: C,
    mut op: F,
) -> Result<T, RetryError<E>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    C: Fn(&E) -> bool,
    E: fmt::Display,
{
    let attempts = policy.attempts.max(1);
    let mut backoff = policy.backoff();
    let mut attempt = 0;

    loop {
        if ctx.is_cancelled() {
            return Err(RetryError::Cancelled);
        }
        attempt += 1;

        let err = match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };

        if !is_retryable(&err) {
            debug!(operation, attempt, error = %err, "non-retryable failure");
            return Err(RetryError::Fatal(err));
        }
        if attempt >= attempts {
            warn!(operation, attempts, error = %err, "retries exhausted");
            return Err(RetryError::Exhausted {
                attempts,
                last: err,
            });
        }

        metrics::increment_retries(operation);
        let delay = backoff.next_backoff();
        warn!(
            operation,
            attempt,
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            error = %err,
            "retryable failure, backing off"
        );
        if !ctx.sleep(delay).await {
            return Err(RetryError::Cancelled);
        }
    }
}
