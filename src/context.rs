//! # Call Context
//!
//! Per-call state threaded through every operation: a cancellation token,
//! an optional deadline and the tracing span that log events attach to.
//!
//! Cancellation is cooperative. Retry loops and the deletion worker pool
//! check the context between units of work; an in-flight request is never
//! aborted.

use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::Span;

/// Context carried by every secret operation
#[derive(Debug, Clone)]
pub struct Context {
    cancel: CancellationToken,
    deadline: Option<Instant>,
    span: Span,
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

impl Context {
    /// Create a context attached to the current span with no deadline
    #[must_use]
    pub fn new() -> Self {
        Self {
            cancel: CancellationToken::new(),
            deadline: None,
            span: Span::current(),
        }
    }

    /// Abort retries and queued work once `timeout` has elapsed
    #[must_use]
    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// Abort retries and queued work at `deadline`
    #[must_use]
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(match self.deadline {
            Some(existing) => existing.min(deadline),
            None => deadline,
        });
        self
    }

    /// Attach log events emitted under this context to `span`
    #[must_use]
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    /// Derive a context that is cancelled with the parent but can also be
    /// cancelled on its own without affecting the parent
    #[must_use]
    pub fn child(&self) -> Self {
        Self {
            cancel: self.cancel.child_token(),
            deadline: self.deadline,
            span: self.span.clone(),
        }
    }

    /// Signal cancellation to this context and its children
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// True once cancelled or past the deadline
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled() || self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// Time left until the deadline, if any
    #[must_use]
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    /// Span that operations under this context log into
    #[must_use]
    pub fn span(&self) -> &Span {
        &self.span
    }

    /// Underlying cancellation token
    #[must_use]
    pub fn token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Sleep for `delay`, returning `false` if the context was cancelled or
    /// the deadline would pass first
    pub async fn sleep(&self, delay: Duration) -> bool {
        if self.is_cancelled() {
            return false;
        }
        if let Some(remaining) = self.remaining() {
            if remaining < delay {
                return false;
            }
        }

        tokio::select! {
            () = self.cancel.cancelled() => false,
            () = tokio::time::sleep(delay) => !self.is_cancelled(),
        }
    }
}
