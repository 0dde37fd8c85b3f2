//! Cooperative cancellation and deadline propagation.
//!
//! A [`ScanContext`] is handed to the runner and threaded down into every probe.
//! It combines an explicit cancellation signal with an optional deadline;
//! child contexts created via [`ScanContext::attempt`] are cancelled whenever
//! their parent is and never outlive the parent's deadline.

use std::{future::Future, time::Duration};

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};

/// The default dial budget for a single connection attempt. Probes cap their
/// dial at the smaller of this and the context's remaining time.
pub(crate) const DIAL_TIMEOUT: Duration = Duration::from_secs(5);

/// Cancellation scope for a scan or a single probe attempt.
#[derive(Clone, Debug)]
pub struct ScanContext {
    cancel: CancellationToken,
    deadline: Option<Instant>,
}

impl Default for ScanContext {
    fn default() -> Self {
        Self::new()
    }
}

impl ScanContext {
    /// Creates a context with no deadline. It completes only when [`cancel`]ed.
    ///
    /// [`cancel`]: ScanContext::cancel
    pub fn new() -> Self {
        Self {
            cancel: CancellationToken::new(),
            deadline: None,
        }
    }

    /// Creates a context that expires `timeout` from now.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            cancel: CancellationToken::new(),
            deadline: Some(Instant::now() + timeout),
        }
    }

    /// Signals cancellation to this context and every child derived from it.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Whether this context has been cancelled or its deadline has passed.
    pub fn is_done(&self) -> bool {
        self.cancel.is_cancelled() || matches!(self.deadline, Some(d) if d <= Instant::now())
    }

    /// Time left until the deadline, or `None` if the context is unbounded.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    /// Derives a child context for a single probe attempt: cancelled when the
    /// parent is, and expiring after `timeout` or at the parent deadline,
    /// whichever comes first.
    pub fn attempt(&self, timeout: Duration) -> ScanContext {
        let deadline = Instant::now() + timeout;
        ScanContext {
            cancel: self.cancel.child_token(),
            deadline: Some(match self.deadline {
                Some(parent) => parent.min(deadline),
                None => deadline,
            }),
        }
    }

    /// The dial budget for a fresh connection under this context.
    pub(crate) fn dial_timeout(&self) -> Duration {
        match self.remaining() {
            Some(remaining) => remaining.min(DIAL_TIMEOUT),
            None => DIAL_TIMEOUT,
        }
    }

    /// Completes when the context is cancelled or its deadline passes.
    pub async fn done(&self) {
        match self.deadline {
            Some(deadline) => {
                tokio::select! {
                    _ = self.cancel.cancelled() => {}
                    _ = tokio::time::sleep_until(deadline) => {}
                }
            }
            None => self.cancel.cancelled().await,
        }
    }

    /// Runs `fut` to completion unless this context finishes first.
    ///
    /// Expiry of the deadline surfaces as a `ConnectionFailed` error, matching
    /// how every probe reports an attempt it could not finish in time; explicit
    /// cancellation surfaces as `Canceled`.
    pub async fn timeout<F: Future>(&self, fut: F) -> Result<F::Output> {
        tokio::pin!(fut);
        match self.deadline {
            Some(deadline) => {
                tokio::select! {
                    out = &mut fut => Ok(out),
                    _ = self.cancel.cancelled() => Err(Error::canceled()),
                    _ = tokio::time::sleep_until(deadline) => {
                        Err(Error::connection_failed("attempt timed out"))
                    }
                }
            }
            None => {
                tokio::select! {
                    out = &mut fut => Ok(out),
                    _ = self.cancel.cancelled() => Err(Error::canceled()),
                }
            }
        }
    }
}
