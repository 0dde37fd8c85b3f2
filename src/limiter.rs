//! Self-tuning concurrency gate shared by scan runners.
//!
//! Brute-forcing long-lived sessions can exhaust either the scanner's socket
//! table or the target's connection budget. Rather than a fixed cap, the
//! limiter adjusts its permit count from probe feedback, AIMD-style: sustained
//! well-behaved probes grow it toward `max`, transport failures halve it toward
//! `min`. Updates are batched in windows so a single blip does not whipsaw the
//! permit count.

use std::sync::Mutex;

use tokio::sync::Notify;
use typed_builder::TypedBuilder;

use crate::{
    context::ScanContext,
    error::{Error, Result},
};

/// Tuning knobs for [`AdaptiveLimiter`].
#[derive(Clone, Copy, Debug, TypedBuilder)]
#[non_exhaustive]
pub struct LimiterOptions {
    /// Permit count at startup.
    #[builder(default = 50)]
    pub initial: usize,

    /// Floor the permit count never shrinks below.
    #[builder(default = 10)]
    pub min: usize,

    /// Ceiling the permit count never grows past.
    #[builder(default = 200)]
    pub max: usize,

    /// Consecutive well-behaved probes required before the limit grows by one.
    #[builder(default = 16)]
    pub growth_window: u32,

    /// Consecutive transport failures tolerated before the limit is halved.
    #[builder(default = 4)]
    pub backoff_window: u32,
}

impl Default for LimiterOptions {
    fn default() -> Self {
        Self::builder().build()
    }
}

#[derive(Debug)]
struct State {
    limit: usize,
    in_flight: usize,
    successes: u32,
    failures: u32,
}

/// Concurrency gate with a dynamic permit count.
///
/// `min <= limit <= max` and `in_flight <= limit` hold at every point: a shrink
/// never revokes outstanding permits, it only stops new ones being issued.
#[derive(Debug)]
pub struct AdaptiveLimiter {
    options: LimiterOptions,
    state: Mutex<State>,
    available: Notify,
}

impl Default for AdaptiveLimiter {
    fn default() -> Self {
        Self::new(LimiterOptions::default())
    }
}

impl AdaptiveLimiter {
    /// Creates a limiter. Out-of-order bounds are reconciled rather than
    /// rejected: `min` is raised to at least 1 and `initial` is clamped into
    /// `[min, max]`.
    pub fn new(mut options: LimiterOptions) -> Self {
        options.min = options.min.max(1);
        options.max = options.max.max(options.min);
        options.initial = options.initial.clamp(options.min, options.max);
        options.growth_window = options.growth_window.max(1);
        options.backoff_window = options.backoff_window.max(1);
        Self {
            state: Mutex::new(State {
                limit: options.initial,
                in_flight: 0,
                successes: 0,
                failures: 0,
            }),
            options,
            available: Notify::new(),
        }
    }

    /// Blocks until a permit is available or `ctx` finishes, in which case
    /// `Canceled` is returned. The permit is released when the guard drops.
    pub async fn acquire(&self, ctx: &ScanContext) -> Result<Permit<'_>> {
        loop {
            if ctx.is_done() {
                return Err(Error::canceled());
            }
            // Register interest before re-checking so a release between the
            // check and the await is not lost.
            let available = self.available.notified();
            if self.try_acquire() {
                return Ok(Permit { limiter: self });
            }
            tokio::select! {
                _ = available => {}
                _ = ctx.done() => return Err(Error::canceled()),
            }
        }
    }

    fn try_acquire(&self) -> bool {
        let mut state = self.state.lock().unwrap();
        if state.in_flight < state.limit {
            state.in_flight += 1;
            true
        } else {
            false
        }
    }

    fn release(&self) {
        let mut state = self.state.lock().unwrap();
        state.in_flight = state.in_flight.saturating_sub(1);
        drop(state);
        self.available.notify_one();
    }

    /// Feedback: the last probe reached its target and got an answer, whether
    /// or not the credential was accepted.
    pub fn on_success(&self) {
        let mut state = self.state.lock().unwrap();
        state.failures = 0;
        state.successes += 1;
        if state.successes < self.options.growth_window {
            return;
        }
        state.successes = 0;
        if state.limit < self.options.max {
            state.limit += 1;
            tracing::debug!(limit = state.limit, "limiter grew");
            drop(state);
            self.available.notify_one();
        }
    }

    /// Feedback: the last probe hit a transport failure.
    pub fn on_failure(&self) {
        let mut state = self.state.lock().unwrap();
        state.successes = 0;
        state.failures += 1;
        if state.failures < self.options.backoff_window {
            return;
        }
        state.failures = 0;
        // Never shrink below outstanding permits; they drain on their own.
        let floor = self.options.min.max(state.in_flight);
        let halved = state.limit / 2;
        let next = halved.max(floor);
        if next < state.limit {
            state.limit = next;
            tracing::debug!(limit = state.limit, "limiter backed off");
        }
    }

    /// Current permit count.
    pub fn limit(&self) -> usize {
        self.state.lock().unwrap().limit
    }

    /// Permits currently held.
    pub fn in_flight(&self) -> usize {
        self.state.lock().unwrap().in_flight
    }
}

/// Guard for one held permit; releasing happens on drop.
#[derive(Debug)]
pub struct Permit<'a> {
    limiter: &'a AdaptiveLimiter,
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        self.limiter.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn limiter(initial: usize, min: usize, max: usize) -> AdaptiveLimiter {
        AdaptiveLimiter::new(
            LimiterOptions::builder()
                .initial(initial)
                .min(min)
                .max(max)
                .growth_window(2)
                .backoff_window(2)
                .build(),
        )
    }

    #[tokio::test]
    async fn permits_are_released_on_drop() {
        let limiter = limiter(1, 1, 4);
        let ctx = ScanContext::new();
        let permit = limiter.acquire(&ctx).await.unwrap();
        assert_eq!(limiter.in_flight(), 1);
        drop(permit);
        assert_eq!(limiter.in_flight(), 0);
        assert!(limiter.acquire(&ctx).await.is_ok());
    }

    #[tokio::test]
    async fn acquire_returns_canceled_on_cancelled_context() {
        let limiter = limiter(1, 1, 4);
        let ctx = ScanContext::new();
        let _held = limiter.acquire(&ctx).await.unwrap();
        ctx.cancel();
        let err = limiter.acquire(&ctx).await.unwrap_err();
        assert!(err.is_canceled());
    }

    #[tokio::test]
    async fn waiters_wake_when_a_permit_frees_up() {
        let limiter = std::sync::Arc::new(limiter(1, 1, 4));
        let ctx = ScanContext::with_timeout(Duration::from_secs(5));
        let held = limiter.acquire(&ctx).await.unwrap();

        let waiter = {
            let limiter = limiter.clone();
            let ctx = ctx.clone();
            tokio::spawn(async move { limiter.acquire(&ctx).await.map(|_permit| ()) })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        drop(held);
        waiter.await.unwrap().unwrap();
    }

    #[test]
    fn growth_is_additive_and_capped() {
        let limiter = limiter(4, 2, 5);
        for _ in 0..2 {
            limiter.on_success();
        }
        assert_eq!(limiter.limit(), 5);
        for _ in 0..20 {
            limiter.on_success();
        }
        assert_eq!(limiter.limit(), 5, "never exceeds max");
    }

    #[test]
    fn backoff_is_multiplicative_and_floored() {
        let limiter = limiter(16, 3, 32);
        for _ in 0..2 {
            limiter.on_failure();
        }
        assert_eq!(limiter.limit(), 8);
        for _ in 0..20 {
            limiter.on_failure();
        }
        assert_eq!(limiter.limit(), 3, "never drops below min");
    }

    #[test]
    fn mixed_feedback_does_not_oscillate() {
        let limiter = limiter(16, 2, 32);
        for _ in 0..50 {
            limiter.on_success();
            limiter.on_failure();
        }
        assert_eq!(limiter.limit(), 16, "streak counters reset each other");
    }

    #[tokio::test]
    async fn shrink_never_undercuts_outstanding_permits() {
        let limiter = limiter(8, 1, 8);
        let ctx = ScanContext::new();
        let mut held = Vec::new();
        for _ in 0..6 {
            held.push(limiter.acquire(&ctx).await.unwrap());
        }
        for _ in 0..2 {
            limiter.on_failure();
        }
        assert_eq!(limiter.limit(), 6, "clamped at in-flight, not halved to 4");
        assert!(limiter.in_flight() <= limiter.limit());
    }

    #[test]
    fn nonsensical_bounds_are_reconciled() {
        let limiter = AdaptiveLimiter::new(
            LimiterOptions::builder().initial(500).min(0).max(20).build(),
        );
        assert_eq!(limiter.limit(), 20);
    }
}
