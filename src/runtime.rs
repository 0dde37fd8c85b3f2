//! Shared plumbing for probe I/O: dialing, TLS, and blocking-client shims.

pub(crate) mod stream;
pub(crate) mod tls;

use crate::{
    context::ScanContext,
    error::{Error, Result},
};

/// Runs a blocking client call on the blocking pool, racing it against context
/// expiry.
///
/// Some drivers are synchronous and cannot observe cancellation. When the
/// context finishes first this returns `ConnectionFailed` immediately and the
/// worker runs to completion on its own schedule, bounded by the driver's
/// internal timeouts, a short-lived resource leak that is acceptable at scan
/// scale. A panic inside the driver is caught at this boundary and reported as
/// a protocol error.
pub(crate) async fn run_blocking<F, T>(ctx: &ScanContext, f: F) -> Result<T>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    let worker = tokio::task::spawn_blocking(f);
    match ctx.timeout(worker).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(join_err)) => Err(Error::protocol(format!("probe worker panicked: {join_err}"))),
        Err(err) if err.is_canceled() => {
            Err(Error::connection_failed("canceled while waiting on a blocking client"))
        }
        Err(err) => Err(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn blocking_calls_complete() {
        let ctx = ScanContext::with_timeout(Duration::from_secs(5));
        let out = run_blocking(&ctx, || 21 * 2).await.unwrap();
        assert_eq!(out, 42);
    }

    #[tokio::test]
    async fn expiry_beats_a_stuck_worker() {
        let ctx = ScanContext::with_timeout(Duration::from_millis(50));
        let err = run_blocking(&ctx, || {
            // Long enough to lose the race, short enough not to stall the
            // runtime's shutdown at the end of the test.
            std::thread::sleep(Duration::from_millis(400));
        })
        .await
        .unwrap_err();
        assert!(err.is_connection_failed());
    }

    #[tokio::test]
    async fn worker_panics_become_protocol_errors() {
        let ctx = ScanContext::with_timeout(Duration::from_secs(5));
        let err = run_blocking(&ctx, || panic!("driver blew up"))
            .await
            .unwrap_err();
        assert!(err.is_protocol());
    }
}
