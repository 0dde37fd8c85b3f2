//! Drives one task's dictionary against its target.
//!
//! The runner is deliberately serial per task: parallelizing one dictionary
//! against one service trips lockout heuristics and buys almost nothing at
//! per-attempt network latencies. Concurrency lives across tasks, bounded by
//! the shared [`AdaptiveLimiter`].

use std::{sync::Arc, time::Duration};

use rand::Rng;
use typed_builder::TypedBuilder;

use crate::{
    cracker::Verdict,
    context::ScanContext,
    dict,
    error::{Error, Result},
    limiter::AdaptiveLimiter,
    registry::Registry,
    task::{BruteResult, Task},
};

/// Tuning knobs for [`Scanner`].
#[derive(Clone, Copy, Debug, TypedBuilder)]
#[non_exhaustive]
pub struct ScannerOptions {
    /// Budget for a single credential attempt, handshake included.
    #[builder(default = Duration::from_secs(3))]
    pub attempt_timeout: Duration,

    /// Pause between attempts; a little jitter is added on top. Keeps a tight
    /// dictionary from spinning a core and from looking like a metronome.
    #[builder(default = Duration::from_millis(10))]
    pub attempt_pause: Duration,

    /// Abandon the target after this many consecutive transport failures.
    /// Disabled by default: a flapping network should not silently shorten
    /// dictionaries.
    #[builder(default)]
    pub give_up_after: Option<u32>,
}

impl Default for ScannerOptions {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// Runs tasks against the registry under the limiter's concurrency gate.
pub struct Scanner {
    registry: Arc<Registry>,
    limiter: Arc<AdaptiveLimiter>,
    options: ScannerOptions,
}

impl Scanner {
    /// A scanner with default options.
    pub fn new(registry: Arc<Registry>, limiter: Arc<AdaptiveLimiter>) -> Self {
        Self::with_options(registry, limiter, ScannerOptions::default())
    }

    /// A scanner with explicit options.
    pub fn with_options(
        registry: Arc<Registry>,
        limiter: Arc<AdaptiveLimiter>,
        options: ScannerOptions,
    ) -> Self {
        Self {
            registry,
            limiter,
            options,
        }
    }

    /// Walks the task's dictionary serially and returns every credential the
    /// target accepted.
    ///
    /// Errors surface only for misuse (`Internal`: unknown service, malformed
    /// port) or cancellation before work could start; per-attempt rejections
    /// and transport failures are absorbed into limiter feedback.
    pub async fn run(&self, ctx: &ScanContext, task: &Task) -> Result<Vec<BruteResult>> {
        let service = task
            .params
            .get_str("service")
            .ok_or_else(|| Error::internal("missing service parameter"))?;
        let cracker = self
            .registry
            .lookup(service)
            .ok_or_else(|| Error::internal(format!("unsupported service {service:?}")))?;
        let port: u16 = task
            .port
            .trim()
            .parse()
            .map_err(|_| Error::internal(format!("invalid port {:?}", task.port)))?;

        let auths = dict::generate(&task.params, cracker.mode());
        let stop_on_success = task.params.get_bool("stop_on_success", true);

        let _permit = self.limiter.acquire(ctx).await?;
        tracing::debug!(
            task = %task.id,
            service,
            host = %task.host,
            port,
            candidates = auths.len(),
            "starting scan"
        );

        let mut results = Vec::new();
        let mut consecutive_failures = 0u32;
        for auth in &auths {
            if ctx.is_done() {
                break;
            }
            let attempt = ctx.attempt(self.options.attempt_timeout);
            let verdict = cracker.check(&attempt, &task.host, port, auth).await;
            attempt.cancel();

            match verdict {
                Verdict::Hit => {
                    tracing::info!(
                        task = %task.id,
                        service,
                        host = %task.host,
                        port,
                        username = auth.username.as_deref().unwrap_or(""),
                        "valid credential found"
                    );
                    results.push(BruteResult {
                        service: service.to_string(),
                        host: task.host.clone(),
                        port,
                        username: auth.username.clone().unwrap_or_default(),
                        password: auth.password.clone().unwrap_or_default(),
                        success: true,
                    });
                    self.limiter.on_success();
                    consecutive_failures = 0;
                    if stop_on_success {
                        break;
                    }
                }
                Verdict::Failed(err) if err.is_connection_failed() => {
                    tracing::trace!(task = %task.id, %err, "attempt failed");
                    self.limiter.on_failure();
                    consecutive_failures += 1;
                    if let Some(limit) = self.options.give_up_after {
                        if consecutive_failures >= limit {
                            tracing::warn!(
                                task = %task.id,
                                host = %task.host,
                                failures = consecutive_failures,
                                "target unreachable, abandoning remaining candidates"
                            );
                            break;
                        }
                    }
                }
                // The service answered; a rejection or even gibberish proves
                // the network is fine.
                Verdict::Rejected | Verdict::Failed(_) => {
                    self.limiter.on_success();
                    consecutive_failures = 0;
                }
            }
            self.pause().await;
        }
        Ok(results)
    }

    async fn pause(&self) {
        let jitter = rand::rng().random_range(0..=5);
        tokio::time::sleep(self.options.attempt_pause + Duration::from_millis(jitter)).await;
    }
}
