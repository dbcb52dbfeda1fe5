// fusillade-engine: Retry decorator with exponential backoff

use crate::context::AttemptContext;
use crate::error::{EngineError, EngineResult};
use crate::requester::{AttemptReport, Requester};
use async_trait::async_trait;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Retry policy tuning
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts per logical call (configured retries + 1)
    pub max_attempts: u32,

    pub base: Duration,

    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 1,
            base: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    /// Backoff before the next attempt: base * 2^(attempt-1), capped
    fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base.saturating_mul(factor).min(self.max_delay)
    }
}

/// Re-invokes the inner requester on retryable failures
///
/// Cancellation and deadline errors are never retried; the endpoint
/// binding in the context keeps every attempt on the same endpoint.
pub struct Retry {
    policy: RetryPolicy,
    rng: Mutex<StdRng>,
    inner: Arc<dyn Requester>,
}

impl Retry {
    pub fn new(policy: RetryPolicy, inner: Arc<dyn Requester>) -> Self {
        Self {
            policy,
            rng: Mutex::new(StdRng::from_entropy()),
            inner,
        }
    }

    /// Uniform jitter in [0, backoff/2)
    fn jitter(&self, backoff: Duration) -> Duration {
        let half = backoff.as_millis() as u64 / 2;
        if half == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(self.rng.lock().gen_range(0..half))
    }
}

#[async_trait]
impl Requester for Retry {
    async fn attempt(&self, ctx: &AttemptContext) -> EngineResult<AttemptReport> {
        let mut attempt = 1u32;
        loop {
            match self.inner.attempt(ctx).await {
                Ok(report) => return Ok(report),
                Err(err) if attempt < self.policy.max_attempts && err.is_retryable() => {
                    let base = self.policy.backoff(attempt);
                    let backoff = base + self.jitter(base);
                    debug!(
                        attempt,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %err,
                        "retrying after failure"
                    );
                    tokio::select! {
                        _ = ctx.cancel_token().cancelled() => return Err(EngineError::Cancelled),
                        _ = tokio::time::sleep(backoff) => {}
                    }
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio_util::sync::CancellationToken;

    struct FlakyInner {
        failures_left: AtomicU32,
        calls: AtomicU32,
        error: fn() -> EngineError,
    }

    #[async_trait]
    impl Requester for FlakyInner {
        async fn attempt(&self, _ctx: &AttemptContext) -> EngineResult<AttemptReport> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.failures_left.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                n.checked_sub(1)
            }).is_ok()
            {
                return Err((self.error)());
            }
            Ok(AttemptReport::with_status("200"))
        }
    }

    fn policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
        }
    }

    fn ctx() -> AttemptContext {
        AttemptContext::new(CancellationToken::new(), Duration::from_secs(5))
    }

    #[tokio::test]
    async fn test_retries_503_until_success() {
        let inner = Arc::new(FlakyInner {
            failures_left: AtomicU32::new(2),
            calls: AtomicU32::new(0),
            error: || EngineError::TransportStatus {
                status: 503,
                snippet: String::new(),
            },
        });
        let retry = Retry::new(policy(4), inner.clone());

        let report = retry.attempt(&ctx()).await.unwrap();
        assert_eq!(report.status_bucket, "200");
        assert_eq!(inner.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_exhaustion_surfaces_last_error() {
        let inner = Arc::new(FlakyInner {
            failures_left: AtomicU32::new(10),
            calls: AtomicU32::new(0),
            error: || EngineError::TransportStatus {
                status: 500,
                snippet: String::new(),
            },
        });
        let retry = Retry::new(policy(3), inner.clone());

        let err = retry.attempt(&ctx()).await.unwrap_err();
        assert!(matches!(err, EngineError::TransportStatus { status: 500, .. }));
        assert_eq!(inner.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_non_retryable_fails_fast() {
        let inner = Arc::new(FlakyInner {
            failures_left: AtomicU32::new(10),
            calls: AtomicU32::new(0),
            error: || EngineError::TransportStatus {
                status: 404,
                snippet: String::new(),
            },
        });
        let retry = Retry::new(policy(5), inner.clone());

        assert!(retry.attempt(&ctx()).await.is_err());
        assert_eq!(inner.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_deadline_not_retried() {
        let inner = Arc::new(FlakyInner {
            failures_left: AtomicU32::new(10),
            calls: AtomicU32::new(0),
            error: || EngineError::DeadlineExceeded,
        });
        let retry = Retry::new(policy(5), inner.clone());

        assert!(retry.attempt(&ctx()).await.is_err());
        assert_eq!(inner.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 10,
            base: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
        };
        assert_eq!(policy.backoff(1), Duration::from_millis(100));
        assert_eq!(policy.backoff(2), Duration::from_millis(200));
        assert_eq!(policy.backoff(3), Duration::from_millis(400));
        assert_eq!(policy.backoff(9), Duration::from_secs(5));
    }
}
