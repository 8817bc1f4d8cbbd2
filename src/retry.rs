//! Retry policy for remote calls
//!
//! Every provider call (embedding API, Qdrant) goes through [`RetryPolicy::run`].
//! What to do after a failure is decided by [`Error::retry_class`]; how long to
//! wait is delegated to a [`BackoffStrategy`].

use crate::config::{EmbeddingConfig, QdrantConfig};
use crate::error::{Error, Result, RetryClass};
use crate::rate_limit::ProviderRateLimiter;
use std::fmt::Debug;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// Delay before retry number `attempt` (1-based)
pub trait BackoffStrategy: Send + Sync + Debug {
    fn delay(&self, attempt: u32) -> Duration;
}

/// Same delay every time
#[derive(Debug, Clone, Copy)]
pub struct FixedBackoff(pub Duration);

impl BackoffStrategy for FixedBackoff {
    fn delay(&self, _attempt: u32) -> Duration {
        self.0
    }
}

/// `step * attempt`, capped at `max`
#[derive(Debug, Clone, Copy)]
pub struct LinearBackoff {
    pub step: Duration,
    pub max: Duration,
}

impl BackoffStrategy for LinearBackoff {
    fn delay(&self, attempt: u32) -> Duration {
        self.step.saturating_mul(attempt.max(1)).min(self.max)
    }
}

/// `base * 2^(attempt-1)`, capped at `max`
#[derive(Debug, Clone, Copy)]
pub struct ExponentialBackoff {
    pub base: Duration,
    pub max: Duration,
}

impl BackoffStrategy for ExponentialBackoff {
    fn delay(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(20);
        self.base.saturating_mul(1u32 << shift).min(self.max)
    }
}

/// Bounded retries with separate budgets for rate limiting and transient failures
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    name: &'static str,
    transient: Arc<dyn BackoffStrategy>,
    rate_limited: Arc<dyn BackoffStrategy>,
    max_transient_retries: u32,
    max_rate_limit_retries: u32,
    /// Ceiling on server-provided `Retry-After` hints
    max_retry_after: Duration,
    limiter: Option<ProviderRateLimiter>,
}

impl RetryPolicy {
    pub fn new(
        name: &'static str,
        transient: Arc<dyn BackoffStrategy>,
        rate_limited: Arc<dyn BackoffStrategy>,
        max_transient_retries: u32,
        max_rate_limit_retries: u32,
    ) -> Self {
        Self {
            name,
            transient,
            max_transient_retries,
            max_rate_limit_retries,
            max_retry_after: rate_limited.delay(u32::MAX),
            rate_limited,
            limiter: None,
        }
    }

    /// Linear backoff for both classes, as tuned for the embedding provider
    pub fn for_embedding(config: &EmbeddingConfig) -> Self {
        Self::new(
            "embedding",
            Arc::new(LinearBackoff {
                step: Duration::from_millis(config.transient_backoff_ms),
                max: Duration::from_millis(config.rate_limit_backoff_max_ms),
            }),
            Arc::new(LinearBackoff {
                step: Duration::from_millis(config.rate_limit_backoff_ms),
                max: Duration::from_millis(config.rate_limit_backoff_max_ms),
            }),
            config.max_retries,
            config.max_rate_limit_retries,
        )
        .with_max_retry_after(Duration::from_millis(config.rate_limit_backoff_max_ms))
    }

    /// Exponential backoff for the vector index
    pub fn for_qdrant(config: &QdrantConfig) -> Self {
        let backoff = Arc::new(ExponentialBackoff {
            base: Duration::from_millis(config.backoff_base_ms),
            max: Duration::from_millis(config.backoff_max_ms),
        });
        Self::new(
            "qdrant",
            backoff.clone(),
            backoff,
            config.max_retries,
            config.max_retries,
        )
        .with_max_retry_after(Duration::from_millis(config.backoff_max_ms))
    }

    /// Cap on how long a server may ask us to wait before the next attempt
    pub fn with_max_retry_after(mut self, max: Duration) -> Self {
        self.max_retry_after = max;
        self
    }

    /// Pace every attempt through `limiter`; rate-limit responses put it on cooldown
    pub fn with_limiter(mut self, limiter: ProviderRateLimiter) -> Self {
        self.limiter = Some(limiter);
        self
    }

    /// Run `op` until it succeeds, fails fatally, or exhausts its retry budget
    pub async fn run<T, F, Fut>(&self, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut transient_retries = 0u32;
        let mut rate_limit_retries = 0u32;

        loop {
            if let Some(limiter) = &self.limiter {
                limiter.wait().await;
            }

            let err = match op().await {
                Ok(value) => return Ok(value),
                Err(e) => e,
            };

            let delay = match err.retry_class() {
                RetryClass::Fatal => return Err(err),
                RetryClass::Transient => {
                    transient_retries += 1;
                    if transient_retries > self.max_transient_retries {
                        return Err(exhausted(self.name, transient_retries, err));
                    }
                    self.transient.delay(transient_retries)
                }
                RetryClass::RateLimited(retry_after) => {
                    rate_limit_retries += 1;
                    if rate_limit_retries > self.max_rate_limit_retries {
                        return Err(exhausted(self.name, rate_limit_retries, err));
                    }
                    let delay = match retry_after {
                        Some(hint) => hint.min(self.max_retry_after),
                        None => self.rate_limited.delay(rate_limit_retries),
                    };
                    if let Some(limiter) = &self.limiter {
                        limiter.cool_down(delay).await;
                    }
                    delay
                }
            };

            warn!(
                provider = self.name,
                error = %err,
                "Retrying in {:?}",
                delay
            );
            tokio::time::sleep(delay).await;
        }
    }
}

fn exhausted(name: &str, attempts: u32, err: Error) -> Error {
    warn!(provider = name, attempts, error = %err, "Giving up after retries");
    err
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn quick_policy(max_transient: u32, max_rate_limited: u32) -> RetryPolicy {
        RetryPolicy::new(
            "test",
            Arc::new(FixedBackoff(Duration::from_millis(1))),
            Arc::new(FixedBackoff(Duration::from_millis(1))),
            max_transient,
            max_rate_limited,
        )
    }

    #[test]
    fn test_linear_backoff_caps() {
        let b = LinearBackoff {
            step: Duration::from_secs(30),
            max: Duration::from_secs(120),
        };
        assert_eq!(b.delay(1), Duration::from_secs(30));
        assert_eq!(b.delay(3), Duration::from_secs(90));
        assert_eq!(b.delay(10), Duration::from_secs(120));
    }

    #[test]
    fn test_exponential_backoff_caps() {
        let b = ExponentialBackoff {
            base: Duration::from_secs(1),
            max: Duration::from_secs(8),
        };
        let delays: Vec<_> = (1..=5).map(|n| b.delay(n).as_secs()).collect();
        assert_eq!(delays, vec![1, 2, 4, 8, 8]);
        assert_eq!(b.delay(u32::MAX), Duration::from_secs(8));
    }

    #[tokio::test]
    async fn test_transient_errors_retry_until_success() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result = quick_policy(3, 0)
            .run(move || async move {
                if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(Error::Transient("503".into()))
                } else {
                    Ok(42)
                }
            })
            .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_fatal_errors_do_not_retry() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result: Result<()> = quick_policy(5, 5)
            .run(move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(Error::Embedding("HTTP 400".into()))
            })
            .await;
        assert!(matches!(result, Err(Error::Embedding(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_budgets_are_separate() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result: Result<()> = quick_policy(1, 3)
            .run(move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(Error::RateLimited {
                    message: "429".into(),
                    retry_after: Some(Duration::from_millis(1)),
                })
            })
            .await;
        assert!(matches!(result, Err(Error::RateLimited { .. })));
        // first attempt plus three rate-limit retries
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_server_retry_after_is_capped() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let policy = quick_policy(0, 2).with_max_retry_after(Duration::from_millis(5));
        let run = policy.run(move || async move {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(Error::RateLimited {
                    message: "429".into(),
                    retry_after: Some(Duration::MAX),
                })
            } else {
                Ok("done")
            }
        });
        let result = tokio::time::timeout(Duration::from_secs(5), run)
            .await
            .expect("retry slept past the cap");
        assert_eq!(result.unwrap(), "done");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_default_cap_follows_rate_limit_backoff() {
        let policy = RetryPolicy::for_embedding(&EmbeddingConfig::default());
        assert_eq!(
            policy.max_retry_after,
            Duration::from_millis(EmbeddingConfig::default().rate_limit_backoff_max_ms)
        );
        assert_eq!(quick_policy(1, 1).max_retry_after, Duration::from_millis(1));
    }
}
