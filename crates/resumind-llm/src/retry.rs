use std::time::Duration;

use futures::future::BoxFuture;
use tracing::warn;

use resumind_core::config::RetryConfig;
use resumind_core::failure::{Failure, FailureKind, ModelCause};
use resumind_core::traits::{CapabilityResult, Generator};
use resumind_core::types::GenerationRequest;

/// A generator that retries failed HTTP calls with exponential backoff.
///
/// This is transport-level only: it repeats one model call. Re-running a
/// whole step is the workflow engine's retry controller's job.
pub struct RetryingGenerator {
    inner: Box<dyn Generator>,
    retry_config: RetryConfig,
}

impl RetryingGenerator {
    pub fn new(inner: Box<dyn Generator>, retry_config: RetryConfig) -> Self {
        Self {
            inner,
            retry_config,
        }
    }
}

/// Only quota, timeout and unclassified transport errors get another HTTP attempt.
fn is_retryable(e: &Failure) -> bool {
    matches!(
        e.kind,
        FailureKind::Generation(ModelCause::Quota | ModelCause::Timeout | ModelCause::Unknown)
    )
}

/// Exponential backoff capped at `max_ms`, with 0.8x to 1.2x jitter.
pub fn calculate_backoff(attempt: u32, initial_ms: u64, max_ms: u64) -> Duration {
    let ms = initial_ms
        .saturating_mul(2u64.saturating_pow(attempt))
        .min(max_ms);
    // Add jitter: 0.8x to 1.2x
    let jitter = 0.8 + rand::random::<f64>() * 0.4;
    Duration::from_millis((ms as f64 * jitter) as u64)
}

impl Generator for RetryingGenerator {
    fn generate(&self, request: GenerationRequest) -> BoxFuture<'_, CapabilityResult<String>> {
        Box::pin(async move {
            let max_retries = self.retry_config.max_retries;

            let mut attempt = 0;
            loop {
                match self.inner.generate(request.clone()).await {
                    Ok(text) => return Ok(text),
                    Err(e) if is_retryable(&e) && attempt < max_retries => {
                        let backoff = calculate_backoff(
                            attempt,
                            self.retry_config.initial_backoff_ms,
                            self.retry_config.max_backoff_ms,
                        );
                        warn!(
                            attempt = attempt + 1,
                            max_retries,
                            backoff_ms = backoff.as_millis() as u64,
                            error = %e,
                            "Retrying generation request"
                        );
                        tokio::time::sleep(backoff).await;
                        attempt += 1;
                    }
                    Err(e) => return Err(e),
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    struct Flaky {
        calls: Arc<AtomicU32>,
        fail_with: ModelCause,
        failures: u32,
    }

    impl Generator for Flaky {
        fn generate(&self, _request: GenerationRequest) -> BoxFuture<'_, CapabilityResult<String>> {
            Box::pin(async move {
                let n = self.calls.fetch_add(1, Ordering::SeqCst);
                if n < self.failures {
                    Err(Failure::new(FailureKind::Generation(self.fail_with), "boom"))
                } else {
                    Ok("ok".to_string())
                }
            })
        }
    }

    fn fast() -> RetryConfig {
        RetryConfig {
            max_retries: 2,
            initial_backoff_ms: 1,
            max_backoff_ms: 2,
        }
    }

    #[test]
    fn test_backoff_is_capped() {
        let d = calculate_backoff(20, 1000, 30_000);
        assert!(d <= Duration::from_millis(36_000));
        assert!(d >= Duration::from_millis(24_000));
    }

    #[tokio::test]
    async fn test_retries_transient_failures() {
        let calls = Arc::new(AtomicU32::new(0));
        let gen = RetryingGenerator::new(
            Box::new(Flaky {
                calls: calls.clone(),
                fail_with: ModelCause::Timeout,
                failures: 2,
            }),
            fast(),
        );
        let out = gen.generate(GenerationRequest::new("m", 0.0)).await.unwrap();
        assert_eq!(out, "ok");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_does_not_retry_auth() {
        let calls = Arc::new(AtomicU32::new(0));
        let gen = RetryingGenerator::new(
            Box::new(Flaky {
                calls: calls.clone(),
                fail_with: ModelCause::Auth,
                failures: 5,
            }),
            fast(),
        );
        let err = gen.generate(GenerationRequest::new("m", 0.0)).await.unwrap_err();
        assert_eq!(err.kind, FailureKind::Generation(ModelCause::Auth));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_retries() {
        let calls = Arc::new(AtomicU32::new(0));
        let gen = RetryingGenerator::new(
            Box::new(Flaky {
                calls: calls.clone(),
                fail_with: ModelCause::Quota,
                failures: 10,
            }),
            fast(),
        );
        assert!(gen.generate(GenerationRequest::new("m", 0.0)).await.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
