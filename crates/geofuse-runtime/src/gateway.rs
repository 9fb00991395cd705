//! Estimator gateway — timeout, retry with backoff, error normalization.

use std::time::Duration;

use geofuse_core::{GeoCandidate, OrchestrationSettings};
use geofuse_estimators::{Estimator, EstimatorError, ImageRef};
use rand::Rng;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Exponential backoff with jitter for transient failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn from_settings(settings: &OrchestrationSettings) -> Self {
        Self {
            max_retries: settings.max_retries,
            base_delay: settings.retry_base_delay(),
            max_delay: settings.retry_max_delay(),
        }
    }

    pub fn none() -> Self {
        Self {
            max_retries: 0,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    /// Upper bound of the delay before retry number `retry` (0-based):
    /// `base * 2^retry`, capped at `max_delay`.
    pub fn ceiling(&self, retry: u32) -> Duration {
        let factor = 1u32.checked_shl(retry.min(16)).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// Jittered delay in `[ceiling / 2, ceiling]`.
    pub fn backoff(&self, retry: u32) -> Duration {
        let ceiling = self.ceiling(retry);
        let half = ceiling / 2;
        let jitter_ms = half.as_millis() as u64;
        if jitter_ms == 0 {
            return ceiling;
        }
        half + Duration::from_millis(rand::thread_rng().gen_range(0..=jitter_ms))
    }
}

/// Result of one gateway invocation.
#[derive(Debug)]
pub struct GatewayOutcome {
    pub result: Result<Vec<GeoCandidate>, EstimatorError>,
    pub attempts: u32,
    pub elapsed: Duration,
}

/// Uniform wrapper around estimator calls. Holds no mutable state, so one
/// gateway serves every job.
#[derive(Debug, Clone)]
pub struct EstimatorGateway {
    timeout: Duration,
    retry: RetryPolicy,
}

impl EstimatorGateway {
    pub fn new(timeout: Duration, retry: RetryPolicy) -> Self {
        Self { timeout, retry }
    }

    pub fn from_settings(settings: &OrchestrationSettings) -> Self {
        Self::new(settings.estimator_timeout(), RetryPolicy::from_settings(settings))
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    /// Call `estimator`, never running past `deadline`.
    ///
    /// Each attempt gets `min(timeout, deadline - now)`. `Unavailable` and
    /// `RateLimited` are retried while budget remains; `Timeout` and
    /// `InvalidResponse` are returned as they are.
    pub async fn invoke(
        &self,
        estimator: &dyn Estimator,
        image: &ImageRef,
        context: Option<&str>,
        deadline: Instant,
    ) -> GatewayOutcome {
        let start = Instant::now();
        let mut attempts = 0u32;

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return GatewayOutcome {
                    result: Err(EstimatorError::Timeout(start.elapsed().as_millis() as u64)),
                    attempts,
                    elapsed: start.elapsed(),
                };
            }
            let budget = self.timeout.min(remaining);

            let result =
                match tokio::time::timeout(budget, estimator.estimate(image, context)).await {
                    Ok(result) => result,
                    Err(_) => Err(EstimatorError::Timeout(budget.as_millis() as u64)),
                };
            attempts += 1;

            let error = match result {
                Ok(candidates) => {
                    debug!(
                        estimator = estimator.name(),
                        attempts,
                        candidates = candidates.len(),
                        "Estimator succeeded"
                    );
                    return GatewayOutcome {
                        result: Ok(candidates),
                        attempts,
                        elapsed: start.elapsed(),
                    };
                }
                Err(e) => e,
            };

            if error.is_retryable() && attempts <= self.retry.max_retries {
                let delay = self.retry.backoff(attempts - 1);
                let fits = Instant::now()
                    .checked_add(delay)
                    .map_or(false, |resume| resume < deadline);
                if fits {
                    debug!(
                        estimator = estimator.name(),
                        attempt = attempts,
                        delay_ms = delay.as_millis() as u64,
                        "Retrying estimator: {}",
                        error
                    );
                    tokio::time::sleep(delay).await;
                    continue;
                }
            }

            warn!(
                estimator = estimator.name(),
                attempts,
                elapsed_ms = start.elapsed().as_millis() as u64,
                "Estimator failed: {}",
                error
            );
            return GatewayOutcome {
                result: Err(error),
                attempts,
                elapsed: start.elapsed(),
            };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    use async_trait::async_trait;
    use geofuse_core::Source;

    /// Plays back a script of replies, one per call, then repeats the last.
    struct Scripted {
        replies: Mutex<Vec<Result<Vec<GeoCandidate>, EstimatorError>>>,
        calls: AtomicU32,
        delay: Duration,
    }

    impl Scripted {
        fn new(replies: Vec<Result<Vec<GeoCandidate>, EstimatorError>>) -> Self {
            Self {
                replies: Mutex::new(replies),
                calls: AtomicU32::new(0),
                delay: Duration::ZERO,
            }
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Estimator for Scripted {
        fn source(&self) -> Source {
            Source::Visual
        }

        async fn estimate(
            &self,
            _image: &ImageRef,
            _context: Option<&str>,
        ) -> Result<Vec<GeoCandidate>, EstimatorError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            let mut replies = self.replies.lock().unwrap();
            if replies.len() > 1 {
                replies.remove(0)
            } else {
                replies[0].clone()
            }
        }
    }

    fn image() -> ImageRef {
        ImageRef::new(vec![7u8; 16], None)
    }

    fn ok() -> Result<Vec<GeoCandidate>, EstimatorError> {
        Ok(vec![GeoCandidate::new(Source::Visual, 1.0, 2.0, 0.6)])
    }

    fn gateway(max_retries: u32) -> EstimatorGateway {
        EstimatorGateway::new(
            Duration::from_secs(5),
            RetryPolicy {
                max_retries,
                base_delay: Duration::from_millis(100),
                max_delay: Duration::from_millis(1000),
            },
        )
    }

    fn far_deadline() -> Instant {
        Instant::now() + Duration::from_secs(60)
    }

    #[test]
    fn test_backoff_bounds() {
        let policy = RetryPolicy {
            max_retries: 5,
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_millis(2000),
        };
        assert_eq!(policy.ceiling(0), Duration::from_millis(200));
        assert_eq!(policy.ceiling(1), Duration::from_millis(400));
        assert_eq!(policy.ceiling(3), Duration::from_millis(1600));
        assert_eq!(policy.ceiling(4), Duration::from_millis(2000));
        assert_eq!(policy.ceiling(40), Duration::from_millis(2000));
        for retry in 0..6 {
            let d = policy.backoff(retry);
            assert!(d >= policy.ceiling(retry) / 2 && d <= policy.ceiling(retry));
        }
        assert_eq!(RetryPolicy::none().backoff(3), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_first_try() {
        let est = Scripted::new(vec![ok()]);
        let out = gateway(3).invoke(&est, &image(), None, far_deadline()).await;
        assert_eq!(out.result.unwrap().len(), 1);
        assert_eq!(out.attempts, 1);
        assert_eq!(est.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_transient_then_succeeds() {
        let est = Scripted::new(vec![
            Err(EstimatorError::Unavailable("503".into())),
            Err(EstimatorError::RateLimited("429".into())),
            ok(),
        ]);
        let out = gateway(3).invoke(&est, &image(), None, far_deadline()).await;
        assert!(out.result.is_ok());
        assert_eq!(out.attempts, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_bound() {
        let est = Scripted::new(vec![Err(EstimatorError::Unavailable("down".into()))]);
        let out = gateway(2).invoke(&est, &image(), None, far_deadline()).await;
        assert!(matches!(out.result, Err(EstimatorError::Unavailable(_))));
        assert_eq!(out.attempts, 3);
        assert_eq!(est.calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_response_not_retried() {
        let est = Scripted::new(vec![Err(EstimatorError::InvalidResponse("junk".into())), ok()]);
        let out = gateway(3).invoke(&est, &image(), None, far_deadline()).await;
        assert!(matches!(out.result, Err(EstimatorError::InvalidResponse(_))));
        assert_eq!(est.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_not_retried() {
        let mut est = Scripted::new(vec![ok()]);
        est.delay = Duration::from_secs(10);
        let out = gateway(3).invoke(&est, &image(), None, far_deadline()).await;
        assert!(matches!(out.result, Err(EstimatorError::Timeout(5000))));
        assert_eq!(est.calls(), 1);
        assert!(out.elapsed >= Duration::from_secs(5) && out.elapsed < Duration::from_millis(5_010));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_capped_by_deadline() {
        let mut est = Scripted::new(vec![ok()]);
        est.delay = Duration::from_secs(10);
        let deadline = Instant::now() + Duration::from_secs(2);
        let out = gateway(3).invoke(&est, &image(), None, deadline).await;
        assert!(matches!(out.result, Err(EstimatorError::Timeout(2000))));
        assert!(out.elapsed >= Duration::from_secs(2) && out.elapsed < Duration::from_millis(2_010));
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_retry_past_deadline() {
        let est = Scripted::new(vec![Err(EstimatorError::Unavailable("down".into()))]);
        let gateway = EstimatorGateway::new(
            Duration::from_secs(5),
            RetryPolicy {
                max_retries: 3,
                base_delay: Duration::from_secs(10),
                max_delay: Duration::from_secs(10),
            },
        );
        let deadline = Instant::now() + Duration::from_secs(3);
        let out = gateway.invoke(&est, &image(), None, deadline).await;
        assert!(matches!(out.result, Err(EstimatorError::Unavailable(_))));
        assert_eq!(est.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_deadline_is_timeout() {
        let est = Scripted::new(vec![ok()]);
        let out = gateway(3).invoke(&est, &image(), None, Instant::now()).await;
        assert!(matches!(out.result, Err(EstimatorError::Timeout(_))));
        assert_eq!(out.attempts, 0);
        assert_eq!(est.calls(), 0);
    }
}
