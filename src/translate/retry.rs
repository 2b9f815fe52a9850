//! Retries with exponential backoff and a backoff floor shared by all workers.
//!
//! A burst of 429 responses across workers raises the shared floor so that every
//! worker slows down together; successes let it decay again.

use parking_lot::Mutex;
use rand::Rng;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::RetryConfig;
use crate::error::TranslationError;

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub jitter: f64,
    pub cluster_window: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: config.base_delay(),
            max_delay: config.max_delay(),
            jitter: config.jitter.clamp(0.0, 0.99),
            cluster_window: config.cluster_window(),
        }
    }

    /// Backoff before attempt `failed_attempts + 1`, without the shared floor.
    fn exponential_delay(&self, failed_attempts: u32) -> Duration {
        let exponent = failed_attempts.saturating_sub(1).min(16);
        let raw = self.base_delay.as_secs_f64() * 2f64.powi(exponent as i32);
        let factor = if self.jitter > 0.0 {
            rand::thread_rng().gen_range(1.0 - self.jitter..=1.0 + self.jitter)
        } else {
            1.0
        };
        Duration::from_secs_f64(raw * factor).min(self.max_delay)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

/// Backpressure state shared by all workers of a run.
#[derive(Debug, Default)]
pub struct BackoffState {
    pub floor: Duration,
    pub resume_at: Option<Instant>,
    pub last_rate_limited: Option<Instant>,
}

/// Outcome of a call that eventually succeeded.
#[derive(Debug, Clone, PartialEq)]
pub struct Retried<T> {
    pub value: T,
    pub attempts: u32,
    /// Delays slept before attempts 2..=attempts
    pub delays: Vec<Duration>,
}

#[derive(Clone)]
pub struct RetryCoordinator {
    policy: RetryPolicy,
    state: Arc<Mutex<BackoffState>>,
    cancel: CancellationToken,
}

impl RetryCoordinator {
    pub fn new(policy: RetryPolicy, cancel: CancellationToken) -> Self {
        Self {
            policy,
            state: Arc::new(Mutex::new(BackoffState::default())),
            cancel,
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Current shared backoff floor.
    pub fn floor(&self) -> Duration {
        self.state.lock().floor
    }

    /// Run `op` until it succeeds, fails terminally, or runs out of attempts.
    pub async fn with_retry<T, F, Fut>(
        &self,
        label: &str,
        mut op: F,
    ) -> Result<Retried<T>, TranslationError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, TranslationError>>,
    {
        let mut delays = Vec::new();
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            self.wait_for_resume().await?;
            if self.cancel.is_cancelled() {
                return Err(TranslationError::Cancelled);
            }

            let err = match op().await {
                Ok(value) => {
                    self.record_success();
                    return Ok(Retried {
                        value,
                        attempts: attempt,
                        delays,
                    });
                }
                Err(err) => err,
            };

            if !err.is_retryable() {
                debug!(label, attempt, "Not retrying: {}", err);
                return Err(err);
            }
            if attempt >= self.policy.max_attempts {
                warn!(label, attempts = attempt, "Giving up: {}", err);
                return Err(TranslationError::RetriesExhausted {
                    attempts: attempt,
                    last: Box::new(err),
                });
            }

            let delay = self.next_delay(attempt, &err);
            debug!(
                label,
                attempt,
                delay_ms = delay.as_millis() as u64,
                rate_limited = err.is_rate_limited(),
                "Retrying after error: {}",
                err
            );
            delays.push(delay);
            self.sleep(delay).await?;
        }
    }

    /// Compute the delay after a failed attempt and update the shared state.
    fn next_delay(&self, failed_attempts: u32, err: &TranslationError) -> Duration {
        let mut delay = self.policy.exponential_delay(failed_attempts);
        let now = Instant::now();
        let mut state = self.state.lock();

        if let TranslationError::RateLimited { retry_after } = err {
            let clustered = state
                .last_rate_limited
                .is_some_and(|last| now.duration_since(last) <= self.policy.cluster_window);
            state.floor = if clustered && !state.floor.is_zero() {
                (state.floor * 2).min(self.policy.max_delay)
            } else {
                state.floor.max(self.policy.base_delay)
            };
            state.last_rate_limited = Some(now);

            let pause_until = now + state.floor;
            state.resume_at = Some(state.resume_at.map_or(pause_until, |at| at.max(pause_until)));

            if let Some(hint) = retry_after {
                delay = delay.max(*hint);
            }
        }

        delay.max(state.floor)
    }

    fn record_success(&self) {
        let mut state = self.state.lock();
        if state.floor.is_zero() {
            return;
        }
        let halved = state.floor / 2;
        state.floor = if halved < self.policy.base_delay / 2 {
            Duration::ZERO
        } else {
            halved
        };
    }

    /// Honor a shared pause raised by another worker's 429.
    async fn wait_for_resume(&self) -> Result<(), TranslationError> {
        let resume_at = self.state.lock().resume_at;
        match resume_at {
            Some(at) if at > Instant::now() => {
                tokio::select! {
                    _ = self.cancel.cancelled() => Err(TranslationError::Cancelled),
                    _ = tokio::time::sleep_until(at) => Ok(()),
                }
            }
            _ => Ok(()),
        }
    }

    async fn sleep(&self, delay: Duration) -> Result<(), TranslationError> {
        tokio::select! {
            _ = self.cancel.cancelled() => Err(TranslationError::Cancelled),
            _ = tokio::time::sleep(delay) => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::translate::{MockTranslationBackend, TranslationBackend, TranslationRequest};
    use std::sync::atomic::{AtomicU32, Ordering};

    fn policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 5,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            jitter: 0.0,
            cluster_window: Duration::from_secs(5),
        }
    }

    fn request() -> TranslationRequest {
        TranslationRequest {
            text: "Hello".to_string(),
            source_lang: "en".to_string(),
            target_lang: "fr".to_string(),
            ui_safe: false,
            prompt: None,
            glossary_id: None,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limited_then_success() {
        let coordinator = RetryCoordinator::new(policy(), CancellationToken::new());
        let calls = AtomicU32::new(0);

        let result = coordinator
            .with_retry("hello", || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 4 {
                        Err(TranslationError::RateLimited { retry_after: None })
                    } else {
                        Ok("Bonjour".to_string())
                    }
                }
            })
            .await
            .unwrap();

        assert_eq!(result.value, "Bonjour");
        assert_eq!(result.attempts, 5);
        assert_eq!(result.delays.len(), 4);
        assert!(result.delays.windows(2).all(|w| w[1] > w[0]), "delays {:?}", result.delays);
        assert!(result.delays.iter().all(|d| *d <= Duration::from_secs(30)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_client_error_is_not_retried() {
        let mut backend = MockTranslationBackend::new();
        backend
            .expect_translate()
            .times(1)
            .returning(|_| Err(TranslationError::client("invalid target language")));

        let coordinator = RetryCoordinator::new(policy(), CancellationToken::new());
        let request = request();
        let err = coordinator
            .with_retry("hello", || backend.translate(&request))
            .await
            .unwrap_err();
        assert!(matches!(err, TranslationError::ClientError { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausts_after_max_attempts() {
        let mut backend = MockTranslationBackend::new();
        backend.expect_translate().times(5).returning(|_| {
            Err(TranslationError::ServerError {
                status: Some(503),
                message: "unavailable".to_string(),
            })
        });

        let coordinator = RetryCoordinator::new(policy(), CancellationToken::new());
        let request = request();
        let err = coordinator
            .with_retry("hello", || backend.translate(&request))
            .await
            .unwrap_err();
        assert!(matches!(err, TranslationError::RetriesExhausted { attempts: 5, .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_after_hint_is_respected() {
        let coordinator = RetryCoordinator::new(policy(), CancellationToken::new());
        let calls = AtomicU32::new(0);

        let result = coordinator
            .with_retry("hint", || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n == 0 {
                        Err(TranslationError::RateLimited {
                            retry_after: Some(Duration::from_secs(7)),
                        })
                    } else {
                        Ok(())
                    }
                }
            })
            .await
            .unwrap();
        assert_eq!(result.delays, vec![Duration::from_secs(7)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_clustered_rate_limits_raise_shared_floor() {
        let coordinator = RetryCoordinator::new(policy(), CancellationToken::new());
        let other_worker = coordinator.clone();
        let limited = TranslationError::RateLimited { retry_after: None };

        coordinator.next_delay(1, &limited);
        assert_eq!(other_worker.floor(), Duration::from_secs(1));
        other_worker.next_delay(1, &limited);
        assert_eq!(coordinator.floor(), Duration::from_secs(2));

        // Both workers now wait out the shared pause before their next attempt
        let start = Instant::now();
        other_worker.wait_for_resume().await.unwrap();
        assert_eq!(start.elapsed(), Duration::from_secs(2));

        coordinator.record_success();
        assert_eq!(other_worker.floor(), Duration::from_secs(1));
        coordinator.record_success();
        assert_eq!(other_worker.floor(), Duration::from_millis(500));
        coordinator.record_success();
        assert_eq!(other_worker.floor(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_interrupts_backoff() {
        let cancel = CancellationToken::new();
        let coordinator = RetryCoordinator::new(policy(), cancel.clone());

        let handle = tokio::spawn(async move {
            coordinator
                .with_retry("cancel", || async {
                    Err::<(), _>(TranslationError::ServerError {
                        status: Some(500),
                        message: "boom".to_string(),
                    })
                })
                .await
        });
        tokio::time::sleep(Duration::from_millis(100)).await;
        cancel.cancel();

        assert_eq!(handle.await.unwrap().unwrap_err(), TranslationError::Cancelled);
    }
}
