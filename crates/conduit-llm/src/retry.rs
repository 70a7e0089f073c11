use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use conduit_core::config::RetryConfig;
use conduit_core::error::{ExecutorError, ProviderError};
use conduit_core::traits::ProviderAdapter;
use conduit_core::types::{GeneratedText, GenerationParams, Prompt};

/// Exponential backoff for transient provider failures.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub factor: u32,
    pub max_backoff: Duration,
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            initial_backoff: Duration::from_millis(config.initial_backoff_ms),
            factor: config.backoff_factor.max(1),
            max_backoff: Duration::from_millis(config.max_backoff_ms),
            jitter: config.jitter,
        }
    }
}

impl RetryPolicy {
    /// No waiting between attempts. Used by tests.
    pub fn immediate(max_retries: u32) -> Self {
        Self {
            max_retries,
            initial_backoff: Duration::ZERO,
            factor: 1,
            max_backoff: Duration::ZERO,
            jitter: false,
        }
    }

    /// Delay before retry number `retry` (0-based).
    pub fn backoff(&self, retry: u32) -> Duration {
        let base = self.initial_backoff.as_millis() as u64;
        let ms = base
            .saturating_mul((self.factor as u64).saturating_pow(retry))
            .min(self.max_backoff.as_millis() as u64);
        if !self.jitter {
            return Duration::from_millis(ms);
        }
        // Add jitter: 0.8x to 1.2x
        let jitter = 0.8 + rand::random::<f64>() * 0.4;
        Duration::from_millis((ms as f64 * jitter) as u64)
    }
}

/// Call `provider.generate`, retrying transient failures per `policy`.
///
/// `on_attempt` is invoked with the 1-based attempt number before each call,
/// so callers can record attempts even if this future is dropped.
pub async fn generate_with_retry(
    provider: &dyn ProviderAdapter,
    prompt: Prompt,
    params: GenerationParams,
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    mut on_attempt: impl FnMut(u32),
) -> Result<GeneratedText, ExecutorError> {
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        on_attempt(attempt);

        let result = tokio::select! {
            r = provider.generate(prompt.clone(), params.clone(), cancel.clone()) => r,
            _ = cancel.cancelled() => Err(ProviderError::Cancelled),
        };

        let err = match result {
            Ok(generated) => {
                debug!(provider = provider.name(), attempt, "Generation succeeded");
                return Ok(generated);
            }
            Err(ProviderError::Cancelled) => return Err(ExecutorError::Cancelled),
            Err(e) => e,
        };

        if !err.is_transient() {
            return Err(ExecutorError::Provider(err.to_string()));
        }

        let retry = attempt - 1;
        if retry >= policy.max_retries {
            return Err(ExecutorError::ProviderUnavailable {
                attempts: attempt,
                message: err.to_string(),
            });
        }

        let backoff = policy.backoff(retry);
        warn!(
            provider = provider.name(),
            attempt,
            max_retries = policy.max_retries,
            backoff_ms = backoff.as_millis() as u64,
            error = %err,
            "Retrying generation request"
        );
        tokio::select! {
            _ = tokio::time::sleep(backoff) => {}
            _ = cancel.cancelled() => return Err(ExecutorError::Cancelled),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conduit_test_utils::MockProvider;

    fn prompt() -> Prompt {
        Prompt {
            system: "sys".into(),
            user: "question".into(),
        }
    }

    #[test]
    fn test_backoff_without_jitter() {
        let policy = RetryPolicy {
            max_retries: 5,
            initial_backoff: Duration::from_millis(500),
            factor: 2,
            max_backoff: Duration::from_millis(3000),
            jitter: false,
        };
        assert_eq!(policy.backoff(0), Duration::from_millis(500));
        assert_eq!(policy.backoff(1), Duration::from_millis(1000));
        assert_eq!(policy.backoff(2), Duration::from_millis(2000));
        assert_eq!(policy.backoff(3), Duration::from_millis(3000));
        assert_eq!(policy.backoff(40), Duration::from_millis(3000));
    }

    #[test]
    fn test_backoff_jitter_bounds() {
        let policy = RetryPolicy {
            jitter: true,
            ..RetryPolicy::default()
        };
        for _ in 0..100 {
            let d = policy.backoff(0).as_millis();
            assert!((400..=600).contains(&d), "jittered backoff out of range: {}", d);
        }
    }

    #[test]
    fn test_defaults_match_config() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_retries, 3);
        assert_eq!(policy.initial_backoff, Duration::from_millis(500));
        assert_eq!(policy.factor, 2);
    }

    #[tokio::test]
    async fn test_retries_transient_then_succeeds() {
        let provider = MockProvider::scripted(vec![
            Err(ProviderError::RateLimited("429".into())),
            Err(ProviderError::Server { status: 503, message: "busy".into() }),
            Ok("done".into()),
        ]);
        let mut seen = Vec::new();
        let out = generate_with_retry(
            &provider,
            prompt(),
            GenerationParams::default(),
            &RetryPolicy::immediate(3),
            &CancellationToken::new(),
            |a| seen.push(a),
        )
        .await
        .unwrap();
        assert_eq!(out.text, "done");
        assert_eq!(seen, vec![1, 2, 3]);
        assert_eq!(provider.calls(), 3);
    }

    #[tokio::test]
    async fn test_permanent_error_not_retried() {
        let provider = MockProvider::scripted(vec![Err(ProviderError::Auth("bad key".into()))]);
        let err = generate_with_retry(
            &provider,
            prompt(),
            GenerationParams::default(),
            &RetryPolicy::immediate(3),
            &CancellationToken::new(),
            |_| {},
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ExecutorError::Provider(_)));
        assert_eq!(provider.calls(), 1);
    }

    #[tokio::test]
    async fn test_exhausted_retries() {
        let provider = MockProvider::scripted(vec![
            Err(ProviderError::Timeout("t".into())),
            Err(ProviderError::Timeout("t".into())),
            Err(ProviderError::Timeout("t".into())),
            Err(ProviderError::Timeout("t".into())),
            Ok("too late".into()),
        ]);
        let err = generate_with_retry(
            &provider,
            prompt(),
            GenerationParams::default(),
            &RetryPolicy::immediate(3),
            &CancellationToken::new(),
            |_| {},
        )
        .await
        .unwrap_err();
        assert_eq!(
            err,
            ExecutorError::ProviderUnavailable {
                attempts: 4,
                message: "request timed out: t".into()
            }
        );
        assert_eq!(provider.calls(), 4);
    }

    #[tokio::test]
    async fn test_cancel_interrupts_call() {
        let provider = MockProvider::new().with_delay(Duration::from_secs(5));
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });
        let err = generate_with_retry(
            &provider,
            prompt(),
            GenerationParams::default(),
            &RetryPolicy::default(),
            &cancel,
            |_| {},
        )
        .await
        .unwrap_err();
        assert_eq!(err, ExecutorError::Cancelled);
    }
}
