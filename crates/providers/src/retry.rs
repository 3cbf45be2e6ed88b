//! Retry wrapper — transparent retries for transient provider failures.
//!
//! Wraps a single provider and retries `complete()` on transient errors
//! (network, timeout, 5xx, malformed/empty replies) with exponential
//! backoff plus jitter. Non-transient errors (auth, 4xx) surface
//! immediately, and after the attempt budget is spent the last error is
//! surfaced unmodified.
//!
//! Streaming is not retried: a stream that has already yielded chunks
//! cannot be transparently restarted, so `stream()` delegates straight
//! through.

use async_trait::async_trait;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use wardclaw_core::error::ProviderError;
use wardclaw_core::provider::{ChatRequest, ChatResponse, Provider, StreamChunk};

/// Retry policy: attempt budget and backoff base.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total attempts, including the first (minimum 1).
    pub max_attempts: u32,
    /// Delay before attempt N is `base * 2^(N-1)` plus up to 25% jitter.
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
        }
    }

    /// Backoff before retry number `attempt` (0-based count of failures
    /// so far). Jitter spreads concurrent retriers apart.
    fn backoff(&self, attempt: u32) -> Duration {
        let exp = self
            .base_delay
            .saturating_mul(2u32.saturating_pow(attempt));
        let jitter_cap = (exp.as_millis() as u64 / 4).max(1);
        let jitter = rand::rng().random_range(0..=jitter_cap);
        exp + Duration::from_millis(jitter)
    }
}

/// Provider wrapper that retries transient failures.
pub struct RetryingProvider {
    inner: Arc<dyn Provider>,
    policy: RetryPolicy,
}

impl RetryingProvider {
    pub fn new(inner: Arc<dyn Provider>, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }
}

#[async_trait]
impl Provider for RetryingProvider {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn complete(&self, request: ChatRequest) -> Result<ChatResponse, ProviderError> {
        let mut last_error: Option<ProviderError> = None;

        for attempt in 0..self.policy.max_attempts {
            if attempt > 0 {
                let delay = self.policy.backoff(attempt - 1);
                debug!(
                    provider = %self.inner.name(),
                    attempt = attempt + 1,
                    delay_ms = delay.as_millis() as u64,
                    "Retrying after transient failure"
                );
                tokio::time::sleep(delay).await;
            }

            match self.inner.complete(request.clone()).await {
                Ok(response) => return Ok(response),
                Err(e) if e.is_transient() => {
                    warn!(
                        provider = %self.inner.name(),
                        attempt = attempt + 1,
                        max_attempts = self.policy.max_attempts,
                        error = %e,
                        "Transient provider failure"
                    );
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        // max_attempts >= 1, so at least one attempt ran and set this
        Err(last_error.unwrap_or_else(|| {
            ProviderError::Network("retry loop ran zero attempts".into())
        }))
    }

    async fn stream(
        &self,
        request: ChatRequest,
    ) -> Result<
        tokio::sync::mpsc::Receiver<Result<StreamChunk, ProviderError>>,
        ProviderError,
    > {
        self.inner.stream(request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use wardclaw_core::message::Message;
    use wardclaw_core::provider::Usage;

    /// Fails `fail_count` times, then succeeds.
    struct FlakyProvider {
        error: ProviderError,
        fail_count: usize,
        calls: Mutex<usize>,
    }

    impl FlakyProvider {
        fn new(error: ProviderError, fail_count: usize) -> Self {
            Self {
                error,
                fail_count,
                calls: Mutex::new(0),
            }
        }

        fn calls(&self) -> usize {
            *self.calls.lock().unwrap()
        }
    }

    #[async_trait]
    impl Provider for FlakyProvider {
        fn name(&self) -> &str {
            "flaky"
        }

        async fn complete(&self, _request: ChatRequest) -> Result<ChatResponse, ProviderError> {
            let mut calls = self.calls.lock().unwrap();
            *calls += 1;
            if *calls <= self.fail_count {
                Err(self.error.clone())
            } else {
                Ok(ChatResponse {
                    content: "recovered".into(),
                    model: "test-model".into(),
                    usage: Usage::default(),
                    stop_reason: Some("end_turn".into()),
                })
            }
        }
    }

    fn fast_policy() -> RetryPolicy {
        RetryPolicy::new(3, Duration::from_millis(1))
    }

    fn test_request() -> ChatRequest {
        ChatRequest::new("test", vec![Message::user("hello")])
    }

    #[tokio::test]
    async fn succeeds_after_transient_failures() {
        let inner = Arc::new(FlakyProvider::new(
            ProviderError::Network("conn reset".into()),
            2,
        ));
        let provider = RetryingProvider::new(inner.clone(), fast_policy());

        let response = provider.complete(test_request()).await.unwrap();
        assert_eq!(response.content, "recovered");
        assert_eq!(inner.calls(), 3);
    }

    #[tokio::test]
    async fn malformed_response_is_retried() {
        let inner = Arc::new(FlakyProvider::new(
            ProviderError::MalformedResponse("empty completion".into()),
            1,
        ));
        let provider = RetryingProvider::new(inner.clone(), fast_policy());

        let response = provider.complete(test_request()).await.unwrap();
        assert_eq!(response.content, "recovered");
        assert_eq!(inner.calls(), 2);
    }

    #[tokio::test]
    async fn non_transient_surfaces_immediately() {
        let inner = Arc::new(FlakyProvider::new(
            ProviderError::AuthRequired("no API key configured".into()),
            10,
        ));
        let provider = RetryingProvider::new(inner.clone(), fast_policy());

        let err = provider.complete(test_request()).await.unwrap_err();
        assert!(matches!(err, ProviderError::AuthRequired(_)));
        assert_eq!(inner.calls(), 1);
    }

    #[tokio::test]
    async fn exhaustion_surfaces_last_error_unmodified() {
        let inner = Arc::new(FlakyProvider::new(
            ProviderError::Timeout("deadline exceeded".into()),
            10,
        ));
        let provider = RetryingProvider::new(inner.clone(), fast_policy());

        let err = provider.complete(test_request()).await.unwrap_err();
        match err {
            ProviderError::Timeout(msg) => assert_eq!(msg, "deadline exceeded"),
            other => panic!("expected Timeout, got {other:?}"),
        }
        assert_eq!(inner.calls(), 3);
    }

    #[tokio::test]
    async fn server_errors_are_retried_client_errors_are_not() {
        let server_err = Arc::new(FlakyProvider::new(
            ProviderError::Api {
                status_code: 503,
                message: "overloaded".into(),
            },
            10,
        ));
        let provider = RetryingProvider::new(server_err.clone(), fast_policy());
        assert!(provider.complete(test_request()).await.is_err());
        assert_eq!(server_err.calls(), 3);

        let client_err = Arc::new(FlakyProvider::new(
            ProviderError::Api {
                status_code: 400,
                message: "bad request".into(),
            },
            10,
        ));
        let provider = RetryingProvider::new(client_err.clone(), fast_policy());
        assert!(provider.complete(test_request()).await.is_err());
        assert_eq!(client_err.calls(), 1);
    }

    #[test]
    fn backoff_grows_exponentially_with_bounded_jitter() {
        let policy = RetryPolicy::new(3, Duration::from_millis(100));

        let first = policy.backoff(0);
        assert!(first >= Duration::from_millis(100));
        assert!(first <= Duration::from_millis(125));

        let third = policy.backoff(2);
        assert!(third >= Duration::from_millis(400));
        assert!(third <= Duration::from_millis(500));
    }

    #[test]
    fn zero_attempts_clamped_to_one() {
        let policy = RetryPolicy::new(0, Duration::from_millis(1));
        assert_eq!(policy.max_attempts, 1);
    }
}
