use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::LLMError;
use crate::types::{ChatRequest, ChatResponse};

use super::LLMProvider;

/// Extracts the `Retry-After` header (in seconds) if present.
///
/// Providers occasionally instruct clients to wait before re-sending requests. When the
/// header is numeric this helper parses it into a [`Duration`]. HTTP-date values are
/// currently ignored because vendors primarily use the numeric form.
pub(crate) fn retry_after_from_headers(headers: &HashMap<String, String>) -> Option<Duration> {
    headers
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case("retry-after"))
        .and_then(|(_, value)| value.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

/// Exponential backoff with jitter, used by [`RetryableLLMProvider`]'s blanket implementation.
///
/// `delay = min(initial_backoff_ms * backoff_multiplier^attempt, max_backoff_ms) * U(0.5, 1.5)`
///
/// # Examples
///
/// ```
/// use kotoba_llm::provider::RetryConfig;
///
/// let config = RetryConfig {
///     max_retries: 3,
///     initial_backoff_ms: 100,
///     max_backoff_ms: 2_000,
///     backoff_multiplier: 2.0,
///     max_elapsed_ms: None,
/// };
/// assert_eq!(config.max_retries, 3);
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryConfig {
    /// Number of retry attempts after the initial failed call.
    pub max_retries: u32,
    /// Base backoff used for the first retry.
    pub initial_backoff_ms: u64,
    /// Upper bound applied to the computed backoff, before jitter.
    pub max_backoff_ms: u64,
    /// Multiplier applied to the backoff after each attempt.
    pub backoff_multiplier: f64,
    /// Optional deadline: once the cumulative wait would exceed this, fail fast instead of
    /// sleeping further, even if retries remain.
    pub max_elapsed_ms: Option<u64>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff_ms: 250,
            max_backoff_ms: 10_000,
            backoff_multiplier: 2.0,
            max_elapsed_ms: None,
        }
    }
}

impl RetryConfig {
    fn backoff_for_attempt(&self, attempt: u32) -> Duration {
        let raw = self.initial_backoff_ms as f64 * self.backoff_multiplier.powi(attempt as i32);
        let capped = raw.min(self.max_backoff_ms as f64);
        let jitter = 0.5 + fastrand::f64();
        Duration::from_millis((capped * jitter).round() as u64)
    }
}

/// Returns `true` when an error is worth retrying.
///
/// Transport failures and provider-side throttling/stream drops are transient; everything
/// else (bad credentials, invalid payloads, unresolvable models...) will fail identically on
/// the next attempt so retrying would just waste time and quota.
fn is_retryable(error: &LLMError) -> bool {
    matches!(
        error,
        LLMError::Transport { .. } | LLMError::RateLimit { .. } | LLMError::StreamClosed { .. }
    )
}

/// Adds retry/backoff semantics on top of [`LLMProvider::chat`].
#[async_trait]
pub trait RetryableLLMProvider {
    /// Calls the provider, retrying transient failures according to `config`.
    async fn chat_with_retry(
        &self,
        request: ChatRequest,
        config: RetryConfig,
    ) -> Result<ChatResponse, LLMError>;
}

#[async_trait]
impl<P> RetryableLLMProvider for P
where
    P: LLMProvider + ?Sized,
{
    async fn chat_with_retry(
        &self,
        request: ChatRequest,
        config: RetryConfig,
    ) -> Result<ChatResponse, LLMError> {
        let mut elapsed = Duration::ZERO;
        let mut attempt = 0u32;
        loop {
            match self.chat(request.clone()).await {
                Ok(response) => return Ok(response),
                Err(err) => {
                    if attempt >= config.max_retries || !is_retryable(&err) {
                        return Err(err);
                    }

                    let computed = config.backoff_for_attempt(attempt);
                    let delay = match &err {
                        LLMError::RateLimit {
                            retry_after: Some(retry_after),
                            ..
                        } => computed.max(*retry_after),
                        _ => computed,
                    };

                    if let Some(max_elapsed) = config.max_elapsed_ms {
                        if elapsed.as_millis() as u64 + delay.as_millis() as u64 > max_elapsed {
                            return Err(err);
                        }
                    }

                    tracing::debug!(attempt, delay_ms = delay.as_millis() as u64, error = %err, "retrying LLM request");
                    tokio::time::sleep(delay).await;
                    elapsed += delay;
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CapabilityDescriptor, ChatOptions, ChatRequest};
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FlakyProvider {
        attempts: AtomicU32,
        fail_times: u32,
    }

    #[async_trait]
    impl LLMProvider for FlakyProvider {
        async fn chat(&self, _request: ChatRequest) -> Result<ChatResponse, LLMError> {
            let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
            if attempt < self.fail_times {
                return Err(LLMError::Transport {
                    message: "connection reset".to_string(),
                });
            }
            Ok(ChatResponse {
                outputs: Vec::new(),
                usage: None,
                finish_reason: None,
                model: Some("test".to_string()),
                provider: Default::default(),
            })
        }

        async fn stream_chat(&self, _request: ChatRequest) -> Result<super::super::ChatStream, LLMError> {
            unimplemented!()
        }

        fn capabilities(&self) -> CapabilityDescriptor {
            CapabilityDescriptor::default()
        }

        fn name(&self) -> &'static str {
            "flaky"
        }
    }

    fn empty_request() -> ChatRequest {
        ChatRequest {
            messages: Vec::new(),
            options: ChatOptions::default(),
            tools: Vec::new(),
            tool_choice: None,
            response_format: None,
            metadata: None,
        }
    }

    #[tokio::test]
    async fn retries_transient_failures_until_success() {
        let provider = FlakyProvider {
            attempts: AtomicU32::new(0),
            fail_times: 2,
        };
        let config = RetryConfig {
            max_retries: 5,
            initial_backoff_ms: 0,
            max_backoff_ms: 0,
            backoff_multiplier: 2.0,
            max_elapsed_ms: None,
        };
        let result = provider.chat_with_retry(empty_request(), config).await;
        assert!(result.is_ok());
        assert_eq!(provider.attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_max_retries() {
        let provider = FlakyProvider {
            attempts: AtomicU32::new(0),
            fail_times: 10,
        };
        let config = RetryConfig {
            max_retries: 2,
            initial_backoff_ms: 0,
            max_backoff_ms: 0,
            backoff_multiplier: 2.0,
            max_elapsed_ms: None,
        };
        let result = provider.chat_with_retry(empty_request(), config).await;
        assert!(result.is_err());
        assert_eq!(provider.attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn non_retryable_errors_fail_fast() {
        struct AuthFailProvider;

        #[async_trait]
        impl LLMProvider for AuthFailProvider {
            async fn chat(&self, _request: ChatRequest) -> Result<ChatResponse, LLMError> {
                Err(LLMError::Auth {
                    message: "bad key".to_string(),
                })
            }

            async fn stream_chat(&self, _request: ChatRequest) -> Result<super::super::ChatStream, LLMError> {
                unimplemented!()
            }

            fn capabilities(&self) -> CapabilityDescriptor {
                CapabilityDescriptor::default()
            }

            fn name(&self) -> &'static str {
                "auth_fail"
            }
        }

        let provider = AuthFailProvider;
        let result = provider
            .chat_with_retry(empty_request(), RetryConfig::default())
            .await;
        assert!(matches!(result, Err(LLMError::Auth { .. })));
    }

    #[tokio::test]
    async fn rate_limit_delay_uses_the_larger_of_computed_backoff_and_retry_after() {
        struct OnceRateLimited {
            attempts: AtomicU32,
        }

        #[async_trait]
        impl LLMProvider for OnceRateLimited {
            async fn chat(&self, _request: ChatRequest) -> Result<ChatResponse, LLMError> {
                if self.attempts.fetch_add(1, Ordering::SeqCst) == 0 {
                    // A tiny Retry-After that the computed exponential backoff should dominate.
                    return Err(LLMError::RateLimit {
                        message: "throttled".to_string(),
                        retry_after: Some(Duration::from_millis(1)),
                    });
                }
                Ok(ChatResponse {
                    outputs: Vec::new(),
                    usage: None,
                    finish_reason: None,
                    model: Some("test".to_string()),
                    provider: Default::default(),
                })
            }

            async fn stream_chat(&self, _request: ChatRequest) -> Result<super::super::ChatStream, LLMError> {
                unimplemented!()
            }

            fn capabilities(&self) -> CapabilityDescriptor {
                CapabilityDescriptor::default()
            }

            fn name(&self) -> &'static str {
                "once_rate_limited"
            }
        }

        let provider = OnceRateLimited {
            attempts: AtomicU32::new(0),
        };
        let config = RetryConfig {
            max_retries: 1,
            initial_backoff_ms: 50,
            max_backoff_ms: 50,
            backoff_multiplier: 1.0,
            max_elapsed_ms: None,
        };

        let started = std::time::Instant::now();
        let result = provider.chat_with_retry(empty_request(), config).await;
        assert!(result.is_ok());
        // jitter floor is 0.5x initial_backoff_ms, well above the 1ms Retry-After.
        assert!(started.elapsed() >= Duration::from_millis(20));
    }
}
