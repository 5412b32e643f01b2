// Gateway Atoms — AiProvider golden trait
// Every LLM backend (Gemini, OpenAI) implements this so the failover
// handler can hold a `Box<dyn AiProvider>` without knowing which concrete
// backend answered.

use async_trait::async_trait;
use thiserror::Error;

use super::types::{LlmCompletion, LlmMessage, ProviderKind};

#[derive(Debug, Error, Clone)]
pub enum ProviderError {
    /// Connection-level failure: DNS, TLS, timeout, broken stream.
    #[error("transport error: {0}")]
    Transport(String),

    /// The provider rejected our credentials.
    #[error("auth error: {0}")]
    Auth(String),

    /// 429 from the provider; `retry_after` is the parsed `Retry-After`
    /// header (seconds) when present.
    #[error("rate limited{}", .retry_after.map(|s| format!(", retry after {}s", s)).unwrap_or_default())]
    RateLimited { retry_after: Option<u64> },

    /// Any other non-2xx response from the provider's API.
    #[error("api error ({status}): {message}")]
    Api { status: u16, message: String },
}

impl ProviderError {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ProviderError::Transport(_) | ProviderError::RateLimited { .. }
        ) || matches!(self, ProviderError::Api { status, .. } if crate::resilience::backoff::is_retryable_status(*status))
    }
}

#[async_trait]
pub trait AiProvider: Send + Sync {
    fn name(&self) -> &str;

    fn kind(&self) -> ProviderKind;

    /// Single-shot, non-streaming chat completion. The fallback handler
    /// calls this on the primary provider and, on failure, on the next
    /// provider in the chain.
    async fn complete(
        &self,
        messages: &[LlmMessage],
        model: &str,
        temperature: Option<f64>,
    ) -> Result<LlmCompletion, ProviderError>;
}
