// AI Providers — registry
// AnyProvider wraps Box<dyn AiProvider> so adding a new provider never
// requires modifying call sites — just implement the trait and add one
// match arm to `from_config`.

pub mod gemini;
pub mod openai;

pub use gemini::GeminiProvider;
pub use openai::OpenAiProvider;

use std::sync::Arc;
use std::time::Duration;

use crate::atoms::traits::AiProvider;
use crate::atoms::types::{LlmCompletion, LlmMessage, ProviderConfig, ProviderKind};
use crate::resilience::CircuitRegistry;

/// Type-erased AI provider. The fallback handler holds a `Vec<AnyProvider>`
/// (primary, secondary, …) and calls `.complete()` down the chain without
/// knowing which concrete backend answered.
pub struct AnyProvider(Box<dyn AiProvider>);

impl AnyProvider {
    pub fn from_config(
        config: &ProviderConfig,
        circuits: &CircuitRegistry,
        failure_threshold: u32,
        recovery_timeout: Duration,
    ) -> Self {
        let circuit = circuits.get_or_create(config.kind.name(), failure_threshold, recovery_timeout);
        let provider: Box<dyn AiProvider> = match config.kind {
            ProviderKind::Gemini => Box::new(GeminiProvider::new(config, circuit)),
            ProviderKind::OpenAi => Box::new(OpenAiProvider::new(config, circuit)),
        };
        AnyProvider(provider)
    }

    pub fn name(&self) -> &str {
        self.0.name()
    }

    pub fn kind(&self) -> ProviderKind {
        self.0.kind()
    }

    pub async fn complete(
        &self,
        messages: &[LlmMessage],
        model: &str,
        temperature: Option<f64>,
    ) -> Result<LlmCompletion, crate::atoms::traits::ProviderError> {
        self.0.complete(messages, model, temperature).await
    }
}

/// The ordered chain of providers the Fallback Handler walks: primary
/// first, then each secondary in turn until one succeeds or the chain is
/// exhausted.
pub struct ProviderChain {
    providers: Vec<Arc<AnyProvider>>,
}

impl ProviderChain {
    pub fn new(providers: Vec<Arc<AnyProvider>>) -> Self {
        ProviderChain { providers }
    }

    pub fn providers(&self) -> &[Arc<AnyProvider>] {
        &self.providers
    }

    /// Walk the chain in order, returning the first successful completion.
    /// Every provider's circuit breaker and retry policy has already run
    /// by the time `complete()` returns, so a failure here means that
    /// provider is genuinely unavailable right now, not just flaky.
    pub async fn complete(
        &self,
        messages: &[LlmMessage],
        model: &str,
        temperature: Option<f64>,
    ) -> Result<LlmCompletion, crate::atoms::traits::ProviderError> {
        let mut last_err = None;
        for provider in &self.providers {
            match provider.complete(messages, model, temperature).await {
                Ok(completion) => return Ok(completion),
                Err(err) => {
                    tracing::warn!(provider = provider.name(), "provider failed, trying next in chain: {err}");
                    last_err = Some(err);
                }
            }
        }
        Err(last_err.unwrap_or(crate::atoms::traits::ProviderError::Transport("no providers configured".into())))
    }
}
