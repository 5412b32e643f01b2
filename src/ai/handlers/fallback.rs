// Fallback handler — the catch-all for every intent without a dedicated
// handler, and the last resort for knowledge queries the retriever
// couldn't confidently answer. Runs the message through the provider
// failover chain.

use async_trait::async_trait;
use tracing::error;

use super::{HandlerContext, IntentHandler};
use crate::atoms::types::{LlmMessage, LlmRole};
use crate::providers::ProviderChain;

const SYSTEM_PROMPT: &str =
    "You are a helpful customer support assistant. Answer concisely and, if you are unsure, say so rather than guessing.";

pub struct FallbackHandler {
    providers: std::sync::Arc<ProviderChain>,
    default_model: String,
}

impl FallbackHandler {
    pub fn new(providers: std::sync::Arc<ProviderChain>, default_model: String) -> Self {
        FallbackHandler { providers, default_model }
    }

    /// Generate a reply for arbitrary text, bypassing intent/history
    /// plumbing — used directly by the knowledge query handler when it
    /// wants to prepend retrieved context to the user's question.
    pub async fn generate(&self, prompt: &str) -> String {
        let messages = vec![
            LlmMessage { role: LlmRole::System, content: SYSTEM_PROMPT.to_string() },
            LlmMessage { role: LlmRole::User, content: prompt.to_string() },
        ];

        match self.providers.complete(&messages, &self.default_model, Some(0.7)).await {
            Ok(completion) => completion.text,
            Err(e) => {
                error!(error = %e, "LLM generation failed after exhausting provider chain");
                "I encountered an unexpected internal error. My team has been notified.".to_string()
            }
        }
    }
}

#[async_trait]
impl IntentHandler for FallbackHandler {
    async fn handle(&self, ctx: &HandlerContext<'_>) -> String {
        self.generate(ctx.message).await
    }
}
