// AI Providers — OpenAI-compatible chat completions
// Secondary LLM backend, used by the Fallback Handler when Gemini's
// circuit breaker is open or a Gemini call exhausts its retries.

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

use crate::atoms::traits::{AiProvider, ProviderError};
use crate::atoms::types::{LlmCompletion, LlmMessage, LlmRole, ProviderConfig, ProviderKind, TokenUsage};
use crate::resilience::backoff::{is_retryable_status, parse_retry_after, retry_delay, should_retry};
use crate::resilience::CircuitBreaker;

pub struct OpenAiProvider {
    client: Client,
    base_url: String,
    api_key: String,
    circuit: Arc<CircuitBreaker>,
}

impl OpenAiProvider {
    pub fn new(config: &ProviderConfig, circuit: Arc<CircuitBreaker>) -> Self {
        let base_url = config
            .base_url
            .clone()
            .unwrap_or_else(|| config.kind.default_base_url().to_string());
        OpenAiProvider {
            client: Client::builder()
                .connect_timeout(Duration::from_secs(10))
                .timeout(Duration::from_secs(120))
                .build()
                .unwrap_or_default(),
            base_url,
            api_key: config.api_key.clone(),
            circuit,
        }
    }

    fn format_messages(messages: &[LlmMessage]) -> Vec<Value> {
        messages
            .iter()
            .map(|m| {
                let role = match m.role {
                    LlmRole::System => "system",
                    LlmRole::User => "user",
                    LlmRole::Assistant => "assistant",
                };
                json!({ "role": role, "content": m.content })
            })
            .collect()
    }

    /// Parse the OpenAI chat-completions response shape:
    /// `choices[0].message.content`, checking `finish_reason` so a
    /// truncated or filtered completion is treated as a failure rather
    /// than silently returned.
    fn parse_response(body: &Value) -> Result<(String, TokenUsage), ProviderError> {
        let choice = body["choices"].get(0).ok_or_else(|| ProviderError::Api {
            status: 200,
            message: "no choices in response".into(),
        })?;

        if let Some(reason) = choice["finish_reason"].as_str() {
            if reason == "content_filter" {
                return Err(ProviderError::Api {
                    status: 200,
                    message: "content withheld: finish_reason=content_filter".into(),
                });
            }
        }

        let text = choice["message"]["content"].as_str().unwrap_or("").to_string();
        if text.is_empty() {
            return Err(ProviderError::Api { status: 200, message: "empty completion text".into() });
        }

        let usage = TokenUsage {
            input_tokens: body["usage"]["prompt_tokens"].as_u64().unwrap_or(0) as u32,
            output_tokens: body["usage"]["completion_tokens"].as_u64().unwrap_or(0) as u32,
        };

        Ok((text, usage))
    }

    async fn complete_once(
        &self,
        messages: &[LlmMessage],
        model: &str,
        temperature: Option<f64>,
    ) -> Result<(String, TokenUsage), ProviderError> {
        let mut body = json!({
            "model": model,
            "messages": Self::format_messages(messages),
        });
        if let Some(t) = temperature {
            body["temperature"] = json!(t);
        }

        let url = format!("{}/chat/completions", self.base_url);

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::Transport(e.to_string()))?;

        let status = response.status().as_u16();
        if status == 401 || status == 403 {
            return Err(ProviderError::Auth(format!("openai rejected credentials ({status})")));
        }
        if status == 429 {
            let retry_after = parse_retry_after(response.headers().get("retry-after").and_then(|v| v.to_str().ok()));
            return Err(ProviderError::RateLimited { retry_after });
        }
        if !(200..300).contains(&status) {
            let text = response.text().await.unwrap_or_default();
            return Err(ProviderError::Api { status, message: text });
        }

        let json_body: Value = response
            .json()
            .await
            .map_err(|e| ProviderError::Transport(format!("invalid JSON response: {e}")))?;

        Self::parse_response(&json_body)
    }
}

#[async_trait]
impl AiProvider for OpenAiProvider {
    fn name(&self) -> &str {
        "openai"
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::OpenAi
    }

    async fn complete(
        &self,
        messages: &[LlmMessage],
        model: &str,
        temperature: Option<f64>,
    ) -> Result<LlmCompletion, ProviderError> {
        self.circuit
            .check()
            .map_err(|_| ProviderError::Transport("circuit breaker open".into()))?;

        let mut attempt = 0;
        loop {
            match self.complete_once(messages, model, temperature).await {
                Ok((text, usage)) => {
                    self.circuit.record_success();
                    return Ok(LlmCompletion { text, model: model.to_string(), usage });
                }
                Err(err) => {
                    self.circuit.record_failure();

                    let retryable = match &err {
                        ProviderError::RateLimited { .. } => true,
                        ProviderError::Api { status, .. } => is_retryable_status(*status),
                        ProviderError::Transport(_) => true,
                        ProviderError::Auth(_) => false,
                    };

                    if !retryable || !should_retry(attempt) {
                        return Err(err);
                    }

                    let retry_after = if let ProviderError::RateLimited { retry_after } = &err {
                        *retry_after
                    } else {
                        None
                    };
                    warn!(provider = "openai", attempt, "retrying after failure: {err}");
                    tokio::time::sleep(retry_delay(attempt, retry_after)).await;
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_happy_path_response() {
        let body = json!({
            "choices": [{
                "message": {"content": "hi"},
                "finish_reason": "stop",
            }],
            "usage": {"prompt_tokens": 5, "completion_tokens": 2},
        });
        let (text, usage) = OpenAiProvider::parse_response(&body).unwrap();
        assert_eq!(text, "hi");
        assert_eq!(usage.input_tokens, 5);
        assert_eq!(usage.output_tokens, 2);
    }

    #[test]
    fn rejects_content_filter_finish_reason() {
        let body = json!({
            "choices": [{"message": {"content": ""}, "finish_reason": "content_filter"}],
        });
        assert!(OpenAiProvider::parse_response(&body).is_err());
    }

    #[test]
    fn rejects_missing_choices() {
        let body = json!({ "choices": [] });
        assert!(OpenAiProvider::parse_response(&body).is_err());
    }
}
