// AI Providers — Google Gemini
// Primary LLM backend. Implements the AiProvider golden trait.

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

pub struct GeminiProvider {
    client: Client,
    base_url: String,
    api_key: String,
    circuit: Arc<CircuitBreaker>,
}

impl GeminiProvider {
    pub fn new(config: &ProviderConfig, circuit: Arc<CircuitBreaker>) -> Self {
        let base_url = config
            .base_url
            .clone()
            .unwrap_or_else(|| config.kind.default_base_url().to_string());
        GeminiProvider {
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

    fn format_contents(messages: &[LlmMessage]) -> (Option<Value>, Vec<Value>) {
        let mut system_instruction: Option<Value> = None;
        let mut contents = Vec::new();

        for msg in messages {
            match msg.role {
                LlmRole::System => {
                    let entry = json!({ "parts": [{ "text": msg.content }] });
                    system_instruction = Some(match system_instruction.take() {
                        Some(mut existing) => {
                            let prev = existing["parts"][0]["text"].as_str().unwrap_or("").to_string();
                            existing["parts"][0]["text"] = json!(format!("{prev}\n\n{}", msg.content));
                            existing
                        }
                        None => entry,
                    });
                }
                LlmRole::User => contents.push(json!({
                    "role": "user",
                    "parts": [{"text": msg.content}],
                })),
                LlmRole::Assistant => contents.push(json!({
                    "role": "model",
                    "parts": [{"text": msg.content}],
                })),
            }
        }

        (system_instruction, contents)
    }

    /// Parse Gemini's `candidates[0].content.parts[*].text` response shape,
    /// rejecting responses whose `finishReason` signals the content was
    /// withheld (SAFETY, RECITATION) even though the HTTP call succeeded.
    fn parse_response(body: &Value) -> Result<(String, TokenUsage), ProviderError> {
        let candidate = body["candidates"].get(0).ok_or_else(|| {
            ProviderError::Api { status: 200, message: "no candidates in response".into() }
        })?;

        if let Some(reason) = candidate["finishReason"].as_str() {
            if matches!(reason, "SAFETY" | "RECITATION" | "OTHER") {
                return Err(ProviderError::Api {
                    status: 200,
                    message: format!("content withheld: finishReason={reason}"),
                });
            }
        }

        let text = candidate["content"]["parts"]
            .as_array()
            .map(|parts| {
                parts
                    .iter()
                    .filter_map(|p| p["text"].as_str())
                    .collect::<Vec<_>>()
                    .join("")
            })
            .unwrap_or_default();

        if text.is_empty() {
            return Err(ProviderError::Api { status: 200, message: "empty completion text".into() });
        }

        let usage = TokenUsage {
            input_tokens: body["usageMetadata"]["promptTokenCount"].as_u64().unwrap_or(0) as u32,
            output_tokens: body["usageMetadata"]["candidatesTokenCount"].as_u64().unwrap_or(0) as u32,
        };

        Ok((text, usage))
    }

    async fn complete_once(
        &self,
        messages: &[LlmMessage],
        model: &str,
        temperature: Option<f64>,
    ) -> Result<(String, TokenUsage), ProviderError> {
        let (system_instruction, contents) = Self::format_contents(messages);
        let mut body = json!({ "contents": contents });
        if let Some(si) = system_instruction {
            body["systemInstruction"] = si;
        }
        if let Some(t) = temperature {
            body["generationConfig"] = json!({ "temperature": t });
        }

        let url = format!("{}/models/{model}:generateContent", self.base_url);

        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::Transport(e.to_string()))?;

        let status = response.status().as_u16();
        if status == 401 || status == 403 {
            return Err(ProviderError::Auth(format!("gemini rejected credentials ({status})")));
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
impl AiProvider for GeminiProvider {
    fn name(&self) -> &str {
        "gemini"
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::Gemini
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
                    warn!(provider = "gemini", attempt, "retrying after failure: {err}");
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
            "candidates": [{
                "content": {"parts": [{"text": "hello there"}]},
                "finishReason": "STOP",
            }],
            "usageMetadata": {"promptTokenCount": 10, "candidatesTokenCount": 3},
        });
        let (text, usage) = GeminiProvider::parse_response(&body).unwrap();
        assert_eq!(text, "hello there");
        assert_eq!(usage.input_tokens, 10);
        assert_eq!(usage.output_tokens, 3);
    }

    #[test]
    fn rejects_safety_withheld_content() {
        let body = json!({
            "candidates": [{"content": {"parts": []}, "finishReason": "SAFETY"}],
        });
        assert!(GeminiProvider::parse_response(&body).is_err());
    }

    #[test]
    fn rejects_empty_candidates() {
        let body = json!({ "candidates": [] });
        assert!(GeminiProvider::parse_response(&body).is_err());
    }
}
