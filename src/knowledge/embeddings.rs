// Knowledge Retrieval — embedding generation.
// Wraps Gemini's `embedContent` endpoint. Separate from the chat providers
// in `crate::providers` because embeddings are a different API shape and
// never participate in the chat failover chain.

use reqwest::Client;
use serde_json::json;
use std::time::Duration;
use tracing::warn;

use crate::atoms::constants::{EMBEDDING_DIMENSION, EMBEDDING_MAX_RETRIES, EMBEDDING_TIMEOUT_SECS};
use crate::atoms::error::{GatewayError, GatewayResult};

const MAX_TEXT_LENGTH: usize = 8192;

pub struct EmbeddingService {
    client: Client,
    api_key: String,
    model: String,
}

impl EmbeddingService {
    pub fn new(api_key: String, model: String) -> Self {
        EmbeddingService {
            client: Client::builder()
                .timeout(Duration::from_secs(EMBEDDING_TIMEOUT_SECS))
                .build()
                .unwrap_or_default(),
            api_key,
            model,
        }
    }

    /// Generate an embedding for a single text, retrying transient
    /// failures up to [`EMBEDDING_MAX_RETRIES`] times with exponential
    /// backoff. Returns `None` for blank input rather than erroring.
    pub async fn generate_embedding(&self, text: &str) -> GatewayResult<Option<Vec<f32>>> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Ok(None);
        }
        let text = if trimmed.len() > MAX_TEXT_LENGTH {
            &trimmed[..MAX_TEXT_LENGTH]
        } else {
            trimmed
        };

        let url = format!(
            "https://generativelanguage.googleapis.com/v1beta/models/{}:embedContent",
            self.model
        );
        let body = json!({
            "model": format!("models/{}", self.model),
            "content": { "parts": [{ "text": text }] },
        });

        let mut attempt = 0;
        loop {
            let response = self
                .client
                .post(&url)
                .header("x-goog-api-key", &self.api_key)
                .header("Content-Type", "application/json")
                .json(&body)
                .send()
                .await;

            match response {
                Ok(resp) if resp.status().is_success() => {
                    let json_body: serde_json::Value = resp.json().await?;
                    let values: Vec<f32> = json_body["embedding"]["values"]
                        .as_array()
                        .map(|arr| arr.iter().filter_map(|v| v.as_f64()).map(|v| v as f32).collect())
                        .unwrap_or_default();

                    if values.is_empty() {
                        return Err(GatewayError::ai_service("gemini-embedding", "empty embedding returned"));
                    }
                    if values.len() != EMBEDDING_DIMENSION {
                        return Err(GatewayError::ai_service(
                            "gemini-embedding",
                            format!("unexpected dimension {} (expected {EMBEDDING_DIMENSION})", values.len()),
                        ));
                    }
                    return Ok(Some(values));
                }
                Ok(resp) if resp.status().as_u16() == 429 && attempt + 1 < EMBEDDING_MAX_RETRIES => {
                    warn!(attempt, "embedding request rate limited, retrying");
                }
                Ok(resp) => {
                    let status = resp.status().as_u16();
                    let text = resp.text().await.unwrap_or_default();
                    return Err(GatewayError::ai_service("gemini-embedding", format!("HTTP {status}: {text}")));
                }
                Err(e) if attempt + 1 < EMBEDDING_MAX_RETRIES => {
                    warn!(attempt, error = %e, "embedding request failed, retrying");
                }
                Err(e) => return Err(GatewayError::from(e)),
            }

            attempt += 1;
            tokio::time::sleep(Duration::from_secs_f64(1.0 * 2f64.powi(attempt as i32))).await;
        }
    }

    pub async fn generate_embeddings_batch(&self, texts: &[String]) -> Vec<Option<Vec<f32>>> {
        let mut results = Vec::with_capacity(texts.len());
        for text in texts {
            match self.generate_embedding(text).await {
                Ok(embedding) => results.push(embedding),
                Err(e) => {
                    warn!(error = %e, "failed to embed document, skipping");
                    results.push(None);
                }
            }
        }
        results
    }
}

/// Cosine similarity clamped to `[0.0, 1.0]`; returns `0.0` on a
/// dimension mismatch or zero-norm vector rather than erroring, matching
/// how a miss is represented everywhere else in the retrieval path.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.is_empty() || b.is_empty() || a.len() != b.len() {
        return 0.0;
    }

    let dot: f64 = a.iter().zip(b).map(|(x, y)| *x as f64 * *y as f64).sum();
    let norm_a: f64 = a.iter().map(|x| *x as f64 * *x as f64).sum::<f64>().sqrt();
    let norm_b: f64 = b.iter().map(|x| *x as f64 * *x as f64).sum::<f64>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    (dot / (norm_a * norm_b)).clamp(0.0, 1.0)
}

pub fn embedding_to_bytes(embedding: &[f32]) -> Vec<u8> {
    embedding.iter().flat_map(|f| f.to_le_bytes()).collect()
}

pub fn bytes_to_embedding(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cosine_similarity_of_identical_vectors_is_one() {
        let v = vec![1.0, 2.0, 3.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn cosine_similarity_of_orthogonal_vectors_is_zero() {
        let a = vec![1.0, 0.0];
        let b = vec![0.0, 1.0];
        assert!(cosine_similarity(&a, &b).abs() < 1e-6);
    }

    #[test]
    fn cosine_similarity_handles_dimension_mismatch() {
        let a = vec![1.0, 2.0];
        let b = vec![1.0, 2.0, 3.0];
        assert_eq!(cosine_similarity(&a, &b), 0.0);
    }

    #[test]
    fn embedding_byte_round_trip() {
        let original = vec![0.5_f32, -1.25, 3.0];
        let bytes = embedding_to_bytes(&original);
        let restored = bytes_to_embedding(&bytes);
        assert_eq!(original, restored);
    }
}
