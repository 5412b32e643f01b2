// Delivery Worker — consumes tasks enqueued by the webhook, calls the AI
// Processor over HTTP, then delivers the reply through the outbound
// platform API. Runs as a background tokio task reading from the queue in
// `worker::queue`; any number of these can run concurrently against the
// same receiver's tasks since each `DeliveryTask` is handled independently.

pub mod queue;

use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::atoms::constants::{
    AI_CALL_MAX_RETRIES, AI_CALL_TIMEOUT_SECS, OUTBOUND_SEND_MAX_RETRIES, OUTBOUND_SEND_TIMEOUT_SECS,
    TASK_KEY_TTL_SECS,
};
use crate::atoms::error::{GatewayError, GatewayResult};
use crate::config::Config;
use crate::resilience::backoff::{is_retryable_status, parse_retry_after, retry_delay};
use crate::resilience::CircuitBreaker;
use crate::worker::queue::DeliveryTask;

/// Outcome of processing one `DeliveryTask`, mirrored in logs and (should a
/// caller want it) a status-reporting sink. Not returned to the webhook —
/// delivery is fire-and-forget past the initial enqueue ack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    Success,
    Skipped { reason: &'static str },
    Failed { reason: String },
}

fn now_epoch_secs() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs()
}

/// `task:<conv_id>:<sha256(message)[:16]>` idempotency lock, same
/// SET-NX-EX primitive the webhook dedup and rate limiter use. Guards
/// against the same task being picked up twice (e.g. a queue redelivery).
pub struct TaskLock {
    redis: Option<ConnectionManager>,
}

impl TaskLock {
    pub fn new(redis: Option<ConnectionManager>) -> Self {
        TaskLock { redis }
    }

    fn key(conversation_id: &str, message: &str) -> String {
        let digest = Sha256::digest(message.as_bytes());
        let short = hex::encode(&digest[..8]);
        format!("task:{conversation_id}:{short}")
    }

    /// Returns `true` if this task has already been claimed (the caller
    /// should skip it). Fails open — no Redis means every task is
    /// processed, since a worker restart losing in-flight locks is
    /// preferable to silently dropping customer replies.
    async fn acquire(&self, conversation_id: &str, message: &str) -> bool {
        let Some(mut redis) = self.redis.clone() else {
            return false;
        };
        let key = Self::key(conversation_id, message);
        let set: redis::RedisResult<bool> = redis.set_nx(&key, "1").await;
        match set {
            Ok(true) => {
                let _: redis::RedisResult<()> = redis.expire(&key, TASK_KEY_TTL_SECS as i64).await;
                false
            }
            Ok(false) => true,
            Err(e) => {
                warn!(error = %e, "redis error acquiring task lock, processing anyway");
                false
            }
        }
    }
}

#[derive(Debug, Serialize)]
struct AiProcessRequest<'a> {
    conv_id: &'a str,
    message: &'a str,
    platform: &'a str,
    lang: &'a str,
}

#[derive(Debug, Deserialize)]
struct AiProcessResponse {
    response: String,
}

/// Calls this gateway's own `/ai/v1/process` endpoint. Modeled as an HTTP
/// hop rather than an in-process function call so the AI Processor can be
/// split into its own deployment later without touching the worker.
pub struct AiServiceClient {
    client: Client,
    base_url: String,
    api_key: String,
}

impl AiServiceClient {
    pub fn new(base_url: String, api_key: String) -> Self {
        AiServiceClient {
            client: Client::builder().timeout(Duration::from_secs(AI_CALL_TIMEOUT_SECS)).build().unwrap_or_default(),
            base_url,
            api_key,
        }
    }

    pub async fn process(&self, conv_id: &str, message: &str, platform: &str, lang: &str, correlation_id: &str) -> GatewayResult<String> {
        let url = format!("{}/ai/v1/process", self.base_url.trim_end_matches('/'));
        let body = AiProcessRequest { conv_id, message, platform, lang };

        let mut attempt = 0u32;
        loop {
            let sent = self
                .client
                .post(&url)
                .header("X-Correlation-ID", correlation_id)
                .header("X-API-Key", &self.api_key)
                .json(&body)
                .send()
                .await;

            match sent {
                Ok(resp) if resp.status().is_success() => {
                    let parsed: AiProcessResponse = resp
                        .json()
                        .await
                        .map_err(|e| GatewayError::ai_service("internal", format!("malformed AI response: {e}")))?;
                    if parsed.response.trim().is_empty() {
                        return Err(GatewayError::ai_service("internal", "empty AI response body"));
                    }
                    return Ok(parsed.response);
                }
                Ok(resp) => {
                    let status = resp.status().as_u16();
                    let retry_after = parse_retry_after(resp.headers().get("retry-after").and_then(|v| v.to_str().ok()));
                    let text = resp.text().await.unwrap_or_default();
                    if is_retryable_status(status) && attempt < AI_CALL_MAX_RETRIES {
                        warn!(status, attempt, "AI service call failed, retrying");
                        tokio::time::sleep(retry_delay(attempt, retry_after)).await;
                        attempt += 1;
                        continue;
                    }
                    return Err(GatewayError::ai_service("internal", format!("HTTP {status}: {text}")));
                }
                Err(e) if e.is_timeout() || e.is_connect() => {
                    if attempt < AI_CALL_MAX_RETRIES {
                        warn!(attempt, error = %e, "AI service call timed out/unreachable, retrying");
                        tokio::time::sleep(retry_delay(attempt, None)).await;
                        attempt += 1;
                        continue;
                    }
                    return Err(GatewayError::from(e));
                }
                Err(e) => return Err(GatewayError::from(e)),
            }
        }
    }
}

#[derive(Debug, Serialize)]
struct OutboundTextMessage<'a> {
    messaging_product: &'a str,
    to: &'a str,
    #[serde(rename = "type")]
    message_type: &'a str,
    text: OutboundTextBody<'a>,
}

#[derive(Debug, Serialize)]
struct OutboundTextBody<'a> {
    body: &'a str,
}

#[derive(Debug, Deserialize)]
struct OutboundSendResponse {
    #[serde(default)]
    messages: Vec<OutboundMessageId>,
}

#[derive(Debug, Deserialize)]
struct OutboundMessageId {
    id: String,
}

/// Sends the AI-generated reply back through the outbound platform API —
/// WhatsApp Cloud API shaped (`{messaging_product, to, type, text.body}`,
/// bearer auth), matching the Webhook Ingest module's inbound payload
/// shape so the round trip uses one consistent wire format.
pub struct OutboundClient {
    client: Client,
    messages_url: String,
    access_token: String,
    circuit: Arc<CircuitBreaker>,
}

impl OutboundClient {
    pub fn new(api_host: &str, api_version: &str, phone_number_id: &str, access_token: String, circuit: Arc<CircuitBreaker>) -> Self {
        OutboundClient {
            client: Client::builder().timeout(Duration::from_secs(OUTBOUND_SEND_TIMEOUT_SECS)).build().unwrap_or_default(),
            messages_url: format!("https://{api_host}/{api_version}/{phone_number_id}/messages"),
            access_token,
            circuit,
        }
    }

    /// Send `text` to `phone` (already normalized to E.164 by the ingest
    /// module's phone parsing). Returns the provider's message id.
    pub async fn send_message(&self, phone: &str, text: &str) -> GatewayResult<String> {
        if !phone.starts_with('+') || phone.len() < 9 {
            return Err(GatewayError::Validation(format!("invalid outbound phone number: {phone}")));
        }

        self.circuit.check()?;

        let payload = OutboundTextMessage {
            messaging_product: "whatsapp",
            to: phone,
            message_type: "text",
            text: OutboundTextBody { body: text },
        };

        let result = self.send_with_retry(&payload).await;
        match result {
            Ok(id) => {
                self.circuit.record_success();
                Ok(id)
            }
            Err(e) => {
                self.circuit.record_failure();
                Err(e)
            }
        }
    }

    async fn send_with_retry(&self, payload: &OutboundTextMessage<'_>) -> GatewayResult<String> {
        let mut attempt = 0u32;
        loop {
            let sent = self.client.post(&self.messages_url).bearer_auth(&self.access_token).json(payload).send().await;

            match sent {
                Ok(resp) if resp.status().is_success() => {
                    let body: OutboundSendResponse = resp.json().await?;
                    return body
                        .messages
                        .into_iter()
                        .next()
                        .map(|m| m.id)
                        .ok_or_else(|| GatewayError::external_service("whatsapp", "send succeeded but no message id returned"));
                }
                Ok(resp) if resp.status().as_u16() == 429 => {
                    let retry_after = parse_retry_after(resp.headers().get("retry-after").and_then(|v| v.to_str().ok()));
                    return Err(GatewayError::RateLimitExceeded { retry_after_secs: retry_after.unwrap_or(1) });
                }
                Ok(resp) => {
                    let status = resp.status().as_u16();
                    let text = resp.text().await.unwrap_or_default();
                    if is_retryable_status(status) && attempt < OUTBOUND_SEND_MAX_RETRIES {
                        warn!(status, attempt, "outbound send failed, retrying");
                        tokio::time::sleep(retry_delay(attempt, None)).await;
                        attempt += 1;
                        continue;
                    }
                    return Err(GatewayError::external_service("whatsapp", format!("HTTP {status}: {text}")));
                }
                Err(e) if attempt < OUTBOUND_SEND_MAX_RETRIES => {
                    warn!(attempt, error = %e, "outbound send failed, retrying");
                    tokio::time::sleep(retry_delay(attempt, None)).await;
                    attempt += 1;
                }
                Err(e) => return Err(GatewayError::from(e)),
            }
        }
    }
}

/// Background consumer: pulls `DeliveryTask`s off the queue and drives
/// them through the AI call and outbound send.
pub struct DeliveryWorker {
    receiver: mpsc::Receiver<DeliveryTask>,
    ai_client: Arc<AiServiceClient>,
    outbound: Arc<OutboundClient>,
    task_lock: Arc<TaskLock>,
}

impl DeliveryWorker {
    pub fn new(
        receiver: mpsc::Receiver<DeliveryTask>,
        ai_client: Arc<AiServiceClient>,
        outbound: Arc<OutboundClient>,
        task_lock: Arc<TaskLock>,
    ) -> Self {
        DeliveryWorker { receiver, ai_client, outbound, task_lock }
    }

    /// Runs until the sender side of the queue is dropped. Each task is
    /// awaited to completion — the spec mandates no cooperative
    /// cancellation of in-flight tasks, so there is nothing to select
    /// against besides the task itself finishing.
    pub async fn run(mut self) {
        while let Some(task) = self.receiver.recv().await {
            let outcome = self.handle(&task).await;
            match &outcome {
                TaskOutcome::Success => info!(conversation_id = %task.conversation_id, "delivery task completed"),
                TaskOutcome::Skipped { reason } => {
                    info!(conversation_id = %task.conversation_id, reason, "delivery task skipped")
                }
                TaskOutcome::Failed { reason } => {
                    error!(conversation_id = %task.conversation_id, reason, "delivery task failed")
                }
            }
        }
    }

    async fn handle(&self, task: &DeliveryTask) -> TaskOutcome {
        let start = Instant::now();

        if self.task_lock.acquire(&task.conversation_id, &task.message).await {
            return TaskOutcome::Skipped { reason: "duplicate_task" };
        }

        // `conv_id` on the wire is the AI Processor's conversation-lookup key,
        // which is the external user id (phone), not this store's internal
        // conversation UUID — the processor upserts by `(channel, conv_id)`.
        let reply = match self
            .ai_client
            .process(&task.external_user_id, &task.message, &task.channel, "en", &task.correlation_id)
            .await
        {
            Ok(text) => text,
            Err(e) => return TaskOutcome::Failed { reason: format!("ai_call: {e}") },
        };

        if let Err(e) = self.outbound.send_message(&task.external_user_id, &reply).await {
            return TaskOutcome::Failed { reason: format!("outbound_send: {e}") };
        }

        let _elapsed = start.elapsed();
        TaskOutcome::Success
    }
}

/// Builds the `X-Correlation-ID` a webhook handler attaches to each
/// enqueued task so the AI call and the outbound send share one id for
/// log correlation across both hops.
pub fn new_correlation_id() -> String {
    Uuid::new_v4().to_string()
}

/// Resolves the AI service base URL a worker should call: the
/// configured `AI_SERVICE_URL` if set, else this process's own bind
/// address/port (the common single-binary deployment).
pub fn ai_service_base_url(config: &Config) -> String {
    config.ai_service_url.clone().unwrap_or_else(|| {
        let host = if config.bind_address == "0.0.0.0" { "127.0.0.1" } else { &config.bind_address };
        format!("http://{host}:{}", config.port)
    })
}

/// `now_epoch_secs` is exercised indirectly via `TaskLock`'s TTL but kept
/// standalone since the webhook module's replay-window check needs the
/// same clock source.
pub fn epoch_now() -> u64 {
    now_epoch_secs()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_lock_key_is_stable_and_scoped_to_conversation() {
        let a = TaskLock::key("conv-1", "hello");
        let b = TaskLock::key("conv-1", "hello");
        let c = TaskLock::key("conv-2", "hello");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(a.starts_with("task:conv-1:"));
    }

    #[tokio::test]
    async fn task_lock_with_no_redis_never_blocks() {
        let lock = TaskLock::new(None);
        assert!(!lock.acquire("conv-1", "hello").await);
        assert!(!lock.acquire("conv-1", "hello").await);
    }

    #[test]
    fn ai_service_base_url_defaults_to_loopback() {
        let mut config = test_config();
        config.ai_service_url = None;
        config.bind_address = "0.0.0.0".to_string();
        config.port = 9000;
        assert_eq!(ai_service_base_url(&config), "http://127.0.0.1:9000");
    }

    #[test]
    fn ai_service_base_url_prefers_explicit_override() {
        let mut config = test_config();
        config.ai_service_url = Some("http://ai.internal:9090".to_string());
        assert_eq!(ai_service_base_url(&config), "http://ai.internal:9090");
    }

    fn test_config() -> Config {
        std::env::set_var("GEMINI_API_KEY", "test-key");
        let config = Config::from_env().unwrap();
        std::env::remove_var("GEMINI_API_KEY");
        config
    }
}
