// Webhook Ingest & Validation — the gateway's front door.
// Raw `TcpListener` HTTP server, same pattern the engine uses for its other
// inbound bridges: no framework, hand-rolled request parsing and response
// writing, a per-connection spawned task, and a stop signal checked between
// accepts so the server can shut down cleanly.
//
// Routes:
//   GET  /webhook                — platform subscription verification
//   POST /webhook                — inbound message delivery
//   GET  /health                 — liveness/readiness probe
//   GET  /metrics                — Prometheus text exposition (API-key guarded)
//   POST /ai/v1/process           — internal, API-key guarded
//   POST /ai/v1/feedback          — internal, API-key guarded

pub mod dedup;
pub mod payload;
pub mod signature;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{error, info, warn};

use crate::atoms::types::{Conversation, Message, MessageDirection, MessageStatus};
use crate::context::ServiceContext;
use crate::rate_limiter::rate_limit_key;
use crate::webhook::payload::{is_within_replay_window, parse_event, WebhookEvent};
use crate::worker::{epoch_now, new_correlation_id};

const MAX_REQUEST_BYTES: usize = 65536;

static REQUESTS_TOTAL: AtomicU64 = AtomicU64::new(0);
static WEBHOOK_ACCEPTED_TOTAL: AtomicU64 = AtomicU64::new(0);
static WEBHOOK_REJECTED_TOTAL: AtomicU64 = AtomicU64::new(0);
static WEBHOOK_DUPLICATE_TOTAL: AtomicU64 = AtomicU64::new(0);

/// Runs the ingest HTTP server until `stop` is flipped. Intended to be
/// spawned as its own background task alongside the `DeliveryWorker`.
pub async fn run_server(context: Arc<ServiceContext>, stop: Arc<AtomicBool>) -> std::io::Result<()> {
    let addr = format!("{}:{}", context.config.bind_address, context.config.port);
    let listener = TcpListener::bind(&addr).await?;
    info!(address = %addr, "webhook ingest listening");

    loop {
        if stop.load(Ordering::Relaxed) {
            break;
        }

        match tokio::time::timeout(Duration::from_secs(1), listener.accept()).await {
            Ok(Ok((stream, peer))) => {
                let ctx = context.clone();
                let peer_ip = peer.ip().to_string();
                tokio::spawn(async move {
                    if let Err(e) = handle_connection(stream, &peer_ip, ctx).await {
                        warn!(peer = %peer_ip, error = %e, "webhook connection error");
                    }
                });
            }
            Ok(Err(e)) => warn!(error = %e, "accept error"),
            Err(_) => {}
        }
    }

    info!("webhook ingest stopped");
    Ok(())
}

async fn handle_connection(mut stream: TcpStream, peer_ip: &str, ctx: Arc<ServiceContext>) -> std::io::Result<()> {
    let mut buf = vec![0u8; MAX_REQUEST_BYTES];
    let n = stream.read(&mut buf).await?;
    if n == 0 {
        return Ok(());
    }
    buf.truncate(n);

    REQUESTS_TOTAL.fetch_add(1, Ordering::Relaxed);

    let Some(request) = ParsedRequest::parse(&buf) else {
        return send_json(&mut stream, 400, &json!({"error": "malformed request"})).await;
    };

    let (status, body) = route(&request, peer_ip, &ctx).await;
    send_json(&mut stream, status, &body).await
}

struct ParsedRequest<'a> {
    method: &'a str,
    path: &'a str,
    query: HashMap<String, String>,
    headers: HashMap<String, String>,
    body: &'a [u8],
}

impl<'a> ParsedRequest<'a> {
    fn parse(raw: &'a [u8]) -> Option<Self> {
        let header_end = find_header_end(raw)?;
        let header_text = std::str::from_utf8(&raw[..header_end]).ok()?;
        let mut lines = header_text.split("\r\n");
        let first_line = lines.next()?;
        let mut parts = first_line.split_whitespace();
        let method = parts.next()?;
        let path_and_query = parts.next()?;

        let (path, query) = match path_and_query.split_once('?') {
            Some((p, q)) => (p, parse_query(q)),
            None => (path_and_query, HashMap::new()),
        };

        let mut headers = HashMap::new();
        for line in lines {
            if let Some((name, value)) = line.split_once(':') {
                headers.insert(name.trim().to_ascii_lowercase(), value.trim().to_string());
            }
        }

        let body_start = header_end + 4; // past the blank-line separator
        let body = raw.get(body_start..).unwrap_or(&[]);

        Some(ParsedRequest { method, path, query, headers, body })
    }

    fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(|s| s.as_str())
    }
}

fn find_header_end(raw: &[u8]) -> Option<usize> {
    raw.windows(4).position(|w| w == b"\r\n\r\n")
}

fn parse_query(query: &str) -> HashMap<String, String> {
    query
        .split('&')
        .filter_map(|pair| {
            let (k, v) = pair.split_once('=')?;
            Some((urlencoding::decode(k).ok()?.into_owned(), urlencoding::decode(v).ok()?.into_owned()))
        })
        .collect()
}

async fn route(req: &ParsedRequest<'_>, peer_ip: &str, ctx: &Arc<ServiceContext>) -> (u16, serde_json::Value) {
    match (req.method, req.path) {
        ("GET", "/webhook") => handle_verify(req, ctx),
        ("POST", "/webhook") => handle_inbound(req, peer_ip, ctx).await,
        ("GET", "/health") => handle_health(ctx).await,
        ("GET", "/metrics") => handle_metrics(req, ctx),
        ("POST", "/ai/v1/process") => handle_ai_process(req, ctx).await,
        ("POST", "/ai/v1/feedback") => handle_feedback(req),
        _ => (404, json!({"error": "not found"})),
    }
}

// ── GET /webhook — subscription verification ───────────────────────────

fn handle_verify(req: &ParsedRequest<'_>, ctx: &Arc<ServiceContext>) -> (u16, serde_json::Value) {
    let mode = req.query.get("hub.mode");
    let token = req.query.get("hub.verify_token");
    let challenge = req.query.get("hub.challenge");

    let expected = ctx.config.webhook_verify_token.as_deref();
    let verified = mode.is_some_and(|m| m == "subscribe")
        && expected.is_some()
        && token.map(|t| t.as_str()) == expected;

    match (verified, challenge) {
        (true, Some(challenge)) => (200, serde_json::Value::String(challenge.clone())),
        _ => (403, json!({"error": "verification failed"})),
    }
}

// ── POST /webhook — inbound message delivery ────────────────────────────

async fn handle_inbound(req: &ParsedRequest<'_>, peer_ip: &str, ctx: &Arc<ServiceContext>) -> (u16, serde_json::Value) {
    let identifier = rate_limit_key(None, None, peer_ip);
    match ctx.webhook_rate_limiter.is_allowed(&identifier).await {
        Ok(true) => {}
        Ok(false) => {
            WEBHOOK_REJECTED_TOTAL.fetch_add(1, Ordering::Relaxed);
            return (429, json!({"error": "rate_limited", "retry_after": ctx.webhook_rate_limiter.retry_after_secs()}));
        }
        Err(e) => {
            warn!(error = %e, "webhook rate limiter error, allowing request (fail open)");
        }
    }

    let Some(secret) = ctx.config.webhook_secret.as_deref() else {
        error!("WEBHOOK_SECRET is not configured; rejecting all inbound webhooks");
        return (500, json!({"error": "webhook not configured"}));
    };

    let Some(signature_header) = req.header("x-hub-signature-256") else {
        WEBHOOK_REJECTED_TOTAL.fetch_add(1, Ordering::Relaxed);
        return (401, json!({"error": "missing signature"}));
    };

    if !signature::verify(secret, req.body, signature_header) {
        WEBHOOK_REJECTED_TOTAL.fetch_add(1, Ordering::Relaxed);
        return (401, json!({"error": "signature verification failed"}));
    }

    let event = match parse_event(req.body) {
        Ok(event) => event,
        Err(crate::atoms::error::GatewayError::Validation(msg)) if msg.starts_with("non_text_message:") => {
            return (200, json!({"status": "OK", "reason": "non_text_ignored"}));
        }
        Err(e) => {
            WEBHOOK_REJECTED_TOTAL.fetch_add(1, Ordering::Relaxed);
            return (e.status_code(), json!({"error": e.to_string()}));
        }
    };

    let message = match event {
        WebhookEvent::Message(m) => m,
        WebhookEvent::StatusUpdate { .. } | WebhookEvent::Unhandled => {
            return (200, json!({"status": "OK", "reason": "no_action_required"}));
        }
    };

    if !is_within_replay_window(&message.timestamp, ctx.config.webhook_timeout.as_secs(), epoch_now()) {
        WEBHOOK_REJECTED_TOTAL.fetch_add(1, Ordering::Relaxed);
        return (401, json!({"error": "stale timestamp, possible replay"}));
    }

    let idempotency_key = format!("{}:{}", message.message_id, message.phone);
    match ctx.dedup.is_duplicate(&idempotency_key).await {
        Ok(true) => {
            WEBHOOK_DUPLICATE_TOTAL.fetch_add(1, Ordering::Relaxed);
            return (200, json!({"status": "OK", "reason": "duplicate_ignored"}));
        }
        Ok(false) => {}
        Err(e) => return (e.status_code(), json!({"error": e.to_string()})),
    }

    let conversation: Conversation = match ctx.store.get_or_create_conversation("whatsapp", &message.phone) {
        Ok(c) => c,
        Err(e) => return (e.status_code(), json!({"error": e.to_string()})),
    };

    if let Err(e) = ctx.store.add_message(&Message {
        id: uuid::Uuid::new_v4().to_string(),
        conversation_id: conversation.id.clone(),
        direction: MessageDirection::Inbound,
        content: message.content.clone(),
        status: MessageStatus::Pending,
        intent: None,
        created_at: String::new(),
    }) {
        return (e.status_code(), json!({"error": e.to_string()}));
    }

    let task = crate::worker::queue::DeliveryTask {
        conversation_id: conversation.id.clone(),
        channel: conversation.channel.clone(),
        external_user_id: message.phone.clone(),
        message: message.content.clone(),
        correlation_id: new_correlation_id(),
    };

    match ctx.delivery_sender.try_send(task) {
        Ok(()) => {
            WEBHOOK_ACCEPTED_TOTAL.fetch_add(1, Ordering::Relaxed);
            (200, json!({"status": "OK"}))
        }
        Err(_) => (500, json!({"error": "delivery queue full"})),
    }
}

// ── GET /health ──────────────────────────────────────────────────────────

async fn handle_health(ctx: &Arc<ServiceContext>) -> (u16, serde_json::Value) {
    let redis_ok = ctx.rate_limiter.redis_reachable().await;
    let db_ok = ctx.store.recent_messages("__healthcheck__", 1).is_ok();
    let ai_ok = !ctx.providers.providers().is_empty();

    let healthy = redis_ok && db_ok && ai_ok;
    let status = if healthy { "healthy" } else { "degraded" };

    (
        if healthy { 200 } else { 503 },
        json!({
            "status": status,
            "dependencies": {
                "redis": redis_ok,
                "db": db_ok,
                "ai_service": ai_ok,
            }
        }),
    )
}

// ── GET /metrics — hand-rolled Prometheus text exposition ──────────────
//
// No metrics crate is introduced: the teacher's dependency stack carries
// `tracing`/`tracing-subscriber` for structured logs but nothing for metric
// export, so this renders the exposition format directly from the atomic
// counters and circuit breaker snapshots already maintained in-process.

fn handle_metrics(req: &ParsedRequest<'_>, ctx: &Arc<ServiceContext>) -> (u16, serde_json::Value) {
    if !ctx.config.metrics_enabled {
        return (404, json!({"error": "metrics disabled"}));
    }
    if !api_key_ok(req, ctx) {
        return (401, json!({"error": "invalid api key"}));
    }

    let mut out = String::new();
    out.push_str("# HELP gateway_requests_total Total HTTP requests handled.\n");
    out.push_str("# TYPE gateway_requests_total counter\n");
    out.push_str(&format!("gateway_requests_total {}\n", REQUESTS_TOTAL.load(Ordering::Relaxed)));
    out.push_str("# HELP webhook_accepted_total Inbound webhooks accepted and enqueued.\n");
    out.push_str("# TYPE webhook_accepted_total counter\n");
    out.push_str(&format!("webhook_accepted_total {}\n", WEBHOOK_ACCEPTED_TOTAL.load(Ordering::Relaxed)));
    out.push_str("# HELP webhook_rejected_total Inbound webhooks rejected (signature, replay, rate limit).\n");
    out.push_str("# TYPE webhook_rejected_total counter\n");
    out.push_str(&format!("webhook_rejected_total {}\n", WEBHOOK_REJECTED_TOTAL.load(Ordering::Relaxed)));
    out.push_str("# HELP webhook_duplicate_total Inbound webhooks deduplicated.\n");
    out.push_str("# TYPE webhook_duplicate_total counter\n");
    out.push_str(&format!("webhook_duplicate_total {}\n", WEBHOOK_DUPLICATE_TOTAL.load(Ordering::Relaxed)));

    out.push_str("# HELP circuit_breaker_state Circuit breaker state (0=closed, 1=half_open, 2=open).\n");
    out.push_str("# TYPE circuit_breaker_state gauge\n");
    for snapshot in ctx.circuits.snapshot_all() {
        let state_value = match snapshot.state {
            crate::atoms::types::CircuitState::Closed => 0,
            crate::atoms::types::CircuitState::HalfOpen => 1,
            crate::atoms::types::CircuitState::Open => 2,
        };
        out.push_str(&format!("circuit_breaker_state{{dependency=\"{}\"}} {}\n", snapshot.name, state_value));
    }

    (200, serde_json::Value::String(out))
}

// ── POST /ai/v1/process — internal ───────────────────────────────────────

#[derive(Debug, Deserialize)]
struct AiProcessRequestBody {
    conv_id: String,
    message: String,
    platform: String,
    #[serde(default)]
    #[allow(dead_code)]
    lang: Option<String>,
    #[serde(default)]
    #[allow(dead_code)]
    user_id: Option<String>,
}

#[derive(Debug, Serialize)]
struct AiProcessResponseBody {
    response: String,
    status: &'static str,
    timestamp: u64,
}

async fn handle_ai_process(req: &ParsedRequest<'_>, ctx: &Arc<ServiceContext>) -> (u16, serde_json::Value) {
    if !api_key_ok(req, ctx) {
        return (401, json!({"error": "invalid api key"}));
    }

    let body: AiProcessRequestBody = match serde_json::from_slice(req.body) {
        Ok(b) => b,
        Err(e) => return (400, json!({"error": format!("invalid request body: {e}")})),
    };

    if body.message.trim().is_empty() || body.conv_id.trim().is_empty() {
        return (400, json!({"error": "conv_id and message are required"}));
    }

    let result = ctx.ai_processor.process_message(&body.message, &body.platform, &body.conv_id).await;

    if let Some(err) = &result.error {
        let status = if err == "validation_error" { 400 } else { 500 };
        return (status, json!({"error": err}));
    }

    (
        200,
        serde_json::to_value(AiProcessResponseBody { response: result.response, status: "ok", timestamp: epoch_now() })
            .unwrap_or_else(|_| json!({"error": "serialization failure"})),
    )
}

// ── POST /ai/v1/feedback ─────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct FeedbackRequestBody {
    #[allow(dead_code)]
    conv_id: String,
    rating: u8,
    #[serde(default)]
    #[allow(dead_code)]
    comment: Option<String>,
}

fn handle_feedback(req: &ParsedRequest<'_>) -> (u16, serde_json::Value) {
    let body: FeedbackRequestBody = match serde_json::from_slice(req.body) {
        Ok(b) => b,
        Err(e) => return (400, json!({"error": format!("invalid request body: {e}")})),
    };

    if !(1..=5).contains(&body.rating) {
        return (400, json!({"error": "rating must be between 1 and 5"}));
    }

    (200, json!({"status": "OK"}))
}

fn api_key_ok(req: &ParsedRequest<'_>, ctx: &Arc<ServiceContext>) -> bool {
    let Some(expected) = ctx.config.internal_api_key.as_deref() else {
        return false;
    };
    req.header("x-api-key").is_some_and(|provided| constant_time_eq(provided.as_bytes(), expected.as_bytes()))
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    use subtle::ConstantTimeEq;
    a.len() == b.len() && a.ct_eq(b).into()
}

async fn send_json(stream: &mut TcpStream, status: u16, body: &serde_json::Value) -> std::io::Result<()> {
    let status_text = status_text(status);
    let payload = body.to_string();
    let response = format!(
        "HTTP/1.1 {status} {status_text}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{payload}",
        payload.len()
    );
    stream.write_all(response.as_bytes()).await
}

fn status_text(status: u16) -> &'static str {
    match status {
        200 => "OK",
        400 => "Bad Request",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not Found",
        429 => "Too Many Requests",
        503 => "Service Unavailable",
        _ => "Internal Server Error",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_get_request_with_query_string() {
        let raw = b"GET /webhook?hub.mode=subscribe&hub.verify_token=abc&hub.challenge=123 HTTP/1.1\r\nHost: x\r\n\r\n";
        let req = ParsedRequest::parse(raw).unwrap();
        assert_eq!(req.method, "GET");
        assert_eq!(req.path, "/webhook");
        assert_eq!(req.query.get("hub.mode").unwrap(), "subscribe");
        assert_eq!(req.query.get("hub.challenge").unwrap(), "123");
    }

    #[test]
    fn parses_headers_case_insensitively() {
        let raw = b"POST /webhook HTTP/1.1\r\nX-Hub-Signature-256: sha256=deadbeef\r\nContent-Type: application/json\r\n\r\n{}";
        let req = ParsedRequest::parse(raw).unwrap();
        assert_eq!(req.header("x-hub-signature-256").unwrap(), "sha256=deadbeef");
        assert_eq!(req.body, b"{}");
    }

    #[test]
    fn malformed_request_with_no_header_terminator_fails_to_parse() {
        assert!(ParsedRequest::parse(b"garbage, not an http request").is_none());
    }

    #[test]
    fn constant_time_eq_rejects_different_lengths_and_values() {
        assert!(constant_time_eq(b"abc", b"abc"));
        assert!(!constant_time_eq(b"abc", b"abd"));
        assert!(!constant_time_eq(b"abc", b"ab"));
    }
}
