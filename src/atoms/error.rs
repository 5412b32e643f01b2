// ── Gateway Atoms: Error Types ─────────────────────────────────────────────
// Single canonical error enum for the gateway, built with `thiserror`.
//
// Design rules:
//   • Variants are coarse-grained by domain (I/O, DB, Provider, Config…).
//   • The `#[from]` attribute wires std/external error conversions automatically.
//   • `GatewayError::status_code()` maps each variant to the HTTP status the
//     webhook/ai boundary should return, so handlers never hand-roll the
//     mapping at each call site.
//   • No variant carries secret material (API keys, signing secrets) in its
//     message.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum GatewayError {
    /// Filesystem or OS-level I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization / deserialization failure.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// HTTP / network failure (reqwest layer).
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// SQLite / rusqlite database failure.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Redis failure — connection, command, or script error.
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// Inbound payload failed schema / size / type validation.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Rate limit exceeded for the given identifier; carries the
    /// `Retry-After` hint in seconds.
    #[error("Rate limit exceeded, retry after {retry_after_secs}s")]
    RateLimitExceeded { retry_after_secs: u64 },

    /// A circuit breaker is OPEN and is refusing calls to `dependency`.
    #[error("Circuit breaker open for dependency: {0}")]
    CircuitBreakerOpen(String),

    /// LLM / AI provider failure (non-secret detail only).
    #[error("AI service error: {provider}: {message}")]
    AiService { provider: String, message: String },

    /// Failure calling an external service that is not an LLM provider
    /// (e-commerce API, delivery channel API, embedding service…).
    #[error("External service error: {service}: {message}")]
    ExternalService { service: String, message: String },

    /// Infrastructure misconfiguration or unavailability (missing env var,
    /// unreachable Redis/SQLite at startup, etc).
    #[error("Infrastructure error: {0}")]
    Infrastructure(String),

    /// The inbound event (by idempotency key) has already been processed.
    #[error("Duplicate event: {0}")]
    DuplicateEvent(String),

    /// Webhook signature verification failed.
    #[error("Auth error: {0}")]
    Auth(String),

    /// Service configuration is invalid or missing.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Catch-all for errors that do not yet have a dedicated variant.
    /// Prefer adding a specific variant over using this in new code.
    #[error("{0}")]
    Other(String),
}

impl GatewayError {
    pub fn ai_service(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::AiService { provider: provider.into(), message: message.into() }
    }

    pub fn external_service(service: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ExternalService { service: service.into(), message: message.into() }
    }

    /// HTTP status code the webhook/ai boundary should answer with for this
    /// error. Kept centralized so every entry point (webhook ingest, the
    /// internal `/ai/v1/process` endpoint) returns the same mapping.
    pub fn status_code(&self) -> u16 {
        match self {
            GatewayError::Validation(_) => 400,
            GatewayError::Auth(_) => 401,
            GatewayError::DuplicateEvent(_) => 200, // already processed — ack and move on
            GatewayError::RateLimitExceeded { .. } => 429,
            GatewayError::CircuitBreakerOpen(_) => 503,
            GatewayError::AiService { .. } => 502,
            GatewayError::ExternalService { .. } => 502,
            GatewayError::Infrastructure(_) => 503,
            GatewayError::Config(_) => 500,
            GatewayError::Io(_)
            | GatewayError::Serialization(_)
            | GatewayError::Network(_)
            | GatewayError::Database(_)
            | GatewayError::Redis(_)
            | GatewayError::Other(_) => 500,
        }
    }

    /// Whether retrying the same operation later is worth attempting —
    /// used by the delivery worker's bounded-retry loop.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            GatewayError::Network(_)
                | GatewayError::Redis(_)
                | GatewayError::AiService { .. }
                | GatewayError::ExternalService { .. }
                | GatewayError::CircuitBreakerOpen(_)
        )
    }
}

impl From<String> for GatewayError {
    fn from(s: String) -> Self {
        GatewayError::Other(s)
    }
}

impl From<&str> for GatewayError {
    fn from(s: &str) -> Self {
        GatewayError::Other(s.to_string())
    }
}

/// All gateway operations should return this type.
pub type GatewayResult<T> = Result<T, GatewayError>;

impl From<GatewayError> for String {
    fn from(e: GatewayError) -> Self {
        e.to_string()
    }
}
