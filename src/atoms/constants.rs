// ── Gateway Atoms: Constants ────────────────────────────────────────────────
// All named constants for the crate live here.
// Rationale: collecting constants in one place eliminates magic numbers,
// makes auditing easier, and keeps every layer's code self-documenting.
// Every value here has a matching `Config` field that can override it at
// runtime via environment variable — these are the fallback defaults.

// ── Message / payload limits ────────────────────────────────────────────
pub const MAX_MESSAGE_LENGTH: usize = 4096;
pub const MAX_CONTENT_LENGTH_BYTES: usize = 1024 * 1024;

// ── Conversation store ───────────────────────────────────────────────────
pub const CONVERSATION_TTL_SECONDS: u64 = 3600;
pub const CACHE_TTL_SECONDS: u64 = 300;
pub const CACHE_VERSION: &str = "v1.0";
pub const CONVERSATION_HISTORY_MAX_TURNS: usize = 20;
/// Capacity of the in-memory LRU fallback tier used when Redis is down.
pub const LOCAL_CONVERSATION_CACHE_CAPACITY: usize = 2048;

// ── Concurrency ──────────────────────────────────────────────────────────
pub const MAX_CONCURRENT_REQUESTS: usize = 50;

// ── Circuit breakers ─────────────────────────────────────────────────────
pub const LLM_FAILURE_THRESHOLD: u32 = 5;
pub const LLM_RECOVERY_TIMEOUT_SECS: u64 = 60;
pub const ECOMMERCE_FAILURE_THRESHOLD: u32 = 3;
pub const ECOMMERCE_RECOVERY_TIMEOUT_SECS: u64 = 30;
pub const HALF_OPEN_MAX_CALLS: u32 = 1;
pub const HALF_OPEN_SUCCESS_THRESHOLD: u32 = 1;
/// Bounded ring buffer of state transitions kept per breaker for diagnostics.
pub const CIRCUIT_HISTORY_MAX_ENTRIES: usize = 50;
pub const CIRCUIT_HISTORY_TTL_SECS: u64 = 3600;

// ── Rate limiting ─────────────────────────────────────────────────────────
pub const RATE_LIMIT_REQUESTS: u32 = 100;
pub const RATE_LIMIT_WINDOW_SECS: u64 = 60;
pub const WEBHOOK_RATE_LIMIT_REQUESTS: u32 = 1000;
pub const WEBHOOK_RATE_LIMIT_WINDOW_SECS: u64 = 60;

// ── Retry / backoff ────────────────────────────────────────────────────────
pub const MAX_RETRIES: u32 = 3;
pub const INITIAL_RETRY_DELAY_MS: u64 = 1000;
pub const MAX_RETRY_DELAY_MS: u64 = 30_000;
pub const MESSAGE_RETRY_ATTEMPTS: u32 = 3;
pub const MESSAGE_RETRY_DELAY_SECS: u64 = 5;
pub const WEBHOOK_MAX_RETRIES: u32 = 3;

// ── Timeouts ───────────────────────────────────────────────────────────────
pub const WEBHOOK_TIMEOUT_SECS: u64 = 10;
pub const AI_SERVICE_TIMEOUT_SECS: u64 = 30;
pub const REQUEST_TIMEOUT_SECS: u64 = 30;
pub const HEALTH_CHECK_TIMEOUT_SECS: u64 = 5;

// ── Knowledge retrieval ──────────────────────────────────────────────────
pub const SIMILARITY_THRESHOLD: f64 = 0.75;
pub const EMBEDDING_DIMENSION: usize = 768;
pub const EMBEDDING_MAX_RETRIES: u32 = 3;
pub const EMBEDDING_RETRY_DELAY_SECS: f64 = 1.0;
pub const EMBEDDING_TIMEOUT_SECS: u64 = 15;
pub const EMBEDDING_BATCH_SIZE: usize = 10;
pub const MAX_KNOWLEDGE_RESULTS: usize = 5;

// ── Intent analysis ───────────────────────────────────────────────────────
pub const INTENT_CONFIDENCE_THRESHOLD: f64 = 0.7;
/// Fuzzy-match acceptance threshold, on strsim's 0.0-1.0 normalized scale
/// (the original 0-100 `rapidfuzz` scale divided by 100).
pub const INTENT_FUZZY_THRESHOLD: f64 = 0.70;

// ── E-commerce ────────────────────────────────────────────────────────────
pub const MAX_PRODUCTS_TO_SHOW: usize = 5;

// ── Webhook dedup ─────────────────────────────────────────────────────────
pub const DEDUP_KEY_TTL_SECS: u64 = 300;

// ── Delivery worker ───────────────────────────────────────────────────────
pub const DELIVERY_QUEUE_CAPACITY: usize = 1024;
pub const DELIVERY_MAX_ATTEMPTS: u32 = 3;
pub const TASK_KEY_TTL_SECS: u64 = 300;
pub const AI_CALL_TIMEOUT_SECS: u64 = 90;
pub const AI_CALL_MAX_RETRIES: u32 = 5;
/// No explicit figure is given for the outbound platform send beyond its
/// own retry policy (3 attempts); this mirrors the e-commerce client's
/// timeout since both are simple external REST calls.
pub const OUTBOUND_SEND_TIMEOUT_SECS: u64 = 15;
pub const OUTBOUND_SEND_MAX_RETRIES: u32 = 3;
pub const WHATSAPP_API_VERSION: &str = "v21.0";
pub const WHATSAPP_API_HOST: &str = "graph.facebook.com";
