// Gateway Config — environment-driven runtime configuration.
// Every field here has a named constant default in `atoms::constants`; the
// environment variable overrides it when present. Loaded once at startup
// into an immutable `Config` that is then shared (via `Arc`) through the
// `ServiceContext`.

use std::env;
use std::time::Duration;

use crate::atoms::constants as c;
use crate::atoms::error::{GatewayError, GatewayResult};

fn env_string(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_opt_string(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.is_empty())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_bool(key: &str, default: bool) -> bool {
    match env::var(key) {
        Ok(v) => matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"),
        Err(_) => default,
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    // ── Secrets ──────────────────────────────────────────────────────────
    pub gemini_api_key: Option<String>,
    pub openai_api_key: Option<String>,
    pub internal_api_key: Option<String>,
    pub webhook_secret: Option<String>,
    pub webhook_verify_token: Option<String>,

    // ── Provider models ──────────────────────────────────────────────────
    pub gemini_model: String,
    pub openai_model: String,
    pub embedding_model: String,

    // ── Webhook / HTTP ────────────────────────────────────────────────────
    pub bind_address: String,
    pub port: u16,
    pub webhook_timeout: Duration,
    pub webhook_max_retries: u32,
    pub ai_service_timeout: Duration,
    pub request_timeout: Duration,
    pub health_check_timeout: Duration,
    pub max_content_length_bytes: usize,
    pub strict_redis_dedup: bool,

    // ── Message / conversation limits ───────────────────────────────────
    pub max_message_length: usize,
    pub conversation_ttl_secs: u64,
    pub cache_ttl_secs: u64,
    pub cache_version: String,

    // ── Concurrency ───────────────────────────────────────────────────────
    pub max_concurrent_requests: usize,

    // ── Circuit breakers ──────────────────────────────────────────────────
    pub llm_failure_threshold: u32,
    pub llm_recovery_timeout_secs: u64,
    pub ecommerce_failure_threshold: u32,
    pub ecommerce_recovery_timeout_secs: u64,

    // ── Rate limiting ─────────────────────────────────────────────────────
    pub rate_limit_requests: u32,
    pub rate_limit_window_secs: u64,
    pub webhook_rate_limit_requests: u32,
    pub webhook_rate_limit_window_secs: u64,

    // ── Knowledge retrieval ───────────────────────────────────────────────
    pub similarity_threshold: f64,
    pub embedding_dimension: usize,
    pub embedding_batch_size: usize,
    pub embedding_service_url: Option<String>,

    // ── E-commerce ─────────────────────────────────────────────────────────
    pub ecommerce_api_url: Option<String>,
    pub max_products_to_show: usize,

    // ── Delivery worker / outbound platform ──────────────────────────────
    /// Base URL of the AI processing endpoint the worker calls, e.g.
    /// `http://127.0.0.1:8080`. Defaults to this process's own bind
    /// address/port: the AI Processor is mounted in the same binary, but
    /// the worker still reaches it over HTTP so it can be split into a
    /// separate deployment without code changes.
    pub ai_service_url: Option<String>,
    pub whatsapp_access_token: Option<String>,
    pub whatsapp_phone_number_id: Option<String>,
    pub whatsapp_api_host: String,
    pub whatsapp_api_version: String,

    // ── Redis / SQLite ────────────────────────────────────────────────────
    pub redis_url: String,
    pub sqlite_path: String,

    // ── Observability ──────────────────────────────────────────────────────
    pub log_level: String,
    pub log_format: String,
    pub metrics_enabled: bool,
}

impl Config {
    /// Load configuration from the process environment, applying the
    /// defaults in `atoms::constants` for anything unset. Fails only if a
    /// value that genuinely has no safe default is missing.
    pub fn from_env() -> GatewayResult<Self> {
        let config = Config {
            gemini_api_key: env_opt_string("GEMINI_API_KEY"),
            openai_api_key: env_opt_string("OPENAI_API_KEY"),
            internal_api_key: env_opt_string("INTERNAL_API_KEY"),
            webhook_secret: env_opt_string("WEBHOOK_SECRET"),
            webhook_verify_token: env_opt_string("WEBHOOK_VERIFY_TOKEN"),

            gemini_model: env_string("GEMINI_MODEL", "gemini-1.5-flash-latest"),
            openai_model: env_string("OPENAI_MODEL", "gpt-4o-mini"),
            embedding_model: env_string("EMBEDDING_MODEL", "text-embedding-004"),

            bind_address: env_string("BIND_ADDRESS", "0.0.0.0"),
            port: env_parse("PORT", 8080),
            webhook_timeout: Duration::from_secs(env_parse("WEBHOOK_TIMEOUT", c::WEBHOOK_TIMEOUT_SECS)),
            webhook_max_retries: env_parse("WEBHOOK_MAX_RETRIES", c::WEBHOOK_MAX_RETRIES),
            ai_service_timeout: Duration::from_secs(env_parse(
                "AI_SERVICE_TIMEOUT",
                c::AI_SERVICE_TIMEOUT_SECS,
            )),
            request_timeout: Duration::from_secs(env_parse("REQUEST_TIMEOUT", c::REQUEST_TIMEOUT_SECS)),
            health_check_timeout: Duration::from_secs(env_parse(
                "HEALTH_CHECK_TIMEOUT",
                c::HEALTH_CHECK_TIMEOUT_SECS,
            )),
            max_content_length_bytes: env_parse(
                "MAX_CONTENT_LENGTH",
                c::MAX_CONTENT_LENGTH_BYTES,
            ),
            strict_redis_dedup: env_bool("STRICT_REDIS_DEDUP", false),

            max_message_length: env_parse("MAX_MESSAGE_LENGTH", c::MAX_MESSAGE_LENGTH),
            conversation_ttl_secs: env_parse("CONVERSATION_TTL_SECONDS", c::CONVERSATION_TTL_SECONDS),
            cache_ttl_secs: env_parse("CACHE_TTL", c::CACHE_TTL_SECONDS),
            cache_version: env_string("CACHE_VERSION", c::CACHE_VERSION),

            max_concurrent_requests: env_parse(
                "MAX_CONCURRENT_REQUESTS",
                c::MAX_CONCURRENT_REQUESTS,
            ),

            llm_failure_threshold: env_parse("LLM_FAILURE_THRESHOLD", c::LLM_FAILURE_THRESHOLD),
            llm_recovery_timeout_secs: env_parse(
                "LLM_RECOVERY_TIMEOUT",
                c::LLM_RECOVERY_TIMEOUT_SECS,
            ),
            ecommerce_failure_threshold: env_parse(
                "ECOMMERCE_FAILURE_THRESHOLD",
                c::ECOMMERCE_FAILURE_THRESHOLD,
            ),
            ecommerce_recovery_timeout_secs: env_parse(
                "ECOMMERCE_RECOVERY_TIMEOUT",
                c::ECOMMERCE_RECOVERY_TIMEOUT_SECS,
            ),

            rate_limit_requests: env_parse("RATE_LIMIT_REQUESTS", c::RATE_LIMIT_REQUESTS),
            rate_limit_window_secs: env_parse("RATE_LIMIT_WINDOW", c::RATE_LIMIT_WINDOW_SECS),
            webhook_rate_limit_requests: env_parse(
                "WEBHOOK_RATE_LIMIT_REQUESTS",
                c::WEBHOOK_RATE_LIMIT_REQUESTS,
            ),
            webhook_rate_limit_window_secs: env_parse(
                "WEBHOOK_RATE_LIMIT_WINDOW",
                c::WEBHOOK_RATE_LIMIT_WINDOW_SECS,
            ),

            similarity_threshold: env_parse("SIMILARITY_THRESHOLD", c::SIMILARITY_THRESHOLD),
            embedding_dimension: env_parse("EMBEDDING_DIMENSION", c::EMBEDDING_DIMENSION),
            embedding_batch_size: env_parse("EMBEDDING_BATCH_SIZE", c::EMBEDDING_BATCH_SIZE),
            embedding_service_url: env_opt_string("EMBEDDING_SERVICE_URL"),

            ecommerce_api_url: env_opt_string("ECOMMERCE_API_URL"),
            max_products_to_show: env_parse("MAX_PRODUCTS_TO_SHOW", c::MAX_PRODUCTS_TO_SHOW),

            ai_service_url: env_opt_string("AI_SERVICE_URL"),
            whatsapp_access_token: env_opt_string("WHATSAPP_ACCESS_TOKEN"),
            whatsapp_phone_number_id: env_opt_string("WHATSAPP_PHONE_NUMBER_ID"),
            whatsapp_api_host: env_string("WHATSAPP_API_HOST", c::WHATSAPP_API_HOST),
            whatsapp_api_version: env_string("WHATSAPP_API_VERSION", c::WHATSAPP_API_VERSION),

            redis_url: env_string("REDIS_URL", "redis://127.0.0.1:6379"),
            sqlite_path: env_string("SQLITE_PATH", "gateway.db"),

            log_level: env_string("LOG_LEVEL", "info"),
            log_format: env_string("LOG_FORMAT", "json"),
            metrics_enabled: env_bool("METRICS_ENABLED", true),
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> GatewayResult<()> {
        if self.gemini_api_key.is_none() && self.openai_api_key.is_none() {
            return Err(GatewayError::Config(
                "at least one of GEMINI_API_KEY or OPENAI_API_KEY must be set".into(),
            ));
        }
        if self.max_message_length == 0 {
            return Err(GatewayError::Config("MAX_MESSAGE_LENGTH must be > 0".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_bool_accepts_common_truthy_forms() {
        std::env::set_var("TEST_BOOL_FLAG", "yes");
        assert!(env_bool("TEST_BOOL_FLAG", false));
        std::env::set_var("TEST_BOOL_FLAG", "0");
        assert!(!env_bool("TEST_BOOL_FLAG", true));
        std::env::remove_var("TEST_BOOL_FLAG");
    }

    #[test]
    fn env_parse_falls_back_on_missing_or_unparsable() {
        std::env::remove_var("TEST_NUM");
        assert_eq!(env_parse("TEST_NUM", 42u32), 42);
        std::env::set_var("TEST_NUM", "not-a-number");
        assert_eq!(env_parse("TEST_NUM", 42u32), 42);
        std::env::remove_var("TEST_NUM");
    }
}
