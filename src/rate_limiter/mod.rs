// Rate Limiter — atomic sliding window over Redis, with an in-memory
// fallback tier for when Redis is unreachable.
//
// The Redis tier runs a single Lua script (ZREMRANGEBYSCORE + ZCARD + ZADD +
// EXPIRE) so the check-then-add sequence is atomic even under concurrent
// callers hitting the same identifier.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use redis::aio::ConnectionManager;
use redis::Script;
use tracing::warn;

use crate::atoms::error::GatewayError;

const SLIDING_WINDOW_SCRIPT: &str = r#"
local key = KEYS[1]
local max_requests = tonumber(ARGV[1])
local window_seconds = tonumber(ARGV[2])
local current_time = tonumber(ARGV[3])
local unique_member = ARGV[4]

local cutoff_time = current_time - window_seconds
redis.call('ZREMRANGEBYSCORE', key, 0, cutoff_time)

local current_count = redis.call('ZCARD', key)

if current_count < max_requests then
    redis.call('ZADD', key, current_time, unique_member)
    redis.call('EXPIRE', key, window_seconds + 60)
    return 1
else
    return 0
end
"#;

fn now_secs_f64() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// In-memory sliding window used only while Redis is unavailable. Bounded
/// per-identifier by simply evicting timestamps outside the window on
/// every check — there is no background sweep, so a dead identifier's
/// entry will sit empty but cheap until the process restarts.
#[derive(Default)]
struct LocalWindows {
    windows: HashMap<String, VecDeque<u64>>,
}

impl LocalWindows {
    fn is_allowed(&mut self, identifier: &str, max_requests: u32, window_secs: u64) -> bool {
        let now = now_secs();
        let entry = self.windows.entry(identifier.to_string()).or_default();
        while let Some(&front) = entry.front() {
            if now.saturating_sub(front) > window_secs {
                entry.pop_front();
            } else {
                break;
            }
        }
        if (entry.len() as u32) < max_requests {
            entry.push_back(now);
            true
        } else {
            false
        }
    }
}

/// A Redis-backed rate limiter using an atomic sliding-window algorithm,
/// falling back to an in-process window when Redis is unreachable.
pub struct RateLimiter {
    redis: Option<ConnectionManager>,
    script: Script,
    max_requests: u32,
    window_secs: u64,
    fail_open: bool,
    local: Mutex<LocalWindows>,
}

impl RateLimiter {
    pub fn new(redis: Option<ConnectionManager>, max_requests: u32, window_secs: u64, fail_open: bool) -> Self {
        RateLimiter {
            redis,
            script: Script::new(SLIDING_WINDOW_SCRIPT),
            max_requests,
            window_secs,
            fail_open,
            local: Mutex::new(LocalWindows::default()),
        }
    }

    /// Checks and atomically records one request for `identifier`. Returns
    /// `Ok(true)` if the request is allowed, `Ok(false)` if it should be
    /// rejected with HTTP 429. Errors only escape when Redis fails and
    /// `fail_open` is false.
    pub async fn is_allowed(&self, identifier: &str) -> Result<bool, GatewayError> {
        let Some(redis) = self.redis.clone() else {
            return Ok(self.local.lock().is_allowed(identifier, self.max_requests, self.window_secs));
        };

        let key = format!("rate_limit:{identifier}");
        let unique_member = format!("{}:{}", now_secs_f64(), uuid::Uuid::new_v4());

        let mut conn = redis;
        let result: redis::RedisResult<i64> = self
            .script
            .key(key)
            .arg(self.max_requests)
            .arg(self.window_secs)
            .arg(now_secs_f64())
            .arg(unique_member)
            .invoke_async(&mut conn)
            .await;

        match result {
            Ok(allowed) => Ok(allowed == 1),
            Err(e) => {
                warn!("redis error during rate limiting for '{identifier}': {e}");
                if self.fail_open {
                    Ok(true)
                } else {
                    Err(GatewayError::from(e))
                }
            }
        }
    }

    pub fn retry_after_secs(&self) -> u64 {
        self.window_secs
    }

    /// Cheap liveness probe for `/health` — a bare `PING`, not the sliding
    /// window script, so a health check never consumes rate-limit budget.
    pub async fn redis_reachable(&self) -> bool {
        let Some(mut redis) = self.redis.clone() else {
            return false;
        };
        redis::cmd("PING").query_async::<_, String>(&mut redis).await.is_ok()
    }
}

/// Derive the rate-limit identifier the same way across webhook ingest and
/// the internal `/ai/v1/process` endpoint: conversation id if known,
/// otherwise a hash of the API key, otherwise the remote IP.
pub fn rate_limit_key(conversation_id: Option<&str>, api_key: Option<&str>, remote_addr: &str) -> String {
    if let Some(api_key) = api_key {
        use sha2::{Digest, Sha256};
        let hash = Sha256::digest(api_key.as_bytes());
        let short: String = hash.iter().take(8).map(|b| format!("{b:02x}")).collect();
        return match conversation_id {
            Some(id) => format!("{id}:{short}"),
            None => format!("api:{short}"),
        };
    }
    match conversation_id {
        Some(id) => format!("conv:{id}"),
        None => format!("ip:{remote_addr}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_window_allows_up_to_max_then_blocks() {
        let mut windows = LocalWindows::default();
        for _ in 0..3 {
            assert!(windows.is_allowed("a", 3, 60));
        }
        assert!(!windows.is_allowed("a", 3, 60));
    }

    #[test]
    fn local_window_tracks_identifiers_independently() {
        let mut windows = LocalWindows::default();
        assert!(windows.is_allowed("a", 1, 60));
        assert!(!windows.is_allowed("a", 1, 60));
        assert!(windows.is_allowed("b", 1, 60));
    }

    #[test]
    fn rate_limit_key_prefers_conversation_over_ip() {
        let key = rate_limit_key(Some("conv-1"), None, "1.2.3.4");
        assert_eq!(key, "conv:conv-1");
    }

    #[test]
    fn rate_limit_key_falls_back_to_ip() {
        let key = rate_limit_key(None, None, "1.2.3.4");
        assert_eq!(key, "ip:1.2.3.4");
    }

    #[test]
    fn rate_limit_key_hashes_api_key() {
        let key = rate_limit_key(None, Some("secret"), "1.2.3.4");
        assert!(key.starts_with("api:"));
        assert_eq!(key.len(), "api:".len() + 16);
    }
}
