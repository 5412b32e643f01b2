// AI Processor — response cache.
// Caches a sanitized message's final response (keyed on message content,
// not conversation) so repeated FAQs across different users hit Redis
// instead of the LLM. Falls back to an in-process LRU when Redis is
// unavailable, same tiering strategy as the rate limiter and the history
// cache.

use std::collections::{HashMap, VecDeque};

use parking_lot::Mutex;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::atoms::constants::CACHE_VERSION;
use crate::atoms::types::IntentType;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedResponse {
    pub response: String,
    pub intent: IntentType,
}

struct LocalEntry {
    value: CachedResponse,
    expires_at: std::time::Instant,
}

#[derive(Default)]
struct LocalCache {
    entries: HashMap<String, LocalEntry>,
    order: VecDeque<String>,
    capacity: usize,
}

impl LocalCache {
    fn new(capacity: usize) -> Self {
        LocalCache { entries: HashMap::new(), order: VecDeque::new(), capacity }
    }

    fn get(&mut self, key: &str) -> Option<CachedResponse> {
        let expired = self.entries.get(key).map(|e| e.expires_at <= std::time::Instant::now()).unwrap_or(false);
        if expired {
            self.entries.remove(key);
        }
        self.entries.get(key).map(|e| e.value.clone())
    }

    fn set(&mut self, key: String, value: CachedResponse, ttl: std::time::Duration) {
        if !self.entries.contains_key(&key) && self.entries.len() >= self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.entries.remove(&oldest);
            }
        }
        self.entries.insert(key.clone(), LocalEntry { value, expires_at: std::time::Instant::now() + ttl });
        self.order.push_back(key);
    }
}

pub struct ResponseCache {
    redis: Option<ConnectionManager>,
    local: Mutex<LocalCache>,
    default_ttl_secs: u64,
}

const LOCAL_CACHE_CAPACITY: usize = 10_000;

impl ResponseCache {
    pub fn new(redis: Option<ConnectionManager>, default_ttl_secs: u64) -> Self {
        ResponseCache { redis, local: Mutex::new(LocalCache::new(LOCAL_CACHE_CAPACITY)), default_ttl_secs }
    }

    /// Cache key is derived from message content plus [`CACHE_VERSION`],
    /// deliberately excluding the conversation id so semantically
    /// identical questions from different users share a cache entry.
    pub fn key_for(message: &str) -> String {
        use sha2::{Digest, Sha256};
        let mut hasher = Sha256::new();
        hasher.update(message.as_bytes());
        hasher.update(CACHE_VERSION.as_bytes());
        format!("cache:response:{:x}", hasher.finalize())
    }

    pub async fn get(&self, key: &str) -> Option<CachedResponse> {
        if let Some(redis) = self.redis.clone() {
            let mut conn = redis;
            match conn.get::<_, Option<String>>(key).await {
                Ok(Some(raw)) => return serde_json::from_str(&raw).ok(),
                Ok(None) => return None,
                Err(e) => warn!("redis error reading response cache: {e}, falling back to local"),
            }
        }
        self.local.lock().get(key)
    }

    pub async fn set(&self, key: &str, value: &CachedResponse, ttl_secs: Option<u64>) {
        let ttl = ttl_secs.unwrap_or(self.default_ttl_secs);

        if let Some(redis) = self.redis.clone() {
            let mut conn = redis;
            if let Ok(raw) = serde_json::to_string(value) {
                if let Err(e) = conn.set_ex::<_, _, ()>(key, raw, ttl).await {
                    warn!("redis error writing response cache: {e}, falling back to local");
                } else {
                    return;
                }
            }
        }

        self.local.lock().set(key.to_string(), value.clone(), std::time::Duration::from_secs(ttl));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_for_is_stable_for_same_message() {
        assert_eq!(ResponseCache::key_for("hi there"), ResponseCache::key_for("hi there"));
    }

    #[test]
    fn key_for_differs_for_different_messages() {
        assert_ne!(ResponseCache::key_for("hi"), ResponseCache::key_for("bye"));
    }

    #[tokio::test]
    async fn local_cache_round_trips_without_redis() {
        let cache = ResponseCache::new(None, 60);
        let key = ResponseCache::key_for("hello");
        assert!(cache.get(&key).await.is_none());
        cache.set(&key, &CachedResponse { response: "hi".into(), intent: IntentType::Greeting }, None).await;
        let hit = cache.get(&key).await.unwrap();
        assert_eq!(hit.response, "hi");
    }
}
