// Webhook dedup — Redis `SET key val NX EX ttl`, same idempotency primitive
// the Redis tier uses everywhere else in this crate. A key that already
// exists means this event has been seen before and should be acked without
// reprocessing.

use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tracing::warn;

use crate::atoms::constants::DEDUP_KEY_TTL_SECS;
use crate::atoms::error::GatewayError;

pub struct Deduplicator {
    redis: Option<ConnectionManager>,
    /// When Redis is unreachable: `true` rejects (re-delivers as duplicate
    /// risk accepted never happens — fail closed), `false` lets the event
    /// through unseen (fail open).
    strict: bool,
}

impl Deduplicator {
    pub fn new(redis: Option<ConnectionManager>, strict: bool) -> Self {
        Deduplicator { redis, strict }
    }

    /// Returns `Ok(true)` if `idempotency_key` has already been seen (the
    /// caller should ack and drop the event), `Ok(false)` if this is the
    /// first sighting (the caller should process it). Only returns `Err`
    /// when Redis is down and `strict` dedup is configured.
    pub async fn is_duplicate(&self, idempotency_key: &str) -> Result<bool, GatewayError> {
        let Some(mut redis) = self.redis.clone() else {
            return if self.strict {
                Err(GatewayError::Infrastructure("Redis unavailable — cannot perform deduplication".into()))
            } else {
                Ok(false)
            };
        };

        let key = format!("webhook_seen:{idempotency_key}");

        // SET NX is already atomic; the TTL follow-up is best-effort — a
        // lost race just means the key's expiry resets, which is harmless.
        let set: redis::RedisResult<bool> = redis.set_nx(&key, "1").await;
        match set {
            Ok(true) => {
                let _: redis::RedisResult<()> = redis.expire(&key, DEDUP_KEY_TTL_SECS as i64).await;
                Ok(false)
            }
            Ok(false) => Ok(true),
            Err(e) => self.handle_redis_error(e),
        }
    }

    fn handle_redis_error(&self, e: redis::RedisError) -> Result<bool, GatewayError> {
        warn!(error = %e, "redis error during webhook dedup check");
        if self.strict {
            Err(GatewayError::from(e))
        } else {
            Ok(false)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn no_redis_and_non_strict_never_flags_duplicate() {
        let dedup = Deduplicator::new(None, false);
        assert!(!dedup.is_duplicate("msg-1").await.unwrap());
        assert!(!dedup.is_duplicate("msg-1").await.unwrap());
    }

    #[tokio::test]
    async fn no_redis_and_strict_errors() {
        let dedup = Deduplicator::new(None, true);
        assert!(dedup.is_duplicate("msg-1").await.is_err());
    }
}
