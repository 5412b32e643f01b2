// Conversation Store — Tier 1 (Redis) history cache.
// Keyed as `history:<conversation_id>`, JSON-encoded, with a TTL so an
// abandoned conversation's window expires instead of accumulating forever.

use redis::aio::ConnectionManager;
use redis::AsyncCommands;

use crate::atoms::error::GatewayResult;
use crate::atoms::types::{ConversationHistory, LlmRole, Message, MessageDirection, Turn};

pub struct HistoryCache {
    redis: Option<ConnectionManager>,
    ttl_secs: u64,
}

impl HistoryCache {
    pub fn new(redis: Option<ConnectionManager>, ttl_secs: u64) -> Self {
        HistoryCache { redis, ttl_secs }
    }

    fn key(conversation_id: &str) -> String {
        format!("history:{conversation_id}")
    }

    pub async fn get(&self, conversation_id: &str) -> GatewayResult<Option<ConversationHistory>> {
        let Some(redis) = self.redis.clone() else { return Ok(None) };
        let mut conn = redis;
        let raw: Option<String> = conn.get(Self::key(conversation_id)).await?;
        Ok(raw.and_then(|s| serde_json::from_str(&s).ok()))
    }

    pub async fn save(&self, history: &ConversationHistory) -> GatewayResult<()> {
        let Some(redis) = self.redis.clone() else { return Ok(()) };
        let mut conn = redis;
        let raw = serde_json::to_string(history)?;
        let _: () = conn
            .set_ex(Self::key(&history.conversation_id), raw, self.ttl_secs)
            .await?;
        Ok(())
    }

    pub async fn invalidate(&self, conversation_id: &str) -> GatewayResult<()> {
        let Some(redis) = self.redis.clone() else { return Ok(()) };
        let mut conn = redis;
        let _: () = conn.del(Self::key(conversation_id)).await?;
        Ok(())
    }
}

/// Rebuild a `ConversationHistory` window from the durable (SQLite) message
/// log, used whenever the Redis tier misses.
pub fn history_from_messages(conversation_id: &str, messages: &[Message]) -> ConversationHistory {
    let turns = messages
        .iter()
        .map(|m| Turn {
            role: match m.direction {
                MessageDirection::Inbound => LlmRole::User,
                MessageDirection::Outbound => LlmRole::Assistant,
            },
            content: m.content.clone(),
            timestamp: m.created_at.clone(),
        })
        .collect();

    ConversationHistory { conversation_id: conversation_id.to_string(), turns }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atoms::types::MessageStatus;

    #[test]
    fn rebuilds_history_preserving_order_and_roles() {
        let messages = vec![
            Message {
                id: "1".into(),
                conversation_id: "c1".into(),
                direction: MessageDirection::Inbound,
                content: "hi".into(),
                status: MessageStatus::Pending,
                intent: None,
                created_at: "t1".into(),
            },
            Message {
                id: "2".into(),
                conversation_id: "c1".into(),
                direction: MessageDirection::Outbound,
                content: "hello!".into(),
                status: MessageStatus::Sent,
                intent: None,
                created_at: "t2".into(),
            },
        ];
        let history = history_from_messages("c1", &messages);
        assert_eq!(history.turns.len(), 2);
        assert_eq!(history.turns[0].role, LlmRole::User);
        assert_eq!(history.turns[1].role, LlmRole::Assistant);
    }
}
