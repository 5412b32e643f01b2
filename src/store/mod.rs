// Conversation Store
// Two tiers:
//   Tier 1 (hot)   — Redis: the recent-turn `ConversationHistory` window,
//                    keyed by conversation id, with a TTL so idle
//                    conversations age out without explicit cleanup.
//   Tier 2 (cold)  — SQLite: the durable Conversation/Message rows that
//                    survive a Redis flush and back a Tier 1 cache miss.
//
// `ConversationStore` owns both tiers and presents one API so the AI
// Processor never has to know which tier answered.

mod history;
mod schema;

pub use history::HistoryCache;

use parking_lot::Mutex;
use redis::aio::ConnectionManager;
use rusqlite::{params, Connection};
use uuid::Uuid;

use crate::atoms::error::{GatewayError, GatewayResult};
use crate::atoms::types::{
    Conversation, ConversationHistory, ConversationStatus, IntentType, Message, MessageDirection,
    MessageStatus,
};

pub struct ConversationStore {
    conn: Mutex<Connection>,
    history: HistoryCache,
}

impl ConversationStore {
    pub fn open(sqlite_path: &str, redis: Option<ConnectionManager>, ttl_secs: u64) -> GatewayResult<Self> {
        let conn = Connection::open(sqlite_path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;").ok();
        conn.execute_batch("PRAGMA synchronous=NORMAL;").ok();
        schema::run_migrations(&conn)?;

        Ok(ConversationStore {
            conn: Mutex::new(conn),
            history: HistoryCache::new(redis, ttl_secs),
        })
    }

    /// In-memory store for tests — skips the filesystem entirely.
    pub fn open_in_memory() -> GatewayResult<Self> {
        let conn = Connection::open_in_memory()?;
        schema::run_migrations(&conn)?;
        Ok(ConversationStore {
            conn: Mutex::new(conn),
            history: HistoryCache::new(None, 3600),
        })
    }

    /// Find the conversation for (channel, external_user_id), creating one
    /// if this is the first message from this user on this channel.
    pub fn get_or_create_conversation(
        &self,
        channel: &str,
        external_user_id: &str,
    ) -> GatewayResult<Conversation> {
        let conn = self.conn.lock();

        let existing = conn
            .query_row(
                "SELECT id, channel, external_user_id, status, last_intent, metadata_json, created_at, updated_at
                 FROM conversations WHERE channel = ?1 AND external_user_id = ?2",
                params![channel, external_user_id],
                row_to_conversation,
            )
            .ok();

        if let Some(conversation) = existing {
            return Ok(conversation);
        }

        let id = Uuid::new_v4().to_string();
        conn.execute(
            "INSERT INTO conversations (id, channel, external_user_id) VALUES (?1, ?2, ?3)",
            params![id, channel, external_user_id],
        )?;

        conn.query_row(
            "SELECT id, channel, external_user_id, status, last_intent, metadata_json, created_at, updated_at
             FROM conversations WHERE id = ?1",
            params![id],
            row_to_conversation,
        )
        .map_err(GatewayError::from)
    }

    pub fn update_conversation_intent(&self, conversation_id: &str, intent: IntentType) -> GatewayResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE conversations SET last_intent = ?1, updated_at = datetime('now') WHERE id = ?2",
            params![intent.as_str(), conversation_id],
        )?;
        Ok(())
    }

    pub fn set_conversation_status(&self, conversation_id: &str, status: ConversationStatus) -> GatewayResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE conversations SET status = ?1, updated_at = datetime('now') WHERE id = ?2",
            params![status.as_str(), conversation_id],
        )?;
        Ok(())
    }

    pub fn add_message(&self, message: &Message) -> GatewayResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO messages (id, conversation_id, direction, content, status, intent)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                message.id,
                message.conversation_id,
                direction_str(message.direction),
                message.content,
                status_str(message.status),
                message.intent.map(|i| i.as_str()),
            ],
        )?;
        conn.execute(
            "UPDATE conversations SET updated_at = datetime('now') WHERE id = ?1",
            params![message.conversation_id],
        )?;
        Ok(())
    }

    pub fn recent_messages(&self, conversation_id: &str, limit: i64) -> GatewayResult<Vec<Message>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, conversation_id, direction, content, status, intent, created_at
             FROM messages WHERE conversation_id = ?1 ORDER BY created_at DESC LIMIT ?2",
        )?;
        let mut rows: Vec<Message> = stmt
            .query_map(params![conversation_id, limit], row_to_message)?
            .filter_map(|r| r.ok())
            .collect();
        rows.reverse();
        Ok(rows)
    }

    /// Load the conversation history window, preferring the Redis tier and
    /// rebuilding it from SQLite (tier 2) on a miss.
    pub async fn get_history(&self, conversation_id: &str) -> GatewayResult<ConversationHistory> {
        if let Some(cached) = self.history.get(conversation_id).await? {
            return Ok(cached);
        }

        let messages = self.recent_messages(
            conversation_id,
            crate::atoms::constants::CONVERSATION_HISTORY_MAX_TURNS as i64,
        )?;
        let history = history::history_from_messages(conversation_id, &messages);
        self.history.save(&history).await?;
        Ok(history)
    }

    pub async fn append_turn(&self, history: &mut ConversationHistory, turn: crate::atoms::types::Turn) -> GatewayResult<()> {
        history.push(turn);
        self.history.save(history).await
    }
}

fn direction_str(d: MessageDirection) -> &'static str {
    match d {
        MessageDirection::Inbound => "inbound",
        MessageDirection::Outbound => "outbound",
    }
}

fn status_str(s: MessageStatus) -> &'static str {
    match s {
        MessageStatus::Pending => "pending",
        MessageStatus::Sent => "sent",
        MessageStatus::Delivered => "delivered",
        MessageStatus::Failed => "failed",
    }
}

fn row_to_conversation(row: &rusqlite::Row) -> rusqlite::Result<Conversation> {
    let metadata_json: String = row.get(5)?;
    let metadata = serde_json::from_str(&metadata_json).unwrap_or_default();
    let last_intent: Option<String> = row.get(4)?;
    Ok(Conversation {
        id: row.get(0)?,
        channel: row.get(1)?,
        external_user_id: row.get(2)?,
        status: ConversationStatus::from_str(&row.get::<_, String>(3)?),
        last_intent: last_intent.and_then(|s| intent_from_str(&s)),
        metadata,
        created_at: row.get(6)?,
        updated_at: row.get(7)?,
    })
}

fn row_to_message(row: &rusqlite::Row) -> rusqlite::Result<Message> {
    let direction: String = row.get(2)?;
    let status: String = row.get(4)?;
    let intent: Option<String> = row.get(5)?;
    Ok(Message {
        id: row.get(0)?,
        conversation_id: row.get(1)?,
        direction: if direction == "inbound" { MessageDirection::Inbound } else { MessageDirection::Outbound },
        content: row.get(3)?,
        status: match status.as_str() {
            "sent" => MessageStatus::Sent,
            "delivered" => MessageStatus::Delivered,
            "failed" => MessageStatus::Failed,
            _ => MessageStatus::Pending,
        },
        intent: intent.and_then(|s| intent_from_str(&s)),
        created_at: row.get(6)?,
    })
}

fn intent_from_str(s: &str) -> Option<IntentType> {
    IntentType::all().iter().copied().find(|i| i.as_str() == s)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atoms::types::{MessageDirection, MessageStatus};

    #[test]
    fn creates_and_reuses_conversation_for_same_user() {
        let store = ConversationStore::open_in_memory().unwrap();
        let a = store.get_or_create_conversation("whatsapp", "+1555").unwrap();
        let b = store.get_or_create_conversation("whatsapp", "+1555").unwrap();
        assert_eq!(a.id, b.id);
    }

    #[test]
    fn distinct_channels_get_distinct_conversations() {
        let store = ConversationStore::open_in_memory().unwrap();
        let a = store.get_or_create_conversation("whatsapp", "+1555").unwrap();
        let b = store.get_or_create_conversation("telegram", "+1555").unwrap();
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn messages_round_trip_in_order() {
        let store = ConversationStore::open_in_memory().unwrap();
        let conv = store.get_or_create_conversation("whatsapp", "+1555").unwrap();
        for text in ["hello", "how are you"] {
            store
                .add_message(&Message {
                    id: Uuid::new_v4().to_string(),
                    conversation_id: conv.id.clone(),
                    direction: MessageDirection::Inbound,
                    content: text.to_string(),
                    status: MessageStatus::Pending,
                    intent: None,
                    created_at: String::new(),
                })
                .unwrap();
        }
        let messages = store.recent_messages(&conv.id, 10).unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].content, "hello");
        assert_eq!(messages[1].content, "how are you");
    }
}
