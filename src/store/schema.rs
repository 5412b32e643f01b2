// Conversation store — schema and migrations.
// Called once at startup by ConversationStore::open() after WAL is enabled.
// Adding a new table or column: append an idempotent CREATE TABLE IF NOT
// EXISTS / ALTER TABLE … ADD COLUMN at the end of run_migrations() — never
// modify existing SQL, to keep upgrade paths clean.

use rusqlite::Connection;

use crate::atoms::error::GatewayResult;

pub(crate) fn run_migrations(conn: &Connection) -> GatewayResult<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS conversations (
            id TEXT PRIMARY KEY,
            channel TEXT NOT NULL,
            external_user_id TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'active',
            last_intent TEXT,
            metadata_json TEXT NOT NULL DEFAULT '{}',
            created_at TEXT NOT NULL DEFAULT (datetime('now')),
            updated_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE UNIQUE INDEX IF NOT EXISTS idx_conversations_channel_user
            ON conversations(channel, external_user_id);

        CREATE TABLE IF NOT EXISTS messages (
            id TEXT PRIMARY KEY,
            conversation_id TEXT NOT NULL,
            direction TEXT NOT NULL,
            content TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'pending',
            intent TEXT,
            created_at TEXT NOT NULL DEFAULT (datetime('now')),
            FOREIGN KEY (conversation_id) REFERENCES conversations(id) ON DELETE CASCADE
        );

        CREATE INDEX IF NOT EXISTS idx_messages_conversation
            ON messages(conversation_id, created_at);

        CREATE TABLE IF NOT EXISTS knowledge_documents (
            id TEXT PRIMARY KEY,
            title TEXT NOT NULL,
            content TEXT NOT NULL,
            embedding BLOB,
            updated_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS webhook_dedup (
            idempotency_key TEXT PRIMARY KEY,
            received_at TEXT NOT NULL DEFAULT (datetime('now'))
        );
        ",
    )?;

    // Added alongside the knowledge retriever: content_hash lets a reload
    // skip re-embedding documents whose text hasn't changed.
    conn.execute_batch(
        "ALTER TABLE knowledge_documents ADD COLUMN content_hash TEXT NOT NULL DEFAULT '';",
    )
    .ok();

    Ok(())
}
