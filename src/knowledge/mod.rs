// Knowledge Retriever
// Embedding-based similarity search over a small, operator-curated
// document set (return policy, shipping info, and similar knowledge-base
// snippets). Documents and their embeddings are persisted in SQLite
// (`knowledge_documents`); this module keeps an in-memory copy for
// search so a lookup never costs a database round trip.

mod embeddings;

use parking_lot::{Mutex, RwLock};
use rusqlite::{params, Connection};
use uuid::Uuid;

use crate::atoms::constants::SIMILARITY_THRESHOLD;
use crate::atoms::error::GatewayResult;
use crate::atoms::types::{KnowledgeDocument, KnowledgeMatch};

pub use embeddings::EmbeddingService;

pub struct KnowledgeRetriever {
    embedding_service: EmbeddingService,
    documents: RwLock<Vec<KnowledgeDocument>>,
}

impl KnowledgeRetriever {
    pub fn new(embedding_service: EmbeddingService) -> Self {
        KnowledgeRetriever { embedding_service, documents: RwLock::new(Vec::new()) }
    }

    /// Load documents from SQLite into memory, embedding any whose
    /// content hash does not match what's stored (new or edited since
    /// the last run) and persisting the refreshed set back.
    pub async fn initialize(&self, conn: &Mutex<Connection>, seed: Vec<(String, String)>) -> GatewayResult<()> {
        let existing = load_documents(conn)?;

        if existing.is_empty() && !seed.is_empty() {
            for (title, content) in seed {
                self.add_document(conn, &title, &content).await?;
            }
            return Ok(());
        }

        *self.documents.write() = existing;
        Ok(())
    }

    /// Embed and persist a new knowledge document. Returns `false` (Python
    /// parity: silent no-op) if embedding generation fails.
    pub async fn add_document(&self, conn: &Mutex<Connection>, title: &str, content: &str) -> GatewayResult<bool> {
        let Some(embedding) = self.embedding_service.generate_embedding(content).await? else {
            return Ok(false);
        };

        let doc = KnowledgeDocument {
            id: Uuid::new_v4().to_string(),
            title: title.to_string(),
            content: content.to_string(),
            embedding,
            updated_at: String::new(),
        };

        let hash = content_hash(content);
        {
            let conn = conn.lock();
            conn.execute(
                "INSERT INTO knowledge_documents (id, title, content, embedding, content_hash) VALUES (?1, ?2, ?3, ?4, ?5)",
                params![doc.id, doc.title, doc.content, embeddings::embedding_to_bytes(&doc.embedding), hash],
            )?;
        }

        self.documents.write().push(doc);
        Ok(true)
    }

    /// Rank stored documents against `query` by cosine similarity,
    /// keeping those at or above `min_similarity` (or the crate-wide
    /// [`SIMILARITY_THRESHOLD`] default) and returning at most `limit`.
    pub async fn search(&self, query: &str, limit: usize, min_similarity: Option<f64>) -> GatewayResult<Vec<KnowledgeMatch>> {
        if query.trim().is_empty() {
            return Ok(Vec::new());
        }

        let Some(query_embedding) = self.embedding_service.generate_embedding(query).await? else {
            return Ok(Vec::new());
        };

        let threshold = min_similarity.unwrap_or(SIMILARITY_THRESHOLD);
        let documents = self.documents.read();

        let mut matches: Vec<KnowledgeMatch> = documents
            .iter()
            .map(|doc| KnowledgeMatch {
                document: doc.clone(),
                similarity: embeddings::cosine_similarity(&query_embedding, &doc.embedding),
            })
            .filter(|m| m.similarity >= threshold)
            .collect();

        matches.sort_by(|a, b| b.similarity.partial_cmp(&a.similarity).unwrap_or(std::cmp::Ordering::Equal));
        matches.truncate(limit);
        Ok(matches)
    }

    pub fn document_count(&self) -> usize {
        self.documents.read().len()
    }
}

fn content_hash(content: &str) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}

fn load_documents(conn: &Mutex<Connection>) -> GatewayResult<Vec<KnowledgeDocument>> {
    let conn = conn.lock();
    let mut stmt = conn.prepare("SELECT id, title, content, embedding, updated_at FROM knowledge_documents")?;
    let rows = stmt.query_map([], |row| {
        let embedding_bytes: Vec<u8> = row.get(3)?;
        Ok(KnowledgeDocument {
            id: row.get(0)?,
            title: row.get(1)?,
            content: row.get(2)?,
            embedding: embeddings::bytes_to_embedding(&embedding_bytes),
            updated_at: row.get(4)?,
        })
    })?;
    Ok(rows.filter_map(|r| r.ok()).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_hash_is_stable_for_identical_input() {
        assert_eq!(content_hash("same text"), content_hash("same text"));
    }

    #[test]
    fn content_hash_differs_for_different_input() {
        assert_ne!(content_hash("a"), content_hash("b"));
    }
}
