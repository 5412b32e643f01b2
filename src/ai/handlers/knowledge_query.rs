// Knowledge base query handler — tries the embedding-similarity
// retriever first; falls back to the general LLM when the retriever has
// nothing confident to say, optionally grounding that LLM call with the
// best (but not confident enough) match it did find.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::error;

use super::{FallbackHandler, HandlerContext, IntentHandler};
use crate::knowledge::KnowledgeRetriever;

/// Above this similarity, the retrieved document answers the question
/// directly with no LLM involvement at all.
const HIGH_CONFIDENCE_SIMILARITY: f64 = 0.8;

pub struct KnowledgeQueryHandler {
    knowledge: Arc<KnowledgeRetriever>,
    fallback: Arc<FallbackHandler>,
}

impl KnowledgeQueryHandler {
    pub fn new(knowledge: Arc<KnowledgeRetriever>, fallback: Arc<FallbackHandler>) -> Self {
        KnowledgeQueryHandler { knowledge, fallback }
    }
}

#[async_trait]
impl IntentHandler for KnowledgeQueryHandler {
    async fn handle(&self, ctx: &HandlerContext<'_>) -> String {
        let results = match self.knowledge.search(ctx.message, 1, None).await {
            Ok(results) => results,
            Err(e) => {
                error!(error = %e, "knowledge base search failed");
                Vec::new()
            }
        };

        let Some(best) = results.into_iter().next() else {
            return self.fallback.generate(ctx.message).await;
        };

        if best.similarity > HIGH_CONFIDENCE_SIMILARITY {
            return best.document.content;
        }

        let prompt = format!(
            "Use the following context to answer the question:\nContext: {}\n\nQuestion: {}",
            best.document.content, ctx.message
        );
        self.fallback.generate(&prompt).await
    }
}
