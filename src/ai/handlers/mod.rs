// AI Processor — intent handlers
// One handler per supported intent, registered into a lookup table the
// processor consults after intent classification. Every handler
// swallows its own errors into a user-facing apology string — only the
// fallback handler's LLM call (and its failover chain) can still fail
// outward, and even that is caught by the processor.

mod fallback;
mod greeting;
mod knowledge_query;
mod order_status;
mod product_query;

pub use fallback::FallbackHandler;
pub use greeting::GreetingHandler;
pub use knowledge_query::KnowledgeQueryHandler;
pub use order_status::OrderStatusHandler;
pub use product_query::ProductQueryHandler;

use async_trait::async_trait;

use crate::atoms::types::{ConversationHistory, IntentResult};

pub struct HandlerContext<'a> {
    pub message: &'a str,
    pub history: &'a ConversationHistory,
    pub intent_result: &'a IntentResult,
}

#[async_trait]
pub trait IntentHandler: Send + Sync {
    async fn handle(&self, ctx: &HandlerContext<'_>) -> String;
}
