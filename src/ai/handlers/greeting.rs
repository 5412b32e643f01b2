// Greeting handler — the only handler that never calls out of process.

use async_trait::async_trait;

use super::{HandlerContext, IntentHandler};

pub struct GreetingHandler;

#[async_trait]
impl IntentHandler for GreetingHandler {
    async fn handle(&self, ctx: &HandlerContext<'_>) -> String {
        if ctx.history.turns.len() < 2 {
            "Hello! I'm your AI assistant. How can I help you find products, check order statuses, or answer questions?".to_string()
        } else {
            "Welcome back! How can I assist you today?".to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atoms::types::{ConversationHistory, IntentResult, IntentType};
    use std::collections::HashMap;

    fn intent_result() -> IntentResult {
        IntentResult { intent: IntentType::Greeting, confidence: 1.0, matched_patterns: vec![], entities: HashMap::new() }
    }

    #[tokio::test]
    async fn greets_first_time_user_with_full_intro() {
        let history = ConversationHistory::default();
        let intent_result = intent_result();
        let ctx = HandlerContext { message: "hi", history: &history, intent_result: &intent_result };
        let reply = GreetingHandler.handle(&ctx).await;
        assert!(reply.contains("How can I help"));
    }

    #[tokio::test]
    async fn greets_returning_user_more_briefly() {
        let mut history = ConversationHistory::default();
        history.push(crate::atoms::types::Turn {
            role: crate::atoms::types::LlmRole::User,
            content: "hi".into(),
            timestamp: String::new(),
        });
        history.push(crate::atoms::types::Turn {
            role: crate::atoms::types::LlmRole::Assistant,
            content: "hello".into(),
            timestamp: String::new(),
        });
        let intent_result = intent_result();
        let ctx = HandlerContext { message: "hi again", history: &history, intent_result: &intent_result };
        let reply = GreetingHandler.handle(&ctx).await;
        assert!(reply.contains("Welcome back"));
    }
}
