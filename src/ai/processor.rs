// AI Processor — orchestrates one inbound message end to end: sanitize,
// cache lookup, intent classification, handler dispatch, cache write,
// and conversation persistence.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use tracing::{info, warn};

use crate::atoms::constants::{CACHE_TTL_SECONDS, MAX_MESSAGE_LENGTH};
use crate::atoms::types::{
    ConversationStatus, IntentType, LlmRole, Message, MessageDirection, MessageStatus, ProcessingResult, Turn,
};
use crate::ai::cache::{CachedResponse, ResponseCache};
use crate::ai::handlers::{FallbackHandler, HandlerContext, IntentHandler};
use crate::intent::{AnalysisContext, IntentAnalyzer};
use crate::sanitizer::sanitize;
use crate::store::ConversationStore;

pub struct AiProcessor {
    store: Arc<ConversationStore>,
    cache: ResponseCache,
    intent_analyzer: IntentAnalyzer,
    handlers: HashMap<IntentType, Arc<dyn IntentHandler>>,
    fallback: Arc<FallbackHandler>,
}

impl AiProcessor {
    pub fn new(
        store: Arc<ConversationStore>,
        cache: ResponseCache,
        handlers: HashMap<IntentType, Arc<dyn IntentHandler>>,
        fallback: Arc<FallbackHandler>,
    ) -> Self {
        AiProcessor { store, cache, intent_analyzer: IntentAnalyzer::new(), handlers, fallback }
    }

    pub async fn process_message(&self, raw_message: &str, channel: &str, external_user_id: &str) -> ProcessingResult {
        let start = Instant::now();

        if raw_message.trim().is_empty() || raw_message.len() > MAX_MESSAGE_LENGTH {
            return ProcessingResult {
                response: format!("Your message seems to be invalid or exceeds {MAX_MESSAGE_LENGTH} characters."),
                intent: IntentType::Fallback,
                processing_time_ms: elapsed_ms(start),
                tokens_used: None,
                cached: false,
                error: Some("validation_error".to_string()),
            };
        }

        let sanitized = sanitize(raw_message, true);
        if sanitized.is_empty() {
            return ProcessingResult {
                response: "Your message seems to be invalid. Please check and try again.".to_string(),
                intent: IntentType::Fallback,
                processing_time_ms: elapsed_ms(start),
                tokens_used: None,
                cached: false,
                error: Some("validation_error".to_string()),
            };
        }

        let cache_key = ResponseCache::key_for(&sanitized);
        if let Some(cached) = self.cache.get(&cache_key).await {
            return ProcessingResult {
                response: cached.response,
                intent: cached.intent,
                processing_time_ms: elapsed_ms(start),
                tokens_used: None,
                cached: true,
                error: None,
            };
        }

        let conversation = match self.store.get_or_create_conversation(channel, external_user_id) {
            Ok(c) => c,
            Err(e) => return internal_error_result(&e, start),
        };

        let mut history = match self.store.get_history(&conversation.id).await {
            Ok(h) => h,
            Err(e) => return internal_error_result(&e, start),
        };

        let analysis_context = AnalysisContext { last_intent: conversation.last_intent };
        let intent_result = self.intent_analyzer.analyze(&sanitized, &analysis_context);

        let handler = self.handlers.get(&intent_result.intent).unwrap_or(&self.fallback);
        let handler_ctx = HandlerContext { message: &sanitized, history: &history, intent_result: &intent_result };
        let response = handler.handle(&handler_ctx).await;

        let response_lower = response.to_lowercase();
        if !response_lower.contains("error") && !response_lower.contains("sorry") {
            self.cache
                .set(&cache_key, &CachedResponse { response: response.clone(), intent: intent_result.intent }, Some(CACHE_TTL_SECONDS))
                .await;
        }

        if let Err(e) = self.persist_turn(&conversation.id, &sanitized, &response, intent_result.intent, &mut history).await {
            warn!(error = %e, conversation_id = %conversation.id, "failed to persist conversation turn");
        }
        if let Err(e) = self.store.update_conversation_intent(&conversation.id, intent_result.intent) {
            warn!(error = %e, conversation_id = %conversation.id, "failed to update conversation intent");
        }

        info!(
            conversation_id = %conversation.id,
            intent = intent_result.intent.as_str(),
            confidence = intent_result.confidence,
            processing_time_ms = elapsed_ms(start),
            "message processed"
        );

        ProcessingResult {
            response,
            intent: intent_result.intent,
            processing_time_ms: elapsed_ms(start),
            tokens_used: None,
            cached: false,
            error: None,
        }
    }

    async fn persist_turn(
        &self,
        conversation_id: &str,
        user_message: &str,
        assistant_response: &str,
        intent: IntentType,
        history: &mut crate::atoms::types::ConversationHistory,
    ) -> crate::atoms::error::GatewayResult<()> {
        self.store.add_message(&Message {
            id: uuid::Uuid::new_v4().to_string(),
            conversation_id: conversation_id.to_string(),
            direction: MessageDirection::Inbound,
            content: user_message.to_string(),
            status: MessageStatus::Delivered,
            intent: Some(intent),
            created_at: String::new(),
        })?;
        self.store.add_message(&Message {
            id: uuid::Uuid::new_v4().to_string(),
            conversation_id: conversation_id.to_string(),
            direction: MessageDirection::Outbound,
            content: assistant_response.to_string(),
            status: MessageStatus::Pending,
            intent: Some(intent),
            created_at: String::new(),
        })?;

        self.store
            .append_turn(history, Turn { role: LlmRole::User, content: user_message.to_string(), timestamp: String::new() })
            .await?;
        self.store
            .append_turn(history, Turn { role: LlmRole::Assistant, content: assistant_response.to_string(), timestamp: String::new() })
            .await?;

        if intent == IntentType::Complaint {
            self.store.set_conversation_status(conversation_id, ConversationStatus::Escalated)?;
        }

        Ok(())
    }
}

fn elapsed_ms(start: Instant) -> u64 {
    start.elapsed().as_millis() as u64
}

fn internal_error_result(err: &crate::atoms::error::GatewayError, start: Instant) -> ProcessingResult {
    warn!(error = %err, "internal error during message processing");
    ProcessingResult {
        response: "I encountered an unexpected internal error. My team has been notified.".to_string(),
        intent: IntentType::Fallback,
        processing_time_ms: elapsed_ms(start),
        tokens_used: None,
        cached: false,
        error: Some("internal_error".to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::handlers::GreetingHandler;

    #[tokio::test]
    async fn rejects_overlong_message_without_touching_store() {
        let store = Arc::new(ConversationStore::open_in_memory().unwrap());
        let cache = ResponseCache::new(None, 60);
        let providers = Arc::new(crate::providers::ProviderChain::new(vec![]));
        let fallback = Arc::new(FallbackHandler::new(providers, "gemini-1.5-flash".to_string()));
        let mut handlers: HashMap<IntentType, Arc<dyn IntentHandler>> = HashMap::new();
        handlers.insert(IntentType::Greeting, Arc::new(GreetingHandler));

        let processor = AiProcessor::new(store, cache, handlers, fallback);
        let overlong = "x".repeat(MAX_MESSAGE_LENGTH + 10);
        let result = processor.process_message(&overlong, "whatsapp", "+1555").await;
        assert_eq!(result.error.as_deref(), Some("validation_error"));
    }

    #[tokio::test]
    async fn classifies_and_persists_a_greeting() {
        let store = Arc::new(ConversationStore::open_in_memory().unwrap());
        let cache = ResponseCache::new(None, 60);
        let providers = Arc::new(crate::providers::ProviderChain::new(vec![]));
        let fallback = Arc::new(FallbackHandler::new(providers, "gemini-1.5-flash".to_string()));
        let mut handlers: HashMap<IntentType, Arc<dyn IntentHandler>> = HashMap::new();
        handlers.insert(IntentType::Greeting, Arc::new(GreetingHandler));

        let processor = AiProcessor::new(store.clone(), cache, handlers, fallback);
        let result = processor.process_message("hello there", "whatsapp", "+1555").await;
        assert_eq!(result.intent, IntentType::Greeting);
        assert!(result.error.is_none());

        let conversation = store.get_or_create_conversation("whatsapp", "+1555").unwrap();
        let messages = store.recent_messages(&conversation.id, 10).unwrap();
        assert_eq!(messages.len(), 2);
    }
}
