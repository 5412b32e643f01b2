// Intent Analyzer
// Classifies an inbound message into one of the supported `IntentType`
// values by blending three independent scoring strategies and then
// adjusting the result using conversation context and extracted entities.
//
// The analyzer is stateless and cheap to construct — callers typically
// hold one `IntentAnalyzer` per process rather than per request.

mod entities;
mod keywords;
mod scoring;

use std::collections::HashMap;

use crate::atoms::constants::INTENT_CONFIDENCE_THRESHOLD;
use crate::atoms::types::{IntentResult, IntentType};

/// Conversation-derived context that can shift an otherwise-ambiguous
/// classification — currently just the previous turn's resolved intent.
#[derive(Debug, Clone, Default)]
pub struct AnalysisContext {
    pub last_intent: Option<IntentType>,
}

pub struct IntentAnalyzer;

impl IntentAnalyzer {
    pub fn new() -> Self {
        IntentAnalyzer
    }

    /// Classify `message`, returning the highest-confidence intent along
    /// with the matched pattern labels and extracted entities. Falls back
    /// to [`IntentType::Fallback`] with zero confidence when nothing
    /// clears [`INTENT_CONFIDENCE_THRESHOLD`].
    pub fn analyze(&self, message: &str, context: &AnalysisContext) -> IntentResult {
        let preprocessed = preprocess_message(message);
        let entities = entities::extract_entities(&preprocessed);

        let keyword = scoring::keyword_matching(&preprocessed);
        let fuzzy = scoring::fuzzy_matching(&preprocessed);
        let pattern = scoring::pattern_matching(&preprocessed);
        let mut combined = scoring::combine(&keyword, &fuzzy, &pattern);

        apply_context_modifiers(&mut combined, context);
        apply_entity_boosts(&mut combined, &entities);

        let best = combined
            .into_iter()
            .max_by(|a, b| a.1 .0.partial_cmp(&b.1 .0).unwrap_or(std::cmp::Ordering::Equal));

        match best {
            Some((intent, (confidence, matched_patterns))) if confidence >= INTENT_CONFIDENCE_THRESHOLD => {
                IntentResult { intent, confidence, matched_patterns, entities }
            }
            _ => IntentResult {
                intent: IntentType::Fallback,
                confidence: 0.0,
                matched_patterns: Vec::new(),
                entities,
            },
        }
    }

    /// Classify a batch of messages independently, preserving order.
    pub fn batch_analyze(&self, messages: &[String], context: &AnalysisContext) -> Vec<IntentResult> {
        messages.iter().map(|m| self.analyze(m, context)).collect()
    }

    pub fn supported_intents(&self) -> &'static [IntentType] {
        IntentType::all()
    }
}

impl Default for IntentAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

fn preprocess_message(message: &str) -> String {
    message.trim().to_lowercase()
}

/// If the previous turn resolved to `OrderStatus` and this turn also
/// scored `ProductDetailsFollowup`, boost `OrderStatus` rather than the
/// follow-up — a user asking "what about the delivery date?" right after
/// an order-status exchange is almost always still talking about that
/// order, not a product.
fn apply_context_modifiers(scores: &mut HashMap<IntentType, (f64, Vec<String>)>, context: &AnalysisContext) {
    if context.last_intent == Some(IntentType::OrderStatus) && scores.contains_key(&IntentType::ProductDetailsFollowup) {
        let entry = scores.entry(IntentType::OrderStatus).or_insert((0.0, Vec::new()));
        entry.0 += 0.2;
        entry.1.push("context:last_intent_order_status".to_string());
    }
}

fn apply_entity_boosts(scores: &mut HashMap<IntentType, (f64, Vec<String>)>, entities: &HashMap<String, String>) {
    if entities.contains_key("order_id") {
        let entry = scores.entry(IntentType::OrderStatus).or_insert((0.0, Vec::new()));
        entry.0 += 0.3;
        entry.1.push("entity:order_id".to_string());
    }
    if entities.contains_key("product_name") {
        let entry = scores.entry(IntentType::ProductQuery).or_insert((0.0, Vec::new()));
        entry.0 += 0.2;
        entry.1.push("entity:product_name".to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_greeting() {
        let analyzer = IntentAnalyzer::new();
        let result = analyzer.analyze("hi there!", &AnalysisContext::default());
        assert_eq!(result.intent, IntentType::Greeting);
    }

    #[test]
    fn classifies_order_status_with_order_id_entity() {
        let analyzer = IntentAnalyzer::new();
        let result = analyzer.analyze("can you track order #A1234567 for me", &AnalysisContext::default());
        assert_eq!(result.intent, IntentType::OrderStatus);
        assert!(result.entities.contains_key("order_id"));
    }

    #[test]
    fn falls_back_on_unrecognizable_input() {
        let analyzer = IntentAnalyzer::new();
        let result = analyzer.analyze("xyzzy plugh quux", &AnalysisContext::default());
        assert_eq!(result.intent, IntentType::Fallback);
        assert_eq!(result.confidence, 0.0);
    }

    #[test]
    fn context_boosts_order_status_over_followup() {
        let analyzer = IntentAnalyzer::new();
        let context = AnalysisContext { last_intent: Some(IntentType::OrderStatus) };
        let result = analyzer.analyze("what is the delivery date", &context);
        assert_eq!(result.intent, IntentType::OrderStatus);
    }

    #[test]
    fn supported_intents_excludes_fallback() {
        let analyzer = IntentAnalyzer::new();
        assert!(!analyzer.supported_intents().contains(&IntentType::Fallback));
    }

    #[test]
    fn batch_analyze_preserves_order() {
        let analyzer = IntentAnalyzer::new();
        let messages = vec!["hello".to_string(), "bye".to_string()];
        let results = analyzer.batch_analyze(&messages, &AnalysisContext::default());
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].intent, IntentType::Greeting);
        assert_eq!(results[1].intent, IntentType::Goodbye);
    }
}
