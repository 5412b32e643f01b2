// Intent Analyzer — keyword/weight table.
// Ported from the weighted keyword patterns used by the source system's
// intent classifier; weights bias which intent wins when several keyword
// sets match the same message.

use crate::atoms::types::IntentType;

pub struct IntentPattern {
    pub intent: IntentType,
    pub keywords: &'static [&'static str],
    pub weight: f64,
}

pub static INTENT_PATTERNS: &[IntentPattern] = &[
    IntentPattern {
        intent: IntentType::Greeting,
        keywords: &["hello", "hi", "hey", "greetings", "good morning", "good afternoon", "good evening", "howdy", "sup"],
        weight: 1.0,
    },
    IntentPattern {
        intent: IntentType::ProductQuery,
        keywords: &["find", "search", "product", "show me", "looking for", "need", "want", "buy", "purchase", "get me"],
        weight: 1.2,
    },
    IntentPattern {
        intent: IntentType::ProductDetailsFollowup,
        keywords: &["details", "more info", "tell me about", "specifications", "features", "description", "explain", "what is"],
        weight: 1.1,
    },
    IntentPattern {
        intent: IntentType::OrderStatus,
        keywords: &["order status", "track order", "where is my order", "delivery status", "shipment", "tracking", "order update"],
        weight: 1.3,
    },
    IntentPattern {
        intent: IntentType::Complaint,
        keywords: &["complaint", "problem", "issue", "wrong", "broken", "defective", "not working", "disappointed", "unhappy"],
        weight: 1.2,
    },
    IntentPattern {
        intent: IntentType::SupportRequest,
        keywords: &["help", "support", "assistance", "how to", "can you help", "need help", "guide me", "tutorial"],
        weight: 1.0,
    },
    IntentPattern {
        intent: IntentType::PriceInquiry,
        keywords: &["price", "cost", "how much", "expensive", "cheap", "discount", "offer", "deal", "rate"],
        weight: 1.1,
    },
    IntentPattern {
        intent: IntentType::AvailabilityCheck,
        keywords: &["available", "in stock", "out of stock", "when available", "do you have", "is it available"],
        weight: 1.1,
    },
    IntentPattern {
        intent: IntentType::Goodbye,
        keywords: &["goodbye", "bye", "see you", "thanks", "thank you", "that's all", "done", "exit"],
        weight: 1.0,
    },
];
