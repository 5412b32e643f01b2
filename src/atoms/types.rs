// Gateway Atoms — Core types
// These are the data structures that flow through the entire gateway. They
// are independent of any specific delivery channel or LLM provider.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// ── Provider plumbing (LLM backends) ───────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub id: String,
    pub kind: ProviderKind,
    pub api_key: String,
    pub base_url: Option<String>,
    pub default_model: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Gemini,
    OpenAi,
}

impl ProviderKind {
    pub fn default_base_url(&self) -> &'static str {
        match self {
            ProviderKind::Gemini => "https://generativelanguage.googleapis.com/v1beta",
            ProviderKind::OpenAi => "https://api.openai.com/v1",
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ProviderKind::Gemini => "gemini",
            ProviderKind::OpenAi => "openai",
        }
    }
}

/// A single chat turn sent to an LLM provider. Distinct from [`Message`]
/// (the persisted conversation message) — this is wire-format only and
/// never touches the database.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmMessage {
    pub role: LlmRole,
    pub content: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LlmRole {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

/// Outcome of a single LLM chat completion call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmCompletion {
    pub text: String,
    pub model: String,
    pub usage: TokenUsage,
}

// ── Conversation / Message (persisted) ──────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ConversationStatus {
    Active,
    Closed,
    Escalated,
}

impl ConversationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConversationStatus::Active => "active",
            ConversationStatus::Closed => "closed",
            ConversationStatus::Escalated => "escalated",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "closed" => ConversationStatus::Closed,
            "escalated" => ConversationStatus::Escalated,
            _ => ConversationStatus::Active,
        }
    }
}

/// A conversation thread with a single end user on a single channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    pub channel: String,
    pub external_user_id: String,
    pub status: ConversationStatus,
    pub created_at: String,
    pub updated_at: String,
    pub last_intent: Option<IntentType>,
    pub metadata: HashMap<String, String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageDirection {
    Inbound,
    Outbound,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    Pending,
    Sent,
    Delivered,
    Failed,
}

/// A single persisted message within a [`Conversation`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub conversation_id: String,
    pub direction: MessageDirection,
    pub content: String,
    pub status: MessageStatus,
    pub intent: Option<IntentType>,
    pub created_at: String,
}

/// A bounded window of recent turns for a conversation, as handed to the
/// intent analyzer and the LLM for context. Tier-1 storage (Redis) holds
/// this directly; the SQLite store is the durable source of truth it is
/// rebuilt from on a cache miss.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConversationHistory {
    pub conversation_id: String,
    pub turns: Vec<Turn>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Turn {
    pub role: LlmRole,
    pub content: String,
    pub timestamp: String,
}

impl ConversationHistory {
    /// Append a turn, trimming to [`crate::atoms::constants::CONVERSATION_HISTORY_MAX_TURNS`].
    pub fn push(&mut self, turn: Turn) {
        self.turns.push(turn);
        let max = crate::atoms::constants::CONVERSATION_HISTORY_MAX_TURNS;
        if self.turns.len() > max {
            let excess = self.turns.len() - max;
            self.turns.drain(0..excess);
        }
    }
}

// ── Circuit breaker ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

/// A single recorded transition, kept in a bounded ring buffer per breaker
/// for the `/metrics` and diagnostics surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitStateChange {
    pub from: CircuitState,
    pub to: CircuitState,
    pub at_epoch_secs: u64,
}

/// A point-in-time snapshot of a named circuit breaker's state, suitable
/// for serializing onto `/metrics` or a status endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerState {
    pub name: String,
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub half_open_successes: u32,
}

// ── Rate limiter ─────────────────────────────────────────────────────────

/// A logical sliding window for one rate-limit identifier. Used by the
/// in-memory fallback tier; the Redis tier keeps the authoritative window
/// as a sorted set and never materializes this struct.
#[derive(Debug, Clone)]
pub struct RateLimitWindow {
    pub identifier: String,
    pub max_requests: u32,
    pub window_secs: u64,
    pub timestamps: std::collections::VecDeque<u64>,
}

// ── Knowledge retrieval ───────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeDocument {
    pub id: String,
    pub title: String,
    pub content: String,
    pub embedding: Vec<f32>,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeMatch {
    pub document: KnowledgeDocument,
    pub similarity: f64,
}

// ── Intent analysis ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum IntentType {
    Greeting,
    ProductQuery,
    ProductDetailsFollowup,
    OrderStatus,
    Complaint,
    SupportRequest,
    PriceInquiry,
    AvailabilityCheck,
    Goodbye,
    KnowledgeBaseQuery,
    Fallback,
}

impl IntentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            IntentType::Greeting => "greeting",
            IntentType::ProductQuery => "product_query",
            IntentType::ProductDetailsFollowup => "product_details_followup",
            IntentType::OrderStatus => "order_status",
            IntentType::Complaint => "complaint",
            IntentType::SupportRequest => "support_request",
            IntentType::PriceInquiry => "price_inquiry",
            IntentType::AvailabilityCheck => "availability_check",
            IntentType::Goodbye => "goodbye",
            IntentType::KnowledgeBaseQuery => "knowledge_base_query",
            IntentType::Fallback => "fallback",
        }
    }

    pub fn all() -> &'static [IntentType] {
        &[
            IntentType::Greeting,
            IntentType::ProductQuery,
            IntentType::ProductDetailsFollowup,
            IntentType::OrderStatus,
            IntentType::Complaint,
            IntentType::SupportRequest,
            IntentType::PriceInquiry,
            IntentType::AvailabilityCheck,
            IntentType::Goodbye,
            IntentType::KnowledgeBaseQuery,
        ]
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntentResult {
    pub intent: IntentType,
    pub confidence: f64,
    pub matched_patterns: Vec<String>,
    pub entities: HashMap<String, String>,
}

// ── AI processing result ─────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingResult {
    pub response: String,
    pub intent: IntentType,
    pub processing_time_ms: u64,
    pub tokens_used: Option<u32>,
    pub cached: bool,
    pub error: Option<String>,
}
