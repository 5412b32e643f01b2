// ServiceContext — everything a request handler needs, built once at
// startup and shared behind `Arc` instead of reached for through global
// singletons. Construction order follows the dependency order leaves
// first: circuits and the rate limiter have no dependencies; the store and
// knowledge retriever depend on SQLite/Redis; the handlers depend on the
// store, knowledge retriever, and provider chain; the processor depends on
// all of the handlers.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use redis::aio::ConnectionManager;
use rusqlite::Connection;
use tokio::sync::mpsc;

use crate::ai::cache::ResponseCache;
use crate::ai::handlers::{FallbackHandler, GreetingHandler, IntentHandler, KnowledgeQueryHandler, OrderStatusHandler, ProductQueryHandler};
use crate::ai::processor::AiProcessor;
use crate::atoms::constants::{ECOMMERCE_FAILURE_THRESHOLD, ECOMMERCE_RECOVERY_TIMEOUT_SECS, LLM_FAILURE_THRESHOLD, LLM_RECOVERY_TIMEOUT_SECS};
use crate::atoms::error::GatewayResult;
use crate::atoms::types::{IntentType, ProviderConfig, ProviderKind};
use crate::config::Config;
use crate::ecommerce::EcommerceClient;
use crate::knowledge::{EmbeddingService, KnowledgeRetriever};
use crate::providers::{AnyProvider, ProviderChain};
use crate::rate_limiter::RateLimiter;
use crate::resilience::CircuitRegistry;
use crate::store::ConversationStore;
use crate::webhook::dedup::Deduplicator;
use crate::worker::queue::DeliveryTask;
use crate::worker::{ai_service_base_url, AiServiceClient, OutboundClient, TaskLock};

/// Seed knowledge-base entries loaded on first boot, when the
/// `knowledge_documents` table is empty. Mirrors the three FAQ-style
/// documents the original service ships with.
const SEED_DOCUMENTS: &[(&str, &str)] = &[
    (
        "Return policy",
        "We accept returns within 30 days of delivery for a full refund, provided the item is unused and in its original packaging.",
    ),
    (
        "Shipping times",
        "Standard shipping takes 3-5 business days. Express shipping takes 1-2 business days and is available at checkout.",
    ),
    (
        "Contacting support",
        "You can reach our support team by replying to this conversation at any time; a human agent will follow up within one business day.",
    ),
];

pub struct ServiceContext {
    pub config: Arc<Config>,
    pub store: Arc<ConversationStore>,
    pub knowledge_conn: Arc<Mutex<Connection>>,
    pub knowledge: Arc<KnowledgeRetriever>,
    pub rate_limiter: Arc<RateLimiter>,
    pub webhook_rate_limiter: Arc<RateLimiter>,
    pub circuits: Arc<CircuitRegistry>,
    pub dedup: Arc<Deduplicator>,
    pub providers: Arc<ProviderChain>,
    pub ai_processor: Arc<AiProcessor>,
    pub ai_client: Arc<AiServiceClient>,
    pub outbound: Arc<OutboundClient>,
    pub task_lock: Arc<TaskLock>,
    pub delivery_sender: mpsc::Sender<DeliveryTask>,
}

impl ServiceContext {
    /// Build every service and wire them together. Returns the context
    /// plus the receiving half of the delivery queue, which the caller
    /// hands to a `DeliveryWorker` running in its own background task.
    pub async fn build(config: Config) -> GatewayResult<(Arc<Self>, mpsc::Receiver<DeliveryTask>)> {
        let config = Arc::new(config);

        let redis = connect_redis(&config.redis_url).await;

        let circuits = Arc::new(CircuitRegistry::new());

        let rate_limiter = Arc::new(RateLimiter::new(
            redis.clone(),
            config.rate_limit_requests,
            config.rate_limit_window_secs,
            true,
        ));
        let webhook_rate_limiter = Arc::new(RateLimiter::new(
            redis.clone(),
            config.webhook_rate_limit_requests,
            config.webhook_rate_limit_window_secs,
            true,
        ));

        let dedup = Arc::new(Deduplicator::new(redis.clone(), config.strict_redis_dedup));

        let store = Arc::new(ConversationStore::open(&config.sqlite_path, redis.clone(), config.conversation_ttl_secs)?);

        // The knowledge retriever keeps its own SQLite connection to the
        // same database file rather than sharing the store's — SQLite's
        // WAL mode supports concurrent readers/writers across connections
        // from the same process, and this keeps the two subsystems from
        // needing to coordinate a shared lock for unrelated tables.
        let knowledge_conn = Arc::new(Mutex::new(open_knowledge_connection(&config.sqlite_path)?));
        let embedding_service = EmbeddingService::new(
            config.gemini_api_key.clone().unwrap_or_default(),
            config.embedding_model.clone(),
        );
        let knowledge = Arc::new(KnowledgeRetriever::new(embedding_service));
        let seed = SEED_DOCUMENTS.iter().map(|(t, c)| (t.to_string(), c.to_string())).collect();
        knowledge.initialize(&knowledge_conn, seed).await?;

        let ecommerce_circuit =
            circuits.get_or_create("ecommerce", config.ecommerce_failure_threshold.max(ECOMMERCE_FAILURE_THRESHOLD), Duration::from_secs(config.ecommerce_recovery_timeout_secs.max(ECOMMERCE_RECOVERY_TIMEOUT_SECS)));
        let ecommerce = Arc::new(EcommerceClient::new(
            config.ecommerce_api_url.clone().unwrap_or_default(),
            config.internal_api_key.clone().unwrap_or_default(),
            ecommerce_circuit,
        ));

        let providers = Arc::new(build_provider_chain(&config, &circuits));

        let fallback = Arc::new(FallbackHandler::new(providers.clone(), config.gemini_model.clone()));

        let mut handlers: HashMap<IntentType, Arc<dyn IntentHandler>> = HashMap::new();
        handlers.insert(IntentType::Greeting, Arc::new(GreetingHandler));
        handlers.insert(IntentType::ProductQuery, Arc::new(ProductQueryHandler::new(ecommerce.clone())));
        handlers.insert(IntentType::OrderStatus, Arc::new(OrderStatusHandler::new(ecommerce.clone())));
        handlers.insert(IntentType::KnowledgeBaseQuery, Arc::new(KnowledgeQueryHandler::new(knowledge.clone(), fallback.clone())));

        let cache = ResponseCache::new(redis.clone(), config.cache_ttl_secs);
        let ai_processor = Arc::new(AiProcessor::new(store.clone(), cache, handlers, fallback.clone()));

        let ai_client = Arc::new(AiServiceClient::new(
            ai_service_base_url(&config),
            config.internal_api_key.clone().unwrap_or_default(),
        ));

        let outbound_circuit = circuits.get_or_create(
            "whatsapp_outbound",
            LLM_FAILURE_THRESHOLD,
            Duration::from_secs(LLM_RECOVERY_TIMEOUT_SECS),
        );
        let outbound = Arc::new(OutboundClient::new(
            &config.whatsapp_api_host,
            &config.whatsapp_api_version,
            config.whatsapp_phone_number_id.as_deref().unwrap_or_default(),
            config.whatsapp_access_token.clone().unwrap_or_default(),
            outbound_circuit,
        ));

        let task_lock = Arc::new(TaskLock::new(redis.clone()));

        let (delivery_sender, delivery_receiver) = crate::worker::queue::channel();

        let context = Arc::new(ServiceContext {
            config,
            store,
            knowledge_conn,
            knowledge,
            rate_limiter,
            webhook_rate_limiter,
            circuits,
            dedup,
            providers,
            ai_processor,
            ai_client,
            outbound,
            task_lock,
            delivery_sender,
        });

        Ok((context, delivery_receiver))
    }
}

async fn connect_redis(redis_url: &str) -> Option<ConnectionManager> {
    match redis::Client::open(redis_url) {
        Ok(client) => match client.get_connection_manager().await {
            Ok(manager) => Some(manager),
            Err(e) => {
                tracing::warn!(error = %e, "could not connect to redis at startup, running degraded");
                None
            }
        },
        Err(e) => {
            tracing::warn!(error = %e, "invalid redis URL, running degraded");
            None
        }
    }
}

fn open_knowledge_connection(sqlite_path: &str) -> GatewayResult<Connection> {
    let conn = Connection::open(sqlite_path)?;
    conn.execute_batch("PRAGMA journal_mode=WAL;").ok();
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS knowledge_documents (
            id TEXT PRIMARY KEY,
            title TEXT NOT NULL,
            content TEXT NOT NULL,
            embedding BLOB NOT NULL,
            content_hash TEXT NOT NULL,
            updated_at TEXT NOT NULL DEFAULT (datetime('now'))
        );",
    )?;
    Ok(conn)
}

fn build_provider_chain(config: &Config, circuits: &CircuitRegistry) -> ProviderChain {
    let mut providers = Vec::new();
    let recovery = Duration::from_secs(config.llm_recovery_timeout_secs);

    if let Some(key) = &config.gemini_api_key {
        let provider_config = ProviderConfig {
            id: "gemini".to_string(),
            kind: ProviderKind::Gemini,
            api_key: key.clone(),
            base_url: None,
            default_model: Some(config.gemini_model.clone()),
        };
        providers.push(Arc::new(AnyProvider::from_config(&provider_config, circuits, config.llm_failure_threshold, recovery)));
    }
    if let Some(key) = &config.openai_api_key {
        let provider_config = ProviderConfig {
            id: "openai".to_string(),
            kind: ProviderKind::OpenAi,
            api_key: key.clone(),
            base_url: None,
            default_model: Some(config.openai_model.clone()),
        };
        providers.push(Arc::new(AnyProvider::from_config(&provider_config, circuits, config.llm_failure_threshold, recovery)));
    }

    ProviderChain::new(providers)
}
