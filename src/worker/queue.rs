// Delivery queue — the handoff point between Webhook Ingest (producer) and
// the Delivery Worker (consumer). A bounded `mpsc` channel backs it: once
// full, the ingest handler's `try_send` fails fast rather than blocking the
// webhook response past its ack deadline.

use tokio::sync::mpsc;

use crate::atoms::constants::DELIVERY_QUEUE_CAPACITY;

/// One unit of work: an inbound message that has already been persisted
/// and deduplicated, waiting for the AI processor and outbound delivery.
#[derive(Debug, Clone)]
pub struct DeliveryTask {
    pub conversation_id: String,
    pub channel: String,
    pub external_user_id: String,
    pub message: String,
    pub correlation_id: String,
}

pub fn channel() -> (mpsc::Sender<DeliveryTask>, mpsc::Receiver<DeliveryTask>) {
    mpsc::channel(DELIVERY_QUEUE_CAPACITY)
}
