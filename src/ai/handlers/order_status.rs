// Order status handler — looks up the order id the intent analyzer
// extracted (or asks for one if none was found in the message).

use std::sync::Arc;

use async_trait::async_trait;
use tracing::error;

use super::{HandlerContext, IntentHandler};
use crate::ecommerce::EcommerceClient;

pub struct OrderStatusHandler {
    ecommerce: Arc<EcommerceClient>,
}

impl OrderStatusHandler {
    pub fn new(ecommerce: Arc<EcommerceClient>) -> Self {
        OrderStatusHandler { ecommerce }
    }
}

#[async_trait]
impl IntentHandler for OrderStatusHandler {
    async fn handle(&self, ctx: &HandlerContext<'_>) -> String {
        let Some(order_id) = ctx.intent_result.entities.get("order_id") else {
            return "I can check your order status. Please provide the order ID.".to_string();
        };

        match self.ecommerce.get_order_status(order_id).await {
            Ok(Some(status)) => match &status.tracking_url {
                Some(url) => format!("Order **{order_id}** is currently **{}**. Track it here: {url}", status.status),
                None => format!("Order **{order_id}** is currently **{}**.", status.status),
            },
            Ok(None) => format!("I couldn't find an order with ID **{order_id}**. Please double-check the ID."),
            Err(e) => {
                error!(error = %e, order_id, "order status lookup failed");
                "Sorry, I'm unable to check order statuses right now.".to_string()
            }
        }
    }
}
