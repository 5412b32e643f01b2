// Product query handler — searches the catalog for the product name the
// intent analyzer extracted, formatting up to MAX_PRODUCTS_TO_SHOW results.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::error;

use super::{HandlerContext, IntentHandler};
use crate::atoms::constants::MAX_PRODUCTS_TO_SHOW;
use crate::ecommerce::{EcommerceClient, Product};

pub struct ProductQueryHandler {
    ecommerce: Arc<EcommerceClient>,
}

impl ProductQueryHandler {
    pub fn new(ecommerce: Arc<EcommerceClient>) -> Self {
        ProductQueryHandler { ecommerce }
    }

    fn format_results(products: &[Product], keywords: &str) -> String {
        if products.len() == 1 {
            let p = &products[0];
            return format!("I found one product for you:\n- **{}**: ${:.2}", p.title, p.price);
        }

        let list: Vec<String> = products.iter().map(|p| format!("- **{}**: ${:.2}", p.title, p.price)).collect();
        format!(
            "I found these products matching '{keywords}':\n{}\n\nWould you like more details on any of these?",
            list.join("\n")
        )
    }
}

#[async_trait]
impl IntentHandler for ProductQueryHandler {
    async fn handle(&self, ctx: &HandlerContext<'_>) -> String {
        let Some(product_name) = ctx.intent_result.entities.get("product_name") else {
            return "I can help with that! What kind of products are you looking for?".to_string();
        };
        let keywords: Vec<String> = product_name.split_whitespace().map(String::from).collect();
        if keywords.is_empty() {
            return "I can help with that! What kind of products are you looking for?".to_string();
        }

        match self.ecommerce.search_products(&keywords, MAX_PRODUCTS_TO_SHOW).await {
            Ok(products) if products.is_empty() => {
                format!("Sorry, I couldn't find any products matching '{product_name}'. You could try different keywords.")
            }
            Ok(products) => Self::format_results(&products, product_name),
            Err(e) => {
                error!(error = %e, keywords = ?keywords, "product query failed");
                "I'm having trouble searching for products right now. Please try again in a moment.".to_string()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_single_product_without_a_list() {
        let products = vec![Product { id: "1".into(), title: "Galaxy Shoes".into(), price: 49.99, tags: vec![] }];
        let out = ProductQueryHandler::format_results(&products, "shoes");
        assert!(out.contains("one product"));
        assert!(out.contains("$49.99"));
    }

    #[test]
    fn formats_multiple_products_as_a_list_with_followup() {
        let products = vec![
            Product { id: "1".into(), title: "Shoes A".into(), price: 10.0, tags: vec![] },
            Product { id: "2".into(), title: "Shoes B".into(), price: 20.0, tags: vec![] },
        ];
        let out = ProductQueryHandler::format_results(&products, "shoes");
        assert!(out.contains("Shoes A"));
        assert!(out.contains("Shoes B"));
        assert!(out.contains("more details"));
    }
}
