// E-commerce client
// Thin, circuit-breaker-wrapped REST client the ProductQuery and
// OrderStatus handlers use to answer questions against the store's
// catalog and order APIs. Read-only — order management/fulfillment
// workflows live in the store's own backend, not this gateway.

use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::atoms::error::{GatewayError, GatewayResult};
use crate::resilience::backoff::{is_retryable_status, retry_delay, should_retry};
use crate::resilience::CircuitBreaker;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Product {
    pub id: String,
    pub title: String,
    pub price: f64,
    #[serde(default)]
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderStatus {
    pub order_id: String,
    pub status: String,
    #[serde(default)]
    pub tracking_url: Option<String>,
}

pub struct EcommerceClient {
    client: Client,
    base_url: String,
    api_key: String,
    circuit: Arc<CircuitBreaker>,
}

impl EcommerceClient {
    pub fn new(base_url: String, api_key: String, circuit: Arc<CircuitBreaker>) -> Self {
        EcommerceClient {
            client: Client::builder().timeout(Duration::from_secs(15)).build().unwrap_or_default(),
            base_url,
            api_key,
            circuit,
        }
    }

    /// Search the catalog for products whose tags or title match
    /// `keywords`, capped at `limit` results.
    pub async fn search_products(&self, keywords: &[String], limit: usize) -> GatewayResult<Vec<Product>> {
        self.circuit.check()?;

        let url = format!("{}/products/search", self.base_url);
        let query = keywords.join(" ");

        let result = self.call_with_retry(|| {
            self.client
                .get(&url)
                .bearer_auth(&self.api_key)
                .query(&[("keywords", query.as_str()), ("limit", &limit.to_string())])
                .send()
        }).await;

        match result {
            Ok(response) => {
                self.circuit.record_success();
                let products: Vec<Product> = response.json().await?;
                Ok(products.into_iter().take(limit).collect())
            }
            Err(err) => {
                self.circuit.record_failure();
                Err(err)
            }
        }
    }

    /// Look up the current status of a single order by id.
    pub async fn get_order_status(&self, order_id: &str) -> GatewayResult<Option<OrderStatus>> {
        self.circuit.check()?;

        let url = format!("{}/orders/{}", self.base_url, order_id);

        let result = self.call_with_retry(|| self.client.get(&url).bearer_auth(&self.api_key).send()).await;

        match result {
            Ok(response) if response.status().as_u16() == 404 => {
                self.circuit.record_success();
                Ok(None)
            }
            Ok(response) => {
                self.circuit.record_success();
                Ok(Some(response.json().await?))
            }
            Err(err) => {
                self.circuit.record_failure();
                Err(err)
            }
        }
    }

    async fn call_with_retry<F, Fut>(&self, make_request: F) -> GatewayResult<reqwest::Response>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<reqwest::Response, reqwest::Error>>,
    {
        let mut attempt = 0;
        loop {
            match make_request().await {
                Ok(response) if response.status().is_success() || response.status().as_u16() == 404 => {
                    return Ok(response);
                }
                Ok(response) => {
                    let status = response.status().as_u16();
                    if is_retryable_status(status) && should_retry(attempt) {
                        warn!(status, attempt, "ecommerce API call failed, retrying");
                        tokio::time::sleep(retry_delay(attempt, None)).await;
                        attempt += 1;
                        continue;
                    }
                    let text = response.text().await.unwrap_or_default();
                    return Err(GatewayError::external_service("ecommerce", format!("HTTP {status}: {text}")));
                }
                Err(e) if should_retry(attempt) => {
                    warn!(attempt, error = %e, "ecommerce API call failed, retrying");
                    tokio::time::sleep(retry_delay(attempt, None)).await;
                    attempt += 1;
                }
                Err(e) => return Err(GatewayError::from(e)),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn product_deserializes_with_default_tags() {
        let json = r#"{"id": "1", "title": "Shoes", "price": 29.99}"#;
        let product: Product = serde_json::from_str(json).unwrap();
        assert!(product.tags.is_empty());
    }
}
