// Intent Analyzer — entity extraction.
// Regex-based slot filling run alongside classification; extracted
// entities both get attached to the result and feed the entity boosts in
// `scoring::apply_entity_boosts`.

use regex::Regex;
use std::collections::HashMap;
use std::sync::LazyLock;

static ORDER_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(?:order\s*#?\s*)?#?([A-Z]{0,3}\d{4,12})\b").unwrap());
static PRODUCT_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?i)["“']([^"”']{2,60})["”']"#).unwrap());
static PHONE_NUMBER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\+?\d{1,3}[\s-]?\(?\d{2,4}\)?[\s-]?\d{3,4}[\s-]?\d{3,4}").unwrap());
static EMAIL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}").unwrap());

/// Pull structured entities (order id, quoted product name, phone, email)
/// out of a preprocessed message. Returns at most one of each kind —
/// the first match wins.
pub fn extract_entities(message: &str) -> HashMap<String, String> {
    let mut entities = HashMap::new();

    if let Some(caps) = ORDER_ID.captures(message) {
        if let Some(m) = caps.get(1) {
            entities.insert("order_id".to_string(), m.as_str().to_string());
        }
    }
    if let Some(caps) = PRODUCT_NAME.captures(message) {
        if let Some(m) = caps.get(1) {
            entities.insert("product_name".to_string(), m.as_str().to_string());
        }
    }
    if let Some(m) = PHONE_NUMBER.find(message) {
        entities.insert("phone_number".to_string(), m.as_str().to_string());
    }
    if let Some(m) = EMAIL.find(message) {
        entities.insert("email".to_string(), m.as_str().to_string());
    }

    entities
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_order_id() {
        let entities = extract_entities("where is my order #A12345678");
        assert_eq!(entities.get("order_id").map(String::as_str), Some("A12345678"));
    }

    #[test]
    fn extracts_quoted_product_name() {
        let entities = extract_entities(r#"do you have the "Galaxy Running Shoes" in stock"#);
        assert_eq!(entities.get("product_name").map(String::as_str), Some("Galaxy Running Shoes"));
    }

    #[test]
    fn extracts_email_and_phone() {
        let entities = extract_entities("reach me at jane@example.com or +1 555-123-4567");
        assert_eq!(entities.get("email").map(String::as_str), Some("jane@example.com"));
        assert!(entities.get("phone_number").is_some());
    }

    #[test]
    fn returns_empty_map_when_nothing_matches() {
        let entities = extract_entities("hello there");
        assert!(entities.is_empty());
    }
}
