// Inbound webhook payload — the WhatsApp Cloud API `entry[0].changes[0].value`
// shape. Only the fields this gateway actually consumes are modeled; anything
// else in the payload is ignored rather than rejected, since providers add
// fields over time and a strict schema would break on every upstream change.

use serde::Deserialize;

use crate::atoms::error::{GatewayError, GatewayResult};

#[derive(Debug, Deserialize)]
pub struct WebhookEnvelope {
    pub entry: Vec<Entry>,
}

#[derive(Debug, Deserialize)]
pub struct Entry {
    pub changes: Vec<Change>,
}

#[derive(Debug, Deserialize)]
pub struct Change {
    pub value: ChangeValue,
}

#[derive(Debug, Deserialize, Default)]
pub struct ChangeValue {
    #[serde(default)]
    pub messages: Vec<InboundMessage>,
    #[serde(default)]
    pub statuses: Vec<StatusUpdate>,
}

#[derive(Debug, Deserialize)]
pub struct InboundMessage {
    pub id: String,
    pub from: String,
    #[serde(rename = "type")]
    pub message_type: String,
    pub timestamp: String,
    pub text: Option<TextBody>,
}

#[derive(Debug, Deserialize)]
pub struct TextBody {
    pub body: String,
}

#[derive(Debug, Deserialize)]
pub struct StatusUpdate {
    pub id: String,
    pub status: String,
    pub timestamp: String,
}

/// What the webhook handler actually needs to act on one inbound text
/// message, already validated and normalized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedMessage {
    pub message_id: String,
    pub phone: String,
    pub content: String,
    pub timestamp: String,
}

/// The kind of event a webhook delivery carries, after unwrapping the
/// `entry[0].changes[0].value` envelope.
pub enum WebhookEvent {
    Message(ParsedMessage),
    StatusUpdate { timestamp: String },
    Unhandled,
}

/// Extract and validate the single event this delivery carries.
///
/// Non-text messages are reported as [`GatewayError::Validation`] with a
/// distinguishable message so the caller can ack them (200) rather than
/// treat them as a real failure — WhatsApp retries on non-2xx responses,
/// and there is nothing to retry for a sticker or image message this
/// gateway doesn't handle.
pub fn parse_event(body: &[u8]) -> GatewayResult<WebhookEvent> {
    let envelope: WebhookEnvelope =
        serde_json::from_slice(body).map_err(|e| GatewayError::Validation(format!("invalid webhook JSON: {e}")))?;

    let value = envelope
        .entry
        .into_iter()
        .next()
        .and_then(|e| e.changes.into_iter().next())
        .map(|c| c.value)
        .ok_or_else(|| GatewayError::Validation("webhook payload missing entry[0].changes[0].value".into()))?;

    if let Some(status) = value.statuses.into_iter().next() {
        return Ok(WebhookEvent::StatusUpdate { timestamp: status.timestamp });
    }

    let Some(message) = value.messages.into_iter().next() else {
        return Ok(WebhookEvent::Unhandled);
    };

    if message.message_type != "text" {
        return Err(GatewayError::Validation(format!("non_text_message:{}", message.message_type)));
    }

    let content = message
        .text
        .map(|t| t.body)
        .ok_or_else(|| GatewayError::Validation("text message missing body".into()))?;

    let phone = normalize_phone(&message.from)?;
    Ok(WebhookEvent::Message(ParsedMessage { message_id: message.id, phone, content, timestamp: message.timestamp }))
}

/// Replay protection: reject a webhook whose embedded timestamp (Unix
/// epoch seconds, as a string) is more than `window_secs` away from now in
/// either direction. An unparsable timestamp is treated as stale.
pub fn is_within_replay_window(timestamp: &str, window_secs: u64, now_epoch_secs: u64) -> bool {
    let Ok(ts) = timestamp.parse::<i64>() else {
        return false;
    };
    let now = now_epoch_secs as i64;
    (now - ts).unsigned_abs() <= window_secs
}

fn normalize_phone(phone: &str) -> GatewayResult<String> {
    let trimmed = phone.trim();
    if trimmed.is_empty() {
        return Err(GatewayError::Validation("phone number is required".into()));
    }
    let candidate = if trimmed.starts_with('+') { trimmed.to_string() } else { format!("+{trimmed}") };
    let digits_after_plus = &candidate[1..];
    let valid = digits_after_plus.len() >= 9
        && digits_after_plus.len() <= 15
        && digits_after_plus.chars().next().is_some_and(|c| c != '0')
        && digits_after_plus.chars().all(|c| c.is_ascii_digit());
    if !valid {
        return Err(GatewayError::Validation(format!("invalid phone number format: {phone}")));
    }
    Ok(candidate)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text_message_payload(msg_type: &str, body: Option<&str>) -> Vec<u8> {
        let text = body.map(|b| serde_json::json!({"body": b}));
        serde_json::to_vec(&serde_json::json!({
            "entry": [{
                "changes": [{
                    "value": {
                        "messages": [{
                            "id": "wamid.123",
                            "from": "15551234567",
                            "type": msg_type,
                            "timestamp": "1700000000",
                            "text": text,
                        }]
                    }
                }]
            }]
        }))
        .unwrap()
    }

    #[test]
    fn parses_a_valid_text_message() {
        let body = text_message_payload("text", Some("hello there"));
        match parse_event(&body).unwrap() {
            WebhookEvent::Message(m) => {
                assert_eq!(m.phone, "+15551234567");
                assert_eq!(m.content, "hello there");
                assert_eq!(m.message_id, "wamid.123");
            }
            _ => panic!("expected a Message event"),
        }
    }

    #[test]
    fn rejects_non_text_message() {
        let body = text_message_payload("image", None);
        let err = parse_event(&body).unwrap_err();
        assert!(matches!(err, GatewayError::Validation(m) if m.starts_with("non_text_message:")));
    }

    #[test]
    fn status_update_is_recognized() {
        let body = serde_json::to_vec(&serde_json::json!({
            "entry": [{"changes": [{"value": {"statuses": [{"status": "delivered", "id": "wamid.1", "timestamp": "1700000000"}]}}]}]
        }))
        .unwrap();
        assert!(matches!(parse_event(&body).unwrap(), WebhookEvent::StatusUpdate { .. }));
    }

    #[test]
    fn replay_window_accepts_recent_and_rejects_stale() {
        assert!(is_within_replay_window("1700000000", 300, 1700000100));
        assert!(!is_within_replay_window("1700000000", 300, 1700000500));
        assert!(!is_within_replay_window("not-a-number", 300, 1700000000));
    }

    #[test]
    fn unhandled_event_type_is_acked_not_errored() {
        let body = serde_json::to_vec(&serde_json::json!({
            "entry": [{"changes": [{"value": {}}]}]
        }))
        .unwrap();
        assert!(matches!(parse_event(&body).unwrap(), WebhookEvent::Unhandled));
    }

    #[test]
    fn malformed_json_is_a_validation_error() {
        assert!(parse_event(b"not json").is_err());
    }

    #[test]
    fn phone_without_plus_gets_normalized() {
        assert_eq!(normalize_phone("15551234567").unwrap(), "+15551234567");
    }

    #[test]
    fn phone_starting_with_zero_is_rejected() {
        assert!(normalize_phone("+05551234567").is_err());
    }
}
