// Resilience — retry / exponential backoff policy.
// Shared by the LLM provider clients, the e-commerce client, and the
// delivery worker's outbound retry loop.

use std::time::Duration;

use crate::atoms::constants::{INITIAL_RETRY_DELAY_MS, MAX_RETRIES, MAX_RETRY_DELAY_MS};

/// HTTP statuses worth retrying: rate limited or transient server-side
/// failure. Anything else (4xx other than 429) is treated as permanent.
pub fn is_retryable_status(status: u16) -> bool {
    matches!(status, 429 | 500 | 502 | 503 | 504 | 529)
}

/// Extract a `Retry-After` value in seconds, if the header is present and
/// parses as a plain integer (delay-seconds form; HTTP-date form is not
/// produced by any provider this gateway talks to).
pub fn parse_retry_after(header_value: Option<&str>) -> Option<u64> {
    header_value.and_then(|v| v.trim().parse::<u64>().ok())
}

/// ±25% jitter around `base_ms`, floored at 100ms, to avoid synchronized
/// retry storms across concurrent requests.
fn apply_jitter(base_ms: u64) -> Duration {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or(0);
    let jitter_pct = (nanos % 50) as i64 - 25; // -25..=24
    let jittered = (base_ms as i64) + (base_ms as i64 * jitter_pct / 100);
    Duration::from_millis(jittered.max(100) as u64)
}

/// Exponential backoff delay for retry attempt `attempt` (0-indexed),
/// honoring a server-provided `Retry-After` hint when present.
pub fn retry_delay(attempt: u32, retry_after_secs: Option<u64>) -> Duration {
    if let Some(secs) = retry_after_secs {
        return Duration::from_millis((secs * 1000).min(MAX_RETRY_DELAY_MS));
    }
    let base = INITIAL_RETRY_DELAY_MS.saturating_mul(1u64 << attempt.min(10));
    apply_jitter(base.min(MAX_RETRY_DELAY_MS))
}

/// Whether another attempt should be made given how many have already run.
pub fn should_retry(attempt: u32) -> bool {
    attempt < MAX_RETRIES
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_statuses() {
        assert!(is_retryable_status(429));
        assert!(is_retryable_status(503));
        assert!(!is_retryable_status(400));
        assert!(!is_retryable_status(404));
    }

    #[test]
    fn retry_after_parses_plain_integer() {
        assert_eq!(parse_retry_after(Some("30")), Some(30));
        assert_eq!(parse_retry_after(Some("  7 ")), Some(7));
        assert_eq!(parse_retry_after(Some("not-a-number")), None);
        assert_eq!(parse_retry_after(None), None);
    }

    #[test]
    fn retry_delay_honors_server_hint() {
        let d = retry_delay(0, Some(5));
        assert_eq!(d, Duration::from_millis(5000));
    }

    #[test]
    fn retry_delay_grows_with_attempt() {
        let d0 = retry_delay(0, None);
        let d3 = retry_delay(3, None);
        assert!(d3 >= d0);
    }

    #[test]
    fn retry_delay_is_capped() {
        let d = retry_delay(10, None);
        assert!(d.as_millis() as u64 <= MAX_RETRY_DELAY_MS + MAX_RETRY_DELAY_MS / 4);
    }

    #[test]
    fn should_retry_respects_max_attempts() {
        assert!(should_retry(0));
        assert!(!should_retry(MAX_RETRIES));
    }
}
