// HMAC-SHA256 webhook signature verification, `X-Hub-Signature-256: sha256=<hex>`.
// Constant-time comparison via `subtle` so a timing side-channel can't leak
// how many leading bytes of the signature matched.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

const SIGNATURE_PREFIX: &str = "sha256=";

/// Verify `signature_header` (the raw `X-Hub-Signature-256` header value)
/// against `body` using `secret`. Returns `false` for a missing prefix,
/// invalid hex, or a mismatched digest — never panics on malformed input.
pub fn verify(secret: &str, body: &[u8], signature_header: &str) -> bool {
    let Some(hex_digest) = signature_header.strip_prefix(SIGNATURE_PREFIX) else {
        return false;
    };
    let Ok(provided) = hex::decode(hex_digest) else {
        return false;
    };

    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(body);
    let expected = mac.finalize().into_bytes();

    expected.ct_eq(&provided).into()
}

/// Compute the `sha256=<hex>` signature a sender would attach for `body`.
/// Used only by tests and by any future outbound-signing caller.
#[cfg(test)]
fn sign(secret: &str, body: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key length");
    mac.update(body);
    format!("{SIGNATURE_PREFIX}{}", hex::encode(mac.finalize().into_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_a_correctly_signed_body() {
        let body = br#"{"entry":[]}"#;
        let sig = sign("top-secret", body);
        assert!(verify("top-secret", body, &sig));
    }

    #[test]
    fn rejects_wrong_secret() {
        let body = br#"{"entry":[]}"#;
        let sig = sign("top-secret", body);
        assert!(!verify("wrong-secret", body, &sig));
    }

    #[test]
    fn rejects_tampered_body() {
        let body = br#"{"entry":[]}"#;
        let sig = sign("top-secret", body);
        assert!(!verify("top-secret", br#"{"entry":[1]}"#, &sig));
    }

    #[test]
    fn rejects_missing_prefix() {
        assert!(!verify("top-secret", b"body", "deadbeef"));
    }

    #[test]
    fn rejects_non_hex_digest() {
        assert!(!verify("top-secret", b"body", "sha256=not-hex"));
    }
}
