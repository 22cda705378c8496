//! HMAC-SHA256 request signing/verification (§4.6 steps 2 and 5).

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, thiserror::Error)]
pub enum HmacError {
    #[error("invalid timestamp format")]
    BadTimestamp,
    #[error("timestamp outside the allowed window")]
    WindowExceeded,
    #[error("malformed signature header")]
    MalformedSignature,
    #[error("signature mismatch")]
    Mismatch,
}

/// `method + "\n" + path + "\n" + body + "\n" + timestamp`, matching §4.6
/// step 5's canonical string exactly.
pub fn canonical_string(method: &str, path: &str, body: &str, timestamp: &str) -> String {
    format!("{}\n{}\n{}\n{}", method, path, body, timestamp)
}

pub fn sign(secret: &str, canonical: &str) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key length");
    mac.update(canonical.as_bytes());
    format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
}

/// Parses and checks `|now - timestamp| <= window`.
pub fn check_window(timestamp_header: &str, window: chrono::Duration, now: DateTime<Utc>) -> Result<DateTime<Utc>, HmacError> {
    let timestamp = DateTime::parse_from_rfc3339(timestamp_header)
        .map_err(|_| HmacError::BadTimestamp)?
        .with_timezone(&Utc);
    let skew = now.signed_duration_since(timestamp);
    let skew = if skew < chrono::Duration::zero() { -skew } else { skew };
    if skew > window {
        return Err(HmacError::WindowExceeded);
    }
    Ok(timestamp)
}

/// Constant-time comparison of the provided `sha256=<hex>` header against
/// the expected signature computed from `secret`/`canonical`.
pub fn verify(secret: &str, canonical: &str, provided_signature: &str) -> Result<(), HmacError> {
    if !provided_signature.starts_with("sha256=") {
        return Err(HmacError::MalformedSignature);
    }
    let expected = sign(secret, canonical);
    if expected.as_bytes().ct_eq(provided_signature.as_bytes()).into() {
        Ok(())
    } else {
        Err(HmacError::Mismatch)
    }
}

/// Literal match, literal `*`, or a `prefix*` suffix wildcard treated as a
/// prefix test on the client IP (§4.6 step 6).
pub fn ip_allowed(whitelist: &[String], client_ip: &str) -> bool {
    if whitelist.is_empty() {
        return true;
    }
    whitelist.iter().any(|entry| {
        if entry == "*" {
            true
        } else if let Some(prefix) = entry.strip_suffix('*') {
            client_ip.starts_with(prefix)
        } else {
            entry == client_ip
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_then_verify_round_trips() {
        let canonical = canonical_string("POST", "/api/domains/d1/queues/q1/messages", "{}", "2026-01-01T00:00:00Z");
        let signature = sign("secret", &canonical);
        assert!(verify("secret", &canonical, &signature).is_ok());
    }

    #[test]
    fn wrong_secret_fails_verification() {
        let canonical = canonical_string("POST", "/x", "{}", "2026-01-01T00:00:00Z");
        let signature = sign("secret", &canonical);
        assert!(verify("other-secret", &canonical, &signature).is_err());
    }

    #[test]
    fn window_rejects_large_skew() {
        let now = Utc::now();
        let stale = (now - chrono::Duration::minutes(10)).to_rfc3339();
        assert!(check_window(&stale, chrono::Duration::minutes(5), now).is_err());
    }

    #[test]
    fn window_accepts_small_skew() {
        let now = Utc::now();
        let fresh = (now - chrono::Duration::seconds(5)).to_rfc3339();
        assert!(check_window(&fresh, chrono::Duration::minutes(5), now).is_ok());
    }

    #[test]
    fn ip_suffix_wildcard_matches_prefix() {
        let whitelist = vec!["10.0.0.*".to_string()];
        assert!(ip_allowed(&whitelist, "10.0.0.42"));
        assert!(!ip_allowed(&whitelist, "10.0.1.1"));
    }
}
