//! HMAC-SHA-256 signed-payload scheme for internal webhook registration.
//!
//! The signed string is `"{timestamp}.{canonical_json}"`. Verification is
//! constant-time and rejects timestamps older than the configured age or
//! in the future.

use hmac::{Hmac, Mac};
use serde_json::Value;
use sha2::Sha256;

use opennotes_domain::error::{Error, Result};

type HmacSha256 = Hmac<Sha256>;

/// A computed signature plus the timestamp it covers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebhookSignature {
    pub timestamp: i64,
    /// 64 lowercase hex characters.
    pub signature: String,
}

fn canonical_json(payload: &Value) -> String {
    // serde_json::Value objects iterate keys in map order; re-serialize
    // through a BTreeMap for a stable canonical form.
    fn canonicalize(value: &Value) -> Value {
        match value {
            Value::Object(map) => Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), canonicalize(v)))
                    .collect::<serde_json::Map<_, _>>(),
            ),
            Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
            other => other.clone(),
        }
    }
    canonicalize(payload).to_string()
}

fn compute(payload: &Value, secret: &str, timestamp: i64) -> Result<Vec<u8>> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| Error::crypto(format!("Invalid HMAC key: {e}")))?;
    mac.update(format!("{timestamp}.{}", canonical_json(payload)).as_bytes());
    Ok(mac.finalize().into_bytes().to_vec())
}

/// Sign a payload at `timestamp` (Unix seconds).
pub fn generate_webhook_signature(
    payload: &Value,
    secret: &str,
    timestamp: i64,
) -> Result<WebhookSignature> {
    let digest = compute(payload, secret, timestamp)?;
    Ok(WebhookSignature {
        timestamp,
        signature: hex::encode(digest),
    })
}

/// Verify a signature, enforcing the timestamp window.
///
/// `now` is Unix seconds; timestamps older than `max_age_seconds` or in
/// the future fail. Comparison is constant-time.
pub fn verify_webhook_signature(
    payload: &Value,
    secret: &str,
    timestamp: i64,
    signature: &str,
    now: i64,
    max_age_seconds: i64,
) -> bool {
    if timestamp > now || now - timestamp > max_age_seconds {
        return false;
    }
    let Ok(provided) = hex::decode(signature) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(format!("{timestamp}.{}", canonical_json(payload)).as_bytes());
    // verify_slice is the constant-time comparison.
    mac.verify_slice(&provided).is_ok()
}
