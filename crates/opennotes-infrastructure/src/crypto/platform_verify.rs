//! Ed25519 verification of external platform webhook signatures.
//!
//! Platform keys must be exactly 64 hex characters; anything else is
//! refused at runtime. An empty key is refused in production and bypassed
//! in development and test environments.

use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use tracing::warn;

use crate::config::Environment;

/// Verify `signature_hex` over `timestamp ++ body` with the platform's
/// Ed25519 public key.
#[must_use]
pub fn verify_platform_signature(
    public_key_hex: &str,
    environment: Environment,
    timestamp: &str,
    body: &[u8],
    signature_hex: &str,
) -> bool {
    if public_key_hex.is_empty() {
        if environment.is_production() {
            warn!("Platform public key not configured, refusing webhook in production");
            return false;
        }
        // Development and test bypass verification entirely.
        return true;
    }

    if public_key_hex.len() != 64 || !public_key_hex.chars().all(|c| c.is_ascii_hexdigit()) {
        warn!("Platform public key malformed, refusing webhook");
        return false;
    }

    let Ok(key_bytes) = hex::decode(public_key_hex) else {
        return false;
    };
    let Ok(key_array) = <[u8; 32]>::try_from(key_bytes.as_slice()) else {
        return false;
    };
    let Ok(verifying_key) = VerifyingKey::from_bytes(&key_array) else {
        warn!("Platform public key is not a valid Ed25519 point");
        return false;
    };

    let Ok(sig_bytes) = hex::decode(signature_hex) else {
        return false;
    };
    let Ok(sig_array) = <[u8; 64]>::try_from(sig_bytes.as_slice()) else {
        return false;
    };
    let signature = Signature::from_bytes(&sig_array);

    let mut message = Vec::with_capacity(timestamp.len() + body.len());
    message.extend_from_slice(timestamp.as_bytes());
    message.extend_from_slice(body);

    verifying_key.verify(&message, &signature).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ed25519_dalek::{Signer, SigningKey};

    fn keypair() -> (SigningKey, String) {
        let signing = SigningKey::from_bytes(&[7u8; 32]);
        let public_hex = hex::encode(signing.verifying_key().to_bytes());
        (signing, public_hex)
    }

    #[test]
    fn empty_key_refused_in_production() {
        assert!(!verify_platform_signature(
            "",
            Environment::Production,
            "123",
            b"body",
            "00"
        ));
    }

    #[test]
    fn empty_key_bypassed_in_dev_and_test() {
        assert!(verify_platform_signature("", Environment::Development, "1", b"x", "00"));
        assert!(verify_platform_signature("", Environment::Test, "1", b"x", "00"));
    }

    #[test]
    fn wrong_length_key_refused() {
        assert!(!verify_platform_signature(
            &"a".repeat(63),
            Environment::Production,
            "1",
            b"x",
            "00"
        ));
    }

    #[test]
    fn non_hex_key_refused() {
        assert!(!verify_platform_signature(
            &"g".repeat(64),
            Environment::Production,
            "1",
            b"x",
            "00"
        ));
    }

    #[test]
    fn valid_signature_verifies() {
        let (signing, public_hex) = keypair();
        let timestamp = "1700000000";
        let body = b"{\"type\":1}";
        let mut message = timestamp.as_bytes().to_vec();
        message.extend_from_slice(body);
        let signature = hex::encode(signing.sign(&message).to_bytes());

        assert!(verify_platform_signature(
            &public_hex,
            Environment::Production,
            timestamp,
            body,
            &signature
        ));
    }

    #[test]
    fn tampered_body_fails() {
        let (signing, public_hex) = keypair();
        let timestamp = "1700000000";
        let mut message = timestamp.as_bytes().to_vec();
        message.extend_from_slice(b"{\"type\":1}");
        let signature = hex::encode(signing.sign(&message).to_bytes());

        assert!(!verify_platform_signature(
            &public_hex,
            Environment::Production,
            timestamp,
            b"{\"type\":2}",
            &signature
        ));
    }
}
