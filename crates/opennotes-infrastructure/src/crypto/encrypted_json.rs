//! AES-256-GCM codec for the encrypted JSON column.
//!
//! The database representation is `{"encrypted": "<base64 nonce||ct>"}`;
//! plaintext never reaches a row. `decrypt(encrypt(x)) == x` holds for
//! objects and for null.

use aes_gcm::aead::{Aead, OsRng};
use aes_gcm::{AeadCore, Aes256Gcm, Key, KeyInit, Nonce};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde_json::Value;

use opennotes_domain::error::{Error, Result};

const ENVELOPE_FIELD: &str = "encrypted";
const NONCE_LEN: usize = 12;

/// Codec bound to one encryption key.
pub struct EncryptedJsonCodec {
    cipher: Aes256Gcm,
}

impl EncryptedJsonCodec {
    /// Build from a base64-encoded 32-byte key.
    ///
    /// # Errors
    ///
    /// `Error::Crypto` on malformed keys.
    pub fn new(base64_key: &str) -> Result<Self> {
        let key_bytes = BASE64
            .decode(base64_key)
            .map_err(|e| Error::crypto(format!("Encryption key is not valid base64: {e}")))?;
        if key_bytes.len() != 32 {
            return Err(Error::crypto(format!(
                "Encryption key must be 32 bytes, got {}",
                key_bytes.len()
            )));
        }
        let key = Key::<Aes256Gcm>::from_slice(&key_bytes);
        Ok(Self {
            cipher: Aes256Gcm::new(key),
        })
    }

    /// Encrypt any JSON value (including null) into the storage envelope.
    pub fn encrypt(&self, value: &Value) -> Result<Value> {
        let plaintext = serde_json::to_vec(value)?;
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext.as_ref())
            .map_err(|_| Error::crypto("Encryption failed"))?;

        let mut blob = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        blob.extend_from_slice(&nonce);
        blob.extend_from_slice(&ciphertext);
        Ok(serde_json::json!({ ENVELOPE_FIELD: BASE64.encode(blob) }))
    }

    /// Decrypt a storage envelope back into the original value.
    ///
    /// # Errors
    ///
    /// `Error::Crypto` on a malformed envelope or failed authentication.
    pub fn decrypt(&self, stored: &Value) -> Result<Value> {
        let encoded = stored
            .get(ENVELOPE_FIELD)
            .and_then(Value::as_str)
            .ok_or_else(|| Error::crypto("Stored value is not an encryption envelope"))?;
        let blob = BASE64
            .decode(encoded)
            .map_err(|e| Error::crypto(format!("Envelope is not valid base64: {e}")))?;
        if blob.len() < NONCE_LEN {
            return Err(Error::crypto("Envelope too short"));
        }
        let (nonce, ciphertext) = blob.split_at(NONCE_LEN);
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| Error::crypto("Decryption failed"))?;
        Ok(serde_json::from_slice(&plaintext)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn codec() -> EncryptedJsonCodec {
        EncryptedJsonCodec::new(&BASE64.encode([42u8; 32])).unwrap()
    }

    #[test]
    fn round_trips_objects() {
        let codec = codec();
        let value = json!({"token": "secret", "scopes": ["a", "b"], "n": 3});
        let stored = codec.encrypt(&value).unwrap();
        assert_eq!(codec.decrypt(&stored).unwrap(), value);
    }

    #[test]
    fn round_trips_null() {
        let codec = codec();
        let stored = codec.encrypt(&Value::Null).unwrap();
        assert_eq!(codec.decrypt(&stored).unwrap(), Value::Null);
    }

    #[test]
    fn stored_form_contains_no_plaintext() {
        let codec = codec();
        let stored = codec.encrypt(&json!({"password": "hunter2"})).unwrap();
        let raw = stored.to_string();
        assert!(raw.contains("\"encrypted\""));
        assert!(!raw.contains("hunter2"));
        assert!(stored.get("password").is_none());
    }

    #[test]
    fn wrong_key_fails_authentication() {
        let codec_a = codec();
        let codec_b = EncryptedJsonCodec::new(&BASE64.encode([43u8; 32])).unwrap();
        let stored = codec_a.encrypt(&json!({"x": 1})).unwrap();
        assert!(codec_b.decrypt(&stored).is_err());
    }

    #[test]
    fn malformed_envelope_is_rejected() {
        let codec = codec();
        assert!(codec.decrypt(&json!({"other": "field"})).is_err());
        assert!(codec.decrypt(&json!({"encrypted": "not-base64!!"})).is_err());
        assert!(codec.decrypt(&json!({"encrypted": ""})).is_err());
    }

    #[test]
    fn short_keys_are_rejected() {
        assert!(EncryptedJsonCodec::new(&BASE64.encode([1u8; 16])).is_err());
        assert!(EncryptedJsonCodec::new("definitely not base64 §§").is_err());
    }
}
