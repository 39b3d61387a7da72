//! Bearer-token claims extraction and revocation checking.
//!
//! Verification enforces both `exp` and a maximum issue age: tokens older
//! than `max_token_age_seconds` are rejected regardless of their expiry.
//! The revocation check is fail-closed: any error consulting the
//! revocation list treats the token as revoked.

use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::warn;
use uuid::Uuid;

use opennotes_domain::error::{Error, Result};
use opennotes_domain::ports::CacheProvider;

/// Claims carried by an access token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenClaims {
    /// User id.
    pub sub: Uuid,
    pub username: String,
    #[serde(default)]
    pub role: Option<String>,
    /// Token id, used for revocation.
    pub jti: String,
    /// Issued-at, Unix seconds.
    pub iat: i64,
    /// Expiry, Unix seconds.
    pub exp: i64,
}

/// Verifier bound to the configured secret and algorithm.
pub struct JwtVerifier {
    decoding_key: DecodingKey,
    validation: Validation,
    max_token_age_seconds: i64,
    revocations: Arc<dyn CacheProvider>,
}

impl JwtVerifier {
    /// # Errors
    ///
    /// `Error::Config` for unsupported algorithms.
    pub fn new(
        secret: &str,
        algorithm: &str,
        max_token_age_seconds: u64,
        revocations: Arc<dyn CacheProvider>,
    ) -> Result<Self> {
        let algorithm = match algorithm {
            "HS256" => Algorithm::HS256,
            "HS384" => Algorithm::HS384,
            "HS512" => Algorithm::HS512,
            other => {
                return Err(Error::config(format!("Unsupported JWT algorithm: {other}")));
            }
        };
        Ok(Self {
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            validation: Validation::new(algorithm),
            max_token_age_seconds: max_token_age_seconds.min(i64::MAX as u64) as i64,
            revocations,
        })
    }

    /// Verify signature, expiry, issue age, and revocation.
    pub async fn verify(&self, token: &str) -> Result<TokenClaims> {
        let data = decode::<TokenClaims>(token, &self.decoding_key, &self.validation)
            .map_err(|e| Error::crypto(format!("Token verification failed: {e}")))?;
        let claims = data.claims;

        let now = chrono::Utc::now().timestamp();
        if now - claims.iat > self.max_token_age_seconds {
            return Err(Error::crypto("Token exceeds maximum age"));
        }

        // Fail-closed: any error consulting the list counts as revoked.
        let revocation_key = format!("auth:revoked:{}", claims.jti);
        match self.revocations.exists(&revocation_key).await {
            Ok(false) => Ok(claims),
            Ok(true) => Err(Error::crypto("Token has been revoked")),
            Err(e) => {
                warn!(error = %e, "Revocation check failed, treating token as revoked");
                Err(Error::crypto("Token revocation status unavailable"))
            }
        }
    }
}
