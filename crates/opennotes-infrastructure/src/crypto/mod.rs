//! Cryptographic building blocks: webhook signatures, platform webhook
//! verification, the encrypted JSON column codec, and bearer-token claims.

mod encrypted_json;
mod jwt;
mod platform_verify;
mod webhook_signature;

pub use encrypted_json::EncryptedJsonCodec;
pub use jwt::{JwtVerifier, TokenClaims};
pub use platform_verify::verify_platform_signature;
pub use webhook_signature::{WebhookSignature, generate_webhook_signature, verify_webhook_signature};
