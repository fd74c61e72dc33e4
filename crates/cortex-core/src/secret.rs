//! Secret Generation and Hashing
//!
//! API keys and session tokens are random bearer secrets. Only their SHA-256
//! digest is persisted; lookups go through a short display prefix (API keys)
//! or the digest itself (sessions), then verify in constant time.

use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use uuid::Uuid;

/// Prefix of every API key secret
pub const API_KEY_PREFIX: &str = "oc_";

/// Prefix of every session token
pub const SESSION_TOKEN_PREFIX: &str = "sess_";

/// Number of leading secret characters kept for display and lookup
pub const KEY_PREFIX_LEN: usize = 10;

/// A freshly generated secret. `secret` must be shown once and then dropped.
#[derive(Clone, Debug)]
pub struct GeneratedSecret {
    pub secret: String,
    pub prefix: String,
    pub hash: String,
}

fn generate(prefix: &str) -> GeneratedSecret {
    let secret = format!("{prefix}{}", Uuid::new_v4().simple());
    GeneratedSecret {
        prefix: display_prefix(&secret),
        hash: hash_secret(&secret),
        secret,
    }
}

/// Generate an API key: `oc_` followed by 32 hex characters
pub fn generate_api_key() -> GeneratedSecret {
    generate(API_KEY_PREFIX)
}

/// Generate a session token: `sess_` followed by 32 hex characters
pub fn generate_session_token() -> GeneratedSecret {
    generate(SESSION_TOKEN_PREFIX)
}

/// First `KEY_PREFIX_LEN` characters of a secret
pub fn display_prefix(secret: &str) -> String {
    secret.chars().take(KEY_PREFIX_LEN).collect()
}

/// Hex SHA-256 digest of a secret
pub fn hash_secret(secret: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(secret.as_bytes());
    hex::encode(hasher.finalize())
}

/// Check a presented secret against a stored digest in constant time
pub fn verify_secret(secret: &str, expected_hash: &str) -> bool {
    constant_time_eq(hash_secret(secret).as_bytes(), expected_hash.as_bytes())
}

/// Byte comparison whose running time does not depend on where inputs differ
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.ct_eq(b).into()
}
