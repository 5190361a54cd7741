//! Random opaque tokens.
//!
//! All randomness comes from the OS CSPRNG. Uniqueness is statistical only;
//! nothing is checked against a store.

use chrono::Utc;
use rand::{rngs::OsRng, Rng, RngCore};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

pub const DEFAULT_TOKEN_BYTES: usize = 32;
pub const HEALTH_TOKEN_BYTES: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenKind {
    /// Generic security token, 64 hex characters.
    Session,
    /// Health-data access token, 128 hex characters.
    HealthAccess,
}

impl TokenKind {
    pub fn byte_len(self) -> usize {
        match self {
            TokenKind::Session => DEFAULT_TOKEN_BYTES,
            TokenKind::HealthAccess => HEALTH_TOKEN_BYTES,
        }
    }
}

/// `byte_len` random bytes as lowercase hex (`2 * byte_len` characters).
pub fn generate(byte_len: usize) -> String {
    let mut bytes = vec![0u8; byte_len];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

pub fn security_token(kind: TokenKind) -> String {
    generate(kind.byte_len())
}

/// Six-digit one-time code for step-up health access.
pub fn health_otp() -> String {
    OsRng.gen_range(100_000u32..999_999).to_string()
}

/// Opaque session identifier bound to a user and the session type.
pub fn secure_session_id(user_id: &str, health_session: bool) -> String {
    let user_hash = hex::encode(Sha256::digest(user_id.as_bytes()));
    let session_data = format!(
        "{}:{}:{}:{}",
        user_hash,
        Utc::now().timestamp_millis(),
        generate(DEFAULT_TOKEN_BYTES),
        if health_session { "health" } else { "standard" }
    );
    hex::encode(Sha256::digest(session_data.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn length_is_twice_byte_count() {
        for n in [0, 1, 16, 32, 64, 100] {
            let token = generate(n);
            assert_eq!(token.len(), 2 * n);
            assert!(token.chars().all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c)));
        }
        assert_eq!(security_token(TokenKind::Session).len(), 64);
        assert_eq!(security_token(TokenKind::HealthAccess).len(), 128);
    }

    #[test]
    fn ten_thousand_tokens_are_unique() {
        let tokens: HashSet<String> = (0..10_000).map(|_| generate(DEFAULT_TOKEN_BYTES)).collect();
        assert_eq!(tokens.len(), 10_000);
    }

    #[test]
    fn otp_is_six_digits() {
        for _ in 0..1_000 {
            let code: u32 = health_otp().parse().unwrap();
            assert!((100_000..999_999).contains(&code));
        }
    }

    #[test]
    fn session_ids_are_distinct_digests() {
        let a = secure_session_id("user-1", true);
        let b = secure_session_id("user-1", true);
        assert_eq!(a.len(), 64);
        assert_ne!(a, b);
    }
}
