//! Timestamp-bound content hashes.
//!
//! hash = hex SHA-256( canonical(content) || timestamp || secret )
//!
//! The producer picks the timestamp and ships it with the hash. Verifiers
//! re-hash with exactly that value and never substitute their own clock.

use std::fmt::Display;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use subtle::{Choice, ConstantTimeEq};

use crate::canonical::canonical_text;
use crate::error::Result;
use crate::secret::{HealthData, Integrity, SecretMaterial};

pub const DIGEST_LEN: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntegrityRecord {
    pub content_hash: String,
    pub timestamp: String,
}

pub struct IntegrityVerifier {
    secret: SecretMaterial<Integrity>,
}

impl IntegrityVerifier {
    pub fn new(secret: SecretMaterial<Integrity>) -> Self {
        Self { secret }
    }

    fn digest(&self, content: &[u8], timestamp: &dyn Display) -> [u8; DIGEST_LEN] {
        let mut hasher = Sha256::new();
        hasher.update(content);
        hasher.update(timestamp.to_string().as_bytes());
        hasher.update(self.secret.expose());
        hasher.finalize().into()
    }

    pub fn hash(&self, content: &[u8], timestamp: impl Display) -> String {
        hex::encode(self.digest(content, &timestamp))
    }

    pub fn hash_json<T: Serialize + ?Sized>(&self, content: &T, timestamp: impl Display) -> Result<String> {
        let text = canonical_text(content)?;
        Ok(self.hash(text.as_bytes(), timestamp))
    }

    /// Hash stamped with the current wall-clock time in milliseconds.
    pub fn create_hash(&self, content: &[u8]) -> IntegrityRecord {
        let timestamp = Utc::now().timestamp_millis().to_string();
        IntegrityRecord {
            content_hash: self.hash(content, &timestamp),
            timestamp,
        }
    }

    pub fn create_hash_json<T: Serialize + ?Sized>(&self, content: &T) -> Result<IntegrityRecord> {
        let text = canonical_text(content)?;
        Ok(self.create_hash(text.as_bytes()))
    }

    /// Constant-time check of `expected_hash`. Bad hex or a wrong length is
    /// compared as an all-zero digest and reported as `false`.
    pub fn verify(&self, content: &[u8], timestamp: impl Display, expected_hash: &str) -> bool {
        let computed = self.digest(content, &timestamp);
        let mut provided = [0u8; DIGEST_LEN];
        let well_formed = match hex::decode(expected_hash) {
            Ok(bytes) if bytes.len() == DIGEST_LEN => {
                provided.copy_from_slice(&bytes);
                Choice::from(1)
            }
            _ => Choice::from(0),
        };
        (computed[..].ct_eq(&provided[..]) & well_formed).into()
    }

    pub fn verify_json<T: Serialize + ?Sized>(
        &self,
        content: &T,
        timestamp: impl Display,
        expected_hash: &str,
    ) -> Result<bool> {
        let text = canonical_text(content)?;
        Ok(self.verify(text.as_bytes(), timestamp, expected_hash))
    }

    pub fn verify_record(&self, content: &[u8], record: &IntegrityRecord) -> bool {
        self.verify(content, &record.timestamp, &record.content_hash)
    }
}

/// Stable pseudonymous lookup key: hex SHA-256(identifier || health secret).
pub fn hash_identifier(secret: &SecretMaterial<HealthData>, identifier: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(identifier.as_bytes());
    hasher.update(secret.expose());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::{Duration, Instant};

    fn verifier() -> IntegrityVerifier {
        IntegrityVerifier::new(SecretMaterial::new("integrity-secret").unwrap())
    }

    fn flip_hex_char(hash: &str, pos: usize) -> String {
        let mut bytes = hash.as_bytes().to_vec();
        bytes[pos] = if bytes[pos] == b'0' { b'1' } else { b'0' };
        String::from_utf8(bytes).unwrap()
    }

    #[test]
    fn hash_matches_plain_concatenation() {
        let v = verifier();
        let expected = hex::encode(Sha256::digest(b"content1700000000000integrity-secret"));
        assert_eq!(v.hash(b"content", 1_700_000_000_000u64), expected);
        assert_eq!(v.hash(b"content", "1700000000000"), expected);
    }

    #[test]
    fn verify_accepts_own_hash() {
        let v = verifier();
        let hash = v.hash(b"weight 70kg", "1700000000000");
        assert_eq!(hash.len(), 64);
        assert!(v.verify(b"weight 70kg", "1700000000000", &hash));
    }

    #[test]
    fn any_single_change_is_rejected() {
        let v = verifier();
        let hash = v.hash(b"weight 70kg", "1700000000000");
        assert!(!v.verify(b"weight 71kg", "1700000000000", &hash));
        assert!(!v.verify(b"weight 70kg", "1700000000001", &hash));
        assert!(!v.verify(b"weight 70kg", "1700000000000", &flip_hex_char(&hash, 0)));
        assert!(!v.verify(b"weight 70kg", "1700000000000", &flip_hex_char(&hash, 63)));
    }

    #[test]
    fn malformed_hash_returns_false() {
        let v = verifier();
        let hash = v.hash(b"x", 1);
        assert!(!v.verify(b"x", 1, ""));
        assert!(!v.verify(b"x", 1, &hash[..62]));
        assert!(!v.verify(b"x", 1, &format!("{hash}00")));
        assert!(!v.verify(b"x", 1, "not hex at all"));
        assert!(!v.verify(b"x", 1, &"0".repeat(64)));
    }

    #[test]
    fn created_records_verify_with_carried_timestamp() {
        let v = verifier();
        let profile = json!({"bloodPressure": "120/80"});
        let record = v.create_hash_json(&profile).unwrap();
        assert!(record.timestamp.parse::<i64>().is_ok());
        assert!(v
            .verify_json(&profile, &record.timestamp, &record.content_hash)
            .unwrap());
        let text = canonical_text(&profile).unwrap();
        assert!(v.verify_record(text.as_bytes(), &record));
    }

    #[test]
    fn different_secret_does_not_verify() {
        let hash = verifier().hash(b"c", 5);
        let other = IntegrityVerifier::new(SecretMaterial::new("other").unwrap());
        assert!(!other.verify(b"c", 5, &hash));
    }

    #[test]
    fn identifier_hash_is_stable_and_keyed() {
        let a = SecretMaterial::<HealthData>::new("health").unwrap();
        let b = SecretMaterial::<HealthData>::new("health-2").unwrap();
        assert_eq!(hash_identifier(&a, "patient-7"), hash_identifier(&a, "patient-7"));
        assert_ne!(hash_identifier(&a, "patient-7"), hash_identifier(&b, "patient-7"));
    }

    fn fastest_of(rounds: usize, mut f: impl FnMut()) -> Duration {
        (0..rounds)
            .map(|_| {
                let start = Instant::now();
                for _ in 0..200 {
                    f();
                }
                start.elapsed()
            })
            .min()
            .unwrap_or_default()
    }

    #[test]
    fn mismatch_position_does_not_change_timing() {
        let v = verifier();
        let hash = v.hash(b"timing", 9);
        let early = flip_hex_char(&hash, 0);
        let late = flip_hex_char(&hash, 63);

        let t_early = fastest_of(25, || assert!(!v.verify(b"timing", 9, &early)));
        let t_late = fastest_of(25, || assert!(!v.verify(b"timing", 9, &late)));

        let ratio = t_early.as_secs_f64() / t_late.as_secs_f64().max(f64::EPSILON);
        assert!((0.5..2.0).contains(&ratio), "timing ratio {ratio}");
    }
}
