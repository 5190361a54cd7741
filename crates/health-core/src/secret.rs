//! Purpose-tagged secret material and the legacy key derivation.
//!
//! Each process holds several independent secrets (health records, generic
//! strings, integrity hashes, service signing). They are distinct types so a
//! health-record cipher can never be built from the generic secret by mistake.

use std::fmt;
use std::marker::PhantomData;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

use crate::error::{CryptoError, Result};

pub const DERIVED_KEY_LEN: usize = 32;

/// Marker for what a secret is allowed to protect.
pub trait Purpose: Send + Sync + 'static {
    const LABEL: &'static str;
}

/// Health-record encryption (`HEALTH_DATA_ENCRYPTION_KEY`).
pub struct HealthData;
/// Generic string encryption (`CRYPTO_SECRET`).
pub struct GeneralData;
/// Integrity hashes over health content.
pub struct Integrity;
/// HMAC keys shared between internal services.
pub struct ServiceOrigin;

impl Purpose for HealthData {
    const LABEL: &'static str = "health-data";
}
impl Purpose for GeneralData {
    const LABEL: &'static str = "general-data";
}
impl Purpose for Integrity {
    const LABEL: &'static str = "integrity";
}
impl Purpose for ServiceOrigin {
    const LABEL: &'static str = "service-origin";
}

/// Raw secret bytes. Zeroized on drop, redacted in `Debug`, never serialized.
pub struct SecretMaterial<P: Purpose> {
    bytes: Zeroizing<Vec<u8>>,
    _purpose: PhantomData<fn() -> P>,
}

impl<P: Purpose> SecretMaterial<P> {
    /// Wraps `bytes`, refusing empty input rather than producing a weak key.
    pub fn new(bytes: impl Into<Vec<u8>>) -> Result<Self> {
        let bytes = Zeroizing::new(bytes.into());
        if bytes.is_empty() {
            return Err(CryptoError::Configuration(format!(
                "{} secret is empty",
                P::LABEL
            )));
        }
        Ok(Self {
            bytes,
            _purpose: PhantomData,
        })
    }

    pub(crate) fn expose(&self) -> &[u8] {
        &self.bytes
    }

    /// Legacy 32-byte key for this secret. Infallible since the secret is non-empty.
    pub fn legacy_key(&self) -> Zeroizing<[u8; DERIVED_KEY_LEN]> {
        legacy_key_bytes(&self.bytes)
    }

    /// Re-tag a copy of this secret for another purpose. Only used where a
    /// deployment has historically shared one secret between two concerns.
    pub(crate) fn share_as<Q: Purpose>(&self) -> SecretMaterial<Q> {
        SecretMaterial {
            bytes: self.bytes.clone(),
            _purpose: PhantomData,
        }
    }
}

impl<P: Purpose> fmt::Debug for SecretMaterial<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SecretMaterial<{}>([REDACTED])", P::LABEL)
    }
}

/// Derive the 32-byte AES key from a raw secret.
///
/// The key is the first 32 characters of the base64 (standard alphabet) text of
/// SHA-256(secret), taken as ASCII bytes. This is weaker than a real KDF: the
/// key space is 6 bits per byte. It is kept only so existing records decrypt.
pub fn derive_key(secret: &[u8]) -> Result<Zeroizing<[u8; DERIVED_KEY_LEN]>> {
    if secret.is_empty() {
        return Err(CryptoError::Configuration("secret is empty".into()));
    }
    Ok(legacy_key_bytes(secret))
}

fn legacy_key_bytes(secret: &[u8]) -> Zeroizing<[u8; DERIVED_KEY_LEN]> {
    let digest = Sha256::digest(secret);
    // 32 digest bytes encode to 44 base64 characters.
    let encoded = Zeroizing::new(BASE64.encode(digest));
    let mut key = Zeroizing::new([0u8; DERIVED_KEY_LEN]);
    key.copy_from_slice(&encoded.as_bytes()[..DERIVED_KEY_LEN]);
    key
}
