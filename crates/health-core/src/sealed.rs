//! Authenticated record format for new data
//!
//! XChaCha20-Poly1305, 192-bit random nonce, 16-byte tag.
//! Key: HKDF-SHA256 over the purpose's secret, domain-separated per purpose.
//!
//! Wire format (UTF-8):
//!   "v2:" <48 hex chars nonce> ":" <hex ciphertext + tag>

use std::marker::PhantomData;

use chacha20poly1305::{
    aead::{Aead, AeadCore, KeyInit, OsRng},
    XChaCha20Poly1305, XNonce,
};
use hkdf::Hkdf;
use sha2::Sha256;
use tracing::warn;
use zeroize::Zeroizing;

use crate::cipher::RecordCipher;
use crate::error::{CryptoError, Result};
use crate::secret::{Purpose, SecretMaterial};

pub const SEALED_PREFIX: &str = "v2:";
const NONCE_LEN: usize = 24;
const TAG_LEN: usize = 16;

pub struct SealedCipher<P: Purpose> {
    key: Zeroizing<[u8; 32]>,
    _purpose: PhantomData<fn() -> P>,
}

impl<P: Purpose> SealedCipher<P> {
    pub fn new(secret: &SecretMaterial<P>) -> Result<Self> {
        let mut key = Zeroizing::new([0u8; 32]);
        let info = format!("health-record-v2:{}", P::LABEL);
        Hkdf::<Sha256>::new(None, secret.expose())
            .expand(info.as_bytes(), &mut key[..])
            .map_err(|e| CryptoError::Configuration(format!("hkdf expand: {e}")))?;
        Ok(Self {
            key,
            _purpose: PhantomData,
        })
    }

    pub fn seal(&self, plaintext: &[u8]) -> Result<String> {
        let cipher =
            XChaCha20Poly1305::new_from_slice(&self.key[..]).map_err(|_| CryptoError::Encryption)?;
        let nonce = XChaCha20Poly1305::generate_nonce(&mut OsRng);
        let ciphertext = cipher
            .encrypt(&nonce, plaintext)
            .map_err(|_| CryptoError::Encryption)?;
        Ok(format!(
            "{SEALED_PREFIX}{}:{}",
            hex::encode(nonce),
            hex::encode(ciphertext)
        ))
    }

    pub fn open(&self, wire: &str) -> Result<Zeroizing<Vec<u8>>> {
        let body = wire
            .strip_prefix(SEALED_PREFIX)
            .ok_or(CryptoError::MalformedRecord("missing v2 prefix"))?;
        let (nonce_hex, ct_hex) = body
            .split_once(':')
            .ok_or(CryptoError::MalformedRecord("missing separator"))?;
        let nonce = hex::decode(nonce_hex)
            .map_err(|_| CryptoError::MalformedRecord("nonce is not hex"))?;
        if nonce.len() != NONCE_LEN {
            return Err(CryptoError::MalformedRecord("nonce has wrong length"));
        }
        let ciphertext =
            hex::decode(ct_hex).map_err(|_| CryptoError::MalformedRecord("ciphertext is not hex"))?;
        if ciphertext.len() < TAG_LEN {
            return Err(CryptoError::MalformedRecord("ciphertext shorter than tag"));
        }

        let cipher =
            XChaCha20Poly1305::new_from_slice(&self.key[..]).map_err(|_| CryptoError::Decryption)?;
        let plaintext = cipher
            .decrypt(XNonce::from_slice(&nonce), ciphertext.as_slice())
            .map_err(|_| {
                warn!("[crypto] {} sealed record failed authentication", P::LABEL);
                CryptoError::Decryption
            })?;
        Ok(Zeroizing::new(plaintext))
    }
}

/// Decrypt either format, dispatching on the `v2:` prefix. A legacy IV is
/// 32 hex characters, so it can never start with the prefix.
pub fn decrypt_any<P: Purpose>(
    legacy: &RecordCipher<P>,
    sealed: &SealedCipher<P>,
    wire: &str,
) -> Result<Zeroizing<Vec<u8>>> {
    if wire.starts_with(SEALED_PREFIX) {
        sealed.open(wire)
    } else {
        legacy.decrypt_wire(wire)
    }
}
