//! AES-256-CBC record cipher
//!
//! Key: legacy derivation from the purpose's secret (see `secret::derive_key`).
//! IV: 16 random bytes, fresh per call.  Padding: PKCS#7.
//!
//! Wire format (UTF-8):
//!   <32 hex chars IV> ":" <hex ciphertext>
//!
//! CBC carries no authentication tag, so a flipped IV bit flips the first
//! plaintext block undetected. Use `sealed` for new data.

use std::fmt;
use std::marker::PhantomData;
use std::str::FromStr;

use aes::Aes256;
use cbc::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use rand::{rngs::OsRng, RngCore};
use serde::{de::DeserializeOwned, Serialize};
use tracing::warn;
use zeroize::Zeroizing;

use crate::canonical::canonical_text;
use crate::error::{CryptoError, Result};
use crate::secret::{GeneralData, HealthData, Purpose, SecretMaterial, DERIVED_KEY_LEN};

type Aes256CbcEnc = cbc::Encryptor<Aes256>;
type Aes256CbcDec = cbc::Decryptor<Aes256>;

pub const IV_LEN: usize = 16;
const BLOCK_LEN: usize = 16;
pub const SEPARATOR: char = ':';

/// An IV and the ciphertext it was used for. Immutable once built.
#[derive(Clone, PartialEq, Eq)]
pub struct EncryptedRecord {
    iv: [u8; IV_LEN],
    ciphertext: Vec<u8>,
}

impl EncryptedRecord {
    pub fn iv(&self) -> &[u8; IV_LEN] {
        &self.iv
    }

    pub fn ciphertext(&self) -> &[u8] {
        &self.ciphertext
    }

    /// Parse the wire format, splitting on the first `:`.
    pub fn parse(wire: &str) -> Result<Self> {
        let (iv_hex, ct_hex) = wire
            .split_once(SEPARATOR)
            .ok_or(CryptoError::MalformedRecord("missing separator"))?;
        if iv_hex.is_empty() {
            return Err(CryptoError::MalformedRecord("missing iv"));
        }
        if ct_hex.is_empty() {
            return Err(CryptoError::MalformedRecord("missing ciphertext"));
        }
        let iv: [u8; IV_LEN] = hex::decode(iv_hex)
            .map_err(|_| CryptoError::MalformedRecord("iv is not hex"))?
            .try_into()
            .map_err(|_| CryptoError::MalformedRecord("iv has wrong length"))?;
        let ciphertext =
            hex::decode(ct_hex).map_err(|_| CryptoError::MalformedRecord("ciphertext is not hex"))?;
        Ok(Self { iv, ciphertext })
    }

    pub fn to_wire(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for EncryptedRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{}{}",
            hex::encode(self.iv),
            SEPARATOR,
            hex::encode(&self.ciphertext)
        )
    }
}

impl fmt::Debug for EncryptedRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncryptedRecord")
            .field("iv", &hex::encode(self.iv))
            .field("ciphertext_len", &self.ciphertext.len())
            .finish()
    }
}

impl FromStr for EncryptedRecord {
    type Err = CryptoError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// Symmetric cipher bound to one secret purpose.
pub struct RecordCipher<P: Purpose> {
    key: Zeroizing<[u8; DERIVED_KEY_LEN]>,
    _purpose: PhantomData<fn() -> P>,
}

pub type HealthCipher = RecordCipher<HealthData>;
pub type StringCipher = RecordCipher<GeneralData>;

impl<P: Purpose> RecordCipher<P> {
    /// The derived key is computed once here and reused for every call.
    pub fn new(secret: &SecretMaterial<P>) -> Self {
        Self {
            key: secret.legacy_key(),
            _purpose: PhantomData,
        }
    }

    pub fn encrypt(&self, plaintext: &[u8]) -> Result<EncryptedRecord> {
        let mut iv = [0u8; IV_LEN];
        OsRng.fill_bytes(&mut iv);
        let cipher = Aes256CbcEnc::new_from_slices(&self.key[..], &iv)
            .map_err(|_| CryptoError::Encryption)?;
        let ciphertext = cipher.encrypt_padded_vec_mut::<Pkcs7>(plaintext);
        Ok(EncryptedRecord { iv, ciphertext })
    }

    pub fn encrypt_str(&self, plaintext: &str) -> Result<EncryptedRecord> {
        self.encrypt(plaintext.as_bytes())
    }

    pub fn decrypt(&self, record: &EncryptedRecord) -> Result<Zeroizing<Vec<u8>>> {
        if record.ciphertext.is_empty() || record.ciphertext.len() % BLOCK_LEN != 0 {
            warn!("[crypto] {} record decryption failed", P::LABEL);
            return Err(CryptoError::Decryption);
        }
        let cipher = Aes256CbcDec::new_from_slices(&self.key[..], &record.iv)
            .map_err(|_| CryptoError::Decryption)?;
        let plaintext = cipher
            .decrypt_padded_vec_mut::<Pkcs7>(&record.ciphertext)
            .map_err(|_| {
                warn!("[crypto] {} record decryption failed", P::LABEL);
                CryptoError::Decryption
            })?;
        Ok(Zeroizing::new(plaintext))
    }

    /// Parse and decrypt a wire-format record.
    pub fn decrypt_wire(&self, wire: &str) -> Result<Zeroizing<Vec<u8>>> {
        let record = EncryptedRecord::parse(wire).map_err(|e| {
            warn!("[crypto] {} record rejected: {}", P::LABEL, e);
            e
        })?;
        self.decrypt(&record)
    }

    /// Decrypt a wire-format record holding UTF-8 text.
    pub fn decrypt_string(&self, wire: &str) -> Result<Zeroizing<String>> {
        let bytes = self.decrypt_wire(wire)?;
        let text = std::str::from_utf8(&bytes).map_err(|_| CryptoError::Decryption)?;
        Ok(Zeroizing::new(text.to_owned()))
    }
}

impl RecordCipher<HealthData> {
    /// Encrypt a structured value. Strings are encrypted as their raw text,
    /// anything else as compact JSON.
    pub fn encrypt_json<T: Serialize + ?Sized>(&self, value: &T) -> Result<EncryptedRecord> {
        let text = canonical_text(value)?;
        self.encrypt(text.as_bytes())
    }

    /// Decrypt a record produced by `encrypt_json`.
    pub fn decrypt_json<T: DeserializeOwned>(&self, wire: &str) -> Result<T> {
        let bytes = self.decrypt_wire(wire)?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

impl RecordCipher<GeneralData> {
    /// Encrypt any value by its textual form.
    pub fn encrypt_display<T: fmt::Display + ?Sized>(&self, value: &T) -> Result<EncryptedRecord> {
        let text = Zeroizing::new(value.to_string());
        self.encrypt(text.as_bytes())
    }
}
