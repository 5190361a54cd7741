//! health-core — protection of personal-health records at rest
//!
//! # Design principles
//! - NO custom crypto; all primitives come from audited Rust crates.
//! - Secret material is purpose-tagged, zeroized on drop and never logged.
//! - Legacy wire formats are reproduced byte-for-byte; new data should be sealed.
//!
//! # Module layout
//! - `secret`        — purpose-tagged secret material + legacy key derivation
//! - `canonical`     — text form of structured values before hashing/encryption
//! - `cipher`        — AES-256-CBC record cipher (`<iv>:<ciphertext>` wire format)
//! - `sealed`        — XChaCha20-Poly1305 record format (`v2:<nonce>:<ciphertext>`)
//! - `integrity`     — timestamp-bound content hashes, constant-time verification
//! - `tokens`        — random opaque tokens, OTPs, session identifiers
//! - `service_auth`  — HMAC request signatures between internal services
//! - `config`        — loading secret material from the environment
//! - `error`         — unified error type

pub mod canonical;
pub mod cipher;
pub mod config;
pub mod error;
pub mod integrity;
pub mod sealed;
pub mod secret;
pub mod service_auth;
pub mod tokens;

pub use cipher::{EncryptedRecord, RecordCipher};
pub use config::SecurityConfig;
pub use error::{CryptoError, Result};
pub use integrity::{IntegrityRecord, IntegrityVerifier};
pub use secret::{GeneralData, HealthData, Integrity, SecretMaterial, ServiceOrigin};
pub use tokens::TokenKind;
