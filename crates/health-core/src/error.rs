use thiserror::Error;

#[derive(Debug, Error)]
pub enum CryptoError {
    /// Missing or unusable secret material. Fatal at startup.
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Malformed record: {0}")]
    MalformedRecord(&'static str),

    /// Wrong key, corrupt ciphertext or failed authentication. Deliberately opaque.
    #[error("Could not process health data")]
    Decryption,

    #[error("Could not encrypt health data")]
    Encryption,

    #[error("Serialisation error: {0}")]
    Serialisation(#[from] serde_json::Error),

    #[error("Signature rejected: {0}")]
    InvalidSignature(#[from] crate::service_auth::SignatureRejection),
}

pub type Result<T> = std::result::Result<T, CryptoError>;
