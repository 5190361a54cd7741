//! Secret material loaded once at startup.
//!
//! Environment variables:
//!   HEALTH_DATA_ENCRYPTION_KEY   required, health-record cipher and identifier hashing
//!   CRYPTO_SECRET                required, generic string cipher
//!   HEALTH_INTEGRITY_KEY         optional, integrity hashes (defaults to the health secret)
//!   HMAC_USER_KEY                optional, signs requests from the user service
//!   HMAC_AGENT_KEY               optional, signs requests from the agent service

use tracing::{info, warn};

use crate::cipher::{HealthCipher, RecordCipher, StringCipher};
use crate::error::{CryptoError, Result};
use crate::integrity::IntegrityVerifier;
use crate::sealed::SealedCipher;
use crate::secret::{GeneralData, HealthData, Integrity, Purpose, SecretMaterial, ServiceOrigin};
use crate::service_auth::RequestSigner;

pub const ENV_HEALTH_DATA_KEY: &str = "HEALTH_DATA_ENCRYPTION_KEY";
pub const ENV_CRYPTO_SECRET: &str = "CRYPTO_SECRET";
pub const ENV_INTEGRITY_KEY: &str = "HEALTH_INTEGRITY_KEY";
pub const ENV_HMAC_USER_KEY: &str = "HMAC_USER_KEY";
pub const ENV_HMAC_AGENT_KEY: &str = "HMAC_AGENT_KEY";

#[derive(Debug)]
pub struct SecurityConfig {
    health_data: SecretMaterial<HealthData>,
    general_data: SecretMaterial<GeneralData>,
    integrity: SecretMaterial<Integrity>,
    user_hmac: Option<SecretMaterial<ServiceOrigin>>,
    agent_hmac: Option<SecretMaterial<ServiceOrigin>>,
}

impl SecurityConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load from any key/value source. Missing or empty required secrets are
    /// a `Configuration` error; callers must abort startup on it.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let present = |name: &str| lookup(name).filter(|v| !v.is_empty());

        let (health, general) = match (present(ENV_HEALTH_DATA_KEY), present(ENV_CRYPTO_SECRET)) {
            (Some(health), Some(general)) => (health, general),
            (health, general) => {
                let missing: Vec<&str> = [
                    (ENV_HEALTH_DATA_KEY, health.is_none()),
                    (ENV_CRYPTO_SECRET, general.is_none()),
                ]
                .into_iter()
                .filter(|(_, absent)| *absent)
                .map(|(name, _)| name)
                .collect();
                warn!("[config] missing required secrets: {:?}", missing);
                return Err(CryptoError::Configuration(format!(
                    "missing required configuration: {}",
                    missing.join(", ")
                )));
            }
        };
        let health_data = SecretMaterial::<HealthData>::new(health)?;
        let general_data = SecretMaterial::<GeneralData>::new(general)?;

        let integrity = match present(ENV_INTEGRITY_KEY) {
            Some(secret) => SecretMaterial::new(secret)?,
            None => {
                warn!(
                    "[config] {} not set; integrity hashes share the health-record secret",
                    ENV_INTEGRITY_KEY
                );
                health_data.share_as::<Integrity>()
            }
        };

        let user_hmac = optional(present(ENV_HMAC_USER_KEY))?;
        let agent_hmac = optional(present(ENV_HMAC_AGENT_KEY))?;
        if user_hmac.is_none() || agent_hmac.is_none() {
            warn!("[config] service signing keys incomplete; unsigned origins will be rejected");
        }

        info!("[config] secret material loaded");
        Ok(Self {
            health_data,
            general_data,
            integrity,
            user_hmac,
            agent_hmac,
        })
    }

    pub fn health_secret(&self) -> &SecretMaterial<HealthData> {
        &self.health_data
    }

    pub fn health_cipher(&self) -> HealthCipher {
        RecordCipher::new(&self.health_data)
    }

    pub fn string_cipher(&self) -> StringCipher {
        RecordCipher::new(&self.general_data)
    }

    pub fn sealed_health_cipher(&self) -> Result<SealedCipher<HealthData>> {
        SealedCipher::new(&self.health_data)
    }

    pub fn sealed_string_cipher(&self) -> Result<SealedCipher<GeneralData>> {
        SealedCipher::new(&self.general_data)
    }

    pub fn integrity_verifier(&self) -> IntegrityVerifier {
        IntegrityVerifier::new(self.integrity.share_as())
    }

    pub fn request_signer(&self) -> RequestSigner {
        RequestSigner::new(
            self.user_hmac.as_ref().map(|key| key.share_as()),
            self.agent_hmac.as_ref().map(|key| key.share_as()),
        )
    }
}

fn optional<P: Purpose>(value: Option<String>) -> Result<Option<SecretMaterial<P>>> {
    value.map(SecretMaterial::new).transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn missing_required_secret_is_fatal() {
        let err = SecurityConfig::from_lookup(lookup(&[(ENV_CRYPTO_SECRET, "c")])).unwrap_err();
        match err {
            CryptoError::Configuration(msg) => assert!(msg.contains(ENV_HEALTH_DATA_KEY)),
            other => panic!("unexpected: {other}"),
        }
    }

    #[test]
    fn empty_secret_counts_as_missing() {
        let err = SecurityConfig::from_lookup(lookup(&[
            (ENV_HEALTH_DATA_KEY, ""),
            (ENV_CRYPTO_SECRET, ""),
        ]))
        .unwrap_err();
        match err {
            CryptoError::Configuration(msg) => {
                assert!(msg.contains(ENV_HEALTH_DATA_KEY));
                assert!(msg.contains(ENV_CRYPTO_SECRET));
            }
            other => panic!("unexpected: {other}"),
        }
    }

    #[test]
    fn health_and_string_ciphers_are_independent() {
        let config = SecurityConfig::from_lookup(lookup(&[
            (ENV_HEALTH_DATA_KEY, "health"),
            (ENV_CRYPTO_SECRET, "general"),
        ]))
        .unwrap();
        let wire = config.health_cipher().encrypt(b"record").unwrap().to_wire();
        assert_eq!(&config.health_cipher().decrypt_wire(&wire).unwrap()[..], b"record");
        match config.string_cipher().decrypt_wire(&wire) {
            Ok(bytes) => assert_ne!(&bytes[..], b"record"),
            Err(e) => assert!(matches!(e, CryptoError::Decryption)),
        }
    }

    #[test]
    fn integrity_defaults_to_health_secret() {
        let shared = SecurityConfig::from_lookup(lookup(&[
            (ENV_HEALTH_DATA_KEY, "health"),
            (ENV_CRYPTO_SECRET, "general"),
        ]))
        .unwrap();
        let dedicated = SecurityConfig::from_lookup(lookup(&[
            (ENV_HEALTH_DATA_KEY, "health"),
            (ENV_CRYPTO_SECRET, "general"),
            (ENV_INTEGRITY_KEY, "integrity"),
        ]))
        .unwrap();
        let expected = hex::encode(<sha2::Sha256 as sha2::Digest>::digest(b"c1health"));
        assert_eq!(shared.integrity_verifier().hash(b"c", 1), expected);
        assert_ne!(dedicated.integrity_verifier().hash(b"c", 1), expected);
    }

    #[test]
    fn signer_only_has_configured_origins() {
        use crate::service_auth::{Origin, ValidateMode};
        let config = SecurityConfig::from_lookup(lookup(&[
            (ENV_HEALTH_DATA_KEY, "health"),
            (ENV_CRYPTO_SECRET, "general"),
            (ENV_HMAC_USER_KEY, "user-key"),
        ]))
        .unwrap();
        let signer = config.request_signer();
        assert!(signer.sign(Origin::User, ValidateMode::Body, None, None, 1).is_ok());
        assert!(signer.sign(Origin::Agent, ValidateMode::Body, None, None, 1).is_err());
    }
}
