//! HMAC request signatures between internal services.
//!
//! Headers carried on every signed request:
//!   wellness-signature    hex HMAC-SHA256(origin key, validator)
//!   wellness-origin       "user" | "agent"
//!   wellness-validate     "body" | "query" | "both"
//!   wellness-timestamp    milliseconds since the Unix epoch
//!   wellness-health-data  "true" | "false"
//!
//! validator = compact JSON of the signed parts (query before body), then the
//! timestamp string. An absent body or query signs as `{}`.

use std::fmt;
use std::str::FromStr;

use chrono::Utc;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::Sha256;
use thiserror::Error;
use tracing::{debug, warn};

use crate::error::Result;
use crate::secret::{SecretMaterial, ServiceOrigin};

type HmacSha256 = Hmac<Sha256>;

pub const HEADER_SIGNATURE: &str = "wellness-signature";
pub const HEADER_ORIGIN: &str = "wellness-origin";
pub const HEADER_VALIDATE: &str = "wellness-validate";
pub const HEADER_TIMESTAMP: &str = "wellness-timestamp";
pub const HEADER_HEALTH_DATA: &str = "wellness-health-data";

/// Largest accepted distance between the signer's clock and ours.
pub const MAX_CLOCK_SKEW_MS: i64 = 5 * 60 * 1000;

const SIGNATURE_LEN: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Origin {
    User,
    Agent,
}

impl Origin {
    pub fn as_str(self) -> &'static str {
        match self {
            Origin::User => "user",
            Origin::Agent => "agent",
        }
    }
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Origin {
    type Err = SignatureRejection;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "user" => Ok(Origin::User),
            "agent" => Ok(Origin::Agent),
            other => Err(SignatureRejection::UnknownOrigin(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValidateMode {
    #[default]
    Body,
    Query,
    Both,
}

impl ValidateMode {
    pub fn as_str(self) -> &'static str {
        match self {
            ValidateMode::Body => "body",
            ValidateMode::Query => "query",
            ValidateMode::Both => "both",
        }
    }

    /// Anything unrecognised signs the body.
    pub fn parse_lenient(s: &str) -> Self {
        match s {
            "query" => ValidateMode::Query,
            "both" => ValidateMode::Both,
            _ => ValidateMode::Body,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SignatureRejection {
    #[error("missing signature headers")]
    MissingHeaders,
    #[error("unknown service origin: {0}")]
    UnknownOrigin(String),
    #[error("no signing key configured for origin {0}")]
    MissingKey(Origin),
    #[error("timestamp is not an integer")]
    InvalidTimestamp,
    #[error("timestamp outside the accepted window")]
    TimestampOutOfWindow,
    #[error("signature format invalid")]
    MalformedSignature,
    #[error("signature mismatch")]
    Mismatch,
}

/// Signature headers as read off an incoming request.
#[derive(Debug, Clone, Default)]
pub struct IncomingSignature {
    pub signature: Option<String>,
    pub origin: Option<String>,
    pub validate: Option<String>,
    pub timestamp: Option<String>,
    pub health_data: Option<String>,
}

impl IncomingSignature {
    /// Build from any case-insensitive header lookup.
    pub fn from_lookup<F>(mut lookup: F) -> Self
    where
        F: FnMut(&str) -> Option<String>,
    {
        Self {
            signature: lookup(HEADER_SIGNATURE),
            origin: lookup(HEADER_ORIGIN),
            validate: lookup(HEADER_VALIDATE),
            timestamp: lookup(HEADER_TIMESTAMP),
            health_data: lookup(HEADER_HEALTH_DATA),
        }
    }
}

/// Headers to attach to an outgoing signed request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedHeaders {
    pub signature: String,
    pub origin: Origin,
    pub validate: ValidateMode,
    pub timestamp: i64,
    pub health_data: bool,
}

impl SignedHeaders {
    pub fn to_pairs(&self) -> Vec<(&'static str, String)> {
        vec![
            (HEADER_SIGNATURE, self.signature.clone()),
            (HEADER_ORIGIN, self.origin.to_string()),
            (HEADER_VALIDATE, self.validate.as_str().to_string()),
            (HEADER_TIMESTAMP, self.timestamp.to_string()),
            (HEADER_HEALTH_DATA, self.health_data.to_string()),
        ]
    }
}

/// Outcome of a successful verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedRequest {
    pub origin: Origin,
    pub timestamp: i64,
    pub health_data: bool,
}

/// Per-origin HMAC keys. Either may be unconfigured.
#[derive(Debug, Default)]
pub struct RequestSigner {
    user_key: Option<SecretMaterial<ServiceOrigin>>,
    agent_key: Option<SecretMaterial<ServiceOrigin>>,
}

impl RequestSigner {
    pub fn new(
        user_key: Option<SecretMaterial<ServiceOrigin>>,
        agent_key: Option<SecretMaterial<ServiceOrigin>>,
    ) -> Self {
        Self {
            user_key,
            agent_key,
        }
    }

    fn key_for(&self, origin: Origin) -> std::result::Result<&SecretMaterial<ServiceOrigin>, SignatureRejection> {
        let key = match origin {
            Origin::User => self.user_key.as_ref(),
            Origin::Agent => self.agent_key.as_ref(),
        };
        key.ok_or(SignatureRejection::MissingKey(origin))
    }

    fn mac(&self, origin: Origin, validator: &[u8]) -> std::result::Result<HmacSha256, SignatureRejection> {
        let key = self.key_for(origin)?;
        let mut mac = HmacSha256::new_from_slice(key.expose())
            .map_err(|_| SignatureRejection::MissingKey(origin))?;
        mac.update(validator);
        Ok(mac)
    }

    /// Hex signature over the chosen request parts and `timestamp`.
    pub fn sign(
        &self,
        origin: Origin,
        mode: ValidateMode,
        query: Option<&Value>,
        body: Option<&Value>,
        timestamp: i64,
    ) -> Result<String> {
        let validator = validator(mode, query, body, &timestamp.to_string())?;
        let mac = self.mac(origin, validator.as_bytes())?;
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    /// Sign an outgoing request stamped with the current time.
    pub fn sign_request(
        &self,
        origin: Origin,
        mode: ValidateMode,
        query: Option<&Value>,
        body: Option<&Value>,
        health_data: bool,
    ) -> Result<SignedHeaders> {
        let timestamp = Utc::now().timestamp_millis();
        let signature = self.sign(origin, mode, query, body, timestamp)?;
        Ok(SignedHeaders {
            signature,
            origin,
            validate: mode,
            timestamp,
            health_data,
        })
    }

    /// Verify an incoming request against the clock reading `now_ms`.
    pub fn verify(
        &self,
        incoming: &IncomingSignature,
        query: Option<&Value>,
        body: Option<&Value>,
        now_ms: i64,
    ) -> std::result::Result<VerifiedRequest, SignatureRejection> {
        let (Some(signature), Some(origin), Some(validate), Some(timestamp)) = (
            non_empty(&incoming.signature),
            non_empty(&incoming.origin),
            non_empty(&incoming.validate),
            non_empty(&incoming.timestamp),
        ) else {
            warn!("[service-auth] rejected request with missing signature headers");
            return Err(SignatureRejection::MissingHeaders);
        };

        let request_ms: i64 = timestamp
            .parse()
            .map_err(|_| SignatureRejection::InvalidTimestamp)?;
        if now_ms.abs_diff(request_ms) > MAX_CLOCK_SKEW_MS.unsigned_abs() {
            warn!("[service-auth] rejected request outside timestamp window");
            return Err(SignatureRejection::TimestampOutOfWindow);
        }

        let origin: Origin = origin.parse().map_err(|e| {
            warn!("[service-auth] rejected request from unknown origin");
            e
        })?;
        let mode = ValidateMode::parse_lenient(validate);

        let provided = hex::decode(signature).map_err(|_| SignatureRejection::MalformedSignature)?;
        if provided.len() != SIGNATURE_LEN {
            return Err(SignatureRejection::MalformedSignature);
        }

        let validator = validator(mode, query, body, timestamp)
            .map_err(|_| SignatureRejection::MalformedSignature)?;
        let mac = self.mac(origin, validator.as_bytes())?;
        mac.verify_slice(&provided).map_err(|_| {
            warn!("[service-auth] signature mismatch from {} service", origin);
            SignatureRejection::Mismatch
        })?;

        let health_data = incoming.health_data.as_deref() == Some("true");
        if health_data {
            debug!("[service-auth] health data request authenticated from {} service", origin);
        }
        Ok(VerifiedRequest {
            origin,
            timestamp: request_ms,
            health_data,
        })
    }

    /// HMAC over `JSON(data) || timestamp` for payload-level signatures.
    pub fn sign_value<T: Serialize + ?Sized>(
        &self,
        data: &T,
        timestamp: i64,
        origin: Origin,
    ) -> Result<String> {
        let value = serde_json::to_value(data)?;
        self.sign(origin, ValidateMode::Body, None, Some(&value), timestamp)
    }

    /// Constant-time check of a payload-level signature. Never errors.
    pub fn verify_value<T: Serialize + ?Sized>(
        &self,
        data: &T,
        timestamp: i64,
        signature: &str,
        origin: Origin,
    ) -> bool {
        let Ok(value) = serde_json::to_value(data) else {
            return false;
        };
        let Ok(validator) = validator(ValidateMode::Body, None, Some(&value), &timestamp.to_string())
        else {
            return false;
        };
        let Ok(provided) = hex::decode(signature) else {
            return false;
        };
        match self.mac(origin, validator.as_bytes()) {
            Ok(mac) => mac.verify_slice(&provided).is_ok(),
            Err(_) => false,
        }
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.is_empty())
}

fn validator(
    mode: ValidateMode,
    query: Option<&Value>,
    body: Option<&Value>,
    timestamp: &str,
) -> Result<String> {
    let empty = Value::Object(Default::default());
    let query = serde_json::to_string(query.unwrap_or(&empty))?;
    let body = serde_json::to_string(body.unwrap_or(&empty))?;
    Ok(match mode {
        ValidateMode::Body => format!("{body}{timestamp}"),
        ValidateMode::Query => format!("{query}{timestamp}"),
        ValidateMode::Both => format!("{query}{body}{timestamp}"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const NOW: i64 = 1_700_000_000_000;

    fn signer() -> RequestSigner {
        RequestSigner::new(
            Some(SecretMaterial::new("user-hmac-key").unwrap()),
            Some(SecretMaterial::new("agent-hmac-key").unwrap()),
        )
    }

    fn incoming(headers: &SignedHeaders) -> IncomingSignature {
        let pairs = headers.to_pairs();
        IncomingSignature::from_lookup(|name| {
            pairs
                .iter()
                .find(|(k, _)| *k == name)
                .map(|(_, v)| v.clone())
        })
    }

    fn signed(mode: ValidateMode, query: Option<&Value>, body: Option<&Value>, ts: i64) -> SignedHeaders {
        SignedHeaders {
            signature: signer().sign(Origin::User, mode, query, body, ts).unwrap(),
            origin: Origin::User,
            validate: mode,
            timestamp: ts,
            health_data: true,
        }
    }

    #[test]
    fn signature_matches_hmac_of_compact_json() {
        let body = json!({"goal": "endurance", "age": 30});
        let sig = signer()
            .sign(Origin::User, ValidateMode::Body, None, Some(&body), NOW)
            .unwrap();
        let mut mac = HmacSha256::new_from_slice(b"user-hmac-key").unwrap();
        mac.update(br#"{"goal":"endurance","age":30}1700000000000"#);
        assert_eq!(sig, hex::encode(mac.finalize().into_bytes()));
    }

    #[test]
    fn round_trip_for_every_mode() {
        let query = json!({"page": "2"});
        let body = json!({"plan": "walk"});
        for mode in [ValidateMode::Body, ValidateMode::Query, ValidateMode::Both] {
            let headers = signed(mode, Some(&query), Some(&body), NOW);
            let verified = signer()
                .verify(&incoming(&headers), Some(&query), Some(&body), NOW + 1_000)
                .unwrap();
            assert_eq!(verified.origin, Origin::User);
            assert!(verified.health_data);
        }
    }

    #[test]
    fn query_mode_ignores_body_changes() {
        let query = json!({"id": "7"});
        let headers = signed(ValidateMode::Query, Some(&query), None, NOW);
        assert!(signer()
            .verify(&incoming(&headers), Some(&query), Some(&json!({"x": 1})), NOW)
            .is_ok());
    }

    #[test]
    fn tampered_body_is_a_mismatch() {
        let headers = signed(ValidateMode::Body, None, Some(&json!({"kcal": 2000})), NOW);
        let err = signer()
            .verify(&incoming(&headers), None, Some(&json!({"kcal": 9000})), NOW)
            .unwrap_err();
        assert_eq!(err, SignatureRejection::Mismatch);
    }

    #[test]
    fn other_origin_key_is_a_mismatch() {
        let mut headers = signed(ValidateMode::Body, None, None, NOW);
        headers.origin = Origin::Agent;
        let err = signer().verify(&incoming(&headers), None, None, NOW).unwrap_err();
        assert_eq!(err, SignatureRejection::Mismatch);
    }

    #[test]
    fn stale_and_future_timestamps_are_rejected() {
        let headers = signed(ValidateMode::Body, None, None, NOW);
        let s = signer();
        let inc = incoming(&headers);
        assert!(s.verify(&inc, None, None, NOW + MAX_CLOCK_SKEW_MS).is_ok());
        assert_eq!(
            s.verify(&inc, None, None, NOW + MAX_CLOCK_SKEW_MS + 1).unwrap_err(),
            SignatureRejection::TimestampOutOfWindow
        );
        assert_eq!(
            s.verify(&inc, None, None, NOW - MAX_CLOCK_SKEW_MS - 1).unwrap_err(),
            SignatureRejection::TimestampOutOfWindow
        );
    }

    #[test]
    fn header_problems_have_distinct_rejections() {
        let headers = signed(ValidateMode::Body, None, None, NOW);
        let s = signer();

        let mut inc = incoming(&headers);
        inc.signature = Some(String::new());
        assert_eq!(s.verify(&inc, None, None, NOW).unwrap_err(), SignatureRejection::MissingHeaders);

        let mut inc = incoming(&headers);
        inc.timestamp = Some("yesterday".into());
        assert_eq!(s.verify(&inc, None, None, NOW).unwrap_err(), SignatureRejection::InvalidTimestamp);

        let mut inc = incoming(&headers);
        inc.origin = Some("billing".into());
        assert_eq!(
            s.verify(&inc, None, None, NOW).unwrap_err(),
            SignatureRejection::UnknownOrigin("billing".into())
        );

        let mut inc = incoming(&headers);
        inc.signature = Some("abcd".into());
        assert_eq!(
            s.verify(&inc, None, None, NOW).unwrap_err(),
            SignatureRejection::MalformedSignature
        );

        let unkeyed = RequestSigner::new(None, None);
        assert_eq!(
            unkeyed.verify(&incoming(&headers), None, None, NOW).unwrap_err(),
            SignatureRejection::MissingKey(Origin::User)
        );
    }

    #[test]
    fn value_signatures() {
        let s = signer();
        let data = json!({"steps": 9000});
        let sig = s.sign_value(&data, NOW, Origin::Agent).unwrap();
        assert!(s.verify_value(&data, NOW, &sig, Origin::Agent));
        assert!(!s.verify_value(&data, NOW + 1, &sig, Origin::Agent));
        assert!(!s.verify_value(&data, NOW, &sig, Origin::User));
        assert!(!s.verify_value(&data, NOW, "zz", Origin::Agent));
    }
}
