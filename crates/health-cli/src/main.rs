use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use health_core::integrity::hash_identifier;
use health_core::sealed::decrypt_any;
use health_core::service_auth::{Origin, ValidateMode};
use health_core::tokens::{self, TokenKind};
use health_core::SecurityConfig;
use health_session::{ApiRequest, ClientConfig, HttpTransport, LogRedirect, SessionClient};
use serde_json::{json, Value};
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "health", author, version)]
#[command(about = "Health record protection and session tooling", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Encrypt a value into a storable record
    Encrypt {
        plaintext: String,
        /// Use the generic string secret instead of the health-record secret
        #[arg(long)]
        general: bool,
        /// Authenticated v2 format instead of the legacy CBC format
        #[arg(long)]
        sealed: bool,
    },
    /// Decrypt a record (legacy or v2)
    Decrypt {
        record: String,
        #[arg(long)]
        general: bool,
    },
    /// Integrity hash of content, stamped now unless a timestamp is given
    Hash {
        content: String,
        #[arg(long)]
        timestamp: Option<String>,
    },
    /// Check content against a hash and the timestamp it was made with
    Verify {
        content: String,
        #[arg(long)]
        timestamp: String,
        #[arg(long)]
        hash: String,
    },
    /// Pseudonymous lookup key for a health identifier
    HashId { identifier: String },
    /// Random hex token
    Token {
        /// Health-access token (64 bytes)
        #[arg(long)]
        health: bool,
        /// Explicit byte length
        #[arg(long, conflicts_with = "health")]
        bytes: Option<usize>,
    },
    /// Six-digit one-time code
    Otp,
    /// Opaque session identifier for a user
    SessionId {
        user_id: String,
        #[arg(long)]
        health: bool,
    },
    /// Signature headers for an inter-service request
    Sign {
        #[arg(long, default_value = "user")]
        origin: Origin,
        /// Which request parts the signature covers
        #[arg(long, value_enum, default_value_t = SignedParts::Body)]
        mode: SignedParts,
        /// JSON request body
        #[arg(long)]
        body: Option<String>,
        /// JSON object of query parameters
        #[arg(long)]
        query: Option<String>,
        #[arg(long)]
        health_data: bool,
    },
    /// GET a path through the session client
    Probe { path: String },
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum SignedParts {
    Body,
    Query,
    Both,
}

impl From<SignedParts> for ValidateMode {
    fn from(parts: SignedParts) -> Self {
        match parts {
            SignedParts::Body => ValidateMode::Body,
            SignedParts::Query => ValidateMode::Query,
            SignedParts::Both => ValidateMode::Both,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "health_cli=info,health_core=info,health_session=info".into()
            }),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Encrypt {
            plaintext,
            general,
            sealed,
        } => encrypt_command(&plaintext, general, sealed),
        Commands::Decrypt { record, general } => decrypt_command(&record, general),
        Commands::Hash { content, timestamp } => hash_command(&content, timestamp),
        Commands::Verify {
            content,
            timestamp,
            hash,
        } => verify_command(&content, &timestamp, &hash),
        Commands::HashId { identifier } => {
            let config = load_config()?;
            println!("{}", hash_identifier(config.health_secret(), &identifier));
            Ok(())
        }
        Commands::Token { health, bytes } => {
            let token = match bytes {
                Some(n) => tokens::generate(n),
                None if health => tokens::security_token(TokenKind::HealthAccess),
                None => tokens::security_token(TokenKind::Session),
            };
            println!("{token}");
            Ok(())
        }
        Commands::Otp => {
            println!("{}", tokens::health_otp());
            Ok(())
        }
        Commands::SessionId { user_id, health } => {
            println!("{}", tokens::secure_session_id(&user_id, health));
            Ok(())
        }
        Commands::Sign {
            origin,
            mode,
            body,
            query,
            health_data,
        } => sign_command(origin, mode.into(), body, query, health_data),
        Commands::Probe { path } => probe_command(&path).await,
    }
}

fn load_config() -> Result<SecurityConfig> {
    SecurityConfig::from_env().context("loading secret material")
}

fn encrypt_command(plaintext: &str, general: bool, sealed: bool) -> Result<()> {
    let config = load_config()?;
    let record = match (general, sealed) {
        (false, false) => {
            // Structured input is stored as compact JSON, anything else as text.
            match serde_json::from_str::<Value>(plaintext) {
                Ok(value) if value.is_object() || value.is_array() => {
                    config.health_cipher().encrypt_json(&value)?.to_wire()
                }
                _ => config.health_cipher().encrypt_str(plaintext)?.to_wire(),
            }
        }
        (true, false) => config.string_cipher().encrypt_str(plaintext)?.to_wire(),
        (false, true) => config.sealed_health_cipher()?.seal(plaintext.as_bytes())?,
        (true, true) => config.sealed_string_cipher()?.seal(plaintext.as_bytes())?,
    };
    println!("{record}");
    Ok(())
}

fn decrypt_command(record: &str, general: bool) -> Result<()> {
    let config = load_config()?;
    let plaintext = if general {
        decrypt_any(&config.string_cipher(), &config.sealed_string_cipher()?, record)?
    } else {
        decrypt_any(&config.health_cipher(), &config.sealed_health_cipher()?, record)?
    };
    let text = std::str::from_utf8(&plaintext).map_err(|_| anyhow!("record is not UTF-8 text"))?;
    println!("{text}");
    Ok(())
}

fn hash_command(content: &str, timestamp: Option<String>) -> Result<()> {
    let verifier = load_config()?.integrity_verifier();
    let record = match timestamp {
        Some(ts) => health_core::IntegrityRecord {
            content_hash: verifier.hash(content.as_bytes(), &ts),
            timestamp: ts,
        },
        None => verifier.create_hash(content.as_bytes()),
    };
    println!("{}", serde_json::to_string_pretty(&record)?);
    Ok(())
}

fn verify_command(content: &str, timestamp: &str, hash: &str) -> Result<()> {
    let verifier = load_config()?.integrity_verifier();
    if !verifier.verify(content.as_bytes(), timestamp, hash) {
        return Err(anyhow!("integrity check failed"));
    }
    println!("ok");
    Ok(())
}

fn parse_json_arg(name: &str, raw: Option<String>) -> Result<Option<Value>> {
    raw.map(|s| serde_json::from_str(&s).with_context(|| format!("--{name} is not valid JSON")))
        .transpose()
}

fn sign_command(
    origin: Origin,
    mode: ValidateMode,
    body: Option<String>,
    query: Option<String>,
    health_data: bool,
) -> Result<()> {
    let signer = load_config()?.request_signer();
    let body = parse_json_arg("body", body)?;
    let query = parse_json_arg("query", query)?;
    let headers = signer.sign_request(
        origin,
        mode,
        query.as_ref(),
        body.as_ref(),
        health_data,
    )?;
    let out: serde_json::Map<String, Value> = headers
        .to_pairs()
        .into_iter()
        .map(|(name, value)| (name.to_string(), json!(value)))
        .collect();
    println!("{}", serde_json::to_string_pretty(&out)?);
    Ok(())
}

async fn probe_command(path: &str) -> Result<()> {
    let config = ClientConfig::from_env();
    let transport = HttpTransport::new(&config)?;
    let redirect = Arc::new(LogRedirect {
        sign_in_path: config.sign_in_path.clone(),
    });
    let client = SessionClient::from_config(transport, &config, redirect);

    info!("[probe] GET {}{}", config.api_base_url, path);
    let resp = client.request(&ApiRequest::get(path)).await?;
    if !resp.is_success() {
        return Err(anyhow!("{}: {}", resp.status, resp.error_message()));
    }
    println!("{}", String::from_utf8_lossy(&resp.body));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn token_length_flags_conflict() {
        let parsed = Cli::try_parse_from(["health", "token", "--health", "--bytes", "8"]);
        assert!(parsed.is_err());
    }

    #[test]
    fn sign_defaults_to_user_body() {
        let cli = Cli::try_parse_from(["health", "sign", "--body", "{\"a\":1}"]).unwrap();
        match cli.command {
            Commands::Sign { origin, mode, .. } => {
                assert_eq!(origin, Origin::User);
                assert_eq!(ValidateMode::from(mode), ValidateMode::Body);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn mistyped_mode_is_rejected() {
        assert!(Cli::try_parse_from(["health", "sign", "--mode", "qeury"]).is_err());
        let cli = Cli::try_parse_from(["health", "sign", "--mode", "both"]).unwrap();
        match cli.command {
            Commands::Sign { mode, .. } => assert_eq!(ValidateMode::from(mode), ValidateMode::Both),
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn unknown_origin_is_rejected() {
        assert!(Cli::try_parse_from(["health", "sign", "--origin", "robot"]).is_err());
    }
}
