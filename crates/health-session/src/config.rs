use serde::{Deserialize, Serialize};

pub const DEFAULT_API_BASE_URL: &str = "http://localhost:4000/api";
pub const ENV_API_BASE_URL: &str = "API_BASE_URL";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub api_base_url: String,
    /// GET endpoint that exchanges the refresh cookie for a new access cookie.
    pub refresh_path: String,
    /// Where the application lands after an irrecoverable refresh failure.
    pub sign_in_path: String,
    /// Whole-request deadline enforced by the HTTP transport.
    pub request_timeout_ms: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_BASE_URL.into(),
            refresh_path: "/auth/refresh-token".into(),
            sign_in_path: "/signin".into(),
            request_timeout_ms: 90_000,
        }
    }
}

impl ClientConfig {
    /// Defaults, with the base URL taken from `API_BASE_URL` when set.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(url) = std::env::var(ENV_API_BASE_URL) {
            if !url.is_empty() {
                config.api_base_url = url;
            }
        }
        config
    }
}
