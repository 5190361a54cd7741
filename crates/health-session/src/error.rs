use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum ClientError {
    /// The request never produced a response (connect, TLS, timeout...).
    #[error("Network error: {0}")]
    Network(String),

    /// The session could not be refreshed; the user has been signed out.
    #[error("Session refresh failed: {0}")]
    AuthRefresh(String),

    /// A pending refresh was abandoned before it produced an outcome.
    #[error("Session refresh was cancelled")]
    Cancelled,

    #[error("Response decode error: {0}")]
    Decode(String),
}

impl From<serde_json::Error> for ClientError {
    fn from(e: serde_json::Error) -> Self {
        ClientError::Decode(e.to_string())
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(e: reqwest::Error) -> Self {
        ClientError::Network(e.to_string())
    }
}
