use thiserror::Error;

/// Errors from the hub socket or REST API
#[derive(Debug, Error)]
pub enum HubError {
    /// Socket-level failure (connect, read, write)
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Hub rejected the access token; not retried automatically
    #[error("Authentication failed: {0}")]
    AuthInvalid(String),

    /// Unexpected frame during the handshake
    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Timed out waiting for {0}")]
    Timeout(&'static str),

    #[error("Connection closed")]
    Closed,

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

pub type HubResult<T> = std::result::Result<T, HubError>;
