//! CDP and browser-process error types

use thiserror::Error;

pub type CdpResult<T> = std::result::Result<T, CdpError>;

/// Browser transport and protocol errors.
#[derive(Debug, Error)]
pub enum CdpError {
    #[error("Failed to launch browser: {0}")]
    Launch(String),

    #[error("Debugging endpoint unavailable at {0}")]
    EndpointUnavailable(String),

    #[error("WebSocket error: {0}")]
    WebSocket(String),

    #[error("CDP error {code}: {message}")]
    Protocol { code: i64, message: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Navigation failed: {0}")]
    NavigationFailed(String),

    #[error("Element not found: {0}")]
    ElementNotFound(String),

    #[error("JavaScript error: {0}")]
    JavaScript(String),

    #[error("Browser action timed out: {0}")]
    ActionTimeout(String),

    #[error("CDP session closed")]
    SessionClosed,

    #[error("Invalid CDP response: {0}")]
    InvalidResponse(String),
}

impl From<tokio_tungstenite::tungstenite::Error> for CdpError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        CdpError::WebSocket(e.to_string())
    }
}

impl From<reqwest::Error> for CdpError {
    fn from(e: reqwest::Error) -> Self {
        CdpError::Http(e.to_string())
    }
}
