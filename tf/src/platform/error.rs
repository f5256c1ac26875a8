//! Platform error types

use thiserror::Error;

/// Errors raised while building or driving a platform adapter
#[derive(Debug, Error)]
pub enum PlatformError {
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Stream error: {0}")]
    Stream(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("API key not set (expected in ${0})")]
    MissingApiKey(String),
}
