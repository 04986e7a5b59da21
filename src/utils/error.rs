//! The `error` module defines the error type used within `templecast`.
//!
//! Only the failures that escape a single connection surface here. Fan-out
//! misses, unknown commands and unknown topics are logged and absorbed where
//! they happen, so none of them has a variant.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TempleCastError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("WebSocket transport error: {0}")]
    Transport(#[from] tungstenite::Error),

    #[error("malformed message: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("WebSocket is not connected")]
    NotConnected,
}

pub type Result<T> = std::result::Result<T, TempleCastError>;
