//! Error types for rewards-auth

use std::io;

use thiserror::Error;

use crate::oauth::{DiscoveryError, TokenError};

/// Result type alias for rewards-auth
pub type Result<T> = std::result::Result<T, Error>;

/// Application errors
///
/// Component-level failures keep their own enums ([`DiscoveryError`],
/// [`TokenError`], [`crate::gate::ValidationError`]) so callers can inspect
/// them; this type wraps them at the application boundary.
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Discovery failed
    #[error(transparent)]
    Discovery(#[from] DiscoveryError),

    /// Token request failed
    #[error(transparent)]
    Token(#[from] TokenError),

    /// Protected API returned a non-success status
    #[error("API request failed: HTTP {0}")]
    Api(u16),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}
