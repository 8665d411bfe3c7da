//! Error types for MCP Warden

use std::io;

use thiserror::Error;

/// Result type alias for MCP Warden
pub type Result<T> = std::result::Result<T, Error>;

/// MCP Warden errors
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Operation on a server id that was never registered
    #[error("Server not registered: {0}")]
    UnregisteredServer(String),

    /// Invalid detection pattern
    #[error("Invalid detection pattern `{pattern}`: {reason}")]
    InvalidPattern {
        /// The offending pattern source
        pattern: String,
        /// Compiler diagnostic
        reason: String,
    },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// True when the error indicates misuse of the API rather than bad input.
    #[must_use]
    pub fn is_misuse(&self) -> bool {
        matches!(self, Self::UnregisteredServer(_))
    }
}
