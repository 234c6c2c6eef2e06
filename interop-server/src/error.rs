//! Server error types.

use crate::config::ConfigError;
use thiserror::Error;

/// Server errors.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("core error: {0}")]
    Core(#[from] interop_core::CoreError),

    #[error("transport error: {0}")]
    Transport(#[from] interop_protocol::TransportError),
}

impl ServerError {
    /// Returns an error code for CLI output.
    pub fn error_code(&self) -> &'static str {
        match self {
            ServerError::Io(_) => "IO_ERROR",
            ServerError::Config(_) => "BAD_CONFIG",
            ServerError::Core(e) => e.error_code(),
            ServerError::Transport(e) => e.error_code(),
        }
    }
}
