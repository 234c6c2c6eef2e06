//! Protocol error types.

use thiserror::Error;

/// Errors raised while building an outbound message specification.
///
/// These are configuration errors: they surface before any network activity.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MessageError {
    #[error("invalid method '{0}': expected GET, POST, PUT or DELETE")]
    InvalidMethod(String),

    #[error("invalid content type '{0}': expected xml, json or other")]
    InvalidContentType(String),

    #[error("content type 'other' requires a declared Content-Type header")]
    MissingContentType,

    #[error("message has no URL")]
    MissingUrl,
}

/// Errors from sending a request over a transport.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("unsupported URL scheme in '{0}'")]
    UnsupportedScheme(String),

    #[error("invalid URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("invalid header '{name}': {reason}")]
    InvalidHeader { name: String, reason: String },

    #[error("request to {url} timed out")]
    Timeout { url: String },

    #[error("could not connect to {url}: {reason}")]
    Connect { url: String, reason: String },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl TransportError {
    /// Returns an error code suitable for report lines.
    pub fn error_code(&self) -> &'static str {
        match self {
            TransportError::UnsupportedScheme(_) => "UNSUPPORTED_SCHEME",
            TransportError::InvalidUrl { .. } => "BAD_REQUEST",
            TransportError::InvalidHeader { .. } => "BAD_REQUEST",
            TransportError::Timeout { .. } => "TIMEOUT",
            TransportError::Connect { .. } => "UNREACHABLE",
            TransportError::Http(_) => "HTTP_ERROR",
        }
    }
}
