//! Core error types.

use interop_protocol::{MessageError, TransportError};
use thiserror::Error;

/// Errors from content path evaluation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ContentError {
    #[error("invalid content path '{path}': {reason}")]
    InvalidPath { path: String, reason: String },

    #[error("malformed {format} body: {reason}")]
    MalformedBody { format: &'static str, reason: String },

    #[error("content paths are not supported for '{0}' bodies")]
    UnsupportedFormat(String),
}

/// Errors from resolving `$$...$$` references.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReferenceError {
    #[error("malformed reference '{reference}': {reason}")]
    Malformed { reference: String, reason: String },

    #[error("data field does not exist: {0}")]
    DataNotFound(String),

    #[error("component does not exist: {0}")]
    ComponentNotFound(String),

    #[error("referenced state does not exist: {0}")]
    UnknownState(String),

    #[error("state '{0}' has not captured an event yet")]
    NoCapturedEvent(String),

    #[error("state '{state}' captured no header '{field}'")]
    HeaderNotFound { state: String, field: String },

    #[error("state '{state}' captured no content at '{path}'")]
    ContentNotFound { state: String, path: String },

    #[error(transparent)]
    Content(#[from] ContentError),
}

/// Errors from evaluating a single guard.
///
/// These never abort a run: the machine logs them and treats the transition
/// as not taken.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GuardError {
    #[error("unknown comparison type '{0}'")]
    UnknownComparison(String),

    #[error("unknown data type '{0}'")]
    UnknownDataType(String),

    #[error("missing parameter '{0}'")]
    MissingParameter(String),

    #[error("{comparison} is only supported on content paths (label '{label}')")]
    UnsupportedComparison {
        label: String,
        comparison: &'static str,
    },

    #[error("compare value '{0}' is not a number")]
    NonNumericTarget(String),

    #[error("no event available for guard '{0}'")]
    NoEvent(String),

    #[error("event has no body for content guard '{0}'")]
    MissingBody(String),

    #[error(transparent)]
    Reference(#[from] ReferenceError),

    #[error(transparent)]
    Content(#[from] ContentError),
}

/// Errors from building or running a state machine.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("invalid pattern: {reason}")]
    InvalidPattern { reason: String },

    #[error("invalid message in state '{state}': {source}")]
    InvalidMessage {
        state: String,
        #[source]
        source: MessageError,
    },

    #[error("invalid guard in state '{state}': {source}")]
    InvalidGuard {
        state: String,
        #[source]
        source: GuardError,
    },

    #[error("unknown state: {label}")]
    UnknownState { label: String },

    #[error("no transition possible from state '{state}'")]
    NoTransition { state: String },

    #[error("could not prepare message from state '{state}': {source}")]
    Invocation {
        state: String,
        #[source]
        source: ReferenceError,
    },

    #[error("transport failure from state '{state}': {source}")]
    Transport {
        state: String,
        #[source]
        source: TransportError,
    },

    #[error("timed out waiting for event in state '{state}'")]
    EventTimeout { state: String },

    #[error("event queue closed")]
    QueueClosed,

    #[error("event queue full")]
    QueueFull,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl CoreError {
    /// Returns an error code suitable for report lines.
    pub fn error_code(&self) -> &'static str {
        match self {
            CoreError::InvalidPattern { .. } => "INVALID_PATTERN",
            CoreError::InvalidMessage { .. } => "INVALID_MESSAGE",
            CoreError::InvalidGuard { .. } => "INVALID_GUARD",
            CoreError::UnknownState { .. } => "UNKNOWN_STATE",
            CoreError::NoTransition { .. } => "NO_TRANSITION",
            CoreError::Invocation { .. } => "UNEXPECTED_EVENT",
            CoreError::Transport { .. } => "UNEXPECTED_EVENT",
            CoreError::EventTimeout { .. } => "TIMEOUT",
            CoreError::QueueClosed => "QUEUE_CLOSED",
            CoreError::QueueFull => "QUEUE_FULL",
            CoreError::Io(_) => "IO_ERROR",
            CoreError::Json(_) => "BAD_PATTERN_FILE",
            CoreError::Yaml(_) => "BAD_PATTERN_FILE",
        }
    }

    pub(crate) fn invalid_pattern(reason: impl Into<String>) -> Self {
        CoreError::InvalidPattern {
            reason: reason.into(),
        }
    }
}
