//! Protocol error types

use thiserror::Error;

/// Protocol-specific errors
///
/// Display strings are sent verbatim in `error` responses.
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Invalid message format: {0}")]
    Malformed(String),

    #[error("Unknown message type: {0}")]
    UnknownType(String),

    #[error("{field} is required for {request}")]
    MissingField {
        field: &'static str,
        request: &'static str,
    },

    #[error("Failed to parse markdown: {0}")]
    Render(mdlive_core::Error),

    #[error(transparent)]
    Core(#[from] mdlive_core::Error),
}

impl ProtocolError {
    /// Short machine-readable label, used for metrics
    pub fn code(&self) -> &'static str {
        match self {
            ProtocolError::Malformed(_) => "malformed",
            ProtocolError::UnknownType(_) => "unknown_type",
            ProtocolError::MissingField { .. } => "missing_field",
            ProtocolError::Render(_) => "render",
            ProtocolError::Core(_) => "invalid",
        }
    }
}

/// Result type for protocol operations
pub type ProtocolResult<T> = Result<T, ProtocolError>;
