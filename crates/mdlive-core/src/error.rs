//! Error types for mdlive Core

use thiserror::Error;

/// Core error types
#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid document ID: {0}")]
    InvalidDocumentId(String),

    #[error("Content size exceeds limit: {size} > {limit}")]
    ContentTooLarge { size: usize, limit: usize },

    #[error("Render error: {0}")]
    Render(String),
}

/// Result type alias for mdlive Core operations
pub type Result<T> = std::result::Result<T, Error>;
