//! Error types for wrapgen core operations.

use crate::ids::IdError;

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;

/// Errors that can occur in core operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CoreError {
    /// Prompt fails the length constraints.
    #[error("invalid prompt: {0}")]
    InvalidPrompt(String),

    /// Idempotency key fails the format constraints.
    #[error("invalid idempotency key: {0}")]
    InvalidIdempotencyKey(String),

    /// Reference image is not an allow-listed URL or inline data.
    #[error("invalid reference image: {0}")]
    InvalidReferenceImage(String),

    /// Too many reference images supplied.
    #[error("too many reference images: {count} (max {max})")]
    TooManyReferenceImages {
        /// Number supplied.
        count: usize,
        /// Allowed maximum.
        max: usize,
    },

    /// Unknown vehicle model slug.
    #[error("unknown model: {0}")]
    UnknownModel(String),

    /// Invalid identifier.
    #[error("invalid identifier: {0}")]
    InvalidId(#[from] IdError),
}
