//! Error types for wrapgen storage.

use wrapgen_core::TaskStatus;

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors that can occur in storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Database operation failed.
    #[error("database error: {0}")]
    Database(String),

    /// Serialization/deserialization failed.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Record not found.
    #[error("{entity} not found: {id}")]
    NotFound {
        /// Entity kind ("task", "account", "wrap").
        entity: &'static str,
        /// The missing identifier.
        id: String,
    },

    /// Not enough available credits for the reservation or settlement.
    ///
    /// `available` already subtracts credits reserved by in-flight tasks.
    #[error("insufficient credits: available={available}, required={required}")]
    InsufficientCredits {
        /// Available balance (balance minus in-flight reservations).
        available: i64,
        /// Required amount.
        required: i64,
    },

    /// The user already has the maximum number of in-flight tasks.
    #[error("too many in-flight tasks: {count} (cap {cap})")]
    TooManyInFlight {
        /// Current in-flight count.
        count: usize,
        /// Configured cap.
        cap: usize,
    },

    /// Illegal task status transition.
    #[error("task {task_id}: invalid transition from {from} to {to}")]
    InvalidTransition {
        /// The task.
        task_id: String,
        /// Current status.
        from: TaskStatus,
        /// Requested status.
        to: TaskStatus,
    },
}
