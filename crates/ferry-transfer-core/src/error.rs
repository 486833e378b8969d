//! Error types for transfer core services.

use ferry_events::TaskPhase;
use thiserror::Error;
use uuid::Uuid;

/// Primary error type for transfer domain operations.
#[derive(Debug, Error)]
pub enum TransferError {
    /// The lifecycle state machine forbids the requested move.
    #[error("invalid task transition")]
    InvalidTransition {
        /// Task identifier.
        task_id: Uuid,
        /// Phase the task currently occupies.
        from: TaskPhase,
        /// Phase the caller requested.
        to: TaskPhase,
    },
    /// Task was not found in the registry.
    #[error("task not found")]
    NotFound {
        /// Missing task identifier.
        task_id: Uuid,
    },
}

/// Convenience alias for transfer operation results.
pub type TransferResult<T> = Result<T, TransferError>;
