//! Error types for queue engine operations.

use ferry_transfer_core::{EngineKind, TransferError};
use thiserror::Error;
use uuid::Uuid;

/// Primary error type for queue engine operations.
#[derive(Debug, Error)]
pub enum QueueError {
    /// A submission quota rejected the task before it was created.
    #[error("task limit reached")]
    TooManyTasks {
        /// Owner whose submission was rejected.
        owner_id: i64,
        /// Which quota fired (`bot`, `user`, `interval`, `daily`, or
        /// `daily_bytes`).
        scope: &'static str,
    },
    /// Task was not found in the registry.
    #[error("task not found")]
    NotFound {
        /// Missing task identifier.
        task_id: Uuid,
    },
    /// No adapter is registered for the requested backend family.
    #[error("no adapter registered for engine kind")]
    UnknownEngine {
        /// Backend family without an adapter.
        kind: EngineKind,
    },
    /// A lifecycle transition was rejected by the state machine.
    #[error(transparent)]
    Transfer(#[from] TransferError),
    /// A status page cursor token could not be parsed.
    #[error("malformed page cursor")]
    InvalidCursor,
}

/// Convenience alias for queue operation results.
pub type QueueResult<T> = Result<T, QueueError>;
