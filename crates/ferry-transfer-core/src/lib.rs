//! Engine-agnostic transfer interfaces and DTOs.
//!
//! This crate defines the task record that the queue engine tracks, the
//! progress report shape that every backend engine produces, and the adapter
//! traits (`EngineAdapter`, `PersistenceAdapter`) that plug concrete torrent,
//! usenet, HTTP, and cloud backends into the orchestrator.

pub mod error;
pub mod model;
pub mod service;

pub use error::{TransferError, TransferResult};
pub use model::{
    EngineHandle, EngineKind, ProgressReport, TaskCategory, TaskRecord, TaskSnapshot, TaskSpec,
};
pub use service::{EngineAdapter, PersistenceAdapter};
