#![forbid(unsafe_code)]
#![deny(
    warnings,
    dead_code,
    unused,
    unused_imports,
    unused_must_use,
    unreachable_pub,
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    rustdoc::broken_intra_doc_links,
    rustdoc::bare_urls,
    missing_docs
)]

//! Ferry application bootstrap wiring.
//!
//! Layout: `bootstrap.rs` (config, telemetry, and engine wiring), `store.rs`
//! (file-backed snapshot persistence), `error.rs` (application errors).

pub mod bootstrap;
pub mod error;
pub mod store;

pub use bootstrap::{run_app, run_app_with};
pub use error::{AppError, AppResult};
pub use store::JsonSnapshotStore;
