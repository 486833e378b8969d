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

//! Shared test helpers used across integration suites.
//! Layout: fixtures.rs (configs and specs), mocks.rs (scripted engines, stores, samplers).

pub mod fixtures;
pub mod mocks;

pub use fixtures::{download_spec, fast_config, upload_spec};
pub use mocks::{MemoryStore, ScriptedEngine, StaticSampler};
