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

//! Concurrency-limited task queue engine for multi-user transfers.
//!
//! Layout: `admission.rs` (quotas and slot accounting), `registry.rs` (live
//! task catalog), `poller.rs` (progress polling), `monitor.rs` (stall and
//! resource watchdog), `cancel.rs` (teardown coordination), `status.rs`
//! (paginated listings), `orchestrator.rs` (the assembled facade).

pub mod admission;
pub mod cancel;
pub mod engines;
pub mod error;
pub mod monitor;
pub mod orchestrator;
pub mod poller;
pub mod registry;
pub mod resource;
pub mod status;

pub use admission::{AdmissionController, ForceStartOutcome};
pub use cancel::{CancelCoordinator, CancelReason};
pub use engines::EngineSet;
pub use error::{QueueError, QueueResult};
pub use monitor::HealthMonitor;
pub use orchestrator::QueueEngine;
pub use poller::ProgressPoller;
pub use registry::TaskRegistry;
pub use resource::{ResourceSample, ResourceSampler, SystemSampler};
pub use status::{PageCursor, StatusAggregator, StatusPage, StatusSummary, TaskFilter};
