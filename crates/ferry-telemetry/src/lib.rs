//! Telemetry primitives shared across the Ferry workspace.
//!
//! This crate centralises logging and metrics so the orchestrator and any
//! delivery surfaces adopt a consistent observability story.

pub mod init;
pub mod metrics;

pub use init::{DEFAULT_LOG_LEVEL, LogFormat, LoggingConfig, build_sha, init_logging};
pub use metrics::{Metrics, MetricsSnapshot};
