//! # Design
//!
//! - Centralize application-level errors for bootstrap and orchestration.
//! - Keep error messages constant while carrying context fields for debugging.
//! - Preserve source errors without re-logging at call sites.

use std::io;

use thiserror::Error;

/// Result alias for application operations.
pub type AppResult<T> = Result<T, AppError>;

/// Application-level error type.
#[derive(Debug, Error)]
pub enum AppError {
    /// Configuration operations failed.
    #[error("configuration operation failed")]
    Config {
        /// Operation identifier.
        operation: &'static str,
        /// Source configuration error.
        source: ferry_config::ConfigError,
    },
    /// Telemetry operations failed.
    #[error("telemetry operation failed")]
    Telemetry {
        /// Operation identifier.
        operation: &'static str,
        /// Source telemetry error.
        source: anyhow::Error,
    },
    /// Queue engine operations failed.
    #[error("queue operation failed")]
    Queue {
        /// Operation identifier.
        operation: &'static str,
        /// Source queue error.
        source: anyhow::Error,
    },
    /// Signal handling failed.
    #[error("signal handling failed")]
    Signal {
        /// Source I/O error.
        source: io::Error,
    },
}

impl AppError {
    /// Wrap a configuration error with an operation identifier.
    #[must_use]
    pub const fn config(operation: &'static str, source: ferry_config::ConfigError) -> Self {
        Self::Config { operation, source }
    }

    /// Wrap a telemetry error with an operation identifier.
    #[must_use]
    pub const fn telemetry(operation: &'static str, source: anyhow::Error) -> Self {
        Self::Telemetry { operation, source }
    }

    /// Wrap a queue error with an operation identifier.
    #[must_use]
    pub const fn queue(operation: &'static str, source: anyhow::Error) -> Self {
        Self::Queue { operation, source }
    }
}
