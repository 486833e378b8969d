//! Error types for configuration operations.

use std::io;

use thiserror::Error;

/// Primary error type for configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Configuration file could not be read.
    #[error("failed to read configuration file")]
    Read {
        /// Path that failed to load.
        path: String,
        /// Underlying I/O failure.
        #[source]
        source: io::Error,
    },
    /// Configuration file was not valid TOML for the expected schema.
    #[error("failed to parse configuration file")]
    Parse {
        /// Path that failed to parse.
        path: String,
        /// Underlying deserialization failure.
        #[source]
        source: toml::de::Error,
    },
    /// A field or combination of fields violated an invariant.
    #[error("invalid configuration field")]
    InvalidField {
        /// Section that failed validation.
        section: &'static str,
        /// Field that failed validation.
        field: &'static str,
        /// Machine-readable reason for the failure.
        reason: &'static str,
    },
}

/// Convenience alias for configuration results.
pub type ConfigResult<T> = Result<T, ConfigError>;
