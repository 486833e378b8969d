//! Typed configuration sections with serde defaults.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Root configuration for the orchestrator.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct FerryConfig {
    /// Concurrency and quota limits.
    #[serde(default)]
    pub limits: LimitsConfig,
    /// Status listing behaviour.
    #[serde(default)]
    pub status: StatusConfig,
    /// Stall and resource monitor tuning.
    #[serde(default)]
    pub monitor: MonitorConfig,
    /// Engine interaction tuning.
    #[serde(default)]
    pub engine: EngineConfig,
    /// Snapshot persistence location.
    #[serde(default)]
    pub persistence: PersistenceConfig,
    /// Logging output configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Global and per-user admission limits. Zero means unlimited.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields, default)]
pub struct LimitsConfig {
    /// Combined cap across downloads and uploads.
    pub limit_all: u32,
    /// Cap on concurrently active downloads.
    pub limit_download: u32,
    /// Cap on concurrently active uploads.
    pub limit_upload: u32,
    /// Cap on live (non-terminal) tasks per owner.
    pub user_max_tasks: u32,
    /// Cap on live tasks across all owners.
    pub bot_max_tasks: u32,
    /// Minimum seconds between submissions from one owner.
    pub user_time_interval_secs: u64,
    /// Cap on submissions per owner per UTC day.
    pub daily_task_limit: u32,
    /// Cap on completed download bytes per owner per UTC day.
    pub daily_download_bytes: u64,
    /// Cap on completed upload bytes per owner per UTC day.
    pub daily_upload_bytes: u64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            limit_all: 0,
            limit_download: 0,
            limit_upload: 0,
            user_max_tasks: 0,
            bot_max_tasks: 0,
            user_time_interval_secs: 0,
            daily_task_limit: 0,
            daily_download_bytes: 0,
            daily_upload_bytes: 0,
        }
    }
}

/// Status listing behaviour.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields, default)]
pub struct StatusConfig {
    /// Seconds between refreshed status renderings. Floor of two seconds.
    pub update_interval_secs: u64,
    /// Maximum tasks per status page.
    pub status_limit: u32,
}

impl Default for StatusConfig {
    fn default() -> Self {
        Self {
            update_interval_secs: 3,
            status_limit: 10,
        }
    }
}

impl StatusConfig {
    /// Interval between status refreshes.
    #[must_use]
    pub const fn update_interval(&self) -> Duration {
        Duration::from_secs(self.update_interval_secs)
    }
}

/// Stall and resource monitor tuning.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields, default)]
pub struct MonitorConfig {
    /// Whether the health monitor runs at all.
    pub enabled: bool,
    /// Seconds between monitor sweeps.
    pub interval_secs: u64,
    /// Rate below which a sample counts toward a stall, in bytes per second.
    pub speed_threshold_bps: u64,
    /// Consecutive slow sweeps required before a task is marked stalled.
    pub consecutive_checks: u32,
    /// Minimum task age in seconds before stall detection applies.
    pub elapsed_threshold_secs: u64,
    /// ETA in seconds beyond which a warning is emitted.
    pub eta_threshold_secs: u64,
    /// Seconds a stalled task may wait for recovery before cancellation.
    pub wait_time_secs: u64,
    /// Maximum total task runtime in seconds before forced cancellation.
    pub completion_threshold_secs: u64,
    /// CPU percentage at or above which admissions pause.
    pub cpu_high_pct: u8,
    /// CPU percentage at or below which admissions may resume.
    pub cpu_low_pct: u8,
    /// Memory percentage at or above which admissions pause.
    pub memory_high_pct: u8,
    /// Memory percentage at or below which admissions may resume.
    pub memory_low_pct: u8,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 60,
            speed_threshold_bps: 51_200,
            consecutive_checks: 20,
            elapsed_threshold_secs: 3_600,
            eta_threshold_secs: 86_400,
            wait_time_secs: 600,
            completion_threshold_secs: 86_400,
            cpu_high_pct: 90,
            cpu_low_pct: 60,
            memory_high_pct: 75,
            memory_low_pct: 60,
        }
    }
}

impl MonitorConfig {
    /// Interval between monitor sweeps.
    #[must_use]
    pub const fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    /// Grace period granted to stalled tasks before cancellation.
    #[must_use]
    pub const fn wait_time(&self) -> Duration {
        Duration::from_secs(self.wait_time_secs)
    }
}

/// Engine interaction tuning.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields, default)]
pub struct EngineConfig {
    /// Engine start attempts before a task is failed.
    pub start_retry_limit: u32,
    /// Base seconds between engine start attempts; doubles per retry.
    pub start_retry_backoff_secs: u64,
    /// Seconds to wait for a single engine start call.
    pub start_timeout_secs: u64,
    /// Consecutive failed progress polls before a task is cancelled.
    pub progress_failure_limit: u32,
    /// Maximum progress polls in flight at once.
    pub poll_concurrency: usize,
    /// Seconds to wait for an engine to acknowledge cancellation.
    pub cancel_ack_timeout_secs: u64,
    /// Seconds to wait for a single progress poll.
    pub progress_timeout_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            start_retry_limit: 3,
            start_retry_backoff_secs: 2,
            start_timeout_secs: 30,
            progress_failure_limit: 5,
            poll_concurrency: 16,
            cancel_ack_timeout_secs: 5,
            progress_timeout_secs: 10,
        }
    }
}

impl EngineConfig {
    /// Delay between engine start attempts.
    #[must_use]
    pub const fn start_retry_backoff(&self) -> Duration {
        Duration::from_secs(self.start_retry_backoff_secs)
    }

    /// Timeout for a single engine start call.
    #[must_use]
    pub const fn start_timeout(&self) -> Duration {
        Duration::from_secs(self.start_timeout_secs)
    }

    /// Timeout for a cancellation acknowledgement.
    #[must_use]
    pub const fn cancel_ack_timeout(&self) -> Duration {
        Duration::from_secs(self.cancel_ack_timeout_secs)
    }

    /// Timeout for a single progress poll.
    #[must_use]
    pub const fn progress_timeout(&self) -> Duration {
        Duration::from_secs(self.progress_timeout_secs)
    }
}

/// Snapshot persistence location.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields, default)]
pub struct PersistenceConfig {
    /// Directory holding one JSON snapshot per live task.
    pub snapshot_dir: String,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            snapshot_dir: "./ferry-state".to_string(),
        }
    }
}

/// Logging output configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields, default)]
pub struct LoggingConfig {
    /// Output format for the tracing subscriber.
    pub format: LogFormat,
    /// Default filter directive when `RUST_LOG` is unset.
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::Pretty,
            level: "info".to_string(),
        }
    }
}

/// Output format for the tracing subscriber.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    /// Human-readable multi-line output.
    #[default]
    Pretty,
    /// Newline-delimited JSON records.
    Json,
}
