//! Core transfer domain types shared across the workspace.

use chrono::{DateTime, Utc};
use ferry_events::TaskPhase;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{TransferError, TransferResult};

/// Broad direction of a transfer, used for slot accounting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskCategory {
    /// Bytes flow from a remote source onto local storage.
    Download,
    /// Bytes flow from local storage to a remote destination.
    Upload,
}

impl TaskCategory {
    /// Stable label used in logs and metrics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Download => "download",
            Self::Upload => "upload",
        }
    }
}

impl std::fmt::Display for TaskCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Concrete backend family that executes a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineKind {
    /// Bittorrent client backend.
    Torrent,
    /// Usenet downloader backend.
    Usenet,
    /// Direct HTTP/FTP fetcher.
    DirectHttp,
    /// Site-specific media ripper.
    MediaRipper,
    /// Generic cloud storage uploader.
    CloudUpload,
    /// Streaming-platform video uploader.
    VideoUpload,
}

impl EngineKind {
    /// The slot category this engine's tasks count against.
    #[must_use]
    pub const fn category(self) -> TaskCategory {
        match self {
            Self::Torrent | Self::Usenet | Self::DirectHttp | Self::MediaRipper => {
                TaskCategory::Download
            }
            Self::CloudUpload | Self::VideoUpload => TaskCategory::Upload,
        }
    }

    /// Stable label used in logs and metrics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Torrent => "torrent",
            Self::Usenet => "usenet",
            Self::DirectHttp => "direct_http",
            Self::MediaRipper => "media_ripper",
            Self::CloudUpload => "cloud_upload",
            Self::VideoUpload => "video_upload",
        }
    }
}

impl std::fmt::Display for EngineKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Opaque token a backend engine hands back when a task starts.
///
/// The orchestrator never interprets the contents; it only passes the handle
/// back to the same engine for progress polls and cancellation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EngineHandle(pub String);

impl EngineHandle {
    /// Construct a handle from any string-like token.
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// The raw token as handed out by the engine.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for EngineHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Submission payload describing a transfer before it is admitted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSpec {
    /// Owner submitting the task.
    pub owner_id: i64,
    /// Conversation or channel the task reports back to.
    pub chat_ref: String,
    /// Backend family that should execute the task.
    pub kind: EngineKind,
    /// Source locator (magnet URI, NZB path, URL, local path).
    pub source: String,
    /// Friendly name displayed before the engine reports one.
    pub display_name: Option<String>,
}

/// Point-in-time throughput report produced by a backend engine.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct ProgressReport {
    /// Bytes moved so far.
    pub transferred_bytes: u64,
    /// Total payload size, when the engine knows it.
    pub size_bytes: Option<u64>,
    /// Current transfer rate in bytes per second.
    pub speed_bps: u64,
    /// Engine-estimated seconds to completion, when available.
    pub eta_seconds: Option<u64>,
    /// Whether the engine considers the transfer finished.
    pub complete: bool,
}

impl ProgressReport {
    /// Completion ratio in percent, zero when the total size is unknown.
    #[allow(clippy::cast_precision_loss)]
    #[must_use]
    pub fn percent_complete(&self) -> f64 {
        match self.size_bytes {
            Some(total) if total > 0 => (self.transferred_bytes as f64 / total as f64) * 100.0,
            _ => 0.0,
        }
    }
}

/// Live record of a tracked task inside the registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    /// Unique identifier assigned at submission.
    pub id: Uuid,
    /// Owner that submitted the task.
    pub owner_id: i64,
    /// Conversation or channel the task reports back to.
    pub chat_ref: String,
    /// Backend family executing the task.
    pub kind: EngineKind,
    /// Friendly name shown in status listings.
    pub display_name: Option<String>,
    /// Source locator handed to the engine on start.
    pub source: String,
    /// Current lifecycle phase.
    pub phase: TaskPhase,
    /// Engine token, present only while the task runs.
    pub engine_handle: Option<EngineHandle>,
    /// Total payload size, once known.
    pub size_bytes: Option<u64>,
    /// Bytes moved so far.
    pub transferred_bytes: u64,
    /// Most recent observed transfer rate in bytes per second.
    pub speed_bps: u64,
    /// Most recent engine ETA in seconds.
    pub eta_seconds: Option<u64>,
    /// Submission timestamp.
    pub created_at: DateTime<Utc>,
    /// When the task was admitted to a slot, if it has been.
    pub admitted_at: Option<DateTime<Utc>>,
    /// When progress last advanced.
    pub last_progress_at: Option<DateTime<Utc>>,
    /// Engine start attempts consumed so far.
    pub retry_count: u32,
    /// Whether a force-start moved the task to its queue front.
    pub boosted: bool,
    /// Failure or cancellation detail for terminal tasks.
    pub error: Option<String>,
}

impl TaskRecord {
    /// Build a fresh queued record from a submission spec.
    #[must_use]
    pub fn from_spec(id: Uuid, spec: TaskSpec, created_at: DateTime<Utc>) -> Self {
        Self {
            id,
            owner_id: spec.owner_id,
            chat_ref: spec.chat_ref,
            kind: spec.kind,
            display_name: spec.display_name,
            source: spec.source,
            phase: TaskPhase::Queued,
            engine_handle: None,
            size_bytes: None,
            transferred_bytes: 0,
            speed_bps: 0,
            eta_seconds: None,
            created_at,
            admitted_at: None,
            last_progress_at: None,
            retry_count: 0,
            boosted: false,
            error: None,
        }
    }

    /// The slot category this task counts against.
    #[must_use]
    pub const fn category(&self) -> TaskCategory {
        self.kind.category()
    }

    /// Move the record to `next`, enforcing the lifecycle state machine.
    ///
    /// Terminal phases drop the engine handle so no poller or cancel path can
    /// reach the engine with a stale token.
    ///
    /// # Errors
    ///
    /// Returns [`TransferError::InvalidTransition`] when the state machine
    /// forbids the move.
    pub fn transition(&mut self, next: TaskPhase) -> TransferResult<()> {
        if !self.phase.can_transition(next) {
            return Err(TransferError::InvalidTransition {
                task_id: self.id,
                from: self.phase,
                to: next,
            });
        }
        self.phase = next;
        if next.is_terminal() {
            self.engine_handle = None;
        }
        Ok(())
    }

    /// Fold a progress report into the record, tracking advancement time.
    pub fn apply_progress(&mut self, report: &ProgressReport, observed_at: DateTime<Utc>) {
        if report.size_bytes.is_some() {
            self.size_bytes = report.size_bytes;
        }
        let mut transferred = report.transferred_bytes;
        if let Some(total) = self.size_bytes {
            transferred = transferred.min(total);
        }
        if transferred > self.transferred_bytes {
            self.last_progress_at = Some(observed_at);
        }
        self.transferred_bytes = transferred;
        self.speed_bps = report.speed_bps;
        self.eta_seconds = report.eta_seconds;
    }

    /// Completion ratio in percent, zero when the total size is unknown.
    #[allow(clippy::cast_precision_loss)]
    #[must_use]
    pub fn percent_complete(&self) -> f64 {
        match self.size_bytes {
            Some(total) if total > 0 => (self.transferred_bytes as f64 / total as f64) * 100.0,
            _ => 0.0,
        }
    }
}

/// Durable snapshot of a task, persisted across restarts.
///
/// Snapshots deliberately omit live engine state; restored tasks re-enter
/// the queue and acquire a fresh handle when re-admitted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSnapshot {
    /// Task identifier.
    pub id: Uuid,
    /// Owner that submitted the task.
    pub owner_id: i64,
    /// Conversation or channel the task reports back to.
    pub chat_ref: String,
    /// Backend family executing the task.
    pub kind: EngineKind,
    /// Friendly name shown in status listings.
    pub display_name: Option<String>,
    /// Source locator handed to the engine on start.
    pub source: String,
    /// Phase at snapshot time.
    pub phase: TaskPhase,
    /// Total payload size, once known.
    pub size_bytes: Option<u64>,
    /// Bytes moved at snapshot time.
    pub transferred_bytes: u64,
    /// Original submission timestamp.
    pub created_at: DateTime<Utc>,
    /// Whether a force-start moved the task to its queue front.
    pub boosted: bool,
    /// Failure or cancellation detail for terminal tasks.
    pub error: Option<String>,
}

impl From<&TaskRecord> for TaskSnapshot {
    fn from(record: &TaskRecord) -> Self {
        Self {
            id: record.id,
            owner_id: record.owner_id,
            chat_ref: record.chat_ref.clone(),
            kind: record.kind,
            display_name: record.display_name.clone(),
            source: record.source.clone(),
            phase: record.phase,
            size_bytes: record.size_bytes,
            transferred_bytes: record.transferred_bytes,
            created_at: record.created_at,
            boosted: record.boosted,
            error: record.error.clone(),
        }
    }
}

impl TaskSnapshot {
    /// Rebuild a queued live record from a persisted snapshot.
    ///
    /// Progress bytes and sizing survive; engine state and retry budget
    /// reset because the new process must start the transfer afresh.
    #[must_use]
    pub fn into_queued_record(self) -> TaskRecord {
        TaskRecord {
            id: self.id,
            owner_id: self.owner_id,
            chat_ref: self.chat_ref,
            kind: self.kind,
            display_name: self.display_name,
            source: self.source,
            phase: TaskPhase::Queued,
            engine_handle: None,
            size_bytes: self.size_bytes,
            transferred_bytes: self.transferred_bytes,
            speed_bps: 0,
            eta_seconds: None,
            created_at: self.created_at,
            admitted_at: None,
            last_progress_at: None,
            retry_count: 0,
            boosted: self.boosted,
            error: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> TaskRecord {
        TaskRecord::from_spec(
            Uuid::new_v4(),
            TaskSpec {
                owner_id: 7,
                chat_ref: "chat-7".to_string(),
                kind: EngineKind::Torrent,
                source: "magnet:?xt=urn:btih:abc".to_string(),
                display_name: Some("debian.iso".to_string()),
            },
            Utc::now(),
        )
    }

    #[test]
    fn engine_kinds_map_to_categories() {
        assert_eq!(EngineKind::Torrent.category(), TaskCategory::Download);
        assert_eq!(EngineKind::Usenet.category(), TaskCategory::Download);
        assert_eq!(EngineKind::DirectHttp.category(), TaskCategory::Download);
        assert_eq!(EngineKind::MediaRipper.category(), TaskCategory::Download);
        assert_eq!(EngineKind::CloudUpload.category(), TaskCategory::Upload);
        assert_eq!(EngineKind::VideoUpload.category(), TaskCategory::Upload);
    }

    #[test]
    fn transition_enforces_state_machine() {
        let mut task = record();
        assert!(task.transition(ferry_events::TaskPhase::Completed).is_err());
        task.transition(ferry_events::TaskPhase::Active)
            .expect("queued -> active");
        task.engine_handle = Some(EngineHandle::new("h-1"));
        task.transition(ferry_events::TaskPhase::Completed)
            .expect("active -> completed");
        assert!(task.engine_handle.is_none(), "terminal phase drops handle");

        let err = task
            .transition(ferry_events::TaskPhase::Active)
            .expect_err("terminal is absorbing");
        assert!(matches!(err, TransferError::InvalidTransition { .. }));
    }

    #[test]
    fn progress_tracks_advancement() {
        let mut task = record();
        let t1 = Utc::now();
        task.apply_progress(
            &ProgressReport {
                transferred_bytes: 1_000,
                size_bytes: Some(10_000),
                speed_bps: 500,
                eta_seconds: Some(18),
                complete: false,
            },
            t1,
        );
        assert_eq!(task.last_progress_at, Some(t1));
        assert!((task.percent_complete() - 10.0).abs() < f64::EPSILON);

        // A flat report must not refresh the advancement timestamp.
        let t2 = t1 + chrono::Duration::seconds(5);
        task.apply_progress(
            &ProgressReport {
                transferred_bytes: 1_000,
                size_bytes: Some(10_000),
                speed_bps: 0,
                eta_seconds: None,
                complete: false,
            },
            t2,
        );
        assert_eq!(task.last_progress_at, Some(t1));
    }

    #[test]
    fn progress_never_exceeds_known_size() {
        let mut task = record();
        task.apply_progress(
            &ProgressReport {
                transferred_bytes: 20_000,
                size_bytes: Some(10_000),
                speed_bps: 1,
                eta_seconds: None,
                complete: false,
            },
            Utc::now(),
        );
        assert_eq!(task.transferred_bytes, 10_000);
    }

    #[test]
    fn snapshot_round_trip_requeues() {
        let mut task = record();
        task.transition(ferry_events::TaskPhase::Active)
            .expect("queued -> active");
        task.engine_handle = Some(EngineHandle::new("h-9"));
        task.retry_count = 2;
        task.transferred_bytes = 512;

        let restored = TaskSnapshot::from(&task).into_queued_record();
        assert_eq!(restored.id, task.id);
        assert_eq!(restored.phase, ferry_events::TaskPhase::Queued);
        assert_eq!(restored.created_at, task.created_at);
        assert_eq!(restored.transferred_bytes, 512);
        assert!(restored.engine_handle.is_none());
        assert_eq!(restored.retry_count, 0);
    }
}
