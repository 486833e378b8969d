//! Live task catalog with persistence and event fan-out.
//!
//! The registry is the single writer for task records. Every phase change
//! goes through [`TaskRegistry::transition`], which validates the state
//! machine, persists the updated snapshot, and publishes the change on the
//! event bus. Because a transition into a terminal phase can only succeed
//! once, racing actors (poller completion vs. monitor cancellation) resolve
//! deterministically: the loser observes an invalid transition and backs off.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use ferry_events::{Event, EventBus, TaskPhase};
use ferry_telemetry::Metrics;
use ferry_transfer_core::{
    EngineHandle, PersistenceAdapter, ProgressReport, TaskRecord, TaskSnapshot, TransferError,
};
use tokio::sync::RwLock;
use tracing::warn;
use uuid::Uuid;

use crate::error::{QueueError, QueueResult};

/// Shared catalog of live task records.
pub struct TaskRegistry {
    tasks: RwLock<HashMap<Uuid, TaskRecord>>,
    events: EventBus,
    store: Arc<dyn PersistenceAdapter>,
    metrics: Metrics,
}

impl TaskRegistry {
    /// Construct a registry around the shared bus and snapshot store.
    #[must_use]
    pub fn new(events: EventBus, store: Arc<dyn PersistenceAdapter>, metrics: Metrics) -> Self {
        Self {
            tasks: RwLock::new(HashMap::new()),
            events,
            store,
            metrics,
        }
    }

    /// Insert a new record, persist its snapshot, and announce its phase.
    pub async fn insert(&self, record: TaskRecord) {
        let id = record.id;
        let phase = record.phase;
        let snapshot = TaskSnapshot::from(&record);
        self.tasks.write().await.insert(id, record);
        self.persist(&snapshot).await;
        self.publish(Event::PhaseChanged {
            task_id: id,
            phase,
            message: None,
        });
    }

    /// Fetch a copy of a task record.
    pub async fn get(&self, id: Uuid) -> Option<TaskRecord> {
        self.tasks.read().await.get(&id).cloned()
    }

    /// Copy out every live record.
    pub async fn list(&self) -> Vec<TaskRecord> {
        self.tasks.read().await.values().cloned().collect()
    }

    /// Number of live records.
    pub async fn len(&self) -> usize {
        self.tasks.read().await.len()
    }

    /// Whether the registry holds no records.
    pub async fn is_empty(&self) -> bool {
        self.tasks.read().await.is_empty()
    }

    /// Move a task to `next`, persisting and announcing the change.
    ///
    /// For `Failed` and `Cancelled` the optional message is recorded on the
    /// task as its terminal error detail.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::NotFound`] for unknown tasks and a transfer
    /// error when the state machine forbids the move.
    pub async fn transition(
        &self,
        id: Uuid,
        next: TaskPhase,
        message: Option<String>,
    ) -> QueueResult<TaskRecord> {
        let (snapshot, record) = {
            let mut tasks = self.tasks.write().await;
            let record = tasks
                .get_mut(&id)
                .ok_or(QueueError::NotFound { task_id: id })?;
            record.transition(next)?;
            if matches!(next, TaskPhase::Failed | TaskPhase::Cancelled) {
                record.error.clone_from(&message);
            }
            (TaskSnapshot::from(&*record), record.clone())
        };

        self.persist(&snapshot).await;
        if next.is_terminal() {
            self.metrics.inc_task_finished(next.as_str());
        }
        self.publish(Event::PhaseChanged {
            task_id: id,
            phase: next,
            message,
        });
        Ok(record)
    }

    /// Activate a queued task with the handle its engine returned.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::NotFound`] for unknown tasks and a transfer
    /// error when the task is no longer queued (e.g. cancelled while its
    /// engine start was in flight).
    pub async fn mark_active(&self, id: Uuid, handle: EngineHandle) -> QueueResult<TaskRecord> {
        let (snapshot, record) = {
            let mut tasks = self.tasks.write().await;
            let record = tasks
                .get_mut(&id)
                .ok_or(QueueError::NotFound { task_id: id })?;
            record.transition(TaskPhase::Active)?;
            record.engine_handle = Some(handle);
            if record.admitted_at.is_none() {
                record.admitted_at = Some(Utc::now());
            }
            (TaskSnapshot::from(&*record), record.clone())
        };

        self.persist(&snapshot).await;
        self.publish(Event::PhaseChanged {
            task_id: id,
            phase: TaskPhase::Active,
            message: None,
        });
        Ok(record)
    }

    /// Resume a stalled task whose throughput recovered.
    ///
    /// # Errors
    ///
    /// Propagates registry and state machine failures like
    /// [`TaskRegistry::transition`].
    pub async fn mark_recovered(&self, id: Uuid) -> QueueResult<TaskRecord> {
        self.transition(
            id,
            TaskPhase::Active,
            Some("transfer speed recovered".to_string()),
        )
        .await
    }

    /// Flag a task as priority-boosted, persisting the updated snapshot.
    pub async fn mark_boosted(&self, id: Uuid) {
        let snapshot = {
            let mut tasks = self.tasks.write().await;
            let Some(record) = tasks.get_mut(&id) else {
                return;
            };
            record.boosted = true;
            TaskSnapshot::from(&*record)
        };
        self.persist(&snapshot).await;
    }

    /// Record an engine start attempt, returning the attempts consumed.
    pub async fn note_start_attempt(&self, id: Uuid) -> u32 {
        let mut tasks = self.tasks.write().await;
        tasks.get_mut(&id).map_or(0, |record| {
            record.retry_count += 1;
            record.retry_count
        })
    }

    /// Fold a progress report into a running task.
    ///
    /// Progress updates are frequent and ephemeral, so they neither persist
    /// nor publish; the next phase change captures the latest figures.
    pub async fn apply_progress(
        &self,
        id: Uuid,
        report: &ProgressReport,
    ) -> Option<TaskRecord> {
        let mut tasks = self.tasks.write().await;
        let record = tasks.get_mut(&id)?;
        record.apply_progress(report, Utc::now());
        Some(record.clone())
    }

    /// Publish a non-fatal warning about a task.
    pub fn warn_task(&self, id: Uuid, message: impl Into<String>) {
        self.publish(Event::Warning {
            task_id: id,
            message: message.into(),
        });
    }

    /// Remove a terminal task, delete its snapshot, and announce retirement.
    ///
    /// Unknown ids are a no-op so racing retirements stay harmless.
    pub async fn retire(&self, id: Uuid) -> Option<TaskRecord> {
        let removed = self.tasks.write().await.remove(&id)?;
        if let Err(err) = self.store.delete(id).await {
            warn!(task_id = %id, error = %err, "failed to delete task snapshot");
        }
        self.publish(Event::Retired {
            task_id: id,
            phase: removed.phase,
        });
        Some(removed)
    }

    /// Load every incomplete snapshot from the store.
    ///
    /// # Errors
    ///
    /// Propagates store failures.
    pub async fn load_saved(&self) -> anyhow::Result<Vec<TaskSnapshot>> {
        self.store.load_incomplete().await
    }

    /// The shared event bus.
    #[must_use]
    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Whether an error is the benign "lost the terminal race" case.
    #[must_use]
    pub fn lost_transition_race(err: &QueueError) -> bool {
        matches!(
            err,
            QueueError::Transfer(TransferError::InvalidTransition { .. })
        )
    }

    fn publish(&self, event: Event) {
        self.metrics.inc_event(event.kind());
        self.events.publish(event);
    }

    async fn persist(&self, snapshot: &TaskSnapshot) {
        if let Err(err) = self.store.save(snapshot).await {
            warn!(task_id = %snapshot.id, error = %err, "failed to persist task snapshot");
        }
    }
}
