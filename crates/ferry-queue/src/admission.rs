//! Admission control: quotas, slot accounting, and queued promotion.
//!
//! Slot counters follow a reserve-then-start discipline. A promotion
//! reserves the slot under the state lock, then starts the engine with the
//! lock released so a slow backend never blocks other admissions. If the
//! start ultimately fails the reservation is rolled back and the next
//! queued candidate is promoted.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use anyhow::anyhow;
use chrono::{DateTime, NaiveDate, Utc};
use ferry_config::{EngineConfig, LimitsConfig};
use ferry_events::{Event, EventBus, TaskPhase};
use ferry_telemetry::Metrics;
use ferry_transfer_core::{TaskCategory, TaskRecord, TaskSpec};
use tokio::sync::Mutex;
use tracing::{info, warn};
use uuid::Uuid;

use crate::engines::EngineSet;
use crate::error::{QueueError, QueueResult};
use crate::registry::TaskRegistry;

/// Whether a force-start request got a slot right away.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForceStartOutcome {
    /// A slot was free; the task is starting.
    Admitted,
    /// All slots are busy; the task now heads its category queue.
    StillQueued,
}

#[derive(Clone, Copy, Default)]
struct DailyBytes {
    day: NaiveDate,
    download: u64,
    upload: u64,
}

impl DailyBytes {
    const fn for_category(&self, category: TaskCategory) -> u64 {
        match category {
            TaskCategory::Download => self.download,
            TaskCategory::Upload => self.upload,
        }
    }
}

#[derive(Default)]
struct AdmissionState {
    download_queue: VecDeque<Uuid>,
    upload_queue: VecDeque<Uuid>,
    active: HashMap<Uuid, TaskCategory>,
    live_per_owner: HashMap<i64, u32>,
    live_total: u32,
    daily: HashMap<i64, (NaiveDate, u32)>,
    daily_bytes: HashMap<i64, DailyBytes>,
    last_submitted: HashMap<i64, DateTime<Utc>>,
    paused: bool,
}

impl AdmissionState {
    fn queue_mut(&mut self, category: TaskCategory) -> &mut VecDeque<Uuid> {
        match category {
            TaskCategory::Download => &mut self.download_queue,
            TaskCategory::Upload => &mut self.upload_queue,
        }
    }

    fn active_count(&self, category: TaskCategory) -> u32 {
        u32::try_from(
            self.active
                .values()
                .filter(|slot| **slot == category)
                .count(),
        )
        .unwrap_or(u32::MAX)
    }

    fn active_total(&self) -> u32 {
        u32::try_from(self.active.len()).unwrap_or(u32::MAX)
    }

    fn has_capacity(&self, limits: &LimitsConfig, category: TaskCategory) -> bool {
        if limits.limit_all > 0 && self.active_total() >= limits.limit_all {
            return false;
        }
        let cap = match category {
            TaskCategory::Download => limits.limit_download,
            TaskCategory::Upload => limits.limit_upload,
        };
        cap == 0 || self.active_count(category) < cap
    }

    fn queue_depth(&self) -> usize {
        self.download_queue.len() + self.upload_queue.len()
    }

    fn drop_queued(&mut self, id: Uuid) {
        self.download_queue.retain(|queued| *queued != id);
        self.upload_queue.retain(|queued| *queued != id);
    }

    fn release_live(&mut self, owner_id: i64) {
        self.live_total = self.live_total.saturating_sub(1);
        match self.live_per_owner.get_mut(&owner_id) {
            Some(count) if *count > 1 => *count -= 1,
            Some(_) => {
                self.live_per_owner.remove(&owner_id);
            }
            None => {}
        }
    }
}

/// Gatekeeper deciding which tasks run now and which wait.
pub struct AdmissionController {
    limits: LimitsConfig,
    engine_cfg: EngineConfig,
    registry: Arc<TaskRegistry>,
    engines: Arc<EngineSet>,
    events: EventBus,
    metrics: Metrics,
    state: Mutex<AdmissionState>,
}

impl AdmissionController {
    /// Construct a controller over the shared registry and adapter set.
    #[must_use]
    pub fn new(
        limits: LimitsConfig,
        engine_cfg: EngineConfig,
        registry: Arc<TaskRegistry>,
        engines: Arc<EngineSet>,
        metrics: Metrics,
    ) -> Self {
        let events = registry.events().clone();
        Self {
            limits,
            engine_cfg,
            registry,
            engines,
            events,
            metrics,
            state: Mutex::new(AdmissionState::default()),
        }
    }

    /// Submit a task through the normal quota checks.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::UnknownEngine`] when no adapter serves the
    /// requested kind and [`QueueError::TooManyTasks`] when a quota fires.
    /// A full slot table is not an error; the task queues.
    pub async fn submit(&self, spec: TaskSpec) -> QueueResult<Uuid> {
        self.engines.get(spec.kind)?;

        let id = Uuid::new_v4();
        let category = spec.kind.category();
        let owner_id = spec.owner_id;
        let now = Utc::now();
        let today = now.date_naive();

        {
            let mut state = self.state.lock().await;
            self.check_quotas(&state, owner_id, category, now, today)?;
            state.live_total += 1;
            *state.live_per_owner.entry(owner_id).or_insert(0) += 1;
            let daily = state.daily.entry(owner_id).or_insert((today, 0));
            if daily.0 == today {
                daily.1 += 1;
            } else {
                *daily = (today, 1);
            }
            state.last_submitted.insert(owner_id, now);
            // The record must be visible before the id is queued, or a
            // racing promotion could pop an id the registry cannot resolve.
            self.registry.insert(TaskRecord::from_spec(id, spec, now)).await;
            state.queue_mut(category).push_back(id);
        }

        self.metrics.inc_task_submitted();
        self.refresh_gauges().await;

        self.promote().await;
        Ok(id)
    }

    /// Boost a queued task to the front of its category queue and retry
    /// admission. Quotas still apply; the boost never reorders other
    /// categories.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::NotFound`] when the task is unknown.
    pub async fn force_start(&self, id: Uuid) -> QueueResult<ForceStartOutcome> {
        let record = self
            .registry
            .get(id)
            .await
            .ok_or(QueueError::NotFound { task_id: id })?;
        if record.phase != TaskPhase::Queued {
            return Ok(ForceStartOutcome::Admitted);
        }

        let category = record.category();
        self.registry.mark_boosted(id).await;

        let claimed = {
            let mut state = self.state.lock().await;
            let queue = state.queue_mut(category);
            if queue.contains(&id) {
                queue.retain(|queued| *queued != id);
                queue.push_front(id);
                if !state.paused && state.has_capacity(&self.limits, category) {
                    state.queue_mut(category).pop_front();
                    state.active.insert(id, category);
                    Some(true)
                } else {
                    Some(false)
                }
            } else {
                // A racing promotion already reserved the slot.
                None
            }
        };

        match claimed {
            Some(true) => {
                self.start_task(id).await;
                // If the start exhausted its retries the freed slot still
                // needs a promotion pass.
                self.promote().await;
                Ok(ForceStartOutcome::Admitted)
            }
            Some(false) => Ok(ForceStartOutcome::StillQueued),
            None => Ok(ForceStartOutcome::Admitted),
        }
    }

    /// Charge completed transfer volume against the owner's daily byte
    /// budget.
    pub async fn note_completed_bytes(&self, owner_id: i64, category: TaskCategory, bytes: u64) {
        let today = Utc::now().date_naive();
        let mut state = self.state.lock().await;
        let entry = state.daily_bytes.entry(owner_id).or_default();
        if entry.day != today {
            *entry = DailyBytes {
                day: today,
                ..DailyBytes::default()
            };
        }
        match category {
            TaskCategory::Download => entry.download = entry.download.saturating_add(bytes),
            TaskCategory::Upload => entry.upload = entry.upload.saturating_add(bytes),
        }
    }

    fn check_quotas(
        &self,
        state: &AdmissionState,
        owner_id: i64,
        category: TaskCategory,
        now: DateTime<Utc>,
        today: NaiveDate,
    ) -> QueueResult<()> {
        if self.limits.bot_max_tasks > 0 && state.live_total >= self.limits.bot_max_tasks {
            return Err(QueueError::TooManyTasks {
                owner_id,
                scope: "bot",
            });
        }
        if self.limits.user_max_tasks > 0
            && state.live_per_owner.get(&owner_id).copied().unwrap_or(0)
                >= self.limits.user_max_tasks
        {
            return Err(QueueError::TooManyTasks {
                owner_id,
                scope: "user",
            });
        }
        if self.limits.user_time_interval_secs > 0 {
            let throttled = state.last_submitted.get(&owner_id).is_some_and(|last| {
                let elapsed = now.signed_duration_since(*last).num_seconds();
                elapsed < i64::try_from(self.limits.user_time_interval_secs).unwrap_or(i64::MAX)
            });
            if throttled {
                return Err(QueueError::TooManyTasks {
                    owner_id,
                    scope: "interval",
                });
            }
        }
        if self.limits.daily_task_limit > 0 {
            let used = match state.daily.get(&owner_id) {
                Some((day, count)) if *day == today => *count,
                _ => 0,
            };
            if used >= self.limits.daily_task_limit {
                return Err(QueueError::TooManyTasks {
                    owner_id,
                    scope: "daily",
                });
            }
        }
        let byte_limit = match category {
            TaskCategory::Download => self.limits.daily_download_bytes,
            TaskCategory::Upload => self.limits.daily_upload_bytes,
        };
        if byte_limit > 0 {
            let used = match state.daily_bytes.get(&owner_id) {
                Some(entry) if entry.day == today => entry.for_category(category),
                _ => 0,
            };
            if used >= byte_limit {
                return Err(QueueError::TooManyTasks {
                    owner_id,
                    scope: "daily_bytes",
                });
            }
        }
        Ok(())
    }

    /// Adopt a task restored from a persisted snapshot.
    ///
    /// Restored tasks re-enter the queue with their original submission
    /// order preserved by the caller; they count toward live quotas but not
    /// toward today's daily submissions.
    pub async fn adopt(&self, record: TaskRecord) {
        let id = record.id;
        let category = record.category();
        let owner_id = record.owner_id;
        {
            let mut state = self.state.lock().await;
            state.live_total += 1;
            *state.live_per_owner.entry(owner_id).or_insert(0) += 1;
            self.registry.insert(record).await;
            state.queue_mut(category).push_back(id);
        }
        self.refresh_gauges().await;
    }

    /// Promote queued tasks while free slots remain.
    pub async fn promote(&self) {
        loop {
            let candidate = {
                let mut state = self.state.lock().await;
                if state.paused {
                    None
                } else {
                    self.pick_candidate(&mut state)
                }
            };
            let Some(id) = candidate else {
                break;
            };
            self.start_task(id).await;
        }
        self.refresh_gauges().await;
    }

    fn pick_candidate(&self, state: &mut AdmissionState) -> Option<Uuid> {
        for category in [TaskCategory::Download, TaskCategory::Upload] {
            if state.queue_mut(category).front().is_some()
                && state.has_capacity(&self.limits, category)
            {
                let id = state.queue_mut(category).pop_front()?;
                state.active.insert(id, category);
                return Some(id);
            }
        }
        None
    }

    /// Start the engine for a reserved task, rolling the slot back on failure.
    async fn start_task(&self, id: Uuid) {
        let Some(record) = self.registry.get(id).await else {
            self.release_slot(id).await;
            return;
        };
        if record.phase != TaskPhase::Queued {
            self.release_slot(id).await;
            return;
        }

        let engine = match self.engines.get(record.kind) {
            Ok(engine) => engine,
            Err(err) => {
                warn!(task_id = %id, error = %err, "engine adapter vanished before start");
                self.fail_task(id, "engine adapter unavailable").await;
                return;
            }
        };

        let spec = TaskSpec {
            owner_id: record.owner_id,
            chat_ref: record.chat_ref.clone(),
            kind: record.kind,
            source: record.source.clone(),
            display_name: record.display_name.clone(),
        };

        let attempts = self.engine_cfg.start_retry_limit;
        for attempt in 1..=attempts {
            let consumed = self.registry.note_start_attempt(id).await;
            let started =
                match tokio::time::timeout(self.engine_cfg.start_timeout(), engine.start(id, &spec))
                    .await
                {
                    Ok(result) => result,
                    Err(_) => Err(anyhow!("engine start timed out")),
                };
            match started {
                Ok(handle) => match self.registry.mark_active(id, handle.clone()).await {
                    Ok(_) => {
                        info!(task_id = %id, kind = %record.kind, attempt, "task admitted");
                        return;
                    }
                    Err(err) => {
                        // Task left the queued phase while the start was in
                        // flight; undo the engine-side work.
                        if TaskRegistry::lost_transition_race(&err) {
                            if let Err(cancel_err) = engine.cancel(&handle).await {
                                warn!(
                                    task_id = %id,
                                    error = %cancel_err,
                                    "failed to roll back engine start"
                                );
                            }
                        }
                        self.release_slot(id).await;
                        return;
                    }
                },
                Err(err) => {
                    warn!(
                        task_id = %id,
                        attempt = consumed,
                        error = %err,
                        "engine start attempt failed"
                    );
                    if attempt < attempts {
                        self.metrics.inc_engine_start_retry();
                        let backoff =
                            self.engine_cfg.start_retry_backoff() * 2_u32.saturating_pow(attempt - 1);
                        tokio::time::sleep(backoff).await;
                    }
                }
            }
        }

        self.fail_task(id, "engine start failed after retries").await;
    }

    async fn fail_task(&self, id: Uuid, message: &str) {
        match self
            .registry
            .transition(id, TaskPhase::Failed, Some(message.to_string()))
            .await
        {
            Ok(record) => {
                // The surrounding promote loop picks the next candidate, so
                // releasing here must not promote again.
                self.release_all(id, record.owner_id).await;
                self.registry.retire(id).await;
            }
            Err(_) => self.release_slot(id).await,
        }
    }

    /// Release every admission resource held by a terminal task and promote
    /// queued work into the freed slot.
    ///
    /// Called exactly once, by whichever actor won the terminal transition.
    pub async fn finalize(&self, id: Uuid, owner_id: i64) {
        self.release_all(id, owner_id).await;
        self.promote().await;
    }

    async fn release_all(&self, id: Uuid, owner_id: i64) {
        {
            let mut state = self.state.lock().await;
            state.active.remove(&id);
            state.drop_queued(id);
            state.release_live(owner_id);
        }
        self.refresh_gauges().await;
    }

    /// Drop a slot reservation without touching live quotas.
    async fn release_slot(&self, id: Uuid) {
        self.state.lock().await.active.remove(&id);
        self.refresh_gauges().await;
    }

    /// Stop admitting queued tasks. Running tasks are unaffected.
    pub async fn pause(&self, reason: &str) {
        let newly_paused = {
            let mut state = self.state.lock().await;
            let changed = !state.paused;
            state.paused = true;
            changed
        };
        if newly_paused {
            warn!(reason, "admissions paused");
            self.metrics.inc_admission_pause();
            self.metrics.inc_event("admissions_paused");
            self.events.publish(Event::AdmissionsPaused {
                reason: reason.to_string(),
            });
        }
    }

    /// Resume admissions and immediately promote queued work.
    pub async fn resume(&self) {
        let newly_resumed = {
            let mut state = self.state.lock().await;
            let changed = state.paused;
            state.paused = false;
            changed
        };
        if newly_resumed {
            info!("admissions resumed");
            self.metrics.inc_event("admissions_resumed");
            self.events.publish(Event::AdmissionsResumed);
            self.promote().await;
        }
    }

    /// Whether the admission gate is currently closed.
    pub async fn is_paused(&self) -> bool {
        self.state.lock().await.paused
    }

    async fn refresh_gauges(&self) {
        let (queued, downloads, uploads) = {
            let state = self.state.lock().await;
            (
                state.queue_depth(),
                state.active_count(TaskCategory::Download),
                state.active_count(TaskCategory::Upload),
            )
        };
        self.metrics
            .set_queue_depth(i64::try_from(queued).unwrap_or(i64::MAX));
        self.metrics.set_active_downloads(i64::from(downloads));
        self.metrics.set_active_uploads(i64::from(uploads));
    }
}
