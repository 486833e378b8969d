//! Scripted fakes for engines, snapshot stores, and resource samplers.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use anyhow::{anyhow, bail};
use async_trait::async_trait;
use ferry_queue::{ResourceSample, ResourceSampler};
use ferry_transfer_core::{
    EngineAdapter, EngineHandle, EngineKind, PersistenceAdapter, ProgressReport, TaskSnapshot,
    TaskSpec,
};
use uuid::Uuid;

/// Engine adapter whose behaviour is scripted by the test.
pub struct ScriptedEngine {
    kind: EngineKind,
    start_failures: AtomicU32,
    start_delay: Mutex<Option<Duration>>,
    progress_failing: AtomicBool,
    cancel_delay: Mutex<Option<Duration>>,
    reports: Mutex<VecDeque<ProgressReport>>,
    current_report: Mutex<ProgressReport>,
    started: Mutex<Vec<Uuid>>,
    cancelled: Mutex<Vec<EngineHandle>>,
}

impl ScriptedEngine {
    /// A well-behaved engine of the given kind.
    #[must_use]
    pub fn new(kind: EngineKind) -> Self {
        Self {
            kind,
            start_failures: AtomicU32::new(0),
            start_delay: Mutex::new(None),
            progress_failing: AtomicBool::new(false),
            cancel_delay: Mutex::new(None),
            reports: Mutex::new(VecDeque::new()),
            current_report: Mutex::new(ProgressReport::default()),
            started: Mutex::new(Vec::new()),
            cancelled: Mutex::new(Vec::new()),
        }
    }

    /// Fail the next `count` start calls before succeeding.
    pub fn fail_next_starts(&self, count: u32) {
        self.start_failures.store(count, Ordering::SeqCst);
    }

    /// Delay the next start call by `delay`. One-shot.
    ///
    /// # Panics
    ///
    /// Panics if an earlier test panic poisoned the internal lock.
    pub fn set_start_delay(&self, delay: Duration) {
        *self.start_delay.lock().expect("start delay poisoned") = Some(delay);
    }

    /// Make every progress poll error until cleared.
    pub fn set_progress_failing(&self, failing: bool) {
        self.progress_failing.store(failing, Ordering::SeqCst);
    }

    /// Delay cancellation acknowledgements by `delay`.
    ///
    /// # Panics
    ///
    /// Panics if an earlier test panic poisoned the internal lock.
    pub fn set_cancel_delay(&self, delay: Duration) {
        *self.cancel_delay.lock().expect("cancel delay poisoned") = Some(delay);
    }

    /// Queue a one-shot report; polls drain these before the steady report.
    ///
    /// # Panics
    ///
    /// Panics if an earlier test panic poisoned the internal lock.
    pub fn push_report(&self, report: ProgressReport) {
        self.reports.lock().expect("reports poisoned").push_back(report);
    }

    /// Set the steady report returned once queued reports are drained.
    ///
    /// # Panics
    ///
    /// Panics if an earlier test panic poisoned the internal lock.
    pub fn set_report(&self, report: ProgressReport) {
        *self.current_report.lock().expect("report poisoned") = report;
    }

    /// Task ids this engine has started.
    ///
    /// # Panics
    ///
    /// Panics if an earlier test panic poisoned the internal lock.
    #[must_use]
    pub fn started(&self) -> Vec<Uuid> {
        self.started.lock().expect("started poisoned").clone()
    }

    /// Handles this engine has been asked to cancel.
    ///
    /// # Panics
    ///
    /// Panics if an earlier test panic poisoned the internal lock.
    #[must_use]
    pub fn cancelled(&self) -> Vec<EngineHandle> {
        self.cancelled.lock().expect("cancelled poisoned").clone()
    }
}

#[async_trait]
impl EngineAdapter for ScriptedEngine {
    fn kind(&self) -> EngineKind {
        self.kind
    }

    async fn start(&self, task_id: Uuid, _spec: &TaskSpec) -> anyhow::Result<EngineHandle> {
        let delay = self
            .start_delay
            .lock()
            .map_err(|_| anyhow!("start delay poisoned"))?
            .take();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let remaining = self.start_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.start_failures.store(remaining - 1, Ordering::SeqCst);
            bail!("scripted start failure");
        }
        self.started
            .lock()
            .map_err(|_| anyhow!("started poisoned"))?
            .push(task_id);
        Ok(EngineHandle::new(format!("handle-{task_id}")))
    }

    async fn progress(&self, _handle: &EngineHandle) -> anyhow::Result<ProgressReport> {
        if self.progress_failing.load(Ordering::SeqCst) {
            bail!("scripted progress failure");
        }
        let queued = self
            .reports
            .lock()
            .map_err(|_| anyhow!("reports poisoned"))?
            .pop_front();
        match queued {
            Some(report) => Ok(report),
            None => Ok(*self
                .current_report
                .lock()
                .map_err(|_| anyhow!("report poisoned"))?),
        }
    }

    async fn cancel(&self, handle: &EngineHandle) -> anyhow::Result<()> {
        let delay = *self
            .cancel_delay
            .lock()
            .map_err(|_| anyhow!("cancel delay poisoned"))?;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.cancelled
            .lock()
            .map_err(|_| anyhow!("cancelled poisoned"))?
            .push(handle.clone());
        Ok(())
    }
}

/// In-memory snapshot store.
#[derive(Default)]
pub struct MemoryStore {
    snapshots: Mutex<HashMap<Uuid, TaskSnapshot>>,
}

impl MemoryStore {
    /// An empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-load a snapshot, as if written by a previous process.
    ///
    /// # Panics
    ///
    /// Panics if an earlier test panic poisoned the internal lock.
    pub fn seed(&self, snapshot: TaskSnapshot) {
        self.snapshots
            .lock()
            .expect("snapshots poisoned")
            .insert(snapshot.id, snapshot);
    }

    /// Fetch the stored snapshot for a task, if any.
    ///
    /// # Panics
    ///
    /// Panics if an earlier test panic poisoned the internal lock.
    #[must_use]
    pub fn get(&self, id: Uuid) -> Option<TaskSnapshot> {
        self.snapshots
            .lock()
            .expect("snapshots poisoned")
            .get(&id)
            .cloned()
    }

    /// Number of stored snapshots.
    ///
    /// # Panics
    ///
    /// Panics if an earlier test panic poisoned the internal lock.
    #[must_use]
    pub fn len(&self) -> usize {
        self.snapshots.lock().expect("snapshots poisoned").len()
    }

    /// Whether the store is empty.
    ///
    /// # Panics
    ///
    /// Panics if an earlier test panic poisoned the internal lock.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl PersistenceAdapter for MemoryStore {
    async fn save(&self, snapshot: &TaskSnapshot) -> anyhow::Result<()> {
        self.snapshots
            .lock()
            .map_err(|_| anyhow!("snapshots poisoned"))?
            .insert(snapshot.id, snapshot.clone());
        Ok(())
    }

    async fn delete(&self, task_id: Uuid) -> anyhow::Result<()> {
        self.snapshots
            .lock()
            .map_err(|_| anyhow!("snapshots poisoned"))?
            .remove(&task_id);
        Ok(())
    }

    async fn load_incomplete(&self) -> anyhow::Result<Vec<TaskSnapshot>> {
        Ok(self
            .snapshots
            .lock()
            .map_err(|_| anyhow!("snapshots poisoned"))?
            .values()
            .filter(|snapshot| !snapshot.phase.is_terminal())
            .cloned()
            .collect())
    }
}

/// Resource sampler returning whatever the test sets.
pub struct StaticSampler {
    sample: Mutex<ResourceSample>,
}

impl StaticSampler {
    /// A sampler reporting the given utilisation.
    #[must_use]
    pub fn new(cpu_pct: f32, memory_pct: f32) -> Self {
        Self {
            sample: Mutex::new(ResourceSample {
                cpu_pct,
                memory_pct,
            }),
        }
    }

    /// Change the reported utilisation.
    ///
    /// # Panics
    ///
    /// Panics if an earlier test panic poisoned the internal lock.
    pub fn set(&self, cpu_pct: f32, memory_pct: f32) {
        *self.sample.lock().expect("sample poisoned") = ResourceSample {
            cpu_pct,
            memory_pct,
        };
    }
}

impl ResourceSampler for StaticSampler {
    fn sample(&self) -> ResourceSample {
        self.sample
            .lock()
            .map_or(ResourceSample::default(), |sample| *sample)
    }
}
