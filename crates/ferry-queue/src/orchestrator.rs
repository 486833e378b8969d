//! Facade wiring the queue components together.

use std::sync::Arc;

use ferry_config::FerryConfig;
use ferry_events::{EventBus, EventId, EventStream, TaskPhase};
use ferry_telemetry::Metrics;
use ferry_transfer_core::{PersistenceAdapter, TaskRecord, TaskSpec};
use tokio::task::JoinHandle;
use tracing::info;
use uuid::Uuid;

use crate::admission::{AdmissionController, ForceStartOutcome};
use crate::cancel::{CancelCoordinator, CancelReason};
use crate::engines::EngineSet;
use crate::error::QueueResult;
use crate::monitor::HealthMonitor;
use crate::poller::ProgressPoller;
use crate::registry::TaskRegistry;
use crate::resource::{ResourceSampler, SystemSampler};
use crate::status::{PageCursor, StatusAggregator, StatusPage, StatusSummary, TaskFilter};

/// The assembled queue engine.
///
/// Owns the registry, admission controller, poller, and monitor, and exposes
/// the operations callers interact with: submit, cancel, status, restore.
pub struct QueueEngine {
    registry: Arc<TaskRegistry>,
    admission: Arc<AdmissionController>,
    cancel: Arc<CancelCoordinator>,
    poller: Arc<ProgressPoller>,
    monitor: Option<Arc<HealthMonitor>>,
    status: StatusAggregator,
}

impl QueueEngine {
    /// Assemble an engine sampling the local host for resource pressure.
    #[must_use]
    pub fn new(
        config: &FerryConfig,
        engines: EngineSet,
        store: Arc<dyn PersistenceAdapter>,
        metrics: Metrics,
    ) -> Self {
        Self::with_sampler(config, engines, store, metrics, Arc::new(SystemSampler::new()))
    }

    /// Assemble an engine with a caller-provided resource sampler.
    #[must_use]
    pub fn with_sampler(
        config: &FerryConfig,
        engines: EngineSet,
        store: Arc<dyn PersistenceAdapter>,
        metrics: Metrics,
        sampler: Arc<dyn ResourceSampler>,
    ) -> Self {
        let events = EventBus::new();
        let engines = Arc::new(engines);
        let registry = Arc::new(TaskRegistry::new(events, store, metrics.clone()));
        let admission = Arc::new(AdmissionController::new(
            config.limits.clone(),
            config.engine.clone(),
            registry.clone(),
            engines.clone(),
            metrics.clone(),
        ));
        let cancel = Arc::new(CancelCoordinator::new(
            registry.clone(),
            engines.clone(),
            admission.clone(),
            config.engine.cancel_ack_timeout(),
        ));
        let poller = Arc::new(ProgressPoller::new(
            registry.clone(),
            engines,
            cancel.clone(),
            admission.clone(),
            metrics,
            config.status.update_interval(),
            config.engine.progress_timeout(),
            config.engine.progress_failure_limit,
            config.engine.poll_concurrency,
        ));
        let monitor = config.monitor.enabled.then(|| {
            Arc::new(HealthMonitor::new(
                registry.clone(),
                cancel.clone(),
                admission.clone(),
                sampler,
                config.monitor.clone(),
            ))
        });
        let status = StatusAggregator::new(registry.clone(), config.status.status_limit);

        Self {
            registry,
            admission,
            cancel,
            poller,
            monitor,
            status,
        }
    }

    /// Requeue every incomplete task left over from a previous run.
    ///
    /// Snapshots re-enter the queue in their original submission order and
    /// compete for slots like fresh work.
    ///
    /// # Errors
    ///
    /// Propagates snapshot store failures.
    pub async fn restore(&self) -> anyhow::Result<usize> {
        let mut snapshots = self.registry.load_saved().await?;
        snapshots.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        let count = snapshots.len();
        for snapshot in snapshots {
            self.admission.adopt(snapshot.into_queued_record()).await;
        }
        if count > 0 {
            info!(count, "restored incomplete tasks");
        }
        self.admission.promote().await;
        Ok(count)
    }

    /// Spawn the background poller and monitor loops.
    pub fn spawn_workers(&self) -> Vec<JoinHandle<()>> {
        let mut workers = vec![self.poller.clone().spawn()];
        if let Some(monitor) = &self.monitor {
            workers.push(monitor.clone().spawn());
        }
        workers
    }

    /// Submit a task through the normal quota checks.
    ///
    /// # Errors
    ///
    /// Propagates admission failures; see [`AdmissionController::submit`].
    pub async fn submit(&self, spec: TaskSpec) -> QueueResult<Uuid> {
        self.admission.submit(spec).await
    }

    /// Boost a queued task to the front of its category queue.
    ///
    /// # Errors
    ///
    /// Propagates admission failures; see
    /// [`AdmissionController::force_start`].
    pub async fn force_start(&self, id: Uuid) -> QueueResult<ForceStartOutcome> {
        self.admission.force_start(id).await
    }

    /// Cancel a task at the owner's request.
    ///
    /// # Errors
    ///
    /// Propagates cancellation failures; see [`CancelCoordinator::cancel`].
    pub async fn cancel(&self, id: Uuid) -> QueueResult<TaskPhase> {
        self.cancel.cancel(id, CancelReason::UserRequested).await
    }

    /// Fetch a copy of a live task record.
    pub async fn task(&self, id: Uuid) -> Option<TaskRecord> {
        self.registry.get(id).await
    }

    /// Produce one page of matching tasks.
    pub async fn status_page(
        &self,
        filter: TaskFilter,
        cursor: Option<PageCursor>,
        page_size: Option<u32>,
    ) -> StatusPage {
        self.status.page(filter, cursor, page_size).await
    }

    /// Aggregate phase counts over the live registry.
    pub async fn summary(&self) -> StatusSummary {
        self.status.summary().await
    }

    /// Subscribe to lifecycle events, replaying anything newer than `since`.
    #[must_use]
    pub fn subscribe(&self, since: Option<EventId>) -> EventStream {
        self.registry.events().subscribe(since)
    }

    /// Whether the admission gate is currently closed.
    pub async fn admissions_paused(&self) -> bool {
        self.admission.is_paused().await
    }

    /// Run one progress sweep immediately instead of waiting for the timer.
    pub async fn poll_now(&self) {
        self.poller.sweep().await;
    }

    /// Run one monitor sweep immediately instead of waiting for the timer.
    pub async fn monitor_now(&self) {
        if let Some(monitor) = &self.monitor {
            monitor.sweep().await;
        }
    }
}
