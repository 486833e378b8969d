//! Periodic progress polling with bounded concurrency.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use ferry_events::TaskPhase;
use ferry_telemetry::Metrics;
use ferry_transfer_core::ProgressReport;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::MissedTickBehavior;
use tracing::warn;
use uuid::Uuid;

use crate::admission::AdmissionController;
use crate::cancel::{CancelCoordinator, CancelReason};
use crate::engines::EngineSet;
use crate::registry::TaskRegistry;

/// Polls running engines for progress and drives task completion.
pub struct ProgressPoller {
    registry: Arc<TaskRegistry>,
    engines: Arc<EngineSet>,
    cancel: Arc<CancelCoordinator>,
    admission: Arc<AdmissionController>,
    metrics: Metrics,
    poll_interval: Duration,
    progress_timeout: Duration,
    failure_limit: u32,
    concurrency: usize,
    failures: Mutex<HashMap<Uuid, u32>>,
}

impl ProgressPoller {
    /// Construct a poller over the shared components.
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        registry: Arc<TaskRegistry>,
        engines: Arc<EngineSet>,
        cancel: Arc<CancelCoordinator>,
        admission: Arc<AdmissionController>,
        metrics: Metrics,
        poll_interval: Duration,
        progress_timeout: Duration,
        failure_limit: u32,
        concurrency: usize,
    ) -> Self {
        Self {
            registry,
            engines,
            cancel,
            admission,
            metrics,
            poll_interval,
            progress_timeout,
            failure_limit,
            concurrency,
            failures: Mutex::new(HashMap::new()),
        }
    }

    /// Spawn the polling loop on the runtime.
    pub fn spawn(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.poll_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                self.sweep().await;
            }
        })
    }

    /// Poll every running task once.
    ///
    /// Polls fan out through a semaphore so a large active set cannot flood
    /// a backend, and each poll carries its own timeout so one hung engine
    /// never blocks the sweep.
    pub async fn sweep(&self) {
        let targets: Vec<_> = self
            .registry
            .list()
            .await
            .into_iter()
            .filter(|record| record.phase.holds_engine_handle())
            .filter_map(|record| {
                record
                    .engine_handle
                    .clone()
                    .map(|handle| (record.id, record.kind, handle))
            })
            .collect();

        {
            // Tasks that retired since the last sweep no longer need a
            // failure history.
            let live: Vec<Uuid> = targets.iter().map(|(id, _, _)| *id).collect();
            self.failures
                .lock()
                .await
                .retain(|id, _| live.contains(id));
        }

        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut polls = JoinSet::new();
        for (id, kind, handle) in targets {
            let Ok(engine) = self.engines.get(kind) else {
                continue;
            };
            let semaphore = semaphore.clone();
            let poll_timeout = self.progress_timeout;
            polls.spawn(async move {
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    return (id, Err(anyhow!("poll semaphore closed")));
                };
                let outcome = match tokio::time::timeout(poll_timeout, engine.progress(&handle))
                    .await
                {
                    Ok(Ok(report)) => Ok(report),
                    Ok(Err(err)) => Err(err),
                    Err(_) => Err(anyhow!("progress poll timed out")),
                };
                (id, outcome)
            });
        }

        while let Some(joined) = polls.join_next().await {
            let Ok((id, outcome)) = joined else {
                continue;
            };
            match outcome {
                Ok(report) => self.on_report(id, &report).await,
                Err(err) => self.on_failure(id, &err).await,
            }
        }
    }

    async fn on_report(&self, id: Uuid, report: &ProgressReport) {
        self.failures.lock().await.remove(&id);
        let Some(updated) = self.registry.apply_progress(id, report).await else {
            return;
        };
        // An engine may report every byte moved without raising its own
        // completion flag; either signal finishes the task.
        let finished = report.complete
            || updated
                .size_bytes
                .is_some_and(|size| size > 0 && updated.transferred_bytes >= size);
        if finished {
            // A stalled task must pass back through the active phase before
            // it can complete.
            if updated.phase == TaskPhase::Stalled {
                let _ = self.registry.mark_recovered(id).await;
            }
            self.complete(id).await;
        }
    }

    async fn on_failure(&self, id: Uuid, err: &anyhow::Error) {
        self.metrics.inc_progress_poll_failure();
        let count = {
            let mut failures = self.failures.lock().await;
            let entry = failures.entry(id).or_insert(0);
            *entry += 1;
            *entry
        };
        warn!(task_id = %id, failures = count, error = %err, "progress poll failed");
        if count >= self.failure_limit {
            self.failures.lock().await.remove(&id);
            if let Err(cancel_err) = self.cancel.cancel(id, CancelReason::EngineUnreachable).await
            {
                warn!(task_id = %id, error = %cancel_err, "failed to fail unreachable task");
            }
        }
    }

    async fn complete(&self, id: Uuid) {
        match self.registry.transition(id, TaskPhase::Completed, None).await {
            Ok(record) => {
                self.admission
                    .note_completed_bytes(record.owner_id, record.category(), record.transferred_bytes)
                    .await;
                self.admission.finalize(id, record.owner_id).await;
                self.registry.retire(id).await;
            }
            Err(err) if TaskRegistry::lost_transition_race(&err) => {}
            Err(err) => warn!(task_id = %id, error = %err, "failed to complete task"),
        }
    }
}
