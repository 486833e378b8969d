//! Cancellation coordination across registry, engines, and admission.

use std::sync::Arc;
use std::time::Duration;

use ferry_events::TaskPhase;
use ferry_transfer_core::EngineHandle;
use tokio::time::timeout;
use tracing::{info, warn};
use uuid::Uuid;

use crate::admission::AdmissionController;
use crate::engines::EngineSet;
use crate::error::{QueueError, QueueResult};
use crate::registry::TaskRegistry;

/// Why a task is being terminated early.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelReason {
    /// The owner asked for the task to stop.
    UserRequested,
    /// The monitor gave up on a stalled transfer.
    Stalled,
    /// The task exceeded its maximum total runtime.
    TimedOut,
    /// The engine stopped answering progress polls.
    EngineUnreachable,
}

impl CancelReason {
    /// Terminal phase the task lands in for this reason.
    ///
    /// Infrastructure faults surface as failures; everything else is a
    /// cancellation.
    #[must_use]
    pub const fn target_phase(self) -> TaskPhase {
        match self {
            Self::EngineUnreachable => TaskPhase::Failed,
            Self::UserRequested | Self::Stalled | Self::TimedOut => TaskPhase::Cancelled,
        }
    }

    /// Human-readable detail recorded on the task.
    #[must_use]
    pub const fn message(self) -> &'static str {
        match self {
            Self::UserRequested => "cancelled by user",
            Self::Stalled => "stalled below speed threshold",
            Self::TimedOut => "exceeded maximum runtime",
            Self::EngineUnreachable => "engine stopped responding",
        }
    }
}

/// Coordinates orderly teardown of live tasks.
pub struct CancelCoordinator {
    registry: Arc<TaskRegistry>,
    engines: Arc<EngineSet>,
    admission: Arc<AdmissionController>,
    ack_timeout: Duration,
}

impl CancelCoordinator {
    /// Construct a coordinator over the shared components.
    #[must_use]
    pub fn new(
        registry: Arc<TaskRegistry>,
        engines: Arc<EngineSet>,
        admission: Arc<AdmissionController>,
        ack_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            engines,
            admission,
            ack_timeout,
        }
    }

    /// Terminate a task, returning the terminal phase it ended in.
    ///
    /// Idempotent: cancelling an already-terminal task reports its existing
    /// phase without side effects. The terminal transition is claimed before
    /// the engine is contacted, so a racing completion or second cancel backs
    /// off cleanly. An engine that ignores the stop request within the ack
    /// timeout is abandoned with a warning; its slot is reclaimed regardless.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::NotFound`] when the task is unknown.
    pub async fn cancel(&self, id: Uuid, reason: CancelReason) -> QueueResult<TaskPhase> {
        let record = self
            .registry
            .get(id)
            .await
            .ok_or(QueueError::NotFound { task_id: id })?;
        if record.phase.is_terminal() {
            return Ok(record.phase);
        }

        let handle = record.engine_handle.clone();
        let target = reason.target_phase();
        let terminal = match self
            .registry
            .transition(id, target, Some(reason.message().to_string()))
            .await
        {
            Ok(record) => record,
            Err(err) if TaskRegistry::lost_transition_race(&err) => {
                let phase = self
                    .registry
                    .get(id)
                    .await
                    .map_or(target, |record| record.phase);
                return Ok(phase);
            }
            Err(err) => return Err(err),
        };

        if let Some(handle) = handle {
            self.stop_engine(id, record.kind, &handle).await;
        }

        info!(task_id = %id, phase = %target, detail = reason.message(), "task terminated");
        self.admission.finalize(id, terminal.owner_id).await;
        self.registry.retire(id).await;
        Ok(target)
    }

    async fn stop_engine(
        &self,
        id: Uuid,
        kind: ferry_transfer_core::EngineKind,
        handle: &EngineHandle,
    ) {
        let Ok(engine) = self.engines.get(kind) else {
            warn!(task_id = %id, kind = %kind, "no adapter available to stop task");
            return;
        };
        match timeout(self.ack_timeout, engine.cancel(handle)).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                warn!(task_id = %id, error = %err, "engine rejected cancellation");
            }
            Err(_) => {
                warn!(task_id = %id, "engine did not acknowledge cancellation in time");
            }
        }
    }
}
