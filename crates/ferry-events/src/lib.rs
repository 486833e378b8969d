//! Core event bus for the Ferry orchestrator.
//!
//! The bus carries every user-visible status change: phase transitions,
//! monitor warnings, task retirements, and admission gate toggles. It is the
//! only channel through which the external messaging/report layer learns
//! about task lifecycles. Internally it uses `tokio::broadcast` with a bounded
//! replay ring so reconnecting consumers can resume from their last seen
//! event id without missing retirements.

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;
use tokio::sync::broadcast::{Receiver, Sender};
use uuid::Uuid;

/// Identifier assigned to each event emitted by the orchestrator.
pub type EventId = u64;

/// Default buffer size for the in-memory replay ring.
const DEFAULT_REPLAY_CAPACITY: usize = 1_024;

/// Lifecycle phase of a tracked transfer task.
///
/// Transitions are validated by the task registry; the enum itself only
/// answers structural questions (terminal or not, legal successor or not).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskPhase {
    /// Waiting for a free queue slot.
    Queued,
    /// Running against a backend engine.
    Active,
    /// Below the throughput threshold long enough to be suspect.
    Stalled,
    /// All bytes transferred.
    Completed,
    /// Terminated by an engine or infrastructure failure.
    Failed,
    /// Terminated by user request or monitor intervention.
    Cancelled,
}

impl TaskPhase {
    /// Whether this phase is absorbing.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Whether a task in this phase holds an engine handle.
    #[must_use]
    pub const fn holds_engine_handle(self) -> bool {
        matches!(self, Self::Active | Self::Stalled)
    }

    /// Whether the state machine permits moving from `self` to `next`.
    #[must_use]
    pub const fn can_transition(self, next: Self) -> bool {
        match self {
            Self::Queued => matches!(next, Self::Active | Self::Cancelled | Self::Failed),
            Self::Active => matches!(
                next,
                Self::Stalled | Self::Completed | Self::Failed | Self::Cancelled
            ),
            Self::Stalled => matches!(next, Self::Active | Self::Cancelled | Self::Failed),
            Self::Completed | Self::Failed | Self::Cancelled => false,
        }
    }

    /// Stable label used in logs and persisted snapshots.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Active => "active",
            Self::Stalled => "stalled",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for TaskPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Typed domain events surfaced to status consumers.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// A task entered a new phase (including the initial `Queued`).
    PhaseChanged {
        /// Task the transition applies to.
        task_id: Uuid,
        /// The phase just entered.
        phase: TaskPhase,
        /// Optional human-readable context (e.g. cancellation reason).
        message: Option<String>,
    },
    /// Non-fatal monitor observation (e.g. excessive ETA).
    Warning {
        /// Task the warning applies to.
        task_id: Uuid,
        /// Human-readable description of the concern.
        message: String,
    },
    /// A terminal task left the live registry; its snapshot was deleted.
    Retired {
        /// Task that was retired.
        task_id: Uuid,
        /// Terminal phase the task retired in.
        phase: TaskPhase,
    },
    /// The admission controller stopped admitting new tasks.
    AdmissionsPaused {
        /// Why admissions were held (e.g. resource pressure).
        reason: String,
    },
    /// The admission controller resumed admitting tasks.
    AdmissionsResumed,
}

impl Event {
    /// Machine-friendly discriminator for downstream consumers.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Event::PhaseChanged { .. } => "phase_changed",
            Event::Warning { .. } => "warning",
            Event::Retired { .. } => "retired",
            Event::AdmissionsPaused { .. } => "admissions_paused",
            Event::AdmissionsResumed => "admissions_resumed",
        }
    }

    /// Task id carried by the event, when it concerns a single task.
    #[must_use]
    pub const fn task_id(&self) -> Option<Uuid> {
        match self {
            Event::PhaseChanged { task_id, .. }
            | Event::Warning { task_id, .. }
            | Event::Retired { task_id, .. } => Some(*task_id),
            Event::AdmissionsPaused { .. } | Event::AdmissionsResumed => None,
        }
    }
}

/// Metadata wrapper around events. Each envelope tracks the event id and
/// emission timestamp.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq)]
pub struct EventEnvelope {
    /// Sequential identifier assigned at publish time.
    pub id: EventId,
    /// Emission timestamp.
    pub timestamp: DateTime<Utc>,
    /// The event payload.
    pub event: Event,
}

/// Shared event bus built on top of `tokio::broadcast`.
#[derive(Clone)]
pub struct EventBus {
    sender: Sender<EventEnvelope>,
    buffer: Arc<Mutex<VecDeque<EventEnvelope>>>,
    next_id: Arc<std::sync::atomic::AtomicU64>,
    replay_capacity: usize,
}

impl EventBus {
    /// Construct a new bus with the provided broadcast capacity.
    ///
    /// The broadcast channel uses the same capacity as the in-memory replay
    /// buffer, ensuring dropped events impact both structures consistently.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        assert!(capacity > 0, "event bus capacity must be positive");
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            buffer: Arc::new(Mutex::new(VecDeque::with_capacity(capacity))),
            next_id: Arc::new(std::sync::atomic::AtomicU64::new(1)),
            replay_capacity: capacity,
        }
    }

    /// Construct a bus with the default in-memory buffer size.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_REPLAY_CAPACITY)
    }

    /// Publish a new event to the bus, assigning it a sequential identifier.
    ///
    /// # Panics
    ///
    /// Panics if the replay buffer mutex has been poisoned.
    pub fn publish(&self, event: Event) -> EventId {
        let id = self
            .next_id
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        let envelope = EventEnvelope {
            id,
            timestamp: Utc::now(),
            event,
        };

        {
            let mut buffer = self.buffer.lock().expect("event buffer mutex poisoned");
            if buffer.len() == self.replay_capacity {
                buffer.pop_front();
            }
            buffer.push_back(envelope.clone());
        }

        let _ = self.sender.send(envelope);
        id
    }

    /// Subscribe to the bus, replaying any buffered events newer than `since_id`.
    ///
    /// # Panics
    ///
    /// Panics if the replay buffer mutex has been poisoned.
    #[must_use]
    pub fn subscribe(&self, since_id: Option<EventId>) -> EventStream {
        let mut backlog = VecDeque::new();
        if let Some(since) = since_id {
            let buffer = self.buffer.lock().expect("event buffer mutex poisoned");
            for item in buffer.iter() {
                if item.id > since {
                    backlog.push_back(item.clone());
                }
            }
        }

        let receiver = self.sender.subscribe();
        EventStream { backlog, receiver }
    }

    /// Returns the last assigned identifier, if any events have been published.
    ///
    /// # Panics
    ///
    /// Panics if the replay buffer mutex has been poisoned.
    #[must_use]
    pub fn last_event_id(&self) -> Option<EventId> {
        let buffer = self.buffer.lock().expect("event buffer mutex poisoned");
        buffer.back().map(|event| event.id)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Stream wrapper that yields events either from the replay backlog or from the
/// live broadcast channel.
pub struct EventStream {
    backlog: VecDeque<EventEnvelope>,
    receiver: Receiver<EventEnvelope>,
}

impl EventStream {
    /// Receive the next event, respecting the replay backlog first.
    pub async fn next(&mut self) -> Option<EventEnvelope> {
        if let Some(event) = self.backlog.pop_front() {
            return Some(event);
        }

        match self.receiver.recv().await {
            Ok(event) => Some(event),
            Err(broadcast::error::RecvError::Lagged(_)) => self.receiver.recv().await.ok(),
            Err(broadcast::error::RecvError::Closed) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn phase_event(id: usize, phase: TaskPhase) -> Event {
        Event::PhaseChanged {
            task_id: Uuid::from_u128(id as u128 + 1),
            phase,
            message: None,
        }
    }

    #[test]
    fn terminal_phases_never_transition() {
        for terminal in [TaskPhase::Completed, TaskPhase::Failed, TaskPhase::Cancelled] {
            for next in [
                TaskPhase::Queued,
                TaskPhase::Active,
                TaskPhase::Stalled,
                TaskPhase::Completed,
                TaskPhase::Failed,
                TaskPhase::Cancelled,
            ] {
                assert!(!terminal.can_transition(next), "{terminal} -> {next}");
            }
            assert!(terminal.is_terminal());
        }
    }

    #[test]
    fn stall_round_trip_is_legal() {
        assert!(TaskPhase::Active.can_transition(TaskPhase::Stalled));
        assert!(TaskPhase::Stalled.can_transition(TaskPhase::Active));
        assert!(TaskPhase::Stalled.can_transition(TaskPhase::Cancelled));
        assert!(!TaskPhase::Stalled.can_transition(TaskPhase::Completed));
        assert!(TaskPhase::Queued.can_transition(TaskPhase::Cancelled));
        assert!(!TaskPhase::Queued.can_transition(TaskPhase::Stalled));
    }

    #[test]
    fn handle_ownership_follows_phase() {
        assert!(TaskPhase::Active.holds_engine_handle());
        assert!(TaskPhase::Stalled.holds_engine_handle());
        assert!(!TaskPhase::Queued.holds_engine_handle());
        assert!(!TaskPhase::Completed.holds_engine_handle());
    }

    #[tokio::test]
    async fn sequential_ids_and_replay() {
        let bus = EventBus::with_capacity(16);

        let mut last_id = 0;
        for i in 0..5 {
            last_id = bus.publish(phase_event(i, TaskPhase::Queued));
        }
        assert_eq!(last_id, 5);

        let mut stream = bus.subscribe(Some(2));
        let mut received = Vec::new();
        for _ in 0..3 {
            if let Some(event) = stream.next().await {
                received.push(event);
            }
        }

        assert_eq!(received.len(), 3);
        assert_eq!(received.first().unwrap().id, 3);
        assert_eq!(received.last().unwrap().id, 5);
    }

    #[tokio::test]
    async fn live_events_reach_subscribers() {
        let bus = EventBus::with_capacity(8);
        let mut stream = bus.subscribe(None);

        bus.publish(Event::AdmissionsPaused {
            reason: "cpu pressure".to_string(),
        });
        bus.publish(Event::AdmissionsResumed);

        let first = stream.next().await.expect("first event");
        assert_eq!(first.event.kind(), "admissions_paused");
        assert_eq!(first.event.task_id(), None);

        let second = stream.next().await.expect("second event");
        assert_eq!(second.event, Event::AdmissionsResumed);
    }
}
