//! Stall detection, runtime limits, and host pressure hysteresis.
//!
//! The monitor sweeps on a coarse interval. Stall detection requires a task
//! to be old enough (`elapsed_threshold_secs`) and then observes a run of
//! consecutive slow sweeps before marking it stalled; a stalled task gets a
//! grace window (`wait_time_secs`) to recover before it is cancelled. Host
//! pressure uses two-sided hysteresis: admissions pause only after a full
//! window of high samples and resume only after a full window of low ones.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use ferry_config::MonitorConfig;
use ferry_events::TaskPhase;
use ferry_transfer_core::TaskRecord;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::admission::AdmissionController;
use crate::cancel::{CancelCoordinator, CancelReason};
use crate::registry::TaskRegistry;
use crate::resource::ResourceSampler;

#[derive(Default)]
struct TaskHealth {
    slow_streak: u32,
    stalled_since: Option<DateTime<Utc>>,
    eta_warned: bool,
}

#[derive(Default)]
struct MonitorState {
    tasks: HashMap<Uuid, TaskHealth>,
    cpu_window: VecDeque<f32>,
    memory_window: VecDeque<f32>,
    resource_paused: bool,
}

/// Background watchdog over running tasks and host pressure.
pub struct HealthMonitor {
    registry: Arc<TaskRegistry>,
    cancel: Arc<CancelCoordinator>,
    admission: Arc<AdmissionController>,
    sampler: Arc<dyn ResourceSampler>,
    config: MonitorConfig,
    state: Mutex<MonitorState>,
}

impl HealthMonitor {
    /// Construct a monitor over the shared components.
    #[must_use]
    pub fn new(
        registry: Arc<TaskRegistry>,
        cancel: Arc<CancelCoordinator>,
        admission: Arc<AdmissionController>,
        sampler: Arc<dyn ResourceSampler>,
        config: MonitorConfig,
    ) -> Self {
        Self {
            registry,
            cancel,
            admission,
            sampler,
            config,
            state: Mutex::new(MonitorState::default()),
        }
    }

    /// Spawn the monitoring loop on the runtime.
    pub fn spawn(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.config.interval());
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                self.sweep().await;
            }
        })
    }

    /// Run one monitoring pass.
    pub async fn sweep(&self) {
        let now = Utc::now();
        let live: Vec<TaskRecord> = self
            .registry
            .list()
            .await
            .into_iter()
            .filter(|record| record.phase.holds_engine_handle())
            .collect();

        let mut to_stall = Vec::new();
        let mut to_resume = Vec::new();
        let mut to_cancel = Vec::new();
        let mut warnings = Vec::new();

        {
            let mut state = self.state.lock().await;
            let live_ids: Vec<Uuid> = live.iter().map(|record| record.id).collect();
            state.tasks.retain(|id, _| live_ids.contains(id));

            for record in &live {
                let age_secs = now.signed_duration_since(record.created_at).num_seconds();

                if age_secs >= as_secs(self.config.completion_threshold_secs) {
                    to_cancel.push((record.id, CancelReason::TimedOut));
                    continue;
                }

                let health = state.tasks.entry(record.id).or_default();

                if !health.eta_warned
                    && record
                        .eta_seconds
                        .is_some_and(|eta| eta > self.config.eta_threshold_secs)
                {
                    health.eta_warned = true;
                    warnings.push((record.id, record.eta_seconds.unwrap_or_default()));
                }

                if age_secs < as_secs(self.config.elapsed_threshold_secs) {
                    continue;
                }

                let slow = record.speed_bps < self.config.speed_threshold_bps;
                match record.phase {
                    TaskPhase::Active => {
                        if slow {
                            health.slow_streak += 1;
                            if health.slow_streak >= self.config.consecutive_checks {
                                health.stalled_since = Some(now);
                                to_stall.push(record.id);
                            }
                        } else {
                            health.slow_streak = 0;
                        }
                    }
                    TaskPhase::Stalled => {
                        if slow {
                            let expired = health.stalled_since.is_some_and(|since| {
                                now.signed_duration_since(since).num_seconds()
                                    >= as_secs(self.config.wait_time_secs)
                            });
                            if expired {
                                to_cancel.push((record.id, CancelReason::Stalled));
                            }
                        } else {
                            health.slow_streak = 0;
                            health.stalled_since = None;
                            to_resume.push(record.id);
                        }
                    }
                    _ => {}
                }
            }
        }

        for (id, eta) in warnings {
            self.registry
                .warn_task(id, format!("estimated completion is {eta}s away"));
        }
        for id in to_stall {
            if let Err(err) = self
                .registry
                .transition(
                    id,
                    TaskPhase::Stalled,
                    Some("transfer speed below threshold".to_string()),
                )
                .await
            {
                if !TaskRegistry::lost_transition_race(&err) {
                    warn!(task_id = %id, error = %err, "failed to mark task stalled");
                }
            }
        }
        for id in to_resume {
            if let Err(err) = self.registry.mark_recovered(id).await {
                if !TaskRegistry::lost_transition_race(&err) {
                    warn!(task_id = %id, error = %err, "failed to resume stalled task");
                }
            }
        }
        for (id, reason) in to_cancel {
            if let Err(err) = self.cancel.cancel(id, reason).await {
                warn!(task_id = %id, error = %err, "monitor cancellation failed");
            }
        }

        self.check_resources().await;
    }

    async fn check_resources(&self) {
        let sample = self.sampler.sample();
        let window = self.config.consecutive_checks as usize;

        let action = {
            let mut state = self.state.lock().await;
            push_capped(&mut state.cpu_window, sample.cpu_pct, window);
            push_capped(&mut state.memory_window, sample.memory_pct, window);
            debug!(
                cpu = sample.cpu_pct,
                memory = sample.memory_pct,
                "resource sample"
            );

            let full = state.cpu_window.len() == window && state.memory_window.len() == window;
            if !full {
                None
            } else if !state.resource_paused
                && (all_at_least(&state.cpu_window, self.config.cpu_high_pct)
                    || all_at_least(&state.memory_window, self.config.memory_high_pct))
            {
                state.resource_paused = true;
                Some(true)
            } else if state.resource_paused
                && all_at_most(&state.cpu_window, self.config.cpu_low_pct)
                && all_at_most(&state.memory_window, self.config.memory_low_pct)
            {
                state.resource_paused = false;
                Some(false)
            } else {
                None
            }
        };

        match action {
            Some(true) => {
                self.admission.pause("sustained host resource pressure").await;
            }
            Some(false) => self.admission.resume().await,
            None => {}
        }
    }
}

fn as_secs(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn push_capped(window: &mut VecDeque<f32>, value: f32, cap: usize) {
    window.push_back(value);
    while window.len() > cap {
        window.pop_front();
    }
}

fn all_at_least(window: &VecDeque<f32>, mark: u8) -> bool {
    window.iter().all(|value| *value >= f32::from(mark))
}

fn all_at_most(window: &VecDeque<f32>, mark: u8) -> bool {
    window.iter().all(|value| *value <= f32::from(mark))
}
