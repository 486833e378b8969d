//! Prometheus-backed metrics for the queue engine.

use std::sync::Arc;

use anyhow::{Context, Result};
use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};
use serde::Serialize;

/// Prometheus-backed metrics registry shared across services.
#[derive(Clone)]
pub struct Metrics {
    inner: Arc<MetricsInner>,
}

struct MetricsInner {
    registry: Registry,
    tasks_submitted_total: IntCounter,
    tasks_finished_total: IntCounterVec,
    events_emitted_total: IntCounterVec,
    engine_start_retries_total: IntCounter,
    progress_poll_failures_total: IntCounter,
    admission_pauses_total: IntCounter,
    active_downloads: IntGauge,
    active_uploads: IntGauge,
    queue_depth: IntGauge,
}

/// Snapshot of selected gauges and counters for health reporting.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    /// Tasks currently holding a download slot.
    pub active_downloads: i64,
    /// Tasks currently holding an upload slot.
    pub active_uploads: i64,
    /// Tasks waiting for a slot.
    pub queue_depth: i64,
    /// Total tasks ever submitted.
    pub tasks_submitted_total: u64,
    /// Total engine start retries consumed.
    pub engine_start_retries_total: u64,
    /// Total failed progress polls.
    pub progress_poll_failures_total: u64,
    /// Total admission gate pauses.
    pub admission_pauses_total: u64,
}

impl Metrics {
    /// Construct a new metrics registry with the standard collectors registered.
    ///
    /// # Errors
    ///
    /// Returns an error if any of the Prometheus collectors cannot be
    /// registered.
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let tasks_submitted_total = IntCounter::with_opts(Opts::new(
            "tasks_submitted_total",
            "Transfer tasks submitted for admission",
        ))?;
        let tasks_finished_total = IntCounterVec::new(
            Opts::new(
                "tasks_finished_total",
                "Transfer tasks reaching a terminal phase, by outcome",
            ),
            &["outcome"],
        )?;
        let events_emitted_total = IntCounterVec::new(
            Opts::new("events_emitted_total", "Domain events emitted by type"),
            &["type"],
        )?;
        let engine_start_retries_total = IntCounter::with_opts(Opts::new(
            "engine_start_retries_total",
            "Engine start attempts beyond the first",
        ))?;
        let progress_poll_failures_total = IntCounter::with_opts(Opts::new(
            "progress_poll_failures_total",
            "Progress polls that errored or timed out",
        ))?;
        let admission_pauses_total = IntCounter::with_opts(Opts::new(
            "admission_pauses_total",
            "Times the admission gate paused for resource pressure",
        ))?;
        let active_downloads = IntGauge::with_opts(Opts::new(
            "active_downloads",
            "Tasks currently holding a download slot",
        ))?;
        let active_uploads = IntGauge::with_opts(Opts::new(
            "active_uploads",
            "Tasks currently holding an upload slot",
        ))?;
        let queue_depth = IntGauge::with_opts(Opts::new("queue_depth", "Tasks waiting for a slot"))?;

        registry.register(Box::new(tasks_submitted_total.clone()))?;
        registry.register(Box::new(tasks_finished_total.clone()))?;
        registry.register(Box::new(events_emitted_total.clone()))?;
        registry.register(Box::new(engine_start_retries_total.clone()))?;
        registry.register(Box::new(progress_poll_failures_total.clone()))?;
        registry.register(Box::new(admission_pauses_total.clone()))?;
        registry.register(Box::new(active_downloads.clone()))?;
        registry.register(Box::new(active_uploads.clone()))?;
        registry.register(Box::new(queue_depth.clone()))?;

        Ok(Self {
            inner: Arc::new(MetricsInner {
                registry,
                tasks_submitted_total,
                tasks_finished_total,
                events_emitted_total,
                engine_start_retries_total,
                progress_poll_failures_total,
                admission_pauses_total,
                active_downloads,
                active_uploads,
                queue_depth,
            }),
        })
    }

    /// Increment the submission counter.
    pub fn inc_task_submitted(&self) {
        self.inner.tasks_submitted_total.inc();
    }

    /// Increment the terminal-outcome counter (`completed`, `failed`, `cancelled`).
    pub fn inc_task_finished(&self, outcome: &str) {
        self.inner
            .tasks_finished_total
            .with_label_values(&[outcome])
            .inc();
    }

    /// Increment the emitted event counter for the specific event type.
    pub fn inc_event(&self, event_type: &str) {
        self.inner
            .events_emitted_total
            .with_label_values(&[event_type])
            .inc();
    }

    /// Increment the engine start retry counter.
    pub fn inc_engine_start_retry(&self) {
        self.inner.engine_start_retries_total.inc();
    }

    /// Increment the failed progress poll counter.
    pub fn inc_progress_poll_failure(&self) {
        self.inner.progress_poll_failures_total.inc();
    }

    /// Increment the admission pause counter.
    pub fn inc_admission_pause(&self) {
        self.inner.admission_pauses_total.inc();
    }

    /// Set the active download slot gauge.
    pub fn set_active_downloads(&self, count: i64) {
        self.inner.active_downloads.set(count);
    }

    /// Set the active upload slot gauge.
    pub fn set_active_uploads(&self, count: i64) {
        self.inner.active_uploads.set(count);
    }

    /// Set the queue depth gauge.
    pub fn set_queue_depth(&self, depth: i64) {
        self.inner.queue_depth.set(depth);
    }

    /// Render the metrics registry using the Prometheus text exposition format.
    ///
    /// # Errors
    ///
    /// Returns an error if the metrics cannot be encoded or if the encoded
    /// buffer is not valid UTF-8.
    pub fn render(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.inner.registry.gather();
        let mut buffer = Vec::new();
        encoder
            .encode(&metric_families, &mut buffer)
            .context("failed to encode Prometheus metrics")?;
        String::from_utf8(buffer).context("metrics output was not valid UTF-8")
    }

    /// Take a point-in-time snapshot of the most relevant gauges and counters.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            active_downloads: self.inner.active_downloads.get(),
            active_uploads: self.inner.active_uploads.get(),
            queue_depth: self.inner.queue_depth.get(),
            tasks_submitted_total: self.inner.tasks_submitted_total.get(),
            engine_start_retries_total: self.inner.engine_start_retries_total.get(),
            progress_poll_failures_total: self.inner.progress_poll_failures_total.get(),
            admission_pauses_total: self.inner.admission_pauses_total.get(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate() {
        let metrics = Metrics::new().expect("registry");
        metrics.inc_task_submitted();
        metrics.inc_task_submitted();
        metrics.inc_task_finished("completed");
        metrics.inc_task_finished("cancelled");
        metrics.set_active_downloads(3);
        metrics.set_queue_depth(5);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.tasks_submitted_total, 2);
        assert_eq!(snapshot.active_downloads, 3);
        assert_eq!(snapshot.queue_depth, 5);
    }

    #[test]
    fn render_exposes_registered_metrics() {
        let metrics = Metrics::new().expect("registry");
        metrics.inc_event("phase_changed");
        let rendered = metrics.render().expect("render");
        assert!(rendered.contains("events_emitted_total"));
        assert!(rendered.contains("queue_depth"));
    }
}
