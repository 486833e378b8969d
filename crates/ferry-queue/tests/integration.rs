use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use ferry_config::FerryConfig;
use ferry_events::{EventBus, EventEnvelope, TaskPhase};
use ferry_queue::{
    AdmissionController, EngineSet, ForceStartOutcome, QueueEngine, QueueError, TaskFilter,
    TaskRegistry,
};
use ferry_telemetry::Metrics;
use ferry_test_support::{
    MemoryStore, ScriptedEngine, StaticSampler, download_spec, fast_config, upload_spec,
};
use ferry_transfer_core::{EngineKind, ProgressReport, TaskRecord, TaskSnapshot};
use uuid::Uuid;

struct Harness {
    engine: QueueEngine,
    torrent: Arc<ScriptedEngine>,
    cloud: Arc<ScriptedEngine>,
    store: Arc<MemoryStore>,
    sampler: Arc<StaticSampler>,
}

fn harness(config: &FerryConfig) -> Harness {
    let torrent = Arc::new(ScriptedEngine::new(EngineKind::Torrent));
    let cloud = Arc::new(ScriptedEngine::new(EngineKind::CloudUpload));
    let engines = EngineSet::new().with(torrent.clone()).with(cloud.clone());
    let store = Arc::new(MemoryStore::new());
    let sampler = Arc::new(StaticSampler::new(10.0, 10.0));
    let metrics = Metrics::new().expect("metrics");
    let engine = QueueEngine::with_sampler(config, engines, store.clone(), metrics, sampler.clone());
    Harness {
        engine,
        torrent,
        cloud,
        store,
        sampler,
    }
}

fn complete_report() -> ProgressReport {
    ProgressReport {
        transferred_bytes: 1_000,
        size_bytes: Some(1_000),
        speed_bps: 0,
        eta_seconds: Some(0),
        complete: true,
    }
}

fn healthy_report() -> ProgressReport {
    ProgressReport {
        transferred_bytes: 500,
        size_bytes: Some(1_000),
        speed_bps: 1_000_000,
        eta_seconds: Some(30),
        complete: false,
    }
}

async fn phase_of(engine: &QueueEngine, id: Uuid) -> Option<TaskPhase> {
    engine.task(id).await.map(|record| record.phase)
}

async fn drain_events(engine: &QueueEngine) -> Vec<EventEnvelope> {
    let mut stream = engine.subscribe(Some(0));
    let mut events = Vec::new();
    while let Ok(Some(event)) =
        tokio::time::timeout(Duration::from_millis(100), stream.next()).await
    {
        events.push(event);
    }
    events
}

#[tokio::test]
async fn unlimited_submission_starts_immediately() {
    let h = harness(&fast_config());
    let id = h.engine.submit(download_spec(1)).await.expect("submit");

    assert_eq!(phase_of(&h.engine, id).await, Some(TaskPhase::Active));
    assert_eq!(h.torrent.started(), vec![id]);
    let summary = h.engine.summary().await;
    assert_eq!(summary.queued, 0);
    assert_eq!(summary.active_downloads, 1);
}

#[tokio::test]
async fn excess_submissions_queue_in_order() {
    let mut config = fast_config();
    config.limits.limit_download = 1;
    let h = harness(&config);

    let first = h.engine.submit(download_spec(1)).await.expect("first");
    let second = h.engine.submit(download_spec(2)).await.expect("second");
    let third = h.engine.submit(download_spec(3)).await.expect("third");

    assert_eq!(phase_of(&h.engine, first).await, Some(TaskPhase::Active));
    assert_eq!(phase_of(&h.engine, second).await, Some(TaskPhase::Queued));
    assert_eq!(phase_of(&h.engine, third).await, Some(TaskPhase::Queued));

    // Freeing the slot promotes the oldest queued task, not the newest.
    h.engine.cancel(first).await.expect("cancel");
    assert_eq!(phase_of(&h.engine, second).await, Some(TaskPhase::Active));
    assert_eq!(phase_of(&h.engine, third).await, Some(TaskPhase::Queued));
}

#[tokio::test]
async fn upload_slots_are_isolated_from_downloads() {
    let mut config = fast_config();
    config.limits.limit_download = 1;
    config.limits.limit_upload = 1;
    let h = harness(&config);

    let download_a = h.engine.submit(download_spec(1)).await.expect("dl a");
    let download_b = h.engine.submit(download_spec(1)).await.expect("dl b");
    let upload = h.engine.submit(upload_spec(1)).await.expect("upload");

    assert_eq!(phase_of(&h.engine, download_a).await, Some(TaskPhase::Active));
    assert_eq!(phase_of(&h.engine, download_b).await, Some(TaskPhase::Queued));
    assert_eq!(phase_of(&h.engine, upload).await, Some(TaskPhase::Active));
    assert_eq!(h.cloud.started(), vec![upload]);
}

#[tokio::test]
async fn category_limit_binds_below_the_global_cap() {
    let mut config = fast_config();
    config.limits.limit_all = 8;
    config.limits.limit_download = 5;
    config.limits.limit_upload = 5;
    let h = harness(&config);

    let mut ids = Vec::new();
    for owner in 1..=10 {
        ids.push(h.engine.submit(download_spec(owner)).await.expect("submit"));
    }

    let mut active = 0;
    let mut queued = 0;
    for id in ids {
        match phase_of(&h.engine, id).await {
            Some(TaskPhase::Active) => active += 1,
            Some(TaskPhase::Queued) => queued += 1,
            other => panic!("unexpected phase {other:?}"),
        }
    }
    assert_eq!(active, 5, "download quota caps below the global limit");
    assert_eq!(queued, 5);
}

#[tokio::test]
async fn shared_global_limit_gates_promotion_across_categories() {
    let mut config = fast_config();
    config.limits.limit_all = 4;
    config.limits.limit_download = 3;
    config.limits.limit_upload = 3;
    let h = harness(&config);

    let d1 = h.engine.submit(download_spec(1)).await.expect("d1");
    let d2 = h.engine.submit(download_spec(2)).await.expect("d2");
    let d3 = h.engine.submit(download_spec(3)).await.expect("d3");
    let d4 = h.engine.submit(download_spec(4)).await.expect("d4");
    let d5 = h.engine.submit(download_spec(5)).await.expect("d5");
    let u1 = h.engine.submit(upload_spec(6)).await.expect("u1");
    let u2 = h.engine.submit(upload_spec(7)).await.expect("u2");

    for id in [d1, d2, d3, u1] {
        assert_eq!(phase_of(&h.engine, id).await, Some(TaskPhase::Active));
    }
    // The upload quota has room but the global cap of four is spent.
    for id in [d4, d5, u2] {
        assert_eq!(phase_of(&h.engine, id).await, Some(TaskPhase::Queued));
    }

    // One released download slot goes to the oldest queued download.
    h.engine.cancel(d2).await.expect("cancel d2");
    assert_eq!(phase_of(&h.engine, d4).await, Some(TaskPhase::Active));
    assert_eq!(phase_of(&h.engine, d5).await, Some(TaskPhase::Queued));

    h.engine.cancel(d4).await.expect("cancel d4");
    assert_eq!(phase_of(&h.engine, d5).await, Some(TaskPhase::Active));
    assert_eq!(phase_of(&h.engine, u2).await, Some(TaskPhase::Queued));
}

#[tokio::test]
async fn interleaved_submissions_all_drain() {
    let mut config = fast_config();
    config.limits.limit_download = 1;
    let h = harness(&config);

    let (a, b, c, d) = tokio::join!(
        h.engine.submit(download_spec(1)),
        h.engine.submit(download_spec(2)),
        h.engine.submit(download_spec(3)),
        h.engine.submit(download_spec(4)),
    );
    let ids = [a.expect("a"), b.expect("b"), c.expect("c"), d.expect("d")];

    // Every submission must be promotable: cancel whatever holds the slot
    // until the whole batch has drained.
    for _ in 0..ids.len() {
        let mut holder = None;
        for id in ids {
            if phase_of(&h.engine, id).await == Some(TaskPhase::Active) {
                holder = Some(id);
                break;
            }
        }
        let id = holder.expect("a queued task was never promoted");
        h.engine.cancel(id).await.expect("cancel");
    }
    for id in ids {
        assert!(h.engine.task(id).await.is_none(), "task drained");
    }
}

#[tokio::test]
async fn per_user_quota_rejects_excess_live_tasks() {
    let mut config = fast_config();
    config.limits.user_max_tasks = 1;
    let h = harness(&config);

    h.engine.submit(download_spec(7)).await.expect("first");
    let err = h
        .engine
        .submit(download_spec(7))
        .await
        .expect_err("quota should fire");
    assert!(matches!(
        err,
        QueueError::TooManyTasks {
            owner_id: 7,
            scope: "user"
        }
    ));

    // Another owner is unaffected.
    h.engine.submit(download_spec(8)).await.expect("other owner");
}

#[tokio::test]
async fn global_cap_rejects_any_owner() {
    let mut config = fast_config();
    config.limits.bot_max_tasks = 1;
    let h = harness(&config);

    h.engine.submit(download_spec(1)).await.expect("first");
    let err = h
        .engine
        .submit(download_spec(2))
        .await
        .expect_err("bot cap should fire");
    assert!(matches!(err, QueueError::TooManyTasks { scope: "bot", .. }));
}

#[tokio::test]
async fn daily_limit_counts_submissions_not_live_tasks() {
    let mut config = fast_config();
    config.limits.daily_task_limit = 1;
    let h = harness(&config);

    let id = h.engine.submit(download_spec(5)).await.expect("first");
    h.engine.cancel(id).await.expect("cancel");

    let err = h
        .engine
        .submit(download_spec(5))
        .await
        .expect_err("daily limit should survive cancellation");
    assert!(matches!(
        err,
        QueueError::TooManyTasks {
            scope: "daily",
            ..
        }
    ));
}

#[tokio::test]
async fn force_start_jumps_its_category_queue() {
    let mut config = fast_config();
    config.limits.limit_download = 1;
    let h = harness(&config);

    let active = h.engine.submit(download_spec(1)).await.expect("a");
    let second = h.engine.submit(download_spec(2)).await.expect("b");
    let third = h.engine.submit(download_spec(3)).await.expect("c");

    let outcome = h.engine.force_start(third).await.expect("force");
    assert_eq!(outcome, ForceStartOutcome::StillQueued, "no slot free yet");
    assert!(h.engine.task(third).await.expect("record").boosted);

    // The freed slot goes to the boosted task, not the older queued one.
    h.engine.cancel(active).await.expect("cancel");
    assert_eq!(phase_of(&h.engine, third).await, Some(TaskPhase::Active));
    assert_eq!(phase_of(&h.engine, second).await, Some(TaskPhase::Queued));
}

#[tokio::test]
async fn force_start_of_running_or_unknown_tasks() {
    let h = harness(&fast_config());
    let id = h.engine.submit(download_spec(1)).await.expect("submit");

    // Already running; boosting reports admission without side effects.
    let outcome = h.engine.force_start(id).await.expect("force");
    assert_eq!(outcome, ForceStartOutcome::Admitted);

    let err = h
        .engine
        .force_start(Uuid::new_v4())
        .await
        .expect_err("unknown id");
    assert!(matches!(err, QueueError::NotFound { .. }));
}

#[tokio::test]
async fn failed_force_start_still_promotes_queued_work() {
    let config = fast_config();
    let torrent = Arc::new(ScriptedEngine::new(EngineKind::Torrent));
    let engines = Arc::new(EngineSet::new().with(torrent.clone()));
    let metrics = Metrics::new().expect("metrics");
    let registry = Arc::new(TaskRegistry::new(
        EventBus::new(),
        Arc::new(MemoryStore::new()),
        metrics.clone(),
    ));
    let mut limits = config.limits.clone();
    limits.limit_download = 1;
    let admission =
        AdmissionController::new(limits, config.engine.clone(), registry.clone(), engines, metrics);

    // Adopt leaves both tasks queued with the slot free, so the boost claims
    // it directly.
    let first = TaskRecord::from_spec(Uuid::new_v4(), download_spec(1), Utc::now());
    let second = TaskRecord::from_spec(Uuid::new_v4(), download_spec(2), Utc::now());
    let (first_id, second_id) = (first.id, second.id);
    admission.adopt(first).await;
    admission.adopt(second).await;

    torrent.fail_next_starts(config.engine.start_retry_limit);
    let outcome = admission.force_start(first_id).await.expect("force");
    assert_eq!(outcome, ForceStartOutcome::Admitted);

    assert!(registry.get(first_id).await.is_none(), "exhausted task retired");
    let phase = registry.get(second_id).await.map(|record| record.phase);
    assert_eq!(phase, Some(TaskPhase::Active), "freed slot promoted the next task");
}

#[tokio::test]
async fn submission_interval_throttles_rapid_resubmission() {
    let mut config = fast_config();
    config.limits.user_time_interval_secs = 3_600;
    let h = harness(&config);

    h.engine.submit(download_spec(4)).await.expect("first");
    let err = h
        .engine
        .submit(download_spec(4))
        .await
        .expect_err("too soon");
    assert!(matches!(
        err,
        QueueError::TooManyTasks {
            scope: "interval",
            ..
        }
    ));
    h.engine.submit(download_spec(5)).await.expect("other owner");
}

#[tokio::test]
async fn daily_byte_budget_blocks_further_downloads() {
    let mut config = fast_config();
    config.limits.daily_download_bytes = 1_000;
    let h = harness(&config);

    let id = h.engine.submit(download_spec(6)).await.expect("submit");
    h.torrent.set_report(complete_report());
    h.engine.poll_now().await;
    assert!(h.engine.task(id).await.is_none(), "completed and retired");

    let err = h
        .engine
        .submit(download_spec(6))
        .await
        .expect_err("budget spent");
    assert!(matches!(
        err,
        QueueError::TooManyTasks {
            scope: "daily_bytes",
            ..
        }
    ));
    // The upload budget is separate.
    h.engine.submit(upload_spec(6)).await.expect("upload unaffected");
}

#[tokio::test]
async fn unknown_engine_kind_is_rejected_before_counting() {
    let mut config = fast_config();
    config.limits.user_max_tasks = 1;
    let torrent = Arc::new(ScriptedEngine::new(EngineKind::Torrent));
    let engines = EngineSet::new().with(torrent);
    let store = Arc::new(MemoryStore::new());
    let engine = QueueEngine::new(&config, engines, store, Metrics::new().expect("metrics"));

    let err = engine
        .submit(upload_spec(1))
        .await
        .expect_err("no upload adapter");
    assert!(matches!(
        err,
        QueueError::UnknownEngine {
            kind: EngineKind::CloudUpload
        }
    ));

    // The rejected submission consumed no quota.
    engine.submit(download_spec(1)).await.expect("quota intact");
}

#[tokio::test]
async fn start_retries_then_fails_and_retires() {
    let config = fast_config();
    let h = harness(&config);
    h.torrent.fail_next_starts(config.engine.start_retry_limit);

    let id = h.engine.submit(download_spec(1)).await.expect("submit");

    assert_eq!(h.engine.task(id).await, None, "failed task is retired");
    assert!(h.store.is_empty(), "snapshot deleted on retirement");
    let events = drain_events(&h.engine).await;
    let failed = events.iter().any(|e| {
        matches!(
            &e.event,
            ferry_events::Event::PhaseChanged {
                task_id,
                phase: TaskPhase::Failed,
                ..
            } if *task_id == id
        )
    });
    assert!(failed, "failure phase was announced");
}

#[tokio::test]
async fn start_retry_recovers_within_budget() {
    let h = harness(&fast_config());
    h.torrent.fail_next_starts(1);

    let id = h.engine.submit(download_spec(1)).await.expect("submit");

    let record = h.engine.task(id).await.expect("record");
    assert_eq!(record.phase, TaskPhase::Active);
    assert_eq!(record.retry_count, 2);
}

#[tokio::test(start_paused = true)]
async fn start_retry_backoff_doubles_each_attempt() {
    let mut config = fast_config();
    config.engine.start_retry_backoff_secs = 2;
    let h = harness(&config);
    h.torrent.fail_next_starts(2);

    let before = tokio::time::Instant::now();
    let id = h.engine.submit(download_spec(1)).await.expect("submit");

    assert_eq!(phase_of(&h.engine, id).await, Some(TaskPhase::Active));
    assert_eq!(
        before.elapsed(),
        Duration::from_secs(6),
        "two seconds, then four, between attempts"
    );
}

#[tokio::test(start_paused = true)]
async fn hung_engine_start_times_out_and_frees_the_slot() {
    let mut config = fast_config();
    config.limits.limit_download = 1;
    config.engine.start_retry_limit = 1;
    let h = harness(&config);
    h.torrent.set_start_delay(Duration::from_secs(3_600));

    let hung = h.engine.submit(download_spec(1)).await.expect("submit");
    assert!(h.engine.task(hung).await.is_none(), "timed-out start fails the task");

    // The reservation was rolled back; the slot serves the next submission.
    let next = h.engine.submit(download_spec(2)).await.expect("second submit");
    assert_eq!(phase_of(&h.engine, next).await, Some(TaskPhase::Active));
}

#[tokio::test]
async fn completion_frees_slot_for_queued_work() {
    let mut config = fast_config();
    config.limits.limit_download = 1;
    let h = harness(&config);

    let first = h.engine.submit(download_spec(1)).await.expect("first");
    let second = h.engine.submit(download_spec(2)).await.expect("second");
    h.torrent.set_report(complete_report());

    h.engine.poll_now().await;

    assert_eq!(h.engine.task(first).await, None, "completed task retired");
    assert_eq!(phase_of(&h.engine, second).await, Some(TaskPhase::Active));
}

#[tokio::test]
async fn full_byte_count_completes_without_engine_flag() {
    let mut config = fast_config();
    config.limits.limit_download = 1;
    let h = harness(&config);

    let first = h.engine.submit(download_spec(1)).await.expect("first");
    let second = h.engine.submit(download_spec(2)).await.expect("second");
    // Every byte accounted for, but the engine never raises its flag.
    h.torrent.set_report(ProgressReport {
        transferred_bytes: 1_000,
        size_bytes: Some(1_000),
        speed_bps: 0,
        eta_seconds: Some(0),
        complete: false,
    });

    h.engine.poll_now().await;

    assert_eq!(h.engine.task(first).await, None, "full byte count completes");
    assert_eq!(phase_of(&h.engine, second).await, Some(TaskPhase::Active));
}

#[tokio::test]
async fn repeated_poll_failures_fail_the_task() {
    let config = fast_config();
    let h = harness(&config);
    let id = h.engine.submit(download_spec(1)).await.expect("submit");
    h.torrent.set_progress_failing(true);

    for _ in 0..config.engine.progress_failure_limit {
        h.engine.poll_now().await;
    }

    assert_eq!(h.engine.task(id).await, None, "unreachable task retired");
    let events = drain_events(&h.engine).await;
    let failed = events.iter().any(|e| {
        matches!(
            &e.event,
            ferry_events::Event::PhaseChanged {
                phase: TaskPhase::Failed,
                message: Some(message),
                ..
            } if message.contains("engine stopped responding")
        )
    });
    assert!(failed);
}

#[tokio::test]
async fn single_poll_failure_is_forgiven() {
    let h = harness(&fast_config());
    let id = h.engine.submit(download_spec(1)).await.expect("submit");

    h.torrent.set_progress_failing(true);
    h.engine.poll_now().await;
    h.torrent.set_progress_failing(false);
    h.torrent.set_report(healthy_report());
    h.engine.poll_now().await;

    let record = h.engine.task(id).await.expect("still live");
    assert_eq!(record.phase, TaskPhase::Active);
    assert_eq!(record.transferred_bytes, 500);
}

#[tokio::test]
async fn cancelling_queued_task_never_touches_engines() {
    let mut config = fast_config();
    config.limits.limit_download = 1;
    let h = harness(&config);

    let active = h.engine.submit(download_spec(1)).await.expect("active");
    let queued = h.engine.submit(download_spec(2)).await.expect("queued");

    let phase = h.engine.cancel(queued).await.expect("cancel");
    assert_eq!(phase, TaskPhase::Cancelled);
    assert!(h.torrent.cancelled().is_empty(), "no engine call for queued");
    assert_eq!(phase_of(&h.engine, active).await, Some(TaskPhase::Active));
}

#[tokio::test]
async fn cancelling_active_task_stops_the_engine() {
    let h = harness(&fast_config());
    let id = h.engine.submit(download_spec(1)).await.expect("submit");

    let phase = h.engine.cancel(id).await.expect("cancel");
    assert_eq!(phase, TaskPhase::Cancelled);
    assert_eq!(h.torrent.cancelled().len(), 1);
    assert_eq!(h.engine.task(id).await, None, "cancelled task retired");
}

#[tokio::test]
async fn cancel_is_idempotent_and_unknown_ids_error() {
    let h = harness(&fast_config());
    let id = h.engine.submit(download_spec(1)).await.expect("submit");

    h.engine.cancel(id).await.expect("first cancel");
    let err = h.engine.cancel(id).await.expect_err("retired task is gone");
    assert!(matches!(err, QueueError::NotFound { .. }));

    let err = h
        .engine
        .cancel(Uuid::new_v4())
        .await
        .expect_err("unknown id");
    assert!(matches!(err, QueueError::NotFound { .. }));
}

#[tokio::test(start_paused = true)]
async fn unacknowledged_engine_cancel_is_abandoned() {
    let h = harness(&fast_config());
    let id = h.engine.submit(download_spec(1)).await.expect("submit");
    h.torrent.set_cancel_delay(Duration::from_secs(30));

    let phase = h.engine.cancel(id).await.expect("cancel");
    assert_eq!(phase, TaskPhase::Cancelled);
    assert_eq!(h.engine.task(id).await, None, "slot reclaimed regardless");
}

#[tokio::test]
async fn sustained_slow_speed_marks_task_stalled() {
    let mut config = fast_config();
    config.monitor.wait_time_secs = 600;
    let h = harness(&config);
    let id = h.engine.submit(download_spec(1)).await.expect("submit");

    // Speed stays at zero, below the threshold; two sweeps trip the streak.
    h.engine.monitor_now().await;
    assert_eq!(phase_of(&h.engine, id).await, Some(TaskPhase::Active));
    h.engine.monitor_now().await;
    assert_eq!(phase_of(&h.engine, id).await, Some(TaskPhase::Stalled));
}

#[tokio::test]
async fn stalled_task_recovers_when_speed_returns() {
    let mut config = fast_config();
    config.monitor.wait_time_secs = 600;
    let h = harness(&config);
    let id = h.engine.submit(download_spec(1)).await.expect("submit");

    h.engine.monitor_now().await;
    h.engine.monitor_now().await;
    assert_eq!(phase_of(&h.engine, id).await, Some(TaskPhase::Stalled));

    h.torrent.set_report(healthy_report());
    h.engine.poll_now().await;
    h.engine.monitor_now().await;
    assert_eq!(phase_of(&h.engine, id).await, Some(TaskPhase::Active));
}

#[tokio::test]
async fn stalled_task_is_cancelled_after_grace_period() {
    let config = fast_config();
    let h = harness(&config);
    let id = h.engine.submit(download_spec(1)).await.expect("submit");

    h.engine.monitor_now().await;
    h.engine.monitor_now().await;
    assert_eq!(phase_of(&h.engine, id).await, Some(TaskPhase::Stalled));
    // Grace period is zero in the fast config; the next sweep gives up.
    h.engine.monitor_now().await;

    assert_eq!(h.engine.task(id).await, None, "stalled task cancelled");
    let events = drain_events(&h.engine).await;
    let cancelled = events.iter().any(|e| {
        matches!(
            &e.event,
            ferry_events::Event::PhaseChanged {
                phase: TaskPhase::Cancelled,
                message: Some(message),
                ..
            } if message.contains("stalled")
        )
    });
    assert!(cancelled);
}

#[tokio::test]
async fn overlong_runtime_is_cancelled() {
    let mut config = fast_config();
    config.monitor.completion_threshold_secs = 0;
    let h = harness(&config);
    let id = h.engine.submit(download_spec(1)).await.expect("submit");

    h.engine.monitor_now().await;
    assert_eq!(h.engine.task(id).await, None, "task over runtime limit");
}

#[tokio::test]
async fn excessive_eta_warns_exactly_once() {
    let mut config = fast_config();
    config.monitor.eta_threshold_secs = 60;
    config.monitor.wait_time_secs = 600;
    let h = harness(&config);
    let id = h.engine.submit(download_spec(1)).await.expect("submit");

    h.torrent.set_report(ProgressReport {
        eta_seconds: Some(7_200),
        ..healthy_report()
    });
    h.engine.poll_now().await;
    h.engine.monitor_now().await;
    h.engine.monitor_now().await;

    let events = drain_events(&h.engine).await;
    let warnings = events
        .iter()
        .filter(|e| matches!(&e.event, ferry_events::Event::Warning { task_id, .. } if *task_id == id))
        .count();
    assert_eq!(warnings, 1, "eta warning fires once per task");
}

#[tokio::test]
async fn resource_pressure_pauses_and_resumes_admissions() {
    let config = fast_config();
    let h = harness(&config);

    h.sampler.set(96.0, 40.0);
    h.engine.monitor_now().await;
    assert!(!h.engine.admissions_paused().await, "one sample is not enough");
    h.engine.monitor_now().await;
    assert!(h.engine.admissions_paused().await, "full high window pauses");

    let id = h.engine.submit(download_spec(1)).await.expect("submit");
    assert_eq!(
        phase_of(&h.engine, id).await,
        Some(TaskPhase::Queued),
        "paused gate queues new work"
    );

    // One low sample mixed with a high one must not resume yet.
    h.sampler.set(10.0, 10.0);
    h.engine.monitor_now().await;
    assert!(h.engine.admissions_paused().await);
    h.engine.monitor_now().await;
    assert!(!h.engine.admissions_paused().await, "full low window resumes");
    assert_eq!(phase_of(&h.engine, id).await, Some(TaskPhase::Active));
}

#[tokio::test]
async fn status_pages_are_stable_and_cursor_driven() {
    let h = harness(&fast_config());
    let mut submitted = Vec::new();
    for owner in 1..=5 {
        submitted.push(h.engine.submit(download_spec(owner)).await.expect("submit"));
    }

    let first = h
        .engine
        .status_page(TaskFilter::default(), None, Some(2))
        .await;
    assert_eq!(first.tasks.len(), 2);
    let cursor = first.next.expect("more pages");

    let second = h
        .engine
        .status_page(TaskFilter::default(), Some(cursor), Some(2))
        .await;
    assert_eq!(second.tasks.len(), 2);
    let cursor = second.next.expect("more pages");

    let third = h
        .engine
        .status_page(TaskFilter::default(), Some(cursor), Some(2))
        .await;
    assert_eq!(third.tasks.len(), 1);
    assert!(third.next.is_none());

    let mut seen: Vec<Uuid> = first
        .tasks
        .iter()
        .chain(second.tasks.iter())
        .chain(third.tasks.iter())
        .map(|record| record.id)
        .collect();
    seen.dedup();
    assert_eq!(seen.len(), 5, "no row repeated or skipped");

    let created: Vec<_> = first
        .tasks
        .iter()
        .chain(second.tasks.iter())
        .chain(third.tasks.iter())
        .map(|record| (record.created_at, record.id))
        .collect();
    let mut sorted = created.clone();
    sorted.sort();
    assert_eq!(created, sorted, "submission order preserved across pages");
}

#[tokio::test]
async fn status_filters_restrict_rows() {
    let h = harness(&fast_config());
    h.engine.submit(download_spec(1)).await.expect("dl");
    h.engine.submit(upload_spec(2)).await.expect("ul");

    let mine = h
        .engine
        .status_page(
            TaskFilter {
                owner_id: Some(1),
                ..TaskFilter::default()
            },
            None,
            None,
        )
        .await;
    assert_eq!(mine.tasks.len(), 1);
    assert_eq!(mine.tasks[0].owner_id, 1);

    let uploads = h
        .engine
        .status_page(
            TaskFilter {
                category: Some(ferry_transfer_core::TaskCategory::Upload),
                ..TaskFilter::default()
            },
            None,
            None,
        )
        .await;
    assert_eq!(uploads.tasks.len(), 1);
    assert_eq!(uploads.tasks[0].kind, EngineKind::CloudUpload);
}

#[tokio::test]
async fn restore_requeues_incomplete_snapshots_in_order() {
    let mut config = fast_config();
    config.limits.limit_download = 1;
    let h = harness(&config);

    let older = seeded_snapshot(&h, 11, TaskPhase::Active, 120);
    let newer = seeded_snapshot(&h, 12, TaskPhase::Queued, 60);
    let done = seeded_snapshot(&h, 13, TaskPhase::Completed, 30);

    let restored = h.engine.restore().await.expect("restore");
    assert_eq!(restored, 2, "terminal snapshots are ignored");
    assert_eq!(h.engine.task(done).await, None);

    // The older interrupted task wins the single slot.
    assert_eq!(phase_of(&h.engine, older).await, Some(TaskPhase::Active));
    assert_eq!(phase_of(&h.engine, newer).await, Some(TaskPhase::Queued));

    let record = h.engine.task(older).await.expect("record");
    assert_eq!(record.transferred_bytes, 2_048, "progress bytes survive");
    assert_eq!(record.retry_count, 1, "restart consumes a fresh attempt");
}

fn seeded_snapshot(h: &Harness, owner_id: i64, phase: TaskPhase, age_secs: i64) -> Uuid {
    let mut record = TaskRecord::from_spec(
        Uuid::new_v4(),
        download_spec(owner_id),
        Utc::now() - chrono::Duration::seconds(age_secs),
    );
    record.transferred_bytes = 2_048;
    record.phase = phase;
    h.store.seed(TaskSnapshot::from(&record));
    record.id
}

#[tokio::test]
async fn event_stream_replays_from_a_known_id() {
    let h = harness(&fast_config());
    let id = h.engine.submit(download_spec(1)).await.expect("submit");
    h.engine.cancel(id).await.expect("cancel");

    let events = drain_events(&h.engine).await;
    let kinds: Vec<&str> = events.iter().map(|e| e.event.kind()).collect();
    assert!(kinds.contains(&"phase_changed"));
    assert!(kinds.contains(&"retired"));

    let replay_from = events[1].id;
    let mut stream = h.engine.subscribe(Some(replay_from));
    let next = tokio::time::timeout(Duration::from_millis(100), stream.next())
        .await
        .expect("replayed event")
        .expect("stream open");
    assert_eq!(next.id, replay_from + 1);
}
