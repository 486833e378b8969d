//! Canned configurations and task specs for tests.

use ferry_config::FerryConfig;
use ferry_transfer_core::{EngineKind, TaskSpec};

/// A validated configuration tuned for fast, deterministic tests.
///
/// Retry backoff and ack timeouts are near-zero so failure paths resolve
/// within a test's patience; the monitor trips after two slow sweeps.
#[must_use]
pub fn fast_config() -> FerryConfig {
    let mut config = FerryConfig::default();
    config.engine.start_retry_backoff_secs = 0;
    config.engine.cancel_ack_timeout_secs = 1;
    config.engine.progress_timeout_secs = 1;
    config.monitor.interval_secs = 1;
    config.monitor.consecutive_checks = 2;
    config.monitor.elapsed_threshold_secs = 0;
    config.monitor.wait_time_secs = 0;
    config
}

/// A torrent download spec owned by `owner_id`.
#[must_use]
pub fn download_spec(owner_id: i64) -> TaskSpec {
    TaskSpec {
        owner_id,
        chat_ref: format!("chat-{owner_id}"),
        kind: EngineKind::Torrent,
        source: "magnet:?xt=urn:btih:0123456789abcdef".to_string(),
        display_name: Some("fixture download".to_string()),
    }
}

/// A cloud upload spec owned by `owner_id`.
#[must_use]
pub fn upload_spec(owner_id: i64) -> TaskSpec {
    TaskSpec {
        owner_id,
        chat_ref: format!("chat-{owner_id}"),
        kind: EngineKind::CloudUpload,
        source: "/srv/outbox/fixture.bin".to_string(),
        display_name: Some("fixture upload".to_string()),
    }
}
