//! Application boot sequence: configuration, telemetry, and engine wiring.

use std::sync::Arc;

use ferry_config::{FerryConfig, LogFormat as ConfigLogFormat, load_config};
use ferry_queue::{EngineSet, QueueEngine};
use ferry_telemetry::{LogFormat, LoggingConfig, Metrics, init_logging};
use tracing::info;

use crate::error::{AppError, AppResult};
use crate::store::JsonSnapshotStore;

/// Environment variable naming the configuration file.
pub const CONFIG_ENV: &str = "FERRY_CONFIG";

/// Fallback configuration path when [`CONFIG_ENV`] is unset.
pub const DEFAULT_CONFIG_PATH: &str = "ferry.toml";

/// Entry point for the Ferry application boot sequence.
///
/// Deployments embed their engine adapters by calling [`run_app_with`]; the
/// bare binary starts with no adapters registered and only serves restored
/// state and status plumbing.
///
/// # Errors
///
/// Returns an error if configuration loading or application startup fails.
pub async fn run_app() -> AppResult<()> {
    let path =
        std::env::var(CONFIG_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
    let config = load_config(&path).map_err(|err| AppError::config("config.load", err))?;
    run_app_with(config, EngineSet::new()).await
}

/// Boot the queue engine with the supplied configuration and adapters.
///
/// Blocks until `SIGINT`, then stops the background workers.
///
/// # Errors
///
/// Returns an error if telemetry installation, state restoration, or signal
/// handling fails.
pub async fn run_app_with(config: FerryConfig, engines: EngineSet) -> AppResult<()> {
    init_logging(&logging_config(&config))
        .map_err(|err| AppError::telemetry("telemetry.init", err))?;
    let metrics = Metrics::new().map_err(|err| AppError::telemetry("telemetry.metrics", err))?;

    info!(
        snapshot_dir = %config.persistence.snapshot_dir,
        "ferry bootstrap starting"
    );

    let store = Arc::new(JsonSnapshotStore::new(config.persistence.snapshot_dir.clone()));
    let engine = QueueEngine::new(&config, engines, store, metrics);

    let restored = engine
        .restore()
        .await
        .map_err(|err| AppError::queue("queue.restore", err))?;
    info!(restored, "queue engine ready");

    let workers = engine.spawn_workers();

    tokio::signal::ctrl_c()
        .await
        .map_err(|source| AppError::Signal { source })?;
    info!("shutdown signal received");

    for worker in workers {
        worker.abort();
    }
    Ok(())
}

fn logging_config(config: &FerryConfig) -> LoggingConfig<'_> {
    let format = match config.logging.format {
        ConfigLogFormat::Json => LogFormat::Json,
        ConfigLogFormat::Pretty => LogFormat::Pretty,
    };
    LoggingConfig {
        level: &config.logging.level,
        format,
        build_sha: option_env!("FERRY_BUILD_SHA").unwrap_or("dev"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn logging_config_maps_formats() {
        let mut config = FerryConfig::default();
        config.logging.format = ConfigLogFormat::Json;
        config.logging.level = "debug".to_string();

        let logging = logging_config(&config);
        assert_eq!(logging.format, LogFormat::Json);
        assert_eq!(logging.level, "debug");
    }
}
