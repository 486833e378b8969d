//! Cross-field invariant checks applied after loading.

use crate::error::{ConfigError, ConfigResult};
use crate::model::{EngineConfig, FerryConfig, LimitsConfig, MonitorConfig, StatusConfig};

/// Smallest permitted status refresh interval; anything faster hammers
/// the messaging surface for no visible benefit.
pub const MIN_STATUS_INTERVAL_SECS: u64 = 2;

/// Validate a loaded configuration, returning the first violated invariant.
///
/// # Errors
///
/// Returns [`ConfigError::InvalidField`] naming the offending section and
/// field when any invariant fails.
pub fn validate_config(config: &FerryConfig) -> ConfigResult<()> {
    validate_limits(&config.limits)?;
    validate_status(&config.status)?;
    validate_monitor(&config.monitor)?;
    validate_engine(&config.engine)?;
    Ok(())
}

fn invalid(section: &'static str, field: &'static str, reason: &'static str) -> ConfigError {
    ConfigError::InvalidField {
        section,
        field,
        reason,
    }
}

fn validate_limits(limits: &LimitsConfig) -> ConfigResult<()> {
    if limits.limit_all > 0 {
        // A combined cap below a category cap makes that category unreachable.
        if limits.limit_download > 0 && limits.limit_all < limits.limit_download {
            return Err(invalid("limits", "limit_all", "below limit_download"));
        }
        if limits.limit_upload > 0 && limits.limit_all < limits.limit_upload {
            return Err(invalid("limits", "limit_all", "below limit_upload"));
        }
        if limits.limit_download > 0
            && limits.limit_upload > 0
            && limits.limit_all > limits.limit_download + limits.limit_upload
        {
            return Err(invalid(
                "limits",
                "limit_all",
                "exceeds limit_download + limit_upload",
            ));
        }
    }
    Ok(())
}

fn validate_status(status: &StatusConfig) -> ConfigResult<()> {
    if status.update_interval_secs < MIN_STATUS_INTERVAL_SECS {
        return Err(invalid("status", "update_interval_secs", "below minimum"));
    }
    if status.status_limit == 0 {
        return Err(invalid("status", "status_limit", "must be positive"));
    }
    Ok(())
}

fn validate_monitor(monitor: &MonitorConfig) -> ConfigResult<()> {
    if monitor.interval_secs == 0 {
        return Err(invalid("monitor", "interval_secs", "must be positive"));
    }
    if monitor.consecutive_checks == 0 {
        return Err(invalid("monitor", "consecutive_checks", "must be positive"));
    }
    if monitor.cpu_high_pct > 100 || monitor.memory_high_pct > 100 {
        return Err(invalid("monitor", "cpu_high_pct", "above 100 percent"));
    }
    if monitor.cpu_low_pct >= monitor.cpu_high_pct {
        return Err(invalid("monitor", "cpu_low_pct", "not below cpu_high_pct"));
    }
    if monitor.memory_low_pct >= monitor.memory_high_pct {
        return Err(invalid(
            "monitor",
            "memory_low_pct",
            "not below memory_high_pct",
        ));
    }
    Ok(())
}

fn validate_engine(engine: &EngineConfig) -> ConfigResult<()> {
    if engine.start_retry_limit == 0 {
        return Err(invalid("engine", "start_retry_limit", "must be positive"));
    }
    if engine.progress_failure_limit == 0 {
        return Err(invalid(
            "engine",
            "progress_failure_limit",
            "must be positive",
        ));
    }
    if engine.poll_concurrency == 0 {
        return Err(invalid("engine", "poll_concurrency", "must be positive"));
    }
    if engine.progress_timeout_secs == 0 {
        return Err(invalid("engine", "progress_timeout_secs", "must be positive"));
    }
    if engine.start_timeout_secs == 0 {
        return Err(invalid("engine", "start_timeout_secs", "must be positive"));
    }
    if engine.cancel_ack_timeout_secs == 0 {
        return Err(invalid(
            "engine",
            "cancel_ack_timeout_secs",
            "must be positive",
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        validate_config(&FerryConfig::default()).expect("defaults");
    }

    #[test]
    fn combined_cap_below_category_cap_is_rejected() {
        let mut config = FerryConfig::default();
        config.limits.limit_all = 2;
        config.limits.limit_download = 5;
        let err = validate_config(&config).expect_err("invalid limits");
        assert!(matches!(
            err,
            ConfigError::InvalidField {
                section: "limits",
                field: "limit_all",
                ..
            }
        ));
    }

    #[test]
    fn combined_cap_above_sum_is_rejected() {
        let mut config = FerryConfig::default();
        config.limits.limit_all = 10;
        config.limits.limit_download = 3;
        config.limits.limit_upload = 2;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn status_interval_floor_is_enforced() {
        let mut config = FerryConfig::default();
        config.status.update_interval_secs = 1;
        assert!(validate_config(&config).is_err());
        config.status.update_interval_secs = MIN_STATUS_INTERVAL_SECS;
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn hysteresis_marks_must_be_ordered() {
        let mut config = FerryConfig::default();
        config.monitor.cpu_low_pct = config.monitor.cpu_high_pct;
        assert!(validate_config(&config).is_err());

        let mut config = FerryConfig::default();
        config.monitor.memory_high_pct = 101;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn zero_retry_budget_is_rejected() {
        let mut config = FerryConfig::default();
        config.engine.start_retry_limit = 0;
        assert!(validate_config(&config).is_err());
    }
}
