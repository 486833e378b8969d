//! TOML configuration loading.

use std::path::Path;

use tracing::info;

use crate::error::{ConfigError, ConfigResult};
use crate::model::FerryConfig;
use crate::validate::validate_config;

/// Load and validate a configuration file.
///
/// A missing file is not an error: the documented defaults apply, which run
/// the orchestrator with unlimited admission slots.
///
/// # Errors
///
/// Returns [`ConfigError::Read`] when the file exists but cannot be read,
/// [`ConfigError::Parse`] on malformed TOML, and
/// [`ConfigError::InvalidField`] when validation fails.
pub fn load_config(path: impl AsRef<Path>) -> ConfigResult<FerryConfig> {
    let path = path.as_ref();
    let config = if path.exists() {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        toml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })?
    } else {
        info!(path = %path.display(), "configuration file absent, using defaults");
        FerryConfig::default()
    };

    validate_config(&config)?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = load_config(dir.path().join("absent.toml")).expect("defaults");
        assert_eq!(config, FerryConfig::default());
    }

    #[test]
    fn file_overrides_apply() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("ferry.toml");
        let mut file = std::fs::File::create(&path).expect("create");
        writeln!(
            file,
            r#"
            [limits]
            limit_all = 6
            limit_download = 4
            limit_upload = 2

            [logging]
            format = "json"
            "#
        )
        .expect("write");

        let config = load_config(&path).expect("load");
        assert_eq!(config.limits.limit_all, 6);
        assert_eq!(config.logging.format, crate::model::LogFormat::Json);
    }

    #[test]
    fn invalid_file_is_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("ferry.toml");
        std::fs::write(&path, "[status]\nupdate_interval_secs = 0\n").expect("write");
        assert!(matches!(
            load_config(&path),
            Err(ConfigError::InvalidField { .. })
        ));
    }
}
