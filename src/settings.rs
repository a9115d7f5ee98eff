//! Core settings loaded with Figment.
//!
//! Settings are layered:
//! 1. Built-in defaults
//! 2. A TOML file (optional; missing files are skipped)
//! 3. Environment variables prefixed with `MMCORE_`, nested keys split on
//!    `__` (e.g. `MMCORE_LOG__DEBUG=true`)
//!
//! # Example
//! ```no_run
//! use mmcore::settings::CoreSettings;
//!
//! let settings = CoreSettings::load_from("mmcore.toml")?;
//! println!("timeout: {} ms", settings.timeout_ms);
//! # Ok::<(), mmc_core::CoreError>(())
//! ```

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use mmc_core::error::{CoreError, CoreResult};
use mmc_core::limits::{DEFAULT_BUFFER_FOOTPRINT_MB, DEFAULT_TIMEOUT};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Environment variable prefix.
pub const ENV_PREFIX: &str = "MMCORE_";

/// Top-level core settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoreSettings {
    /// Device wait and acquisition stop timeout in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Circular buffer footprint in megabytes
    #[serde(default = "default_footprint")]
    pub buffer_memory_footprint_mb: u64,
    /// Log destinations
    #[serde(default)]
    pub log: LogSettings,
}

/// Core log destinations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogSettings {
    /// Primary log file; none disables it
    #[serde(default)]
    pub primary_file: Option<PathBuf>,
    /// Mirror core log lines to stderr
    #[serde(default)]
    pub stderr: bool,
    /// Emit debug-only lines to the primary file and stderr
    #[serde(default)]
    pub debug: bool,
    /// `tracing` level for the CLI subscriber (trace, debug, info, warn, error)
    #[serde(default = "default_level")]
    pub level: String,
}

fn default_timeout_ms() -> u64 {
    DEFAULT_TIMEOUT.as_millis() as u64
}

fn default_footprint() -> u64 {
    DEFAULT_BUFFER_FOOTPRINT_MB
}

fn default_level() -> String {
    "info".to_string()
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            primary_file: None,
            stderr: false,
            debug: false,
            level: default_level(),
        }
    }
}

impl Default for CoreSettings {
    fn default() -> Self {
        Self {
            timeout_ms: default_timeout_ms(),
            buffer_memory_footprint_mb: default_footprint(),
            log: LogSettings::default(),
        }
    }
}

impl CoreSettings {
    /// Defaults overridden by `MMCORE_` environment variables.
    pub fn load() -> CoreResult<Self> {
        Self::extract(Self::figment())
    }

    /// Defaults, then `path`, then the environment.
    pub fn load_from<P: AsRef<Path>>(path: P) -> CoreResult<Self> {
        Self::extract(Self::figment().merge(Toml::file(path.as_ref())))
    }

    fn figment() -> Figment {
        Figment::from(Serialized::defaults(CoreSettings::default()))
    }

    fn extract(figment: Figment) -> CoreResult<Self> {
        let settings: CoreSettings = figment
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
            .map_err(|e| CoreError::Settings(e.to_string()))?;
        settings.validate()?;
        Ok(settings)
    }

    /// Checks value ranges after loading.
    pub fn validate(&self) -> CoreResult<()> {
        if self.timeout_ms == 0 {
            return Err(CoreError::Settings("timeout_ms must be positive".into()));
        }
        if self.buffer_memory_footprint_mb == 0 {
            return Err(CoreError::Settings(
                "buffer_memory_footprint_mb must be positive".into(),
            ));
        }
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.log.level.to_lowercase().as_str()) {
            return Err(CoreError::Settings(format!(
                "Invalid log level '{}'. Must be one of: {}",
                self.log.level,
                valid_levels.join(", ")
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::io::Write;

    #[test]
    fn test_defaults_validate() {
        let settings = CoreSettings::default();
        assert_eq!(settings.timeout_ms, 5000);
        assert_eq!(settings.buffer_memory_footprint_mb, 250);
        assert!(settings.log.primary_file.is_none());
        assert!(settings.validate().is_ok());
    }

    #[test]
    #[serial]
    fn test_file_overrides_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "timeout_ms = 1500\n\n[log]\nstderr = true\nlevel = \"debug\""
        )
        .unwrap();

        let settings = CoreSettings::load_from(file.path()).unwrap();
        assert_eq!(settings.timeout_ms, 1500);
        assert_eq!(settings.buffer_memory_footprint_mb, 250);
        assert!(settings.log.stderr);
        assert_eq!(settings.log.level, "debug");
    }

    #[test]
    #[serial]
    fn test_missing_file_falls_back_to_defaults() {
        let settings = CoreSettings::load_from("/nonexistent/mmcore.toml").unwrap();
        assert_eq!(settings, CoreSettings::default());
    }

    #[test]
    #[serial]
    fn test_invalid_values_are_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "buffer_memory_footprint_mb = 0").unwrap();
        let err = CoreSettings::load_from(file.path()).unwrap_err();
        assert!(matches!(err, CoreError::Settings(_)));

        let mut settings = CoreSettings::default();
        settings.log.level = "verbose".into();
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_serializes_to_toml() {
        let text = toml::to_string(&CoreSettings::default()).unwrap();
        assert!(text.contains("timeout_ms = 5000"));
        assert!(text.contains("[log]"));
    }
}
