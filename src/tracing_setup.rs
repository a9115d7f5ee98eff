//! Process-wide `tracing` subscriber for the mmcore CLI.
//!
//! Library code only emits `tracing` events; binaries decide where they go.
//! `RUST_LOG` overrides the configured level when set, so
//! `RUST_LOG=mmc_driver_demo=trace` narrows output to the demo adapter.
//!
//! # Example
//! ```no_run
//! use mmcore::tracing_setup::{self, OutputFormat, TracingConfig};
//! use tracing::Level;
//!
//! tracing_setup::init(TracingConfig::new(Level::DEBUG).with_format(OutputFormat::Compact))?;
//! tracing::info!("core starting");
//! # Ok::<(), String>(())
//! ```

use crate::settings::CoreSettings;
use tracing::Level;
use tracing_subscriber::{
    filter::LevelFilter, fmt::format::FmtSpan, layer::SubscriberExt, util::SubscriberInitExt,
    EnvFilter, Layer, Registry,
};

/// How events are rendered on stderr.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Multi-line, colored
    Pretty,
    /// One line per event
    Compact,
    /// One JSON object per event, for log shippers
    Json,
}

/// Subscriber options.
#[derive(Debug, Clone)]
pub struct TracingConfig {
    /// Level used when `RUST_LOG` is unset
    pub level: Level,
    /// Event rendering
    pub format: OutputFormat,
    /// Emit span NEW/CLOSE events (useful around `load_system_configuration`)
    pub with_span_events: bool,
    /// Include source file and line
    pub with_file_and_line: bool,
    /// Include thread names (producer threads are named `mmcore-sequence-<camera>`)
    pub with_thread_names: bool,
    /// Only honored by [`OutputFormat::Pretty`]
    pub with_ansi: bool,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self::new(Level::INFO)
    }
}

impl TracingConfig {
    /// Compact output at `level`.
    pub fn new(level: Level) -> Self {
        Self {
            level,
            format: OutputFormat::Compact,
            with_span_events: false,
            with_file_and_line: false,
            with_thread_names: true,
            with_ansi: true,
        }
    }

    /// Takes the level from `settings.log.level`.
    pub fn from_settings(settings: &CoreSettings) -> Result<Self, String> {
        parse_log_level(&settings.log.level).map(Self::new)
    }

    /// Set output format
    pub fn with_format(self, format: OutputFormat) -> Self {
        Self { format, ..self }
    }

    /// Enable or disable span events
    pub fn with_span_events(self, with_span_events: bool) -> Self {
        Self {
            with_span_events,
            ..self
        }
    }

    /// Enable or disable ANSI colors
    pub fn with_ansi(self, with_ansi: bool) -> Self {
        Self { with_ansi, ..self }
    }

    fn filter(&self) -> EnvFilter {
        EnvFilter::builder()
            .with_default_directive(LevelFilter::from_level(self.level).into())
            .from_env_lossy()
    }

    fn stderr_layer(&self) -> Box<dyn Layer<Registry> + Send + Sync> {
        let spans = if self.with_span_events {
            FmtSpan::NEW | FmtSpan::CLOSE
        } else {
            FmtSpan::NONE
        };
        let base = tracing_subscriber::fmt::layer::<Registry>()
            .with_writer(std::io::stderr)
            .with_span_events(spans)
            .with_file(self.with_file_and_line)
            .with_line_number(self.with_file_and_line)
            .with_thread_names(self.with_thread_names);

        match self.format {
            OutputFormat::Pretty => base.pretty().with_ansi(self.with_ansi).boxed(),
            OutputFormat::Compact => base.compact().with_ansi(false).boxed(),
            OutputFormat::Json => base.json().with_ansi(false).boxed(),
        }
    }
}

/// Installs the global subscriber.
///
/// A second call, or a dispatcher already installed by a test harness, is
/// not an error.
pub fn init(config: TracingConfig) -> Result<(), String> {
    if tracing::dispatcher::has_been_set() {
        return Ok(());
    }
    let layer = config.stderr_layer().with_filter(config.filter());
    match tracing_subscriber::registry().with(layer).try_init() {
        Ok(()) => Ok(()),
        // lost a race with another initializer
        Err(_) if tracing::dispatcher::has_been_set() => Ok(()),
        Err(e) => Err(format!("cannot install tracing subscriber: {e}")),
    }
}

/// Parses `trace`, `debug`, `info`, `warn` or `error`, ignoring case.
pub fn parse_log_level(name: &str) -> Result<Level, String> {
    name.trim()
        .parse::<Level>()
        .map_err(|_| format!("unknown log level '{name}' (expected trace, debug, info, warn or error)"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_log_level() {
        assert_eq!(parse_log_level("trace"), Ok(Level::TRACE));
        assert_eq!(parse_log_level("warn"), Ok(Level::WARN));
        assert_eq!(parse_log_level("Debug"), Ok(Level::DEBUG));
        assert!(parse_log_level("loud").unwrap_err().contains("loud"));
    }

    #[test]
    fn test_config_from_settings() {
        let mut settings = CoreSettings::default();
        settings.log.level = "error".into();
        let config = TracingConfig::from_settings(&settings).unwrap();
        assert_eq!(config.level, Level::ERROR);
        assert_eq!(config.format, OutputFormat::Compact);

        settings.log.level = "bogus".into();
        assert!(TracingConfig::from_settings(&settings).is_err());
    }

    #[test]
    fn test_builder_keeps_level() {
        let config = TracingConfig::new(Level::WARN)
            .with_format(OutputFormat::Json)
            .with_span_events(true)
            .with_ansi(false);
        assert_eq!(config.level, Level::WARN);
        assert_eq!(config.format, OutputFormat::Json);
        assert!(config.with_span_events);
        assert!(!config.with_ansi);
        assert!(config.with_thread_names);
    }

    #[test]
    fn test_init_is_idempotent() {
        assert!(init(TracingConfig::default()).is_ok());
        assert!(init(TracingConfig::default().with_format(OutputFormat::Pretty)).is_ok());
    }
}
