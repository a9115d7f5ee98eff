//! Core log surface.
//!
//! Besides `tracing`, the core writes its own line log to up to three kinds
//! of destination: one primary file, stderr, and any number of secondary
//! files addressed by [`LogHandle`]. Each line looks like
//!
//! ```text
//! 2026-10-18T09:12:44.123456 tid7 [IFO,Core] Device Camera loaded
//! 2026-10-18T09:12:44.130012 tid7 [dbg,App] frame 12 popped
//! ```
//!
//! Debug-only records reach the primary file and stderr only when debug
//! logging is enabled, and a secondary file only when it was started with
//! debug enabled. Every record is also forwarded to `tracing`.

use chrono::Local;
use mmc_core::error::{CoreError, CoreResult};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::{LineWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

/// Component name for client messages.
pub const APP_COMPONENT: &str = "App";
/// Component name for messages emitted by the core itself.
pub const CORE_COMPONENT: &str = "Core";

/// Handle of a secondary log file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LogHandle(pub u64);

struct LogFile {
    path: PathBuf,
    writer: LineWriter<File>,
    debug: bool,
}

impl LogFile {
    fn open(path: &Path, truncate: bool, debug: bool) -> CoreResult<Self> {
        let mut options = OpenOptions::new();
        options.create(true);
        if truncate {
            options.write(true).truncate(true);
        } else {
            options.append(true);
        }
        let file = options.open(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            writer: LineWriter::new(file),
            debug,
        })
    }

    fn write_line(&mut self, line: &str) {
        if let Err(e) = writeln!(self.writer, "{line}") {
            tracing::warn!(path = %self.path.display(), error = %e, "cannot write log line");
        }
    }
}

#[derive(Default)]
struct LogState {
    primary: Option<LogFile>,
    stderr: bool,
    debug: bool,
    secondaries: BTreeMap<LogHandle, LogFile>,
}

/// Primary, stderr and secondary log destinations.
#[derive(Default)]
pub struct LogManager {
    state: Mutex<LogState>,
    next_handle: AtomicU64,
}

impl LogManager {
    /// Manager with every destination disabled.
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens `path` as the primary log; an empty path disables it.
    pub fn set_primary_log_file(&self, path: impl AsRef<Path>, truncate: bool) -> CoreResult<()> {
        let path = path.as_ref();
        let file = if path.as_os_str().is_empty() {
            None
        } else {
            Some(LogFile::open(path, truncate, false)?)
        };
        self.state.lock().primary = file;
        tracing::debug!(path = %path.display(), "primary log file set");
        Ok(())
    }

    /// Current primary log file.
    pub fn primary_log_file(&self) -> Option<PathBuf> {
        self.state.lock().primary.as_ref().map(|f| f.path.clone())
    }

    /// Mirrors log lines to stderr.
    pub fn enable_stderr_log(&self, enable: bool) {
        self.state.lock().stderr = enable;
    }

    /// True if lines go to stderr.
    pub fn stderr_log_enabled(&self) -> bool {
        self.state.lock().stderr
    }

    /// Lets debug-only lines through to the primary file and stderr.
    pub fn enable_debug_log(&self, enable: bool) {
        self.state.lock().debug = enable;
    }

    /// True if debug-only lines reach the primary file and stderr.
    pub fn debug_log_enabled(&self) -> bool {
        self.state.lock().debug
    }

    /// Opens an additional log file.
    pub fn start_secondary_log(
        &self,
        path: impl AsRef<Path>,
        truncate: bool,
        enable_debug: bool,
    ) -> CoreResult<LogHandle> {
        let file = LogFile::open(path.as_ref(), truncate, enable_debug)?;
        let handle = LogHandle(self.next_handle.fetch_add(1, Ordering::Relaxed));
        self.state.lock().secondaries.insert(handle, file);
        Ok(handle)
    }

    /// Closes a secondary log file.
    pub fn stop_secondary_log(&self, handle: LogHandle) -> CoreResult<()> {
        let mut file = self
            .state
            .lock()
            .secondaries
            .remove(&handle)
            .ok_or(CoreError::UnknownLogHandle(handle.0))?;
        file.writer.flush()?;
        Ok(())
    }

    /// Logs a client message.
    pub fn log_message(&self, message: &str, debug_only: bool) {
        self.log(APP_COMPONENT, message, debug_only);
    }

    pub(crate) fn core(&self, message: &str) {
        self.log(CORE_COMPONENT, message, false);
    }

    pub(crate) fn core_debug(&self, message: &str) {
        self.log(CORE_COMPONENT, message, true);
    }

    /// Writes one record to every destination that accepts it.
    pub fn log(&self, component: &str, message: &str, debug_only: bool) {
        if debug_only {
            tracing::debug!(component, "{message}");
        } else {
            tracing::info!(component, "{message}");
        }

        let line = format_line(component, message, debug_only);
        let mut state = self.state.lock();
        let general = !debug_only || state.debug;
        if general {
            if let Some(primary) = state.primary.as_mut() {
                primary.write_line(&line);
            }
            if state.stderr {
                eprintln!("{line}");
            }
        }
        for secondary in state.secondaries.values_mut() {
            if !debug_only || secondary.debug {
                secondary.write_line(&line);
            }
        }
    }
}

impl std::fmt::Debug for LogManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("LogManager")
            .field("primary", &state.primary.as_ref().map(|p| p.path.clone()))
            .field("stderr", &state.stderr)
            .field("debug", &state.debug)
            .field("secondaries", &state.secondaries.len())
            .finish()
    }
}

fn format_line(component: &str, message: &str, debug_only: bool) -> String {
    let level = if debug_only { "dbg" } else { "IFO" };
    format!(
        "{} tid{} [{level},{component}] {message}",
        Local::now().format("%Y-%m-%dT%H:%M:%S%.6f"),
        thread_number()
    )
}

/// Numeric part of the current `ThreadId`.
fn thread_number() -> String {
    format!("{:?}", std::thread::current().id())
        .chars()
        .filter(char::is_ascii_digit)
        .collect()
}
