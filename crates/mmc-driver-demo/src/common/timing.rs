//! Simulated settling delays.
//!
//! Motion and shutter devices report `busy` for a short window after each
//! command, so `wait_for_device` has something to wait for.

use parking_lot::Mutex;
use std::time::{Duration, Instant};

/// Delays of one demo device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TimingConfig {
    /// Busy time after a command, in milliseconds.
    pub settling_time_ms: u64,
}

impl TimingConfig {
    /// Focus stage.
    pub fn stage() -> Self {
        Self {
            settling_time_ms: 20,
        }
    }

    /// XY stage.
    pub fn xy_stage() -> Self {
        Self {
            settling_time_ms: 30,
        }
    }

    /// Shutter.
    pub fn shutter() -> Self {
        Self {
            settling_time_ms: 5,
        }
    }

    /// No delay.
    pub fn instant() -> Self {
        Self::default()
    }
}

/// Tracks until when a device is busy.
#[derive(Debug, Default)]
pub struct BusyWindow {
    until: Mutex<Option<Instant>>,
}

impl BusyWindow {
    /// Marks the device busy for `timing.settling_time_ms`.
    pub fn start(&self, timing: TimingConfig) {
        if timing.settling_time_ms > 0 {
            *self.until.lock() =
                Some(Instant::now() + Duration::from_millis(timing.settling_time_ms));
        }
    }

    /// True while inside the window.
    pub fn is_busy(&self) -> bool {
        self.until.lock().is_some_and(|t| Instant::now() < t)
    }
}
