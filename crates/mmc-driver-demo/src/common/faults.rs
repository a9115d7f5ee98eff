//! Fault injection for demo devices.
//!
//! Demo devices call [`FaultConfig::check`] at the top of every hardware
//! operation. A matching scenario turns the call into a [`DriverError`]
//! that reaches the core through `anyhow`.

use mmc_core::error::{DriverError, DriverErrorKind};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// One injected failure mode, keyed by operation name
/// (`acquire_frame`, `snap`, `move`, `open`, ...).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FaultScenario {
    /// `operation` succeeds `count` times, then fails on every later call.
    FailAfterN {
        /// Operation name.
        operation: &'static str,
        /// Successful calls before failing.
        count: u32,
    },
    /// `operation` always reports a timeout.
    Timeout {
        /// Operation name.
        operation: &'static str,
    },
}

impl FaultScenario {
    fn operation(&self) -> &'static str {
        match self {
            Self::FailAfterN { operation, .. } | Self::Timeout { operation } => operation,
        }
    }
}

/// Scenarios plus per-operation call counters. Clones share counters.
#[derive(Debug, Clone, Default)]
pub struct FaultConfig {
    scenarios: Arc<Vec<FaultScenario>>,
    calls: Arc<Mutex<HashMap<&'static str, u32>>>,
}

impl FaultConfig {
    /// No faults.
    pub fn none() -> Self {
        Self::default()
    }

    /// A single scenario.
    pub fn scenario(scenario: FaultScenario) -> Self {
        Self {
            scenarios: Arc::new(vec![scenario]),
            calls: Arc::default(),
        }
    }

    /// Fails `operation` of `device` if a scenario says so.
    pub fn check(&self, device: &str, operation: &'static str) -> Result<(), DriverError> {
        for scenario in self.scenarios.iter().filter(|s| s.operation() == operation) {
            match scenario {
                FaultScenario::FailAfterN { count, .. } => {
                    let mut calls = self.calls.lock();
                    let seen = calls.entry(operation).or_default();
                    *seen += 1;
                    if *seen > *count {
                        return Err(DriverError::new(
                            device,
                            DriverErrorKind::Hardware,
                            format!("injected failure after {count} {operation} calls"),
                        ));
                    }
                }
                FaultScenario::Timeout { .. } => {
                    return Err(DriverError::new(
                        device,
                        DriverErrorKind::Timeout,
                        format!("{operation} timed out"),
                    ));
                }
            }
        }
        Ok(())
    }

    /// Restarts the call counters.
    pub fn reset(&self) {
        self.calls.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_none_never_fails() {
        let faults = FaultConfig::none();
        assert!((0..50).all(|_| faults.check("DCam", "snap").is_ok()));
    }

    #[test]
    fn test_fail_after_n() {
        let faults = FaultConfig::scenario(FaultScenario::FailAfterN {
            operation: "acquire_frame",
            count: 3,
        });
        for _ in 0..3 {
            assert!(faults.check("DCam", "acquire_frame").is_ok());
        }
        let err = faults.check("DCam", "acquire_frame").unwrap_err();
        assert_eq!(err.kind, DriverErrorKind::Hardware);
        assert!(faults.check("DCam", "acquire_frame").is_err());
        // other operations are unaffected
        assert!(faults.check("DCam", "snap").is_ok());

        faults.reset();
        assert!(faults.check("DCam", "acquire_frame").is_ok());
    }

    #[test]
    fn test_timeout_kind() {
        let faults = FaultConfig::scenario(FaultScenario::Timeout { operation: "move" });
        let err = faults.check("DStage", "move").unwrap_err();
        assert_eq!(err.kind, DriverErrorKind::Timeout);
        assert!(err.to_string().contains("timed out"));
        assert!(faults.check("DStage", "position").is_ok());
    }
}
