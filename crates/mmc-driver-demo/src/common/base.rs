//! State shared by every demo device.

use super::faults::FaultConfig;
use anyhow::Result;
use mmc_core::error::{DriverError, DriverErrorKind};
use mmc_core::property::{PropertyDescriptor, PropertyMap};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};

/// Read-only device name property.
pub const PROP_NAME: &str = "Name";
/// Read-only device description property.
pub const PROP_DESCRIPTION: &str = "Description";
/// Pre-init switch that makes `initialize` fail.
pub const PROP_FAIL_INITIALIZE: &str = "FailInitialize";

/// Name, description, property table and fault hooks of a demo device.
///
/// Every demo device starts with three properties: `Name` and `Description`
/// (read-only) and the pre-init `FailInitialize` switch, which lets tests
/// exercise the `InitializationFailed` path through a configuration file.
#[derive(Debug)]
pub struct DemoBase {
    name: &'static str,
    description: &'static str,
    props: PropertyMap,
    faults: RwLock<FaultConfig>,
    initialized: AtomicBool,
}

impl DemoBase {
    /// Creates the shared state and its standard properties.
    pub fn new(name: &'static str, description: &'static str) -> Self {
        let props = PropertyMap::new();
        props.define(PropertyDescriptor::string(PROP_NAME).read_only(), name);
        props.define(
            PropertyDescriptor::string(PROP_DESCRIPTION).read_only(),
            description,
        );
        props.define(
            PropertyDescriptor::integer(PROP_FAIL_INITIALIZE)
                .pre_init()
                .with_allowed_values(["0", "1"]),
            "0",
        );
        Self {
            name,
            description,
            props,
            faults: RwLock::new(FaultConfig::none()),
            initialized: AtomicBool::new(false),
        }
    }

    /// Adapter device name.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Device description.
    pub fn description(&self) -> String {
        self.description.to_string()
    }

    /// Property table.
    pub fn properties(&self) -> &PropertyMap {
        &self.props
    }

    /// Replaces the fault scenarios.
    pub fn set_faults(&self, faults: FaultConfig) {
        *self.faults.write() = faults;
    }

    /// Current fault scenarios.
    pub fn faults(&self) -> FaultConfig {
        self.faults.read().clone()
    }

    /// Runs the fault hooks for `operation`.
    pub fn check(&self, operation: &'static str) -> Result<()> {
        self.faults.read().check(self.name, operation)?;
        Ok(())
    }

    /// Marks the device initialized unless `FailInitialize` is set.
    pub fn initialize(&self) -> Result<()> {
        if self.props.integer(PROP_FAIL_INITIALIZE)? == 1 {
            return Err(DriverError::new(
                self.name,
                DriverErrorKind::Initialization,
                "FailInitialize is set",
            )
            .into());
        }
        self.check("initialize")?;
        self.initialized.store(true, Ordering::SeqCst);
        tracing::debug!(device = self.name, "demo device initialized");
        Ok(())
    }

    /// Marks the device shut down.
    pub fn shutdown(&self) {
        self.initialized.store(false, Ordering::SeqCst);
        self.faults.read().reset();
    }

    /// True between `initialize` and `shutdown`.
    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }
}
