//! Demo shutter (`DShutter`).

use crate::common::{BusyWindow, DemoBase, FaultConfig, TimingConfig};
use anyhow::Result;
use mmc_core::device::{Device, DeviceType, Shutter};
use mmc_core::property::{PropertyDescriptor, PropertyMap, PropertyOutcome};

/// Device name within the demo module.
pub const DEVICE_NAME: &str = "DShutter";
/// Open (1) / closed (0) property.
pub const PROP_STATE: &str = "State";

/// Simulated light shutter.
#[derive(Debug)]
pub struct DShutter {
    base: DemoBase,
    busy: BusyWindow,
    timing: TimingConfig,
}

impl DShutter {
    /// Creates a closed shutter.
    pub fn new() -> Self {
        Self::with_timing(TimingConfig::shutter())
    }

    /// Creates a shutter with a custom settling time.
    pub fn with_timing(timing: TimingConfig) -> Self {
        let base = DemoBase::new(DEVICE_NAME, "Demo shutter");
        base.properties().define(
            PropertyDescriptor::integer(PROP_STATE).with_allowed_values(["0", "1"]),
            "0",
        );
        Self {
            base,
            busy: BusyWindow::default(),
            timing,
        }
    }

    /// Replaces the fault scenarios.
    pub fn set_faults(&self, faults: FaultConfig) {
        self.base.set_faults(faults);
    }
}

impl Default for DShutter {
    fn default() -> Self {
        Self::new()
    }
}

impl Device for DShutter {
    fn name(&self) -> &str {
        self.base.name()
    }

    fn description(&self) -> String {
        self.base.description()
    }

    fn device_type(&self) -> DeviceType {
        DeviceType::Shutter
    }

    fn initialize(&self) -> Result<()> {
        self.base.initialize()
    }

    fn shutdown(&self) -> Result<()> {
        self.base.shutdown();
        Ok(())
    }

    fn busy(&self) -> bool {
        self.busy.is_busy()
    }

    fn properties(&self) -> &PropertyMap {
        self.base.properties()
    }

    fn set_property(&self, name: &str, value: &str) -> Result<PropertyOutcome> {
        if name == PROP_STATE {
            self.base.properties().descriptor(name)?.validate(value)?;
            self.set_open(value.trim() == "1")?;
            return Ok(PropertyOutcome::applied());
        }
        self.base.properties().set(name, value)?;
        Ok(PropertyOutcome::applied())
    }
}

impl Shutter for DShutter {
    fn set_open(&self, open: bool) -> Result<()> {
        self.base.check(if open { "open" } else { "close" })?;
        self.base
            .properties()
            .update(PROP_STATE, if open { "1" } else { "0" })?;
        self.busy.start(self.timing);
        tracing::trace!(open, "DShutter");
        Ok(())
    }

    fn is_open(&self) -> Result<bool> {
        Ok(self.base.properties().integer(PROP_STATE)? == 1)
    }
}
