//! Demo state devices: filter wheel (`DWheel`), objective turret
//! (`DObjective`) and light path (`DLightPath`).
//!
//! All three share [`DemoStateDevice`]; they differ only in name and number
//! of positions. Positions are changed through the `State` (index) and
//! `Label` properties, and each reports the other as a side effect.

use crate::common::{DemoBase, FaultConfig};
use anyhow::Result;
use mmc_core::device::{Device, DeviceType, StateDevice};
use mmc_core::error::{DriverError, DriverErrorKind};
use mmc_core::property::{PropertyDescriptor, PropertyMap, PropertyOutcome};
use parking_lot::RwLock;

/// Filter wheel device name.
pub const WHEEL_NAME: &str = "DWheel";
/// Objective turret device name.
pub const OBJECTIVE_NAME: &str = "DObjective";
/// Light path device name.
pub const LIGHT_PATH_NAME: &str = "DLightPath";

/// Position index property.
pub const PROP_STATE: &str = "State";
/// Position label property.
pub const PROP_LABEL: &str = "Label";

/// Simulated discrete-position device.
#[derive(Debug)]
pub struct DemoStateDevice {
    base: DemoBase,
    labels: RwLock<Vec<String>>,
}

impl DemoStateDevice {
    /// Creates a device with `positions` positions labeled `State-0`,
    /// `State-1`, ...
    pub fn new(name: &'static str, description: &'static str, positions: u32) -> Self {
        let base = DemoBase::new(name, description);
        let labels: Vec<String> = (0..positions).map(|p| format!("State-{p}")).collect();
        let props = base.properties();
        props.define(
            PropertyDescriptor::integer(PROP_STATE)
                .with_allowed_values((0..positions).map(|p| p.to_string())),
            "0",
        );
        props.define(
            PropertyDescriptor::string(PROP_LABEL).with_allowed_values(labels.clone()),
            labels.first().cloned().unwrap_or_default(),
        );
        Self {
            base,
            labels: RwLock::new(labels),
        }
    }

    /// Ten-position filter wheel.
    pub fn wheel() -> Self {
        Self::new(WHEEL_NAME, "Demo filter wheel", 10)
    }

    /// Six-position objective turret.
    pub fn objective() -> Self {
        Self::new(OBJECTIVE_NAME, "Demo objective turret", 6)
    }

    /// Three-position light path.
    pub fn light_path() -> Self {
        Self::new(LIGHT_PATH_NAME, "Demo light path", 3)
    }

    /// Replaces the fault scenarios.
    pub fn set_faults(&self, faults: FaultConfig) {
        self.base.set_faults(faults);
    }

    fn bad_position(&self, position: u32, count: usize) -> DriverError {
        DriverError::new(
            self.base.name(),
            DriverErrorKind::InvalidParameter,
            format!("position {position} is out of range (0..{count})"),
        )
    }

    fn move_to(&self, position: u32) -> Result<()> {
        self.base.check("move")?;
        let label = self.position_label(position)?;
        let props = self.base.properties();
        props.update(PROP_STATE, position.to_string())?;
        props.update(PROP_LABEL, label)?;
        Ok(())
    }
}

impl Device for DemoStateDevice {
    fn name(&self) -> &str {
        self.base.name()
    }

    fn description(&self) -> String {
        self.base.description()
    }

    fn device_type(&self) -> DeviceType {
        DeviceType::State
    }

    fn initialize(&self) -> Result<()> {
        self.base.initialize()
    }

    fn shutdown(&self) -> Result<()> {
        self.base.shutdown();
        Ok(())
    }

    fn properties(&self) -> &PropertyMap {
        self.base.properties()
    }

    fn set_property(&self, name: &str, value: &str) -> Result<PropertyOutcome> {
        match name {
            PROP_STATE => {
                self.base.properties().descriptor(name)?.validate(value)?;
                self.move_to(value.trim().parse()?)?;
                Ok(PropertyOutcome::with_side_effects([PROP_LABEL]))
            }
            PROP_LABEL => {
                self.base.properties().descriptor(name)?.validate(value)?;
                self.move_to(self.position_for_label(value)?)?;
                Ok(PropertyOutcome::with_side_effects([PROP_STATE]))
            }
            _ => {
                self.base.properties().set(name, value)?;
                Ok(PropertyOutcome::applied())
            }
        }
    }
}

impl StateDevice for DemoStateDevice {
    fn number_of_positions(&self) -> u32 {
        self.labels.read().len() as u32
    }

    fn position(&self) -> Result<u32> {
        Ok(self.base.properties().integer(PROP_STATE)? as u32)
    }

    fn position_label(&self, position: u32) -> Result<String> {
        let labels = self.labels.read();
        labels
            .get(position as usize)
            .cloned()
            .ok_or_else(|| self.bad_position(position, labels.len()).into())
    }

    fn define_position_label(&self, position: u32, label: &str) -> Result<()> {
        let labels = {
            let mut labels = self.labels.write();
            let count = labels.len();
            let slot = labels
                .get_mut(position as usize)
                .ok_or_else(|| self.bad_position(position, count))?;
            *slot = label.to_string();
            labels.clone()
        };
        let props = self.base.properties();
        props.set_allowed_values(PROP_LABEL, labels)?;
        if self.position()? == position {
            props.update(PROP_LABEL, label)?;
        }
        Ok(())
    }

    fn position_for_label(&self, label: &str) -> Result<u32> {
        self.labels
            .read()
            .iter()
            .position(|l| l == label)
            .map(|p| p as u32)
            .ok_or_else(|| {
                DriverError::new(
                    self.base.name(),
                    DriverErrorKind::InvalidParameter,
                    format!("no position is labeled \"{label}\""),
                )
                .into()
            })
    }

    fn position_labels(&self) -> Vec<String> {
        self.labels.read().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_labels() {
        let wheel = DemoStateDevice::wheel();
        assert_eq!(wheel.number_of_positions(), 10);
        assert_eq!(wheel.position_label(3).unwrap(), "State-3");
        assert!(wheel.position_label(10).is_err());
        assert_eq!(DemoStateDevice::objective().number_of_positions(), 6);
        assert_eq!(DemoStateDevice::light_path().number_of_positions(), 3);
    }

    #[test]
    fn test_state_property_updates_label() {
        let wheel = DemoStateDevice::wheel();
        let outcome = wheel.set_property(PROP_STATE, "4").unwrap();
        assert_eq!(outcome.side_effects, vec![PROP_LABEL.to_string()]);
        assert_eq!(wheel.position().unwrap(), 4);
        assert_eq!(wheel.get_property(PROP_LABEL).unwrap(), "State-4");
        assert!(wheel.set_property(PROP_STATE, "10").is_err());
    }

    #[test]
    fn test_define_label_and_select_by_label() {
        let path = DemoStateDevice::light_path();
        path.define_position_label(1, "Camera").unwrap();
        assert_eq!(path.position_for_label("Camera").unwrap(), 1);
        path.set_property(PROP_LABEL, "Camera").unwrap();
        assert_eq!(path.position().unwrap(), 1);
        assert!(path.set_property(PROP_LABEL, "State-1").is_err());
        assert!(path.define_position_label(5, "Nope").is_err());
    }

    #[test]
    fn test_relabel_current_position() {
        let turret = DemoStateDevice::objective();
        turret.define_position_label(0, "10X").unwrap();
        assert_eq!(turret.get_property(PROP_LABEL).unwrap(), "10X");
        assert_eq!(turret.position_labels()[0], "10X");
    }
}
