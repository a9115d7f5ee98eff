//! Stages, shutters and state devices.
//!
//! Moves go through the capability traits; afterwards the matching property
//! (`Position`, `State`, `Label`) is re-read into the cache when the device
//! exposes it, so configuration groups referencing it see the new value.
//! State-device positions are set through their `State`/`Label` properties
//! and therefore behave exactly like any other property write.

use crate::core::Core;
use crate::properties::CORE_AUTO_SHUTTER;
use mmc_core::device::DeviceRole;
use mmc_core::error::{CoreError, CoreResult};
use mmc_core::events::CoreEvent;
use mmc_hardware::CORE_LABEL;
use std::sync::atomic::Ordering;

/// Stage property mirrored after moves.
pub(crate) const POSITION_PROPERTY: &str = "Position";
/// Shutter and state-device position property.
pub(crate) const STATE_PROPERTY: &str = "State";
/// State-device label property.
pub(crate) const LABEL_PROPERTY: &str = "Label";

impl Core {
    /// Re-reads `name` into the cache if `label` exposes it.
    ///
    /// Returns the changed pair for group notification.
    fn refresh_property(&self, label: &str, name: &str) -> Option<(String, String)> {
        let entry = self.loaded(label).ok()?;
        if !entry.handle.device().properties().contains(name) {
            return None;
        }
        match self.read_device_property(&entry, name) {
            Ok(_) => Some((label.to_string(), name.to_string())),
            Err(e) => {
                tracing::debug!(label, property = name, error = %e, "cannot refresh property after move");
                None
            }
        }
    }

    // =========================================================================
    // Focus stage
    // =========================================================================

    /// Moves the current focus stage to `position_um`.
    pub fn set_position(&self, position_um: f64) -> CoreResult<()> {
        let stage = self.require_role(DeviceRole::Focus)?;
        self.set_position_for(&stage, position_um)
    }

    /// Moves stage `label` to `position_um`.
    pub fn set_position_for(&self, label: &str, position_um: f64) -> CoreResult<()> {
        let stage = self.registry.stage(label)?;
        stage
            .set_position_um(position_um)
            .map_err(|e| CoreError::device(label, e))?;
        self.stage_moved(label)
    }

    /// Position of the current focus stage.
    pub fn get_position(&self) -> CoreResult<f64> {
        let stage = self.require_role(DeviceRole::Focus)?;
        self.get_position_for(&stage)
    }

    /// Position of stage `label`.
    pub fn get_position_for(&self, label: &str) -> CoreResult<f64> {
        self.registry
            .stage(label)?
            .position_um()
            .map_err(|e| CoreError::device(label, e))
    }

    /// Moves the current focus stage by `delta_um`.
    pub fn set_relative_position(&self, delta_um: f64) -> CoreResult<()> {
        let label = self.require_role(DeviceRole::Focus)?;
        self.registry
            .stage(&label)?
            .set_relative_position_um(delta_um)
            .map_err(|e| CoreError::device(&label, e))?;
        self.stage_moved(&label)
    }

    /// Declares the current focus position to be zero.
    pub fn set_origin(&self) -> CoreResult<()> {
        let label = self.require_role(DeviceRole::Focus)?;
        self.registry
            .stage(&label)?
            .set_origin()
            .map_err(|e| CoreError::device(&label, e))?;
        self.stage_moved(&label)
    }

    fn stage_moved(&self, label: &str) -> CoreResult<()> {
        let position_um = self.get_position_for(label)?;
        let changed: Vec<_> = self.refresh_property(label, POSITION_PROPERTY).into_iter().collect();
        self.events.dispatch(&CoreEvent::StagePositionChanged {
            device: label.to_string(),
            position_um,
        });
        self.notify_groups(&changed);
        Ok(())
    }

    // =========================================================================
    // XY stage
    // =========================================================================

    /// Moves the current XY stage.
    pub fn set_xy_position(&self, x_um: f64, y_um: f64) -> CoreResult<()> {
        let stage = self.require_role(DeviceRole::XYStage)?;
        self.set_xy_position_for(&stage, x_um, y_um)
    }

    /// Moves XY stage `label`.
    pub fn set_xy_position_for(&self, label: &str, x_um: f64, y_um: f64) -> CoreResult<()> {
        self.registry
            .xy_stage(label)?
            .set_xy_position_um(x_um, y_um)
            .map_err(|e| CoreError::device(label, e))?;
        self.xy_stage_moved(label)
    }

    /// Moves the current XY stage by an offset.
    pub fn set_relative_xy_position(&self, dx_um: f64, dy_um: f64) -> CoreResult<()> {
        let label = self.require_role(DeviceRole::XYStage)?;
        self.registry
            .xy_stage(&label)?
            .set_relative_xy_position_um(dx_um, dy_um)
            .map_err(|e| CoreError::device(&label, e))?;
        self.xy_stage_moved(&label)
    }

    /// Position of the current XY stage.
    pub fn get_xy_position(&self) -> CoreResult<(f64, f64)> {
        let stage = self.require_role(DeviceRole::XYStage)?;
        self.get_xy_position_for(&stage)
    }

    /// Position of XY stage `label`.
    pub fn get_xy_position_for(&self, label: &str) -> CoreResult<(f64, f64)> {
        self.registry
            .xy_stage(label)?
            .xy_position_um()
            .map_err(|e| CoreError::device(label, e))
    }

    /// X of the current XY stage.
    pub fn get_x_position(&self) -> CoreResult<f64> {
        Ok(self.get_xy_position()?.0)
    }

    /// Y of the current XY stage.
    pub fn get_y_position(&self) -> CoreResult<f64> {
        Ok(self.get_xy_position()?.1)
    }

    /// Declares the current XY position to be the origin.
    pub fn set_origin_xy(&self) -> CoreResult<()> {
        let label = self.require_role(DeviceRole::XYStage)?;
        self.registry
            .xy_stage(&label)?
            .set_origin()
            .map_err(|e| CoreError::device(&label, e))?;
        self.xy_stage_moved(&label)
    }

    fn xy_stage_moved(&self, label: &str) -> CoreResult<()> {
        let (x_um, y_um) = self.get_xy_position_for(label)?;
        self.events.dispatch(&CoreEvent::XYStagePositionChanged {
            device: label.to_string(),
            x_um,
            y_um,
        });
        Ok(())
    }

    // =========================================================================
    // Shutter
    // =========================================================================

    /// Opens or closes the current shutter.
    pub fn set_shutter_open(&self, open: bool) -> CoreResult<()> {
        let shutter = self.require_role(DeviceRole::Shutter)?;
        self.set_shutter_open_for(&shutter, open)
    }

    /// Opens or closes shutter `label`.
    pub fn set_shutter_open_for(&self, label: &str, open: bool) -> CoreResult<()> {
        self.registry
            .shutter(label)?
            .set_open(open)
            .map_err(|e| CoreError::device(label, e))?;
        if let Some(changed) = self.refresh_property(label, STATE_PROPERTY) {
            self.events.dispatch(&CoreEvent::PropertyChanged {
                device: label.to_string(),
                property: STATE_PROPERTY.to_string(),
                value: if open { "1" } else { "0" }.to_string(),
            });
            self.notify_groups(&[changed]);
        }
        Ok(())
    }

    /// True if the current shutter is open.
    pub fn get_shutter_open(&self) -> CoreResult<bool> {
        let label = self.require_role(DeviceRole::Shutter)?;
        self.get_shutter_open_for(&label)
    }

    /// True if shutter `label` is open.
    pub fn get_shutter_open_for(&self, label: &str) -> CoreResult<bool> {
        self.registry
            .shutter(label)?
            .is_open()
            .map_err(|e| CoreError::device(label, e))
    }

    /// Opens the shutter around snaps when `enable` is set.
    pub fn set_auto_shutter(&self, enable: bool) {
        self.auto_shutter.store(enable, Ordering::Release);
        self.events.dispatch(&CoreEvent::PropertyChanged {
            device: CORE_LABEL.to_string(),
            property: CORE_AUTO_SHUTTER.to_string(),
            value: if enable { "1" } else { "0" }.to_string(),
        });
    }

    // =========================================================================
    // State devices
    // =========================================================================

    /// Moves state device `label` to `position`.
    pub fn set_state(&self, label: &str, position: u32) -> CoreResult<()> {
        self.registry.state_device(label)?;
        self.set_property(label, STATE_PROPERTY, &position.to_string())
    }

    /// Current position of `label`.
    pub fn get_state(&self, label: &str) -> CoreResult<u32> {
        self.registry
            .state_device(label)?
            .position()
            .map_err(|e| CoreError::device(label, e))
    }

    /// Number of positions of `label`.
    pub fn get_number_of_states(&self, label: &str) -> CoreResult<u32> {
        Ok(self.registry.state_device(label)?.number_of_positions())
    }

    /// Moves `label` to the position named `state_label`.
    pub fn set_state_label(&self, label: &str, state_label: &str) -> CoreResult<()> {
        self.registry.state_device(label)?;
        self.set_property(label, LABEL_PROPERTY, state_label)
    }

    /// Name of the current position of `label`.
    pub fn get_state_label(&self, label: &str) -> CoreResult<String> {
        let device = self.registry.state_device(label)?;
        let position = device.position().map_err(|e| CoreError::device(label, e))?;
        device
            .position_label(position)
            .map_err(|e| CoreError::device(label, e))
    }

    /// Names position `position` of `label`.
    pub fn define_state_label(&self, label: &str, position: u32, state_label: &str) -> CoreResult<()> {
        if state_label.is_empty() {
            return Err(CoreError::InvalidArgument("empty state label".into()));
        }
        self.registry
            .state_device(label)?
            .define_position_label(position, state_label)
            .map_err(|e| CoreError::device(label, e))?;
        self.refresh_property(label, LABEL_PROPERTY);
        self.log.core_debug(&format!(
            "Position {position} of {label} labeled {state_label}"
        ));
        self.events.dispatch(&CoreEvent::PropertiesChanged);
        Ok(())
    }

    /// Position names of `label`, by position.
    pub fn get_state_labels(&self, label: &str) -> CoreResult<Vec<String>> {
        Ok(self.registry.state_device(label)?.position_labels())
    }

    /// Position of `label` named `state_label`.
    pub fn get_state_from_label(&self, label: &str, state_label: &str) -> CoreResult<u32> {
        self.registry
            .state_device(label)?
            .position_for_label(state_label)
            .map_err(|e| CoreError::device(label, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mmc_core::events::CoreObserver;
    use parking_lot::Mutex;
    use std::sync::Arc;

    fn recorder(core: &Core) -> Arc<Mutex<Vec<CoreEvent>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let observer: Arc<dyn CoreObserver> =
            Arc::new(move |event: &CoreEvent| sink.lock().push(event.clone()));
        core.register_observer(observer);
        seen
    }

    fn loaded(core: &Core, label: &str, device: &str) {
        core.load_device(label, "DemoCamera", device).unwrap();
        core.initialize_device(label).unwrap();
    }

    #[test]
    fn test_focus_moves_and_events() {
        let core = Core::new();
        loaded(&core, "Z", "DStage");
        core.set_focus_device("Z").unwrap();
        let seen = recorder(&core);

        core.set_position(12.5).unwrap();
        assert!((core.get_position().unwrap() - 12.5).abs() < 1e-9);
        core.set_relative_position(-2.5).unwrap();
        assert!((core.get_position().unwrap() - 10.0).abs() < 1e-9);
        assert_eq!(core.get_property("Z", "Position").unwrap(), "10.0000");
        core.set_origin().unwrap();
        assert!(core.get_position().unwrap().abs() < 1e-9);

        let moves = seen
            .lock()
            .iter()
            .filter(|e| matches!(e, CoreEvent::StagePositionChanged { .. }))
            .count();
        assert_eq!(moves, 3);
    }

    #[test]
    fn test_xy_moves() {
        let core = Core::new();
        loaded(&core, "XY", "DXYStage");
        core.set_xy_stage_device("XY").unwrap();
        let seen = recorder(&core);

        core.set_xy_position(100.0, -50.0).unwrap();
        core.set_relative_xy_position(1.0, 1.0).unwrap();
        let (x, y) = core.get_xy_position().unwrap();
        assert!((x - 101.0).abs() < 0.1 && (y + 49.0).abs() < 0.1);
        assert!((core.get_x_position().unwrap() - x).abs() < 1e-9);
        assert!(seen.lock().iter().any(|e| matches!(
            e,
            CoreEvent::XYStagePositionChanged { device, .. } if device == "XY"
        )));
    }

    #[test]
    fn test_focus_requires_role() {
        let core = Core::new();
        assert!(matches!(
            core.set_position(1.0),
            Err(CoreError::RoleNotAssigned(DeviceRole::Focus))
        ));
    }

    #[test]
    fn test_shutter_and_auto_shutter() {
        let core = Core::new();
        loaded(&core, "Shutter", "DShutter");
        core.set_shutter_device("Shutter").unwrap();
        core.set_shutter_open(true).unwrap();
        assert!(core.get_shutter_open().unwrap());
        assert_eq!(core.get_property("Shutter", "State").unwrap(), "1");
        core.set_shutter_open(false).unwrap();
        assert!(!core.get_shutter_open().unwrap());

        let seen = recorder(&core);
        core.set_auto_shutter(false);
        assert!(!core.get_auto_shutter());
        assert_eq!(core.get_property("Core", "AutoShutter").unwrap(), "0");
        assert_eq!(
            seen.lock().last(),
            Some(&CoreEvent::PropertyChanged {
                device: "Core".into(),
                property: "AutoShutter".into(),
                value: "0".into(),
            })
        );
    }

    #[test]
    fn test_state_device_labels() {
        let core = Core::new();
        loaded(&core, "Wheel", "DWheel");
        assert_eq!(core.get_number_of_states("Wheel").unwrap(), 10);

        core.set_state("Wheel", 3).unwrap();
        assert_eq!(core.get_state("Wheel").unwrap(), 3);
        assert_eq!(core.get_state_label("Wheel").unwrap(), "State-3");

        core.define_state_label("Wheel", 3, "GFP").unwrap();
        assert_eq!(core.get_state_label("Wheel").unwrap(), "GFP");
        assert_eq!(core.get_property("Wheel", "Label").unwrap(), "GFP");
        assert_eq!(core.get_state_from_label("Wheel", "GFP").unwrap(), 3);

        core.set_state_label("Wheel", "State-5").unwrap();
        assert_eq!(core.get_state("Wheel").unwrap(), 5);
        assert_eq!(core.get_property("Wheel", "State").unwrap(), "5");
        assert_eq!(core.get_state_labels("Wheel").unwrap()[3], "GFP");
    }

    #[test]
    fn test_state_ops_reject_other_types() {
        let core = Core::new();
        loaded(&core, "Z", "DStage");
        assert!(matches!(
            core.set_state("Z", 1),
            Err(CoreError::IncompatibleDevice { .. })
        ));
    }
}
