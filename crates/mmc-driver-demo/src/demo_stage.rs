//! Demo focus stage (`DStage`) and XY stage (`DXYStage`).
//!
//! Positions are in micrometers. Moves complete instantly but leave the
//! device busy for a short settling window.

use crate::common::{BusyWindow, DemoBase, FaultConfig, TimingConfig};
use anyhow::Result;
use mmc_core::device::{Device, DeviceType, Stage, XYStage};
use mmc_core::error::{DriverError, DriverErrorKind};
use mmc_core::property::{PropertyDescriptor, PropertyMap, PropertyOutcome};
use parking_lot::Mutex;

/// Focus stage device name.
pub const STAGE_NAME: &str = "DStage";
/// XY stage device name.
pub const XY_STAGE_NAME: &str = "DXYStage";
/// Focus position property.
pub const PROP_POSITION: &str = "Position";

const STAGE_TRAVEL_UM: f64 = 10_000.0;
const XY_TRAVEL_UM: f64 = 50_000.0;
const XY_STEP_UM: &str = "0.015";

fn out_of_travel(driver: &str, axis: &str, target: f64, travel: f64) -> DriverError {
    DriverError::new(
        driver,
        DriverErrorKind::InvalidParameter,
        format!("{axis} target {target} um is outside the travel range ±{travel} um"),
    )
}

#[derive(Debug, Default)]
struct Axis {
    raw: f64,
    origin: f64,
}

impl Axis {
    fn position(&self) -> f64 {
        self.raw - self.origin
    }
}

// =============================================================================
// DStage
// =============================================================================

/// Simulated single-axis focus drive.
#[derive(Debug)]
pub struct DStage {
    base: DemoBase,
    axis: Mutex<Axis>,
    busy: BusyWindow,
    timing: TimingConfig,
}

impl DStage {
    /// Creates a stage at 0 um.
    pub fn new() -> Self {
        Self::with_timing(TimingConfig::stage())
    }

    /// Creates a stage with a custom settling time.
    pub fn with_timing(timing: TimingConfig) -> Self {
        let base = DemoBase::new(STAGE_NAME, "Demo stage");
        base.properties().define(
            PropertyDescriptor::float(PROP_POSITION).with_limits(-STAGE_TRAVEL_UM, STAGE_TRAVEL_UM),
            "0.0000",
        );
        Self {
            base,
            axis: Mutex::new(Axis::default()),
            busy: BusyWindow::default(),
            timing,
        }
    }

    /// Replaces the fault scenarios.
    pub fn set_faults(&self, faults: FaultConfig) {
        self.base.set_faults(faults);
    }

    fn publish(&self, position: f64) -> Result<()> {
        self.base
            .properties()
            .update(PROP_POSITION, format!("{position:.4}"))?;
        Ok(())
    }
}

impl Default for DStage {
    fn default() -> Self {
        Self::new()
    }
}

impl Device for DStage {
    fn name(&self) -> &str {
        self.base.name()
    }

    fn description(&self) -> String {
        self.base.description()
    }

    fn device_type(&self) -> DeviceType {
        DeviceType::Stage
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
        if name == PROP_POSITION {
            self.base.properties().descriptor(name)?.validate(value)?;
            self.set_position_um(value.trim().parse()?)?;
            return Ok(PropertyOutcome::applied());
        }
        self.base.properties().set(name, value)?;
        Ok(PropertyOutcome::applied())
    }
}

impl Stage for DStage {
    fn set_position_um(&self, position: f64) -> Result<()> {
        self.base.check("move")?;
        if !(-STAGE_TRAVEL_UM..=STAGE_TRAVEL_UM).contains(&position) {
            return Err(out_of_travel(STAGE_NAME, "Z", position, STAGE_TRAVEL_UM).into());
        }
        {
            let mut axis = self.axis.lock();
            axis.raw = position + axis.origin;
        }
        self.busy.start(self.timing);
        tracing::trace!(position, "DStage moved");
        self.publish(position)
    }

    fn position_um(&self) -> Result<f64> {
        self.base.check("position")?;
        Ok(self.axis.lock().position())
    }

    fn set_origin(&self) -> Result<()> {
        self.base.check("set_origin")?;
        {
            let mut axis = self.axis.lock();
            axis.origin = axis.raw;
        }
        self.publish(0.0)
    }

    fn limits(&self) -> (f64, f64) {
        (-STAGE_TRAVEL_UM, STAGE_TRAVEL_UM)
    }
}

// =============================================================================
// DXYStage
// =============================================================================

/// Simulated two-axis stage.
#[derive(Debug)]
pub struct DXYStage {
    base: DemoBase,
    axes: Mutex<(Axis, Axis)>,
    busy: BusyWindow,
    timing: TimingConfig,
}

impl DXYStage {
    /// Creates a stage at (0, 0).
    pub fn new() -> Self {
        Self::with_timing(TimingConfig::xy_stage())
    }

    /// Creates a stage with a custom settling time.
    pub fn with_timing(timing: TimingConfig) -> Self {
        let base = DemoBase::new(XY_STAGE_NAME, "Demo XY stage");
        let props = base.properties();
        props.define(PropertyDescriptor::float("StepSizeX_um").read_only(), XY_STEP_UM);
        props.define(PropertyDescriptor::float("StepSizeY_um").read_only(), XY_STEP_UM);
        Self {
            base,
            axes: Mutex::new((Axis::default(), Axis::default())),
            busy: BusyWindow::default(),
            timing,
        }
    }

    /// Replaces the fault scenarios.
    pub fn set_faults(&self, faults: FaultConfig) {
        self.base.set_faults(faults);
    }
}

impl Default for DXYStage {
    fn default() -> Self {
        Self::new()
    }
}

impl Device for DXYStage {
    fn name(&self) -> &str {
        self.base.name()
    }

    fn description(&self) -> String {
        self.base.description()
    }

    fn device_type(&self) -> DeviceType {
        DeviceType::XYStage
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
}

impl XYStage for DXYStage {
    fn set_xy_position_um(&self, x: f64, y: f64) -> Result<()> {
        self.base.check("move")?;
        for (axis, target) in [("X", x), ("Y", y)] {
            if !(-XY_TRAVEL_UM..=XY_TRAVEL_UM).contains(&target) {
                return Err(out_of_travel(XY_STAGE_NAME, axis, target, XY_TRAVEL_UM).into());
            }
        }
        {
            let mut axes = self.axes.lock();
            axes.0.raw = x + axes.0.origin;
            axes.1.raw = y + axes.1.origin;
        }
        self.busy.start(self.timing);
        Ok(())
    }

    fn xy_position_um(&self) -> Result<(f64, f64)> {
        self.base.check("position")?;
        let axes = self.axes.lock();
        Ok((axes.0.position(), axes.1.position()))
    }

    fn set_origin(&self) -> Result<()> {
        self.base.check("set_origin")?;
        let mut axes = self.axes.lock();
        axes.0.origin = axes.0.raw;
        axes.1.origin = axes.1.raw;
        Ok(())
    }
}
