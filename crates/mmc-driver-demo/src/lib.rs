//! Simulated devices for mmcore
//!
//! This crate provides the `DemoCamera` adapter module: a set of simulated
//! devices for exercising the core without hardware. Devices block the
//! calling thread the way real adapters do (a snap sleeps for the exposure).
//!
//! # Available Devices
//!
//! - [`DCam`] - camera with binning, ROI, five pixel types and test patterns
//! - [`DStage`] - focus stage, ±10 mm travel
//! - [`DXYStage`] - XY stage, ±50 mm travel
//! - [`DShutter`] - shutter
//! - [`DemoStateDevice`] - `DWheel` (10 positions), `DObjective` (6),
//!   `DLightPath` (3)
//! - [`MedianFilter`] - 3×3 median image processor
//! - [`DStorage`] - raw dataset writer
//!
//! # Registration
//!
//! ```rust,ignore
//! use mmc_hardware::AdapterCatalog;
//!
//! let catalog = AdapterCatalog::new();
//! mmc_driver_demo::register(&catalog);
//! assert!(catalog.contains("DemoCamera"));
//! ```

pub mod common;
mod demo_camera;
mod demo_shutter;
mod demo_stage;
mod demo_state;
mod demo_storage;
mod median_filter;
mod pattern;

use anyhow::{bail, Result};
use mmc_core::adapter::{AdapterModule, DeviceDescriptor, ModuleRegistry};
use mmc_core::device::{DeviceHandle, DeviceType};
use std::sync::Arc;

pub use common::{FaultConfig, FaultScenario, TimingConfig};
pub use demo_camera::DCam;
pub use demo_shutter::DShutter;
pub use demo_stage::{DStage, DXYStage};
pub use demo_state::DemoStateDevice;
pub use demo_storage::DStorage;
pub use median_filter::MedianFilter;
pub use pattern::{render, PatternMode};

/// Name the module registers under.
pub const MODULE_NAME: &str = "DemoCamera";

/// The `DemoCamera` adapter module.
#[derive(Debug, Clone, Default)]
pub struct DemoAdapter {
    seed: Option<u64>,
}

impl DemoAdapter {
    /// Module whose cameras draw noise from the OS RNG.
    pub fn new() -> Self {
        Self::default()
    }

    /// Module whose cameras use a fixed noise seed.
    pub fn with_seed(seed: u64) -> Self {
        Self { seed: Some(seed) }
    }
}

impl AdapterModule for DemoAdapter {
    fn name(&self) -> &str {
        MODULE_NAME
    }

    fn devices(&self) -> Vec<DeviceDescriptor> {
        vec![
            DeviceDescriptor::new("DCam", "Demo camera", DeviceType::Camera),
            DeviceDescriptor::new("DStage", "Demo stage", DeviceType::Stage),
            DeviceDescriptor::new("DXYStage", "Demo XY stage", DeviceType::XYStage),
            DeviceDescriptor::new("DShutter", "Demo shutter", DeviceType::Shutter),
            DeviceDescriptor::new("DWheel", "Demo filter wheel", DeviceType::State),
            DeviceDescriptor::new("DObjective", "Demo objective turret", DeviceType::State),
            DeviceDescriptor::new("DLightPath", "Demo light path", DeviceType::State),
            DeviceDescriptor::new(
                "MedianFilter",
                "3x3 median filter",
                DeviceType::ImageProcessor,
            ),
            DeviceDescriptor::new("DStorage", "Raw dataset writer", DeviceType::Storage),
        ]
    }

    fn instantiate(&self, device: &str) -> Result<DeviceHandle> {
        let handle = match device {
            "DCam" => DeviceHandle::camera(Arc::new(DCam::with_seed(self.seed))),
            "DStage" => DeviceHandle::stage(Arc::new(DStage::new())),
            "DXYStage" => DeviceHandle::xy_stage(Arc::new(DXYStage::new())),
            "DShutter" => DeviceHandle::shutter(Arc::new(DShutter::new())),
            "DWheel" => DeviceHandle::state(Arc::new(DemoStateDevice::wheel())),
            "DObjective" => DeviceHandle::state(Arc::new(DemoStateDevice::objective())),
            "DLightPath" => DeviceHandle::state(Arc::new(DemoStateDevice::light_path())),
            "MedianFilter" => DeviceHandle::image_processor(Arc::new(MedianFilter::new())),
            "DStorage" => DeviceHandle::storage(Arc::new(DStorage::new())),
            other => bail!("DemoCamera does not provide a device named {other}"),
        };
        tracing::debug!(device, "instantiated demo device");
        Ok(handle)
    }
}

/// Registers the `DemoCamera` module with `registry`.
pub fn register(registry: &impl ModuleRegistry) {
    registry.register_module(Arc::new(DemoAdapter::new()));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_descriptor_instantiates_with_its_type() {
        let adapter = DemoAdapter::with_seed(1);
        for descriptor in adapter.devices() {
            let handle = adapter.instantiate(&descriptor.name).unwrap();
            assert_eq!(handle.device_type(), descriptor.device_type);
            assert_eq!(handle.device().name(), descriptor.name);
            assert_eq!(handle.device().description(), descriptor.description);
        }
    }

    #[test]
    fn test_unknown_device() {
        assert!(DemoAdapter::new().instantiate("DLaser").is_err());
    }
}
