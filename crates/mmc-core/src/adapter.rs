//! Device adapter contract.
//!
//! An adapter module groups device implementations under one module name
//! and instantiates them by device name. Modules are linked into the binary
//! and registered with a [`ModuleRegistry`] at startup; the core never loads
//! code dynamically.

use crate::device::{DeviceHandle, DeviceType};
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Static description of a device an adapter module offers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceDescriptor {
    /// Device name within the module.
    pub name: String,
    /// Human-readable description.
    pub description: String,
    /// Type of the device.
    pub device_type: DeviceType,
}

impl DeviceDescriptor {
    /// Creates a descriptor.
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        device_type: DeviceType,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            device_type,
        }
    }
}

/// A collection of device implementations sharing one module name.
pub trait AdapterModule: Send + Sync {
    /// Module name, e.g. `DemoCamera`.
    fn name(&self) -> &str;

    /// Descriptors of every device the module offers.
    fn devices(&self) -> Vec<DeviceDescriptor>;

    /// Device names the module offers.
    fn device_names(&self) -> Vec<String> {
        self.devices().into_iter().map(|d| d.name).collect()
    }

    /// Descriptor of `device`, if offered.
    fn describe(&self, device: &str) -> Option<DeviceDescriptor> {
        self.devices().into_iter().find(|d| d.name == device)
    }

    /// Creates a fresh, uninitialized instance of `device`.
    fn instantiate(&self, device: &str) -> Result<DeviceHandle>;
}

/// Sink that adapter modules register themselves with.
pub trait ModuleRegistry {
    /// Adds `module`, replacing a module of the same name.
    fn register_module(&self, module: Arc<dyn AdapterModule>);
}
