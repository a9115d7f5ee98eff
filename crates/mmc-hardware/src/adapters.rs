//! Catalog of adapter modules.
//!
//! Modules are linked into the binary and registered by name, either
//! directly with [`AdapterCatalog::register`] or through an adapter crate's
//! `register(&impl ModuleRegistry)` function. Looking up or instantiating a
//! device through the catalog maps every failure to
//! [`CoreError::AdapterLoadFailure`].

use mmc_core::adapter::{AdapterModule, DeviceDescriptor, ModuleRegistry};
use mmc_core::device::{DeviceHandle, DeviceType};
use mmc_core::error::{CoreError, CoreResult};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Adapter modules by name.
#[derive(Default)]
pub struct AdapterCatalog {
    modules: RwLock<BTreeMap<String, Arc<dyn AdapterModule>>>,
}

impl AdapterCatalog {
    /// Creates an empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `module`, replacing any module with the same name.
    pub fn register(&self, module: Arc<dyn AdapterModule>) {
        let name = module.name().to_string();
        tracing::debug!(module = %name, devices = module.devices().len(), "registered adapter module");
        self.modules.write().insert(name, module);
    }

    /// Module names, sorted.
    pub fn module_names(&self) -> Vec<String> {
        self.modules.read().keys().cloned().collect()
    }

    /// True if a module is registered under `name`.
    pub fn contains(&self, name: &str) -> bool {
        self.modules.read().contains_key(name)
    }

    /// Module registered under `name`.
    pub fn module(&self, name: &str) -> CoreResult<Arc<dyn AdapterModule>> {
        self.modules
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| CoreError::AdapterLoadFailure {
                module: name.to_string(),
                device: String::new(),
                reason: "no adapter module with this name is registered".into(),
            })
    }

    /// Descriptors of the devices `module` offers.
    pub fn descriptors(&self, module: &str) -> CoreResult<Vec<DeviceDescriptor>> {
        Ok(self.module(module)?.devices())
    }

    /// Device names `module` offers.
    pub fn available_devices(&self, module: &str) -> CoreResult<Vec<String>> {
        Ok(self.module(module)?.device_names())
    }

    /// Device descriptions, in the order of [`available_devices`](Self::available_devices).
    pub fn available_descriptions(&self, module: &str) -> CoreResult<Vec<String>> {
        Ok(self
            .descriptors(module)?
            .into_iter()
            .map(|d| d.description)
            .collect())
    }

    /// Device types, in the order of [`available_devices`](Self::available_devices).
    pub fn available_types(&self, module: &str) -> CoreResult<Vec<DeviceType>> {
        Ok(self
            .descriptors(module)?
            .into_iter()
            .map(|d| d.device_type)
            .collect())
    }

    /// Creates a fresh instance of `device` from `module`.
    pub fn instantiate(&self, module: &str, device: &str) -> CoreResult<DeviceHandle> {
        let adapter = self.module(module).map_err(|_| CoreError::AdapterLoadFailure {
            module: module.to_string(),
            device: device.to_string(),
            reason: "no adapter module with this name is registered".into(),
        })?;
        if adapter.describe(device).is_none() {
            return Err(CoreError::AdapterLoadFailure {
                module: module.to_string(),
                device: device.to_string(),
                reason: "the module does not offer this device".into(),
            });
        }
        adapter
            .instantiate(device)
            .map_err(|e| CoreError::AdapterLoadFailure {
                module: module.to_string(),
                device: device.to_string(),
                reason: format!("{e:#}"),
            })
    }
}

impl ModuleRegistry for AdapterCatalog {
    fn register_module(&self, module: Arc<dyn AdapterModule>) {
        self.register(module);
    }
}

impl std::fmt::Debug for AdapterCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdapterCatalog")
            .field("modules", &self.module_names())
            .finish()
    }
}
