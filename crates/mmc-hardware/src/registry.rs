//! Loaded-device registry.
//!
//! The registry is the single owner of every loaded device. It maps labels
//! to [`LoadedDevice`] records in load order and tracks each device's
//! [`InitializationState`].
//!
//! The device table lock is never held across adapter calls: `initialize`
//! and `unload` clone the handle out, release the lock, talk to the device,
//! and then record the outcome. Initializations are serialized on a
//! separate lock so a device is never initialized twice concurrently.

use crate::adapters::AdapterCatalog;
use mmc_core::device::{
    Camera, DeviceHandle, DeviceType, ImageProcessor, InitializationState, Shutter, Stage,
    StateDevice, Storage, XYStage,
};
use mmc_core::error::{CoreError, CoreResult};
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;

/// Label of the core pseudo-device; never loadable.
pub const CORE_LABEL: &str = "Core";

/// One loaded device.
#[derive(Debug, Clone)]
pub struct LoadedDevice {
    /// User-chosen label.
    pub label: String,
    /// Adapter module the device came from.
    pub module: String,
    /// Adapter device name.
    pub device_name: String,
    /// Device and capability.
    pub handle: DeviceHandle,
    /// Lifecycle state.
    pub state: InitializationState,
}

impl LoadedDevice {
    /// Type of the device.
    pub fn device_type(&self) -> DeviceType {
        self.handle.device_type()
    }
}

/// Checks that `label` can name a device.
pub fn validate_label(label: &str) -> CoreResult<()> {
    if label.is_empty() {
        return Err(CoreError::InvalidArgument("device label must not be empty".into()));
    }
    if label == CORE_LABEL {
        return Err(CoreError::InvalidArgument(format!(
            "label \"{CORE_LABEL}\" is reserved for the core"
        )));
    }
    if label.contains(',') {
        return Err(CoreError::InvalidArgument(format!(
            "device label \"{label}\" must not contain ','"
        )));
    }
    Ok(())
}

/// Labels to loaded devices, in load order.
#[derive(Debug, Default)]
pub struct DeviceRegistry {
    devices: RwLock<Vec<LoadedDevice>>,
    init: Mutex<()>,
}

impl DeviceRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Instantiates `device` from `module` and registers it as `label`.
    ///
    /// The device starts `Uninitialized`.
    pub fn load(
        &self,
        catalog: &AdapterCatalog,
        label: &str,
        module: &str,
        device: &str,
    ) -> CoreResult<()> {
        validate_label(label)?;
        if self.contains(label) {
            return Err(CoreError::AlreadyLoaded(label.to_string()));
        }
        let handle = catalog.instantiate(module, device)?;
        self.insert(label, module, handle)?;
        tracing::info!(label, module, device, "device loaded");
        Ok(())
    }

    /// Registers an already constructed device as `label`.
    pub fn insert(&self, label: &str, module: &str, handle: DeviceHandle) -> CoreResult<()> {
        validate_label(label)?;
        let mut devices = self.devices.write();
        if devices.iter().any(|d| d.label == label) {
            return Err(CoreError::AlreadyLoaded(label.to_string()));
        }
        devices.push(LoadedDevice {
            label: label.to_string(),
            module: module.to_string(),
            device_name: handle.device().name().to_string(),
            handle,
            state: InitializationState::Uninitialized,
        });
        Ok(())
    }

    /// Runs the adapter's initialization step.
    ///
    /// An adapter failure is recorded as `InitializationFailed` and returned
    /// as state, not as an error.
    pub fn initialize(&self, label: &str) -> CoreResult<InitializationState> {
        let _init = self.init.lock();
        let entry = self.get(label)?;
        if entry.state == InitializationState::InitializedSuccessfully {
            return Err(CoreError::AlreadyInitialized(label.to_string()));
        }

        let state = match entry.handle.device().initialize() {
            Ok(()) => {
                tracing::info!(label, "device initialized");
                InitializationState::InitializedSuccessfully
            }
            Err(e) => {
                tracing::warn!(label, error = %format!("{e:#}"), "device initialization failed");
                InitializationState::InitializationFailed
            }
        };
        self.set_state(label, state)?;
        Ok(state)
    }

    fn set_state(&self, label: &str, state: InitializationState) -> CoreResult<()> {
        let mut devices = self.devices.write();
        let entry = devices
            .iter_mut()
            .find(|d| d.label == label)
            .ok_or_else(|| CoreError::DeviceNotFound(label.to_string()))?;
        entry.state = state;
        Ok(())
    }

    /// Removes `label` and shuts the device down.
    ///
    /// A shutdown failure is logged; the device is removed regardless.
    pub fn unload(&self, label: &str) -> CoreResult<LoadedDevice> {
        let removed = {
            let mut devices = self.devices.write();
            let index = devices
                .iter()
                .position(|d| d.label == label)
                .ok_or_else(|| CoreError::DeviceNotFound(label.to_string()))?;
            devices.remove(index)
        };
        shutdown(&removed);
        Ok(removed)
    }

    /// Unloads every device, newest first.
    pub fn unload_all(&self) -> Vec<LoadedDevice> {
        let mut removed = std::mem::take(&mut *self.devices.write());
        removed.reverse();
        for device in &removed {
            shutdown(device);
        }
        removed
    }

    /// Snapshot of `label`.
    pub fn get(&self, label: &str) -> CoreResult<LoadedDevice> {
        self.devices
            .read()
            .iter()
            .find(|d| d.label == label)
            .cloned()
            .ok_or_else(|| CoreError::DeviceNotFound(label.to_string()))
    }

    /// Handle of `label`.
    pub fn handle(&self, label: &str) -> CoreResult<DeviceHandle> {
        Ok(self.get(label)?.handle)
    }

    /// True if `label` is loaded.
    pub fn contains(&self, label: &str) -> bool {
        self.devices.read().iter().any(|d| d.label == label)
    }

    /// Labels in load order.
    pub fn labels(&self) -> Vec<String> {
        self.devices.read().iter().map(|d| d.label.clone()).collect()
    }

    /// Labels of devices matching `device_type`, in load order.
    pub fn labels_of_type(&self, device_type: DeviceType) -> Vec<String> {
        self.devices
            .read()
            .iter()
            .filter(|d| d.device_type().matches(device_type))
            .map(|d| d.label.clone())
            .collect()
    }

    /// Snapshots of every device, in load order.
    pub fn devices(&self) -> Vec<LoadedDevice> {
        self.devices.read().clone()
    }

    /// Labels still `Uninitialized`, in load order.
    pub fn uninitialized(&self) -> Vec<String> {
        self.devices
            .read()
            .iter()
            .filter(|d| d.state == InitializationState::Uninitialized)
            .map(|d| d.label.clone())
            .collect()
    }

    /// Number of loaded devices.
    pub fn len(&self) -> usize {
        self.devices.read().len()
    }

    /// True when nothing is loaded.
    pub fn is_empty(&self) -> bool {
        self.devices.read().is_empty()
    }

    fn capability<T: ?Sized>(
        &self,
        label: &str,
        expected: DeviceType,
        project: impl FnOnce(&DeviceHandle) -> Option<Arc<T>>,
    ) -> CoreResult<Arc<T>> {
        let handle = self.handle(label)?;
        project(&handle).ok_or_else(|| CoreError::IncompatibleDevice {
            label: label.to_string(),
            expected,
            actual: handle.device_type(),
        })
    }

    /// Camera capability of `label`.
    pub fn camera(&self, label: &str) -> CoreResult<Arc<dyn Camera>> {
        self.capability(label, DeviceType::Camera, DeviceHandle::as_camera)
    }

    /// Stage capability of `label`.
    pub fn stage(&self, label: &str) -> CoreResult<Arc<dyn Stage>> {
        self.capability(label, DeviceType::Stage, DeviceHandle::as_stage)
    }

    /// XY stage capability of `label`.
    pub fn xy_stage(&self, label: &str) -> CoreResult<Arc<dyn XYStage>> {
        self.capability(label, DeviceType::XYStage, DeviceHandle::as_xy_stage)
    }

    /// Shutter capability of `label`.
    pub fn shutter(&self, label: &str) -> CoreResult<Arc<dyn Shutter>> {
        self.capability(label, DeviceType::Shutter, DeviceHandle::as_shutter)
    }

    /// State device capability of `label`.
    pub fn state_device(&self, label: &str) -> CoreResult<Arc<dyn StateDevice>> {
        self.capability(label, DeviceType::State, DeviceHandle::as_state)
    }

    /// Storage capability of `label`.
    pub fn storage(&self, label: &str) -> CoreResult<Arc<dyn Storage>> {
        self.capability(label, DeviceType::Storage, DeviceHandle::as_storage)
    }

    /// Image processor capability of `label`.
    pub fn image_processor(&self, label: &str) -> CoreResult<Arc<dyn ImageProcessor>> {
        self.capability(
            label,
            DeviceType::ImageProcessor,
            DeviceHandle::as_image_processor,
        )
    }
}

fn shutdown(device: &LoadedDevice) {
    if let Err(e) = device.handle.device().shutdown() {
        tracing::warn!(label = %device.label, error = %format!("{e:#}"), "device shutdown failed");
    }
    tracing::info!(label = %device.label, "device unloaded");
}
