//! The `Core` facade: device registry, roles, observers and logging.
//!
//! `Core` owns every collaborator behind shared references so that the
//! sequence producer thread can hold what it needs (camera, buffer,
//! dispatcher) without borrowing the core. Its operations are split by
//! concern across this crate's modules; this one covers device lifecycle,
//! role assignment, adapter discovery and the log surface.
//!
//! Locks are never held across device I/O or event dispatch.

use crate::acquisition::AcquisitionEngine;
use crate::logging::{LogHandle, LogManager};
use crate::properties::PropertyCache;
use crate::settings::CoreSettings;
use mmc_core::adapter::AdapterModule;
use mmc_core::configuration::{ConfigGroupCollection, PixelSizeGroup};
use mmc_core::device::{Camera, DeviceRole, DeviceType, InitializationState};
use mmc_core::error::{CoreError, CoreResult};
use mmc_core::events::{CoreEvent, CoreObserver, EventDispatcher, ObserverHandle};
use mmc_core::limits::BUSY_POLL_INTERVAL;
use mmc_hardware::{AdapterCatalog, DeviceRegistry, LoadedDevice, CORE_LABEL};
use mmc_storage::CircularBuffer;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Version of the device interface the core expects from adapters.
pub const DEVICE_API_VERSION: u32 = 1;
/// Version of the adapter module contract.
pub const MODULE_API_VERSION: u32 = 1;

/// Device assigned to each role.
#[derive(Debug, Default)]
pub(crate) struct RoleTable {
    slots: RwLock<HashMap<DeviceRole, String>>,
}

impl RoleTable {
    pub(crate) fn get(&self, role: DeviceRole) -> Option<String> {
        self.slots.read().get(&role).cloned()
    }

    /// Assigns `label`; the empty label clears the role.
    pub(crate) fn set(&self, role: DeviceRole, label: &str) {
        let mut slots = self.slots.write();
        if label.is_empty() {
            slots.remove(&role);
        } else {
            slots.insert(role, label.to_string());
        }
    }

    /// Clears every role held by `label` and returns them.
    pub(crate) fn release(&self, label: &str) -> Vec<DeviceRole> {
        let mut slots = self.slots.write();
        let released: Vec<DeviceRole> = DeviceRole::ALL
            .into_iter()
            .filter(|r| slots.get(r).is_some_and(|l| l == label))
            .collect();
        for role in &released {
            slots.remove(role);
        }
        released
    }

    pub(crate) fn clear(&self) {
        self.slots.write().clear();
    }
}

/// Device management and image-acquisition core.
///
/// # Example
///
/// ```no_run
/// use mmcore::Core;
///
/// let core = Core::new();
/// core.load_device("Camera", "DemoCamera", "DCam")?;
/// core.initialize_device("Camera")?;
/// core.set_camera_device("Camera")?;
/// core.snap_image()?;
/// let image = core.get_image()?;
/// assert_eq!(image.width, 512);
/// # Ok::<(), mmc_core::CoreError>(())
/// ```
pub struct Core {
    pub(crate) catalog: AdapterCatalog,
    pub(crate) registry: Arc<DeviceRegistry>,
    pub(crate) roles: Arc<RoleTable>,
    pub(crate) cache: PropertyCache,
    pub(crate) groups: RwLock<ConfigGroupCollection>,
    pub(crate) pixel_sizes: RwLock<PixelSizeGroup>,
    pub(crate) channel_group: RwLock<String>,
    pub(crate) auto_shutter: AtomicBool,
    pub(crate) timeout_ms: AtomicU64,
    pub(crate) buffer: Arc<CircularBuffer>,
    pub(crate) events: Arc<EventDispatcher>,
    pub(crate) acquisition: AcquisitionEngine,
    pub(crate) log: Arc<LogManager>,
}

impl Default for Core {
    fn default() -> Self {
        Self::new()
    }
}

impl Core {
    /// Core with default settings.
    pub fn new() -> Self {
        let settings = CoreSettings::default();
        Self::build(&settings)
    }

    /// Core configured from `settings`, including its log destinations.
    pub fn with_settings(settings: &CoreSettings) -> CoreResult<Self> {
        settings.validate()?;
        let core = Self::build(settings);
        if let Some(path) = &settings.log.primary_file {
            core.log.set_primary_log_file(path, false)?;
        }
        core.log.enable_stderr_log(settings.log.stderr);
        core.log.enable_debug_log(settings.log.debug);
        Ok(core)
    }

    fn build(settings: &CoreSettings) -> Self {
        let core = Self {
            catalog: AdapterCatalog::new(),
            registry: Arc::new(DeviceRegistry::new()),
            roles: Arc::new(RoleTable::default()),
            cache: PropertyCache::default(),
            groups: RwLock::new(ConfigGroupCollection::new()),
            pixel_sizes: RwLock::new(PixelSizeGroup::new()),
            channel_group: RwLock::new(String::new()),
            auto_shutter: AtomicBool::new(true),
            timeout_ms: AtomicU64::new(settings.timeout_ms),
            buffer: Arc::new(CircularBuffer::with_footprint(
                settings.buffer_memory_footprint_mb,
            )),
            events: Arc::new(EventDispatcher::new()),
            acquisition: AcquisitionEngine::default(),
            log: Arc::new(LogManager::new()),
        };
        #[cfg(feature = "demo-adapter")]
        mmc_driver_demo::register(&core.catalog);
        core
    }

    /// Makes an adapter module available to `load_device`.
    pub fn register_adapter(&self, module: Arc<dyn AdapterModule>) {
        self.catalog.register(module);
    }

    // =========================================================================
    // Version
    // =========================================================================

    /// Core version string.
    pub fn get_version_info(&self) -> String {
        format!("MMCore version {}", env!("CARGO_PKG_VERSION"))
    }

    /// Device and module API versions.
    pub fn get_api_version_info(&self) -> String {
        format!("Device API version {DEVICE_API_VERSION}, Module API version {MODULE_API_VERSION}")
    }

    // =========================================================================
    // Adapter discovery
    // =========================================================================

    /// Registered adapter module names, sorted.
    pub fn get_device_adapter_names(&self) -> Vec<String> {
        self.catalog.module_names()
    }

    /// Device names offered by `module`.
    pub fn get_available_devices(&self, module: &str) -> CoreResult<Vec<String>> {
        self.catalog.available_devices(module)
    }

    /// Descriptions of the devices offered by `module`.
    pub fn get_available_device_descriptions(&self, module: &str) -> CoreResult<Vec<String>> {
        self.catalog.available_descriptions(module)
    }

    /// Types of the devices offered by `module`.
    pub fn get_available_device_types(&self, module: &str) -> CoreResult<Vec<DeviceType>> {
        self.catalog.available_types(module)
    }

    // =========================================================================
    // Device lifecycle
    // =========================================================================

    /// Instantiates `device` from `module` under `label`.
    pub fn load_device(&self, label: &str, module: &str, device: &str) -> CoreResult<()> {
        self.registry.load(&self.catalog, label, module, device)?;
        self.log
            .core(&format!("Device {label} loaded from {module}.{device}"));
        Ok(())
    }

    /// Runs the adapter initialization of `label`.
    ///
    /// An adapter failure is returned as `InitializationFailed`, not as an
    /// error; such a device may be initialized again.
    pub fn initialize_device(&self, label: &str) -> CoreResult<InitializationState> {
        let state = self.registry.initialize(label)?;
        self.cache.remove_device(label);
        match state {
            InitializationState::InitializedSuccessfully => {
                self.log.core(&format!("Device {label} initialized"))
            }
            _ => self
                .log
                .core(&format!("Device {label} failed to initialize")),
        }
        Ok(state)
    }

    /// Initializes every device that is still `Uninitialized`, in load order.
    pub fn initialize_all_devices(&self) -> CoreResult<()> {
        for label in self.registry.uninitialized() {
            self.initialize_device(&label)?;
        }
        Ok(())
    }

    /// Unloads `label`.
    ///
    /// Fails with `AcquisitionBusy` while a sequence runs on that camera.
    /// Roles held by the device are cleared.
    pub fn unload_device(&self, label: &str) -> CoreResult<()> {
        {
            let _control = self.acquisition.control.lock();
            if self.acquisition.running_camera().as_deref() == Some(label) {
                return Err(CoreError::AcquisitionBusy(label.to_string()));
            }
            self.registry.unload(label)?;
            self.acquisition.disarm(label);
        }
        self.cache.remove_device(label);
        for role in self.roles.release(label) {
            self.events.dispatch(&CoreEvent::PropertyChanged {
                device: CORE_LABEL.to_string(),
                property: role.core_property().to_string(),
                value: String::new(),
            });
        }
        self.log.core(&format!("Device {label} unloaded"));
        Ok(())
    }

    /// Stops any running sequence and unloads every device.
    ///
    /// A sequence that does not stop within the core timeout is logged and
    /// the unload proceeds anyway; the producer ends on its next camera
    /// error.
    pub fn unload_all_devices(&self) -> CoreResult<()> {
        self.force_stop();
        let removed = self.registry.unload_all();
        self.acquisition.disarm_all();
        self.roles.clear();
        self.cache.clear();
        self.log
            .core(&format!("Unloaded all devices ({})", removed.len()));
        Ok(())
    }

    /// Returns the core to its freshly constructed state.
    ///
    /// Unloads every device and clears roles, config groups, the channel
    /// group, pixel-size calibration and the buffered images. Observers and
    /// the buffer footprint stay.
    pub fn reset(&self) -> CoreResult<()> {
        self.unload_all_devices()?;
        if let Err(e) = self.buffer.release() {
            tracing::warn!(error = %e, "circular buffer kept after reset");
        }
        self.groups.write().clear();
        self.pixel_sizes.write().clear();
        self.channel_group.write().clear();
        self.auto_shutter.store(true, Ordering::Release);
        self.log.core("System reset");
        self.events.dispatch(&CoreEvent::PropertiesChanged);
        Ok(())
    }

    pub(crate) fn force_stop(&self) {
        if let Err(e) = self.acquisition.stop(self.timeout()) {
            tracing::warn!(error = %e, "forced acquisition stop failed");
        }
    }

    // =========================================================================
    // Device queries
    // =========================================================================

    /// `Core` followed by every loaded label in load order.
    pub fn get_loaded_devices(&self) -> Vec<String> {
        std::iter::once(CORE_LABEL.to_string())
            .chain(self.registry.labels())
            .collect()
    }

    /// Loaded labels whose type matches `device_type`.
    pub fn get_loaded_devices_of_type(&self, device_type: DeviceType) -> Vec<String> {
        match device_type {
            DeviceType::Core => vec![CORE_LABEL.to_string()],
            DeviceType::Any => self.get_loaded_devices(),
            other => self.registry.labels_of_type(other),
        }
    }

    pub(crate) fn loaded(&self, label: &str) -> CoreResult<LoadedDevice> {
        self.registry.get(label)
    }

    /// Type of `label`.
    pub fn get_device_type(&self, label: &str) -> CoreResult<DeviceType> {
        if label == CORE_LABEL {
            return Ok(DeviceType::Core);
        }
        Ok(self.loaded(label)?.device_type())
    }

    /// Adapter module `label` was loaded from.
    pub fn get_device_library(&self, label: &str) -> CoreResult<String> {
        if label == CORE_LABEL {
            return Ok(String::new());
        }
        Ok(self.loaded(label)?.module)
    }

    /// Adapter device name of `label`.
    pub fn get_device_name(&self, label: &str) -> CoreResult<String> {
        if label == CORE_LABEL {
            return Ok(CORE_LABEL.to_string());
        }
        Ok(self.loaded(label)?.device_name)
    }

    /// Description reported by the device.
    pub fn get_device_description(&self, label: &str) -> CoreResult<String> {
        if label == CORE_LABEL {
            return Ok("Core device".to_string());
        }
        Ok(self.loaded(label)?.handle.device().description())
    }

    /// Lifecycle state of `label`.
    pub fn get_device_initialization_state(
        &self,
        label: &str,
    ) -> CoreResult<InitializationState> {
        Ok(self.loaded(label)?.state)
    }

    /// True while `label` executes a command.
    pub fn device_busy(&self, label: &str) -> CoreResult<bool> {
        if label == CORE_LABEL {
            return Ok(false);
        }
        Ok(self.loaded(label)?.handle.device().busy())
    }

    /// Polls `label` until it is idle or the core timeout expires.
    pub fn wait_for_device(&self, label: &str) -> CoreResult<()> {
        if label == CORE_LABEL {
            return Ok(());
        }
        let entry = self.loaded(label)?;
        let device = entry.handle.device();
        let timeout = self.timeout();
        let started = Instant::now();
        while device.busy() {
            if started.elapsed() >= timeout {
                return Err(CoreError::Timeout {
                    label: label.to_string(),
                    timeout_ms: self.get_timeout_ms(),
                });
            }
            std::thread::sleep(BUSY_POLL_INTERVAL);
        }
        Ok(())
    }

    /// Waits for every loaded device.
    pub fn wait_for_system(&self) -> CoreResult<()> {
        for label in self.registry.labels() {
            self.wait_for_device(&label)?;
        }
        Ok(())
    }

    /// Device wait and acquisition stop timeout in milliseconds.
    pub fn get_timeout_ms(&self) -> u64 {
        self.timeout_ms.load(Ordering::Acquire)
    }

    /// Sets the core timeout.
    pub fn set_timeout_ms(&self, timeout_ms: u64) -> CoreResult<()> {
        if timeout_ms == 0 {
            return Err(CoreError::InvalidArgument("timeout must be positive".into()));
        }
        self.timeout_ms.store(timeout_ms, Ordering::Release);
        Ok(())
    }

    pub(crate) fn timeout(&self) -> Duration {
        Duration::from_millis(self.get_timeout_ms())
    }

    // =========================================================================
    // Roles
    // =========================================================================

    /// Assigns `label` to `role`; the empty label clears the role.
    ///
    /// Fires `PropertyChanged` for the matching `Core` property.
    pub fn set_role(&self, role: DeviceRole, label: &str) -> CoreResult<()> {
        if !label.is_empty() {
            let entry = self.loaded(label)?;
            let actual = entry.device_type();
            if actual != role.device_type() {
                return Err(CoreError::IncompatibleDevice {
                    label: label.to_string(),
                    expected: role.device_type(),
                    actual,
                });
            }
        }
        self.roles.set(role, label);
        self.log.core_debug(&format!("{} set to \"{label}\"", role));
        self.events.dispatch(&CoreEvent::PropertyChanged {
            device: CORE_LABEL.to_string(),
            property: role.core_property().to_string(),
            value: label.to_string(),
        });
        Ok(())
    }

    /// Device assigned to `role`, or the empty string.
    pub fn get_role(&self, role: DeviceRole) -> String {
        self.roles.get(role).unwrap_or_default()
    }

    /// Sets the current camera.
    pub fn set_camera_device(&self, label: &str) -> CoreResult<()> {
        self.set_role(DeviceRole::Camera, label)
    }

    /// Current camera label.
    pub fn get_camera_device(&self) -> String {
        self.get_role(DeviceRole::Camera)
    }

    /// Sets the current shutter.
    pub fn set_shutter_device(&self, label: &str) -> CoreResult<()> {
        self.set_role(DeviceRole::Shutter, label)
    }

    /// Current shutter label.
    pub fn get_shutter_device(&self) -> String {
        self.get_role(DeviceRole::Shutter)
    }

    /// Sets the current focus stage.
    pub fn set_focus_device(&self, label: &str) -> CoreResult<()> {
        self.set_role(DeviceRole::Focus, label)
    }

    /// Current focus stage label.
    pub fn get_focus_device(&self) -> String {
        self.get_role(DeviceRole::Focus)
    }

    /// Sets the current XY stage.
    pub fn set_xy_stage_device(&self, label: &str) -> CoreResult<()> {
        self.set_role(DeviceRole::XYStage, label)
    }

    /// Current XY stage label.
    pub fn get_xy_stage_device(&self) -> String {
        self.get_role(DeviceRole::XYStage)
    }

    /// Sets the current image processor.
    pub fn set_image_processor_device(&self, label: &str) -> CoreResult<()> {
        self.set_role(DeviceRole::ImageProcessor, label)
    }

    /// Current image processor label.
    pub fn get_image_processor_device(&self) -> String {
        self.get_role(DeviceRole::ImageProcessor)
    }

    /// Sets the current storage device.
    pub fn set_storage_device(&self, label: &str) -> CoreResult<()> {
        self.set_role(DeviceRole::Storage, label)
    }

    /// Current storage device label.
    pub fn get_storage_device(&self) -> String {
        self.get_role(DeviceRole::Storage)
    }

    pub(crate) fn require_role(&self, role: DeviceRole) -> CoreResult<String> {
        self.roles.get(role).ok_or(CoreError::RoleNotAssigned(role))
    }

    pub(crate) fn current_camera(&self) -> CoreResult<(String, Arc<dyn Camera>)> {
        let label = self.require_role(DeviceRole::Camera)?;
        let camera = self.registry.camera(&label)?;
        Ok((label, camera))
    }

    // =========================================================================
    // Observers
    // =========================================================================

    /// Appends an observer; it receives every subsequent event.
    pub fn register_observer(&self, observer: Arc<dyn CoreObserver>) -> ObserverHandle {
        self.events.register(observer)
    }

    /// Removes an observer; false if the handle is unknown.
    pub fn unregister_observer(&self, handle: ObserverHandle) -> bool {
        self.events.unregister(handle)
    }

    // =========================================================================
    // Log surface
    // =========================================================================

    /// Opens the primary log file; an empty path disables it.
    pub fn set_primary_log_file(&self, path: impl AsRef<Path>, truncate: bool) -> CoreResult<()> {
        self.log.set_primary_log_file(path, truncate)
    }

    /// Current primary log file.
    pub fn get_primary_log_file(&self) -> Option<PathBuf> {
        self.log.primary_log_file()
    }

    /// Mirrors the core log to stderr.
    pub fn enable_stderr_log(&self, enable: bool) {
        self.log.enable_stderr_log(enable);
    }

    /// True if the core log is mirrored to stderr.
    pub fn stderr_log_enabled(&self) -> bool {
        self.log.stderr_log_enabled()
    }

    /// Lets debug-only messages through to the primary file and stderr.
    pub fn enable_debug_log(&self, enable: bool) {
        self.log.enable_debug_log(enable);
    }

    /// True if debug-only messages reach the primary file and stderr.
    pub fn debug_log_enabled(&self) -> bool {
        self.log.debug_log_enabled()
    }

    /// Opens an additional log file.
    pub fn start_secondary_log(
        &self,
        path: impl AsRef<Path>,
        truncate: bool,
        enable_debug: bool,
    ) -> CoreResult<LogHandle> {
        self.log.start_secondary_log(path, truncate, enable_debug)
    }

    /// Closes a secondary log file.
    pub fn stop_secondary_log(&self, handle: LogHandle) -> CoreResult<()> {
        self.log.stop_secondary_log(handle)
    }

    /// Writes a client message to the core log.
    pub fn log_message(&self, message: &str, debug_only: bool) {
        self.log.log_message(message, debug_only);
    }
}

impl std::fmt::Debug for Core {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Core")
            .field("devices", &self.registry.labels())
            .field("roles", &self.roles)
            .field("observers", &self.events.observer_count())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_table_release() {
        let roles = RoleTable::default();
        roles.set(DeviceRole::Camera, "Cam");
        roles.set(DeviceRole::Shutter, "Shutter");
        assert_eq!(roles.release("Cam"), vec![DeviceRole::Camera]);
        assert!(roles.get(DeviceRole::Camera).is_none());
        assert_eq!(roles.get(DeviceRole::Shutter).as_deref(), Some("Shutter"));
        roles.set(DeviceRole::Shutter, "");
        assert!(roles.get(DeviceRole::Shutter).is_none());
    }

    #[test]
    fn test_version_strings() {
        let core = Core::new();
        assert!(core.get_version_info().starts_with("MMCore version"));
        assert!(core.get_api_version_info().contains("Device API version"));
    }

    #[test]
    fn test_core_pseudo_device_queries() {
        let core = Core::new();
        assert_eq!(core.get_loaded_devices(), vec!["Core"]);
        assert_eq!(core.get_device_type("Core").unwrap(), DeviceType::Core);
        assert!(!core.device_busy("Core").unwrap());
        assert!(matches!(
            core.get_device_type("Nope"),
            Err(CoreError::DeviceNotFound(_))
        ));
    }

    #[test]
    fn test_timeout_must_be_positive() {
        let core = Core::new();
        assert!(core.set_timeout_ms(0).is_err());
        core.set_timeout_ms(250).unwrap();
        assert_eq!(core.get_timeout_ms(), 250);
    }
}
