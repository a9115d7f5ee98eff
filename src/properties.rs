//! Property access, the `Core` pseudo-device and whole-system state.
//!
//! Reads are served from [`PropertyCache`] and fall through to the device on
//! a miss. Every write goes to the device first, after which the value (and
//! any side-effect properties the adapter reports) is read back into the
//! cache before observers are notified.

use crate::core::Core;
use crate::system_config::{parse_fields, write_header};
use mmc_core::configuration::{Configuration, PropertySetting};
use mmc_core::device::{DeviceRole, DeviceType, InitializationState};
use mmc_core::error::{CoreError, CoreResult};
use mmc_core::events::CoreEvent;
use mmc_core::property::{PropertyDescriptor, PropertyError, PropertyType};
use mmc_hardware::{LoadedDevice, CORE_LABEL};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::io::Write;
use std::path::Path;
use std::sync::atomic::Ordering;

/// `Core` property: close the shutter around snaps.
pub const CORE_AUTO_SHUTTER: &str = "AutoShutter";
/// `Core` property: channel configuration group.
pub const CORE_CHANNEL_GROUP: &str = "ChannelGroup";
/// `Core` property: device wait timeout.
pub const CORE_TIMEOUT_MS: &str = "TimeoutMs";
/// `Core` property: writing 1 initializes every loaded device.
pub const CORE_INITIALIZE: &str = "Initialize";

/// Camera property mirrored by `ExposureChanged`.
pub(crate) const EXPOSURE_PROPERTY: &str = "Exposure";

/// Last known property values per device.
#[derive(Debug, Default)]
pub(crate) struct PropertyCache {
    values: RwLock<HashMap<String, BTreeMap<String, String>>>,
}

impl PropertyCache {
    pub(crate) fn get(&self, label: &str, name: &str) -> Option<String> {
        self.values.read().get(label)?.get(name).cloned()
    }

    pub(crate) fn set(&self, label: &str, name: &str, value: &str) {
        self.values
            .write()
            .entry(label.to_string())
            .or_default()
            .insert(name.to_string(), value.to_string());
    }

    pub(crate) fn remove_device(&self, label: &str) {
        self.values.write().remove(label);
    }

    pub(crate) fn clear(&self) {
        self.values.write().clear();
    }
}

/// Maps an adapter failure to the core error for device `label`.
///
/// Property validation failures raised inside the adapter keep their
/// specific kind; everything else becomes `CoreError::Device`.
pub(crate) fn adapter_error(label: &str, value: &str, err: anyhow::Error) -> CoreError {
    match err.downcast::<PropertyError>() {
        Ok(property) => property.into_core_error(label, value),
        Err(other) => CoreError::device(label, other),
    }
}

fn flag(value: bool) -> &'static str {
    if value {
        "1"
    } else {
        "0"
    }
}

impl Core {
    // =========================================================================
    // Reads
    // =========================================================================

    /// Value of `name`, from the cache when known.
    pub fn get_property(&self, label: &str, name: &str) -> CoreResult<String> {
        if label == CORE_LABEL {
            return self.core_property(name);
        }
        if let Some(value) = self.cache.get(label, name) {
            return Ok(value);
        }
        self.get_property_from_device(label, name)
    }

    /// Value of `name` read from the device; refreshes the cache.
    pub fn get_property_from_device(&self, label: &str, name: &str) -> CoreResult<String> {
        if label == CORE_LABEL {
            return self.core_property(name);
        }
        let entry = self.loaded(label)?;
        self.read_device_property(&entry, name)
    }

    pub(crate) fn read_device_property(&self, entry: &LoadedDevice, name: &str) -> CoreResult<String> {
        let value = entry
            .handle
            .device()
            .get_property(name)
            .map_err(|e| adapter_error(&entry.label, "", e))?;
        self.cache.set(&entry.label, name, &value);
        Ok(value)
    }

    // =========================================================================
    // Writes
    // =========================================================================

    /// Writes `value` to property `name` of `label`.
    ///
    /// Fires `PropertyChanged` (or one `PropertiesChanged` when the adapter
    /// reports side effects), then `ExposureChanged` for a camera exposure,
    /// then `ConfigGroupChanged` for every group referencing a changed
    /// property.
    pub fn set_property(&self, label: &str, name: &str, value: &str) -> CoreResult<()> {
        let changed = self.write_property(label, name, value)?;
        self.notify_groups(&changed);
        Ok(())
    }

    /// Applies one property and fires the property-level events.
    ///
    /// Returns the (device, property) pairs whose values changed.
    pub(crate) fn write_property(
        &self,
        label: &str,
        name: &str,
        value: &str,
    ) -> CoreResult<Vec<(String, String)>> {
        if label == CORE_LABEL {
            self.set_core_property(name, value)?;
            return Ok(vec![(CORE_LABEL.to_string(), name.to_string())]);
        }

        let entry = self.loaded(label)?;
        let device = entry.handle.device();
        let descriptor = device
            .property_descriptor(name)
            .map_err(|e| adapter_error(label, value, e))?;
        if descriptor.read_only {
            return Err(CoreError::PropertyReadOnly {
                label: label.to_string(),
                property: name.to_string(),
            });
        }
        descriptor
            .validate(value)
            .map_err(|e| e.into_core_error(label, value))?;
        if !descriptor.pre_init && entry.state != InitializationState::InitializedSuccessfully {
            return Err(CoreError::DeviceNotInitialized(label.to_string()));
        }

        let outcome = device
            .set_property(name, value)
            .map_err(|e| adapter_error(label, value, e))?;
        let current = self.read_device_property(&entry, name)?;
        let mut changed = vec![(label.to_string(), name.to_string())];
        for side in &outcome.side_effects {
            match self.read_device_property(&entry, side) {
                Ok(_) => changed.push((label.to_string(), side.clone())),
                Err(e) => tracing::warn!(label, property = %side, error = %e, "cannot refresh side effect"),
            }
        }
        self.log
            .core_debug(&format!("{label}.{name} set to {current}"));

        if outcome.has_side_effects() {
            self.events.dispatch(&CoreEvent::PropertiesChanged);
        } else {
            self.events.dispatch(&CoreEvent::PropertyChanged {
                device: label.to_string(),
                property: name.to_string(),
                value: current.clone(),
            });
        }
        if entry.device_type() == DeviceType::Camera && name == EXPOSURE_PROPERTY {
            if let Ok(exposure_ms) = current.trim().parse::<f64>() {
                self.events.dispatch(&CoreEvent::ExposureChanged {
                    device: label.to_string(),
                    exposure_ms,
                });
            }
        }
        Ok(changed)
    }

    /// Fires `ConfigGroupChanged` for every group referencing a changed
    /// property, and `PixelSizeChanged` when a calibration depends on one.
    pub(crate) fn notify_groups(&self, changed: &[(String, String)]) {
        self.notify_related(changed, None, true);
    }

    /// Group and pixel-size fan-out for a batch of changed properties.
    ///
    /// `skip_group` is left out (the caller announces it itself), and
    /// `PixelSizeChanged` is only fired when `pixel_size` is set.
    pub(crate) fn notify_related(
        &self,
        changed: &[(String, String)],
        skip_group: Option<&str>,
        pixel_size: bool,
    ) {
        let (groups, pixel_size_affected) = {
            let collection = self.groups.read();
            let mut groups: Vec<String> = Vec::new();
            for (device, property) in changed {
                for group in collection.groups_containing(device, property) {
                    if Some(group.as_str()) != skip_group && !groups.contains(&group) {
                        groups.push(group);
                    }
                }
            }
            let pixel_sizes = self.pixel_sizes.read();
            let affected = pixel_size
                && pixel_sizes.iter().any(|(_, preset)| {
                    changed
                        .iter()
                        .any(|(d, p)| preset.settings.contains(d, p))
                });
            (groups, affected)
        };

        for group in groups {
            let preset = match self.get_current_config(&group) {
                Ok(preset) => preset,
                Err(e) => {
                    tracing::debug!(group = %group, error = %e, "group vanished during notification");
                    continue;
                }
            };
            self.events
                .dispatch(&CoreEvent::ConfigGroupChanged { group, preset });
        }
        if pixel_size_affected {
            let size_um = self.get_pixel_size_um();
            self.events.dispatch(&CoreEvent::PixelSizeChanged { size_um });
        }
    }

    // =========================================================================
    // Core pseudo-device
    // =========================================================================

    /// Property names of the `Core` pseudo-device, sorted.
    pub fn core_property_names(&self) -> Vec<String> {
        let mut names: Vec<String> = DeviceRole::ALL
            .iter()
            .map(|r| r.core_property().to_string())
            .chain(
                [CORE_AUTO_SHUTTER, CORE_CHANNEL_GROUP, CORE_TIMEOUT_MS, CORE_INITIALIZE]
                    .map(String::from),
            )
            .collect();
        names.sort();
        names
    }

    fn core_property(&self, name: &str) -> CoreResult<String> {
        if let Some(role) = DeviceRole::from_core_property(name) {
            return Ok(self.get_role(role));
        }
        match name {
            CORE_AUTO_SHUTTER => Ok(flag(self.get_auto_shutter()).to_string()),
            CORE_CHANNEL_GROUP => Ok(self.get_channel_group()),
            CORE_TIMEOUT_MS => Ok(self.get_timeout_ms().to_string()),
            CORE_INITIALIZE => {
                let all = !self.registry.is_empty() && self.registry.uninitialized().is_empty();
                Ok(flag(all).to_string())
            }
            _ => Err(unknown_core_property(name)),
        }
    }

    fn core_property_descriptor(&self, name: &str) -> CoreResult<PropertyDescriptor> {
        if let Some(role) = DeviceRole::from_core_property(name) {
            let choices = std::iter::once(String::new())
                .chain(self.registry.labels_of_type(role.device_type()));
            return Ok(PropertyDescriptor::string(name).with_allowed_values(choices));
        }
        let descriptor = match name {
            CORE_AUTO_SHUTTER | CORE_INITIALIZE => {
                PropertyDescriptor::integer(name).with_allowed_values(["0", "1"])
            }
            CORE_CHANNEL_GROUP => PropertyDescriptor::string(name).with_allowed_values(
                std::iter::once(String::new()).chain(self.groups.read().group_names()),
            ),
            CORE_TIMEOUT_MS => PropertyDescriptor::integer(name).with_limits(1.0, u32::MAX as f64),
            _ => return Err(unknown_core_property(name)),
        };
        Ok(descriptor)
    }

    fn set_core_property(&self, name: &str, value: &str) -> CoreResult<()> {
        if let Some(role) = DeviceRole::from_core_property(name) {
            return self.set_role(role, value);
        }
        self.core_property_descriptor(name)?
            .validate(value)
            .map_err(|e| e.into_core_error(CORE_LABEL, value))?;
        match name {
            CORE_AUTO_SHUTTER => self.set_auto_shutter(value.trim() == "1"),
            CORE_CHANNEL_GROUP => self.set_channel_group(value)?,
            CORE_TIMEOUT_MS => {
                let timeout_ms = value.trim().parse::<u64>().map_err(|_| {
                    CoreError::InvalidArgument(format!("\"{value}\" is not a timeout"))
                })?;
                self.set_timeout_ms(timeout_ms)?;
                self.events.dispatch(&CoreEvent::PropertyChanged {
                    device: CORE_LABEL.to_string(),
                    property: name.to_string(),
                    value: timeout_ms.to_string(),
                });
            }
            CORE_INITIALIZE => {
                if value.trim() == "1" {
                    self.initialize_all_devices()?;
                }
            }
            _ => return Err(unknown_core_property(name)),
        }
        Ok(())
    }

    // =========================================================================
    // Descriptor queries
    // =========================================================================

    /// Descriptor of `name`: type, allowed values, limits and flags.
    pub fn get_property_object(&self, label: &str, name: &str) -> CoreResult<PropertyDescriptor> {
        if label == CORE_LABEL {
            return self.core_property_descriptor(name);
        }
        self.loaded(label)?
            .handle
            .device()
            .property_descriptor(name)
            .map_err(|e| adapter_error(label, "", e))
    }

    /// Property names of `label`, sorted.
    pub fn get_device_property_names(&self, label: &str) -> CoreResult<Vec<String>> {
        if label == CORE_LABEL {
            return Ok(self.core_property_names());
        }
        Ok(self.loaded(label)?.handle.device().properties().names())
    }

    /// True if `label` defines `name`.
    pub fn has_property(&self, label: &str, name: &str) -> CoreResult<bool> {
        Ok(self.get_device_property_names(label)?.iter().any(|n| n == name))
    }

    /// True if `name` cannot be written.
    pub fn is_property_read_only(&self, label: &str, name: &str) -> CoreResult<bool> {
        Ok(self.get_property_object(label, name)?.read_only)
    }

    /// True if `name` may be set before initialization.
    pub fn is_property_pre_init(&self, label: &str, name: &str) -> CoreResult<bool> {
        Ok(self.get_property_object(label, name)?.pre_init)
    }

    /// Allowed values of `name`; empty when unrestricted.
    pub fn get_allowed_property_values(&self, label: &str, name: &str) -> CoreResult<Vec<String>> {
        Ok(self.get_property_object(label, name)?.allowed_values)
    }

    /// True if `name` declares numeric limits.
    pub fn has_property_limits(&self, label: &str, name: &str) -> CoreResult<bool> {
        Ok(self.get_property_object(label, name)?.has_limits())
    }

    /// Lower limit of `name`, 0 when unlimited.
    pub fn get_property_lower_limit(&self, label: &str, name: &str) -> CoreResult<f64> {
        Ok(self
            .get_property_object(label, name)?
            .limits
            .map_or(0.0, |(lower, _)| lower))
    }

    /// Upper limit of `name`, 0 when unlimited.
    pub fn get_property_upper_limit(&self, label: &str, name: &str) -> CoreResult<f64> {
        Ok(self
            .get_property_object(label, name)?
            .limits
            .map_or(0.0, |(_, upper)| upper))
    }

    /// Value type of `name`.
    pub fn get_property_type(&self, label: &str, name: &str) -> CoreResult<PropertyType> {
        Ok(self.get_property_object(label, name)?.kind)
    }

    // =========================================================================
    // System state
    // =========================================================================

    /// Every property of the core and of every device, read from the
    /// devices. Core first, then devices in load order, names sorted.
    pub fn get_system_state(&self) -> CoreResult<Configuration> {
        self.system_snapshot(true)
    }

    /// Same layout as [`get_system_state`](Self::get_system_state), served
    /// from the cache.
    pub fn get_system_state_cache(&self) -> CoreResult<Configuration> {
        self.system_snapshot(false)
    }

    fn system_snapshot(&self, from_devices: bool) -> CoreResult<Configuration> {
        let mut state = Configuration::new();
        for name in self.core_property_names() {
            let value = self.core_property(&name)?;
            state.add(PropertySetting::new(CORE_LABEL, name, value));
        }
        for entry in self.registry.devices() {
            for name in entry.handle.device().properties().names() {
                let value = if from_devices {
                    self.read_device_property(&entry, &name)?
                } else {
                    self.get_property(&entry.label, &name)?
                };
                state.add(PropertySetting::new(entry.label.as_str(), name, value));
            }
        }
        Ok(state)
    }

    /// Re-reads every device property into the cache.
    pub fn update_system_state_cache(&self) -> CoreResult<()> {
        for entry in self.registry.devices() {
            for name in entry.handle.device().properties().names() {
                self.read_device_property(&entry, &name)?;
            }
        }
        self.log.core_debug("System state cache updated");
        self.events.dispatch(&CoreEvent::PropertiesChanged);
        Ok(())
    }

    /// Applies `state` setting by setting.
    ///
    /// Read-only properties are skipped. Nothing is rolled back: settings
    /// before the first failure stay applied, and the failure names the
    /// setting that could not be restored.
    pub fn set_system_state(&self, state: &Configuration) -> CoreResult<()> {
        for setting in state {
            if setting.device == CORE_LABEL && setting.property == CORE_INITIALIZE {
                continue;
            }
            let applied = self
                .get_property_object(&setting.device, &setting.property)
                .and_then(|descriptor| {
                    if descriptor.read_only {
                        return Ok(());
                    }
                    self.set_property(&setting.device, &setting.property, &setting.value)
                });
            applied.map_err(|source| CoreError::SystemStateApply {
                device: setting.device.clone(),
                property: setting.property.clone(),
                value: setting.value.clone(),
                source: Box::new(source),
            })?;
        }
        Ok(())
    }

    /// Writes the current system state as `Property` lines.
    pub fn save_system_state(&self, path: impl AsRef<Path>) -> CoreResult<()> {
        let state = self.get_system_state()?;
        let mut out = std::io::BufWriter::new(std::fs::File::create(path.as_ref())?);
        write_header(&mut out, "System state")?;
        for s in &state {
            writeln!(out, "Property,{},{},{}", s.device, s.property, s.value)?;
        }
        out.flush()?;
        self.log
            .core(&format!("System state saved to {}", path.as_ref().display()));
        Ok(())
    }

    /// Reads `Property` lines from `path` and applies them with
    /// [`set_system_state`](Self::set_system_state).
    pub fn load_system_state(&self, path: impl AsRef<Path>) -> CoreResult<()> {
        let text = std::fs::read_to_string(path.as_ref())?;
        let mut state = Configuration::new();
        for (index, line) in text.lines().enumerate() {
            let Some(fields) = parse_fields(line) else {
                continue;
            };
            match fields.as_slice() {
                ["Property", device, property, value @ ..] => {
                    state.add(PropertySetting::new(*device, *property, value.join(",")));
                }
                _ => {
                    return Err(CoreError::ConfigFile {
                        line: index + 1,
                        reason: format!("expected a Property line, found \"{line}\""),
                    })
                }
            }
        }
        self.set_system_state(&state)?;
        self.log
            .core(&format!("System state loaded from {}", path.as_ref().display()));
        Ok(())
    }

    /// Whether the shutter opens automatically around snaps.
    pub fn get_auto_shutter(&self) -> bool {
        self.auto_shutter.load(Ordering::Acquire)
    }
}

fn unknown_core_property(name: &str) -> CoreError {
    CoreError::UnknownProperty {
        label: CORE_LABEL.to_string(),
        property: name.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mmc_core::error::{DriverError, DriverErrorKind};

    #[test]
    fn test_cache_round_trip() {
        let cache = PropertyCache::default();
        cache.set("Camera", "Exposure", "10");
        assert_eq!(cache.get("Camera", "Exposure").as_deref(), Some("10"));
        cache.remove_device("Camera");
        assert!(cache.get("Camera", "Exposure").is_none());
    }

    #[test]
    fn test_adapter_error_keeps_property_kind() {
        let err = adapter_error(
            "Camera",
            "x",
            anyhow::Error::new(PropertyError::ReadOnly("CameraName".into())),
        );
        assert!(matches!(err, CoreError::PropertyReadOnly { .. }));

        let err = adapter_error(
            "Camera",
            "",
            DriverError::new("DCam", DriverErrorKind::Hardware, "sensor fault").into(),
        );
        assert!(matches!(err, CoreError::Device { .. }));
    }

    #[test]
    fn test_core_properties() {
        let core = Core::new();
        let names = core.core_property_names();
        assert_eq!(names.first().map(String::as_str), Some("AutoShutter"));
        assert!(names.contains(&"Camera".to_string()));
        assert_eq!(core.get_property("Core", "AutoShutter").unwrap(), "1");
        assert_eq!(core.get_property("Core", "Initialize").unwrap(), "0");

        core.set_property("Core", "TimeoutMs", "1200").unwrap();
        assert_eq!(core.get_timeout_ms(), 1200);
        assert!(matches!(
            core.set_property("Core", "AutoShutter", "2"),
            Err(CoreError::PropertyValidation { .. })
        ));
        assert!(matches!(
            core.get_property("Core", "Bogus"),
            Err(CoreError::UnknownProperty { .. })
        ));
    }
}
