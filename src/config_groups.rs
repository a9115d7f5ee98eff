//! Configuration groups, the channel group and pixel-size calibration.
//!
//! A preset is applied setting by setting through the same write path as
//! [`Core::set_property`]; property-level events fire for each setting but
//! group-level events are held back until the whole preset is applied.

use crate::core::Core;
use mmc_core::configuration::{
    Configuration, PropertySetting, IDENTITY_AFFINE, PIXEL_SIZE_GROUP,
};
use mmc_core::error::{CoreError, CoreResult};
use mmc_core::events::CoreEvent;

impl Core {
    // =========================================================================
    // Group and preset definitions
    // =========================================================================

    /// Creates an empty group.
    pub fn define_config_group(&self, group: &str) -> CoreResult<()> {
        validate_name("group", group)?;
        let mut groups = self.groups.write();
        if groups.contains_group(group) {
            return Err(CoreError::InvalidArgument(format!(
                "configuration group \"{group}\" already exists"
            )));
        }
        groups.define_group(group);
        Ok(())
    }

    /// Deletes `group`; clears the channel group if it pointed there.
    pub fn delete_config_group(&self, group: &str) -> CoreResult<()> {
        self.groups.write().delete_group(group)?;
        if self.get_channel_group() == group {
            self.set_channel_group("")?;
        }
        Ok(())
    }

    /// Renames `old` to `new`; the channel group follows.
    pub fn rename_config_group(&self, old: &str, new: &str) -> CoreResult<()> {
        validate_name("group", new)?;
        self.groups.write().rename_group(old, new)?;
        let mut channel = self.channel_group.write();
        if *channel == old {
            *channel = new.to_string();
        }
        Ok(())
    }

    /// Creates an empty preset, creating the group if needed.
    pub fn define_config(&self, group: &str, preset: &str) -> CoreResult<()> {
        validate_name("group", group)?;
        validate_name("preset", preset)?;
        self.groups.write().define_preset(group, preset);
        Ok(())
    }

    /// Adds (or replaces) one setting of a preset.
    pub fn define_config_setting(
        &self,
        group: &str,
        preset: &str,
        device: &str,
        property: &str,
        value: &str,
    ) -> CoreResult<()> {
        validate_name("group", group)?;
        validate_name("preset", preset)?;
        self.groups
            .write()
            .define_setting(group, preset, PropertySetting::new(device, property, value));
        Ok(())
    }

    /// Deletes a preset.
    pub fn delete_config(&self, group: &str, preset: &str) -> CoreResult<()> {
        self.groups.write().delete_preset(group, preset)
    }

    /// Deletes one setting of a preset.
    pub fn delete_config_setting(
        &self,
        group: &str,
        preset: &str,
        device: &str,
        property: &str,
    ) -> CoreResult<()> {
        self.groups
            .write()
            .delete_setting(group, preset, device, property)
    }

    /// Renames a preset.
    pub fn rename_config(&self, group: &str, old: &str, new: &str) -> CoreResult<()> {
        validate_name("preset", new)?;
        self.groups.write().rename_preset(group, old, new)
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// Group names, sorted.
    pub fn get_available_config_groups(&self) -> Vec<String> {
        self.groups.read().group_names()
    }

    /// Preset names of `group`, sorted.
    pub fn get_available_configs(&self, group: &str) -> CoreResult<Vec<String>> {
        self.groups.read().preset_names(group)
    }

    /// True if `group` exists.
    pub fn is_group_defined(&self, group: &str) -> bool {
        self.groups.read().contains_group(group)
    }

    /// True if `preset` exists in `group`.
    pub fn is_config_defined(&self, group: &str, preset: &str) -> bool {
        self.groups.read().contains_preset(group, preset)
    }

    /// Definition of a preset.
    pub fn get_config_data(&self, group: &str, preset: &str) -> CoreResult<Configuration> {
        Ok(self.groups.read().preset(group, preset)?.clone())
    }

    /// Current values of the properties a preset sets.
    pub fn get_config_state(&self, group: &str, preset: &str) -> CoreResult<Configuration> {
        let keys: Vec<(String, String)> = self
            .get_config_data(group, preset)?
            .iter()
            .map(|s| (s.device.clone(), s.property.clone()))
            .collect();
        self.cached_state(&keys)
    }

    /// Current values of every property any preset of `group` sets.
    pub fn get_config_group_state(&self, group: &str) -> CoreResult<Configuration> {
        let keys = self.groups.read().group_properties(group)?;
        self.cached_state(&keys)
    }

    fn cached_state(&self, keys: &[(String, String)]) -> CoreResult<Configuration> {
        let mut state = Configuration::new();
        for (device, property) in keys {
            let value = self.get_property(device, property)?;
            state.add(PropertySetting::new(device.as_str(), property.as_str(), value));
        }
        Ok(state)
    }

    /// First preset of `group` whose settings all match the cache, or "".
    pub fn get_current_config(&self, group: &str) -> CoreResult<String> {
        let state = self.get_config_group_state(group)?;
        self.groups.read().current_preset(group, &state)
    }

    /// Waits until every device the preset touches is idle.
    pub fn wait_for_config(&self, group: &str, preset: &str) -> CoreResult<()> {
        for device in self.get_config_data(group, preset)?.devices() {
            self.wait_for_device(&device)?;
        }
        Ok(())
    }

    // =========================================================================
    // Applying presets
    // =========================================================================

    /// Applies a preset in order, then fires one `ConfigGroupChanged`.
    ///
    /// Other groups and pixel-size presets touched by the settings are
    /// announced first; the applied group's event comes last. Stops at the
    /// first failing setting with `ConfigApply`, listing the devices that
    /// already received settings.
    pub fn set_config(&self, group: &str, preset: &str) -> CoreResult<()> {
        let config = self.get_config_data(group, preset)?;
        let changed = self.apply_settings(group, preset, &config)?;
        self.notify_related(&changed, Some(group), true);
        self.log
            .core_debug(&format!("Configuration {group}.{preset} applied"));
        self.events.dispatch(&CoreEvent::ConfigGroupChanged {
            group: group.to_string(),
            preset: preset.to_string(),
        });
        Ok(())
    }

    /// Writes every setting of `config`, returning the changed properties.
    ///
    /// On failure the settings already written are still announced to the
    /// groups that reference them.
    fn apply_settings(
        &self,
        group: &str,
        preset: &str,
        config: &Configuration,
    ) -> CoreResult<Vec<(String, String)>> {
        let mut applied: Vec<String> = Vec::new();
        let mut changed: Vec<(String, String)> = Vec::new();
        for setting in config {
            match self.write_property(&setting.device, &setting.property, &setting.value) {
                Ok(pairs) => changed.extend(pairs),
                Err(source) => {
                    self.notify_groups(&changed);
                    return Err(CoreError::ConfigApply {
                        group: group.to_string(),
                        preset: preset.to_string(),
                        partially_applied: applied,
                        source: Box::new(source),
                    });
                }
            }
            if !applied.contains(&setting.device) {
                applied.push(setting.device.clone());
            }
        }
        Ok(changed)
    }

    // =========================================================================
    // Channel group
    // =========================================================================

    /// Designates `group` as the channel group; "" clears it.
    pub fn set_channel_group(&self, group: &str) -> CoreResult<()> {
        if !group.is_empty() && !self.is_group_defined(group) {
            return Err(CoreError::ConfigGroupNotFound(group.to_string()));
        }
        *self.channel_group.write() = group.to_string();
        self.events.dispatch(&CoreEvent::ChannelGroupChanged {
            group: group.to_string(),
        });
        Ok(())
    }

    /// Current channel group, or "".
    pub fn get_channel_group(&self) -> String {
        self.channel_group.read().clone()
    }

    // =========================================================================
    // Pixel size calibration
    // =========================================================================

    /// Adds a setting to pixel-size preset `id`, creating it if needed.
    pub fn define_pixel_size_config(
        &self,
        id: &str,
        device: &str,
        property: &str,
        value: &str,
    ) -> CoreResult<()> {
        validate_name("pixel size configuration", id)?;
        self.pixel_sizes
            .write()
            .define_setting(id, PropertySetting::new(device, property, value));
        Ok(())
    }

    /// Sets the unbinned pixel size of `id`.
    pub fn set_pixel_size_um(&self, id: &str, um: f64) -> CoreResult<()> {
        if !(um.is_finite() && um >= 0.0) {
            return Err(CoreError::InvalidArgument(format!("invalid pixel size {um}")));
        }
        self.pixel_sizes.write().set_pixel_size(id, um)
    }

    /// Sets the camera-to-stage affine transform of `id`.
    pub fn set_pixel_size_affine(&self, id: &str, affine: [f64; 6]) -> CoreResult<()> {
        self.pixel_sizes.write().set_affine(id, affine)
    }

    /// Pixel-size preset ids, sorted.
    pub fn get_available_pixel_size_configs(&self) -> Vec<String> {
        self.pixel_sizes.read().ids()
    }

    /// True if `id` exists.
    pub fn is_pixel_size_config_defined(&self, id: &str) -> bool {
        self.pixel_sizes.read().contains(id)
    }

    /// Deletes `id`.
    pub fn delete_pixel_size_config(&self, id: &str) -> CoreResult<()> {
        self.pixel_sizes.write().delete(id)
    }

    /// Renames `old` to `new`.
    pub fn rename_pixel_size_config(&self, old: &str, new: &str) -> CoreResult<()> {
        validate_name("pixel size configuration", new)?;
        self.pixel_sizes.write().rename(old, new)
    }

    /// Definition of pixel-size preset `id`.
    pub fn get_pixel_size_config_data(&self, id: &str) -> CoreResult<Configuration> {
        Ok(self.pixel_sizes.read().preset(id)?.settings.clone())
    }

    /// Unbinned pixel size of `id`.
    pub fn get_pixel_size_um_by_id(&self, id: &str) -> CoreResult<f64> {
        Ok(self.pixel_sizes.read().preset(id)?.pixel_size_um)
    }

    /// Applies pixel-size preset `id`.
    ///
    /// Groups referencing the applied properties fire `ConfigGroupChanged`,
    /// then `PixelSizeAffineChanged` and `PixelSizeChanged` follow.
    pub fn set_pixel_size_config(&self, id: &str) -> CoreResult<()> {
        let config = self.get_pixel_size_config_data(id)?;
        let changed = self.apply_settings(PIXEL_SIZE_GROUP, id, &config)?;
        self.notify_related(&changed, None, false);
        self.events.dispatch(&CoreEvent::PixelSizeAffineChanged {
            affine: self.get_pixel_size_affine(),
        });
        self.events.dispatch(&CoreEvent::PixelSizeChanged {
            size_um: self.get_pixel_size_um(),
        });
        Ok(())
    }

    /// Id of the first pixel-size preset matching the current state, or "".
    pub fn get_current_pixel_size_config(&self) -> String {
        self.current_pixel_size()
            .map(|(id, _, _)| id)
            .unwrap_or_default()
    }

    /// Calibrated pixel size times camera binning; 0 when nothing matches.
    pub fn get_pixel_size_um(&self) -> f64 {
        self.current_pixel_size()
            .map_or(0.0, |(_, um, _)| um * self.binning_factor())
    }

    /// Affine transform of the matching preset scaled by camera binning;
    /// identity when nothing matches.
    pub fn get_pixel_size_affine(&self) -> [f64; 6] {
        let Some((_, _, mut affine)) = self.current_pixel_size() else {
            return IDENTITY_AFFINE;
        };
        let factor = self.binning_factor();
        for i in [0, 1, 3, 4] {
            affine[i] *= factor;
        }
        affine
    }

    fn current_pixel_size(&self) -> Option<(String, f64, [f64; 6])> {
        let keys: Vec<(String, String)> = {
            let sizes = self.pixel_sizes.read();
            let mut keys = Vec::new();
            for (_, preset) in sizes.iter() {
                for s in &preset.settings {
                    let key = (s.device.clone(), s.property.clone());
                    if !keys.contains(&key) {
                        keys.push(key);
                    }
                }
            }
            keys
        };
        let mut state = Configuration::new();
        for (device, property) in &keys {
            match self.get_property(device, property) {
                Ok(value) => state.add(PropertySetting::new(device.as_str(), property.as_str(), value)),
                Err(e) => tracing::debug!(device = %device, property = %property, error = %e, "pixel size property unreadable"),
            }
        }
        self.pixel_sizes
            .read()
            .current(&state)
            .map(|(id, p)| (id.to_string(), p.pixel_size_um, p.affine))
    }

    fn binning_factor(&self) -> f64 {
        self.current_camera()
            .map_or(1.0, |(_, camera)| f64::from(camera.binning().max(1)))
    }
}

/// Names must be non-empty and free of `,`.
fn validate_name(kind: &str, name: &str) -> CoreResult<()> {
    if name.is_empty() || name.contains(',') {
        return Err(CoreError::InvalidArgument(format!(
            "invalid {kind} name \"{name}\""
        )));
    }
    Ok(())
}
