//! Configuration presets and groups.
//!
//! A [`Configuration`] is an ordered list of (device, property, value)
//! settings, unique per (device, property). A [`ConfigGroupCollection`] maps
//! group names to named presets; [`PixelSizeGroup`] holds the pixel-size
//! calibration presets.

use crate::error::{CoreError, CoreResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One (device, property, value) triple.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PropertySetting {
    /// Device label.
    pub device: String,
    /// Property name.
    pub property: String,
    /// Value.
    pub value: String,
}

impl PropertySetting {
    /// Creates a setting.
    pub fn new(
        device: impl Into<String>,
        property: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        Self {
            device: device.into(),
            property: property.into(),
            value: value.into(),
        }
    }

    /// True if this setting targets (`device`, `property`).
    pub fn targets(&self, device: &str, property: &str) -> bool {
        self.device == device && self.property == property
    }
}

/// Ordered set of settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Configuration {
    settings: Vec<PropertySetting>,
}

impl Configuration {
    /// Creates an empty configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `setting`, replacing an existing one for the same property in
    /// place.
    pub fn add(&mut self, setting: PropertySetting) {
        match self
            .settings
            .iter_mut()
            .find(|s| s.targets(&setting.device, &setting.property))
        {
            Some(existing) => existing.value = setting.value,
            None => self.settings.push(setting),
        }
    }

    /// Removes the setting for (`device`, `property`); returns whether it
    /// existed.
    pub fn remove(&mut self, device: &str, property: &str) -> bool {
        let before = self.settings.len();
        self.settings.retain(|s| !s.targets(device, property));
        self.settings.len() != before
    }

    /// Setting for (`device`, `property`).
    pub fn get(&self, device: &str, property: &str) -> Option<&PropertySetting> {
        self.settings.iter().find(|s| s.targets(device, property))
    }

    /// True if the configuration sets (`device`, `property`).
    pub fn contains(&self, device: &str, property: &str) -> bool {
        self.get(device, property).is_some()
    }

    /// True if every setting of `self` is present with the same value in
    /// `state`.
    pub fn is_satisfied_by(&self, state: &Configuration) -> bool {
        self.settings.iter().all(|s| {
            state
                .get(&s.device, &s.property)
                .is_some_and(|current| values_equal(&current.value, &s.value))
        })
    }

    /// Iterates in insertion order.
    pub fn iter(&self) -> std::slice::Iter<'_, PropertySetting> {
        self.settings.iter()
    }

    /// Number of settings.
    pub fn len(&self) -> usize {
        self.settings.len()
    }

    /// True when empty.
    pub fn is_empty(&self) -> bool {
        self.settings.is_empty()
    }

    /// Distinct device labels in first-use order.
    pub fn devices(&self) -> Vec<String> {
        let mut devices: Vec<String> = Vec::new();
        for s in &self.settings {
            if !devices.contains(&s.device) {
                devices.push(s.device.clone());
            }
        }
        devices
    }
}

impl FromIterator<PropertySetting> for Configuration {
    fn from_iter<T: IntoIterator<Item = PropertySetting>>(iter: T) -> Self {
        let mut config = Configuration::new();
        for setting in iter {
            config.add(setting);
        }
        config
    }
}

impl<'a> IntoIterator for &'a Configuration {
    type Item = &'a PropertySetting;
    type IntoIter = std::slice::Iter<'a, PropertySetting>;

    fn into_iter(self) -> Self::IntoIter {
        self.settings.iter()
    }
}

/// Values compare numerically when both parse, textually otherwise.
fn values_equal(a: &str, b: &str) -> bool {
    if a == b {
        return true;
    }
    match (a.trim().parse::<f64>(), b.trim().parse::<f64>()) {
        (Ok(x), Ok(y)) => (x - y).abs() <= f64::EPSILON * x.abs().max(y.abs()).max(1.0),
        _ => false,
    }
}

// =============================================================================
// Config groups
// =============================================================================

/// Named groups of named presets.
#[derive(Debug, Clone, Default)]
pub struct ConfigGroupCollection {
    groups: BTreeMap<String, BTreeMap<String, Configuration>>,
}

impl ConfigGroupCollection {
    /// Creates an empty collection.
    pub fn new() -> Self {
        Self::default()
    }

    /// Defines an empty group; no-op if it exists.
    pub fn define_group(&mut self, group: &str) {
        self.groups.entry(group.to_string()).or_default();
    }

    /// Defines an empty preset (creating the group if needed).
    pub fn define_preset(&mut self, group: &str, preset: &str) {
        self.groups
            .entry(group.to_string())
            .or_default()
            .entry(preset.to_string())
            .or_default();
    }

    /// Adds a setting to a preset (creating group and preset if needed).
    pub fn define_setting(&mut self, group: &str, preset: &str, setting: PropertySetting) {
        self.groups
            .entry(group.to_string())
            .or_default()
            .entry(preset.to_string())
            .or_default()
            .add(setting);
    }

    /// Deletes a group.
    pub fn delete_group(&mut self, group: &str) -> CoreResult<()> {
        self.groups
            .remove(group)
            .map(|_| ())
            .ok_or_else(|| CoreError::ConfigGroupNotFound(group.to_string()))
    }

    /// Deletes a preset.
    pub fn delete_preset(&mut self, group: &str, preset: &str) -> CoreResult<()> {
        self.group_mut(group)?
            .remove(preset)
            .map(|_| ())
            .ok_or_else(|| not_found(group, preset))
    }

    /// Deletes one setting from a preset.
    pub fn delete_setting(
        &mut self,
        group: &str,
        preset: &str,
        device: &str,
        property: &str,
    ) -> CoreResult<()> {
        let config = self
            .group_mut(group)?
            .get_mut(preset)
            .ok_or_else(|| not_found(group, preset))?;
        if config.remove(device, property) {
            Ok(())
        } else {
            Err(CoreError::InvalidArgument(format!(
                "preset \"{preset}\" of group \"{group}\" does not set {device}.{property}"
            )))
        }
    }

    /// Renames a group.
    pub fn rename_group(&mut self, old: &str, new: &str) -> CoreResult<()> {
        if self.groups.contains_key(new) {
            return Err(CoreError::InvalidArgument(format!(
                "configuration group \"{new}\" already exists"
            )));
        }
        let presets = self
            .groups
            .remove(old)
            .ok_or_else(|| CoreError::ConfigGroupNotFound(old.to_string()))?;
        self.groups.insert(new.to_string(), presets);
        Ok(())
    }

    /// Renames a preset.
    pub fn rename_preset(&mut self, group: &str, old: &str, new: &str) -> CoreResult<()> {
        let presets = self.group_mut(group)?;
        if presets.contains_key(new) {
            return Err(CoreError::InvalidArgument(format!(
                "preset \"{new}\" already exists in group \"{group}\""
            )));
        }
        let config = presets.remove(old).ok_or_else(|| not_found(group, old))?;
        presets.insert(new.to_string(), config);
        Ok(())
    }

    /// True if the group exists.
    pub fn contains_group(&self, group: &str) -> bool {
        self.groups.contains_key(group)
    }

    /// True if the preset exists.
    pub fn contains_preset(&self, group: &str, preset: &str) -> bool {
        self.groups
            .get(group)
            .is_some_and(|presets| presets.contains_key(preset))
    }

    /// Group names, sorted.
    pub fn group_names(&self) -> Vec<String> {
        self.groups.keys().cloned().collect()
    }

    /// Preset names of `group`, sorted.
    pub fn preset_names(&self, group: &str) -> CoreResult<Vec<String>> {
        Ok(self.group(group)?.keys().cloned().collect())
    }

    /// Preset definition.
    pub fn preset(&self, group: &str, preset: &str) -> CoreResult<&Configuration> {
        self.group(group)?
            .get(preset)
            .ok_or_else(|| not_found(group, preset))
    }

    /// Union of the properties referenced by any preset of `group`.
    pub fn group_properties(&self, group: &str) -> CoreResult<Vec<(String, String)>> {
        let mut props: Vec<(String, String)> = Vec::new();
        for config in self.group(group)?.values() {
            for s in config {
                let key = (s.device.clone(), s.property.clone());
                if !props.contains(&key) {
                    props.push(key);
                }
            }
        }
        Ok(props)
    }

    /// Groups with at least one preset setting (`device`, `property`).
    pub fn groups_containing(&self, device: &str, property: &str) -> Vec<String> {
        self.groups
            .iter()
            .filter(|(_, presets)| presets.values().any(|c| c.contains(device, property)))
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// First preset of `group` (by name) satisfied by `state`, or empty.
    pub fn current_preset(&self, group: &str, state: &Configuration) -> CoreResult<String> {
        Ok(self
            .group(group)?
            .iter()
            .find(|(_, config)| !config.is_empty() && config.is_satisfied_by(state))
            .map(|(name, _)| name.clone())
            .unwrap_or_default())
    }

    /// Iterates over (group, preset, configuration).
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str, &Configuration)> {
        self.groups.iter().flat_map(|(group, presets)| {
            presets
                .iter()
                .map(move |(preset, config)| (group.as_str(), preset.as_str(), config))
        })
    }

    /// Removes all groups.
    pub fn clear(&mut self) {
        self.groups.clear();
    }

    fn group(&self, group: &str) -> CoreResult<&BTreeMap<String, Configuration>> {
        self.groups
            .get(group)
            .ok_or_else(|| CoreError::ConfigGroupNotFound(group.to_string()))
    }

    fn group_mut(&mut self, group: &str) -> CoreResult<&mut BTreeMap<String, Configuration>> {
        self.groups
            .get_mut(group)
            .ok_or_else(|| CoreError::ConfigGroupNotFound(group.to_string()))
    }
}

fn not_found(group: &str, preset: &str) -> CoreError {
    CoreError::ConfigNotFound {
        group: group.to_string(),
        preset: preset.to_string(),
    }
}

// =============================================================================
// Pixel size calibration
// =============================================================================

/// Identity affine transform.
pub const IDENTITY_AFFINE: [f64; 6] = [1.0, 0.0, 0.0, 0.0, 1.0, 0.0];

/// One pixel-size calibration preset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PixelSizePreset {
    /// Settings that identify the optical path (usually an objective).
    pub settings: Configuration,
    /// Unbinned pixel size in micrometers.
    pub pixel_size_um: f64,
    /// Camera-to-stage affine transform.
    pub affine: [f64; 6],
}

impl Default for PixelSizePreset {
    fn default() -> Self {
        Self {
            settings: Configuration::new(),
            pixel_size_um: 0.0,
            affine: IDENTITY_AFFINE,
        }
    }
}

/// Pixel-size calibration presets by resolution id.
#[derive(Debug, Clone, Default)]
pub struct PixelSizeGroup {
    presets: BTreeMap<String, PixelSizePreset>,
}

impl PixelSizeGroup {
    /// Creates an empty group.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a setting to `id`, creating the preset if needed.
    pub fn define_setting(&mut self, id: &str, setting: PropertySetting) {
        self.presets
            .entry(id.to_string())
            .or_default()
            .settings
            .add(setting);
    }

    /// Sets the pixel size of `id`.
    pub fn set_pixel_size(&mut self, id: &str, um: f64) -> CoreResult<()> {
        self.preset_mut(id)?.pixel_size_um = um;
        Ok(())
    }

    /// Sets the affine transform of `id`.
    pub fn set_affine(&mut self, id: &str, affine: [f64; 6]) -> CoreResult<()> {
        self.preset_mut(id)?.affine = affine;
        Ok(())
    }

    /// Preset `id`.
    pub fn preset(&self, id: &str) -> CoreResult<&PixelSizePreset> {
        self.presets
            .get(id)
            .ok_or_else(|| not_found(PIXEL_SIZE_GROUP, id))
    }

    /// True if `id` exists.
    pub fn contains(&self, id: &str) -> bool {
        self.presets.contains_key(id)
    }

    /// Deletes `id`.
    pub fn delete(&mut self, id: &str) -> CoreResult<()> {
        self.presets
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| not_found(PIXEL_SIZE_GROUP, id))
    }

    /// Renames `old` to `new`.
    pub fn rename(&mut self, old: &str, new: &str) -> CoreResult<()> {
        if self.presets.contains_key(new) {
            return Err(CoreError::InvalidArgument(format!(
                "pixel size configuration \"{new}\" already exists"
            )));
        }
        let preset = self
            .presets
            .remove(old)
            .ok_or_else(|| not_found(PIXEL_SIZE_GROUP, old))?;
        self.presets.insert(new.to_string(), preset);
        Ok(())
    }

    /// Resolution ids, sorted.
    pub fn ids(&self) -> Vec<String> {
        self.presets.keys().cloned().collect()
    }

    /// First preset satisfied by `state`.
    pub fn current(&self, state: &Configuration) -> Option<(&str, &PixelSizePreset)> {
        self.presets
            .iter()
            .find(|(_, p)| !p.settings.is_empty() && p.settings.is_satisfied_by(state))
            .map(|(id, p)| (id.as_str(), p))
    }

    /// Iterates over (id, preset).
    pub fn iter(&self) -> impl Iterator<Item = (&str, &PixelSizePreset)> {
        self.presets.iter().map(|(id, p)| (id.as_str(), p))
    }

    /// Removes all presets.
    pub fn clear(&mut self) {
        self.presets.clear();
    }

    fn preset_mut(&mut self, id: &str) -> CoreResult<&mut PixelSizePreset> {
        self.presets
            .get_mut(id)
            .ok_or_else(|| not_found(PIXEL_SIZE_GROUP, id))
    }
}

/// Group name used in errors about pixel-size presets.
pub const PIXEL_SIZE_GROUP: &str = "PixelSize";
