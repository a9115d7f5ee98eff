//! System configuration files.
//!
//! A configuration file is a line-oriented, comma-separated script replayed
//! against a freshly reset core:
//!
//! ```text
//! # Devices
//! Device,Camera,DemoCamera,DCam
//! Device,Wheel,DemoCamera,DWheel
//! Property,Core,Initialize,1
//! Label,Wheel,0,DAPI
//! ConfigGroup,Channel,DAPI,Wheel,Label,DAPI
//! ConfigPixelSize,Res10x,Objective,Label,10X
//! PixelSize_um,Res10x,1.0
//! PixelSizeAffine,Res10x,1.0,0.0,0.0,0.0,1.0,0.0
//! Property,Core,Camera,Camera
//! ```
//!
//! Values may contain commas: everything after the fixed fields is joined
//! back together. `Parent`, `Delay`, `FocusDirection`, `Equipment` and
//! `ImageSynchro` lines are accepted and ignored.

use crate::core::Core;
use crate::properties::{CORE_AUTO_SHUTTER, CORE_CHANNEL_GROUP, CORE_INITIALIZE, CORE_TIMEOUT_MS};
use mmc_core::device::{DeviceRole, DeviceType, InitializationState};
use mmc_core::error::{CoreError, CoreResult};
use mmc_core::events::CoreEvent;
use mmc_hardware::CORE_LABEL;
use std::io::Write;
use std::path::Path;

/// Group applied once a configuration file has been replayed.
pub const STARTUP_GROUP: &str = "System";
/// Preset of [`STARTUP_GROUP`] applied after loading.
pub const STARTUP_PRESET: &str = "Startup";

const IGNORED_DIRECTIVES: [&str; 5] = ["Parent", "Delay", "FocusDirection", "Equipment", "ImageSynchro"];

/// Splits one configuration line; `None` for blank lines and comments.
pub(crate) fn parse_fields(line: &str) -> Option<Vec<&str>> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }
    Some(line.split(',').map(str::trim).collect())
}

/// Comment header naming the file kind and when it was written.
pub(crate) fn write_header(out: &mut impl Write, title: &str) -> std::io::Result<()> {
    writeln!(out, "# {title}")?;
    writeln!(
        out,
        "# Generated by mmcore {} on {}",
        env!("CARGO_PKG_VERSION"),
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S")
    )
}

fn malformed(line: &[&str]) -> CoreError {
    CoreError::InvalidArgument(format!("malformed {} line", line.first().copied().unwrap_or("")))
}

fn parse_number<T: std::str::FromStr>(field: &str) -> CoreResult<T> {
    field
        .parse()
        .map_err(|_| CoreError::InvalidArgument(format!("\"{field}\" is not a number")))
}

impl Core {
    /// Resets the core and replays the configuration file at `path`.
    ///
    /// Devices still uninitialized at the end of the file are initialized,
    /// then the `System`/`Startup` preset is applied if defined. On failure
    /// every device is unloaded again and the error names the line.
    pub fn load_system_configuration(&self, path: impl AsRef<Path>) -> CoreResult<()> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        self.reset()?;

        if let Err(e) = self.replay_configuration(&text) {
            self.log.core(&format!(
                "Loading system configuration {} failed: {e}",
                path.display()
            ));
            if let Err(unload) = self.unload_all_devices() {
                tracing::warn!(error = %unload, "cannot unload devices after failed configuration");
            }
            return Err(e);
        }

        self.log
            .core(&format!("System configuration {} loaded", path.display()));
        self.events.dispatch(&CoreEvent::SystemConfigurationLoaded);
        Ok(())
    }

    fn replay_configuration(&self, text: &str) -> CoreResult<()> {
        let mut last_line = 0;
        for (index, line) in text.lines().enumerate() {
            last_line = index + 1;
            let Some(fields) = parse_fields(line) else {
                continue;
            };
            self.apply_directive(&fields)
                .map_err(|e| CoreError::ConfigFile {
                    line: last_line,
                    reason: e.to_string(),
                })?;
        }

        let at_end = |e: CoreError| CoreError::ConfigFile {
            line: last_line,
            reason: e.to_string(),
        };
        self.initialize_checked().map_err(at_end)?;
        if self.is_config_defined(STARTUP_GROUP, STARTUP_PRESET) {
            self.set_config(STARTUP_GROUP, STARTUP_PRESET).map_err(at_end)?;
        }
        Ok(())
    }

    /// Initializes the remaining devices; any adapter failure is an error.
    fn initialize_checked(&self) -> CoreResult<()> {
        for label in self.registry.uninitialized() {
            if self.initialize_device(&label)? == InitializationState::InitializationFailed {
                return Err(CoreError::Device {
                    label,
                    message: "initialization failed".into(),
                });
            }
        }
        Ok(())
    }

    fn apply_directive(&self, fields: &[&str]) -> CoreResult<()> {
        match fields {
            ["Device", label, module, device] => self.load_device(label, module, device),
            ["Property", CORE_LABEL, CORE_INITIALIZE, value] => {
                if *value == "1" {
                    self.initialize_checked()?;
                }
                Ok(())
            }
            ["Property", label, property, value @ ..] if !value.is_empty() => {
                self.set_property(label, property, &value.join(","))
            }
            ["Label", label, position, name] => {
                self.define_state_label(label, parse_number(position)?, name)
            }
            ["ConfigGroup", group] => {
                if !self.is_group_defined(group) {
                    self.define_config_group(group)?;
                }
                Ok(())
            }
            ["ConfigGroup", group, preset] => self.define_config(group, preset),
            ["ConfigGroup", group, preset, device, property, value @ ..] if !value.is_empty() => {
                self.define_config_setting(group, preset, device, property, &value.join(","))
            }
            ["ConfigPixelSize", id, device, property, value @ ..] if !value.is_empty() => {
                self.define_pixel_size_config(id, device, property, &value.join(","))
            }
            ["PixelSize_um", id, um] => self.set_pixel_size_um(id, parse_number(um)?),
            ["PixelSizeAffine", id, coefficients @ ..] if coefficients.len() == 6 => {
                let mut affine = [0.0; 6];
                for (slot, field) in affine.iter_mut().zip(coefficients) {
                    *slot = parse_number(field)?;
                }
                self.set_pixel_size_affine(id, affine)
            }
            [directive, ..] if IGNORED_DIRECTIVES.contains(directive) => {
                tracing::debug!(directive = *directive, "configuration directive ignored");
                Ok(())
            }
            [
                "Device" | "Property" | "Label" | "ConfigGroup" | "ConfigPixelSize" | "PixelSize_um"
                | "PixelSizeAffine",
                ..,
            ] => Err(malformed(fields)),
            [directive, ..] => Err(CoreError::InvalidArgument(format!(
                "unknown directive \"{directive}\""
            ))),
            [] => Ok(()),
        }
    }

    /// Writes the current devices, labels, groups, pixel-size calibration
    /// and role assignments so that
    /// [`load_system_configuration`](Self::load_system_configuration)
    /// reproduces them.
    pub fn save_system_configuration(&self, path: impl AsRef<Path>) -> CoreResult<()> {
        let path = path.as_ref();
        let mut out = std::io::BufWriter::new(std::fs::File::create(path)?);
        write_header(&mut out, "System configuration")?;

        let devices = self.registry.devices();
        writeln!(out, "\n# Devices")?;
        for entry in &devices {
            writeln!(out, "Device,{},{},{}", entry.label, entry.module, entry.device_name)?;
        }

        writeln!(out, "\n# Pre-initialization properties")?;
        writeln!(out, "Property,{CORE_LABEL},{CORE_TIMEOUT_MS},{}", self.get_timeout_ms())?;
        for entry in &devices {
            let device = entry.handle.device();
            for name in device.properties().names() {
                let descriptor = self.get_property_object(&entry.label, &name)?;
                if descriptor.pre_init && !descriptor.read_only {
                    let value = self.get_property(&entry.label, &name)?;
                    writeln!(out, "Property,{},{name},{value}", entry.label)?;
                }
            }
        }
        writeln!(out, "Property,{CORE_LABEL},{CORE_INITIALIZE},1")?;

        writeln!(out, "\n# State labels")?;
        for entry in devices.iter().filter(|e| e.device_type() == DeviceType::State) {
            for (position, name) in self.get_state_labels(&entry.label)?.iter().enumerate() {
                writeln!(out, "Label,{},{position},{name}", entry.label)?;
            }
        }

        writeln!(out, "\n# Configuration groups")?;
        for line in self.group_lines() {
            writeln!(out, "{line}")?;
        }

        writeln!(out, "\n# Pixel size calibration")?;
        for line in self.pixel_size_lines() {
            writeln!(out, "{line}")?;
        }

        writeln!(out, "\n# Roles")?;
        for role in DeviceRole::ALL {
            if let Some(label) = self.roles.get(role) {
                writeln!(out, "Property,{CORE_LABEL},{},{label}", role.core_property())?;
            }
        }
        writeln!(
            out,
            "Property,{CORE_LABEL},{CORE_AUTO_SHUTTER},{}",
            u8::from(self.get_auto_shutter())
        )?;
        let channel_group = self.get_channel_group();
        if !channel_group.is_empty() {
            writeln!(out, "Property,{CORE_LABEL},{CORE_CHANNEL_GROUP},{channel_group}")?;
        }
        out.flush()?;

        self.log
            .core(&format!("System configuration saved to {}", path.display()));
        Ok(())
    }

    fn group_lines(&self) -> Vec<String> {
        let groups = self.groups.read();
        let mut lines = Vec::new();
        for group in groups.group_names() {
            let presets = groups.preset_names(&group).unwrap_or_default();
            if presets.is_empty() {
                lines.push(format!("ConfigGroup,{group}"));
            }
            for preset in presets {
                let Ok(config) = groups.preset(&group, &preset) else {
                    continue;
                };
                if config.is_empty() {
                    lines.push(format!("ConfigGroup,{group},{preset}"));
                }
                for s in config {
                    lines.push(format!(
                        "ConfigGroup,{group},{preset},{},{},{}",
                        s.device, s.property, s.value
                    ));
                }
            }
        }
        lines
    }

    fn pixel_size_lines(&self) -> Vec<String> {
        let sizes = self.pixel_sizes.read();
        let mut lines = Vec::new();
        for (id, preset) in sizes.iter() {
            for s in &preset.settings {
                lines.push(format!(
                    "ConfigPixelSize,{id},{},{},{}",
                    s.device, s.property, s.value
                ));
            }
            lines.push(format!("PixelSize_um,{id},{}", preset.pixel_size_um));
            let affine: Vec<String> = preset.affine.iter().map(f64::to_string).collect();
            lines.push(format!("PixelSizeAffine,{id},{}", affine.join(",")));
        }
        lines
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_fields() {
        assert_eq!(parse_fields("  "), None);
        assert_eq!(parse_fields("# comment"), None);
        assert_eq!(
            parse_fields("Device, Camera ,DemoCamera,DCam"),
            Some(vec!["Device", "Camera", "DemoCamera", "DCam"])
        );
    }

    #[test]
    fn test_header_is_comment() {
        let mut out = Vec::new();
        write_header(&mut out, "System state").unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.lines().all(|l| parse_fields(l).is_none()));
        assert!(text.starts_with("# System state"));
    }

    #[test]
    fn test_unknown_directive_names_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.cfg");
        std::fs::write(&path, "# header\nDevice,Camera,DemoCamera,DCam\nBogus,1\n").unwrap();

        let core = Core::new();
        let err = core.load_system_configuration(&path).unwrap_err();
        match err {
            CoreError::ConfigFile { line, reason } => {
                assert_eq!(line, 3);
                assert!(reason.contains("Bogus"));
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert_eq!(core.get_loaded_devices(), vec!["Core"]);
    }

    #[test]
    fn test_malformed_line() {
        let core = Core::new();
        assert!(matches!(
            core.apply_directive(&["PixelSizeAffine", "Res", "1.0"]),
            Err(CoreError::InvalidArgument(_))
        ));
        assert!(matches!(
            core.apply_directive(&["ConfigGroup", "Channel", "DAPI", "Wheel"]),
            Err(CoreError::InvalidArgument(_))
        ));
        assert!(core.apply_directive(&["Equipment", "x", "y"]).is_ok());
    }

    #[test]
    fn test_value_with_commas_is_rejoined() {
        let core = Core::new();
        core.apply_directive(&["ConfigGroup", "G", "P", "Dev", "Prop", "a", "b"])
            .unwrap();
        let config = core.get_config_data("G", "P").unwrap();
        assert_eq!(config.get("Dev", "Prop").unwrap().value, "a,b");
    }
}
