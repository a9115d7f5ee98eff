//! Demo camera (`DCam`).
//!
//! A simulated scientific camera with a configurable sensor, binning, ROI,
//! five pixel types and three test patterns. `snap_image` and
//! `acquire_frame` sleep for the exposure time, so sequence timing behaves
//! like real hardware.
//!
//! # Properties
//!
//! | Name | Type | Notes |
//! |------|------|-------|
//! | `Exposure` | float | 0..10000 ms |
//! | `Binning` | integer | 1, 2, 4, 8; resets the ROI |
//! | `PixelType` | string | `8bit`, `16bit`, `32bit`, `32bitRGB`, `64bitRGB`; also changes `BitDepth` |
//! | `BitDepth` | integer | significant bits per component |
//! | `OnCameraCCDXSize`, `OnCameraCCDYSize` | integer | sensor size; resets the ROI |
//! | `Mode` | string | test pattern |
//! | `ScanMode` | integer | 1..3; also changes `ReadoutTime` |
//! | `FailAfterFrames` | integer, pre-init | inject a failure after N sequence frames |

use crate::common::{DemoBase, DemoRng, FaultConfig, FaultScenario};
use crate::pattern::{render, PatternMode};
use anyhow::{anyhow, bail, Result};
use bytes::Bytes;
use mmc_core::device::{Camera, Device, DeviceType};
use mmc_core::error::{DriverError, DriverErrorKind};
use mmc_core::image::{FrameGeometry, Roi};
use mmc_core::property::{PropertyDescriptor, PropertyMap, PropertyOutcome};
use parking_lot::Mutex;
use std::time::Duration;

/// Device name within the demo module.
pub const DEVICE_NAME: &str = "DCam";

/// Exposure property.
pub const PROP_EXPOSURE: &str = "Exposure";
/// Binning property.
pub const PROP_BINNING: &str = "Binning";
/// Pixel type property.
pub const PROP_PIXEL_TYPE: &str = "PixelType";
/// Bit depth property.
pub const PROP_BIT_DEPTH: &str = "BitDepth";
/// Sensor width property.
pub const PROP_CCD_X: &str = "OnCameraCCDXSize";
/// Sensor height property.
pub const PROP_CCD_Y: &str = "OnCameraCCDYSize";
/// Test pattern property.
pub const PROP_MODE: &str = "Mode";
/// Scan mode property.
pub const PROP_SCAN_MODE: &str = "ScanMode";
/// Readout time, derived from the scan mode.
pub const PROP_READOUT_TIME: &str = "ReadoutTime";
/// Gain property.
pub const PROP_GAIN: &str = "Gain";
/// Offset property.
pub const PROP_OFFSET: &str = "Offset";
/// Sensor temperature setpoint.
pub const PROP_CCD_TEMPERATURE: &str = "CCDTemperature";
/// Fault injection for sequences.
pub const PROP_FAIL_AFTER_FRAMES: &str = "FailAfterFrames";

const DEFAULT_SENSOR: u32 = 512;
const PIXEL_TYPES: [&str; 5] = ["8bit", "16bit", "32bit", "32bitRGB", "64bitRGB"];

/// (bytes per pixel, components, bit depth) of a `PixelType` value.
fn pixel_layout(pixel_type: &str) -> Option<(u32, u32, u32)> {
    match pixel_type {
        "8bit" => Some((1, 1, 8)),
        "16bit" => Some((2, 1, 16)),
        "32bit" => Some((4, 1, 32)),
        "32bitRGB" => Some((4, 4, 8)),
        "64bitRGB" => Some((8, 4, 16)),
        _ => None,
    }
}

/// Binned pixels must tile the sensor exactly.
fn check_binning(ccd_x: u32, ccd_y: u32, binning: u32) -> Result<()> {
    if ccd_x % binning != 0 || ccd_y % binning != 0 {
        bail!("sensor {ccd_x}x{ccd_y} is not a multiple of binning {binning}");
    }
    Ok(())
}

fn readout_time_ms(scan_mode: i64) -> f64 {
    match scan_mode {
        1 => 10.0,
        2 => 20.0,
        _ => 40.0,
    }
}

#[derive(Debug)]
struct CameraState {
    ccd_x: u32,
    ccd_y: u32,
    binning: u32,
    bytes_per_pixel: u32,
    components: u32,
    bit_depth: u32,
    roi: Roi,
    exposure_ms: f64,
    mode: PatternMode,
    frames: u64,
    last_image: Option<Bytes>,
}

impl CameraState {
    fn full_frame(&self) -> Roi {
        Roi::new(0, 0, self.ccd_x / self.binning, self.ccd_y / self.binning)
    }

    fn geometry(&self) -> FrameGeometry {
        FrameGeometry::new(
            self.roi.width,
            self.roi.height,
            self.bytes_per_pixel,
            self.components,
        )
    }
}

/// Frame parameters copied out of the state so rendering runs unlocked.
struct Exposure {
    geometry: FrameGeometry,
    bit_depth: u32,
    mode: PatternMode,
    frame: u64,
    duration: Duration,
}

/// Simulated camera.
#[derive(Debug)]
pub struct DCam {
    base: DemoBase,
    state: Mutex<CameraState>,
    rng: DemoRng,
}

impl DCam {
    /// Creates a camera with a 512×512 16-bit sensor and 10 ms exposure.
    pub fn new() -> Self {
        Self::with_seed(None)
    }

    /// Creates a camera whose noise pattern uses a fixed seed.
    pub fn with_seed(seed: Option<u64>) -> Self {
        let base = DemoBase::new(DEVICE_NAME, "Demo camera");
        let props = base.properties();

        props.define(
            PropertyDescriptor::string("CameraName").read_only(),
            "DemoCamera-MultiMode",
        );
        props.define(PropertyDescriptor::string("CameraID").read_only(), "V1.0");
        props.define(
            PropertyDescriptor::float(PROP_EXPOSURE).with_limits(0.0, 10_000.0),
            "10",
        );
        props.define(
            PropertyDescriptor::integer(PROP_BINNING).with_allowed_values(["1", "2", "4", "8"]),
            "1",
        );
        props.define(
            PropertyDescriptor::string(PROP_PIXEL_TYPE).with_allowed_values(PIXEL_TYPES),
            "16bit",
        );
        props.define(
            PropertyDescriptor::integer(PROP_BIT_DEPTH)
                .with_allowed_values(["8", "10", "12", "14", "16", "32"]),
            "16",
        );
        props.define(
            PropertyDescriptor::integer(PROP_CCD_X).with_limits(16.0, 4096.0),
            DEFAULT_SENSOR.to_string(),
        );
        props.define(
            PropertyDescriptor::integer(PROP_CCD_Y).with_limits(16.0, 4096.0),
            DEFAULT_SENSOR.to_string(),
        );
        props.define(
            PropertyDescriptor::string(PROP_MODE).with_allowed_values(PatternMode::LABELS),
            PatternMode::ArtificialWaves.label(),
        );
        props.define(
            PropertyDescriptor::integer(PROP_SCAN_MODE).with_allowed_values(["1", "2", "3"]),
            "1",
        );
        props.define(
            PropertyDescriptor::float(PROP_READOUT_TIME).read_only(),
            format!("{:.1}", readout_time_ms(1)),
        );
        props.define(PropertyDescriptor::integer(PROP_GAIN).with_limits(-5.0, 8.0), "0");
        props.define(PropertyDescriptor::integer(PROP_OFFSET).with_limits(0.0, 1000.0), "0");
        props.define(
            PropertyDescriptor::float(PROP_CCD_TEMPERATURE).with_limits(-100.0, 10.0),
            "0",
        );
        props.define(
            PropertyDescriptor::integer(PROP_FAIL_AFTER_FRAMES)
                .pre_init()
                .with_limits(0.0, 1_000_000.0),
            "0",
        );

        let mut state = CameraState {
            ccd_x: DEFAULT_SENSOR,
            ccd_y: DEFAULT_SENSOR,
            binning: 1,
            bytes_per_pixel: 2,
            components: 1,
            bit_depth: 16,
            roi: Roi::new(0, 0, DEFAULT_SENSOR, DEFAULT_SENSOR),
            exposure_ms: 10.0,
            mode: PatternMode::ArtificialWaves,
            frames: 0,
            last_image: None,
        };
        state.roi = state.full_frame();

        Self {
            base,
            state: Mutex::new(state),
            rng: DemoRng::new(seed),
        }
    }

    /// Replaces the fault scenarios.
    pub fn set_faults(&self, faults: FaultConfig) {
        self.base.set_faults(faults);
    }

    /// Frames rendered since creation.
    pub fn frame_count(&self) -> u64 {
        self.state.lock().frames
    }

    fn begin_exposure(&self) -> Exposure {
        let mut state = self.state.lock();
        let frame = state.frames;
        state.frames += 1;
        Exposure {
            geometry: state.geometry(),
            bit_depth: state.bit_depth,
            mode: state.mode,
            frame,
            duration: Duration::from_secs_f64(state.exposure_ms.max(0.0) / 1000.0),
        }
    }

    fn expose(&self) -> Bytes {
        let exposure = self.begin_exposure();
        if !exposure.duration.is_zero() {
            std::thread::sleep(exposure.duration);
        }
        let pixels = Bytes::from(render(
            exposure.mode,
            &exposure.geometry,
            exposure.bit_depth,
            exposure.frame,
            &self.rng,
        ));
        self.state.lock().last_image = Some(pixels.clone());
        pixels
    }

    fn apply(&self, name: &str, value: &str) -> Result<PropertyOutcome> {
        let props = self.base.properties();
        let mut state = self.state.lock();
        match name {
            PROP_EXPOSURE => state.exposure_ms = props.float(name)?,
            PROP_BINNING => {
                let binning = props.integer(name)? as u32;
                check_binning(state.ccd_x, state.ccd_y, binning)?;
                state.binning = binning;
                state.roi = state.full_frame();
            }
            PROP_CCD_X => {
                let ccd_x = props.integer(name)? as u32;
                check_binning(ccd_x, state.ccd_y, state.binning)?;
                state.ccd_x = ccd_x;
                state.roi = state.full_frame();
            }
            PROP_CCD_Y => {
                let ccd_y = props.integer(name)? as u32;
                check_binning(state.ccd_x, ccd_y, state.binning)?;
                state.ccd_y = ccd_y;
                state.roi = state.full_frame();
            }
            PROP_PIXEL_TYPE => {
                let (bpp, components, bit_depth) = pixel_layout(value)
                    .ok_or_else(|| anyhow!("unsupported pixel type {value}"))?;
                state.bytes_per_pixel = bpp;
                state.components = components;
                state.bit_depth = bit_depth;
                props.update(PROP_BIT_DEPTH, bit_depth.to_string())?;
                return Ok(PropertyOutcome::with_side_effects([PROP_BIT_DEPTH]));
            }
            PROP_BIT_DEPTH => state.bit_depth = props.integer(name)? as u32,
            PROP_MODE => {
                state.mode = PatternMode::from_label(value)
                    .ok_or_else(|| anyhow!("unknown pattern {value}"))?;
            }
            PROP_SCAN_MODE => {
                let readout = readout_time_ms(props.integer(name)?);
                props.update(PROP_READOUT_TIME, format!("{readout:.1}"))?;
                return Ok(PropertyOutcome::with_side_effects([PROP_READOUT_TIME]));
            }
            PROP_FAIL_AFTER_FRAMES => {
                let count = props.integer(name)?;
                self.base.set_faults(if count > 0 {
                    FaultConfig::scenario(FaultScenario::FailAfterN {
                        operation: "acquire_frame",
                        count: count as u32,
                    })
                } else {
                    FaultConfig::none()
                });
            }
            _ => {}
        }
        Ok(PropertyOutcome::applied())
    }
}

impl Default for DCam {
    fn default() -> Self {
        Self::new()
    }
}

impl Device for DCam {
    fn name(&self) -> &str {
        self.base.name()
    }

    fn description(&self) -> String {
        self.base.description()
    }

    fn device_type(&self) -> DeviceType {
        DeviceType::Camera
    }

    fn initialize(&self) -> Result<()> {
        self.base.initialize()
    }

    fn shutdown(&self) -> Result<()> {
        self.state.lock().last_image = None;
        self.base.shutdown();
        Ok(())
    }

    fn properties(&self) -> &PropertyMap {
        self.base.properties()
    }

    fn set_property(&self, name: &str, value: &str) -> Result<PropertyOutcome> {
        let props = self.base.properties();
        let previous = props.value(name)?;
        props.set(name, value)?;
        match self.apply(name, value) {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                props.update(name, previous)?;
                Err(e)
            }
        }
    }
}

impl Camera for DCam {
    fn snap_image(&self) -> Result<()> {
        self.base.check("snap_image")?;
        self.expose();
        Ok(())
    }

    fn image_buffer(&self) -> Result<Bytes> {
        self.state
            .lock()
            .last_image
            .clone()
            .ok_or_else(|| anyhow!("no image has been snapped"))
    }

    fn image_width(&self) -> u32 {
        self.state.lock().roi.width
    }

    fn image_height(&self) -> u32 {
        self.state.lock().roi.height
    }

    fn bytes_per_pixel(&self) -> u32 {
        self.state.lock().bytes_per_pixel
    }

    fn number_of_components(&self) -> u32 {
        self.state.lock().components
    }

    fn bit_depth(&self) -> u32 {
        self.state.lock().bit_depth
    }

    fn exposure(&self) -> f64 {
        self.state.lock().exposure_ms
    }

    fn binning(&self) -> u32 {
        self.state.lock().binning
    }

    fn roi(&self) -> Roi {
        self.state.lock().roi
    }

    fn set_roi(&self, roi: Roi) -> Result<()> {
        let mut state = self.state.lock();
        let full = state.full_frame();
        let fits = roi.width > 0
            && roi.height > 0
            && roi.x.checked_add(roi.width).is_some_and(|r| r <= full.width)
            && roi.y.checked_add(roi.height).is_some_and(|b| b <= full.height);
        if !fits {
            return Err(DriverError::new(
                DEVICE_NAME,
                DriverErrorKind::InvalidParameter,
                format!(
                    "ROI {}x{}+{}+{} does not fit the {}x{} sensor",
                    roi.width, roi.height, roi.x, roi.y, full.width, full.height
                ),
            )
            .into());
        }
        state.roi = roi;
        state.last_image = None;
        Ok(())
    }

    fn clear_roi(&self) -> Result<()> {
        let mut state = self.state.lock();
        state.roi = state.full_frame();
        state.last_image = None;
        Ok(())
    }

    fn prepare_sequence(&self) -> Result<()> {
        self.base.check("prepare_sequence")
    }

    fn acquire_frame(&self) -> Result<Bytes> {
        if !self.base.is_initialized() {
            bail!("camera is not initialized");
        }
        self.base.check("acquire_frame")?;
        Ok(self.expose())
    }

    fn frame_tags(&self) -> Vec<(String, String)> {
        let props = self.base.properties();
        [PROP_MODE, PROP_SCAN_MODE, PROP_GAIN]
            .into_iter()
            .filter_map(|name| props.value(name).ok().map(|v| (name.to_string(), v)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn camera() -> DCam {
        let cam = DCam::with_seed(Some(11));
        cam.initialize().unwrap();
        cam.set_property(PROP_EXPOSURE, "0").unwrap();
        cam
    }

    #[test]
    fn test_default_geometry() {
        let cam = DCam::new();
        assert_eq!(cam.geometry(), FrameGeometry::new(512, 512, 2, 1));
        assert_eq!(cam.bit_depth(), 16);
        assert!((cam.exposure() - 10.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_snap_then_read() {
        let cam = camera();
        assert!(cam.image_buffer().is_err());
        cam.snap_image().unwrap();
        assert_eq!(cam.image_buffer().unwrap().len(), 512 * 512 * 2);
    }

    #[test]
    fn test_binning_resets_roi() {
        let cam = camera();
        cam.set_roi(Roi::new(10, 10, 100, 50)).unwrap();
        assert_eq!(cam.image_width(), 100);
        let outcome = cam.set_property(PROP_BINNING, "2").unwrap();
        assert!(!outcome.has_side_effects());
        assert_eq!(cam.roi(), Roi::new(0, 0, 256, 256));
        assert!(cam.set_property(PROP_BINNING, "3").is_err());
    }

    #[test]
    fn test_rejected_binning_keeps_old_value() {
        let cam = camera();
        cam.set_property(PROP_CCD_X, "100").unwrap();
        assert!(cam.set_property(PROP_BINNING, "8").is_err());
        assert_eq!(cam.properties().value(PROP_BINNING).unwrap(), "1");
        assert_eq!(cam.image_width(), 100);

        cam.set_property(PROP_BINNING, "4").unwrap();
        assert!(cam.set_property(PROP_CCD_X, "102").is_err());
        assert_eq!(cam.properties().value(PROP_CCD_X).unwrap(), "100");
        assert_eq!(cam.image_width(), 25);
    }

    #[test]
    fn test_pixel_type_changes_bit_depth() {
        let cam = camera();
        let outcome = cam.set_property(PROP_PIXEL_TYPE, "32bitRGB").unwrap();
        assert_eq!(outcome.side_effects, vec![PROP_BIT_DEPTH.to_string()]);
        assert_eq!(cam.get_property(PROP_BIT_DEPTH).unwrap(), "8");
        assert_eq!(cam.bytes_per_pixel(), 4);
        assert_eq!(cam.number_of_components(), 4);
        cam.snap_image().unwrap();
        assert_eq!(cam.image_buffer().unwrap().len(), 512 * 512 * 4);
    }

    #[test]
    fn test_scan_mode_changes_readout_time() {
        let cam = camera();
        let outcome = cam.set_property(PROP_SCAN_MODE, "2").unwrap();
        assert!(outcome.has_side_effects());
        assert_eq!(cam.get_property(PROP_READOUT_TIME).unwrap(), "20.0");
    }

    #[test]
    fn test_roi_must_fit() {
        let cam = camera();
        assert!(cam.set_roi(Roi::new(500, 0, 20, 20)).is_err());
        assert!(cam.set_roi(Roi::new(0, 0, 0, 20)).is_err());
        cam.set_roi(Roi::new(0, 0, 64, 32)).unwrap();
        cam.snap_image().unwrap();
        assert_eq!(cam.image_buffer().unwrap().len(), 64 * 32 * 2);
        cam.clear_roi().unwrap();
        assert_eq!(cam.image_height(), 512);
    }

    #[test]
    fn test_fail_after_frames() {
        let cam = DCam::with_seed(Some(1));
        cam.set_property(PROP_FAIL_AFTER_FRAMES, "2").unwrap();
        cam.initialize().unwrap();
        cam.set_property(PROP_EXPOSURE, "0").unwrap();
        assert!(cam.acquire_frame().is_ok());
        assert!(cam.acquire_frame().is_ok());
        let err = cam.acquire_frame().unwrap_err();
        assert!(err.downcast_ref::<DriverError>().is_some());
    }

    #[test]
    fn test_frame_tags() {
        let cam = camera();
        let tags = cam.frame_tags();
        assert!(tags.contains(&("Mode".to_string(), "Artificial Waves".to_string())));
    }
}
