//! Device Capabilities
//!
//! Every loaded hardware unit implements the base [`Device`] trait (identity,
//! lifecycle, properties) plus exactly one capability trait for its
//! [`DeviceType`]:
//!
//! - [`Camera`]: snap, read image, exposure, binning, ROI, frame acquisition
//! - [`Stage`]: single-axis focus drive
//! - [`XYStage`]: two-axis stage
//! - [`Shutter`]: open/close
//! - [`StateDevice`]: filter wheels, turrets, light paths
//! - [`Storage`]: dataset sink
//! - [`ImageProcessor`]: in-place frame processing
//!
//! # Design Philosophy
//!
//! Each capability trait:
//! - Is blocking (adapters may wait on hardware for one exposure)
//! - Is thread-safe (requires Send + Sync, methods take `&self`)
//! - Uses anyhow::Result for errors
//!
//! The registry stores devices as a [`DeviceHandle`]: the base trait object
//! plus a closed [`DeviceKind`] variant holding the capability trait object.
//! Generic code branches on [`DeviceType`] without needing every capability.

use crate::image::{FrameGeometry, PixelType, Roi};
use crate::property::{PropertyDescriptor, PropertyMap, PropertyOutcome};
use anyhow::Result;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

// =============================================================================
// Device Type and Lifecycle
// =============================================================================

/// Type tag of a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeviceType {
    /// Unknown or unset.
    Unknown,
    /// Wildcard used in queries.
    Any,
    /// Image source.
    Camera,
    /// Light shutter.
    Shutter,
    /// Discrete-position device.
    State,
    /// Single-axis stage.
    Stage,
    /// Two-axis stage.
    XYStage,
    /// Dataset sink.
    Storage,
    /// Frame processor.
    ImageProcessor,
    /// Property-only device.
    Generic,
    /// The core pseudo-device.
    Core,
    /// Parent of peripheral devices sharing one connection.
    Hub,
}

impl DeviceType {
    /// Display label.
    pub fn label(&self) -> &'static str {
        match self {
            DeviceType::Unknown => "Unknown",
            DeviceType::Any => "Any",
            DeviceType::Camera => "Camera",
            DeviceType::Shutter => "Shutter",
            DeviceType::State => "State",
            DeviceType::Stage => "Stage",
            DeviceType::XYStage => "XYStage",
            DeviceType::Storage => "Storage",
            DeviceType::ImageProcessor => "ImageProcessor",
            DeviceType::Generic => "Generic",
            DeviceType::Core => "Core",
            DeviceType::Hub => "Hub",
        }
    }

    /// True if a device of this type satisfies a query for `wanted`.
    pub fn matches(&self, wanted: DeviceType) -> bool {
        wanted == DeviceType::Any || *self == wanted
    }
}

impl std::fmt::Display for DeviceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Lifecycle state of a loaded device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InitializationState {
    /// Loaded, not yet initialized.
    Uninitialized,
    /// Adapter initialization succeeded.
    InitializedSuccessfully,
    /// Adapter initialization reported a failure; the device stays loaded.
    InitializationFailed,
}

/// Distinguished "current device" slots of the core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeviceRole {
    /// Current camera.
    Camera,
    /// Current shutter.
    Shutter,
    /// Current focus stage.
    Focus,
    /// Current XY stage.
    XYStage,
    /// Current image processor.
    ImageProcessor,
    /// Current storage device.
    Storage,
}

impl DeviceRole {
    /// All roles, in core property order.
    pub const ALL: [DeviceRole; 6] = [
        DeviceRole::Camera,
        DeviceRole::Shutter,
        DeviceRole::Focus,
        DeviceRole::XYStage,
        DeviceRole::ImageProcessor,
        DeviceRole::Storage,
    ];

    /// Name of the `Core` pseudo-device property mirroring this role.
    pub fn core_property(&self) -> &'static str {
        match self {
            DeviceRole::Camera => "Camera",
            DeviceRole::Shutter => "Shutter",
            DeviceRole::Focus => "Focus",
            DeviceRole::XYStage => "XYStage",
            DeviceRole::ImageProcessor => "ImageProcessor",
            DeviceRole::Storage => "Storage",
        }
    }

    /// Role for a `Core` property name.
    pub fn from_core_property(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|r| r.core_property() == name)
    }

    /// Device type a role accepts.
    pub fn device_type(&self) -> DeviceType {
        match self {
            DeviceRole::Camera => DeviceType::Camera,
            DeviceRole::Shutter => DeviceType::Shutter,
            DeviceRole::Focus => DeviceType::Stage,
            DeviceRole::XYStage => DeviceType::XYStage,
            DeviceRole::ImageProcessor => DeviceType::ImageProcessor,
            DeviceRole::Storage => DeviceType::Storage,
        }
    }
}

impl std::fmt::Display for DeviceRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            DeviceRole::Camera => "Camera",
            DeviceRole::Shutter => "Shutter",
            DeviceRole::Focus => "Focus stage",
            DeviceRole::XYStage => "XY stage",
            DeviceRole::ImageProcessor => "Image processor",
            DeviceRole::Storage => "Storage",
        };
        f.write_str(name)
    }
}

// =============================================================================
// Base Device
// =============================================================================

/// Identity, lifecycle and properties shared by every device.
pub trait Device: Send + Sync {
    /// Adapter device name (e.g. `DCam`).
    fn name(&self) -> &str;

    /// Human-readable description.
    fn description(&self) -> String;

    /// Type tag.
    fn device_type(&self) -> DeviceType;

    /// Connects to hardware. Called once after pre-init properties are set.
    fn initialize(&self) -> Result<()>;

    /// Releases hardware. Called on unload.
    fn shutdown(&self) -> Result<()>;

    /// True while the device is executing a command.
    fn busy(&self) -> bool {
        false
    }

    /// Property table.
    fn properties(&self) -> &PropertyMap;

    /// Descriptor of `name`.
    fn property_descriptor(&self, name: &str) -> Result<PropertyDescriptor> {
        Ok(self.properties().descriptor(name)?)
    }

    /// Reads `name` from the device.
    fn get_property(&self, name: &str) -> Result<String> {
        Ok(self.properties().value(name)?)
    }

    /// Writes `name`; adapters override this to act on the new value.
    fn set_property(&self, name: &str, value: &str) -> Result<PropertyOutcome> {
        self.properties().set(name, value)?;
        Ok(PropertyOutcome::applied())
    }
}

// =============================================================================
// Camera
// =============================================================================

/// Image source.
///
/// `snap_image` exposes one frame and keeps it in the camera;
/// `image_buffer` returns the last snapped frame. `acquire_frame` is used by
/// the core's sequence producer and must block for at most one exposure.
pub trait Camera: Device {
    /// Exposes one frame.
    fn snap_image(&self) -> Result<()>;

    /// Raw bytes of the last snapped frame.
    fn image_buffer(&self) -> Result<Bytes>;

    /// Current image width in pixels (after binning and ROI).
    fn image_width(&self) -> u32;

    /// Current image height in pixels (after binning and ROI).
    fn image_height(&self) -> u32;

    /// Bytes per pixel including all components.
    fn bytes_per_pixel(&self) -> u32;

    /// Components per pixel (1 or 4).
    fn number_of_components(&self) -> u32;

    /// Significant bits per component.
    fn bit_depth(&self) -> u32;

    /// Exposure in milliseconds.
    fn exposure(&self) -> f64;

    /// Current binning factor.
    fn binning(&self) -> u32;

    /// Current region of interest.
    fn roi(&self) -> Roi;

    /// Sets the region of interest.
    fn set_roi(&self, roi: Roi) -> Result<()>;

    /// Resets the region of interest to the full sensor.
    fn clear_roi(&self) -> Result<()>;

    /// Geometry of the frames the camera currently produces.
    fn geometry(&self) -> FrameGeometry {
        FrameGeometry::new(
            self.image_width(),
            self.image_height(),
            self.bytes_per_pixel(),
            self.number_of_components(),
        )
    }

    /// Pixel type of the current geometry.
    fn pixel_type(&self) -> crate::error::CoreResult<PixelType> {
        PixelType::from_layout(self.bytes_per_pixel(), self.number_of_components())
    }

    /// Called before a sequence starts.
    fn prepare_sequence(&self) -> Result<()> {
        Ok(())
    }

    /// Captures one sequence frame, blocking for the exposure.
    fn acquire_frame(&self) -> Result<Bytes> {
        self.snap_image()?;
        self.image_buffer()
    }

    /// Device-supplied tags for the frame just acquired.
    fn frame_tags(&self) -> Vec<(String, String)> {
        Vec::new()
    }

    /// Called after the sequence producer exits.
    fn stop_sequence(&self) -> Result<()> {
        Ok(())
    }
}

// =============================================================================
// Motion
// =============================================================================

/// Single-axis stage (focus drive), positions in micrometers.
pub trait Stage: Device {
    /// Moves to an absolute position.
    fn set_position_um(&self, position: f64) -> Result<()>;

    /// Current position.
    fn position_um(&self) -> Result<f64>;

    /// Moves by `delta`.
    fn set_relative_position_um(&self, delta: f64) -> Result<()> {
        let current = self.position_um()?;
        self.set_position_um(current + delta)
    }

    /// Declares the current position as zero.
    fn set_origin(&self) -> Result<()>;

    /// Travel limits.
    fn limits(&self) -> (f64, f64);
}

/// Two-axis stage, positions in micrometers.
pub trait XYStage: Device {
    /// Moves to an absolute position.
    fn set_xy_position_um(&self, x: f64, y: f64) -> Result<()>;

    /// Current position.
    fn xy_position_um(&self) -> Result<(f64, f64)>;

    /// Moves by (`dx`, `dy`).
    fn set_relative_xy_position_um(&self, dx: f64, dy: f64) -> Result<()> {
        let (x, y) = self.xy_position_um()?;
        self.set_xy_position_um(x + dx, y + dy)
    }

    /// Declares the current position as the origin.
    fn set_origin(&self) -> Result<()>;
}

/// Light shutter.
pub trait Shutter: Device {
    /// Opens or closes.
    fn set_open(&self, open: bool) -> Result<()>;

    /// True when open.
    fn is_open(&self) -> Result<bool>;
}

/// Device with a fixed number of discrete positions, optionally labeled.
///
/// State changes are made through the `State` and `Label` properties so that
/// configuration groups and change notifications see them.
pub trait StateDevice: Device {
    /// Number of positions.
    fn number_of_positions(&self) -> u32;

    /// Current position.
    fn position(&self) -> Result<u32>;

    /// Label of `position`.
    fn position_label(&self, position: u32) -> Result<String>;

    /// Assigns `label` to `position`.
    fn define_position_label(&self, position: u32, label: &str) -> Result<()>;

    /// Position carrying `label`.
    fn position_for_label(&self, label: &str) -> Result<u32>;

    /// All labels in position order.
    fn position_labels(&self) -> Vec<String>;
}

// =============================================================================
// Storage and Processing
// =============================================================================

/// Dataset sink.
pub trait Storage: Device {
    /// Creates a dataset and returns its handle.
    ///
    /// `shape` lists dimension sizes slowest first; the last two are height
    /// and width.
    fn create(
        &self,
        path: &str,
        name: &str,
        shape: &[u32],
        pixel_type: PixelType,
        metadata_json: &str,
    ) -> Result<String>;

    /// Appends one frame at `coordinates` (one per non-spatial dimension).
    fn write_frame(
        &self,
        handle: &str,
        coordinates: &[u32],
        pixels: &[u8],
        metadata_json: &str,
    ) -> Result<()>;

    /// True if `handle` refers to an open dataset.
    fn is_open(&self, handle: &str) -> bool;

    /// Closes the dataset.
    fn close(&self, handle: &str) -> Result<()>;
}

/// In-place frame processor applied to snapped and sequence frames.
pub trait ImageProcessor: Device {
    /// Processes `pixels` of shape `geometry` in place.
    fn process(&self, pixels: &mut [u8], geometry: &FrameGeometry) -> Result<()>;
}

// =============================================================================
// DeviceHandle - closed variant wrapper
// =============================================================================

/// Capability of a loaded device.
#[derive(Clone)]
pub enum DeviceKind {
    /// Camera capability.
    Camera(Arc<dyn Camera>),
    /// Stage capability.
    Stage(Arc<dyn Stage>),
    /// XY stage capability.
    XYStage(Arc<dyn XYStage>),
    /// Shutter capability.
    Shutter(Arc<dyn Shutter>),
    /// State device capability.
    State(Arc<dyn StateDevice>),
    /// Storage capability.
    Storage(Arc<dyn Storage>),
    /// Image processor capability.
    ImageProcessor(Arc<dyn ImageProcessor>),
    /// Property-only device.
    Generic,
}

/// A device as held by the registry: base trait object plus capability.
#[derive(Clone)]
pub struct DeviceHandle {
    device: Arc<dyn Device>,
    kind: DeviceKind,
}

impl DeviceHandle {
    /// Wraps a camera.
    pub fn camera<T: Camera + 'static>(device: Arc<T>) -> Self {
        Self {
            device: device.clone(),
            kind: DeviceKind::Camera(device),
        }
    }

    /// Wraps a stage.
    pub fn stage<T: Stage + 'static>(device: Arc<T>) -> Self {
        Self {
            device: device.clone(),
            kind: DeviceKind::Stage(device),
        }
    }

    /// Wraps an XY stage.
    pub fn xy_stage<T: XYStage + 'static>(device: Arc<T>) -> Self {
        Self {
            device: device.clone(),
            kind: DeviceKind::XYStage(device),
        }
    }

    /// Wraps a shutter.
    pub fn shutter<T: Shutter + 'static>(device: Arc<T>) -> Self {
        Self {
            device: device.clone(),
            kind: DeviceKind::Shutter(device),
        }
    }

    /// Wraps a state device.
    pub fn state<T: StateDevice + 'static>(device: Arc<T>) -> Self {
        Self {
            device: device.clone(),
            kind: DeviceKind::State(device),
        }
    }

    /// Wraps a storage device.
    pub fn storage<T: Storage + 'static>(device: Arc<T>) -> Self {
        Self {
            device: device.clone(),
            kind: DeviceKind::Storage(device),
        }
    }

    /// Wraps an image processor.
    pub fn image_processor<T: ImageProcessor + 'static>(device: Arc<T>) -> Self {
        Self {
            device: device.clone(),
            kind: DeviceKind::ImageProcessor(device),
        }
    }

    /// Wraps a property-only device.
    pub fn generic<T: Device + 'static>(device: Arc<T>) -> Self {
        Self {
            device,
            kind: DeviceKind::Generic,
        }
    }

    /// Base trait object.
    pub fn device(&self) -> &dyn Device {
        self.device.as_ref()
    }

    /// Capability variant.
    pub fn kind(&self) -> &DeviceKind {
        &self.kind
    }

    /// Type tag derived from the capability.
    pub fn device_type(&self) -> DeviceType {
        match &self.kind {
            DeviceKind::Camera(_) => DeviceType::Camera,
            DeviceKind::Stage(_) => DeviceType::Stage,
            DeviceKind::XYStage(_) => DeviceType::XYStage,
            DeviceKind::Shutter(_) => DeviceType::Shutter,
            DeviceKind::State(_) => DeviceType::State,
            DeviceKind::Storage(_) => DeviceType::Storage,
            DeviceKind::ImageProcessor(_) => DeviceType::ImageProcessor,
            DeviceKind::Generic => DeviceType::Generic,
        }
    }

    /// Camera capability, if any.
    pub fn as_camera(&self) -> Option<Arc<dyn Camera>> {
        match &self.kind {
            DeviceKind::Camera(c) => Some(c.clone()),
            _ => None,
        }
    }

    /// Stage capability, if any.
    pub fn as_stage(&self) -> Option<Arc<dyn Stage>> {
        match &self.kind {
            DeviceKind::Stage(s) => Some(s.clone()),
            _ => None,
        }
    }

    /// XY stage capability, if any.
    pub fn as_xy_stage(&self) -> Option<Arc<dyn XYStage>> {
        match &self.kind {
            DeviceKind::XYStage(s) => Some(s.clone()),
            _ => None,
        }
    }

    /// Shutter capability, if any.
    pub fn as_shutter(&self) -> Option<Arc<dyn Shutter>> {
        match &self.kind {
            DeviceKind::Shutter(s) => Some(s.clone()),
            _ => None,
        }
    }

    /// State device capability, if any.
    pub fn as_state(&self) -> Option<Arc<dyn StateDevice>> {
        match &self.kind {
            DeviceKind::State(s) => Some(s.clone()),
            _ => None,
        }
    }

    /// Storage capability, if any.
    pub fn as_storage(&self) -> Option<Arc<dyn Storage>> {
        match &self.kind {
            DeviceKind::Storage(s) => Some(s.clone()),
            _ => None,
        }
    }

    /// Image processor capability, if any.
    pub fn as_image_processor(&self) -> Option<Arc<dyn ImageProcessor>> {
        match &self.kind {
            DeviceKind::ImageProcessor(p) => Some(p.clone()),
            _ => None,
        }
    }
}

impl std::fmt::Debug for DeviceHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceHandle")
            .field("name", &self.device.name())
            .field("type", &self.device_type())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Dummy {
        props: PropertyMap,
    }

    impl Device for Dummy {
        fn name(&self) -> &str {
            "Dummy"
        }
        fn description(&self) -> String {
            "test device".into()
        }
        fn device_type(&self) -> DeviceType {
            DeviceType::Generic
        }
        fn initialize(&self) -> Result<()> {
            Ok(())
        }
        fn shutdown(&self) -> Result<()> {
            Ok(())
        }
        fn properties(&self) -> &PropertyMap {
            &self.props
        }
    }

    #[test]
    fn test_generic_handle_has_no_capabilities() {
        let handle = DeviceHandle::generic(Arc::new(Dummy {
            props: PropertyMap::new(),
        }));
        assert_eq!(handle.device_type(), DeviceType::Generic);
        assert!(handle.as_camera().is_none());
        assert_eq!(handle.device().name(), "Dummy");
    }

    #[test]
    fn test_default_set_property_validates() {
        let dummy = Dummy {
            props: PropertyMap::new(),
        };
        dummy.props.define(
            PropertyDescriptor::string("Mode").with_allowed_values(["A", "B"]),
            "A",
        );
        assert!(dummy.set_property("Mode", "C").is_err());
        assert!(!dummy.set_property("Mode", "B").unwrap().has_side_effects());
        assert_eq!(dummy.get_property("Mode").unwrap(), "B");
    }

    #[test]
    fn test_role_core_properties_round_trip() {
        for role in DeviceRole::ALL {
            assert_eq!(DeviceRole::from_core_property(role.core_property()), Some(role));
        }
        assert_eq!(DeviceRole::Focus.device_type(), DeviceType::Stage);
    }

    #[test]
    fn test_type_matches_any() {
        assert!(DeviceType::Camera.matches(DeviceType::Any));
        assert!(!DeviceType::Camera.matches(DeviceType::Stage));
    }
}
