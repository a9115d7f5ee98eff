//! # mmcore
//!
//! Device management and image-acquisition core for laboratory microscopy
//! hardware. A [`Core`] loads devices from adapter modules, tracks their
//! properties, assigns them to roles (camera, shutter, focus, ...), applies
//! named configuration presets, and acquires images either one at a time or
//! as a sequence streamed into a circular buffer by a producer thread.
//!
//! ## Crate Structure
//!
//! - **`core`**: the [`Core`] facade; device lifecycle, roles, observers,
//!   log surface.
//! - **`properties`**: property reads and writes, the `Core` pseudo-device,
//!   whole-system state snapshots.
//! - **`config_groups`**: configuration groups, the channel group and
//!   pixel-size calibration.
//! - **`camera`**: snapping, exposure, ROI and the circular-buffer surface.
//! - **`acquisition`**: the sequence state machine and producer thread.
//! - **`motion`**: focus and XY stages, shutters, state devices.
//! - **`storage`**: datasets written through the current storage device.
//! - **`system_config`**: loading and saving system configuration files.
//! - **`logging`**: primary, stderr and secondary log files.
//! - **`settings`**: startup settings from TOML and `MMCORE_*` variables.
//! - **`tracing_setup`**: `tracing-subscriber` initialization for binaries.
//!
//! Device traits, events, images and errors live in `mmc-core` and are
//! re-exported here.

pub mod acquisition;
pub mod camera;
pub mod config_groups;
pub mod core;
pub mod logging;
pub mod motion;
pub mod properties;
pub mod settings;
pub mod storage;
pub mod system_config;
pub mod tracing_setup;

pub use crate::acquisition::AcquisitionState;
pub use crate::core::{Core, DEVICE_API_VERSION, MODULE_API_VERSION};
pub use crate::logging::LogHandle;
pub use crate::settings::CoreSettings;

pub use mmc_core::{
    Camera, ConfigGroupCollection, Configuration, CoreError, CoreEvent, CoreObserver, CoreResult,
    Device, DeviceRole, DeviceType, FrameGeometry, Image, InitializationState, Metadata,
    ObserverHandle, PixelType, PropertyDescriptor, PropertySetting, PropertyType, Roi,
};
