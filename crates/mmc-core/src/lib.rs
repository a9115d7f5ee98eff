//! # mmc-core
//!
//! Shared vocabulary of the mmcore workspace: device traits and handles,
//! properties, configuration presets, frames and metadata, change events,
//! the adapter contract and the error type.
//!
//! Crates layered on top:
//!
//! - `mmc-storage`: circular frame buffer and the filesystem dataset writer
//! - `mmc-hardware`: device registry and adapter catalog
//! - `mmc-driver-demo`: simulated devices
//! - `mmcore`: the `Core` facade

pub mod adapter;
pub mod configuration;
pub mod device;
pub mod error;
pub mod events;
pub mod image;
pub mod limits;
pub mod metadata;
pub mod property;

pub use adapter::{AdapterModule, DeviceDescriptor, ModuleRegistry};
pub use configuration::{
    ConfigGroupCollection, Configuration, PixelSizeGroup, PixelSizePreset, PropertySetting,
};
pub use device::{
    Camera, Device, DeviceHandle, DeviceKind, DeviceRole, DeviceType, ImageProcessor,
    InitializationState, Shutter, Stage, StateDevice, Storage, XYStage,
};
pub use error::{CoreError, CoreResult, DriverError, DriverErrorKind};
pub use events::{CoreEvent, CoreObserver, EventDispatcher, ObserverHandle};
pub use image::{FrameGeometry, Image, ImageFrame, PixelType, Roi};
pub use metadata::Metadata;
pub use property::{PropertyDescriptor, PropertyMap, PropertyOutcome, PropertyType};
