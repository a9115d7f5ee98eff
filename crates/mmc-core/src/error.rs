//! Error types shared by every mmcore crate.
//!
//! `CoreError` is the single error type returned by the public `Core`
//! operations, the registry, and the circular buffer. It is built with
//! `thiserror`, so underlying I/O failures convert through `?` and every
//! variant carries a human-readable message that identifies the offending
//! device, property, group or buffer condition.
//!
//! ## Error Families
//!
//! - **Registry**: `DeviceNotFound`, `AdapterLoadFailure`, `AlreadyLoaded`,
//!   `AlreadyInitialized`, `DeviceNotInitialized`, `IncompatibleDevice`,
//!   `RoleNotAssigned`.
//! - **Properties and configuration**: `UnknownProperty`, `PropertyReadOnly`,
//!   `PropertyValidation`, `ConfigGroupNotFound`, `ConfigNotFound`,
//!   `ConfigApply`, `SystemStateApply`, `ConfigFile`.
//! - **Buffer and acquisition**: `BufferEmpty`, `BufferOverflow`,
//!   `BufferBusy`, `FrameSizeMismatch`, `AcquisitionBusy`,
//!   `AcquisitionTimeout`.
//! - **Collaborators**: `Device` (adapter-reported failure), `Storage`, `Io`.
//!
//! Adapter-reported *initialization* failures are deliberately not errors:
//! the registry records them as `InitializationState::InitializationFailed`
//! so the caller can re-query the device.

use crate::device::{DeviceRole, DeviceType};
use thiserror::Error;

// =============================================================================
// Driver Errors
// =============================================================================

/// Category of a failure reported by a device adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverErrorKind {
    /// Adapter-level initialization failed.
    Initialization,
    /// Lost contact with the hardware.
    Communication,
    /// The hardware reported a fault.
    Hardware,
    /// An operation did not complete in time.
    Timeout,
    /// The adapter rejected an argument.
    InvalidParameter,
}

impl std::fmt::Display for DriverErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            DriverErrorKind::Initialization => "initialization",
            DriverErrorKind::Communication => "communication",
            DriverErrorKind::Hardware => "hardware",
            DriverErrorKind::Timeout => "timeout",
            DriverErrorKind::InvalidParameter => "invalid_parameter",
        };
        write!(f, "{}", label)
    }
}

/// Structured failure raised inside a device adapter.
///
/// Adapters return `anyhow::Result`, so a `DriverError` usually travels as the
/// root cause of an `anyhow::Error` and is rendered into
/// [`CoreError::Device`] at the core boundary.
#[derive(Error, Debug, Clone)]
#[error("Driver '{driver_type}' {kind} error: {message}")]
pub struct DriverError {
    /// Adapter device name that failed (e.g. `DCam`).
    pub driver_type: String,
    /// Failure category.
    pub kind: DriverErrorKind,
    /// Adapter message.
    pub message: String,
}

impl DriverError {
    /// Creates a new driver error.
    pub fn new(
        driver_type: impl Into<String>,
        kind: DriverErrorKind,
        message: impl Into<String>,
    ) -> Self {
        Self {
            driver_type: driver_type.into(),
            kind,
            message: message.into(),
        }
    }
}

/// Convenience alias for results using the core error type.
pub type CoreResult<T> = std::result::Result<T, CoreError>;

/// Primary error type for mmcore.
///
/// Every fallible public operation returns `CoreResult<T>`. Errors are always
/// reported synchronously to the caller that detected them; nothing is
/// retried automatically and partially applied state is left in place.
///
/// # Example
///
/// ```rust
/// use mmc_core::error::CoreError;
///
/// let err = CoreError::DeviceNotFound("Camera".into());
/// assert_eq!(err.to_string(), "No device with label \"Camera\"");
/// ```
#[derive(Error, Debug)]
pub enum CoreError {
    /// No loaded device carries the given label.
    #[error("No device with label \"{0}\"")]
    DeviceNotFound(String),

    /// The adapter module or the named device could not be instantiated.
    ///
    /// **Recovery Strategy**: check the module name against
    /// `get_device_adapter_names()` and the device name against
    /// `get_available_devices(module)`.
    #[error("Failed to load device \"{device}\" from adapter module \"{module}\": {reason}")]
    AdapterLoadFailure {
        /// Adapter module name.
        module: String,
        /// Device name inside the module.
        device: String,
        /// Why instantiation failed.
        reason: String,
    },

    /// The label is already taken by a loaded device.
    #[error("Failed to load device: label \"{0}\" is already in use")]
    AlreadyLoaded(String),

    /// `initialize_device` was called twice without an intervening unload.
    #[error("Device already initialized: \"{0}\"")]
    AlreadyInitialized(String),

    /// The operation needs an initialized device.
    #[error("Device \"{0}\" is not initialized")]
    DeviceNotInitialized(String),

    /// A role or capability operation targeted a device of the wrong type.
    #[error("Device \"{label}\" is a {actual} device, expected {expected}")]
    IncompatibleDevice {
        /// Device label.
        label: String,
        /// Required device type.
        expected: DeviceType,
        /// Actual device type.
        actual: DeviceType,
    },

    /// No device is assigned to the role the operation needs.
    #[error("{0} not loaded")]
    RoleNotAssigned(DeviceRole),

    /// The adapter reported a failure while executing an operation.
    #[error("Device \"{label}\" error: {message}")]
    Device {
        /// Device label.
        label: String,
        /// Adapter message, including its cause chain.
        message: String,
    },

    /// The device does not define the property.
    #[error("Property \"{property}\" is not defined for device \"{label}\"")]
    UnknownProperty {
        /// Device label.
        label: String,
        /// Property name.
        property: String,
    },

    /// The property cannot be written.
    #[error("Property \"{property}\" of device \"{label}\" is read-only")]
    PropertyReadOnly {
        /// Device label.
        label: String,
        /// Property name.
        property: String,
    },

    /// The value is outside the allowed set or the numeric limits.
    #[error("Invalid value \"{value}\" for property \"{property}\" of device \"{label}\": {reason}")]
    PropertyValidation {
        /// Device label.
        label: String,
        /// Property name.
        property: String,
        /// Rejected value.
        value: String,
        /// Validation failure detail.
        reason: String,
    },

    /// The configuration group does not exist.
    #[error("Configuration group \"{0}\" does not exist")]
    ConfigGroupNotFound(String),

    /// The preset does not exist in the group.
    #[error("Configuration preset \"{preset}\" does not exist in group \"{group}\"")]
    ConfigNotFound {
        /// Group name.
        group: String,
        /// Preset name.
        preset: String,
    },

    /// Applying a preset stopped at the first failing setting.
    ///
    /// Devices listed in `partially_applied` already received earlier
    /// settings of the preset; they are not rolled back.
    #[error("Failed to apply preset \"{preset}\" of group \"{group}\" (partially applied to {partially_applied:?}): {source}")]
    ConfigApply {
        /// Group name.
        group: String,
        /// Preset name.
        preset: String,
        /// Devices that received at least one setting before the failure.
        partially_applied: Vec<String>,
        /// First failure.
        #[source]
        source: Box<CoreError>,
    },

    /// `set_system_state` stopped at the first failing property.
    #[error("Failed to restore {device}.{property}={value}: {source}")]
    SystemStateApply {
        /// Device label.
        device: String,
        /// Property name.
        property: String,
        /// Value that could not be applied.
        value: String,
        /// First failure.
        #[source]
        source: Box<CoreError>,
    },

    /// A system configuration file line could not be applied.
    #[error("Configuration file error at line {line}: {reason}")]
    ConfigFile {
        /// 1-based line number.
        line: usize,
        /// Parse or apply failure.
        reason: String,
    },

    /// Metadata lookup for a tag that is not present.
    #[error("Undefined metadata key: {0}")]
    MetadataKeyNotFound(String),

    /// The circular buffer holds no (or not enough) frames.
    #[error("Circular buffer is empty")]
    BufferEmpty,

    /// The circular buffer had no free slot for a new frame.
    #[error("Circular buffer overflowed")]
    BufferOverflow,

    /// The buffer geometry cannot change in its current state.
    #[error("Circular buffer is busy: {0}")]
    BufferBusy(String),

    /// Frame payload does not match the buffer slot size.
    #[error("Frame size {actual} bytes does not match slot size {expected} bytes")]
    FrameSizeMismatch {
        /// Slot size in bytes.
        expected: usize,
        /// Frame size in bytes.
        actual: usize,
    },

    /// A sequence acquisition is already running.
    #[error("Sequence acquisition already in progress on camera \"{0}\"")]
    AcquisitionBusy(String),

    /// The producer did not exit within the core timeout.
    #[error("Sequence acquisition did not stop within {timeout_ms} ms")]
    AcquisitionTimeout {
        /// Timeout that elapsed.
        timeout_ms: u64,
    },

    /// A device stayed busy past the core timeout.
    #[error("Wait for device \"{label}\" timed out after {timeout_ms} ms")]
    Timeout {
        /// Device label.
        label: String,
        /// Timeout that elapsed.
        timeout_ms: u64,
    },

    /// Failure reported by the storage collaborator.
    #[error("Storage error: {0}")]
    Storage(String),

    /// Argument rejected before reaching any device.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The device or core does not support the operation.
    #[error("Operation not supported: {0}")]
    NotSupported(String),

    /// No secondary log is registered under the handle.
    #[error("No secondary log with handle {0}")]
    UnknownLogHandle(u64),

    /// Core settings could not be loaded.
    #[error("Settings error: {0}")]
    Settings(String),

    /// Log or configuration file access failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl CoreError {
    /// Wraps an adapter failure for the device with `label`.
    ///
    /// The full `anyhow` cause chain is kept in the message.
    pub fn device(label: impl Into<String>, err: anyhow::Error) -> Self {
        CoreError::Device {
            label: label.into(),
            message: format!("{err:#}"),
        }
    }
}
