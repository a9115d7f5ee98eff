//! Device registry and adapter catalog for mmcore.
//!
//! - [`adapters::AdapterCatalog`]: adapter modules by name; discovery and
//!   instantiation
//! - [`registry::DeviceRegistry`]: loaded devices by label, in load order,
//!   with their initialization state

pub mod adapters;
pub mod registry;

pub use adapters::AdapterCatalog;
pub use registry::{DeviceRegistry, LoadedDevice, CORE_LABEL};
