//! Common infrastructure for demo devices.
//!
//! - **base**: name, description, property table and fault hooks shared by
//!   every demo device
//! - **faults**: fault injection
//! - **rng**: seeded random number generator
//! - **timing**: settling delays and the busy window they produce

pub mod base;
pub mod faults;
pub mod rng;
pub mod timing;

pub use base::DemoBase;
pub use faults::{FaultConfig, FaultScenario};
pub use rng::DemoRng;
pub use timing::{BusyWindow, TimingConfig};
