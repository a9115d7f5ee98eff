//! Frame buffering and dataset output for mmcore.
//!
//! - [`circular_buffer`]: bounded slot ring between the acquisition producer
//!   and consumers
//! - [`dataset`]: filesystem writer behind the storage device contract

pub mod circular_buffer;
pub mod dataset;

pub use circular_buffer::CircularBuffer;
pub use dataset::DatasetWriter;
