//! Demo storage device (`DStorage`) backed by the filesystem dataset writer.

use crate::common::DemoBase;
use anyhow::{Context, Result};
use mmc_core::device::{Device, DeviceType, Storage};
use mmc_core::image::PixelType;
use mmc_core::property::{PropertyDescriptor, PropertyMap};
use mmc_storage::DatasetWriter;

/// Device name within the demo module.
pub const DEVICE_NAME: &str = "DStorage";

/// Storage sink writing raw datasets to disk.
#[derive(Debug)]
pub struct DStorage {
    base: DemoBase,
    writer: DatasetWriter,
}

impl DStorage {
    /// Creates the sink.
    pub fn new() -> Self {
        let base = DemoBase::new(DEVICE_NAME, "Raw dataset writer");
        base.properties()
            .define(PropertyDescriptor::string("Format").read_only(), "raw");
        Self {
            base,
            writer: DatasetWriter::new(),
        }
    }
}

impl Default for DStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl Device for DStorage {
    fn name(&self) -> &str {
        self.base.name()
    }

    fn description(&self) -> String {
        self.base.description()
    }

    fn device_type(&self) -> DeviceType {
        DeviceType::Storage
    }

    fn initialize(&self) -> Result<()> {
        self.base.initialize()
    }

    fn shutdown(&self) -> Result<()> {
        self.base.shutdown();
        Ok(())
    }

    fn properties(&self) -> &PropertyMap {
        self.base.properties()
    }
}

impl Storage for DStorage {
    fn create(
        &self,
        path: &str,
        name: &str,
        shape: &[u32],
        pixel_type: PixelType,
        metadata_json: &str,
    ) -> Result<String> {
        self.base.check("create")?;
        let handle = self
            .writer
            .create(path, name, shape, pixel_type, metadata_json)
            .with_context(|| format!("cannot create dataset {name} in {path}"))?;
        Ok(handle)
    }

    fn write_frame(
        &self,
        handle: &str,
        coordinates: &[u32],
        pixels: &[u8],
        metadata_json: &str,
    ) -> Result<()> {
        self.base.check("write_frame")?;
        self.writer
            .write_frame(handle, coordinates, pixels, metadata_json)?;
        Ok(())
    }

    fn is_open(&self, handle: &str) -> bool {
        self.writer.is_open(handle)
    }

    fn close(&self, handle: &str) -> Result<()> {
        let frames = self.writer.close(handle)?;
        tracing::debug!(handle, frames, "DStorage closed dataset");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dataset_lifecycle() {
        let root = tempfile::tempdir().unwrap();
        let path = root.path().to_string_lossy().into_owned();
        let storage = DStorage::new();
        let handle = storage
            .create(&path, "demo", &[2, 4, 4], PixelType::Gray16, "{}")
            .unwrap();
        assert!(storage.is_open(&handle));
        storage.write_frame(&handle, &[0], &[0u8; 32], "{}").unwrap();
        storage.close(&handle).unwrap();
        assert!(!storage.is_open(&handle));
        assert!(root.path().join("demo").join("data.raw").exists());
    }

    #[test]
    fn test_errors_carry_context() {
        let root = tempfile::tempdir().unwrap();
        let path = root.path().to_string_lossy().into_owned();
        let storage = DStorage::new();
        let err = storage
            .create(&path, "flat", &[4, 4], PixelType::Gray8, "")
            .unwrap_err();
        assert!(format!("{err:#}").contains("cannot create dataset flat"));
    }
}
