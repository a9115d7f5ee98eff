//! Dataset writing through the current storage device.

use crate::core::Core;
use mmc_core::device::{DeviceRole, Storage};
use mmc_core::error::{CoreError, CoreResult};
use mmc_core::image::PixelType;
use std::sync::Arc;

fn storage_error(label: &str, err: anyhow::Error) -> CoreError {
    CoreError::Storage(format!("{label}: {err:#}"))
}

impl Core {
    fn current_storage(&self) -> CoreResult<(String, Arc<dyn Storage>)> {
        let label = self.require_role(DeviceRole::Storage)?;
        let storage = self.registry.storage(&label)?;
        Ok((label, storage))
    }

    /// Creates a dataset of `shape` (at least 3 dimensions, Y and X last)
    /// under `path`; returns its handle.
    pub fn create_dataset(
        &self,
        path: &str,
        name: &str,
        shape: &[u32],
        pixel_type: PixelType,
        metadata_json: &str,
    ) -> CoreResult<String> {
        let (label, storage) = self.current_storage()?;
        let handle = storage
            .create(path, name, shape, pixel_type, metadata_json)
            .map_err(|e| storage_error(&label, e))?;
        self.log.core(&format!(
            "Dataset {name} created in {path} by {label} with shape {shape:?}"
        ));
        Ok(handle)
    }

    /// Appends one frame to dataset `handle` at `coordinates`.
    pub fn write_frame(
        &self,
        handle: &str,
        coordinates: &[u32],
        pixels: &[u8],
        metadata_json: &str,
    ) -> CoreResult<()> {
        let (label, storage) = self.current_storage()?;
        storage
            .write_frame(handle, coordinates, pixels, metadata_json)
            .map_err(|e| storage_error(&label, e))
    }

    /// Writes the oldest buffered frame, with its tags, to dataset `handle`
    /// at `coordinates`, then removes it from the buffer.
    ///
    /// A frame that cannot be written stays buffered.
    pub fn save_next_image(&self, handle: &str, coordinates: &[u32]) -> CoreResult<()> {
        let (label, storage) = self.current_storage()?;
        if !storage.is_open(handle) {
            return Err(CoreError::Storage(format!(
                "{label}: no open dataset with handle {handle}"
            )));
        }
        self.buffer.pop_next_with(|frame| {
            storage
                .write_frame(handle, coordinates, &frame.pixels, &frame.metadata.to_json())
                .map_err(|e| storage_error(&label, e))
        })
    }

    /// True if `handle` is an open dataset of the current storage device.
    pub fn is_dataset_open(&self, handle: &str) -> CoreResult<bool> {
        Ok(self.current_storage()?.1.is_open(handle))
    }

    /// Finalizes dataset `handle`.
    pub fn close_dataset(&self, handle: &str) -> CoreResult<()> {
        let (label, storage) = self.current_storage()?;
        storage.close(handle).map_err(|e| storage_error(&label, e))?;
        self.log.core(&format!("Dataset {handle} closed by {label}"));
        Ok(())
    }
}
