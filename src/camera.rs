//! Snapping, camera geometry, exposure, ROI and the circular-buffer surface.

use crate::acquisition::process_frame;
use crate::core::Core;
use crate::properties::EXPOSURE_PROPERTY;
use mmc_core::device::DeviceRole;
use mmc_core::error::{CoreError, CoreResult};
use mmc_core::image::{Image, Roi};
use mmc_core::metadata::Metadata;

impl Core {
    // =========================================================================
    // Snap
    // =========================================================================

    /// Exposes one frame on the current camera, outside the circular buffer.
    ///
    /// With auto-shutter on, the current shutter is opened before the
    /// exposure and closed afterwards, also when the snap fails.
    pub fn snap_image(&self) -> CoreResult<()> {
        let (label, camera) = self.current_camera()?;
        if self.is_sequence_running_for(&label) {
            return Err(CoreError::AcquisitionBusy(label));
        }

        let shutter = if self.get_auto_shutter() {
            self.roles.get(DeviceRole::Shutter)
        } else {
            None
        };
        if let Some(shutter) = &shutter {
            self.set_shutter_open_for(shutter, true)?;
            self.wait_for_device(shutter)?;
        }

        let snapped = camera
            .snap_image()
            .map_err(|e| CoreError::device(&label, e));

        if let Some(shutter) = &shutter {
            let closed = self.set_shutter_open_for(shutter, false);
            if let Err(e) = &closed {
                tracing::warn!(shutter = %shutter, error = %e, "cannot close shutter after snap");
            }
            if snapped.is_ok() {
                closed?;
            }
        }
        snapped?;
        self.log.core_debug(&format!("Snapped image on {label}"));
        Ok(())
    }

    /// Last snapped frame of the current camera, after the image processor.
    pub fn get_image(&self) -> CoreResult<Image> {
        let (label, camera) = self.current_camera()?;
        let geometry = camera.geometry();
        let pixels = camera
            .image_buffer()
            .map_err(|e| CoreError::device(&label, e))?;
        let pixels = process_frame(&self.registry, &self.roles, pixels, &geometry)?;
        Image::from_raw(&geometry, pixels)
    }

    // =========================================================================
    // Geometry
    // =========================================================================

    /// Frame width of the current camera.
    pub fn get_image_width(&self) -> CoreResult<u32> {
        Ok(self.current_camera()?.1.image_width())
    }

    /// Frame height of the current camera.
    pub fn get_image_height(&self) -> CoreResult<u32> {
        Ok(self.current_camera()?.1.image_height())
    }

    /// Bytes per pixel of the current camera.
    pub fn get_bytes_per_pixel(&self) -> CoreResult<u32> {
        Ok(self.current_camera()?.1.bytes_per_pixel())
    }

    /// Components per pixel (1 grayscale, 4 color).
    pub fn get_number_of_components(&self) -> CoreResult<u32> {
        Ok(self.current_camera()?.1.number_of_components())
    }

    /// Significant bits per component.
    pub fn get_image_bit_depth(&self) -> CoreResult<u32> {
        Ok(self.current_camera()?.1.bit_depth())
    }

    /// Bytes of one raw frame.
    pub fn get_image_buffer_size(&self) -> CoreResult<u64> {
        let camera = self.current_camera()?.1;
        Ok(u64::from(camera.image_width())
            * u64::from(camera.image_height())
            * u64::from(camera.bytes_per_pixel()))
    }

    // =========================================================================
    // Exposure
    // =========================================================================

    /// Exposure of the current camera in milliseconds.
    pub fn get_exposure(&self) -> CoreResult<f64> {
        Ok(self.current_camera()?.1.exposure())
    }

    /// Sets the exposure of the current camera.
    pub fn set_exposure(&self, exposure_ms: f64) -> CoreResult<()> {
        let camera = self.require_role(DeviceRole::Camera)?;
        self.set_exposure_for(&camera, exposure_ms)
    }

    /// Sets the exposure of camera `label` through its `Exposure` property.
    pub fn set_exposure_for(&self, label: &str, exposure_ms: f64) -> CoreResult<()> {
        self.registry.camera(label)?;
        if !(exposure_ms.is_finite() && exposure_ms >= 0.0) {
            return Err(CoreError::InvalidArgument(format!(
                "invalid exposure {exposure_ms} ms"
            )));
        }
        self.set_property(label, EXPOSURE_PROPERTY, &exposure_ms.to_string())
    }

    // =========================================================================
    // ROI
    // =========================================================================

    /// Restricts the current camera to a sub-region.
    pub fn set_roi(&self, x: u32, y: u32, width: u32, height: u32) -> CoreResult<()> {
        let (label, camera) = self.current_camera()?;
        if self.is_sequence_running_for(&label) {
            return Err(CoreError::AcquisitionBusy(label));
        }
        if width == 0 || height == 0 {
            return Err(CoreError::InvalidArgument(format!(
                "ROI {width}x{height} is empty"
            )));
        }
        camera
            .set_roi(Roi::new(x, y, width, height))
            .map_err(|e| CoreError::device(&label, e))?;
        self.log
            .core_debug(&format!("ROI of {label} set to {x},{y} {width}x{height}"));
        Ok(())
    }

    /// Current ROI of the current camera.
    pub fn get_roi(&self) -> CoreResult<Roi> {
        Ok(self.current_camera()?.1.roi())
    }

    /// Restores the full sensor.
    pub fn clear_roi(&self) -> CoreResult<()> {
        let (label, camera) = self.current_camera()?;
        if self.is_sequence_running_for(&label) {
            return Err(CoreError::AcquisitionBusy(label));
        }
        camera.clear_roi().map_err(|e| CoreError::device(&label, e))?;
        self.log.core_debug(&format!("ROI of {label} cleared"));
        Ok(())
    }

    /// No camera here supports several ROIs at once.
    pub fn is_multi_roi_supported(&self) -> bool {
        false
    }

    /// Always fails with `NotSupported`.
    pub fn set_multi_roi(&self, _rois: &[Roi]) -> CoreResult<()> {
        Err(CoreError::NotSupported("multiple ROIs".into()))
    }

    // =========================================================================
    // Circular buffer
    // =========================================================================

    /// Resizes the circular buffer, re-initializing it for the current
    /// camera when one is assigned.
    pub fn set_circular_buffer_memory_footprint(&self, megabytes: u64) -> CoreResult<()> {
        self.buffer.set_memory_footprint(megabytes)?;
        if self.roles.get(DeviceRole::Camera).is_some() {
            self.initialize_circular_buffer()?;
        }
        self.log
            .core(&format!("Circular buffer footprint set to {megabytes} MB"));
        Ok(())
    }

    /// Configured footprint in megabytes.
    pub fn get_circular_buffer_memory_footprint(&self) -> u64 {
        self.buffer.memory_footprint_mb()
    }

    /// Sizes the buffer for the current camera and empties it.
    pub fn initialize_circular_buffer(&self) -> CoreResult<()> {
        let (_, camera) = self.current_camera()?;
        self.buffer.initialize(camera.geometry())
    }

    /// Removes and returns the oldest buffered image.
    pub fn pop_next_image(&self) -> CoreResult<Image> {
        self.buffer.pop_next()?.to_image()
    }

    /// Removes and returns the oldest buffered image with its tags.
    pub fn pop_next_image_and_metadata(&self) -> CoreResult<(Image, Metadata)> {
        let frame = self.buffer.pop_next()?;
        Ok((frame.to_image()?, frame.metadata))
    }

    /// Newest buffered image, left in place.
    pub fn get_last_image(&self) -> CoreResult<Image> {
        self.buffer.peek_last()?.to_image()
    }

    /// Tags of the newest buffered image.
    pub fn get_last_image_metadata(&self) -> CoreResult<Metadata> {
        Ok(self.buffer.peek_last()?.metadata)
    }

    /// Image `n` positions before the newest, left in place; `n = 0` is
    /// the newest.
    pub fn get_n_before_last_image(&self, n: u64) -> CoreResult<Image> {
        self.buffer.peek_n_before_last(n)?.to_image()
    }

    /// Image and tags `n` positions before the newest, left in place.
    pub fn get_n_before_last_image_and_metadata(&self, n: u64) -> CoreResult<(Image, Metadata)> {
        let frame = self.buffer.peek_n_before_last(n)?;
        Ok((frame.to_image()?, frame.metadata))
    }

    /// Tags of the image `n` positions before the newest.
    pub fn get_n_before_last_image_metadata(&self, n: u64) -> CoreResult<Metadata> {
        Ok(self.buffer.peek_n_before_last(n)?.metadata)
    }

    /// Images waiting to be popped.
    pub fn get_remaining_image_count(&self) -> u64 {
        self.buffer.remaining()
    }

    /// Slots free for new images.
    pub fn get_buffer_free_capacity(&self) -> u64 {
        self.buffer.free_capacity()
    }

    /// Total slots; 0 before the buffer has been sized.
    pub fn get_buffer_total_capacity(&self) -> u64 {
        self.buffer.total_capacity()
    }

    /// True once a frame found the buffer full.
    pub fn is_buffer_overflowed(&self) -> bool {
        self.buffer.is_overflowed()
    }

    /// Drops every buffered image and clears the overflow flag.
    pub fn clear_circular_buffer(&self) {
        self.buffer.clear();
    }
}
