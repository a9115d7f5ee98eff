//! Frame and image types.
//!
//! Cameras deliver raw pixel buffers described by a [`FrameGeometry`]. RGB
//! cameras deliver 4-component BGRA pixels; the client-facing [`Image`] drops
//! the alpha channel and reorders to RGB, so a `32bitRGB` frame becomes a
//! 3-channel image of 1-byte elements and a `64bitRGB` frame a 3-channel
//! image of 2-byte elements.

use crate::error::CoreError;
use crate::limits::{validate_frame_size, FrameSize};
use crate::metadata::Metadata;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Pixel format derived from bytes-per-pixel and component count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PixelType {
    /// 8-bit grayscale.
    Gray8,
    /// 16-bit grayscale.
    Gray16,
    /// 32-bit grayscale.
    Gray32,
    /// 8 bits per channel BGRA.
    Rgb32,
    /// 16 bits per channel BGRA.
    Rgb64,
}

impl PixelType {
    /// Resolves the pixel type of a camera reporting `bytes_per_pixel` and
    /// `components`.
    pub fn from_layout(bytes_per_pixel: u32, components: u32) -> Result<Self, CoreError> {
        match (bytes_per_pixel, components) {
            (1, 1) => Ok(PixelType::Gray8),
            (2, 1) => Ok(PixelType::Gray16),
            (4, 1) => Ok(PixelType::Gray32),
            (4, 4) => Ok(PixelType::Rgb32),
            (8, 4) => Ok(PixelType::Rgb64),
            _ => Err(CoreError::NotSupported(format!(
                "pixel layout of {bytes_per_pixel} bytes with {components} components"
            ))),
        }
    }

    /// Metadata tag value (`GRAY16`, `RGB32`, ...).
    pub fn tag(&self) -> &'static str {
        match self {
            PixelType::Gray8 => "GRAY8",
            PixelType::Gray16 => "GRAY16",
            PixelType::Gray32 => "GRAY32",
            PixelType::Rgb32 => "RGB32",
            PixelType::Rgb64 => "RGB64",
        }
    }

    /// Parses a metadata tag value.
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "GRAY8" => Some(PixelType::Gray8),
            "GRAY16" => Some(PixelType::Gray16),
            "GRAY32" => Some(PixelType::Gray32),
            "RGB32" => Some(PixelType::Rgb32),
            "RGB64" => Some(PixelType::Rgb64),
            _ => None,
        }
    }

    /// Bytes of one raw pixel (all components).
    pub fn bytes_per_pixel(&self) -> u32 {
        match self {
            PixelType::Gray8 => 1,
            PixelType::Gray16 => 2,
            PixelType::Gray32 | PixelType::Rgb32 => 4,
            PixelType::Rgb64 => 8,
        }
    }

    /// Components in the raw pixel.
    pub fn components(&self) -> u32 {
        match self {
            PixelType::Gray8 | PixelType::Gray16 | PixelType::Gray32 => 1,
            PixelType::Rgb32 | PixelType::Rgb64 => 4,
        }
    }

    /// True for color formats.
    pub fn is_rgb(&self) -> bool {
        matches!(self, PixelType::Rgb32 | PixelType::Rgb64)
    }
}

/// Shape of a raw camera frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameGeometry {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// Bytes per pixel including all components.
    pub bytes_per_pixel: u32,
    /// Components per pixel (1 for grayscale, 4 for BGRA).
    pub components: u32,
}

impl FrameGeometry {
    /// Creates a geometry.
    pub fn new(width: u32, height: u32, bytes_per_pixel: u32, components: u32) -> Self {
        Self {
            width,
            height,
            bytes_per_pixel,
            components,
        }
    }

    /// Validated size of one frame.
    pub fn frame_size(&self) -> Result<FrameSize, CoreError> {
        validate_frame_size(self.width, self.height, self.bytes_per_pixel as usize)
    }

    /// Pixel type of this geometry.
    pub fn pixel_type(&self) -> Result<PixelType, CoreError> {
        PixelType::from_layout(self.bytes_per_pixel, self.components)
    }
}

/// Rectangular region of interest in image pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Roi {
    /// Left edge.
    pub x: u32,
    /// Top edge.
    pub y: u32,
    /// Width.
    pub width: u32,
    /// Height.
    pub height: u32,
}

impl Roi {
    /// Creates a region.
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }
}

/// One raw frame plus its metadata, as stored in the circular buffer.
#[derive(Debug, Clone)]
pub struct ImageFrame {
    /// Frame shape.
    pub geometry: FrameGeometry,
    /// Raw pixel bytes, row-major.
    pub pixels: Bytes,
    /// Per-frame tags.
    pub metadata: Metadata,
    /// Buffer insertion sequence number, assigned on insert.
    pub sequence: u64,
}

impl ImageFrame {
    /// Creates a frame with sequence 0.
    pub fn new(geometry: FrameGeometry, pixels: impl Into<Bytes>, metadata: Metadata) -> Self {
        Self {
            geometry,
            pixels: pixels.into(),
            metadata,
            sequence: 0,
        }
    }

    /// Converts to the client view.
    pub fn to_image(&self) -> Result<Image, CoreError> {
        Image::from_raw(&self.geometry, self.pixels.clone())
    }
}

/// Client-facing image.
///
/// Grayscale images have one channel; RGB images have three channels in
/// R, G, B order with the alpha component removed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Image {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// Channels per pixel (1 or 3).
    pub channels: u32,
    /// Bytes per channel element.
    pub element_bytes: u32,
    /// Pixel data, row-major, channels interleaved.
    pub data: Bytes,
}

impl Image {
    /// Builds an image from a raw frame buffer.
    pub fn from_raw(geometry: &FrameGeometry, pixels: Bytes) -> Result<Self, CoreError> {
        let pixel_type = geometry.pixel_type()?;
        let size = geometry.frame_size()?;
        if pixels.len() != size.bytes {
            return Err(CoreError::FrameSizeMismatch {
                expected: size.bytes,
                actual: pixels.len(),
            });
        }

        if !pixel_type.is_rgb() {
            return Ok(Self {
                width: geometry.width,
                height: geometry.height,
                channels: 1,
                element_bytes: geometry.bytes_per_pixel,
                data: pixels,
            });
        }

        let element = (pixel_type.bytes_per_pixel() / 4) as usize;
        let mut rgb = Vec::with_capacity(size.pixels * 3 * element);
        for px in pixels.chunks_exact(4 * element) {
            // BGRA in, RGB out
            rgb.extend_from_slice(&px[2 * element..3 * element]);
            rgb.extend_from_slice(&px[element..2 * element]);
            rgb.extend_from_slice(&px[..element]);
        }
        Ok(Self {
            width: geometry.width,
            height: geometry.height,
            channels: 3,
            element_bytes: element as u32,
            data: Bytes::from(rgb),
        })
    }

    /// Array shape: `[height, width]` or `[height, width, 3]`.
    pub fn shape(&self) -> Vec<usize> {
        let mut shape = vec![self.height as usize, self.width as usize];
        if self.channels > 1 {
            shape.push(self.channels as usize);
        }
        shape
    }

    /// Element at (`x`, `y`, `channel`) widened to `u64`, little-endian.
    pub fn get(&self, x: u32, y: u32, channel: u32) -> Option<u64> {
        if x >= self.width || y >= self.height || channel >= self.channels {
            return None;
        }
        let eb = self.element_bytes as usize;
        let idx = ((y as usize * self.width as usize + x as usize) * self.channels as usize
            + channel as usize)
            * eb;
        let bytes = self.data.get(idx..idx + eb)?;
        Some(
            bytes
                .iter()
                .rev()
                .fold(0u64, |acc, b| (acc << 8) | u64::from(*b)),
        )
    }

    /// Mean of all elements.
    pub fn mean(&self) -> f64 {
        let eb = self.element_bytes as usize;
        let count = self.data.len() / eb.max(1);
        if count == 0 {
            return 0.0;
        }
        let sum: f64 = self
            .data
            .chunks_exact(eb)
            .map(|c| c.iter().rev().fold(0u64, |acc, b| (acc << 8) | u64::from(*b)) as f64)
            .sum();
        sum / count as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pixel_type_layouts() {
        assert_eq!(PixelType::from_layout(2, 1).unwrap(), PixelType::Gray16);
        assert_eq!(PixelType::from_layout(4, 4).unwrap().tag(), "RGB32");
        assert!(PixelType::from_layout(3, 1).is_err());
        assert_eq!(PixelType::from_tag("GRAY8"), Some(PixelType::Gray8));
    }

    #[test]
    fn test_gray_image_keeps_data() {
        let geometry = FrameGeometry::new(2, 1, 2, 1);
        let image = Image::from_raw(&geometry, Bytes::from(vec![1u8, 0, 2, 1])).unwrap();
        assert_eq!(image.shape(), vec![1, 2]);
        assert_eq!(image.get(0, 0, 0), Some(1));
        assert_eq!(image.get(1, 0, 0), Some(258));
    }

    #[test]
    fn test_rgb32_drops_alpha_and_reorders() {
        let geometry = FrameGeometry::new(1, 1, 4, 4);
        // B, G, R, A
        let image = Image::from_raw(&geometry, Bytes::from(vec![10u8, 20, 30, 255])).unwrap();
        assert_eq!(image.channels, 3);
        assert_eq!(image.element_bytes, 1);
        assert_eq!(image.shape(), vec![1, 1, 3]);
        assert_eq!(image.data.as_ref(), &[30, 20, 10]);
    }

    #[test]
    fn test_rgb64_has_two_byte_elements() {
        let geometry = FrameGeometry::new(1, 1, 8, 4);
        let raw: Vec<u8> = vec![1, 0, 2, 0, 3, 0, 0xff, 0xff];
        let image = Image::from_raw(&geometry, Bytes::from(raw)).unwrap();
        assert_eq!(image.element_bytes, 2);
        assert_eq!(image.get(0, 0, 0), Some(3));
        assert_eq!(image.get(0, 0, 2), Some(1));
    }

    #[test]
    fn test_size_mismatch_rejected() {
        let geometry = FrameGeometry::new(2, 2, 1, 1);
        assert!(matches!(
            Image::from_raw(&geometry, Bytes::from(vec![0u8; 3])),
            Err(CoreError::FrameSizeMismatch { expected: 4, actual: 3 })
        ));
    }

    #[test]
    fn test_mean() {
        let geometry = FrameGeometry::new(2, 1, 1, 1);
        let image = Image::from_raw(&geometry, Bytes::from(vec![2u8, 4])).unwrap();
        assert!((image.mean() - 3.0).abs() < f64::EPSILON);
    }
}
