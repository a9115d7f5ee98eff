//! 3×3 median filter image processor (`MedianFilter`).

use crate::common::DemoBase;
use anyhow::{bail, Result};
use mmc_core::device::{Device, DeviceType, ImageProcessor};
use mmc_core::image::FrameGeometry;
use mmc_core::property::{PropertyDescriptor, PropertyMap};

/// Device name within the demo module.
pub const DEVICE_NAME: &str = "MedianFilter";

/// Per-component 3×3 median, edges clamped.
#[derive(Debug)]
pub struct MedianFilter {
    base: DemoBase,
}

impl MedianFilter {
    /// Creates the filter.
    pub fn new() -> Self {
        let base = DemoBase::new(DEVICE_NAME, "3x3 median filter");
        base.properties()
            .define(PropertyDescriptor::integer("KernelSize").read_only(), "3");
        Self { base }
    }
}

impl Default for MedianFilter {
    fn default() -> Self {
        Self::new()
    }
}

impl Device for MedianFilter {
    fn name(&self) -> &str {
        self.base.name()
    }

    fn description(&self) -> String {
        self.base.description()
    }

    fn device_type(&self) -> DeviceType {
        DeviceType::ImageProcessor
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

impl ImageProcessor for MedianFilter {
    fn process(&self, pixels: &mut [u8], geometry: &FrameGeometry) -> Result<()> {
        self.base.check("process")?;
        let size = geometry.frame_size()?;
        if pixels.len() != size.bytes {
            bail!(
                "frame of {} bytes does not match {}x{}x{}",
                pixels.len(),
                geometry.width,
                geometry.height,
                geometry.bytes_per_pixel
            );
        }
        let components = geometry.components.max(1) as usize;
        let element = geometry.bytes_per_pixel as usize / components;
        if element == 0 || element > 8 {
            bail!("unsupported element size of {element} bytes");
        }

        let (w, h) = (geometry.width as usize, geometry.height as usize);
        let source = pixels.to_vec();
        let read = |x: usize, y: usize, c: usize| -> u64 {
            let at = ((y * w + x) * components + c) * element;
            source[at..at + element]
                .iter()
                .rev()
                .fold(0u64, |acc, b| (acc << 8) | u64::from(*b))
        };

        let mut window = [0u64; 9];
        for y in 0..h {
            for x in 0..w {
                for c in 0..components {
                    let mut n = 0;
                    for dy in [-1isize, 0, 1] {
                        for dx in [-1isize, 0, 1] {
                            let sx = (x as isize + dx).clamp(0, w as isize - 1) as usize;
                            let sy = (y as isize + dy).clamp(0, h as isize - 1) as usize;
                            window[n] = read(sx, sy, c);
                            n += 1;
                        }
                    }
                    window.sort_unstable();
                    let at = ((y * w + x) * components + c) * element;
                    pixels[at..at + element].copy_from_slice(&window[4].to_le_bytes()[..element]);
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_removes_hot_pixel() {
        let filter = MedianFilter::new();
        let geometry = FrameGeometry::new(3, 3, 1, 1);
        let mut pixels = vec![10u8; 9];
        pixels[4] = 255;
        filter.process(&mut pixels, &geometry).unwrap();
        assert!(pixels.iter().all(|p| *p == 10));
    }

    #[test]
    fn test_preserves_geometry_and_uniform_frames() {
        let filter = MedianFilter::new();
        let geometry = FrameGeometry::new(4, 2, 2, 1);
        let mut pixels: Vec<u8> = (0..8).flat_map(|_| 1000u16.to_le_bytes()).collect();
        filter.process(&mut pixels, &geometry).unwrap();
        assert_eq!(pixels.len(), 16);
        assert!(pixels.chunks_exact(2).all(|p| u16::from_le_bytes([p[0], p[1]]) == 1000));
    }

    #[test]
    fn test_rgb_components_are_independent() {
        let filter = MedianFilter::new();
        let geometry = FrameGeometry::new(2, 2, 4, 4);
        let mut pixels: Vec<u8> = (0..4).flat_map(|_| [1u8, 2, 3, 255]).collect();
        filter.process(&mut pixels, &geometry).unwrap();
        assert_eq!(&pixels[..4], &[1, 2, 3, 255]);
    }

    #[test]
    fn test_rejects_wrong_size() {
        let filter = MedianFilter::new();
        let geometry = FrameGeometry::new(4, 4, 1, 1);
        assert!(filter.process(&mut [0u8; 3], &geometry).is_err());
    }
}
