//! Shared hard limits to prevent unbounded allocations.
//!
//! Camera geometry comes from adapters and is multiplied into buffer sizes,
//! so every size computation goes through [`validate_frame_size`].

use crate::error::CoreError;
use std::time::Duration;

// =============================================================================
// Timeout Constants
// =============================================================================

/// Default core timeout for device waits and acquisition stop.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(5000);

/// Poll period used while waiting for busy devices.
pub const BUSY_POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Longest uninterrupted sleep of the producer between frames.
pub const STOP_POLL_INTERVAL: Duration = Duration::from_millis(10);

// =============================================================================
// Size Limits
// =============================================================================

/// Maximum allowed frame payload in bytes (1 GiB).
pub const MAX_FRAME_BYTES: usize = 1024 * 1024 * 1024;
/// Maximum supported width/height for frames.
pub const MAX_FRAME_DIMENSION: u32 = 65_536;
/// Default circular buffer footprint in megabytes.
pub const DEFAULT_BUFFER_FOOTPRINT_MB: u64 = 250;

/// Validated frame sizing information.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameSize {
    /// Pixel count.
    pub pixels: usize,
    /// Byte count.
    pub bytes: usize,
}

/// Validate frame dimensions and calculate pixel/byte sizes safely.
pub fn validate_frame_size(
    width: u32,
    height: u32,
    bytes_per_pixel: usize,
) -> Result<FrameSize, CoreError> {
    if width == 0 || height == 0 {
        return Err(CoreError::InvalidArgument(format!(
            "frame dimensions {width}x{height} must be non-zero"
        )));
    }
    if width > MAX_FRAME_DIMENSION || height > MAX_FRAME_DIMENSION {
        return Err(CoreError::InvalidArgument(format!(
            "frame dimensions {width}x{height} exceed maximum {MAX_FRAME_DIMENSION} per dimension"
        )));
    }

    let pixels = (width as usize)
        .checked_mul(height as usize)
        .ok_or_else(|| CoreError::InvalidArgument("frame pixel count overflows".into()))?;

    let bytes = pixels
        .checked_mul(bytes_per_pixel)
        .ok_or_else(|| CoreError::InvalidArgument("frame byte size overflows".into()))?;

    if bytes > MAX_FRAME_BYTES {
        return Err(CoreError::InvalidArgument(format!(
            "frame size {bytes} bytes exceeds maximum {MAX_FRAME_BYTES} bytes"
        )));
    }

    Ok(FrameSize { pixels, bytes })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_demo_frame_size() {
        let size = validate_frame_size(512, 512, 2).unwrap();
        assert_eq!(size.pixels, 262_144);
        assert_eq!(size.bytes, 524_288);
    }

    #[test]
    fn test_rejects_oversized_dimension() {
        assert!(validate_frame_size(MAX_FRAME_DIMENSION + 1, 1, 1).is_err());
    }

    #[test]
    fn test_rejects_zero_dimension() {
        assert!(validate_frame_size(0, 512, 2).is_err());
    }
}
