//! Test pattern generation for demo camera frames.
//!
//! Frames are rendered straight into the raw byte layout the camera reports:
//! little-endian elements, one per pixel for grayscale and four (B, G, R, A)
//! for RGB.

use crate::common::DemoRng;
use mmc_core::image::FrameGeometry;

/// Pattern drawn by the demo camera (`Mode` property).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatternMode {
    /// Diagonal sine waves that drift from frame to frame.
    ArtificialWaves,
    /// Uniform random noise over the full bit depth.
    Noise,
    /// Vertical bars (color) or a horizontal ramp (grayscale).
    ColorTestPattern,
}

impl PatternMode {
    /// Allowed `Mode` property values.
    pub const LABELS: [&'static str; 3] = ["Artificial Waves", "Noise", "Color Test Pattern"];

    /// Property value of this mode.
    pub fn label(&self) -> &'static str {
        match self {
            PatternMode::ArtificialWaves => Self::LABELS[0],
            PatternMode::Noise => Self::LABELS[1],
            PatternMode::ColorTestPattern => Self::LABELS[2],
        }
    }

    /// Mode for a property value.
    pub fn from_label(label: &str) -> Option<Self> {
        match label {
            "Artificial Waves" => Some(PatternMode::ArtificialWaves),
            "Noise" => Some(PatternMode::Noise),
            "Color Test Pattern" => Some(PatternMode::ColorTestPattern),
            _ => None,
        }
    }
}

// B, G, R per bar
const BARS: [[f64; 3]; 8] = [
    [1.0, 1.0, 1.0],
    [0.0, 1.0, 1.0],
    [1.0, 1.0, 0.0],
    [0.0, 1.0, 0.0],
    [1.0, 0.0, 1.0],
    [0.0, 0.0, 1.0],
    [1.0, 0.0, 0.0],
    [0.0, 0.0, 0.0],
];

/// Renders frame number `frame` of `mode`.
///
/// `bit_depth` bounds every element; the alpha component of RGB pixels is
/// always the maximum value.
pub fn render(
    mode: PatternMode,
    geometry: &FrameGeometry,
    bit_depth: u32,
    frame: u64,
    rng: &DemoRng,
) -> Vec<u8> {
    let components = geometry.components.max(1) as usize;
    let element_bytes = (geometry.bytes_per_pixel as usize / components).max(1);
    let max_value = max_for(bit_depth, element_bytes);
    let (w, h) = (geometry.width as usize, geometry.height as usize);
    let mut out = Vec::with_capacity(w * h * geometry.bytes_per_pixel as usize);

    let phase = frame as f64 * 0.25;
    let period = (w.max(h) as f64 / 4.0).max(1.0);

    for y in 0..h {
        for x in 0..w {
            for c in 0..components {
                let value = if components == 4 && c == 3 {
                    max_value
                } else {
                    match mode {
                        PatternMode::Noise => rng.below_or_equal(max_value),
                        PatternMode::ArtificialWaves => {
                            let shift = c as f64 * std::f64::consts::FRAC_PI_3;
                            let s = ((x + y) as f64 / period + phase + shift).sin();
                            scale(0.5 + 0.5 * s, max_value)
                        }
                        PatternMode::ColorTestPattern if components == 4 => {
                            let bar = (x * BARS.len() / w.max(1)).min(BARS.len() - 1);
                            scale(BARS[bar][c], max_value)
                        }
                        PatternMode::ColorTestPattern => scale(x as f64 / (w.max(2) - 1) as f64, max_value),
                    }
                };
                out.extend_from_slice(&value.to_le_bytes()[..element_bytes]);
            }
        }
    }
    out
}

fn max_for(bit_depth: u32, element_bytes: usize) -> u64 {
    let bits = bit_depth.clamp(1, (element_bytes * 8) as u32).min(63);
    (1u64 << bits) - 1
}

fn scale(fraction: f64, max_value: u64) -> u64 {
    (fraction.clamp(0.0, 1.0) * max_value as f64).round() as u64
}
