//! Black & white film look applied when a flow's photos are developed

use serde::{Deserialize, Serialize};

use super::frame::Frame;

/// Grayscale with a warm tint and boosted contrast
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilmFilter {
    /// Added to the red channel after grayscale conversion
    pub red_lift: f64,
    /// Added to the green channel after grayscale conversion
    pub green_lift: f64,
    /// Contrast factor around mid-gray
    pub contrast: f64,
}

impl Default for FilmFilter {
    fn default() -> Self {
        Self {
            red_lift: 20.0,
            green_lift: 10.0,
            contrast: 1.2,
        }
    }
}

impl FilmFilter {
    /// Transform a single RGBA pixel
    pub fn apply_pixel(&self, [r, g, b, a]: [u8; 4]) -> [u8; 4] {
        let gray = r as f64 * 0.3 + g as f64 * 0.59 + b as f64 * 0.11;

        // Each step lands in an 8-bit channel, so clamp between them
        let toned = [
            clamp_channel(gray + self.red_lift),
            clamp_channel(gray + self.green_lift),
            clamp_channel(gray),
        ];

        let [r, g, b] = toned.map(|c| clamp_channel((c as f64 - 128.0) * self.contrast + 128.0));
        [r, g, b, a]
    }

    /// Filtered copy of `frame`
    pub fn apply(&self, frame: &Frame) -> Frame {
        frame.map_pixels(|px| self.apply_pixel(px))
    }
}

/// Store into an 8-bit channel: clamp, then round half to even
fn clamp_channel(value: f64) -> u8 {
    value.clamp(0.0, 255.0).round_ties_even() as u8
}
