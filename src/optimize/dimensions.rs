/// Output size planning
///
/// Fits an image inside a width/height box while keeping its aspect ratio.
use serde::{Deserialize, Serialize};

/// Pixel dimensions of an image (both sides are always at least 1)
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

impl Dimensions {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Total pixel count
    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }
}

impl std::fmt::Display for Dimensions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Compute the largest size that fits inside `max_width` x `max_height`
///
/// A single scale factor `min(max_w / w, max_h / h, 1)` is applied to both
/// sides, so both bounds hold at once and images are never upscaled.
/// Sides are rounded to the nearest pixel and never drop below 1.
pub fn compute_target_dimensions(
    natural_width: u32,
    natural_height: u32,
    max_width: u32,
    max_height: u32,
) -> Dimensions {
    // Degenerate input is treated as a 1px side instead of dividing by zero
    let natural_width = natural_width.max(1) as f64;
    let natural_height = natural_height.max(1) as f64;
    let max_width = max_width.max(1) as f64;
    let max_height = max_height.max(1) as f64;

    let scale = (max_width / natural_width)
        .min(max_height / natural_height)
        .min(1.0);

    let width = ((natural_width * scale).round() as u32).max(1);
    let height = ((natural_height * scale).round() as u32).max(1);

    Dimensions { width, height }
}
