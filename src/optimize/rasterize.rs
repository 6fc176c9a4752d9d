/// Off-screen rasterization at a target size
use image::{imageops::FilterType, DynamicImage, RgbImage, RgbaImage};

use crate::error::ProcessingError;
use super::dimensions::Dimensions;

/// Largest surface we allocate (RGBA8, so 4 bytes per pixel: 400MB)
pub const MAX_SURFACE_PIXELS: u64 = 100_000_000;

/// A decoded, resized image ready to be encoded
#[derive(Debug, Clone)]
pub struct Bitmap {
    image: DynamicImage,
}

impl Bitmap {
    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn dimensions(&self) -> Dimensions {
        Dimensions::new(self.width(), self.height())
    }

    /// True when there is nothing to encode
    pub fn is_empty(&self) -> bool {
        self.width() == 0 || self.height() == 0
    }

    pub fn to_rgb8(&self) -> RgbImage {
        self.image.to_rgb8()
    }

    pub fn to_rgba8(&self) -> RgbaImage {
        self.image.to_rgba8()
    }
}

impl From<DynamicImage> for Bitmap {
    fn from(image: DynamicImage) -> Self {
        Self { image }
    }
}

/// Draw `decoded` into a fresh surface of exactly `width` x `height`
///
/// The image is stretched to fill the surface (no cropping, no
/// letterboxing). Callers plan the size with `compute_target_dimensions`
/// so the aspect ratio is already preserved.
pub fn rasterize(decoded: &DynamicImage, width: u32, height: u32) -> Result<Bitmap, ProcessingError> {
    if width == 0 || height == 0 {
        return Err(ProcessingError::Rasterization(format!(
            "cannot allocate a {}x{} surface",
            width, height
        )));
    }
    if decoded.width() == 0 || decoded.height() == 0 {
        return Err(ProcessingError::Rasterization(
            "source image has no pixels".to_string(),
        ));
    }

    let target = Dimensions::new(width, height);
    if target.area() > MAX_SURFACE_PIXELS {
        return Err(ProcessingError::Rasterization(format!(
            "{} surface exceeds the {} pixel limit",
            target, MAX_SURFACE_PIXELS
        )));
    }

    if decoded.width() == width && decoded.height() == height {
        return Ok(Bitmap::from(decoded.clone()));
    }

    let resized = decoded.resize_exact(width, height, filter_for(decoded, target));
    Ok(Bitmap::from(resized))
}

/// Pick a smoothing filter: Lanczos3 for heavy downscales, Catmull-Rom otherwise
fn filter_for(decoded: &DynamicImage, target: Dimensions) -> FilterType {
    let shrink_x = decoded.width() as f64 / target.width as f64;
    let shrink_y = decoded.height() as f64 / target.height as f64;

    if shrink_x.max(shrink_y) > 2.0 {
        FilterType::Lanczos3
    } else {
        FilterType::CatmullRom
    }
}
