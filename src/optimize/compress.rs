/// Byte-budget compression
///
/// Encodes a bitmap at a shrinking quality factor until the output fits
/// the budget. The search is geometric (quality *= 0.8 per round) rather
/// than a bisection, so it only ever moves toward smaller files.
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::{CompressionType, FilterType as PngFilterType, PngEncoder};
use image::{ExtendedColorType, ImageEncoder};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ProcessingError;
use super::rasterize::Bitmap;

/// Quality used when none (or a nonsensical one) is configured
pub const DEFAULT_QUALITY: f32 = 0.9;

/// Lowest quality the search will try
pub const QUALITY_FLOOR: f32 = 0.1;

/// Factor applied to the quality after each miss
pub const QUALITY_STEP: f32 = 0.8;

/// Total encodes allowed per search, including the final floor encode
pub const MAX_ATTEMPTS: usize = 10;

/// Target encodings for processed photos
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Jpeg,
    Png,
    Webp,
}

impl OutputFormat {
    pub fn mime_type(&self) -> &'static str {
        match self {
            OutputFormat::Jpeg => "image/jpeg",
            OutputFormat::Png => "image/png",
            OutputFormat::Webp => "image/webp",
        }
    }

    /// File extension written for this format (`jpeg` becomes `jpg`)
    pub fn extension(&self) -> &'static str {
        match self {
            OutputFormat::Jpeg => "jpg",
            OutputFormat::Png => "png",
            OutputFormat::Webp => "webp",
        }
    }
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            OutputFormat::Jpeg => "jpeg",
            OutputFormat::Png => "png",
            OutputFormat::Webp => "webp",
        };
        f.write_str(name)
    }
}

/// Something that can turn a bitmap into bytes at a given quality in (0, 1]
pub trait QualityEncoder {
    fn mime_type(&self) -> &'static str;

    fn encode(&self, bitmap: &Bitmap, quality: f32) -> Result<Vec<u8>, ProcessingError>;
}

impl QualityEncoder for OutputFormat {
    fn mime_type(&self) -> &'static str {
        OutputFormat::mime_type(self)
    }

    fn encode(&self, bitmap: &Bitmap, quality: f32) -> Result<Vec<u8>, ProcessingError> {
        if bitmap.is_empty() {
            return Err(ProcessingError::Encoding(format!(
                "cannot encode a {} bitmap as {}",
                bitmap.dimensions(),
                self
            )));
        }

        match self {
            OutputFormat::Jpeg => encode_jpeg(bitmap, quality),
            OutputFormat::Png => encode_png(bitmap, quality),
            OutputFormat::Webp => encode_webp(bitmap, quality),
        }
    }
}

/// One encode in the search
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CompressionAttempt {
    pub quality: f32,
    pub size: u64,
}

/// The encoding the search settled on
#[derive(Debug, Clone)]
pub struct EncodedBlob {
    pub bytes: Vec<u8>,
    pub mime_type: &'static str,
    /// Quality of the returned encoding
    pub quality: f32,
    /// Every encode tried, in order
    pub attempts: Vec<CompressionAttempt>,
}

impl EncodedBlob {
    pub fn size(&self) -> u64 {
        self.bytes.len() as u64
    }
}

/// Encode `bitmap` at decreasing quality until it fits `target_bytes`
///
/// Stops as soon as an encode fits the budget or the quality reaches
/// `QUALITY_FLOOR`. If `MAX_ATTEMPTS - 1` encodes miss without hitting the
/// floor, the last attempt is made at the floor and returned whatever its
/// size. Only encoder failures are errors; missing the budget is not.
pub fn compress_to_target<E: QualityEncoder + ?Sized>(
    bitmap: &Bitmap,
    target_bytes: u64,
    encoder: &E,
    initial_quality: f32,
) -> Result<EncodedBlob, ProcessingError> {
    let mut quality = sanitize_quality(initial_quality);
    let mut attempts = Vec::with_capacity(MAX_ATTEMPTS);

    loop {
        let last_chance = attempts.len() + 1 >= MAX_ATTEMPTS;
        if last_chance && quality > QUALITY_FLOOR {
            quality = QUALITY_FLOOR;
        }

        let bytes = encoder.encode(bitmap, quality)?;
        let size = bytes.len() as u64;
        attempts.push(CompressionAttempt { quality, size });

        debug!(
            "   attempt {}: quality {:.3} -> {} bytes (budget {})",
            attempts.len(),
            quality,
            size,
            target_bytes
        );

        if size <= target_bytes || quality <= QUALITY_FLOOR || last_chance {
            return Ok(EncodedBlob {
                bytes,
                mime_type: encoder.mime_type(),
                quality,
                attempts,
            });
        }

        quality *= QUALITY_STEP;
    }
}

/// Clamp a configured quality into (0, 1]
pub fn sanitize_quality(quality: f32) -> f32 {
    if quality.is_nan() {
        DEFAULT_QUALITY
    } else {
        quality.clamp(0.01, 1.0)
    }
}

/// Map a (0, 1] quality to the 1-100 scale codecs use
fn percent(quality: f32) -> u8 {
    (quality * 100.0).round().clamp(1.0, 100.0) as u8
}

fn encode_jpeg(bitmap: &Bitmap, quality: f32) -> Result<Vec<u8>, ProcessingError> {
    // JPEG has no alpha channel
    let rgb = bitmap.to_rgb8();
    let mut buf = Vec::new();
    let mut encoder = JpegEncoder::new_with_quality(&mut buf, percent(quality));
    encoder
        .encode(rgb.as_raw(), rgb.width(), rgb.height(), ExtendedColorType::Rgb8)
        .map_err(|e| ProcessingError::Encoding(format!("jpeg: {}", e)))?;

    Ok(buf)
}

/// PNG is lossless, so quality only trades encode time for deflate effort
fn encode_png(bitmap: &Bitmap, quality: f32) -> Result<Vec<u8>, ProcessingError> {
    let compression = if quality > 0.66 {
        CompressionType::Fast
    } else if quality > 0.33 {
        CompressionType::Default
    } else {
        CompressionType::Best
    };

    let rgba = bitmap.to_rgba8();
    let mut buf = Vec::new();
    let encoder = PngEncoder::new_with_quality(&mut buf, compression, PngFilterType::Adaptive);
    encoder
        .write_image(rgba.as_raw(), rgba.width(), rgba.height(), ExtendedColorType::Rgba8)
        .map_err(|e| ProcessingError::Encoding(format!("png: {}", e)))?;

    Ok(buf)
}

fn encode_webp(bitmap: &Bitmap, quality: f32) -> Result<Vec<u8>, ProcessingError> {
    let rgba = bitmap.to_rgba8();
    let encoder = webp::Encoder::from_rgba(rgba.as_raw(), rgba.width(), rgba.height());
    let memory = encoder
        .encode_simple(false, percent(quality) as f32)
        .map_err(|e| ProcessingError::Encoding(format!("webp: {:?}", e)))?;

    Ok(memory.to_vec())
}
