/// Adaptive image processor
///
/// Ties the pipeline together: skip files already under budget, otherwise
/// decode, plan dimensions, rasterize, compress and rename. Any failure
/// along the way hands back the original file, so processing never blocks
/// an upload.
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::atomic::{AtomicI64, Ordering};
use tracing::{debug, info, warn};

use crate::error::ProcessingError;
use super::compress::{compress_to_target, OutputFormat, DEFAULT_QUALITY};
use super::dimensions::{compute_target_dimensions, Dimensions};
use super::rasterize::rasterize;
use super::source::{self, SourceImage};

/// Default byte budget: 10MB
pub const DEFAULT_MAX_SIZE_BYTES: u64 = 10 * 1024 * 1024;

/// Default bounding box for output dimensions
pub const DEFAULT_MAX_DIMENSION: u32 = 4000;

/// Marker inserted between the original stem and the timestamp
const OUTPUT_MARKER: &str = "_optimized_";

/// Last timestamp handed out for an output name
static LAST_STAMP: AtomicI64 = AtomicI64::new(0);

/// Knobs for a processing run
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
#[serde(default)]
pub struct ProcessingOptions {
    /// Files at or under this size are passed through untouched
    pub max_size_bytes: u64,
    pub max_width: u32,
    pub max_height: u32,
    /// Starting quality in (0, 1]
    pub quality: f32,
    pub format: OutputFormat,
}

impl Default for ProcessingOptions {
    fn default() -> Self {
        Self {
            max_size_bytes: DEFAULT_MAX_SIZE_BYTES,
            max_width: DEFAULT_MAX_DIMENSION,
            max_height: DEFAULT_MAX_DIMENSION,
            quality: DEFAULT_QUALITY,
            format: OutputFormat::Jpeg,
        }
    }
}

impl ProcessingOptions {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Parse from JSON; missing fields keep their defaults
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

/// What happened to a file
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingStatus {
    /// Already under budget, returned as-is
    PassThrough,
    /// Re-encoded
    Optimized,
    /// Processing failed, original returned
    Fallback,
}

/// Output of `process`: always carries a usable file
#[derive(Debug, Clone)]
pub struct ProcessingResult {
    pub file: SourceImage,
    pub original_size: u64,
    pub processed_size: u64,
    /// `processed_size / original_size`
    pub compression_ratio: f64,
    pub status: ProcessingStatus,
    /// Output dimensions when the file was re-encoded
    pub dimensions: Option<Dimensions>,
    /// Why the original was kept, for `Fallback`
    pub error: Option<String>,
}

impl ProcessingResult {
    fn unchanged(file: SourceImage, status: ProcessingStatus, error: Option<String>) -> Self {
        let size = file.size();
        Self {
            file,
            original_size: size,
            processed_size: size,
            compression_ratio: 1.0,
            status,
            dimensions: None,
            error,
        }
    }
}

/// Process one file on the blocking pool
///
/// Never fails: if the worker dies the original file comes back as a
/// `Fallback` result.
pub async fn process(file: SourceImage, options: ProcessingOptions) -> ProcessingResult {
    // Cheap clone (shared bytes) kept for the panic path
    let original = file.clone();

    match tokio::task::spawn_blocking(move || process_blocking(&file, &options)).await {
        Ok(result) => result,
        Err(e) => {
            warn!("⚠️  Worker for {} did not finish: {}", original.name(), e);
            ProcessingResult::unchanged(
                original,
                ProcessingStatus::Fallback,
                Some(format!("worker task failed: {}", e)),
            )
        }
    }
}

/// Synchronous version of `process` for callers already off the async runtime
pub fn process_blocking(file: &SourceImage, options: &ProcessingOptions) -> ProcessingResult {
    if file.size() <= options.max_size_bytes {
        return pass_through(file.clone(), options);
    }

    match optimize(file, options) {
        Ok(result) => result,
        Err(e) => {
            warn!("⚠️  Keeping original {} ({} failure): {}", file.name(), e.kind(), e);
            ProcessingResult::unchanged(file.clone(), ProcessingStatus::Fallback, Some(e.to_string()))
        }
    }
}

fn pass_through(file: SourceImage, options: &ProcessingOptions) -> ProcessingResult {
    debug!(
        "⏭️  {} is {} bytes, within the {} byte budget",
        file.name(),
        file.size(),
        options.max_size_bytes
    );
    ProcessingResult::unchanged(file, ProcessingStatus::PassThrough, None)
}

/// The fallible pipeline behind `process`
fn optimize(file: &SourceImage, options: &ProcessingOptions) -> Result<ProcessingResult, ProcessingError> {
    let decoded = source::decode(file)?;
    let natural = source::natural_dimensions(&decoded);

    let target = compute_target_dimensions(
        natural.width,
        natural.height,
        options.max_width,
        options.max_height,
    );
    debug!("📐 {}: {} -> {}", file.name(), natural, target);

    let bitmap = rasterize(&decoded, target.width, target.height)?;
    drop(decoded);

    let blob = compress_to_target(&bitmap, options.max_size_bytes, &options.format, options.quality)?;

    let search: Vec<_> = blob.attempts.iter().map(|a| (a.quality, a.size)).collect();
    debug!("   quality search for {}: {:?}", file.name(), search);

    let original_size = file.size();
    let processed_size = blob.size();
    let name = output_file_name(file.name(), options.format, next_stamp());

    info!(
        "✅ {} -> {} ({} -> {} bytes, {}, quality {:.2} after {} attempts)",
        file.name(),
        name,
        original_size,
        processed_size,
        target,
        blob.quality,
        blob.attempts.len()
    );

    Ok(ProcessingResult {
        file: SourceImage::new(name, blob.mime_type, blob.bytes),
        original_size,
        processed_size,
        compression_ratio: ratio(processed_size, original_size),
        status: ProcessingStatus::Optimized,
        dimensions: Some(target),
        error: None,
    })
}

/// `<stem>_optimized_<stamp>.<ext>`, dropping the original extension
pub fn output_file_name(original: &str, format: OutputFormat, stamp: i64) -> String {
    let stem = Path::new(original)
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "image".to_string());

    format!("{}{}{}.{}", stem, OUTPUT_MARKER, stamp, format.extension())
}

/// Millisecond timestamp, bumped so that no two calls return the same value
fn next_stamp() -> i64 {
    let now = Utc::now().timestamp_millis();
    let previous = LAST_STAMP
        .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |last| Some(now.max(last + 1)))
        .unwrap_or(now);
    now.max(previous + 1)
}

fn ratio(processed: u64, original: u64) -> f64 {
    if original == 0 {
        1.0
    } else {
        processed as f64 / original as f64
    }
}
