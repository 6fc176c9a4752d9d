/// Adaptive image optimization module
///
/// This module handles:
/// - Planning output dimensions that fit the configured bounds
/// - Decoding source files and rasterizing them at the target size
/// - Re-encoding under a byte budget with a shrinking quality factor
/// - Orchestrating the above with a fail-open fallback

pub mod dimensions;
pub mod source;
pub mod rasterize;
pub mod compress;
pub mod processor;

pub use compress::OutputFormat;
pub use processor::{process, ProcessingOptions, ProcessingStatus};
pub use source::SourceImage;
