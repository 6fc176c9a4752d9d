/// Error taxonomy for the image processing pipeline
///
/// None of these ever reach the caller of `optimize::process`: the
/// orchestrator catches them and hands back the original file instead.
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProcessingError {
    /// Source bytes could not be interpreted as an image
    #[error("Image decode failed: {0}")]
    Decode(String),

    /// The drawing surface could not be allocated or drawn into
    #[error("Rasterization failed: {0}")]
    Rasterization(String),

    /// The encoder refused to produce output
    #[error("Image encoding failed: {0}")]
    Encoding(String),
}

impl ProcessingError {
    /// Short machine-friendly label used in reports
    pub fn kind(&self) -> &'static str {
        match self {
            ProcessingError::Decode(_) => "decode",
            ProcessingError::Rasterization(_) => "rasterization",
            ProcessingError::Encoding(_) => "encoding",
        }
    }
}
