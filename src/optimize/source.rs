/// Source file handles and decoding
use image::{DynamicImage, ImageReader, Limits};
use std::io::Cursor;
use std::path::Path;
use std::sync::Arc;

use crate::error::ProcessingError;
use super::dimensions::Dimensions;

/// Largest width or height we agree to decode (guards against decompression bombs)
pub const MAX_DECODE_DIMENSION: u32 = 20_000;

/// Media type used when the extension is unknown
pub const FALLBACK_MIME_TYPE: &str = "application/octet-stream";

/// Photo extensions the batch scanner picks up, with their media types
pub const SUPPORTED_EXTENSIONS: [(&str, &str); 8] = [
    ("jpg", "image/jpeg"),
    ("jpeg", "image/jpeg"),
    ("png", "image/png"),
    ("webp", "image/webp"),
    ("gif", "image/gif"),
    ("bmp", "image/bmp"),
    ("tif", "image/tiff"),
    ("tiff", "image/tiff"),
];

/// An immutable handle to an encoded file: its bytes, media type and name
///
/// The bytes sit behind an `Arc` so a handle can be cloned into a worker
/// task and still be returned untouched if that task fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceImage {
    name: String,
    mime_type: String,
    bytes: Arc<[u8]>,
}

impl SourceImage {
    pub fn new(
        name: impl Into<String>,
        mime_type: impl Into<String>,
        bytes: impl Into<Arc<[u8]>>,
    ) -> Self {
        Self {
            name: name.into(),
            mime_type: mime_type.into(),
            bytes: bytes.into(),
        }
    }

    /// Build a handle for bytes read from `path`, guessing the media type
    /// from the file extension
    pub fn from_path_bytes(path: &Path, bytes: Vec<u8>) -> Self {
        let name = path
            .file_name()
            .unwrap_or_default()
            .to_string_lossy()
            .to_string();
        let mime_type = path
            .extension()
            .and_then(|ext| mime_type_for_extension(&ext.to_string_lossy()))
            .unwrap_or(FALLBACK_MIME_TYPE);

        Self::new(name, mime_type, bytes)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Size of the encoded file in bytes
    pub fn size(&self) -> u64 {
        self.bytes.len() as u64
    }
}

/// Look up the media type for a file extension (case-insensitive)
pub fn mime_type_for_extension(extension: &str) -> Option<&'static str> {
    let ext = extension.to_lowercase();
    SUPPORTED_EXTENSIONS
        .iter()
        .find(|(candidate, _)| *candidate == ext)
        .map(|(_, mime)| *mime)
}

/// Decode the source bytes into pixels
///
/// The format is sniffed from the content, not from the declared media
/// type, since browsers and cameras both mislabel files. The in-memory
/// reader is dropped when this returns, on success and on failure alike.
pub fn decode(source: &SourceImage) -> Result<DynamicImage, ProcessingError> {
    let mut reader = ImageReader::new(Cursor::new(source.bytes()))
        .with_guessed_format()
        .map_err(|e| ProcessingError::Decode(e.to_string()))?;

    if reader.format().is_none() {
        return Err(ProcessingError::Decode(format!(
            "unrecognized image data in {} ({})",
            source.name(),
            source.mime_type()
        )));
    }

    let mut limits = Limits::default();
    limits.max_image_width = Some(MAX_DECODE_DIMENSION);
    limits.max_image_height = Some(MAX_DECODE_DIMENSION);
    reader.limits(limits);

    reader
        .decode()
        .map_err(|e| ProcessingError::Decode(e.to_string()))
}

/// Natural dimensions of a decoded image
pub fn natural_dimensions(image: &DynamicImage) -> Dimensions {
    Dimensions::new(image.width(), image.height())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::ImageFormat;

    fn create_test_png(width: u32, height: u32) -> Vec<u8> {
        let img = DynamicImage::new_rgb8(width, height);
        let mut buf = Cursor::new(Vec::new());
        img.write_to(&mut buf, ImageFormat::Png).unwrap();
        buf.into_inner()
    }

    #[test]
    fn test_from_path_bytes_guesses_mime() {
        let source = SourceImage::from_path_bytes(Path::new("/shoot/DSC_0001.JPG"), vec![1, 2, 3]);
        assert_eq!(source.name(), "DSC_0001.JPG");
        assert_eq!(source.mime_type(), "image/jpeg");
        assert_eq!(source.size(), 3);

        let source = SourceImage::from_path_bytes(Path::new("notes.txt"), Vec::new());
        assert_eq!(source.mime_type(), FALLBACK_MIME_TYPE);
    }

    #[test]
    fn test_decode_valid_png() {
        let source = SourceImage::new("tiny.png", "image/png", create_test_png(40, 30));
        let img = decode(&source).unwrap();
        assert_eq!(natural_dimensions(&img), Dimensions::new(40, 30));
    }

    #[test]
    fn test_decode_ignores_wrong_declared_mime() {
        let source = SourceImage::new("mislabelled.jpg", "image/jpeg", create_test_png(8, 8));
        assert!(decode(&source).is_ok());
    }

    #[test]
    fn test_decode_garbage_fails() {
        let source = SourceImage::new("broken.jpg", "image/jpeg", b"definitely not pixels".to_vec());
        let err = decode(&source).unwrap_err();
        assert!(matches!(err, ProcessingError::Decode(_)));
    }

    #[test]
    fn test_decode_truncated_png_fails() {
        let mut data = create_test_png(64, 64);
        data.truncate(data.len() / 2);
        let source = SourceImage::new("cut.png", "image/png", data);
        assert!(matches!(decode(&source), Err(ProcessingError::Decode(_))));
    }
}
