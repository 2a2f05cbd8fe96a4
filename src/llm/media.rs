use std::io::Cursor;
use std::path::Path;
use std::sync::Arc;

use base64::{engine::general_purpose, Engine as _};
use image::ImageReader;
use tracing::{debug, warn};

pub const SUPPORTED_IMAGE_MIME_TYPES: [&str; 3] = ["image/png", "image/jpeg", "image/webp"];

#[derive(Debug, thiserror::Error)]
pub enum ImageInputError {
    #[error("failed to read image {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("image is empty")]
    Empty,
    #[error("unsupported image type {0}; expected PNG, JPEG or WEBP")]
    Unsupported(String),
}

pub fn detect_mime_type(data: &[u8]) -> Option<String> {
    infer::get(data).map(|kind| kind.mime_type().to_string())
}

pub fn normalize_image_mime_type(mime_type: &str) -> String {
    let lowered = mime_type.trim().to_ascii_lowercase();
    match lowered.as_str() {
        "image/jpg" | "image/pjpeg" => "image/jpeg".to_string(),
        "image/x-png" => "image/png".to_string(),
        _ => lowered,
    }
}

fn is_supported(mime_type: &str) -> bool {
    SUPPORTED_IMAGE_MIME_TYPES.contains(&mime_type)
}

/// An image accepted at the input boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageUpload {
    pub bytes: Arc<[u8]>,
    pub mime_type: String,
    pub dimensions: Option<(u32, u32)>,
    pub display_name: Option<String>,
}

impl ImageUpload {
    /// Validates raw bytes. The type comes from the content alone.
    pub fn from_bytes(
        bytes: Vec<u8>,
        display_name: Option<String>,
    ) -> Result<Self, ImageInputError> {
        if bytes.is_empty() {
            return Err(ImageInputError::Empty);
        }

        let mime_type = detect_mime_type(&bytes)
            .map(|value| normalize_image_mime_type(&value))
            .unwrap_or_else(|| "application/octet-stream".to_string());
        if !is_supported(&mime_type) {
            return Err(ImageInputError::Unsupported(mime_type));
        }

        let dimensions = read_dimensions(&bytes);
        if dimensions.is_none() {
            warn!(
                "Could not read dimensions for {} ({} bytes)",
                display_name.as_deref().unwrap_or("image"),
                bytes.len()
            );
        }

        Ok(Self {
            bytes: Arc::from(bytes),
            mime_type,
            dimensions,
            display_name,
        })
    }

    pub async fn from_path(path: &Path) -> Result<Self, ImageInputError> {
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|source| ImageInputError::Read {
                path: path.display().to_string(),
                source,
            })?;
        let display_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned());
        debug!("Read {} bytes from {}", bytes.len(), path.display());
        Self::from_bytes(bytes, display_name)
    }

    pub fn base64_data(&self) -> String {
        general_purpose::STANDARD.encode(&self.bytes)
    }

    /// Displayable reference to the image; built fresh on every call.
    pub fn data_url(&self) -> String {
        format!("data:{};base64,{}", self.mime_type, self.base64_data())
    }

    pub fn describe(&self) -> String {
        let name = self.display_name.as_deref().unwrap_or("image");
        match self.dimensions {
            Some((width, height)) => {
                format!("{name} ({}, {width}x{height}, {} bytes)", self.mime_type, self.bytes.len())
            }
            None => format!("{name} ({}, {} bytes)", self.mime_type, self.bytes.len()),
        }
    }
}

fn read_dimensions(bytes: &[u8]) -> Option<(u32, u32)> {
    ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .ok()?
        .into_dimensions()
        .ok()
}

#[cfg(test)]
pub(crate) fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    let image = image::DynamicImage::ImageRgb8(image::RgbImage::new(width, height));
    let mut buffer = Cursor::new(Vec::new());
    image
        .write_to(&mut buffer, image::ImageFormat::Png)
        .expect("encode png");
    buffer.into_inner()
}
