//! Image upload boundary: size limits and format sniffing.
//!
//! Uploads are checked before anything else runs. The format is taken from
//! the leading magic bytes; a declared format (from a `Content-Type` header
//! or a file extension) must agree with what the bytes say.

use std::fmt;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use thiserror::Error;

const MIB: usize = 1024 * 1024;

/// Image formats the recognizer accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    #[serde(alias = "jpg")]
    Jpeg,
    Png,
    Bmp,
}

impl ImageFormat {
    pub const ALL: [ImageFormat; 3] = [ImageFormat::Jpeg, ImageFormat::Png, ImageFormat::Bmp];

    pub fn from_extension(ext: &str) -> Option<Self> {
        let ext = ext.trim().trim_start_matches('.');
        match ext.to_ascii_lowercase().as_str() {
            "jpg" | "jpeg" => Some(ImageFormat::Jpeg),
            "png" => Some(ImageFormat::Png),
            "bmp" => Some(ImageFormat::Bmp),
            _ => None,
        }
    }

    /// Parse a MIME type, ignoring parameters such as `; charset=...`.
    pub fn from_mime(mime: &str) -> Option<Self> {
        let essence = mime.split(';').next().unwrap_or_default().trim();
        match essence.to_ascii_lowercase().as_str() {
            "image/jpeg" | "image/jpg" | "image/pjpeg" => Some(ImageFormat::Jpeg),
            "image/png" => Some(ImageFormat::Png),
            "image/bmp" | "image/x-bmp" | "image/x-ms-bmp" => Some(ImageFormat::Bmp),
            _ => None,
        }
    }

    pub fn mime(self) -> &'static str {
        match self {
            ImageFormat::Jpeg => "image/jpeg",
            ImageFormat::Png => "image/png",
            ImageFormat::Bmp => "image/bmp",
        }
    }

    pub fn extensions(self) -> &'static [&'static str] {
        match self {
            ImageFormat::Jpeg => &["jpg", "jpeg"],
            ImageFormat::Png => &["png"],
            ImageFormat::Bmp => &["bmp"],
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ImageFormat::Jpeg => "jpeg",
            ImageFormat::Png => "png",
            ImageFormat::Bmp => "bmp",
        }
    }

    /// Format named by the leading magic bytes, if it is one we know.
    pub fn sniff(bytes: &[u8]) -> Option<Self> {
        match image::guess_format(bytes).ok()? {
            image::ImageFormat::Jpeg => Some(ImageFormat::Jpeg),
            image::ImageFormat::Png => Some(ImageFormat::Png),
            image::ImageFormat::Bmp => Some(ImageFormat::Bmp),
            _ => None,
        }
    }
}

impl fmt::Display for ImageFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Raw image bytes plus the format the caller claims they are in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageUpload {
    pub bytes: Bytes,
    pub declared_format: Option<ImageFormat>,
}

impl ImageUpload {
    pub fn new(bytes: impl Into<Bytes>) -> Self {
        Self {
            bytes: bytes.into(),
            declared_format: None,
        }
    }

    pub fn with_declared_format(mut self, format: ImageFormat) -> Self {
        self.declared_format = Some(format);
        self
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Caller-side input problems. Nothing downstream runs when one is raised.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum InputError {
    #[error("image is empty")]
    EmptyImage,
    #[error("image is {size} bytes; the limit is {limit} bytes")]
    ImageTooLarge { size: usize, limit: usize },
    #[error("image format could not be determined from its contents")]
    UnrecognizedFormat,
    #[error("image format '{0}' is not supported")]
    UnsupportedFormat(ImageFormat),
    #[error("declared format '{declared}' does not match image contents ('{detected}')")]
    FormatMismatch {
        declared: ImageFormat,
        detected: ImageFormat,
    },
    #[error("declared content type '{0}' is not an image format")]
    UnknownContentType(String),
    #[error("invalid source id: {0}")]
    InvalidSource(String),
    #[error("invalid embedding: {0}")]
    InvalidEmbedding(String),
}

/// Upload limits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImagePolicy {
    #[serde(default = "ImagePolicy::default_max_image_bytes")]
    pub max_image_bytes: usize,
    #[serde(default = "ImagePolicy::default_supported_formats")]
    pub supported_formats: Vec<ImageFormat>,
}

impl Default for ImagePolicy {
    fn default() -> Self {
        Self {
            max_image_bytes: Self::default_max_image_bytes(),
            supported_formats: Self::default_supported_formats(),
        }
    }
}

impl ImagePolicy {
    pub(crate) fn default_max_image_bytes() -> usize {
        10 * MIB
    }

    pub(crate) fn default_supported_formats() -> Vec<ImageFormat> {
        ImageFormat::ALL.to_vec()
    }

    pub fn with_max_image_bytes(mut self, max_image_bytes: usize) -> Self {
        self.max_image_bytes = max_image_bytes;
        self
    }

    pub fn with_supported_formats(mut self, formats: impl IntoIterator<Item = ImageFormat>) -> Self {
        self.supported_formats = formats.into_iter().collect();
        self
    }

    pub fn supports(&self, format: ImageFormat) -> bool {
        self.supported_formats.contains(&format)
    }

    /// Check an upload and return the format its bytes are in.
    pub fn validate(&self, upload: &ImageUpload) -> Result<ImageFormat, InputError> {
        if upload.is_empty() {
            return Err(InputError::EmptyImage);
        }
        if upload.len() > self.max_image_bytes {
            return Err(InputError::ImageTooLarge {
                size: upload.len(),
                limit: self.max_image_bytes,
            });
        }
        let detected = ImageFormat::sniff(&upload.bytes).ok_or(InputError::UnrecognizedFormat)?;
        if let Some(declared) = upload.declared_format {
            if declared != detected {
                return Err(InputError::FormatMismatch { declared, detected });
            }
        }
        if !self.supports(detected) {
            return Err(InputError::UnsupportedFormat(detected));
        }
        Ok(detected)
    }

    /// Summary served to clients before they upload.
    pub fn describe(&self) -> FormatsInfo {
        let mut formats = self.supported_formats.clone();
        formats.sort();
        formats.dedup();
        FormatsInfo {
            supported_formats: formats
                .iter()
                .flat_map(|f| f.extensions().iter().map(|e| e.to_string()))
                .collect(),
            mime_types: formats.iter().map(|f| f.mime().to_string()).collect(),
            max_file_size: human_size(self.max_image_bytes),
            max_file_size_bytes: self.max_image_bytes,
        }
    }
}

/// Accepted extensions, MIME types and size limit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormatsInfo {
    pub supported_formats: Vec<String>,
    pub mime_types: Vec<String>,
    pub max_file_size: String,
    pub max_file_size_bytes: usize,
}

fn human_size(bytes: usize) -> String {
    if bytes >= MIB && bytes % MIB == 0 {
        format!("{}MB", bytes / MIB)
    } else if bytes >= 1024 && bytes % 1024 == 0 {
        format!("{}KB", bytes / 1024)
    } else {
        format!("{bytes}B")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PNG: &[u8] = &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0, 0, 0, 0];
    const JPEG: &[u8] = &[0xFF, 0xD8, 0xFF, 0xE0, 0, 0x10, b'J', b'F', b'I', b'F'];

    #[test]
    fn sniffs_magic_bytes() {
        assert_eq!(ImageFormat::sniff(PNG), Some(ImageFormat::Png));
        assert_eq!(ImageFormat::sniff(JPEG), Some(ImageFormat::Jpeg));
        assert_eq!(ImageFormat::sniff(b"BM\0\0\0\0\0\0\0\0"), Some(ImageFormat::Bmp));
        assert_eq!(ImageFormat::sniff(b"plain text"), None);
    }

    #[test]
    fn mime_and_extension_parsing() {
        assert_eq!(ImageFormat::from_mime("image/JPEG"), Some(ImageFormat::Jpeg));
        assert_eq!(
            ImageFormat::from_mime("image/png; charset=binary"),
            Some(ImageFormat::Png)
        );
        assert_eq!(ImageFormat::from_mime("application/json"), None);
        assert_eq!(ImageFormat::from_extension(".JPG"), Some(ImageFormat::Jpeg));
        assert_eq!(ImageFormat::from_extension("gif"), None);
    }

    #[test]
    fn accepts_matching_declared_format() {
        let upload = ImageUpload::new(PNG).with_declared_format(ImageFormat::Png);
        assert_eq!(
            ImagePolicy::default().validate(&upload),
            Ok(ImageFormat::Png)
        );
        assert_eq!(
            ImagePolicy::default().validate(&ImageUpload::new(JPEG)),
            Ok(ImageFormat::Jpeg)
        );
    }

    #[test]
    fn rejects_bad_uploads() {
        let policy = ImagePolicy::default().with_max_image_bytes(8);
        assert_eq!(
            policy.validate(&ImageUpload::new(Bytes::new())),
            Err(InputError::EmptyImage)
        );
        assert_eq!(
            policy.validate(&ImageUpload::new(PNG)),
            Err(InputError::ImageTooLarge {
                size: PNG.len(),
                limit: 8
            })
        );

        let policy = ImagePolicy::default();
        assert_eq!(
            policy.validate(&ImageUpload::new(&b"GIF89a......"[..])),
            Err(InputError::UnrecognizedFormat)
        );
        assert_eq!(
            policy.validate(&ImageUpload::new(PNG).with_declared_format(ImageFormat::Jpeg)),
            Err(InputError::FormatMismatch {
                declared: ImageFormat::Jpeg,
                detected: ImageFormat::Png
            })
        );
    }

    #[test]
    fn formats_outside_the_policy_are_unsupported() {
        let policy = ImagePolicy::default().with_supported_formats([ImageFormat::Jpeg]);
        assert_eq!(
            policy.validate(&ImageUpload::new(PNG)),
            Err(InputError::UnsupportedFormat(ImageFormat::Png))
        );
    }

    #[test]
    fn describe_lists_extensions_and_limit() {
        let info = ImagePolicy::default().describe();
        assert_eq!(info.supported_formats, vec!["jpg", "jpeg", "png", "bmp"]);
        assert_eq!(info.max_file_size, "10MB");
        assert_eq!(info.max_file_size_bytes, 10 * MIB);
    }
}
