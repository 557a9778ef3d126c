//! Allow-listed image formats.
//!
//! The service accepts and produces exactly four formats. Everything the
//! HTTP layer and the engine know about a format (MIME type, wire name,
//! codec identifier) lives here so that the allow-list has a single source.

use image::ImageFormat as CodecFormat;

/// MIME types accepted by the upload validator.
pub const ALLOWED_MIME_TYPES: &[&str] = &["image/jpeg", "image/png", "image/webp", "image/avif"];

/// An allow-listed image format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImageFormat {
    Jpeg,
    Png,
    WebP,
    Avif,
}

impl ImageFormat {
    /// Every allow-listed format, in a stable order.
    pub const ALL: [ImageFormat; 4] = [
        ImageFormat::Jpeg,
        ImageFormat::Png,
        ImageFormat::WebP,
        ImageFormat::Avif,
    ];

    /// Parse a wire value such as `"jpeg"`, `"JPG"` or `"webp"`.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "jpeg" | "jpg" => Some(ImageFormat::Jpeg),
            "png" => Some(ImageFormat::Png),
            "webp" => Some(ImageFormat::WebP),
            "avif" => Some(ImageFormat::Avif),
            _ => None,
        }
    }

    /// Look up a format by declared MIME type.
    pub fn from_mime(mime: &str) -> Option<Self> {
        match mime {
            "image/jpeg" => Some(ImageFormat::Jpeg),
            "image/png" => Some(ImageFormat::Png),
            "image/webp" => Some(ImageFormat::WebP),
            "image/avif" => Some(ImageFormat::Avif),
            _ => None,
        }
    }

    /// Map a format detected by the codec layer onto the allow-list.
    pub fn from_codec(format: CodecFormat) -> Option<Self> {
        match format {
            CodecFormat::Jpeg => Some(ImageFormat::Jpeg),
            CodecFormat::Png => Some(ImageFormat::Png),
            CodecFormat::WebP => Some(ImageFormat::WebP),
            CodecFormat::Avif => Some(ImageFormat::Avif),
            _ => None,
        }
    }

    /// The codec-layer identifier for this format.
    pub const fn codec(&self) -> CodecFormat {
        match self {
            ImageFormat::Jpeg => CodecFormat::Jpeg,
            ImageFormat::Png => CodecFormat::Png,
            ImageFormat::WebP => CodecFormat::WebP,
            ImageFormat::Avif => CodecFormat::Avif,
        }
    }

    /// `Content-Type` for responses in this format.
    pub const fn content_type(&self) -> &'static str {
        match self {
            ImageFormat::Jpeg => "image/jpeg",
            ImageFormat::Png => "image/png",
            ImageFormat::WebP => "image/webp",
            ImageFormat::Avif => "image/avif",
        }
    }

    /// Short lowercase name, as reported by the metadata operation.
    pub const fn name(&self) -> &'static str {
        match self {
            ImageFormat::Jpeg => "jpeg",
            ImageFormat::Png => "png",
            ImageFormat::WebP => "webp",
            ImageFormat::Avif => "avif",
        }
    }

    /// Whether this build can decode the format's pixels.
    ///
    /// AVIF pixels need the system dav1d library, enabled with the
    /// `avif-decode` feature. AVIF headers are always readable.
    pub const fn can_decode(&self) -> bool {
        !matches!(self, ImageFormat::Avif) || cfg!(feature = "avif-decode")
    }
}

impl std::fmt::Display for ImageFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}
