//! Multi-format image encoder.
//!
//! This module re-encodes decoded pixels into one of the allow-listed
//! formats at a requested quality.
//!
//! # Codec Knobs
//!
//! - **JPEG**: quality 1-100, alpha is dropped, grayscale stays single-channel.
//! - **PNG**: lossless, quality is ignored, zlib effort comes from the
//!   configured compression level.
//! - **WebP**: lossy at the requested quality via libwebp.
//! - **AVIF**: quality 1-100 with the configured encoder speed.
//!
//! Quality is clamped to 1-100 before reaching any codec regardless of what
//! the caller passed.

use bytes::Bytes;
use image::codecs::avif::AvifEncoder;
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::{CompressionType, FilterType, PngEncoder};
use image::error::LimitErrorKind;
use image::{DynamicImage, ImageError};

use crate::error::TransformError;

use super::format::ImageFormat;

/// Default quality for resize and convert.
pub const DEFAULT_QUALITY: u8 = 80;

/// Default quality for compress.
pub const DEFAULT_COMPRESS_QUALITY: u8 = 70;

/// Minimum allowed quality.
pub const MIN_QUALITY: u8 = 1;

/// Maximum allowed quality.
pub const MAX_QUALITY: u8 = 100;

/// Default PNG compression level (0-9).
pub const DEFAULT_PNG_COMPRESSION: u8 = 6;

/// Default AVIF encoder speed (1 = slowest/best, 10 = fastest).
pub const DEFAULT_AVIF_SPEED: u8 = 6;

// =============================================================================
// Encoder
// =============================================================================

/// Encoder for the allow-listed output formats.
#[derive(Debug, Clone, Copy)]
pub struct FormatEncoder {
    png_compression: u8,
    avif_speed: u8,
}

impl Default for FormatEncoder {
    fn default() -> Self {
        Self::new(DEFAULT_PNG_COMPRESSION, DEFAULT_AVIF_SPEED)
    }
}

impl FormatEncoder {
    /// Create an encoder with explicit PNG compression level and AVIF speed.
    ///
    /// Out-of-range values are clamped (0-9 and 1-10 respectively).
    pub fn new(png_compression: u8, avif_speed: u8) -> Self {
        Self {
            png_compression: png_compression.min(9),
            avif_speed: avif_speed.clamp(1, 10),
        }
    }

    /// Encode an image into `format` at `quality`.
    ///
    /// # Errors
    ///
    /// Returns [`TransformError::InsufficientMemory`] when the codec hits its
    /// allocation limit and [`TransformError::Encode`] for any other failure.
    pub fn encode(
        &self,
        img: &DynamicImage,
        format: ImageFormat,
        quality: u8,
    ) -> Result<Bytes, TransformError> {
        let quality = clamp_quality(quality);
        let mut output = Vec::new();

        let result = match format {
            ImageFormat::Jpeg => {
                let encoder = JpegEncoder::new_with_quality(&mut output, quality);
                to_jpeg_compatible(img).write_with_encoder(encoder)
            }
            ImageFormat::Png => {
                let encoder = PngEncoder::new_with_quality(
                    &mut output,
                    self.png_compression_type(),
                    FilterType::Adaptive,
                );
                to_png_compatible(img).write_with_encoder(encoder)
            }
            ImageFormat::WebP => return encode_webp(img, quality),
            ImageFormat::Avif => {
                let encoder =
                    AvifEncoder::new_with_speed_quality(&mut output, self.avif_speed, quality);
                to_8bit(img).write_with_encoder(encoder)
            }
        };

        result.map_err(|e| map_encode_error(format, e))?;
        Ok(Bytes::from(output))
    }

    fn png_compression_type(&self) -> CompressionType {
        match self.png_compression {
            0..=3 => CompressionType::Fast,
            4..=6 => CompressionType::Default,
            _ => CompressionType::Best,
        }
    }
}

/// libwebp's lossy encoder; the `image` crate only writes lossless WebP.
fn encode_webp(img: &DynamicImage, quality: u8) -> Result<Bytes, TransformError> {
    let pixels = to_8bit(img);
    let (width, height) = (pixels.width(), pixels.height());
    let encoder = match &pixels {
        DynamicImage::ImageRgba8(rgba) => webp::Encoder::from_rgba(rgba.as_raw(), width, height),
        _ => webp::Encoder::from_rgb(pixels.as_bytes(), width, height),
    };

    let memory = encoder
        .encode_simple(false, f32::from(quality))
        .map_err(|e| TransformError::Encode {
            message: format!("webp encoder: {:?}", e),
        })?;
    Ok(Bytes::copy_from_slice(&memory))
}

fn map_encode_error(format: ImageFormat, err: ImageError) -> TransformError {
    match err {
        ImageError::Limits(limit) if matches!(limit.kind(), LimitErrorKind::InsufficientMemory) => {
            TransformError::InsufficientMemory {
                message: format!("{} encoder: {}", format, limit),
            }
        }
        other => TransformError::Encode {
            message: format!("{} encoder: {}", format, other),
        },
    }
}

// =============================================================================
// Color conversions
// =============================================================================

/// JPEG carries no alpha and only 8-bit luma or RGB.
fn to_jpeg_compatible(img: &DynamicImage) -> DynamicImage {
    match img {
        DynamicImage::ImageLuma8(_) | DynamicImage::ImageRgb8(_) => img.clone(),
        _ if !img.color().has_color() => DynamicImage::ImageLuma8(img.to_luma8()),
        _ => DynamicImage::ImageRgb8(img.to_rgb8()),
    }
}

/// PNG handles 8/16-bit layouts but not floats.
fn to_png_compatible(img: &DynamicImage) -> DynamicImage {
    match img {
        DynamicImage::ImageRgb32F(_) => DynamicImage::ImageRgb8(img.to_rgb8()),
        DynamicImage::ImageRgba32F(_) => DynamicImage::ImageRgba8(img.to_rgba8()),
        _ => img.clone(),
    }
}

/// WebP and AVIF encoders accept 8-bit RGB(A) only.
fn to_8bit(img: &DynamicImage) -> DynamicImage {
    match img {
        DynamicImage::ImageRgb8(_) | DynamicImage::ImageRgba8(_) => img.clone(),
        _ if img.color().has_alpha() => DynamicImage::ImageRgba8(img.to_rgba8()),
        _ => DynamicImage::ImageRgb8(img.to_rgb8()),
    }
}

// =============================================================================
// Utility Functions
// =============================================================================

/// Validate quality parameter.
///
/// Returns `true` if quality is in the valid range (1-100).
#[inline]
pub fn is_valid_quality(quality: u8) -> bool {
    (MIN_QUALITY..=MAX_QUALITY).contains(&quality)
}

/// Clamp quality to valid range.
///
/// Values below 1 become 1, values above 100 become 100.
#[inline]
pub fn clamp_quality(quality: u8) -> u8 {
    quality.clamp(MIN_QUALITY, MAX_QUALITY)
}

// =============================================================================
// Tests
// =============================================================================
