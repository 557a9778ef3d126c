//! Bounded decoding.
//!
//! Every decode goes through [`DecodeLimits`] so a small upload cannot claim
//! a huge pixel buffer. Format detection looks at the bytes, never at the
//! declared MIME type.

use std::io::Cursor;

use image::error::LimitErrorKind;
use image::{DynamicImage, ImageError, ImageReader, Limits};

use crate::error::TransformError;

use super::format::ImageFormat;
use super::params::DEFAULT_MAX_DIMENSION;

/// Default decoder allocation ceiling (512 MiB).
pub const DEFAULT_MAX_DECODE_BYTES: u64 = 512 * 1024 * 1024;

/// Bounds applied to every decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodeLimits {
    pub max_dimension: u32,
    pub max_alloc: u64,
}

impl Default for DecodeLimits {
    fn default() -> Self {
        Self {
            max_dimension: DEFAULT_MAX_DIMENSION,
            max_alloc: DEFAULT_MAX_DECODE_BYTES,
        }
    }
}

impl DecodeLimits {
    fn codec_limits(&self) -> Limits {
        let mut limits = Limits::default();
        limits.max_image_width = Some(self.max_dimension);
        limits.max_image_height = Some(self.max_dimension);
        limits.max_alloc = Some(self.max_alloc);
        limits
    }
}

/// Open a reader over `bytes` with its format detected and limits applied.
///
/// Fails with [`TransformError::UnsupportedImageFormat`] when the bytes are
/// not one of the allow-listed formats. The format may still be one this
/// build cannot decode pixels for; see [`open_reader`].
pub fn detect<'a>(
    bytes: &'a [u8],
    limits: &DecodeLimits,
) -> Result<(ImageReader<Cursor<&'a [u8]>>, ImageFormat), TransformError> {
    let mut reader = ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(|e| TransformError::InvalidImageData {
            message: e.to_string(),
        })?;

    let detected = reader
        .format()
        .ok_or_else(|| TransformError::UnsupportedImageFormat {
            reason: "could not detect image format".to_string(),
        })?;

    let format =
        ImageFormat::from_codec(detected).ok_or_else(|| TransformError::UnsupportedImageFormat {
            reason: format!("{:?} is not an accepted format", detected),
        })?;

    reader.limits(limits.codec_limits());
    Ok((reader, format))
}

/// [`detect`], additionally failing when this build has no pixel decoder for
/// the format.
pub fn open_reader<'a>(
    bytes: &'a [u8],
    limits: &DecodeLimits,
) -> Result<(ImageReader<Cursor<&'a [u8]>>, ImageFormat), TransformError> {
    let (reader, format) = detect(bytes, limits)?;
    if !format.can_decode() {
        return Err(TransformError::UnsupportedImageFormat {
            reason: format!("{} input cannot be decoded by this build", format),
        });
    }
    Ok((reader, format))
}

/// Decode `bytes` into pixels, returning the detected source format too.
pub fn decode(
    bytes: &[u8],
    limits: &DecodeLimits,
) -> Result<(DynamicImage, ImageFormat), TransformError> {
    let (reader, format) = open_reader(bytes, limits)?;
    let image = reader.decode().map_err(map_decode_error)?;
    Ok((image, format))
}

/// Map a codec failure onto the transform taxonomy.
pub fn map_decode_error(err: ImageError) -> TransformError {
    match err {
        ImageError::Limits(limit) => match limit.kind() {
            LimitErrorKind::DimensionError => TransformError::InvalidDimensions {
                message: format!("image exceeds decode limits: {}", limit),
            },
            LimitErrorKind::InsufficientMemory => TransformError::InsufficientMemory {
                message: limit.to_string(),
            },
            _ => TransformError::InvalidImageData {
                message: limit.to_string(),
            },
        },
        ImageError::Unsupported(e) => TransformError::UnsupportedImageFormat {
            reason: e.to_string(),
        },
        other => TransformError::InvalidImageData {
            message: other.to_string(),
        },
    }
}
