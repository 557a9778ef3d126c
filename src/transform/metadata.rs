//! Header-only image inspection.
//!
//! Dimensions, color layout and ICC presence come from the decoder's header
//! pass; no pixel data is decoded. Density is read directly from the
//! container:
//!
//! - **PNG**: the `pHYs` chunk, when its unit is meters.
//! - **JPEG**: the JFIF `APP0` segment, in dots per inch or per centimeter.
//!
//! Anything else reports [`DEFAULT_DENSITY`]. AVIF is read from its container
//! boxes alone, so it does not need a pixel decoder.

use image::{ColorType, ImageDecoder};
use serde::Serialize;

use crate::error::TransformError;

use super::avif;
use super::decode::{detect, map_decode_error, DecodeLimits};
use super::format::ImageFormat;

/// Density reported when the container carries none.
pub const DEFAULT_DENSITY: u32 = 72;

// =============================================================================
// Markers
// =============================================================================

const PNG_SIGNATURE: [u8; 8] = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];

/// Start Of Image marker
const SOI: [u8; 2] = [0xFF, 0xD8];

/// Start Of Scan marker
const SOS: u8 = 0xDA;

/// Application segment 0 (JFIF) marker
const APP0: u8 = 0xE0;

// =============================================================================
// Metadata
// =============================================================================

/// Facts about an uploaded image.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageMetadata {
    pub width: u32,
    pub height: u32,
    pub format: &'static str,
    pub size: usize,
    pub channels: u8,
    pub has_alpha: bool,
    pub colorspace: &'static str,
    pub density: u32,
    pub has_profile: bool,
}

/// Inspect `bytes` without decoding pixels.
pub fn inspect(bytes: &[u8], limits: &DecodeLimits) -> Result<ImageMetadata, TransformError> {
    let (reader, format) = detect(bytes, limits)?;
    if format == ImageFormat::Avif {
        return inspect_avif(bytes, limits);
    }
    let mut decoder = reader.into_decoder().map_err(map_decode_error)?;

    let (width, height) = decoder.dimensions();
    let color = decoder.color_type();
    let has_profile = decoder
        .icc_profile()
        .map_err(map_decode_error)?
        .is_some_and(|profile| !profile.is_empty());

    Ok(ImageMetadata {
        width,
        height,
        format: format.name(),
        size: bytes.len(),
        channels: color.channel_count(),
        has_alpha: color.has_alpha(),
        colorspace: colorspace(color),
        density: read_density(bytes, format).unwrap_or(DEFAULT_DENSITY),
        has_profile,
    })
}

fn inspect_avif(bytes: &[u8], limits: &DecodeLimits) -> Result<ImageMetadata, TransformError> {
    let header = avif::read_header(bytes)?;
    if header.width > limits.max_dimension || header.height > limits.max_dimension {
        return Err(TransformError::InvalidDimensions {
            message: format!(
                "image exceeds decode limits: {}x{} (max {})",
                header.width, header.height, limits.max_dimension
            ),
        });
    }

    Ok(ImageMetadata {
        width: header.width,
        height: header.height,
        format: ImageFormat::Avif.name(),
        size: bytes.len(),
        channels: header.channels(),
        has_alpha: header.has_alpha,
        colorspace: if header.color_channels == 1 { "b-w" } else { "srgb" },
        density: DEFAULT_DENSITY,
        has_profile: header.has_profile,
    })
}

fn colorspace(color: ColorType) -> &'static str {
    if color.has_color() {
        "srgb"
    } else {
        "b-w"
    }
}

/// Read the horizontal density in DPI from the container header.
pub fn read_density(bytes: &[u8], format: ImageFormat) -> Option<u32> {
    match format {
        ImageFormat::Png => png_density(bytes),
        ImageFormat::Jpeg => jfif_density(bytes),
        ImageFormat::WebP | ImageFormat::Avif => None,
    }
}

fn png_density(data: &[u8]) -> Option<u32> {
    if data.len() < PNG_SIGNATURE.len() || data[..8] != PNG_SIGNATURE {
        return None;
    }

    // Walk chunks until pHYs or the first IDAT
    let mut pos = 8;
    while pos + 8 <= data.len() {
        let length = u32::from_be_bytes(data[pos..pos + 4].try_into().ok()?) as usize;
        let kind = &data[pos + 4..pos + 8];
        let body = pos + 8;

        match kind {
            b"pHYs" => {
                let chunk = data.get(body..body + 9)?;
                let pixels_per_unit = u32::from_be_bytes(chunk[0..4].try_into().ok()?);
                // Unit 1 is meters; unit 0 is aspect ratio only
                if chunk[8] != 1 || pixels_per_unit == 0 {
                    return None;
                }
                return Some((f64::from(pixels_per_unit) * 0.0254).round() as u32);
            }
            b"IDAT" | b"IEND" => return None,
            _ => {}
        }

        // Skip data and CRC
        pos = body.checked_add(length)?.checked_add(4)?;
    }

    None
}

fn jfif_density(data: &[u8]) -> Option<u32> {
    if data.len() < 4 || data[0..2] != SOI {
        return None;
    }

    let mut pos = 2;
    while pos + 4 <= data.len() {
        if data[pos] != 0xFF {
            return None;
        }
        let marker = data[pos + 1];
        if marker == SOS {
            return None;
        }

        let length = u16::from_be_bytes([data[pos + 2], data[pos + 3]]) as usize;
        let segment = data.get(pos + 4..pos + 2 + length)?;

        // "JFIF\0", version (2), units (1), Xdensity (2), Ydensity (2)
        if marker == APP0 && segment.len() >= 12 && &segment[0..5] == b"JFIF\0" {
            let units = segment[7];
            let x_density = u16::from_be_bytes([segment[8], segment[9]]);
            if x_density == 0 {
                return None;
            }
            return match units {
                1 => Some(u32::from(x_density)),
                2 => Some((f64::from(x_density) * 2.54).round() as u32),
                _ => None,
            };
        }

        pos += 2 + length;
    }

    None
}

// =============================================================================
// Tests
// =============================================================================
