//! Watermark typeface.
//!
//! DejaVu Sans is compiled into the binary and rasterized with `ab_glyph`,
//! so watermarks render any text the face covers (Latin, Greek, Cyrillic,
//! common symbols) at the exact pixel size requested.

use std::sync::OnceLock;

use ab_glyph::{Font, FontRef, PxScale, ScaleFont};
use imageproc::drawing::text_size;

use crate::error::TransformError;

static FONT_DATA: &[u8] = include_bytes!("../../assets/DejaVuSans.ttf");

static FACE: OnceLock<Result<FontRef<'static>, ab_glyph::InvalidFont>> = OnceLock::new();

/// The embedded face, parsed on first use.
pub fn face() -> Result<&'static FontRef<'static>, TransformError> {
    FACE.get_or_init(|| FontRef::try_from_slice(FONT_DATA))
        .as_ref()
        .map_err(|e| TransformError::Encode {
            message: format!("watermark font: {}", e),
        })
}

/// Pixel scale for a font size. The size is the line height, ascent to descent.
pub fn scale_for(font_size: u32) -> PxScale {
    PxScale::from(font_size.max(1) as f32)
}

/// Advance width of `text` in pixels, kerning included.
pub fn text_width(face: &FontRef<'_>, text: &str, scale: PxScale) -> u32 {
    text_size(scale, face, text).0
}

/// Line height in pixels.
pub fn line_height(face: &FontRef<'_>, scale: PxScale) -> u32 {
    face.as_scaled(scale).height().round().max(1.0) as u32
}

/// Whether the face has a real glyph for `c` rather than the notdef box.
pub fn covers(face: &FontRef<'_>, c: char) -> bool {
    c.is_whitespace() || face.glyph_id(c).0 != 0
}
