//! Typed operation parameters.
//!
//! Every value arrives on the wire as a string. This module turns those
//! strings into strongly typed requests, rejecting anything malformed or out
//! of range. Nothing is coerced: `"abc"`, `"NaN"`, `"-5"` and `"0"` are all
//! errors where a positive number is expected.

use std::collections::HashMap;

use crate::error::ParamError;

use super::encoder::{DEFAULT_COMPRESS_QUALITY, DEFAULT_QUALITY, MAX_QUALITY, MIN_QUALITY};
use super::format::ImageFormat;

/// Default maximum output width or height in pixels.
pub const DEFAULT_MAX_DIMENSION: u32 = 16_384;

/// Default maximum watermark font size in pixels.
pub const DEFAULT_MAX_FONT_SIZE: u32 = 1_000;

/// Maximum watermark text length in characters.
pub const MAX_WATERMARK_TEXT: usize = 256;

// =============================================================================
// Operations
// =============================================================================

/// The five operations the engine can run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Resize,
    Compress,
    Watermark,
    Convert,
    Metadata,
}

impl Operation {
    /// Name used in logs and route paths.
    pub const fn name(&self) -> &'static str {
        match self {
            Operation::Resize => "resize",
            Operation::Compress => "compress",
            Operation::Watermark => "watermark",
            Operation::Convert => "convert",
            Operation::Metadata => "metadata",
        }
    }
}

// =============================================================================
// Watermark primitives
// =============================================================================

/// Corner the watermark is anchored to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Position {
    TopLeft,
    TopRight,
    BottomLeft,
    BottomRight,
}

impl Position {
    /// Parse `top-left`, `top-right`, `bottom-left` or `bottom-right`.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "top-left" => Some(Position::TopLeft),
            "top-right" => Some(Position::TopRight),
            "bottom-left" => Some(Position::BottomLeft),
            "bottom-right" => Some(Position::BottomRight),
            _ => None,
        }
    }

    pub const fn is_right(&self) -> bool {
        matches!(self, Position::TopRight | Position::BottomRight)
    }

    pub const fn is_bottom(&self) -> bool {
        matches!(self, Position::BottomLeft | Position::BottomRight)
    }
}

/// An RGBA color.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Color {
    pub const WHITE: Color = Color::rgb(255, 255, 255);
    pub const BLACK: Color = Color::rgb(0, 0, 0);

    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b, a: 255 }
    }

    /// Parse `#rgb`, `#rrggbb`, `#rrggbbaa`, `white` or `black`.
    pub fn parse(value: &str) -> Option<Self> {
        let value = value.trim();
        match value.to_ascii_lowercase().as_str() {
            "white" => return Some(Color::WHITE),
            "black" => return Some(Color::BLACK),
            _ => {}
        }

        let hex = value.strip_prefix('#')?;
        if !hex.chars().all(|c| c.is_ascii_hexdigit()) {
            return None;
        }
        let byte = |i: usize| u8::from_str_radix(&hex[i..i + 2], 16).ok();
        let nibble = |i: usize| u8::from_str_radix(&hex[i..i + 1], 16).ok().map(|n| n * 17);

        match hex.len() {
            3 => Some(Color::rgb(nibble(0)?, nibble(1)?, nibble(2)?)),
            6 => Some(Color::rgb(byte(0)?, byte(2)?, byte(4)?)),
            8 => Some(Color {
                r: byte(0)?,
                g: byte(2)?,
                b: byte(4)?,
                a: byte(6)?,
            }),
            _ => None,
        }
    }
}

/// Defaults applied when a watermark request omits a field.
#[derive(Debug, Clone, PartialEq)]
pub struct WatermarkDefaults {
    pub position: Position,
    pub opacity: f32,
    pub font_size: u32,
    pub color: Color,
}

impl Default for WatermarkDefaults {
    fn default() -> Self {
        Self {
            position: Position::BottomRight,
            opacity: 0.5,
            font_size: 48,
            color: Color::WHITE,
        }
    }
}

/// Limits that bound parameter values before any pixel work.
#[derive(Debug, Clone, PartialEq)]
pub struct ParamLimits {
    pub max_dimension: u32,
    pub max_font_size: u32,
    pub watermark: WatermarkDefaults,
}

impl Default for ParamLimits {
    fn default() -> Self {
        Self {
            max_dimension: DEFAULT_MAX_DIMENSION,
            max_font_size: DEFAULT_MAX_FONT_SIZE,
            watermark: WatermarkDefaults::default(),
        }
    }
}

// =============================================================================
// Requests
// =============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct ResizeParams {
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub quality: u8,
    pub format: ImageFormat,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompressParams {
    pub quality: u8,
    /// `None` re-encodes in the source format.
    pub format: Option<ImageFormat>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WatermarkParams {
    pub text: String,
    pub position: Position,
    pub opacity: f32,
    pub font_size: u32,
    pub color: Color,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConvertParams {
    pub format: ImageFormat,
    pub quality: u8,
}

/// A validated request for one operation.
#[derive(Debug, Clone, PartialEq)]
pub enum TransformRequest {
    Resize(ResizeParams),
    Compress(CompressParams),
    Watermark(WatermarkParams),
    Convert(ConvertParams),
    Metadata,
}

impl TransformRequest {
    /// Build a request for `operation` from raw form fields.
    pub fn from_fields(
        operation: Operation,
        fields: &HashMap<String, String>,
        limits: &ParamLimits,
    ) -> Result<Self, ParamError> {
        let get = |name: &str| fields.get(name).map(String::as_str);

        match operation {
            Operation::Resize => {
                let width = parse_dimension("width", get("width"), limits.max_dimension)?;
                let height = parse_dimension("height", get("height"), limits.max_dimension)?;
                if width.is_none() && height.is_none() {
                    return Err(ParamError::MissingDimensions);
                }
                Ok(TransformRequest::Resize(ResizeParams {
                    width,
                    height,
                    quality: parse_quality(get("quality"), DEFAULT_QUALITY)?,
                    format: parse_format(get("format"))?.unwrap_or(ImageFormat::Jpeg),
                }))
            }
            Operation::Compress => Ok(TransformRequest::Compress(CompressParams {
                quality: parse_quality(get("quality"), DEFAULT_COMPRESS_QUALITY)?,
                format: parse_format(get("format"))?,
            })),
            Operation::Watermark => {
                let defaults = &limits.watermark;
                Ok(TransformRequest::Watermark(WatermarkParams {
                    text: parse_text(get("text"))?,
                    position: parse_position(get("position"), defaults.position)?,
                    opacity: parse_opacity(get("opacity"), defaults.opacity)?,
                    font_size: parse_font_size(
                        get("fontSize"),
                        defaults.font_size,
                        limits.max_font_size,
                    )?,
                    color: parse_color(get("color"), defaults.color)?,
                }))
            }
            Operation::Convert => Ok(TransformRequest::Convert(ConvertParams {
                format: parse_format(get("format"))?.ok_or(ParamError::Missing { name: "format" })?,
                quality: parse_quality(get("quality"), DEFAULT_QUALITY)?,
            })),
            Operation::Metadata => Ok(TransformRequest::Metadata),
        }
    }

    pub const fn operation(&self) -> Operation {
        match self {
            TransformRequest::Resize(_) => Operation::Resize,
            TransformRequest::Compress(_) => Operation::Compress,
            TransformRequest::Watermark(_) => Operation::Watermark,
            TransformRequest::Convert(_) => Operation::Convert,
            TransformRequest::Metadata => Operation::Metadata,
        }
    }
}

// =============================================================================
// Field parsers
// =============================================================================

/// Treat absent and blank values the same.
fn present(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// Parse an optional width/height. Must be a whole number in `1..=max`.
pub fn parse_dimension(
    name: &'static str,
    value: Option<&str>,
    max: u32,
) -> Result<Option<u32>, ParamError> {
    let Some(raw) = present(value) else {
        return Ok(None);
    };

    let invalid = |reason: String| ParamError::InvalidDimension {
        name,
        value: raw.to_string(),
        reason,
    };

    let parsed: u64 = raw
        .parse()
        .map_err(|_| invalid("must be a positive integer".to_string()))?;

    if parsed == 0 {
        return Err(invalid("must be greater than 0".to_string()));
    }
    if parsed > u64::from(max) {
        return Err(invalid(format!("must not exceed {}", max)));
    }

    Ok(Some(parsed as u32))
}

/// Parse quality. Must be a whole number in `1..=100`.
pub fn parse_quality(value: Option<&str>, default: u8) -> Result<u8, ParamError> {
    let Some(raw) = present(value) else {
        return Ok(default);
    };

    match raw.parse::<u8>() {
        Ok(q) if (MIN_QUALITY..=MAX_QUALITY).contains(&q) => Ok(q),
        _ => Err(ParamError::InvalidValue {
            name: "quality",
            value: raw.to_string(),
            expected: format!("an integer between {} and {}", MIN_QUALITY, MAX_QUALITY),
        }),
    }
}

/// Parse an optional output format against the allow-list.
pub fn parse_format(value: Option<&str>) -> Result<Option<ImageFormat>, ParamError> {
    match present(value) {
        None => Ok(None),
        Some(raw) => ImageFormat::parse(raw)
            .map(Some)
            .ok_or_else(|| ParamError::UnsupportedFormat {
                value: raw.to_string(),
            }),
    }
}

/// Absent text is missing; present but blank text is invalid.
fn parse_text(value: Option<&str>) -> Result<String, ParamError> {
    let raw = value.ok_or(ParamError::Missing { name: "text" })?;
    let text = present(Some(raw)).ok_or_else(|| ParamError::InvalidValue {
        name: "text",
        value: raw.to_string(),
        expected: "non-empty text".to_string(),
    })?;
    if text.chars().count() > MAX_WATERMARK_TEXT {
        return Err(ParamError::InvalidValue {
            name: "text",
            value: text.chars().take(32).collect::<String>() + "...",
            expected: format!("at most {} characters", MAX_WATERMARK_TEXT),
        });
    }
    Ok(text.to_string())
}

fn parse_position(value: Option<&str>, default: Position) -> Result<Position, ParamError> {
    match present(value) {
        None => Ok(default),
        Some(raw) => Position::parse(raw).ok_or_else(|| ParamError::InvalidValue {
            name: "position",
            value: raw.to_string(),
            expected: "one of top-left, top-right, bottom-left, bottom-right".to_string(),
        }),
    }
}

/// Parse opacity. Must be a finite number in `0.0..=1.0`.
pub fn parse_opacity(value: Option<&str>, default: f32) -> Result<f32, ParamError> {
    let Some(raw) = present(value) else {
        return Ok(default);
    };

    match raw.parse::<f32>() {
        Ok(o) if o.is_finite() && (0.0..=1.0).contains(&o) => Ok(o),
        _ => Err(ParamError::InvalidValue {
            name: "opacity",
            value: raw.to_string(),
            expected: "a number between 0 and 1".to_string(),
        }),
    }
}

fn parse_font_size(value: Option<&str>, default: u32, max: u32) -> Result<u32, ParamError> {
    let Some(raw) = present(value) else {
        return Ok(default);
    };

    match raw.parse::<u32>() {
        Ok(size) if size > 0 && size <= max => Ok(size),
        _ => Err(ParamError::InvalidValue {
            name: "fontSize",
            value: raw.to_string(),
            expected: format!("an integer between 1 and {}", max),
        }),
    }
}

fn parse_color(value: Option<&str>, default: Color) -> Result<Color, ParamError> {
    match present(value) {
        None => Ok(default),
        Some(raw) => Color::parse(raw).ok_or_else(|| ParamError::InvalidValue {
            name: "color",
            value: raw.to_string(),
            expected: "a hex color like #ffffff".to_string(),
        }),
    }
}

// =============================================================================
// Tests
// =============================================================================
