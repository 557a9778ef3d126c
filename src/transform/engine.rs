//! Transformation engine.
//!
//! The engine is the single entry point for pixel work. It is stateless
//! across requests and fully synchronous; the HTTP layer runs it on the
//! worker pool.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                       TransformEngine                            │
//! │  ┌─────────────────────────────────────────────────────────┐    │
//! │  │                     execute()                           │    │
//! │  │  1. Detect format     3. Apply operation                │    │
//! │  │  2. Bounded decode    4. Encode at quality              │    │
//! │  └─────────────────────────────────────────────────────────┘    │
//! │           │                    │                    │            │
//! │           ▼                    ▼                    ▼            │
//! │    ┌───────────┐      ┌──────────────┐    ┌──────────────────┐  │
//! │    │  decode   │      │ resize /     │    │  FormatEncoder   │  │
//! │    │           │      │ watermark    │    │                  │  │
//! │    └───────────┘      └──────────────┘    └──────────────────┘  │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Metadata skips steps 3 and 4 and never decodes pixels.

use bytes::Bytes;
use image::DynamicImage;

use crate::error::TransformError;

use super::decode::{decode, DecodeLimits};
use super::encoder::{
    FormatEncoder, DEFAULT_AVIF_SPEED, DEFAULT_COMPRESS_QUALITY, DEFAULT_PNG_COMPRESSION,
    DEFAULT_QUALITY,
};
use super::format::ImageFormat;
use super::metadata::{inspect, ImageMetadata};
use super::params::{
    CompressParams, ConvertParams, ParamLimits, ResizeParams, TransformRequest,
    WatermarkDefaults, WatermarkParams, DEFAULT_MAX_FONT_SIZE,
};
use super::resize::{resize_image, target_dimensions, working_dimensions};
use super::watermark::apply_watermark;

// =============================================================================
// Settings
// =============================================================================

/// Engine configuration, fixed at startup.
#[derive(Debug, Clone, PartialEq)]
pub struct TransformSettings {
    /// Bounds applied to every decode. `max_dimension` also caps outputs and
    /// `max_alloc` also caps the pixel buffers an operation allocates.
    pub decode: DecodeLimits,

    /// PNG zlib effort (0-9)
    pub png_compression: u8,

    /// AVIF encoder speed (1-10)
    pub avif_speed: u8,

    /// Largest accepted watermark font size
    pub max_font_size: u32,

    /// Values used when a watermark request omits a field
    pub watermark: WatermarkDefaults,
}

impl Default for TransformSettings {
    fn default() -> Self {
        Self {
            decode: DecodeLimits::default(),
            png_compression: DEFAULT_PNG_COMPRESSION,
            avif_speed: DEFAULT_AVIF_SPEED,
            max_font_size: DEFAULT_MAX_FONT_SIZE,
            watermark: WatermarkDefaults::default(),
        }
    }
}

// =============================================================================
// Result
// =============================================================================

/// Output of any operation.
#[derive(Debug, Clone)]
pub struct TransformResult {
    /// Encoded image, or the JSON document for metadata
    pub bytes: Bytes,

    /// `Content-Type` of `bytes`
    pub content_type: &'static str,

    pub size_bytes: usize,

    /// Operation-specific response headers
    pub extra_headers: Vec<(&'static str, String)>,
}

impl TransformResult {
    fn new(bytes: Bytes, content_type: &'static str) -> Self {
        let size_bytes = bytes.len();
        Self {
            bytes,
            content_type,
            size_bytes,
            extra_headers: Vec::new(),
        }
    }

    fn image(bytes: Bytes, format: ImageFormat) -> Self {
        Self::new(bytes, format.content_type())
    }
}

// =============================================================================
// Engine
// =============================================================================

/// Stateless executor for the five operations.
#[derive(Debug, Clone)]
pub struct TransformEngine {
    settings: TransformSettings,
    encoder: FormatEncoder,
}

impl Default for TransformEngine {
    fn default() -> Self {
        Self::new(TransformSettings::default())
    }
}

impl TransformEngine {
    pub fn new(settings: TransformSettings) -> Self {
        let encoder = FormatEncoder::new(settings.png_compression, settings.avif_speed);
        Self { settings, encoder }
    }

    pub fn settings(&self) -> &TransformSettings {
        &self.settings
    }

    /// Limits the HTTP layer uses when parsing parameters.
    pub fn param_limits(&self) -> ParamLimits {
        ParamLimits {
            max_dimension: self.settings.decode.max_dimension,
            max_font_size: self.settings.max_font_size,
            watermark: self.settings.watermark.clone(),
        }
    }

    /// Run a validated request against `input`.
    pub fn execute(
        &self,
        input: &Bytes,
        request: &TransformRequest,
    ) -> Result<TransformResult, TransformError> {
        match request {
            TransformRequest::Resize(params) => self.resize(input, params),
            TransformRequest::Compress(params) => self.compress(input, params),
            TransformRequest::Watermark(params) => self.watermark(input, params),
            TransformRequest::Convert(params) => self.convert(input, params),
            TransformRequest::Metadata => self.metadata(input),
        }
    }

    /// Resize to the requested box and encode in the requested format.
    pub fn resize(
        &self,
        input: &[u8],
        params: &ResizeParams,
    ) -> Result<TransformResult, TransformError> {
        let (img, _) = self.decode(input)?;

        let (target_w, target_h) =
            target_dimensions(img.width(), img.height(), params.width, params.height);
        let max = self.settings.decode.max_dimension;
        if target_w > max || target_h > max {
            return Err(TransformError::InvalidDimensions {
                message: format!(
                    "output {}x{} exceeds the maximum dimension of {}",
                    target_w, target_h, max
                ),
            });
        }

        let (work_w, work_h) =
            working_dimensions(img.width(), img.height(), params.width, params.height);
        let mut needed = rgba_bytes(work_w, work_h);
        if (work_w, work_h) != (target_w, target_h) {
            needed = needed.saturating_add(rgba_bytes(target_w, target_h));
        }
        self.ensure_alloc("resize", needed)?;

        let resized = resize_image(&img, params.width, params.height);
        let bytes = self.encoder.encode(&resized, params.format, params.quality)?;
        Ok(TransformResult::image(bytes, params.format))
    }

    /// Re-encode at a lower quality.
    ///
    /// Re-encoding in the source format at or below the default quality never
    /// returns more bytes than were uploaded: the original is returned instead.
    pub fn compress(
        &self,
        input: &Bytes,
        params: &CompressParams,
    ) -> Result<TransformResult, TransformError> {
        let (img, source_format) = self.decode(input)?;
        let target = params.format.unwrap_or(source_format);

        let mut output = self.encoder.encode(&img, target, params.quality)?;
        if target == source_format
            && params.quality <= DEFAULT_COMPRESS_QUALITY
            && output.len() > input.len()
        {
            tracing::debug!(
                original = input.len(),
                reencoded = output.len(),
                "Re-encoding grew the image, returning original bytes"
            );
            output = input.clone();
        }

        let original = input.len();
        let compressed = output.len();
        let mut result = TransformResult::image(output, target);
        result.extra_headers = vec![
            ("X-Original-Size", original.to_string()),
            ("X-Compressed-Size", compressed.to_string()),
            ("X-Compression-Ratio", compression_ratio(original, compressed)),
        ];
        Ok(result)
    }

    /// Draw text onto the image, keeping the source format.
    pub fn watermark(
        &self,
        input: &[u8],
        params: &WatermarkParams,
    ) -> Result<TransformResult, TransformError> {
        let (img, source_format) = self.decode(input)?;
        // Working RGBA copy plus the converted output
        self.ensure_alloc(
            "watermark",
            rgba_bytes(img.width(), img.height()).saturating_mul(2),
        )?;
        let marked = apply_watermark(&img, params)?;
        let bytes = self.encoder.encode(&marked, source_format, DEFAULT_QUALITY)?;
        Ok(TransformResult::image(bytes, source_format))
    }

    /// Re-encode into another allow-listed format.
    pub fn convert(
        &self,
        input: &[u8],
        params: &ConvertParams,
    ) -> Result<TransformResult, TransformError> {
        let (img, _) = self.decode(input)?;
        let bytes = self.encoder.encode(&img, params.format, params.quality)?;
        Ok(TransformResult::image(bytes, params.format))
    }

    /// Header facts as a JSON document.
    pub fn metadata(&self, input: &[u8]) -> Result<TransformResult, TransformError> {
        let meta = self.inspect(input)?;
        let json = serde_json::to_vec(&meta).map_err(|e| TransformError::Encode {
            message: e.to_string(),
        })?;
        Ok(TransformResult::new(Bytes::from(json), "application/json"))
    }

    /// Header facts without serializing them.
    pub fn inspect(&self, input: &[u8]) -> Result<ImageMetadata, TransformError> {
        inspect(input, &self.settings.decode)
    }

    /// Encode a probe image in every output format and decode it back where
    /// this build has a decoder.
    pub fn probe_codecs(&self) -> Result<(), TransformError> {
        let probe = DynamicImage::new_rgb8(8, 8);
        for format in ImageFormat::ALL {
            let bytes = self.encoder.encode(&probe, format, DEFAULT_QUALITY)?;
            if format.can_decode() {
                let (decoded, detected) = self.decode(&bytes)?;
                if detected != format || decoded.width() != 8 {
                    return Err(TransformError::InvalidImageData {
                        message: format!("{} probe did not round-trip", format),
                    });
                }
            }
        }
        Ok(())
    }

    fn decode(&self, input: &[u8]) -> Result<(DynamicImage, ImageFormat), TransformError> {
        decode(input, &self.settings.decode)
    }

    /// Refuse work whose pixel buffers would exceed the allocation ceiling.
    fn ensure_alloc(&self, operation: &str, bytes: u64) -> Result<(), TransformError> {
        let limit = self.settings.decode.max_alloc;
        if bytes > limit {
            return Err(TransformError::InsufficientMemory {
                message: format!(
                    "{} needs {} bytes of pixel buffers, limit is {}",
                    operation, bytes, limit
                ),
            });
        }
        Ok(())
    }
}

/// Size of a `width` x `height` RGBA8 buffer.
fn rgba_bytes(width: u32, height: u32) -> u64 {
    u64::from(width)
        .saturating_mul(u64::from(height))
        .saturating_mul(4)
}

/// `(1 - output/input) * 100`, two decimals. Negative when the output grew.
pub fn compression_ratio(original: usize, compressed: usize) -> String {
    if original == 0 {
        return "0.00".to_string();
    }
    let ratio = (1.0 - compressed as f64 / original as f64) * 100.0;
    format!("{:.2}", ratio)
}

// =============================================================================
// Tests
// =============================================================================
