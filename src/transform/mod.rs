//! Image transformation layer.
//!
//! This module turns an uploaded image plus a validated request into encoded
//! output. It knows nothing about HTTP.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │              HTTP Handlers              │
//! └────────────────────┬────────────────────┘
//!                      │ TransformRequest
//!                      ▼
//! ┌─────────────────────────────────────────┐
//! │               WorkerPool                │
//! │     (semaphore + blocking threads)      │
//! └────────────────────┬────────────────────┘
//!                      │
//!                      ▼
//! ┌─────────────────────────────────────────┐
//! │            TransformEngine              │
//! │  ┌──────────┐ ┌──────────┐ ┌─────────┐  │
//! │  │  decode  │ │  resize  │ │ encoder │  │
//! │  │ (limits) │ │watermark │ │(4 fmts) │  │
//! │  └──────────┘ └──────────┘ └─────────┘  │
//! └─────────────────────────────────────────┘
//! ```
//!
//! # Components
//!
//! - [`TransformEngine`]: Runs the five operations
//! - [`TransformRequest`]: Typed parameters for one operation, parsed from wire strings
//! - [`WorkerPool`]: Bounded executor for CPU-bound codec work
//! - [`FormatEncoder`]: Encodes pixels into JPEG, PNG, WebP or AVIF
//! - [`ImageMetadata`]: Header-derived facts returned by the metadata operation

mod avif;
mod decode;
mod encoder;
mod engine;
mod font;
mod format;
mod metadata;
mod params;
mod pool;
mod resize;
mod watermark;

pub use decode::{DecodeLimits, DEFAULT_MAX_DECODE_BYTES};
pub use encoder::{
    clamp_quality, is_valid_quality, FormatEncoder, DEFAULT_AVIF_SPEED, DEFAULT_COMPRESS_QUALITY,
    DEFAULT_PNG_COMPRESSION, DEFAULT_QUALITY, MAX_QUALITY, MIN_QUALITY,
};
pub use engine::{compression_ratio, TransformEngine, TransformResult, TransformSettings};
pub use format::{ImageFormat, ALLOWED_MIME_TYPES};
pub use metadata::{ImageMetadata, DEFAULT_DENSITY};
pub use params::{
    parse_dimension, parse_format, parse_opacity, parse_quality, Color, CompressParams,
    ConvertParams, Operation, ParamLimits, Position, ResizeParams, TransformRequest,
    WatermarkDefaults, WatermarkParams, DEFAULT_MAX_DIMENSION, DEFAULT_MAX_FONT_SIZE,
    MAX_WATERMARK_TEXT,
};
pub use pool::{default_workers, WorkerPool};
pub use resize::target_dimensions;
pub use watermark::{TextAlign, WatermarkLayout, MARGIN};
