//! Text watermarking.
//!
//! The text is rasterized into a coverage mask the size of the visible text
//! box, then blended onto the source with the ink color and opacity.

use ab_glyph::FontRef;
use image::{DynamicImage, GrayImage, Luma, Rgba, RgbaImage};
use imageproc::drawing::draw_text_mut;

use crate::error::TransformError;

use super::font;
use super::params::{Position, WatermarkParams};

/// Distance between the anchor and the image edge, in pixels.
pub const MARGIN: u32 = 20;

/// Which end of the text sits on the anchor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextAlign {
    /// Text starts at the anchor and extends right.
    Start,
    /// Text ends at the anchor.
    End,
}

/// Where the text lands on a given image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatermarkLayout {
    pub anchor_x: i64,
    pub anchor_y: i64,
    pub align: TextAlign,
    /// Top-left corner of the rendered text box.
    pub origin_x: i64,
    pub origin_y: i64,
    pub text_width: u32,
    pub text_height: u32,
    pub font_size: u32,
}

impl WatermarkLayout {
    /// Lay out `text` at `position` on a `width` x `height` image.
    ///
    /// Top positions hang the text below the anchor, bottom positions sit it
    /// above. Right positions right-align.
    pub fn compute(
        face: &FontRef<'_>,
        width: u32,
        height: u32,
        text: &str,
        position: Position,
        font_size: u32,
    ) -> Self {
        let scale = font::scale_for(font_size);
        let text_width = font::text_width(face, text, scale);
        let text_height = font::line_height(face, scale);

        let anchor_x = if position.is_right() {
            i64::from(width) - i64::from(MARGIN)
        } else {
            i64::from(MARGIN)
        };
        let anchor_y = if position.is_bottom() {
            i64::from(height) - i64::from(MARGIN)
        } else {
            i64::from(MARGIN)
        };

        let align = if position.is_right() {
            TextAlign::End
        } else {
            TextAlign::Start
        };

        let origin_x = match align {
            TextAlign::Start => anchor_x,
            TextAlign::End => anchor_x - i64::from(text_width),
        };
        let origin_y = if position.is_bottom() {
            anchor_y - i64::from(text_height)
        } else {
            anchor_y
        };

        Self {
            anchor_x,
            anchor_y,
            align,
            origin_x,
            origin_y,
            text_width,
            text_height,
            font_size,
        }
    }

    /// The part of the text box, padded for glyph overhang, that falls
    /// inside a `width` x `height` image, as `(x, y, w, h)`.
    fn visible_region(&self, width: u32, height: u32) -> Option<(u32, u32, u32, u32)> {
        let pad = i64::from(self.font_size / 4 + 1);
        let x0 = (self.origin_x - pad).max(0);
        let y0 = (self.origin_y - pad).max(0);
        let x1 = (self.origin_x + i64::from(self.text_width) + pad).min(i64::from(width));
        let y1 = (self.origin_y + i64::from(self.text_height) + pad).min(i64::from(height));
        if x0 >= x1 || y0 >= y1 {
            return None;
        }
        Some((x0 as u32, y0 as u32, (x1 - x0) as u32, (y1 - y0) as u32))
    }
}

/// Composite `params.text` onto `img`.
///
/// The result keeps an alpha channel only if the source had one.
pub fn apply_watermark(
    img: &DynamicImage,
    params: &WatermarkParams,
) -> Result<DynamicImage, TransformError> {
    let (width, height) = (img.width(), img.height());
    let alpha = (f32::from(params.color.a) * params.opacity.clamp(0.0, 1.0)).round() as u8;
    if alpha == 0 {
        return Ok(img.clone());
    }

    let face = font::face()?;
    if let Some(missing) = params.text.chars().find(|c| !font::covers(face, *c)) {
        tracing::debug!(character = %missing.escape_unicode(), "Watermark font has no glyph");
    }
    let layout = WatermarkLayout::compute(
        face,
        width,
        height,
        &params.text,
        params.position,
        params.font_size,
    );
    let Some(region) = layout.visible_region(width, height) else {
        return Ok(img.clone());
    };

    let mask = render_mask(face, &params.text, &layout, region);
    let ink = Rgba([params.color.r, params.color.g, params.color.b, alpha]);
    let mut base = img.to_rgba8();
    blend(&mut base, &mask, region, ink);

    Ok(if img.color().has_alpha() {
        DynamicImage::ImageRgba8(base)
    } else {
        DynamicImage::ImageRgb8(DynamicImage::ImageRgba8(base).to_rgb8())
    })
}

/// Glyph coverage over `region`, 255 where the text is solid.
fn render_mask(
    face: &FontRef<'_>,
    text: &str,
    layout: &WatermarkLayout,
    (x0, y0, w, h): (u32, u32, u32, u32),
) -> GrayImage {
    let mut mask = GrayImage::new(w, h);
    let x = clamp_i32(layout.origin_x - i64::from(x0));
    let y = clamp_i32(layout.origin_y - i64::from(y0));
    draw_text_mut(
        &mut mask,
        Luma([255]),
        x,
        y,
        font::scale_for(layout.font_size),
        face,
        text,
    );
    mask
}

/// Source-over blend of `ink` through `mask` at `region`.
fn blend(base: &mut RgbaImage, mask: &GrayImage, (x0, y0, _, _): (u32, u32, u32, u32), ink: Rgba<u8>) {
    let ink_alpha = f32::from(ink[3]) / 255.0;
    for (mx, my, coverage) in mask.enumerate_pixels() {
        if coverage[0] == 0 {
            continue;
        }
        let a = ink_alpha * f32::from(coverage[0]) / 255.0;
        let pixel = base.get_pixel_mut(x0 + mx, y0 + my);
        for channel in 0..3 {
            let mixed = f32::from(ink[channel]) * a + f32::from(pixel[channel]) * (1.0 - a);
            pixel[channel] = mixed.round() as u8;
        }
        let out_alpha = 255.0 * a + f32::from(pixel[3]) * (1.0 - a);
        pixel[3] = out_alpha.round() as u8;
    }
}

fn clamp_i32(value: i64) -> i32 {
    value.clamp(i64::from(i32::MIN), i64::from(i32::MAX)) as i32
}
