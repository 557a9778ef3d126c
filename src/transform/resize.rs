//! Resize geometry.
//!
//! With a single dimension the other one is derived from the source aspect
//! ratio. With both, the image is scaled to cover the box and the overflow is
//! cropped from the center.

use image::imageops::FilterType;
use image::DynamicImage;

/// Compute output dimensions for a resize.
///
/// The derived side is rounded to the nearest pixel and never drops below 1.
/// Returns the source dimensions unchanged when neither target is given.
pub fn target_dimensions(
    src_w: u32,
    src_h: u32,
    width: Option<u32>,
    height: Option<u32>,
) -> (u32, u32) {
    match (width, height) {
        (Some(w), Some(h)) => (w, h),
        (Some(w), None) => (w, scale_side(src_h, w, src_w)),
        (None, Some(h)) => (scale_side(src_w, h, src_h), h),
        (None, None) => (src_w, src_h),
    }
}

/// `side * numerator / denominator`, rounded, at least 1.
fn scale_side(side: u32, numerator: u32, denominator: u32) -> u32 {
    if denominator == 0 {
        return 1;
    }
    let scaled = (f64::from(side) * f64::from(numerator) / f64::from(denominator)).round();
    (scaled as u32).max(1)
}

/// Dimensions of the largest buffer a resize allocates.
///
/// Filling a box first scales the whole image to cover it, so one side can
/// run well past the target before the crop.
pub fn working_dimensions(
    src_w: u32,
    src_h: u32,
    width: Option<u32>,
    height: Option<u32>,
) -> (u32, u32) {
    let (target_w, target_h) = target_dimensions(src_w, src_h, width, height);
    if width.is_none() || height.is_none() || src_w == 0 || src_h == 0 {
        return (target_w, target_h);
    }

    let ratio = (f64::from(target_w) / f64::from(src_w)).max(f64::from(target_h) / f64::from(src_h));
    let cover = |side: u32| (f64::from(side) * ratio).ceil().min(f64::from(u32::MAX)) as u32;
    (cover(src_w).max(target_w), cover(src_h).max(target_h))
}

/// Resize `img` to the requested box.
pub fn resize_image(img: &DynamicImage, width: Option<u32>, height: Option<u32>) -> DynamicImage {
    let (target_w, target_h) = target_dimensions(img.width(), img.height(), width, height);

    if (target_w, target_h) == (img.width(), img.height()) {
        return img.clone();
    }

    match (width, height) {
        (Some(_), Some(_)) => img.resize_to_fill(target_w, target_h, FilterType::Lanczos3),
        _ => img.resize_exact(target_w, target_h, FilterType::Lanczos3),
    }
}
