use image::{GrayImage, Luma};
use imageproc::distance_transform::Norm;
use imageproc::morphology;

use crate::error::{DetailError, DetailResult};
use crate::models::MaskImage;

/// Grow every mask with a `factor` x `factor` square, `iterations` times.
///
/// A factor of 0 returns the input untouched.
pub fn dilate_masks(masks: Vec<MaskImage>, factor: u32, iterations: u32) -> Vec<MaskImage> {
    if factor == 0 {
        return masks;
    }
    masks
        .into_iter()
        .map(|mask| {
            let mut out = mask;
            for _ in 0..iterations {
                out = dilate_square(&out, factor);
            }
            out
        })
        .collect()
}

/// Dilate with a square structuring element of side `side`.
///
/// The anchor sits at `side / 2`, so an even side reaches one pixel further
/// right/down than left/up.
pub fn dilate_square(mask: &MaskImage, side: u32) -> MaskImage {
    if side <= 1 {
        return mask.clone();
    }
    if side % 2 == 1 && side / 2 <= u8::MAX as u32 {
        // Centred element, imageproc handles it directly
        return morphology::dilate(mask, Norm::LInf, (side / 2) as u8);
    }

    let anchor = (side / 2) as i64;
    let before = anchor;
    let after = side as i64 - 1 - anchor;
    let horizontal = max_filter_rows(mask, before, after);
    max_filter_cols(&horizontal, before, after)
}

// dst(x) = max src(x - before ..= x + after)
fn max_filter_rows(mask: &GrayImage, before: i64, after: i64) -> GrayImage {
    let (width, height) = mask.dimensions();
    let mut out = GrayImage::new(width, height);
    for y in 0..height {
        for x in 0..width {
            let lo = (x as i64 - before).max(0);
            let hi = (x as i64 + after).min(width as i64 - 1);
            let value = (lo..=hi)
                .map(|sx| mask.get_pixel(sx as u32, y)[0])
                .max()
                .unwrap_or(0);
            out.put_pixel(x, y, Luma([value]));
        }
    }
    out
}

fn max_filter_cols(mask: &GrayImage, before: i64, after: i64) -> GrayImage {
    let (width, height) = mask.dimensions();
    let mut out = GrayImage::new(width, height);
    for y in 0..height {
        let lo = (y as i64 - before).max(0);
        let hi = (y as i64 + after).min(height as i64 - 1);
        for x in 0..width {
            let value = (lo..=hi)
                .map(|sy| mask.get_pixel(x, sy as u32)[0])
                .max()
                .unwrap_or(0);
            out.put_pixel(x, y, Luma([value]));
        }
    }
    out
}

/// Cyclically shift every mask by `dx` to the right and `dy` upwards.
///
/// Pixels pushed past an edge reappear on the opposite edge.
pub fn offset_masks(masks: Vec<MaskImage>, dx: i32, dy: i32) -> Vec<MaskImage> {
    if dx == 0 && dy == 0 {
        return masks;
    }
    masks.iter().map(|mask| roll(mask, dx, dy)).collect()
}

fn roll(mask: &MaskImage, dx: i32, dy: i32) -> MaskImage {
    let (width, height) = mask.dimensions();
    if width == 0 || height == 0 {
        return mask.clone();
    }
    let w = width as i64;
    let h = height as i64;
    GrayImage::from_fn(width, height, |x, y| {
        let sx = (x as i64 - dx as i64).rem_euclid(w);
        let sy = (y as i64 + dy as i64).rem_euclid(h);
        *mask.get_pixel(sx as u32, sy as u32)
    })
}

fn check_dimensions(a: &MaskImage, b: &MaskImage) -> DetailResult<()> {
    if a.dimensions() != b.dimensions() {
        return Err(DetailError::DimensionMismatch {
            left: a.dimensions(),
            right: b.dimensions(),
        });
    }
    Ok(())
}

fn zip_with(a: &MaskImage, b: &MaskImage, op: impl Fn(u8, u8) -> u8) -> DetailResult<MaskImage> {
    check_dimensions(a, b)?;
    let data = a
        .as_raw()
        .iter()
        .zip(b.as_raw().iter())
        .map(|(&pa, &pb)| op(pa, pb))
        .collect();
    GrayImage::from_raw(a.width(), a.height(), data).ok_or(DetailError::DimensionMismatch {
        left: a.dimensions(),
        right: b.dimensions(),
    })
}

/// Pixels covered by both masks
pub fn bitwise_and_masks(a: &MaskImage, b: &MaskImage) -> DetailResult<MaskImage> {
    zip_with(a, b, |pa, pb| pa & pb)
}

/// Pixels of `a` not covered by `b` (saturating subtract)
pub fn subtract_masks(a: &MaskImage, b: &MaskImage) -> DetailResult<MaskImage> {
    zip_with(a, b, |pa, pb| pa.saturating_sub(pb))
}

/// OR-reduce a list of masks into one
pub fn combine_masks(masks: &[MaskImage]) -> DetailResult<MaskImage> {
    let (first, rest) = masks.split_first().ok_or(DetailError::EmptyInput)?;
    let mut combined = first.clone();
    for mask in rest {
        combined = zip_with(&combined, mask, |pa, pb| pa | pb)?;
    }
    Ok(combined)
}

/// True when no pixel is set
pub fn is_all_black(mask: &MaskImage) -> bool {
    mask.as_raw().iter().all(|&p| p == 0)
}
