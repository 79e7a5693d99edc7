//! Integration tests for mask derivation.
//!
//! Tests cover:
//! - Dilation extents for odd and even kernel sides
//! - Cyclic offsets, including wrap-around at the edges
//! - Union, intersection and difference of masks
//! - Error cases (empty union, size mismatch)

mod common;

use dddetail::DetailError;
use dddetail::detection::masks::{
    bitwise_and_masks, combine_masks, dilate_masks, dilate_square, is_all_black, offset_masks,
    subtract_masks,
};
use image::{GrayImage, Luma};

use common::*;

fn single_pixel(x: u32, y: u32) -> MaskImage {
    let mut mask = GrayImage::new(SIZE, SIZE);
    mask.put_pixel(x, y, Luma([255]));
    mask
}

/// (min x, min y, max x, max y) of the set pixels
fn extents(mask: &MaskImage) -> Option<(u32, u32, u32, u32)> {
    let mut bounds: Option<(u32, u32, u32, u32)> = None;
    for (x, y, p) in mask.enumerate_pixels() {
        if p[0] == 0 {
            continue;
        }
        bounds = Some(match bounds {
            None => (x, y, x, y),
            Some((x0, y0, x1, y1)) => (x0.min(x), y0.min(y), x1.max(x), y1.max(y)),
        });
    }
    bounds
}

#[test]
fn test_dilation_zero_is_identity() {
    let masks = vec![rect_mask(5, 5, 9, 9), single_pixel(30, 30)];
    let out = dilate_masks(masks.clone(), 0, 1);
    assert_eq!(out, masks);
}

#[test]
fn test_dilation_odd_side_is_centred() {
    let out = dilate_square(&single_pixel(10, 10), 3);
    assert_eq!(extents(&out), Some((9, 9, 11, 11)));
    assert_eq!(area(&out), 9);
}

#[test]
fn test_dilation_even_side_reaches_further_down_right() {
    // Side 4, anchor 2: one pixel towards the origin, two away from it
    let out = dilate_square(&single_pixel(10, 10), 4);
    assert_eq!(extents(&out), Some((9, 9, 12, 12)));
    assert_eq!(area(&out), 16);

    let via_list = dilate_masks(vec![single_pixel(10, 10)], 4, 1);
    assert_eq!(via_list[0], out);
}

#[test]
fn test_dilation_iterations_compound() {
    let once = dilate_masks(vec![single_pixel(20, 20)], 3, 1);
    let twice = dilate_masks(vec![single_pixel(20, 20)], 3, 2);
    assert_eq!(area(&once[0]), 9);
    assert_eq!(extents(&twice[0]), Some((18, 18, 22, 22)));
}

#[test]
fn test_dilation_keeps_masks_binary_and_growing() {
    let mask = rect_mask(20, 20, 30, 25);
    let out = dilate_square(&mask, 5);
    assert!(out.pixels().all(|p| p[0] == 0 || p[0] == 255));
    for (x, y, p) in mask.enumerate_pixels() {
        if p[0] != 0 {
            assert_eq!(out.get_pixel(x, y)[0], 255, "dilation lost ({x}, {y})");
        }
    }
    assert!(area(&out) > area(&mask));
}

#[test]
fn test_dilation_clips_at_the_border() {
    let out = dilate_square(&single_pixel(0, 0), 5);
    assert_eq!(extents(&out), Some((0, 0, 2, 2)));
}

#[test]
fn test_offset_moves_right_and_up() {
    let out = offset_masks(vec![single_pixel(10, 10)], 3, 2);
    assert_eq!(out[0].get_pixel(13, 8)[0], 255);
    assert_eq!(area(&out[0]), 1);

    let back = offset_masks(out, -3, -2);
    assert_eq!(back[0], single_pixel(10, 10));
}

#[test]
fn test_offset_wraps_around_edges() {
    let out = offset_masks(vec![single_pixel(62, 1)], 3, 2);
    assert_eq!(out[0].get_pixel(1, 63)[0], 255);
    assert_eq!(area(&out[0]), 1);
}

#[test]
fn test_offset_zero_is_identity() {
    let masks = vec![rect_mask(3, 4, 10, 12)];
    assert_eq!(offset_masks(masks.clone(), 0, 0), masks);
}

#[test]
fn test_combine_is_union() -> anyhow::Result<()> {
    let a = rect_mask(0, 0, 9, 9);
    let b = rect_mask(5, 5, 14, 14);

    let combined = combine_masks(&[a.clone(), b.clone()])?;
    assert_eq!(area(&combined), 100 + 100 - 25);
    assert_eq!(combine_masks(&[a.clone()])?, a);
    assert_eq!(combine_masks(&[a.clone(), a.clone()])?, a);
    Ok(())
}

#[test]
fn test_combine_empty_list_fails() {
    let err = combine_masks(&[]).unwrap_err();
    assert!(matches!(err, DetailError::EmptyInput));
}

#[test]
fn test_bitwise_and_keeps_overlap() -> anyhow::Result<()> {
    let a = rect_mask(0, 0, 9, 9);
    let b = rect_mask(5, 5, 14, 14);

    let overlap = bitwise_and_masks(&a, &b)?;
    assert_eq!(overlap, rect_mask(5, 5, 9, 9));
    assert!(is_all_black(&bitwise_and_masks(&a, &GrayImage::new(SIZE, SIZE))?));
    Ok(())
}

#[test]
fn test_subtract_removes_covered_pixels() -> anyhow::Result<()> {
    let a = rect_mask(0, 0, 9, 9);
    let b = rect_mask(5, 0, 14, 9);

    assert_eq!(subtract_masks(&a, &b)?, rect_mask(0, 0, 4, 9));
    assert!(is_all_black(&subtract_masks(&a, &a)?));
    assert_eq!(subtract_masks(&a, &GrayImage::new(SIZE, SIZE))?, a);
    Ok(())
}

#[test]
fn test_mismatched_sizes_are_rejected() {
    let a = rect_mask(0, 0, 9, 9);
    let b = GrayImage::new(SIZE / 2, SIZE);

    let err = bitwise_and_masks(&a, &b).unwrap_err();
    assert!(matches!(err, DetailError::DimensionMismatch { .. }));
    assert!(subtract_masks(&a, &b).is_err());
    assert!(combine_masks(&[a, b]).is_err());
}

#[test]
fn test_is_all_black() {
    assert!(is_all_black(&GrayImage::new(SIZE, SIZE)));
    assert!(!is_all_black(&single_pixel(63, 63)));
}
