//! Mask previews: each detected region tinted with a random colour and
//! labelled with `label:score` at its centroid.

use std::path::Path;

use ab_glyph::FontVec;
use image::{Rgb, RgbImage};
use imageproc::drawing::draw_text_mut;
use rand::Rng;
use tracing::{info, warn};

use crate::models::{DetectionResult, MaskImage};

/// Weight of the source pixel when tinting a region
const SOURCE_ALPHA: f32 = 0.2;

/// Horizontal shift of the label relative to the centroid
const LABEL_SHIFT_X: i32 = 30;

/// Draws detection previews
pub struct PreviewRenderer {
    /// Font for labels; without one, labels are skipped
    pub font: Option<FontVec>,
    pub font_scale: f32,
}

impl Default for PreviewRenderer {
    fn default() -> Self {
        Self {
            font: None,
            font_scale: 12.0,
        }
    }
}

impl PreviewRenderer {
    pub fn with_font_path(font_path: &Path) -> anyhow::Result<Self> {
        let data = std::fs::read(font_path)?;
        let font = FontVec::try_from_vec(data)
            .map_err(|_| anyhow::anyhow!("Failed to parse font file: {}", font_path.display()))?;
        Ok(Self {
            font: Some(font),
            ..Self::default()
        })
    }

    /// Try a few common system font locations
    pub fn with_system_font() -> Self {
        let font_paths = [
            "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
            "/usr/share/fonts/TTF/DejaVuSans.ttf",
            "/System/Library/Fonts/Helvetica.ttc",
            "C:\\Windows\\Fonts\\arial.ttf",
        ];

        for path in font_paths {
            if let Ok(renderer) = Self::with_font_path(Path::new(path)) {
                info!("Loaded preview font: {}", path);
                return renderer;
            }
        }

        warn!("No system font found, preview labels will be skipped");
        Self::default()
    }

    /// Render the preview for `result` over a copy of `image`.
    ///
    /// An empty result returns the image as-is.
    pub fn render<R: Rng>(&self, result: &DetectionResult, image: &RgbImage, rng: &mut R) -> RgbImage {
        let mut canvas = image.clone();
        if result.is_empty() {
            return canvas;
        }

        for instance in &result.instances {
            let color = Rgb([
                rng.gen_range(100..=255u8),
                rng.gen_range(100..=255u8),
                rng.gen_range(100..=255u8),
            ]);
            tint_region(&mut canvas, &instance.mask, color);

            let Some((cx, cy)) = centroid(&instance.mask) else {
                continue;
            };
            let Some(font) = &self.font else {
                continue;
            };
            let text_color = Rgb([color[0] - 100, color[1] - 100, color[2] - 100]);
            let text = format!("{}:{}", instance.label, truncate_score(instance.score));
            draw_text_mut(
                &mut canvas,
                text_color,
                cx as i32 - LABEL_SHIFT_X,
                label_top(cy, self.font_scale),
                self.font_scale,
                font,
                &text,
            );
        }

        canvas
    }
}

/// Top edge of a label whose baseline sits on the centroid row
pub fn label_top(cy: f64, font_scale: f32) -> i32 {
    cy as i32 - font_scale.round() as i32
}

/// Blend `color` into every pixel covered by `mask`
pub fn tint_region(canvas: &mut RgbImage, mask: &MaskImage, color: Rgb<u8>) {
    for (x, y, m) in mask.enumerate_pixels() {
        if m[0] == 0 || x >= canvas.width() || y >= canvas.height() {
            continue;
        }
        let pixel = canvas.get_pixel_mut(x, y);
        for c in 0..3 {
            pixel[c] = blend(pixel[c], color[c]);
        }
    }
}

/// `src * 0.2 + tint * 0.8`, rounded
pub fn blend(src: u8, tint: u8) -> u8 {
    let value = src as f32 * SOURCE_ALPHA + tint as f32 * (1.0 - SOURCE_ALPHA);
    value.round().clamp(0.0, 255.0) as u8
}

/// Mean (x, y) of the mask's set pixels
pub fn centroid(mask: &MaskImage) -> Option<(f64, f64)> {
    let mut sum_x = 0f64;
    let mut sum_y = 0f64;
    let mut count = 0u64;
    for (x, y, m) in mask.enumerate_pixels() {
        if m[0] != 0 {
            sum_x += x as f64;
            sum_y += y as f64;
            count += 1;
        }
    }
    (count > 0).then(|| (sum_x / count as f64, sum_y / count as f64))
}

/// First four characters of the score's printed form ("0.87654" -> "0.87")
pub fn truncate_score(score: f32) -> String {
    format!("{score:?}").chars().take(4).collect()
}
