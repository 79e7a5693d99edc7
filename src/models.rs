use image::GrayImage;
use std::path::PathBuf;

/// Single-channel image-sized mask. Pixels are either 0 or 255.
pub type MaskImage = GrayImage;

/// Axis-aligned box in image pixel coordinates (x0, y0, x1, y1)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub x0: f32,
    pub y0: f32,
    pub x1: f32,
    pub y1: f32,
}

impl BoundingBox {
    pub fn new(x0: f32, y0: f32, x1: f32, y1: f32) -> Self {
        Self { x0, y0, x1, y1 }
    }

    /// Render the box as a filled mask of the given size.
    ///
    /// Corners are truncated to integers and both are inclusive; the
    /// rectangle is clamped to the mask bounds.
    pub fn to_mask(&self, width: u32, height: u32) -> MaskImage {
        let mut mask = GrayImage::new(width, height);
        if width == 0 || height == 0 {
            return mask;
        }

        let max_x = width as i64 - 1;
        let max_y = height as i64 - 1;
        let x0 = (self.x0 as i64).clamp(0, max_x);
        let y0 = (self.y0 as i64).clamp(0, max_y);
        let x1 = (self.x1 as i64).clamp(0, max_x);
        let y1 = (self.y1 as i64).clamp(0, max_y);

        for y in y0.min(y1)..=y0.max(y1) {
            for x in x0.min(x1)..=x0.max(x1) {
                mask.put_pixel(x as u32, y as u32, image::Luma([255]));
            }
        }
        mask
    }
}

/// One detected region
#[derive(Debug, Clone)]
pub struct DetectionInstance {
    /// Detector tag, optionally followed by `-classname`
    pub label: String,
    pub bbox: BoundingBox,
    /// Segmentation mask, same dimensions as the source image
    pub mask: MaskImage,
    /// Confidence in [0, 1]
    pub score: f32,
}

/// Output of one detector invocation.
///
/// Every instance carries its own label, box, mask and score, so filtering
/// or deleting an instance always removes all four together.
#[derive(Debug, Clone, Default)]
pub struct DetectionResult {
    pub instances: Vec<DetectionInstance>,
}

impl DetectionResult {
    pub fn new(instances: Vec<DetectionInstance>) -> Self {
        Self { instances }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    pub fn labels(&self) -> Vec<&str> {
        self.instances.iter().map(|i| i.label.as_str()).collect()
    }

    pub fn boxes(&self) -> Vec<BoundingBox> {
        self.instances.iter().map(|i| i.bbox).collect()
    }

    pub fn scores(&self) -> Vec<f32> {
        self.instances.iter().map(|i| i.score).collect()
    }

    /// Remove the instance at `index`
    pub fn remove(&mut self, index: usize) -> DetectionInstance {
        self.instances.remove(index)
    }

    pub fn clear(&mut self) {
        self.instances.clear();
    }
}

/// How a detection model reports regions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModelKind {
    /// Boxes only; masks are filled rectangles
    Bbox,
    /// Per-instance segmentation masks
    Segmentation,
}

impl ModelKind {
    /// Infer the kind from a model path (`.../segm/...` or `.../bbox/...`)
    pub fn from_path(path: &std::path::Path) -> Option<Self> {
        let text = path.to_string_lossy();
        if text.contains("segm") {
            Some(ModelKind::Segmentation)
        } else if text.contains("bbox") {
            Some(ModelKind::Bbox)
        } else {
            None
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ModelKind::Bbox => "bbox",
            ModelKind::Segmentation => "segm",
        }
    }
}

/// A detection model found in the catalog
#[derive(Debug, Clone, PartialEq)]
pub struct ModelEntry {
    /// Identifier shown to users, the path relative to the models root
    pub title: String,
    /// File stem with path separators flattened to `_`
    pub short_name: String,
    pub path: PathBuf,
    pub kind: ModelKind,
}
