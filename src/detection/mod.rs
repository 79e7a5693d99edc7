pub mod adapter;
pub mod catalog;
pub mod masks;
pub mod preview;
pub mod replay;

use image::RgbImage;
use tracing::debug;

use crate::config::ModelSettings;
use crate::models::{DetectionResult, MaskImage, ModelEntry};

pub use adapter::{Detector, InferenceBackend, ModelDetector, RawInstance, RawPredictions};
pub use catalog::ModelCatalog;
pub use preview::PreviewRenderer;

/// Detection plus mask derivation for one model slot
#[derive(Debug, Clone)]
pub struct RegionFinder {
    pub model: ModelEntry,
    /// Confidence threshold as a fraction
    pub threshold: f32,
    pub dilation: u32,
    pub offset_x: i32,
    pub offset_y: i32,
}

impl RegionFinder {
    pub fn new(model: ModelEntry, settings: &ModelSettings) -> Self {
        Self {
            model,
            threshold: settings.threshold(),
            dilation: settings.dilation,
            offset_x: settings.offset_x,
            offset_y: settings.offset_y,
        }
    }

    /// Detect regions in `image` and derive their masks.
    ///
    /// Masks are dilated once and then offset. The returned result still
    /// holds the raw detector masks; callers write the derived masks back
    /// with [`adapter::update_result_masks`] once any filtering is done.
    pub fn find<D: Detector + ?Sized>(
        &self,
        detector: &mut D,
        image: &RgbImage,
        label: &str,
    ) -> anyhow::Result<(DetectionResult, Vec<MaskImage>)> {
        let result = detector.detect(image, &self.model, self.threshold, label)?;
        let masks = adapter::create_segmasks(&result);
        let masks = masks::dilate_masks(masks, self.dilation, 1);
        let masks = masks::offset_masks(masks, self.offset_x, self.offset_y);
        debug!(
            "Model {} ({}): {} masks after dilation {} and offset ({}, {})",
            label,
            self.model.title,
            masks.len(),
            self.dilation,
            self.offset_x,
            self.offset_y
        );
        Ok((result, masks))
    }
}
