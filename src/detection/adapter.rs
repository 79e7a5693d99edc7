use std::collections::HashMap;
use std::path::PathBuf;

use image::{GrayImage, Luma, RgbImage};
use tracing::debug;

use crate::error::{DetailError, DetailResult};
use crate::models::{BoundingBox, DetectionInstance, DetectionResult, MaskImage, ModelEntry, ModelKind};

/// One raw instance as reported by an inference backend, before filtering
#[derive(Debug, Clone)]
pub struct RawInstance {
    pub bbox: BoundingBox,
    pub score: f32,
    pub class_id: usize,
    /// Segmentation mask; required for segmentation models
    pub mask: Option<GrayImage>,
}

/// Raw backend output for one image
#[derive(Debug, Clone, Default)]
pub struct RawPredictions {
    pub instances: Vec<RawInstance>,
    pub class_names: Vec<String>,
}

/// Something that can locate regions in an image
pub trait Detector {
    /// Run `model` on `image` and keep instances scoring strictly above
    /// `threshold`. `label` is prefixed onto every stored label.
    fn detect(
        &mut self,
        image: &RgbImage,
        model: &ModelEntry,
        threshold: f32,
        label: &str,
    ) -> anyhow::Result<DetectionResult>;
}

impl<D: Detector + ?Sized> Detector for &mut D {
    fn detect(
        &mut self,
        image: &RgbImage,
        model: &ModelEntry,
        threshold: f32,
        label: &str,
    ) -> anyhow::Result<DetectionResult> {
        (**self).detect(image, model, threshold, label)
    }
}

/// Loads and runs detection models
pub trait InferenceBackend {
    type Model;

    fn load(&self, entry: &ModelEntry, device: &str) -> anyhow::Result<Self::Model>;

    fn infer(&self, model: &mut Self::Model, image: &RgbImage) -> anyhow::Result<RawPredictions>;
}

/// Pick the inference device. Low-VRAM setups run on the CPU unless the
/// preferred device is `mps`.
pub fn select_device(preferred: &str, low_vram: bool) -> String {
    if preferred == "mps" {
        return preferred.to_string();
    }
    if low_vram {
        return "cpu".to_string();
    }
    preferred.to_string()
}

/// [`Detector`] over an [`InferenceBackend`], caching loaded models by
/// (model path, device)
pub struct ModelDetector<B: InferenceBackend> {
    backend: B,
    device: String,
    cache: HashMap<(PathBuf, String), B::Model>,
}

impl<B: InferenceBackend> ModelDetector<B> {
    pub fn new(backend: B, device: impl Into<String>) -> Self {
        Self {
            backend,
            device: device.into(),
            cache: HashMap::new(),
        }
    }

    pub fn device(&self) -> &str {
        &self.device
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Number of models currently loaded
    pub fn cached_models(&self) -> usize {
        self.cache.len()
    }
}

impl<B: InferenceBackend> Detector for ModelDetector<B> {
    fn detect(
        &mut self,
        image: &RgbImage,
        model: &ModelEntry,
        threshold: f32,
        label: &str,
    ) -> anyhow::Result<DetectionResult> {
        let key = (model.path.clone(), self.device.clone());
        if !self.cache.contains_key(&key) {
            debug!("Loading detection model {} on {}", model.title, self.device);
            let loaded = self.backend.load(model, &self.device)?;
            self.cache.insert(key.clone(), loaded);
        }
        let loaded = self
            .cache
            .get_mut(&key)
            .ok_or_else(|| anyhow::anyhow!("model cache lost {}", model.title))?;

        let raw = self.backend.infer(loaded, image)?;
        let result = normalize(raw, model.kind, image.dimensions(), threshold, label)?;
        debug!(
            "Model {} ({}) kept {} detections above {:.2}",
            model.title,
            model.kind.as_str(),
            result.len(),
            threshold
        );
        Ok(result)
    }
}

/// Turn raw backend output into a [`DetectionResult`].
///
/// Bbox models get a filled rectangle per box and the bare `label`;
/// segmentation models keep their own masks and get `label-classname`.
pub fn normalize(
    raw: RawPredictions,
    kind: ModelKind,
    (width, height): (u32, u32),
    threshold: f32,
    label: &str,
) -> DetailResult<DetectionResult> {
    let mut instances = Vec::new();

    for (index, inst) in raw.instances.into_iter().enumerate() {
        if !(inst.score > threshold) {
            continue;
        }

        let (mask, stored_label) = match kind {
            ModelKind::Bbox => (inst.bbox.to_mask(width, height), label.to_string()),
            ModelKind::Segmentation => {
                let mask = inst.mask.ok_or(DetailError::MissingMask { index })?;
                let class_name = raw
                    .class_names
                    .get(inst.class_id)
                    .cloned()
                    .unwrap_or_else(|| inst.class_id.to_string());
                (binarize(&mask), format!("{label}-{class_name}"))
            }
        };

        instances.push(DetectionInstance {
            label: stored_label,
            bbox: inst.bbox,
            mask,
            score: inst.score,
        });
    }

    Ok(DetectionResult::new(instances))
}

/// Any nonzero pixel becomes 255
pub fn binarize(mask: &GrayImage) -> MaskImage {
    let mut out = mask.clone();
    for pixel in out.pixels_mut() {
        if pixel[0] != 0 {
            *pixel = Luma([255]);
        }
    }
    out
}

/// One binary mask image per instance, in instance order
pub fn create_segmasks(result: &DetectionResult) -> Vec<MaskImage> {
    result.instances.iter().map(|i| binarize(&i.mask)).collect()
}

/// Replace each instance's mask with the mask at the same index
pub fn update_result_masks(result: &mut DetectionResult, masks: &[MaskImage]) -> DetailResult<()> {
    if masks.len() != result.len() {
        return Err(DetailError::Alignment {
            expected: result.len(),
            actual: masks.len(),
        });
    }
    for (instance, mask) in result.instances.iter_mut().zip(masks) {
        instance.mask = binarize(mask);
    }
    Ok(())
}
