//! Backend that replays predictions exported by an external detector.
//!
//! For a model with short name `bbox_face`, predictions are read from
//! `<dir>/bbox_face.json`:
//!
//! ```json
//! {
//!   "class_names": ["face"],
//!   "instances": [
//!     { "bbox": [10, 12, 40, 48], "score": 0.91, "class_id": 0, "mask": "face_0.png" }
//!   ]
//! }
//! ```
//!
//! Mask paths are relative to the JSON file.

use std::path::{Path, PathBuf};

use image::RgbImage;
use serde::Deserialize;

use crate::detection::adapter::{InferenceBackend, RawInstance, RawPredictions};
use crate::models::{BoundingBox, ModelEntry};

#[derive(Debug, Clone, Deserialize)]
struct PredictionFile {
    #[serde(default)]
    class_names: Vec<String>,
    #[serde(default)]
    instances: Vec<PredictionRecord>,
}

#[derive(Debug, Clone, Deserialize)]
struct PredictionRecord {
    bbox: [f32; 4],
    score: f32,
    #[serde(default)]
    class_id: usize,
    #[serde(default)]
    mask: Option<PathBuf>,
}

/// Predictions loaded for one model
pub struct ReplayModel {
    predictions: RawPredictions,
}

pub struct PredictionFileBackend {
    dir: PathBuf,
}

impl PredictionFileBackend {
    pub fn new<P: AsRef<Path>>(dir: P) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    pub fn prediction_path(&self, entry: &ModelEntry) -> PathBuf {
        self.dir.join(format!("{}.json", entry.short_name))
    }
}

impl InferenceBackend for PredictionFileBackend {
    type Model = ReplayModel;

    fn load(&self, entry: &ModelEntry, _device: &str) -> anyhow::Result<ReplayModel> {
        let path = self.prediction_path(entry);
        let contents = std::fs::read_to_string(&path)
            .map_err(|e| anyhow::anyhow!("Failed to read predictions {}: {e}", path.display()))?;
        let file: PredictionFile = serde_json::from_str(&contents)
            .map_err(|e| anyhow::anyhow!("Failed to parse predictions {}: {e}", path.display()))?;
        let base = path.parent().unwrap_or(Path::new("."));

        let mut instances = Vec::with_capacity(file.instances.len());
        for record in file.instances {
            let mask = match record.mask {
                Some(mask_path) => {
                    let full = base.join(&mask_path);
                    let mask = image::open(&full)
                        .map_err(|e| anyhow::anyhow!("Failed to load mask {}: {e}", full.display()))?
                        .to_luma8();
                    Some(mask)
                }
                None => None,
            };
            let [x0, y0, x1, y1] = record.bbox;
            instances.push(RawInstance {
                bbox: BoundingBox::new(x0, y0, x1, y1),
                score: record.score,
                class_id: record.class_id,
                mask,
            });
        }

        Ok(ReplayModel {
            predictions: RawPredictions {
                instances,
                class_names: file.class_names,
            },
        })
    }

    fn infer(&self, model: &mut ReplayModel, image: &RgbImage) -> anyhow::Result<RawPredictions> {
        for inst in &model.predictions.instances {
            if let Some(mask) = &inst.mask {
                if mask.dimensions() != image.dimensions() {
                    anyhow::bail!(
                        "Replayed mask is {:?} but the image is {:?}",
                        mask.dimensions(),
                        image.dimensions()
                    );
                }
            }
        }
        Ok(model.predictions.clone())
    }
}
