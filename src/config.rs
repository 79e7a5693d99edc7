use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::detection::catalog::is_no_model;
use crate::error::{DetailError, DetailResult};

/// Name recorded in the `Script` generation parameter
pub const DETECTION_DETAILER: &str = "Detection Detailer";

/// Set operation between model A's masks and model B's combined mask
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum BitwiseOp {
    #[default]
    #[serde(rename = "None")]
    None,
    /// Keep only the parts of A inside B
    #[serde(rename = "A&B")]
    And,
    /// Keep only the parts of A outside B
    #[serde(rename = "A-B")]
    Subtract,
}

impl BitwiseOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            BitwiseOp::None => "None",
            BitwiseOp::And => "A&B",
            BitwiseOp::Subtract => "A-B",
        }
    }
}

/// Detection settings for one model slot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelSettings {
    /// Catalog identifier, or "None"
    pub model: String,
    /// Confidence threshold in percent
    pub confidence: f32,
    pub dilation: u32,
    pub offset_x: i32,
    pub offset_y: i32,
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            model: "None".to_string(),
            confidence: 30.0,
            dilation: 4,
            offset_x: 0,
            offset_y: 0,
        }
    }
}

impl ModelSettings {
    pub fn is_enabled(&self) -> bool {
        !is_no_model(&self.model)
    }

    /// Threshold as a fraction
    pub fn threshold(&self) -> f32 {
        self.confidence / 100.0
    }

    fn validate(&self, slot: &str) -> DetailResult<()> {
        if !(0.0..=100.0).contains(&self.confidence) {
            return Err(DetailError::config(format!(
                "confidence ({slot}) must be within 0..=100, got {}",
                self.confidence
            )));
        }
        if self.dilation > 255 {
            return Err(DetailError::config(format!(
                "dilation ({slot}) must be within 0..=255, got {}",
                self.dilation
            )));
        }
        for (name, value) in [("x offset", self.offset_x), ("y offset", self.offset_y)] {
            if !(-200..=200).contains(&value) {
                return Err(DetailError::config(format!(
                    "{name} ({slot}) must be within -200..=200, got {value}"
                )));
            }
        }
        Ok(())
    }
}

/// Where and whether intermediate artifacts are written
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SaveOptions {
    pub save_previews: bool,
    pub previews_dir: PathBuf,
    pub save_masks: bool,
    pub masks_dir: PathBuf,
    pub save_samples: bool,
    pub samples_dir: PathBuf,
    /// Extension of saved images
    pub samples_format: String,
    /// Receives the first infotext when a detail prompt is set
    pub params_path: Option<PathBuf>,
}

impl Default for SaveOptions {
    fn default() -> Self {
        Self {
            save_previews: false,
            previews_dir: PathBuf::from("outputs/masks-previews"),
            save_masks: false,
            masks_dir: PathBuf::from("outputs/masks"),
            save_samples: true,
            samples_dir: PathBuf::from("outputs/samples"),
            samples_format: "png".to_string(),
            params_path: None,
        }
    }
}

/// All detailer settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetailerConfig {
    /// Prompt for the detail passes; empty keeps the base prompt
    pub prompt: String,
    pub negative_prompt: String,
    pub model_a: ModelSettings,
    /// Inpaint model B detections before model A runs
    pub preprocess_b: bool,
    pub bitwise_op: BitwiseOp,
    pub model_b: ModelSettings,
    pub mask_blur: u32,
    pub denoising_strength: f32,
    pub inpaint_full_res: bool,
    pub inpaint_full_res_padding: u32,
    pub cfg_scale: f32,
    /// Number of output iterations
    pub count: usize,
    pub models_dir: PathBuf,
    pub model_extensions: Vec<String>,
    pub device: String,
    pub low_vram: bool,
    pub font_path: Option<PathBuf>,
    pub save: SaveOptions,
}

impl Default for DetailerConfig {
    fn default() -> Self {
        Self {
            prompt: String::new(),
            negative_prompt: String::new(),
            model_a: ModelSettings::default(),
            preprocess_b: false,
            bitwise_op: BitwiseOp::None,
            model_b: ModelSettings::default(),
            mask_blur: 4,
            denoising_strength: 0.4,
            inpaint_full_res: true,
            inpaint_full_res_padding: 32,
            cfg_scale: 7.0,
            count: 1,
            models_dir: PathBuf::from("models/mmdet"),
            model_extensions: vec!["pth".to_string()],
            device: "cpu".to_string(),
            low_vram: false,
            font_path: None,
            save: SaveOptions::default(),
        }
    }
}

impl DetailerConfig {
    pub fn validate(&self) -> DetailResult<()> {
        self.model_a.validate("A")?;
        self.model_b.validate("B")?;
        if self.mask_blur > 64 {
            return Err(DetailError::config(format!(
                "mask blur must be within 0..=64, got {}",
                self.mask_blur
            )));
        }
        if !(0.0..=1.0).contains(&self.denoising_strength) {
            return Err(DetailError::config(format!(
                "denoising strength must be within 0..=1, got {}",
                self.denoising_strength
            )));
        }
        if self.inpaint_full_res_padding > 256 {
            return Err(DetailError::config(format!(
                "inpaint padding must be within 0..=256, got {}",
                self.inpaint_full_res_padding
            )));
        }
        if !(0.0..=30.0).contains(&self.cfg_scale) {
            return Err(DetailError::config(format!(
                "cfg scale must be within 0..=30, got {}",
                self.cfg_scale
            )));
        }
        if self.count == 0 {
            return Err(DetailError::config("count must be at least 1"));
        }
        Ok(())
    }

    /// Parameters recorded alongside every generated image
    pub fn extra_generation_params(&self) -> BTreeMap<String, String> {
        let mut params = BTreeMap::new();
        if !self.prompt.is_empty() {
            params.insert("DDetailer prompt".to_string(), self.prompt.clone());
        }
        if !self.negative_prompt.is_empty() {
            params.insert("DDetailer neg prompt".to_string(), self.negative_prompt.clone());
        }
        let entries = [
            ("DDetailer model a", self.model_a.model.clone()),
            ("DDetailer conf a", self.model_a.confidence.to_string()),
            ("DDetailer dilation a", self.model_a.dilation.to_string()),
            ("DDetailer offset x a", self.model_a.offset_x.to_string()),
            ("DDetailer offset y a", self.model_a.offset_y.to_string()),
            ("DDetailer preprocess b", self.preprocess_b.to_string()),
            ("DDetailer bitwise", self.bitwise_op.as_str().to_string()),
            ("DDetailer model b", self.model_b.model.clone()),
            ("DDetailer conf b", self.model_b.confidence.to_string()),
            ("DDetailer dilation b", self.model_b.dilation.to_string()),
            ("DDetailer offset x b", self.model_b.offset_x.to_string()),
            ("DDetailer offset y b", self.model_b.offset_y.to_string()),
            ("DDetailer mask blur", self.mask_blur.to_string()),
            ("DDetailer denoising", self.denoising_strength.to_string()),
            ("DDetailer inpaint full", self.inpaint_full_res.to_string()),
            ("DDetailer inpaint padding", self.inpaint_full_res_padding.to_string()),
            ("DDetailer cfg", self.cfg_scale.to_string()),
            ("Script", DETECTION_DETAILER.to_string()),
        ];
        for (key, value) in entries {
            params.insert(key.to_string(), value);
        }
        params
    }
}

pub fn load_config(path: &Path) -> anyhow::Result<DetailerConfig> {
    let contents = fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("Failed to read config {}: {e}", path.display()))?;
    let config: DetailerConfig = serde_json::from_str(&contents)
        .map_err(|e| anyhow::anyhow!("Failed to parse config {}: {e}", path.display()))?;
    config.validate()?;
    Ok(config)
}
