pub mod webui;

use std::collections::BTreeMap;

use image::RgbImage;

use crate::config::DetailerConfig;
use crate::models::MaskImage;

pub use webui::WebUiEngine;

/// Samplers that cannot run img2img; detail passes fall back to DDIM
const TXT2IMG_ONLY_SAMPLERS: [&str; 2] = ["PLMS", "UniPC"];

/// Inpainting fill mode: keep the original content under the mask
pub const FILL_ORIGINAL: u32 = 1;

/// Parameters of one generation call.
///
/// Without init images the request is a plain text-to-image generation;
/// with them it is img2img, inpainting `image_mask` when set.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub prompt: String,
    pub negative_prompt: String,
    pub seed: i64,
    pub subseed: i64,
    pub subseed_strength: f32,
    pub sampler_name: String,
    pub steps: u32,
    pub cfg_scale: f32,
    pub width: u32,
    pub height: u32,
    pub denoising_strength: f32,
    pub mask_blur: u32,
    pub inpainting_fill: u32,
    pub inpaint_full_res: bool,
    pub inpaint_full_res_padding: u32,
    pub init_images: Vec<RgbImage>,
    pub image_mask: Option<MaskImage>,
    pub extra_generation_params: BTreeMap<String, String>,
}

impl Default for GenerationRequest {
    fn default() -> Self {
        Self {
            prompt: String::new(),
            negative_prompt: String::new(),
            seed: -1,
            subseed: -1,
            subseed_strength: 0.0,
            sampler_name: "Euler a".to_string(),
            steps: 20,
            cfg_scale: 7.0,
            width: 512,
            height: 512,
            denoising_strength: 0.75,
            mask_blur: 4,
            inpainting_fill: FILL_ORIGINAL,
            inpaint_full_res: false,
            inpaint_full_res_padding: 32,
            init_images: Vec::new(),
            image_mask: None,
            extra_generation_params: BTreeMap::new(),
        }
    }
}

impl GenerationRequest {
    pub fn is_img2img(&self) -> bool {
        !self.init_images.is_empty()
    }

    /// Build the inpainting template used for detail passes on top of a
    /// text-to-image run.
    pub fn inpaint_from(txt2img: &GenerationRequest, config: &DetailerConfig) -> Self {
        let sampler_name = if TXT2IMG_ONLY_SAMPLERS.contains(&txt2img.sampler_name.as_str()) {
            "DDIM".to_string()
        } else {
            txt2img.sampler_name.clone()
        };
        let prompt = if config.prompt.is_empty() {
            txt2img.prompt.clone()
        } else {
            config.prompt.clone()
        };
        let negative_prompt = if config.negative_prompt.is_empty() {
            txt2img.negative_prompt.clone()
        } else {
            config.negative_prompt.clone()
        };

        Self {
            prompt,
            negative_prompt,
            sampler_name,
            denoising_strength: config.denoising_strength,
            mask_blur: config.mask_blur,
            inpainting_fill: FILL_ORIGINAL,
            inpaint_full_res: config.inpaint_full_res,
            inpaint_full_res_padding: config.inpaint_full_res_padding,
            init_images: Vec::new(),
            image_mask: None,
            ..txt2img.clone()
        }
    }
}

/// Result of one generation call
#[derive(Debug, Clone)]
pub struct Processed {
    pub images: Vec<RgbImage>,
    pub seed: i64,
    pub subseed: i64,
    pub prompt: String,
    pub negative_prompt: String,
    /// Human-readable generation parameters
    pub info: String,
}

/// The image generator driven by the detail passes
pub trait GenerationEngine {
    fn generate(&mut self, request: &GenerationRequest) -> anyhow::Result<Processed>;
}

impl<E: GenerationEngine + ?Sized> GenerationEngine for &mut E {
    fn generate(&mut self, request: &GenerationRequest) -> anyhow::Result<Processed> {
        (**self).generate(request)
    }
}

impl<E: GenerationEngine + ?Sized> GenerationEngine for Box<E> {
    fn generate(&mut self, request: &GenerationRequest) -> anyhow::Result<Processed> {
        (**self).generate(request)
    }
}
