#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use dddetail::{
    ArtifactSink, BoundingBox, DetailerConfig, DetectionInstance, DetectionResult, Detector,
    GenerationEngine, GenerationRequest, MaskImage, ModelEntry, ModelKind, ModelSettings, Processed,
};
use image::{Rgb, RgbImage};

/// Side of every test image and mask
pub const SIZE: u32 = 64;

/// Creates a SIZE x SIZE grey image whose pixel (0, 0) carries `tag` in
/// the red channel. Engines and detectors below read the tag back to tell
/// images apart.
pub fn tagged_image(tag: u8) -> RgbImage {
    let mut img = RgbImage::from_pixel(SIZE, SIZE, Rgb([128, 128, 128]));
    img.put_pixel(0, 0, Rgb([tag, 0, 0]));
    img
}

pub fn image_tag(img: &RgbImage) -> u8 {
    img.get_pixel(0, 0)[0]
}

/// Filled rectangle with inclusive corners
pub fn rect_mask(x0: u32, y0: u32, x1: u32, y1: u32) -> MaskImage {
    BoundingBox::new(x0 as f32, y0 as f32, x1 as f32, y1 as f32).to_mask(SIZE, SIZE)
}

pub fn rect_instance(x0: u32, y0: u32, x1: u32, y1: u32, score: f32) -> DetectionInstance {
    DetectionInstance {
        label: "A".to_string(),
        bbox: BoundingBox::new(x0 as f32, y0 as f32, x1 as f32, y1 as f32),
        mask: rect_mask(x0, y0, x1, y1),
        score,
    }
}

pub fn result_of(instances: Vec<DetectionInstance>) -> DetectionResult {
    DetectionResult::new(instances)
}

/// Number of set pixels
pub fn area(mask: &MaskImage) -> usize {
    mask.pixels().filter(|p| p[0] != 0).count()
}

pub fn bbox_entry(name: &str) -> ModelEntry {
    ModelEntry {
        title: format!("bbox/{name}.pth"),
        short_name: format!("bbox_{name}"),
        path: PathBuf::from(format!("models/bbox/{name}.pth")),
        kind: ModelKind::Bbox,
    }
}

pub fn segm_entry(name: &str) -> ModelEntry {
    ModelEntry {
        title: format!("segm/{name}.pth"),
        short_name: format!("segm_{name}"),
        path: PathBuf::from(format!("models/segm/{name}.pth")),
        kind: ModelKind::Segmentation,
    }
}

/// Detailer settings with dilation off so masks stay exactly as scripted
pub fn test_config(model_a: Option<&ModelEntry>, model_b: Option<&ModelEntry>) -> DetailerConfig {
    let slot = |entry: Option<&ModelEntry>| ModelSettings {
        model: entry.map(|e| e.title.clone()).unwrap_or_else(|| "None".to_string()),
        dilation: 0,
        ..ModelSettings::default()
    };
    DetailerConfig {
        model_a: slot(model_a),
        model_b: slot(model_b),
        ..DetailerConfig::default()
    }
}

/// Request template sized like the test images
pub fn test_request(seed: i64) -> GenerationRequest {
    GenerationRequest {
        prompt: "portrait".to_string(),
        negative_prompt: "blurry".to_string(),
        seed,
        subseed: seed,
        width: SIZE,
        height: SIZE,
        ..GenerationRequest::default()
    }
}

/// One recorded detector invocation
#[derive(Debug, Clone)]
pub struct DetectCall {
    pub model: String,
    pub label: String,
    pub threshold: f32,
    pub image_tag: u8,
}

/// Detector returning scripted results per model title.
///
/// Each call consumes the next scripted result; the last one repeats.
/// Unscripted models detect nothing.
#[derive(Default)]
pub struct ScriptedDetector {
    scripts: HashMap<String, VecDeque<DetectionResult>>,
    pub calls: Vec<DetectCall>,
}

impl ScriptedDetector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(mut self, model: &ModelEntry, results: Vec<DetectionResult>) -> Self {
        self.scripts.insert(model.title.clone(), results.into());
        self
    }

    pub fn calls_for(&self, model: &ModelEntry) -> Vec<&DetectCall> {
        self.calls.iter().filter(|c| c.model == model.title).collect()
    }
}

impl Detector for ScriptedDetector {
    fn detect(
        &mut self,
        image: &RgbImage,
        model: &ModelEntry,
        threshold: f32,
        label: &str,
    ) -> anyhow::Result<DetectionResult> {
        self.calls.push(DetectCall {
            model: model.title.clone(),
            label: label.to_string(),
            threshold,
            image_tag: image_tag(image),
        });
        let Some(queue) = self.scripts.get_mut(&model.title) else {
            return Ok(DetectionResult::empty());
        };
        let mut result = if queue.len() > 1 {
            queue.pop_front().unwrap_or_default()
        } else {
            queue.front().cloned().unwrap_or_default()
        };
        for instance in &mut result.instances {
            instance.label = label.to_string();
        }
        Ok(result)
    }
}

/// What the engine saw on one call
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub img2img: bool,
    pub init_tag: Option<u8>,
    pub mask: Option<MaskImage>,
    pub seed: i64,
    pub subseed: i64,
    pub prompt: String,
    pub negative_prompt: String,
    pub sampler_name: String,
    pub cfg_scale: f32,
    pub extra_generation_params: BTreeMap<String, String>,
}

/// Engine that returns its input with pixel (0, 0) set to the 1-based call
/// number. Seeds are echoed back as the engine's reported seeds.
#[derive(Default)]
pub struct TaggingEngine {
    pub requests: Vec<RecordedRequest>,
    /// Report `"<prompt> +"` as the prompt actually used
    pub rewrite_prompts: bool,
    /// Raise the flag once this many calls have completed
    pub trip_after: Option<(usize, Arc<AtomicBool>)>,
}

impl TaggingEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn img2img_requests(&self) -> Vec<&RecordedRequest> {
        self.requests.iter().filter(|r| r.img2img).collect()
    }

    pub fn txt2img_requests(&self) -> Vec<&RecordedRequest> {
        self.requests.iter().filter(|r| !r.img2img).collect()
    }
}

impl GenerationEngine for TaggingEngine {
    fn generate(&mut self, request: &GenerationRequest) -> anyhow::Result<Processed> {
        self.requests.push(RecordedRequest {
            img2img: request.is_img2img(),
            init_tag: request.init_images.first().map(image_tag),
            mask: request.image_mask.clone(),
            seed: request.seed,
            subseed: request.subseed,
            prompt: request.prompt.clone(),
            negative_prompt: request.negative_prompt.clone(),
            sampler_name: request.sampler_name.clone(),
            cfg_scale: request.cfg_scale,
            extra_generation_params: request.extra_generation_params.clone(),
        });
        let tag = self.requests.len() as u8;

        let mut image = match request.init_images.first() {
            Some(init) => init.clone(),
            None => RgbImage::new(request.width, request.height),
        };
        image.put_pixel(0, 0, Rgb([tag, 0, 0]));

        if let Some((after, flag)) = &self.trip_after {
            if self.requests.len() >= *after {
                flag.store(true, Ordering::SeqCst);
            }
        }

        let prompt = if self.rewrite_prompts {
            format!("{} +", request.prompt)
        } else {
            request.prompt.clone()
        };
        Ok(Processed {
            images: vec![image],
            seed: request.seed,
            subseed: request.subseed,
            prompt,
            negative_prompt: request.negative_prompt.clone(),
            info: format!("pass {tag}"),
        })
    }
}

/// Engine that reports success without producing an image
pub struct BlankEngine;

impl GenerationEngine for BlankEngine {
    fn generate(&mut self, request: &GenerationRequest) -> anyhow::Result<Processed> {
        Ok(Processed {
            images: Vec::new(),
            seed: request.seed,
            subseed: request.subseed,
            prompt: request.prompt.clone(),
            negative_prompt: request.negative_prompt.clone(),
            info: String::new(),
        })
    }
}

/// Sink remembering everything it was handed
#[derive(Default)]
pub struct RecordingSink {
    pub previews: Vec<(u8, i64)>,
    pub masks: Vec<(MaskImage, i64)>,
    /// (image tag, seed, info)
    pub samples: Vec<(u8, i64, String)>,
    pub params: Vec<String>,
    /// Fail every call, to check that saving stays best effort
    pub fail: bool,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    fn check(&self) -> anyhow::Result<()> {
        if self.fail {
            anyhow::bail!("disk full");
        }
        Ok(())
    }
}

impl ArtifactSink for RecordingSink {
    fn save_preview(&mut self, image: &RgbImage, seed: i64, _prompt: &str) -> anyhow::Result<()> {
        self.check()?;
        self.previews.push((image_tag(image), seed));
        Ok(())
    }

    fn save_mask(&mut self, mask: &MaskImage, seed: i64, _prompt: &str) -> anyhow::Result<()> {
        self.check()?;
        self.masks.push((mask.clone(), seed));
        Ok(())
    }

    fn save_sample(&mut self, image: &RgbImage, seed: i64, _prompt: &str, info: &str) -> anyhow::Result<()> {
        self.check()?;
        self.samples.push((image_tag(image), seed, info.to_string()));
        Ok(())
    }

    fn write_params(&mut self, info: &str) -> anyhow::Result<()> {
        self.check()?;
        self.params.push(info.to_string());
        Ok(())
    }
}
