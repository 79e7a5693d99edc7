//! Dual-model detail orchestration.
//!
//! For every output iteration the detailer obtains a base image, optionally
//! inpaints model B's regions first, then inpaints model A's regions
//! (optionally intersected with or cut by model B's combined mask). Each
//! region is one engine pass on top of the previous pass's output.

use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use anyhow::Result;
use image::RgbImage;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{info, warn};

use crate::config::{BitwiseOp, DetailerConfig};
use crate::detection::adapter::update_result_masks;
use crate::detection::masks::{bitwise_and_masks, combine_masks, is_all_black, subtract_masks};
use crate::detection::{Detector, ModelCatalog, PreviewRenderer, RegionFinder};
use crate::engine::{GenerationEngine, GenerationRequest};
use crate::error::{DetailError, DetailResult};
use crate::models::{DetectionResult, MaskImage, ModelEntry};
use crate::persist::ArtifactSink;
use crate::pipeline::{PassOutcome, PassPlan, RegionPasses, RunState};

/// Where each iteration's base image comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// The request is a text-to-image template; every iteration generates a
    /// fresh base image with seed `seed + n`
    Generate,
    /// The request's first init image is refined in every iteration
    Refine,
}

/// Everything a detail run produced, index-aligned by output iteration
#[derive(Debug, Clone, Default)]
pub struct DetailOutput {
    pub images: Vec<RgbImage>,
    /// Base seed of the run
    pub seed: i64,
    /// Info text of the first iteration
    pub info: String,
    pub all_prompts: Vec<String>,
    pub all_negative_prompts: Vec<String>,
    pub all_seeds: Vec<i64>,
    pub all_subseeds: Vec<i64>,
    pub infotexts: Vec<String>,
}

/// Replace random (-1) seeds with concrete ones
pub fn fix_seed<R: Rng>(request: &mut GenerationRequest, rng: &mut R) {
    if request.seed == -1 {
        request.seed = rng.gen_range(0..u32::MAX as i64);
    }
    if request.subseed == -1 {
        request.subseed = rng.gen_range(0..u32::MAX as i64);
    }
}

/// Apply `op` between one of A's masks and B's combined mask
pub fn apply_bitwise(op: BitwiseOp, mask: &MaskImage, combined_b: &MaskImage) -> DetailResult<MaskImage> {
    match op {
        BitwiseOp::None => Ok(mask.clone()),
        BitwiseOp::And => bitwise_and_masks(mask, combined_b),
        BitwiseOp::Subtract => subtract_masks(mask, combined_b),
    }
}

/// Filter A's detections against B's masks.
///
/// Instances are visited from the last index down; an instance whose mask
/// becomes empty is removed together with its mask. When B found nothing the
/// whole A set is dropped: without a B region there is nothing to overlap.
pub fn filter_by_bitwise(
    op: BitwiseOp,
    results_a: &mut DetectionResult,
    masks_a: &mut Vec<MaskImage>,
    masks_b: &[MaskImage],
) -> DetailResult<()> {
    if masks_a.len() != results_a.len() {
        return Err(DetailError::Alignment {
            expected: results_a.len(),
            actual: masks_a.len(),
        });
    }
    if masks_b.is_empty() {
        info!("No model B detections to overlap with model A masks");
        results_a.clear();
        masks_a.clear();
        return Ok(());
    }

    let combined = combine_masks(masks_b)?;
    for i in (0..masks_a.len()).rev() {
        masks_a[i] = apply_bitwise(op, &masks_a[i], &combined)?;
        if is_all_black(&masks_a[i]) {
            masks_a.remove(i);
            results_a.remove(i);
        }
    }
    Ok(())
}

pub struct Detailer<D, E, S> {
    config: DetailerConfig,
    model_a: Option<RegionFinder>,
    model_b: Option<RegionFinder>,
    detector: D,
    engine: E,
    sink: S,
    renderer: PreviewRenderer,
    rng: StdRng,
    state: RunState,
}

impl<D: Detector, E: GenerationEngine, S: ArtifactSink> Detailer<D, E, S> {
    /// Resolve the configured models in `catalog` and build a detailer
    pub fn new(
        config: DetailerConfig,
        catalog: &ModelCatalog,
        detector: D,
        engine: E,
        sink: S,
    ) -> Result<Self> {
        let model_a = catalog.resolve(&config.model_a.model)?.cloned();
        let model_b = catalog.resolve(&config.model_b.model)?.cloned();
        Self::from_entries(config, model_a, model_b, detector, engine, sink)
    }

    /// Build a detailer from already resolved models
    pub fn from_entries(
        config: DetailerConfig,
        model_a: Option<ModelEntry>,
        model_b: Option<ModelEntry>,
        detector: D,
        engine: E,
        sink: S,
    ) -> Result<Self> {
        config.validate()?;
        let model_a = model_a.map(|m| RegionFinder::new(m, &config.model_a));
        let model_b = model_b.map(|m| RegionFinder::new(m, &config.model_b));
        let state = RunState::new(config.count);
        Ok(Self {
            config,
            model_a,
            model_b,
            detector,
            engine,
            sink,
            renderer: PreviewRenderer::with_system_font(),
            rng: StdRng::from_entropy(),
            state,
        })
    }

    pub fn with_renderer(mut self, renderer: PreviewRenderer) -> Self {
        self.renderer = renderer;
        self
    }

    /// Seed the generator used for random seeds and preview colours
    pub fn with_rng_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    pub fn with_interrupt(mut self, flag: Arc<AtomicBool>) -> Self {
        self.state = self.state.with_interrupt(flag);
        self
    }

    pub fn config(&self) -> &DetailerConfig {
        &self.config
    }

    pub fn state(&self) -> &RunState {
        &self.state
    }

    /// Operator applied in the A stage; only active with a model B
    fn active_op(&self) -> BitwiseOp {
        if self.model_b.is_some() {
            self.config.bitwise_op
        } else {
            BitwiseOp::None
        }
    }

    fn label_a(&self) -> &'static str {
        match self.active_op() {
            BitwiseOp::None => "A",
            op => op.as_str(),
        }
    }

    /// Run all output iterations
    pub fn run(&mut self, request: GenerationRequest, mode: RunMode) -> Result<DetailOutput> {
        let mut template = request;
        fix_seed(&mut template, &mut self.rng);
        template
            .extra_generation_params
            .extend(self.config.extra_generation_params());
        let seed = template.seed;
        let subseed = template.subseed;
        let count = self.config.count;

        let (mut txt2img, mut p, original) = match mode {
            RunMode::Generate => {
                let p = GenerationRequest::inpaint_from(&template, &self.config);
                (Some(template.clone()), p, None)
            }
            RunMode::Refine => {
                let original = template
                    .init_images
                    .first()
                    .cloned()
                    .ok_or(DetailError::MissingInitImage)?;
                (None, template.clone(), Some(original))
            }
        };
        let adopt_prompts = mode == RunMode::Refine;

        let model_a = self.model_a.clone();
        let model_b = self.model_b.clone();
        let op = self.active_op();
        let label_a = self.label_a();

        let mut output = DetailOutput {
            seed,
            ..DetailOutput::default()
        };
        self.state = RunState::new(count).with_interrupt(self.state.interrupt_handle());

        for n in 0..count {
            if self.state.interrupted() {
                warn!("Interrupted after {} of {} output generations", n, count);
                break;
            }
            let start_seed = seed + n as i64;

            output.all_prompts.push(template.prompt.clone());
            output.all_negative_prompts.push(template.negative_prompt.clone());
            output.all_seeds.push(start_seed);
            output.all_subseeds.push(subseed + n as i64);

            let mut info_text = String::new();
            let mut init_image = match (&mut txt2img, &original) {
                (Some(txt), _) => {
                    info!("Processing initial image for output generation {}.", n + 1);
                    txt.seed = start_seed;
                    let mut processed = self.engine.generate(txt)?;
                    self.state.passes_done += 1;
                    let image = std::mem::take(&mut processed.images)
                        .into_iter()
                        .next()
                        .ok_or(DetailError::EmptyGeneration)?;
                    info_text = processed.info.clone();
                    if self.config.prompt.is_empty() {
                        p.prompt = processed.prompt.clone();
                    }
                    if self.config.negative_prompt.is_empty() {
                        p.negative_prompt = processed.negative_prompt.clone();
                    }
                    output.all_prompts[n] = processed.prompt;
                    output.all_negative_prompts[n] = processed.negative_prompt;
                    image
                }
                (None, Some(original)) => {
                    p.prompt = template.prompt.clone();
                    p.negative_prompt = template.negative_prompt.clone();
                    original.clone()
                }
                (None, None) => return Err(DetailError::MissingInitImage.into()),
            };
            p.cfg_scale = self.config.cfg_scale;

            output.infotexts.push(info_text.clone());
            output.images.push(init_image.clone());

            // Optional model B pass before model A
            if let (Some(finder_b), true) = (&model_b, self.config.preprocess_b) {
                let (mut results_b, masks_b) = finder_b.find(&mut self.detector, &init_image, "B")?;
                if masks_b.is_empty() {
                    info!(
                        "No model B detections for output generation {} with current settings.",
                        n + 1
                    );
                } else {
                    update_result_masks(&mut results_b, &masks_b)?;
                    self.show_preview(&results_b, &init_image, start_seed, &p.prompt);
                    let outcome =
                        self.run_stage(&mut p, &init_image, &masks_b, "B", n, start_seed, adopt_prompts)?;
                    if !outcome.is_noop() {
                        output.images[n] = outcome.image.clone();
                        init_image = outcome.image;
                    }
                }
            }

            // Primary model A pass
            if let Some(finder_a) = &model_a {
                let (mut results_a, mut masks_a) = finder_a.find(&mut self.detector, &init_image, label_a)?;
                if let (Some(finder_b), false) = (&model_b, op == BitwiseOp::None) {
                    let (_, masks_b) = finder_b.find(&mut self.detector, &init_image, "B")?;
                    filter_by_bitwise(op, &mut results_a, &mut masks_a, &masks_b)?;
                }

                let mut final_image = init_image.clone();
                if masks_a.is_empty() {
                    info!(
                        "No model {} detections for output generation {} with current settings.",
                        label_a,
                        n + 1
                    );
                } else {
                    update_result_masks(&mut results_a, &masks_a)?;
                    self.show_preview(&results_a, &init_image, start_seed, &p.prompt);
                    let outcome =
                        self.run_stage(&mut p, &init_image, &masks_a, label_a, n, start_seed, adopt_prompts)?;
                    if !outcome.is_noop() {
                        if adopt_prompts {
                            if let Some(last) = &outcome.last {
                                output.all_prompts[n] = last.prompt.clone();
                                output.all_negative_prompts[n] = last.negative_prompt.clone();
                            }
                        }
                        info_text = outcome.info;
                        final_image = outcome.image;
                        output.images[n] = final_image.clone();
                        output.infotexts[n] = info_text.clone();
                    }
                }

                if let Err(e) = self.sink.save_sample(&final_image, start_seed, &p.prompt, &info_text) {
                    warn!("Failed to save sample: {e:#}");
                }
            }

            self.state.job = format!("Generation {} out of {}", n + 1, self.state.job_count);
            info!("{}", self.state.job);
        }

        if !self.config.prompt.is_empty() || !self.config.negative_prompt.is_empty() {
            if let Some(first) = output.infotexts.first() {
                if let Err(e) = self.sink.write_params(first) {
                    warn!("Failed to write params: {e:#}");
                }
            }
        }

        output.info = output.infotexts.first().cloned().unwrap_or_default();
        Ok(output)
    }

    #[allow(clippy::too_many_arguments)]
    fn run_stage(
        &mut self,
        request: &mut GenerationRequest,
        source: &RgbImage,
        masks: &[MaskImage],
        label: &str,
        iteration: usize,
        start_seed: i64,
        adopt_prompts: bool,
    ) -> Result<PassOutcome> {
        self.state.add_jobs(masks.len());
        info!(
            "Processing {} model {} detections for output generation {}.",
            masks.len(),
            label,
            iteration + 1
        );
        request.seed = start_seed;
        let plan = PassPlan {
            label,
            iteration,
            start_seed,
            adopt_prompts,
        };
        RegionPasses::new(&mut self.engine, &mut self.sink, &mut self.state).run(request, source, masks, &plan)
    }

    fn show_preview(&mut self, result: &DetectionResult, image: &RgbImage, seed: i64, prompt: &str) {
        let preview = self.renderer.render(result, image, &mut self.rng);
        if let Err(e) = self.sink.save_preview(&preview, seed, prompt) {
            warn!("Failed to save preview: {e:#}");
        }
        self.state.current_image = Some(preview);
    }
}
