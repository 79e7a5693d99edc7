use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::Result;
use image::RgbImage;
use tracing::{info, warn};

use crate::engine::{GenerationEngine, GenerationRequest, Processed};
use crate::error::DetailError;
use crate::models::MaskImage;
use crate::persist::ArtifactSink;

/// Progress of a detail run, visible to whoever drives it
#[derive(Debug, Clone)]
pub struct RunState {
    /// Total work units announced so far
    pub job_count: usize,
    /// Generation passes executed, base generations included
    pub passes_done: usize,
    /// Human-readable progress line
    pub job: String,
    /// Most recent preview
    pub current_image: Option<RgbImage>,
    interrupt: Arc<AtomicBool>,
}

impl RunState {
    pub fn new(job_count: usize) -> Self {
        Self {
            job_count,
            passes_done: 0,
            job: String::new(),
            current_image: None,
            interrupt: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Share an externally owned stop flag
    pub fn with_interrupt(mut self, flag: Arc<AtomicBool>) -> Self {
        self.interrupt = flag;
        self
    }

    pub fn interrupt_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.interrupt)
    }

    pub fn interrupt(&self) {
        self.interrupt.store(true, Ordering::SeqCst);
    }

    pub fn interrupted(&self) -> bool {
        self.interrupt.load(Ordering::SeqCst)
    }

    pub fn add_jobs(&mut self, count: usize) {
        self.job_count += count;
    }
}

/// Describes one stage's batch of passes
#[derive(Debug, Clone)]
pub struct PassPlan<'a> {
    /// Model label used in log lines ("A", "B", "A&B", ...)
    pub label: &'a str,
    /// Output iteration, zero-based
    pub iteration: usize,
    /// Seed recorded in saved mask names
    pub start_seed: i64,
    /// Copy the prompts each pass reports back into the request
    pub adopt_prompts: bool,
}

/// What a batch of passes produced
#[derive(Debug, Clone)]
pub struct PassOutcome {
    /// Image after the last pass, or the source when no pass ran
    pub image: RgbImage,
    /// Info text of the last pass, empty when no pass ran
    pub info: String,
    pub passes: usize,
    pub last: Option<Processed>,
}

impl PassOutcome {
    pub fn is_noop(&self) -> bool {
        self.passes == 0
    }
}

/// Runs one inpainting pass per mask, each on top of the previous result
pub struct RegionPasses<'a, E, S> {
    engine: &'a mut E,
    sink: &'a mut S,
    state: &'a mut RunState,
}

impl<'a, E: GenerationEngine, S: ArtifactSink> RegionPasses<'a, E, S> {
    pub fn new(engine: &'a mut E, sink: &'a mut S, state: &'a mut RunState) -> Self {
        Self { engine, sink, state }
    }

    /// Inpaint `masks` in order, starting from `source`.
    ///
    /// Pass `i` sees the output of pass `i - 1`. After every pass the
    /// request's seed and subseed move to one past the values the engine
    /// reported. The stop flag is checked before each pass.
    pub fn run(
        &mut self,
        request: &mut GenerationRequest,
        source: &RgbImage,
        masks: &[MaskImage],
        plan: &PassPlan<'_>,
    ) -> Result<PassOutcome> {
        let mut outcome = PassOutcome {
            image: source.clone(),
            info: String::new(),
            passes: 0,
            last: None,
        };
        if masks.is_empty() {
            return Ok(outcome);
        }

        for (i, mask) in masks.iter().enumerate() {
            if self.state.interrupted() {
                warn!(
                    "Interrupted before pass {} of {} for model {}",
                    i + 1,
                    masks.len(),
                    plan.label
                );
                break;
            }

            request.image_mask = Some(mask.clone());
            request.init_images = vec![outcome.image.clone()];
            if let Err(e) = self.sink.save_mask(mask, plan.start_seed, &request.prompt) {
                warn!("Failed to save mask: {e:#}");
            }

            let mut processed = self.engine.generate(request)?;
            let image = std::mem::take(&mut processed.images)
                .into_iter()
                .next()
                .ok_or(DetailError::EmptyGeneration)?;

            if plan.adopt_prompts {
                request.prompt = processed.prompt.clone();
                request.negative_prompt = processed.negative_prompt.clone();
            }
            request.seed = processed.seed + 1;
            request.subseed = processed.subseed + 1;

            outcome.image = image;
            outcome.info = processed.info.clone();
            outcome.passes += 1;
            outcome.last = Some(processed);
            self.state.passes_done += 1;
        }

        info!(
            "Finished {} model {} passes for output generation {}",
            outcome.passes,
            plan.label,
            plan.iteration + 1
        );
        Ok(outcome)
    }
}
