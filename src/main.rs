use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand};
use image::ImageReader;

use dddetail::detection::adapter::{select_device, update_result_masks};
use dddetail::detection::replay::PredictionFileBackend;
use dddetail::engine::WebUiEngine;
use dddetail::{
    DetailerConfig, Detailer, DirectorySink, GenerationRequest, ModelCatalog, ModelDetector,
    PreviewRenderer, RegionFinder, RunMode, load_config,
};

#[derive(Parser)]
#[command(name = "dddetail")]
#[command(about = "Detect regions in generated images and inpaint each one for detail")]
#[command(version)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List the detection models found in a directory
    Models {
        #[arg(value_name = "DIR")]
        dir: PathBuf,
    },

    /// Detect regions and write the mask preview and masks without inpainting
    Preview {
        /// Detailer settings (JSON)
        #[arg(long)]
        config: PathBuf,

        #[arg(long)]
        image: PathBuf,

        /// Directory holding exported predictions, one `<model>.json` per model
        #[arg(long)]
        predictions: PathBuf,

        /// Output directory
        #[arg(long)]
        out: PathBuf,
    },

    /// Run the detailer against a Stable Diffusion web UI
    Run {
        /// Detailer settings (JSON)
        #[arg(long)]
        config: PathBuf,

        /// Directory holding exported predictions, one `<model>.json` per model
        #[arg(long)]
        predictions: PathBuf,

        /// Refine this image instead of generating a new one
        #[arg(long)]
        image: Option<PathBuf>,

        #[arg(long, default_value = "http://127.0.0.1:7860")]
        api_url: String,

        #[arg(long, default_value = "")]
        prompt: String,

        #[arg(long, default_value = "")]
        negative_prompt: String,

        /// -1 picks a random seed
        #[arg(long, default_value_t = -1)]
        seed: i64,

        #[arg(long, default_value_t = 20)]
        steps: u32,

        #[arg(long, default_value = "Euler a")]
        sampler: String,

        #[arg(long, default_value_t = 512)]
        width: u32,

        #[arg(long, default_value_t = 512)]
        height: u32,
    },
}

fn main() -> anyhow::Result<()> {
    let args = Cli::parse();

    let default_filter = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter)),
        )
        .init();

    match args.command {
        Commands::Models { dir } => run_models(&dir),
        Commands::Preview {
            config,
            image,
            predictions,
            out,
        } => run_preview(&config, &image, &predictions, &out),
        Commands::Run {
            config,
            predictions,
            image,
            api_url,
            prompt,
            negative_prompt,
            seed,
            steps,
            sampler,
            width,
            height,
        } => {
            let request = GenerationRequest {
                prompt,
                negative_prompt,
                seed,
                steps,
                sampler_name: sampler,
                width,
                height,
                ..GenerationRequest::default()
            };
            run_detail(&config, &predictions, image.as_deref(), &api_url, request)
        }
    }
}

fn load_image(path: &Path) -> anyhow::Result<image::RgbImage> {
    let img = ImageReader::open(path)?
        .decode()
        .map_err(|e| anyhow::anyhow!("Failed to decode image: {}", e))?;
    tracing::info!("Image loaded: {}x{}", img.width(), img.height());
    Ok(img.to_rgb8())
}

fn load_renderer(config: &DetailerConfig) -> anyhow::Result<PreviewRenderer> {
    match &config.font_path {
        Some(path) => PreviewRenderer::with_font_path(path),
        None => Ok(PreviewRenderer::with_system_font()),
    }
}

fn run_models(dir: &Path) -> anyhow::Result<()> {
    let catalog = ModelCatalog::scan(dir, &["pth".to_string()])?;
    if catalog.entries().is_empty() {
        println!("No detection models found in {}", catalog.root().display());
        return Ok(());
    }
    for entry in catalog.entries() {
        println!("{:<5} {}", entry.kind.as_str(), entry.title);
    }
    Ok(())
}

fn run_preview(config_path: &Path, image_path: &Path, predictions: &Path, out: &Path) -> anyhow::Result<()> {
    let config = load_config(config_path)?;
    let catalog = ModelCatalog::scan(&config.models_dir, &config.model_extensions)?;
    let image = load_image(image_path)?;
    let renderer = load_renderer(&config)?;
    let device = select_device(&config.device, config.low_vram);
    let mut detector = ModelDetector::new(PredictionFileBackend::new(predictions), device);
    let mut rng = rand::thread_rng();

    std::fs::create_dir_all(out)?;
    let slots = [("A", &config.model_a), ("B", &config.model_b)];
    for (label, settings) in slots {
        let Some(entry) = catalog.resolve(&settings.model)? else {
            continue;
        };
        let finder = RegionFinder::new(entry.clone(), settings);
        let (mut result, masks) = finder.find(&mut detector, &image, label)?;
        println!("Model {} ({}): {} detections", label, entry.title, result.len());
        if masks.is_empty() {
            continue;
        }
        update_result_masks(&mut result, &masks)?;

        let preview = renderer.render(&result, &image, &mut rng);
        let preview_path = out.join(format!("preview_{}.png", label.to_lowercase()));
        preview
            .save(&preview_path)
            .with_context(|| format!("Failed to save {}", preview_path.display()))?;
        for (i, mask) in masks.iter().enumerate() {
            let mask_path = out.join(format!("mask_{}_{:02}.png", label.to_lowercase(), i + 1));
            mask.save(&mask_path)
                .with_context(|| format!("Failed to save {}", mask_path.display()))?;
        }
        for instance in &result.instances {
            println!(
                "  {} score {:.2} box ({:.0}, {:.0})-({:.0}, {:.0})",
                instance.label,
                instance.score,
                instance.bbox.x0,
                instance.bbox.y0,
                instance.bbox.x1,
                instance.bbox.y1
            );
        }
    }
    Ok(())
}

fn run_detail(
    config_path: &Path,
    predictions: &Path,
    image: Option<&Path>,
    api_url: &str,
    mut request: GenerationRequest,
) -> anyhow::Result<()> {
    let config = load_config(config_path)?;
    let catalog = ModelCatalog::scan(&config.models_dir, &config.model_extensions)?;
    let renderer = load_renderer(&config)?;
    let device = select_device(&config.device, config.low_vram);
    let detector = ModelDetector::new(PredictionFileBackend::new(predictions), device);
    let engine = WebUiEngine::new(api_url)?;
    let sink = DirectorySink::new(config.save.clone());

    let mode = match image {
        Some(path) => {
            request.init_images = vec![load_image(path)?];
            RunMode::Refine
        }
        None => RunMode::Generate,
    };

    let mut detailer = Detailer::new(config, &catalog, detector, engine, sink)?.with_renderer(renderer);
    let output = detailer.run(request, mode)?;

    println!("\n=== Detail Results ===");
    println!("Output images: {}", output.images.len());
    for (n, seed) in output.all_seeds.iter().enumerate() {
        println!("  {}: seed {} subseed {}", n + 1, seed, output.all_subseeds[n]);
    }
    println!("Passes executed: {}", detailer.state().passes_done);
    Ok(())
}
