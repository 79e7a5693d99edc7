//! Generation engine backed by the Stable Diffusion web UI HTTP API.

use std::io::Cursor;
use std::time::Duration;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use image::{DynamicImage, ImageFormat, RgbImage};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{GenerationEngine, GenerationRequest, Processed};

#[derive(Debug, Serialize)]
struct ApiRequest<'a> {
    prompt: &'a str,
    negative_prompt: &'a str,
    seed: i64,
    subseed: i64,
    subseed_strength: f32,
    sampler_name: &'a str,
    steps: u32,
    cfg_scale: f32,
    width: u32,
    height: u32,
    batch_size: u32,
    n_iter: u32,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    init_images: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    mask: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    denoising_strength: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    mask_blur: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    inpainting_fill: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    inpaint_full_res: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    inpaint_full_res_padding: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    #[serde(default)]
    images: Vec<String>,
    #[serde(default)]
    info: String,
}

#[derive(Debug, Default, Deserialize)]
struct ApiInfo {
    #[serde(default)]
    seed: i64,
    #[serde(default)]
    subseed: i64,
    #[serde(default)]
    prompt: String,
    #[serde(default)]
    negative_prompt: String,
    #[serde(default)]
    infotexts: Vec<String>,
}

/// Blocking client for `/sdapi/v1/txt2img` and `/sdapi/v1/img2img`
pub struct WebUiEngine {
    base_url: String,
    client: reqwest::Client,
    runtime: tokio::runtime::Runtime,
}

impl WebUiEngine {
    pub fn new(base_url: impl Into<String>) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(600))
            .build()?;
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
            runtime,
        })
    }

    fn endpoint(&self, request: &GenerationRequest) -> String {
        let route = if request.is_img2img() { "img2img" } else { "txt2img" };
        format!("{}/sdapi/v1/{}", self.base_url, route)
    }

    async fn post(&self, url: &str, body: &ApiRequest<'_>) -> anyhow::Result<ApiResponse> {
        let response = self.client.post(url).json(body).send().await?;
        if !response.status().is_success() {
            anyhow::bail!("HTTP error from {}: {}", url, response.status());
        }
        Ok(response.json::<ApiResponse>().await?)
    }
}

impl GenerationEngine for WebUiEngine {
    fn generate(&mut self, request: &GenerationRequest) -> anyhow::Result<Processed> {
        let img2img = request.is_img2img();
        let init_images = request
            .init_images
            .iter()
            .map(|img| encode_png(&DynamicImage::ImageRgb8(img.clone())))
            .collect::<anyhow::Result<Vec<_>>>()?;
        let mask = request
            .image_mask
            .as_ref()
            .map(|m| encode_png(&DynamicImage::ImageLuma8(m.clone())))
            .transpose()?;

        let body = ApiRequest {
            prompt: &request.prompt,
            negative_prompt: &request.negative_prompt,
            seed: request.seed,
            subseed: request.subseed,
            subseed_strength: request.subseed_strength,
            sampler_name: &request.sampler_name,
            steps: request.steps,
            cfg_scale: request.cfg_scale,
            width: request.width,
            height: request.height,
            batch_size: 1,
            n_iter: 1,
            init_images,
            mask,
            denoising_strength: img2img.then_some(request.denoising_strength),
            mask_blur: img2img.then_some(request.mask_blur),
            inpainting_fill: img2img.then_some(request.inpainting_fill),
            inpaint_full_res: img2img.then_some(request.inpaint_full_res),
            inpaint_full_res_padding: img2img.then_some(request.inpaint_full_res_padding),
        };

        let url = self.endpoint(request);
        debug!("POST {} (seed {})", url, request.seed);
        let response = self.runtime.block_on(self.post(&url, &body))?;

        let images = response
            .images
            .iter()
            .map(|data| decode_png(data))
            .collect::<anyhow::Result<Vec<_>>>()?;
        let info: ApiInfo = if response.info.is_empty() {
            ApiInfo::default()
        } else {
            serde_json::from_str(&response.info)?
        };

        Ok(Processed {
            images,
            seed: info.seed,
            subseed: info.subseed,
            prompt: info.prompt,
            negative_prompt: info.negative_prompt,
            info: info.infotexts.into_iter().next().unwrap_or_default(),
        })
    }
}

fn encode_png(image: &DynamicImage) -> anyhow::Result<String> {
    let mut buffer = Vec::new();
    image.write_to(&mut Cursor::new(&mut buffer), ImageFormat::Png)?;
    Ok(STANDARD.encode(buffer))
}

fn decode_png(data: &str) -> anyhow::Result<RgbImage> {
    // The API may prefix a data URL header
    let payload = data.split_once(',').map(|(_, rest)| rest).unwrap_or(data);
    let bytes = STANDARD.decode(payload)?;
    Ok(image::load_from_memory(&bytes)?.to_rgb8())
}
