use std::path::{Path, PathBuf};

use anyhow::Result;
use image::{DynamicImage, RgbImage};
use tracing::debug;

use crate::config::SaveOptions;
use crate::models::MaskImage;

/// Longest prompt fragment kept in a file name
const PROMPT_IN_FILENAME: usize = 48;

/// Receives previews, masks and finished samples as they are produced.
///
/// Saving is best effort: the detailer logs failures and carries on.
pub trait ArtifactSink {
    fn save_preview(&mut self, image: &RgbImage, seed: i64, prompt: &str) -> Result<()>;

    fn save_mask(&mut self, mask: &MaskImage, seed: i64, prompt: &str) -> Result<()>;

    fn save_sample(&mut self, image: &RgbImage, seed: i64, prompt: &str, info: &str) -> Result<()>;

    /// Record the parameters of the last run
    fn write_params(&mut self, info: &str) -> Result<()>;
}

impl<S: ArtifactSink + ?Sized> ArtifactSink for &mut S {
    fn save_preview(&mut self, image: &RgbImage, seed: i64, prompt: &str) -> Result<()> {
        (**self).save_preview(image, seed, prompt)
    }

    fn save_mask(&mut self, mask: &MaskImage, seed: i64, prompt: &str) -> Result<()> {
        (**self).save_mask(mask, seed, prompt)
    }

    fn save_sample(&mut self, image: &RgbImage, seed: i64, prompt: &str, info: &str) -> Result<()> {
        (**self).save_sample(image, seed, prompt, info)
    }

    fn write_params(&mut self, info: &str) -> Result<()> {
        (**self).write_params(info)
    }
}

/// Discards everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl ArtifactSink for NullSink {
    fn save_preview(&mut self, _image: &RgbImage, _seed: i64, _prompt: &str) -> Result<()> {
        Ok(())
    }

    fn save_mask(&mut self, _mask: &MaskImage, _seed: i64, _prompt: &str) -> Result<()> {
        Ok(())
    }

    fn save_sample(&mut self, _image: &RgbImage, _seed: i64, _prompt: &str, _info: &str) -> Result<()> {
        Ok(())
    }

    fn write_params(&mut self, _info: &str) -> Result<()> {
        Ok(())
    }
}

/// Writes artifacts into the directories named by [`SaveOptions`],
/// honouring its on/off switches
#[derive(Debug, Clone)]
pub struct DirectorySink {
    options: SaveOptions,
}

impl DirectorySink {
    pub fn new(options: SaveOptions) -> Self {
        Self { options }
    }

    fn save(&self, dir: &Path, image: &DynamicImage, seed: i64, prompt: &str) -> Result<PathBuf> {
        std::fs::create_dir_all(dir)?;
        let filename = next_filename(dir, seed, prompt, &self.options.samples_format)?;
        let output_path = dir.join(&filename);
        image
            .save(&output_path)
            .map_err(|e| anyhow::anyhow!("Failed to save {}: {}", output_path.display(), e))?;
        debug!("Saved {}", output_path.display());
        Ok(output_path)
    }
}

impl ArtifactSink for DirectorySink {
    fn save_preview(&mut self, image: &RgbImage, seed: i64, prompt: &str) -> Result<()> {
        if self.options.save_previews {
            let dir = self.options.previews_dir.clone();
            self.save(&dir, &DynamicImage::ImageRgb8(image.clone()), seed, prompt)?;
        }
        Ok(())
    }

    fn save_mask(&mut self, mask: &MaskImage, seed: i64, prompt: &str) -> Result<()> {
        if self.options.save_masks {
            let dir = self.options.masks_dir.clone();
            self.save(&dir, &DynamicImage::ImageLuma8(mask.clone()), seed, prompt)?;
        }
        Ok(())
    }

    fn save_sample(&mut self, image: &RgbImage, seed: i64, prompt: &str, info: &str) -> Result<()> {
        if !self.options.save_samples {
            return Ok(());
        }
        let dir = self.options.samples_dir.clone();
        let path = self.save(&dir, &DynamicImage::ImageRgb8(image.clone()), seed, prompt)?;
        if !info.is_empty() {
            std::fs::write(path.with_extension("txt"), info)?;
        }
        Ok(())
    }

    fn write_params(&mut self, info: &str) -> Result<()> {
        if let Some(path) = &self.options.params_path {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(path, info)?;
        }
        Ok(())
    }
}

/// `00003-1234-a_portrait_of.png`, numbered after the files already in `dir`
pub fn next_filename(dir: &Path, seed: i64, prompt: &str, extension: &str) -> Result<String> {
    let index = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok())
        .filter(|entry| {
            entry
                .path()
                .extension()
                .map(|ext| ext.eq_ignore_ascii_case(extension))
                .unwrap_or(false)
        })
        .count();
    let slug = prompt_slug(prompt);
    if slug.is_empty() {
        Ok(format!("{:05}-{}.{}", index, seed, extension))
    } else {
        Ok(format!("{:05}-{}-{}.{}", index, seed, slug, extension))
    }
}

fn prompt_slug(prompt: &str) -> String {
    let cleaned: String = prompt
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { '_' })
        .collect();
    let collapsed = cleaned
        .split('_')
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("_");
    collapsed.chars().take(PROMPT_IN_FILENAME).collect()
}
