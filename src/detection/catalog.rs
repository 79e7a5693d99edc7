use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::error::{DetailError, DetailResult};
use crate::models::{ModelEntry, ModelKind};

/// Name used for "no model selected"
pub const NO_MODEL: &str = "None";

/// Detection models found under a root directory
#[derive(Debug, Clone, Default)]
pub struct ModelCatalog {
    root: PathBuf,
    entries: Vec<ModelEntry>,
}

impl ModelCatalog {
    /// Scan `root` recursively for files with one of `extensions`.
    ///
    /// The model kind is resolved here, once, from the file path. Files whose
    /// kind cannot be told are skipped.
    pub fn scan<P: AsRef<Path>>(root: P, extensions: &[String]) -> anyhow::Result<Self> {
        let root = root.as_ref().to_path_buf();
        let mut files = Vec::new();
        if root.is_dir() {
            collect_files(&root, extensions, &mut files)?;
        } else {
            warn!("Models directory {} does not exist", root.display());
        }
        files.sort();

        let mut entries = Vec::new();
        for path in files {
            let relative = path.strip_prefix(&root).unwrap_or(&path);
            let Some(kind) = ModelKind::from_path(relative) else {
                warn!("Skipping {}: not under a bbox or segm directory", path.display());
                continue;
            };
            let (title, short_name) = model_title(&root, &path);
            debug!("Found {} model {}", kind.as_str(), title);
            entries.push(ModelEntry {
                title,
                short_name,
                path,
                kind,
            });
        }

        Ok(Self { root, entries })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn entries(&self) -> &[ModelEntry] {
        &self.entries
    }

    /// Model identifiers, preceded by the "None" choice
    pub fn list_models(&self) -> Vec<String> {
        std::iter::once(NO_MODEL.to_string())
            .chain(self.entries.iter().map(|e| e.title.clone()))
            .collect()
    }

    /// Look up a model by title or short name. "None" and empty resolve to
    /// no model.
    pub fn resolve(&self, identifier: &str) -> DetailResult<Option<&ModelEntry>> {
        if is_no_model(identifier) {
            return Ok(None);
        }
        self.entries
            .iter()
            .find(|e| e.title == identifier || e.short_name == identifier)
            .map(Some)
            .ok_or_else(|| DetailError::ModelNotFound {
                identifier: identifier.to_string(),
            })
    }

    /// File path of a model
    pub fn resolve_path(&self, identifier: &str) -> DetailResult<Option<PathBuf>> {
        Ok(self.resolve(identifier)?.map(|e| e.path.clone()))
    }
}

pub fn is_no_model(identifier: &str) -> bool {
    identifier.is_empty() || identifier == NO_MODEL
}

/// Kind of the model stored at `path`
pub fn model_kind(path: &Path) -> DetailResult<ModelKind> {
    ModelKind::from_path(path).ok_or_else(|| DetailError::UnknownModelKind {
        path: path.display().to_string(),
    })
}

fn collect_files(dir: &Path, extensions: &[String], out: &mut Vec<PathBuf>) -> anyhow::Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            collect_files(&path, extensions, out)?;
            continue;
        }
        let matches = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|ext| {
                extensions
                    .iter()
                    .any(|want| want.trim_start_matches('.').eq_ignore_ascii_case(ext))
            })
            .unwrap_or(false);
        if matches {
            out.push(path);
        }
    }
    Ok(())
}

// ("bbox/face.pth", "bbox_face")
fn model_title(root: &Path, path: &Path) -> (String, String) {
    let relative = path.strip_prefix(root).unwrap_or(path);
    let title = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("/");
    let short_name = relative
        .with_extension("")
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("_");
    (title, short_name)
}
