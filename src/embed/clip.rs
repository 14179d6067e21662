//! CLIP embedder backed by fastembed.
//!
//! Pairs the CLIP text tower with the CLIP vision tower so both modalities
//! land in the same 512-dimensional space. Models are downloaded on first
//! use into `cache_dir/models`. fastembed's `embed()` takes `&mut self`, so
//! each tower sits behind a Mutex.

use std::io::Write;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;

use fastembed::{
    ImageEmbedding, ImageEmbeddingModel, ImageInitOptions, InitOptions, TextEmbedding,
};

use super::{Embedder, EmbeddingError};

/// Default download timeout for model files (5 minutes)
const DEFAULT_DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(300);

pub struct ClipEmbedder {
    text_model: Mutex<TextEmbedding>,
    image_model: Mutex<ImageEmbedding>,
    model_version: String,
    dimensions: usize,
}

impl ClipEmbedder {
    /// Create a CLIP embedder for the given model name.
    ///
    /// Only the paired `clip-vit-b-32` text/vision towers are supported;
    /// mixing an arbitrary text model with the CLIP vision tower would break
    /// the joint space.
    pub fn new(
        model_name: &str,
        cache_dir: PathBuf,
        download_timeout: Option<Duration>,
    ) -> Result<Self, EmbeddingError> {
        let (text_enum, image_enum) = Self::parse_model_name(model_name)?;
        let timeout = download_timeout.unwrap_or(DEFAULT_DOWNLOAD_TIMEOUT);

        let models_dir = cache_dir.join("models");
        std::fs::create_dir_all(&models_dir).map_err(|e| {
            EmbeddingError::InitFailed(format!("failed to create models directory: {}", e))
        })?;

        let text_dir = models_dir.clone();
        let mut text_model = init_with_timeout(timeout, move || {
            TextEmbedding::try_new(
                InitOptions::new(text_enum)
                    .with_cache_dir(text_dir)
                    .with_show_download_progress(true),
            )
            .map_err(|e| EmbeddingError::InitFailed(e.to_string()))
        })?;

        let image_model = init_with_timeout(timeout, move || {
            ImageEmbedding::try_new(
                ImageInitOptions::new(image_enum)
                    .with_cache_dir(models_dir)
                    .with_show_download_progress(true),
            )
            .map_err(|e| EmbeddingError::InitFailed(e.to_string()))
        })?;

        let dimensions = Self::probe_dimensions(&mut text_model)?;

        Ok(Self {
            text_model: Mutex::new(text_model),
            image_model: Mutex::new(image_model),
            model_version: model_name.to_string(),
            dimensions,
        })
    }

    fn parse_model_name(
        name: &str,
    ) -> Result<(fastembed::EmbeddingModel, ImageEmbeddingModel), EmbeddingError> {
        match name.to_lowercase().as_str() {
            "clip-vit-b-32" | "clipvitb32" => Ok((
                fastembed::EmbeddingModel::ClipVitB32,
                ImageEmbeddingModel::ClipVitB32,
            )),
            _ => Err(EmbeddingError::InvalidModel(format!(
                "unknown model: {}. Supported models: clip-vit-b-32",
                name
            ))),
        }
    }

    /// Probe the text tower to determine the vector dimension.
    fn probe_dimensions(model: &mut TextEmbedding) -> Result<usize, EmbeddingError> {
        let probe = model
            .embed(vec!["probe"], None)
            .map_err(|e| EmbeddingError::InitFailed(format!("failed to probe dimensions: {}", e)))?;

        probe
            .first()
            .map(|v| v.len())
            .ok_or_else(|| EmbeddingError::InitFailed("model returned no embedding".to_string()))
    }
}

/// Run a model initialization (which may download weights) on a worker
/// thread, failing if it is not done within `timeout`. On timeout the worker
/// keeps downloading in the background, so a retry can pick up the cached
/// files.
fn init_with_timeout<T: Send + 'static>(
    timeout: Duration,
    init: impl FnOnce() -> Result<T, EmbeddingError> + Send + 'static,
) -> Result<T, EmbeddingError> {
    let (tx, rx) = std::sync::mpsc::channel();
    std::thread::spawn(move || {
        let _ = tx.send(init());
    });

    rx.recv_timeout(timeout).map_err(|_| {
        EmbeddingError::InitFailed(format!("model was not ready within {timeout:?}"))
    })?
}

impl Embedder for ClipEmbedder {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn model_version(&self) -> &str {
        &self.model_version
    }

    fn embed_text_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if texts.is_empty() {
            return Ok(vec![]);
        }

        let mut model = self.text_model.lock().map_err(|e| {
            EmbeddingError::EmbeddingFailed(format!("failed to acquire model lock: {}", e))
        })?;

        model
            .embed(texts.to_vec(), None)
            .map_err(|e| EmbeddingError::EmbeddingFailed(e.to_string()))
    }

    fn embed_image_batch(&self, pngs: &[&[u8]]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if pngs.is_empty() {
            return Ok(vec![]);
        }

        // fastembed's vision pipeline loads images from paths; stage the
        // already-PNG-encoded payloads in a temp dir for the call.
        let staging = tempfile::tempdir().map_err(|e| {
            EmbeddingError::EmbeddingFailed(format!("failed to create staging dir: {}", e))
        })?;

        let mut paths = Vec::with_capacity(pngs.len());
        for (i, png) in pngs.iter().enumerate() {
            let path = staging.path().join(format!("{i}.png"));
            let mut file = std::fs::File::create(&path).map_err(|e| {
                EmbeddingError::EmbeddingFailed(format!("failed to stage image {i}: {}", e))
            })?;
            file.write_all(png).map_err(|e| {
                EmbeddingError::EmbeddingFailed(format!("failed to stage image {i}: {}", e))
            })?;
            paths.push(path);
        }

        let mut model = self.image_model.lock().map_err(|e| {
            EmbeddingError::EmbeddingFailed(format!("failed to acquire model lock: {}", e))
        })?;

        model
            .embed(paths, None)
            .map_err(|e| EmbeddingError::EmbeddingFailed(e.to_string()))
    }
}
