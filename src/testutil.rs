//! Deterministic fake adapters for tests.
//!
//! `FakeEmbedder` maps text to a bag-of-words vector (FNV-1a word buckets)
//! and images to a byte-pair bucket vector, both L2-normalized into one
//! space, so similarity assertions are stable across runs without a model
//! download. `FakeGenerator` returns a canned answer or a scripted failure.

use std::sync::Mutex;
use std::time::Duration;

use crate::embed::{Embedder, EmbeddingError};
use crate::generate::{GenerationError, PromptBlock, TextGenerator};

pub struct FakeEmbedder {
    dimensions: usize,
    version: String,
    fail: bool,
}

impl FakeEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self::with_version(dimensions, "fake-embedder-v1")
    }

    pub fn with_version(dimensions: usize, version: &str) -> Self {
        Self {
            dimensions,
            version: version.to_string(),
            fail: false,
        }
    }

    /// An embedder whose every batch call fails.
    pub fn failing(dimensions: usize) -> Self {
        Self {
            dimensions,
            version: "fake-embedder-v1".to_string(),
            fail: true,
        }
    }

    fn text_vector(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let mut values = vec![0.0f32; self.dimensions];
        for word in text
            .to_lowercase()
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
        {
            values[fnv1a(word.as_bytes()) as usize % self.dimensions] += 1.0;
        }
        normalize(values)
    }

    fn image_vector(&self, png: &[u8]) -> Result<Vec<f32>, EmbeddingError> {
        let mut values = vec![0.0f32; self.dimensions];
        for pair in png.windows(2) {
            // 0xFF prefix keeps image buckets from systematically matching
            // word buckets
            let mut key = vec![0xFFu8];
            key.extend_from_slice(pair);
            values[fnv1a(&key) as usize % self.dimensions] += 1.0;
        }
        if png.len() < 2 {
            values[fnv1a(png) as usize % self.dimensions] += 1.0;
        }
        normalize(values)
    }
}

fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf29ce484222325;
    for &b in bytes {
        hash ^= b as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    hash
}

fn normalize(mut values: Vec<f32>) -> Result<Vec<f32>, EmbeddingError> {
    crate::embed::l2_normalize(&mut values)?;
    Ok(values)
}

impl Embedder for FakeEmbedder {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn model_version(&self) -> &str {
        &self.version
    }

    fn embed_text_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if self.fail {
            return Err(EmbeddingError::EmbeddingFailed("scripted failure".to_string()));
        }
        texts.iter().map(|t| self.text_vector(t)).collect()
    }

    fn embed_image_batch(&self, pngs: &[&[u8]]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if self.fail {
            return Err(EmbeddingError::EmbeddingFailed("scripted failure".to_string()));
        }
        pngs.iter().map(|p| self.image_vector(p)).collect()
    }
}

/// Generation adapter that records the prompt it was given.
pub struct FakeGenerator {
    response: Result<String, String>,
    pub prompts: Mutex<Vec<Vec<PromptBlock>>>,
}

impl FakeGenerator {
    pub fn answering(text: &str) -> Self {
        Self {
            response: Ok(text.to_string()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(reason: &str) -> Self {
        Self {
            response: Err(reason.to_string()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn last_prompt(&self) -> Option<Vec<PromptBlock>> {
        self.prompts.lock().ok()?.last().cloned()
    }
}

impl TextGenerator for FakeGenerator {
    fn model_name(&self) -> &str {
        "fake-generator"
    }

    fn generate(
        &self,
        blocks: &[PromptBlock],
        _timeout: Duration,
    ) -> Result<String, GenerationError> {
        if let Ok(mut prompts) = self.prompts.lock() {
            prompts.push(blocks.to_vec());
        }
        match &self.response {
            Ok(text) => Ok(text.clone()),
            Err(reason) => Err(GenerationError::Provider(reason.clone())),
        }
    }
}
