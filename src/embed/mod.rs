//! Embedding generation.
//!
//! Both modalities are embedded into one joint vector space by the same
//! underlying model pair, so text and image scores are directly comparable.
//! The `Embedder` trait is the adapter boundary: components receive their
//! embedder by reference, never through a global.

pub mod clip;

use crate::fragment::{ContentFragment, FragmentPayload, Modality};

/// Error type for embedding operations.
#[derive(Debug, thiserror::Error)]
pub enum EmbeddingError {
    #[error("model initialization failed: {0}")]
    InitFailed(String),

    #[error("embedding generation failed: {0}")]
    EmbeddingFailed(String),

    #[error("invalid embedding model: {0}")]
    InvalidModel(String),

    #[error("model returned a zero-norm vector")]
    ZeroNorm,

    #[error("embedding fragment {fragment_id} failed: {source}")]
    Fragment {
        fragment_id: u64,
        #[source]
        source: Box<EmbeddingError>,
    },

    #[error("batch of {len} {modality} items failed: {source}")]
    Batch {
        modality: Modality,
        len: usize,
        #[source]
        source: Box<EmbeddingError>,
    },
}

/// A unit-normalized vector tagged with the fragment it represents.
///
/// Vectors are only comparable when produced by the same model version; the
/// index enforces that at append time.
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddingVector {
    pub fragment_id: u64,
    pub modality: Modality,
    pub values: Vec<f32>,
}

/// Embedding model adapter.
///
/// Batch methods either embed every item or fail as a whole; nothing is
/// silently dropped. Callers that need per-item attribution wrap batch
/// errors with the offending positions (see [`embed_fragments`]).
pub trait Embedder: Send + Sync {
    /// Vector dimension D, constant for the adapter's lifetime.
    fn dimensions(&self) -> usize;

    /// Model version identifier; the index rejects vectors from a different
    /// version.
    fn model_version(&self) -> &str;

    fn embed_text_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError>;

    fn embed_image_batch(&self, pngs: &[&[u8]]) -> Result<Vec<Vec<f32>>, EmbeddingError>;

    fn embed_text(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let mut vectors = self.embed_text_batch(std::slice::from_ref(&text.to_string()))?;
        vectors
            .pop()
            .ok_or_else(|| EmbeddingError::EmbeddingFailed("no embedding returned".to_string()))
    }

    fn embed_image(&self, png: &[u8]) -> Result<Vec<f32>, EmbeddingError> {
        let mut vectors = self.embed_image_batch(&[png])?;
        vectors
            .pop()
            .ok_or_else(|| EmbeddingError::EmbeddingFailed("no embedding returned".to_string()))
    }
}

/// Normalize a vector to unit length in place. Zero-norm vectors cannot be
/// placed in a cosine space and are rejected.
pub fn l2_normalize(values: &mut [f32]) -> Result<(), EmbeddingError> {
    let norm = values.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm < f32::EPSILON {
        return Err(EmbeddingError::ZeroNorm);
    }
    for v in values.iter_mut() {
        *v /= norm;
    }
    Ok(())
}

/// SHA-256 of the model version string, used by index storage to reject
/// vectors written by a different model.
pub fn model_id_hash(model_version: &str) -> [u8; 32] {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(model_version.as_bytes());
    hasher.finalize().into()
}

/// Embed a set of fragments, batching per modality to amortize model-call
/// overhead. Output order matches input order and every vector is tagged
/// with its fragment id; a batch failure is attributed to the fragments it
/// covered rather than dropped.
pub fn embed_fragments(
    embedder: &dyn Embedder,
    fragments: &[ContentFragment],
) -> Result<Vec<EmbeddingVector>, EmbeddingError> {
    let mut texts = Vec::new();
    let mut text_positions = Vec::new();
    let mut images = Vec::new();
    let mut image_positions = Vec::new();

    for (position, fragment) in fragments.iter().enumerate() {
        match &fragment.payload {
            FragmentPayload::Text { content } => {
                texts.push(content.clone());
                text_positions.push(position);
            }
            FragmentPayload::Image { png, .. } => {
                images.push(png.as_slice());
                image_positions.push(position);
            }
        }
    }

    let text_vectors = if texts.is_empty() {
        Vec::new()
    } else {
        embedder
            .embed_text_batch(&texts)
            .map_err(|e| EmbeddingError::Batch {
                modality: Modality::Text,
                len: texts.len(),
                source: Box::new(e),
            })?
    };

    let image_vectors = if images.is_empty() {
        Vec::new()
    } else {
        embedder
            .embed_image_batch(&images)
            .map_err(|e| EmbeddingError::Batch {
                modality: Modality::Image,
                len: images.len(),
                source: Box::new(e),
            })?
    };

    if text_vectors.len() != texts.len() || image_vectors.len() != images.len() {
        return Err(EmbeddingError::EmbeddingFailed(format!(
            "model returned {} text / {} image vectors for {} / {} inputs",
            text_vectors.len(),
            image_vectors.len(),
            texts.len(),
            images.len()
        )));
    }

    let mut output: Vec<Option<EmbeddingVector>> = vec![None; fragments.len()];

    for (position, mut values) in text_positions.into_iter().zip(text_vectors) {
        let fragment = &fragments[position];
        l2_normalize(&mut values).map_err(|e| EmbeddingError::Fragment {
            fragment_id: fragment.id,
            source: Box::new(e),
        })?;
        output[position] = Some(EmbeddingVector {
            fragment_id: fragment.id,
            modality: Modality::Text,
            values,
        });
    }

    for (position, mut values) in image_positions.into_iter().zip(image_vectors) {
        let fragment = &fragments[position];
        l2_normalize(&mut values).map_err(|e| EmbeddingError::Fragment {
            fragment_id: fragment.id,
            source: Box::new(e),
        })?;
        output[position] = Some(EmbeddingVector {
            fragment_id: fragment.id,
            modality: Modality::Image,
            values,
        });
    }

    Ok(output.into_iter().map(|v| v.expect("every position filled")).collect())
}
