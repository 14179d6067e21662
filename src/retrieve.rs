//! Query-time retrieval.
//!
//! Embeds a raw query through the injected embedder, runs the k-NN query
//! against a published index, and resolves hits back to stored fragments in
//! rank order.

use std::collections::HashSet;
use std::sync::Arc;

use crate::embed::{Embedder, EmbeddingError, l2_normalize};
use crate::fragment::{ContentFragment, FragmentStore, Modality};
use crate::index::{IndexError, SearchIndex};

/// A raw query probe: exactly one modality.
#[derive(Debug, Clone)]
pub enum QueryInput {
    Text(String),
    /// PNG-encoded image bytes (already size-capped by the caller)
    Image(Vec<u8>),
}

impl QueryInput {
    pub fn modality(&self) -> Modality {
        match self {
            QueryInput::Text(_) => Modality::Text,
            QueryInput::Image(_) => Modality::Image,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RetrieveError {
    #[error("embedding error: {0}")]
    Embedding(#[from] EmbeddingError),

    #[error("index error: {0}")]
    Index(#[from] IndexError),
}

/// One resolved hit.
#[derive(Debug, Clone)]
pub struct ScoredFragment {
    pub fragment: ContentFragment,
    pub score: f32,
}

/// Ranked, deduplicated retrieval output, descending score, length ≤ k.
#[derive(Debug, Default)]
pub struct RetrievalResult {
    pub hits: Vec<ScoredFragment>,
    /// Ids returned by the index that did not resolve to a stored fragment.
    /// Non-zero means the index and fragment store went out of sync, which
    /// the session invariants rule out; it is logged as an internal
    /// consistency error, never silently swallowed.
    pub missing: usize,
}

impl RetrievalResult {
    pub fn is_empty(&self) -> bool {
        self.hits.is_empty()
    }
}

/// Turns raw queries into ranked fragment lists.
pub struct Retriever {
    embedder: Arc<dyn Embedder>,
    default_k: usize,
}

impl Retriever {
    pub fn new(embedder: Arc<dyn Embedder>, default_k: usize) -> Self {
        Self { embedder, default_k }
    }

    pub fn default_k(&self) -> usize {
        self.default_k
    }

    /// Embed the query and resolve up to `k` nearest fragments
    /// (config default when `k` is `None`).
    pub fn retrieve(
        &self,
        index: &SearchIndex,
        store: &FragmentStore,
        input: &QueryInput,
        k: Option<usize>,
    ) -> Result<RetrievalResult, RetrieveError> {
        index.verify_model(self.embedder.model_version())?;

        let mut query_vector = match input {
            QueryInput::Text(text) => self.embedder.embed_text(text)?,
            QueryInput::Image(png) => self.embedder.embed_image(png)?,
        };
        l2_normalize(&mut query_vector)?;

        let k = k.unwrap_or(self.default_k);
        let hits = index.query(&query_vector, k)?;

        let mut seen = HashSet::new();
        let mut result = RetrievalResult::default();

        for hit in hits {
            if !seen.insert(hit.fragment_id) {
                continue;
            }
            match store.get(hit.fragment_id) {
                Some(fragment) => result.hits.push(ScoredFragment {
                    fragment: fragment.clone(),
                    score: hit.score,
                }),
                None => {
                    log::error!(
                        "internal consistency error: index returned fragment {} with no stored content",
                        hit.fragment_id
                    );
                    result.missing += 1;
                }
            }
        }

        log::debug!(
            "retrieved {} fragments for {} query (k={})",
            result.hits.len(),
            input.modality(),
            k
        );

        Ok(result)
    }
}
