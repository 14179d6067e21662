//! In-memory vector index with inner-product similarity search.
//!
//! One index covers one document session. It is assembled through an
//! [`IndexBuilder`] (single writer) and published as an immutable
//! [`SearchIndex`] (many readers); no reader can ever observe a partially
//! built index. Storage order is insertion order and doubles as the
//! deterministic tie-break for equal scores.

use std::collections::HashSet;

use crate::embed::EmbeddingVector;
use crate::fragment::Modality;

/// Two scores closer than this are considered tied and fall back to
/// insertion order.
const SCORE_EPSILON: f32 = 1e-6;

/// Errors that can occur during index operations.
#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    #[error("dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("model version mismatch: index built with '{expected}', vector from '{got}'")]
    ModelVersionMismatch { expected: String, got: String },

    #[error("fragment {0} is already indexed")]
    DuplicateFragment(u64),

    #[error("cannot store or search with a zero-norm vector")]
    ZeroNormVector,

    #[error("k must be greater than 0")]
    InvalidK,
}

/// A stored vector paired with the fragment it represents.
#[derive(Debug, Clone)]
pub struct IndexEntry {
    pub fragment_id: u64,
    pub modality: Modality,
    pub values: Vec<f32>,
}

/// A single nearest-neighbor result.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Hit {
    pub fragment_id: u64,
    /// Inner-product similarity (≡ cosine, all vectors unit-normalized)
    pub score: f32,
}

/// Single-writer accumulator for one document's vectors.
///
/// `append` is the incremental path used while ingestion of the same
/// document is still in progress; `build` consumes the builder and is the
/// atomic publish point.
pub struct IndexBuilder {
    dimensions: usize,
    model_version: String,
    entries: Vec<IndexEntry>,
    seen: HashSet<u64>,
}

impl IndexBuilder {
    pub fn new(dimensions: usize, model_version: &str) -> Self {
        Self {
            dimensions,
            model_version: model_version.to_string(),
            entries: Vec::new(),
            seen: HashSet::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Append vectors in order. Every vector must match the builder's
    /// dimension and map to a fragment id not yet present.
    pub fn append(
        &mut self,
        vectors: impl IntoIterator<Item = EmbeddingVector>,
    ) -> Result<(), IndexError> {
        for vector in vectors {
            if vector.values.len() != self.dimensions {
                return Err(IndexError::DimensionMismatch {
                    expected: self.dimensions,
                    got: vector.values.len(),
                });
            }
            if !self.seen.insert(vector.fragment_id) {
                return Err(IndexError::DuplicateFragment(vector.fragment_id));
            }
            if l2_norm(&vector.values) < f32::EPSILON {
                return Err(IndexError::ZeroNormVector);
            }
            self.entries.push(IndexEntry {
                fragment_id: vector.fragment_id,
                modality: vector.modality,
                values: vector.values,
            });
        }
        Ok(())
    }

    /// Consume the builder and publish an immutable, queryable index.
    pub fn build(self) -> SearchIndex {
        log::debug!(
            "publishing index: {} entries, D={}, model '{}'",
            self.entries.len(),
            self.dimensions,
            self.model_version
        );
        SearchIndex {
            dimensions: self.dimensions,
            model_version: self.model_version,
            entries: self.entries,
        }
    }
}

/// Immutable published index for one document session.
pub struct SearchIndex {
    dimensions: usize,
    model_version: String,
    entries: Vec<IndexEntry>,
}

impl SearchIndex {
    /// Build an index from a complete ordered set of vectors in one step.
    pub fn build(
        dimensions: usize,
        model_version: &str,
        vectors: impl IntoIterator<Item = EmbeddingVector>,
    ) -> Result<Self, IndexError> {
        let mut builder = IndexBuilder::new(dimensions, model_version);
        builder.append(vectors)?;
        Ok(builder.build())
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    pub fn model_version(&self) -> &str {
        &self.model_version
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate entries in insertion order (used by storage).
    pub fn iter(&self) -> impl Iterator<Item = &IndexEntry> {
        self.entries.iter()
    }

    /// Reject queries embedded by a different model version; vectors from
    /// two model versions are not comparable even at equal dimension.
    pub fn verify_model(&self, model_version: &str) -> Result<(), IndexError> {
        if self.model_version != model_version {
            return Err(IndexError::ModelVersionMismatch {
                expected: self.model_version.clone(),
                got: model_version.to_string(),
            });
        }
        Ok(())
    }

    /// Return up to `k` nearest neighbors by inner-product similarity.
    ///
    /// Ties within floating-point epsilon are broken by ascending insertion
    /// order, earliest-inserted first. An empty index returns an empty list;
    /// `k` larger than the entry count returns every entry.
    pub fn query(&self, query: &[f32], k: usize) -> Result<Vec<Hit>, IndexError> {
        if k == 0 {
            return Err(IndexError::InvalidK);
        }
        if query.len() != self.dimensions {
            return Err(IndexError::DimensionMismatch {
                expected: self.dimensions,
                got: query.len(),
            });
        }
        if l2_norm(query) < f32::EPSILON {
            return Err(IndexError::ZeroNormVector);
        }

        let mut scored: Vec<(usize, Hit)> = self
            .entries
            .iter()
            .enumerate()
            .map(|(position, entry)| {
                let score = dot(query, &entry.values);
                (
                    position,
                    Hit {
                        fragment_id: entry.fragment_id,
                        score,
                    },
                )
            })
            .collect();

        // Quantizing scores to epsilon-sized buckets keeps the comparator a
        // total order; within a bucket insertion order decides.
        let bucket = |score: f32| (score / SCORE_EPSILON).round() as i64;
        scored.sort_by(|(pos_a, a), (pos_b, b)| {
            bucket(b.score).cmp(&bucket(a.score)).then(pos_a.cmp(pos_b))
        });

        scored.truncate(k);
        Ok(scored.into_iter().map(|(_, hit)| hit).collect())
    }
}

fn l2_norm(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vector(fragment_id: u64, values: Vec<f32>) -> EmbeddingVector {
        EmbeddingVector {
            fragment_id,
            modality: Modality::Text,
            values,
        }
    }

    #[test]
    fn test_build_empty_index() {
        let index = SearchIndex::build(3, "test-model", []).unwrap();
        assert!(index.is_empty());
        assert_eq!(index.dimensions(), 3);
    }

    #[test]
    fn test_query_empty_index_returns_empty() {
        let index = SearchIndex::build(3, "test-model", []).unwrap();
        let hits = index.query(&[1.0, 0.0, 0.0], 5).unwrap();
        assert!(hits.is_empty());
    }

    #[test]
    fn test_query_invalid_k() {
        let index = SearchIndex::build(3, "test-model", []).unwrap();
        let result = index.query(&[1.0, 0.0, 0.0], 0);
        assert!(matches!(result, Err(IndexError::InvalidK)));
    }

    #[test]
    fn test_query_dimension_mismatch_is_hard_error() {
        let index = SearchIndex::build(
            3,
            "test-model",
            [vector(0, vec![1.0, 0.0, 0.0])],
        )
        .unwrap();

        let result = index.query(&[1.0, 0.0], 1);
        assert!(matches!(
            result,
            Err(IndexError::DimensionMismatch { expected: 3, got: 2 })
        ));
    }

    #[test]
    fn test_append_dimension_mismatch() {
        let mut builder = IndexBuilder::new(3, "test-model");
        let result = builder.append([vector(0, vec![1.0, 0.0])]);
        assert!(matches!(result, Err(IndexError::DimensionMismatch { .. })));
    }

    #[test]
    fn test_duplicate_fragment_rejected() {
        let mut builder = IndexBuilder::new(3, "test-model");
        builder.append([vector(1, vec![1.0, 0.0, 0.0])]).unwrap();

        let result = builder.append([vector(1, vec![0.0, 1.0, 0.0])]);
        assert!(matches!(result, Err(IndexError::DuplicateFragment(1))));
    }

    #[test]
    fn test_zero_norm_vector_rejected() {
        let mut builder = IndexBuilder::new(3, "test-model");
        let result = builder.append([vector(0, vec![0.0, 0.0, 0.0])]);
        assert!(matches!(result, Err(IndexError::ZeroNormVector)));
    }

    #[test]
    fn test_ranking_by_score() {
        let index = SearchIndex::build(
            3,
            "test-model",
            [
                vector(0, vec![0.0, 1.0, 0.0]),
                vector(1, vec![1.0, 0.0, 0.0]),
                vector(2, vec![0.6, 0.8, 0.0]),
            ],
        )
        .unwrap();

        let hits = index.query(&[1.0, 0.0, 0.0], 3).unwrap();
        assert_eq!(hits.len(), 3);
        assert_eq!(hits[0].fragment_id, 1);
        assert_eq!(hits[1].fragment_id, 2);
        assert_eq!(hits[2].fragment_id, 0);
        assert!(hits[0].score > hits[1].score && hits[1].score > hits[2].score);
    }

    #[test]
    fn test_self_match_scores_one() {
        let v = vec![0.6, 0.8, 0.0];
        let index = SearchIndex::build(3, "test-model", [vector(7, v.clone())]).unwrap();

        let hits = index.query(&v, 1).unwrap();
        assert_eq!(hits[0].fragment_id, 7);
        assert!((hits[0].score - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_k_larger_than_index_returns_all() {
        let index = SearchIndex::build(
            2,
            "test-model",
            [vector(0, vec![1.0, 0.0]), vector(1, vec![0.0, 1.0])],
        )
        .unwrap();

        let hits = index.query(&[1.0, 0.0], 100).unwrap();
        assert_eq!(hits.len(), 2);
    }

    #[test]
    fn test_ties_broken_by_insertion_order() {
        // Three identical vectors: all score the same, order must follow
        // insertion even though ids are shuffled.
        let v = vec![1.0, 0.0];
        let index = SearchIndex::build(
            2,
            "test-model",
            [
                vector(42, v.clone()),
                vector(7, v.clone()),
                vector(99, v.clone()),
            ],
        )
        .unwrap();

        let hits = index.query(&[1.0, 0.0], 3).unwrap();
        let ids: Vec<u64> = hits.iter().map(|h| h.fragment_id).collect();
        assert_eq!(ids, vec![42, 7, 99]);
    }

    #[test]
    fn test_incremental_append_then_publish() {
        let mut builder = IndexBuilder::new(2, "test-model");
        builder.append([vector(0, vec![1.0, 0.0])]).unwrap();
        builder.append([vector(1, vec![0.0, 1.0])]).unwrap();
        assert_eq!(builder.len(), 2);

        let index = builder.build();
        assert_eq!(index.len(), 2);

        let hits = index.query(&[0.0, 1.0], 1).unwrap();
        assert_eq!(hits[0].fragment_id, 1);
    }

    #[test]
    fn test_model_version_mismatch() {
        let index =
            SearchIndex::build(2, "model-a", [vector(0, vec![1.0, 0.0])]).unwrap();

        assert!(index.verify_model("model-a").is_ok());
        assert!(matches!(
            index.verify_model("model-b"),
            Err(IndexError::ModelVersionMismatch { .. })
        ));
    }

    #[test]
    fn test_query_zero_norm_rejected() {
        let index =
            SearchIndex::build(2, "test-model", [vector(0, vec![1.0, 0.0])]).unwrap();
        let result = index.query(&[0.0, 0.0], 1);
        assert!(matches!(result, Err(IndexError::ZeroNormVector)));
    }
}
