//! Similarity engine: embeddings with a zero-vector fallback and cosine similarity

use std::sync::Arc;

use crate::ports::Embedder;

/// Default embedding width (OpenAI `text-embedding-3-small` / ada-002)
pub const DEFAULT_DIMENSIONS: usize = 1536;

/// Wraps an [`Embedder`] so grouping never fails on provider errors
#[derive(Clone)]
pub struct SimilarityEngine {
    embedder: Arc<dyn Embedder>,
    dimensions: usize,
}

impl SimilarityEngine {
    pub fn new(embedder: Arc<dyn Embedder>, dimensions: usize) -> Self {
        Self {
            embedder,
            dimensions,
        }
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    /// Embed texts, substituting zero vectors wherever the provider fails
    ///
    /// A zero vector has similarity 0.0 with everything, so affected texts
    /// simply never match a group.
    pub async fn embed(&self, texts: &[String]) -> Vec<Vec<f32>> {
        if texts.is_empty() {
            return vec![];
        }

        let vectors = match self.embedder.embed(texts).await {
            Ok(vectors) if vectors.len() == texts.len() => vectors,
            Ok(vectors) => {
                tracing::warn!(
                    expected = texts.len(),
                    got = vectors.len(),
                    "Embedding provider returned wrong number of vectors, using zero vectors"
                );
                return self.zero_vectors(texts.len());
            }
            Err(e) => {
                tracing::warn!(error = %e, count = texts.len(), "Embedding failed, using zero vectors");
                return self.zero_vectors(texts.len());
            }
        };

        vectors
            .into_iter()
            .enumerate()
            .map(|(index, vector)| {
                if vector.len() == self.dimensions {
                    vector
                } else {
                    tracing::warn!(
                        index,
                        expected = self.dimensions,
                        got = vector.len(),
                        "Embedding has wrong dimensionality, using zero vector"
                    );
                    vec![0.0; self.dimensions]
                }
            })
            .collect()
    }

    /// Cosine similarity, see [`cosine_similarity`]
    pub fn similarity(&self, a: &[f32], b: &[f32]) -> f64 {
        cosine_similarity(a, b)
    }

    fn zero_vectors(&self, count: usize) -> Vec<Vec<f32>> {
        vec![vec![0.0; self.dimensions]; count]
    }
}

/// Cosine similarity in [-1, 1]; 0.0 for empty, zero or mismatched vectors
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.is_empty() || a.len() != b.len() {
        return 0.0;
    }

    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (x, y) in a.iter().zip(b) {
        let (x, y) = (f64::from(*x), f64::from(*y));
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    (dot / (norm_a.sqrt() * norm_b.sqrt())).clamp(-1.0, 1.0)
}
