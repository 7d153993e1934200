//! The Embedder (§4.6): batched embedding generation with dimension-aware
//! fallbacks. Three model selectors: `chunk` (large dim), `summary`
//! (medium dim), and `stp` (small dim, only used when the STP pipeline is
//! enabled). Empty/blank inputs and per-batch failures both map to zero
//! vectors rather than aborting the batch (§3 "all-zero is the sentinel for
//! embedding failed").

use async_trait::async_trait;
use copilot_core::Embedding;
use tracing::error;

use crate::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbeddingModel {
    Chunk,
    Summary,
    Stp,
}

impl EmbeddingModel {
    pub fn dim(&self, dims: &EmbedderDims) -> usize {
        match self {
            EmbeddingModel::Chunk => dims.chunk_dim,
            EmbeddingModel::Summary => dims.summary_dim,
            EmbeddingModel::Stp => dims.stp_dim,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct EmbedderDims {
    pub chunk_dim: usize,
    pub summary_dim: usize,
    pub stp_dim: usize,
}

/// A loaded embedding backend. Loaded once at startup and held for the
/// process lifetime (§4.6, §5 "Shared-resource policy"); `unload` releases
/// accelerator memory for graceful shutdown.
#[async_trait]
pub trait EmbeddingBackend: Send + Sync {
    /// Embeds one batch of non-empty texts against the given model. The
    /// backend is never handed blank strings; the caller filters those out
    /// and substitutes zero vectors itself so that a flaky backend can't
    /// turn a blank input into a spurious error.
    async fn embed_batch(&self, model: EmbeddingModel, texts: &[&str]) -> Result<Vec<Embedding>>;

    async fn unload(&self) {}
}

/// Deterministic bag-of-characters embedding, useful as a backend-free
/// default so the embedder is exercisable without a real model server.
pub struct HashingEmbeddingBackend;

#[async_trait]
impl EmbeddingBackend for HashingEmbeddingBackend {
    async fn embed_batch(&self, model: EmbeddingModel, texts: &[&str]) -> Result<Vec<Embedding>> {
        let dim = match model {
            EmbeddingModel::Chunk => 1024,
            EmbeddingModel::Summary => 768,
            EmbeddingModel::Stp => 384,
        };
        Ok(texts.iter().map(|t| hash_embed(t, dim)).collect())
    }
}

fn hash_embed(text: &str, dim: usize) -> Embedding {
    let mut v = vec![0.0f32; dim];
    for (i, byte) in text.bytes().enumerate() {
        v[i % dim] += byte as f32 / 255.0;
    }
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in &mut v {
            *x /= norm;
        }
    }
    Embedding(v)
}

/// Batched, dimension-aware wrapper around an [`EmbeddingBackend`] (§4.6).
pub struct Embedder<'a> {
    backend: &'a dyn EmbeddingBackend,
    dims: EmbedderDims,
    batch_size: usize,
}

impl<'a> Embedder<'a> {
    pub fn new(backend: &'a dyn EmbeddingBackend, dims: EmbedderDims, batch_size: usize) -> Self {
        Self { backend, dims, batch_size }
    }

    /// Embeds `texts` in order, preserving index alignment. Blank inputs
    /// never reach the backend: they map straight to a zero vector. Any
    /// batch the backend fails on is replaced wholesale with zero vectors
    /// and logged at error, so one bad batch never aborts the others.
    pub async fn embed(&self, model: EmbeddingModel, texts: &[String]) -> Vec<Embedding> {
        let dim = model.dim(&self.dims);
        let mut out = vec![Embedding::zeros(dim); texts.len()];

        for batch_start in (0..texts.len()).step_by(self.batch_size.max(1)) {
            let batch_end = (batch_start + self.batch_size).min(texts.len());
            let indices: Vec<usize> = (batch_start..batch_end)
                .filter(|&i| !texts[i].trim().is_empty())
                .collect();
            if indices.is_empty() {
                continue;
            }
            let batch_texts: Vec<&str> = indices.iter().map(|&i| texts[i].as_str()).collect();

            match self.backend.embed_batch(model, &batch_texts).await {
                Ok(embeddings) if embeddings.len() == indices.len() => {
                    for (idx, embedding) in indices.iter().zip(embeddings) {
                        out[*idx] = embedding.normalized_to(dim);
                    }
                }
                Ok(mismatched) => {
                    error!(
                        expected = indices.len(),
                        got = mismatched.len(),
                        "embedding batch returned a mismatched count; zeroing batch"
                    );
                }
                Err(err) => {
                    error!(error = %err, batch_start, batch_end, "embedding batch failed; zeroing batch");
                }
            }
        }

        out
    }

    pub async fn embed_one(&self, model: EmbeddingModel, text: &str) -> Embedding {
        self.embed(model, std::slice::from_ref(&text.to_string()))
            .await
            .into_iter()
            .next()
            .unwrap_or_else(|| Embedding::zeros(model.dim(&self.dims)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dims() -> EmbedderDims {
        EmbedderDims { chunk_dim: 16, summary_dim: 8, stp_dim: 4 }
    }

    #[tokio::test]
    async fn blank_inputs_map_to_zero_vectors_without_calling_backend() {
        let backend = HashingEmbeddingBackend;
        let embedder = Embedder::new(&backend, dims(), 8);
        let out = embedder.embed(EmbeddingModel::Chunk, &["   ".to_string(), "".to_string()]).await;
        assert!(out.iter().all(|e| e.is_sentinel_zero()));
    }

    #[tokio::test]
    async fn non_blank_inputs_produce_dimension_matching_vectors() {
        let backend = HashingEmbeddingBackend;
        let embedder = Embedder::new(&backend, dims(), 8);
        let out = embedder
            .embed(EmbeddingModel::Summary, &["climate tipping points".to_string()])
            .await;
        assert_eq!(out[0].dim(), 8);
        assert!(!out[0].is_sentinel_zero());
    }

    struct FailingBackend;

    #[async_trait]
    impl EmbeddingBackend for FailingBackend {
        async fn embed_batch(&self, _model: EmbeddingModel, _texts: &[&str]) -> Result<Vec<Embedding>> {
            Err(crate::IngestionError::ExternalUnavailable("embedder down".to_string()))
        }
    }

    #[tokio::test]
    async fn failing_batch_degrades_to_zero_vectors_rather_than_failing_the_call() {
        let backend = FailingBackend;
        let embedder = Embedder::new(&backend, dims(), 8);
        let out = embedder.embed(EmbeddingModel::Stp, &["some stp-relevant text".to_string()]).await;
        assert_eq!(out.len(), 1);
        assert!(out[0].is_sentinel_zero());
    }

    #[tokio::test]
    async fn batches_are_split_by_configured_batch_size() {
        let backend = HashingEmbeddingBackend;
        let embedder = Embedder::new(&backend, dims(), 2);
        let texts: Vec<String> = (0..5).map(|i| format!("chunk {i}")).collect();
        let out = embedder.embed(EmbeddingModel::Chunk, &texts).await;
        assert_eq!(out.len(), 5);
        assert!(out.iter().all(|e| !e.is_sentinel_zero()));
    }
}
