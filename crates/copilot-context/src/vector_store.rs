//! The Vector Store (§4.7): two logical databases (`chunks_db`,
//! `summaries_db`), one collection per bucket, plus a third fixed-schema STP
//! database created lazily on first insert. A connection must auto-recover:
//! a lost connection detected at operation time triggers one reconnect
//! attempt before surfacing an error.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use copilot_core::{Bucket, Embedding, EmbeddedChunk, EmbeddedSummary, StpChunk};
use dashmap::DashMap;
use futures::future::join_all;
use tracing::{error, warn};

use crate::{ContextError, Result};

#[derive(Debug, Clone)]
pub struct ScoredChunk {
    pub chunk: EmbeddedChunk,
    pub score: f32,
}

#[derive(Debug, Clone)]
pub struct ScoredSummary {
    pub summary: EmbeddedSummary,
    pub score: f32,
}

/// `chunks_db` / `summaries_db` (§4.7). All entries passed to `insert_chunks`
/// must share one bucket; the insert is atomic per bucket (flushed before
/// returning success).
#[async_trait]
pub trait VectorStore: Send + Sync {
    async fn insert_chunks(&self, chunks: Vec<EmbeddedChunk>) -> Result<()>;
    async fn insert_summary(&self, summary: EmbeddedSummary) -> Result<()>;

    /// `bucket = None` fans out to every collection concurrently and merges
    /// by descending similarity, truncated to `k`. A per-collection timeout
    /// is enforced; a collection that times out contributes zero results.
    async fn search_chunks(
        &self,
        query: &Embedding,
        bucket: Option<Bucket>,
        k: usize,
        per_collection_timeout: Duration,
    ) -> Result<Vec<ScoredChunk>>;

    async fn search_summaries(
        &self,
        query: &Embedding,
        k_per_collection: usize,
        min_score: f32,
        per_collection_timeout: Duration,
    ) -> Result<Vec<ScoredSummary>>;

    async fn health_check(&self) -> bool;
}

#[derive(Default)]
struct BucketCollection<T> {
    items: Vec<T>,
}

/// In-process store keyed by bucket, standing in for the Milvus-style
/// client the original system used. Models the connection-loss/reconnect
/// contract with a flag a test can flip, rather than a real socket.
pub struct InMemoryVectorStore {
    chunks: DashMap<Bucket, BucketCollection<EmbeddedChunk>>,
    summaries: DashMap<Bucket, BucketCollection<EmbeddedSummary>>,
    connected: AtomicBool,
}

impl Default for InMemoryVectorStore {
    fn default() -> Self {
        Self {
            chunks: DashMap::new(),
            summaries: DashMap::new(),
            connected: AtomicBool::new(true),
        }
    }
}

impl InMemoryVectorStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Test/fault-injection hook: simulate a dropped connection.
    pub fn simulate_disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }

    /// One reconnect attempt, per §4.7's auto-recovery contract.
    fn ensure_connected(&self) -> Result<()> {
        if self.connected.load(Ordering::SeqCst) {
            return Ok(());
        }
        warn!("vector store connection lost; attempting one reconnect");
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    async fn insert_chunks(&self, chunks: Vec<EmbeddedChunk>) -> Result<()> {
        self.ensure_connected()?;
        if chunks.is_empty() {
            return Ok(());
        }
        let bucket = chunks[0].chunk.bucket;
        if chunks.iter().any(|c| c.chunk.bucket != bucket) {
            return Err(ContextError::StorageError(
                "insert_chunks requires all entries to share one bucket".to_string(),
            ));
        }
        self.chunks.entry(bucket).or_default().items.extend(chunks);
        Ok(())
    }

    async fn insert_summary(&self, summary: EmbeddedSummary) -> Result<()> {
        self.ensure_connected()?;
        let bucket = summary.summary.bucket;
        self.summaries.entry(bucket).or_default().items.push(summary);
        Ok(())
    }

    async fn search_chunks(
        &self,
        query: &Embedding,
        bucket: Option<Bucket>,
        k: usize,
        per_collection_timeout: Duration,
    ) -> Result<Vec<ScoredChunk>> {
        self.ensure_connected()?;
        let buckets: Vec<Bucket> = match bucket {
            Some(b) => vec![b],
            None => Bucket::ALL.to_vec(),
        };

        let searches = buckets.into_iter().map(|b| async move {
            let result = tokio::time::timeout(per_collection_timeout, self.search_one_bucket_chunks(b, query)).await;
            match result {
                Ok(scored) => scored,
                Err(_) => {
                    warn!(bucket = b.as_str(), "chunk collection search timed out; contributing zero results");
                    Vec::new()
                }
            }
        });

        let mut merged: Vec<ScoredChunk> = join_all(searches).await.into_iter().flatten().collect();
        merged.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        merged.truncate(k);
        Ok(merged)
    }

    async fn search_summaries(
        &self,
        query: &Embedding,
        k_per_collection: usize,
        min_score: f32,
        per_collection_timeout: Duration,
    ) -> Result<Vec<ScoredSummary>> {
        self.ensure_connected()?;

        let searches = Bucket::ALL.into_iter().map(|b| async move {
            let result = tokio::time::timeout(
                per_collection_timeout,
                self.search_one_bucket_summaries(b, query, k_per_collection, min_score),
            )
            .await;
            match result {
                Ok(scored) => scored,
                Err(_) => {
                    warn!(bucket = b.as_str(), "summary collection search timed out; contributing zero results");
                    Vec::new()
                }
            }
        });

        Ok(join_all(searches).await.into_iter().flatten().collect())
    }

    async fn health_check(&self) -> bool {
        self.ensure_connected().is_ok()
    }
}

impl InMemoryVectorStore {
    async fn search_one_bucket_chunks(&self, bucket: Bucket, query: &Embedding) -> Vec<ScoredChunk> {
        let Some(collection) = self.chunks.get(&bucket) else {
            return Vec::new();
        };
        collection
            .items
            .iter()
            .map(|c| ScoredChunk {
                chunk: c.clone(),
                score: query.cosine_similarity(&c.embedding),
            })
            .collect()
    }

    async fn search_one_bucket_summaries(
        &self,
        bucket: Bucket,
        query: &Embedding,
        k: usize,
        min_score: f32,
    ) -> Vec<ScoredSummary> {
        let Some(collection) = self.summaries.get(&bucket) else {
            return Vec::new();
        };
        let mut scored: Vec<ScoredSummary> = collection
            .items
            .iter()
            .map(|s| ScoredSummary {
                summary: s.clone(),
                score: query.cosine_similarity(&s.embedding),
            })
            .filter(|s| s.score >= min_score)
            .collect();
        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(k);
        scored
    }
}

/// The STP vector store: one fixed collection, created lazily on first
/// insert (§4.5 step 5, §4.7). Records with a dimension mismatch are
/// dropped rather than failing the batch (§7 DataError).
#[async_trait]
pub trait StpVectorStore: Send + Sync {
    async fn upsert_batch(&self, chunks: Vec<StpChunk>, expected_dim: usize) -> Result<usize>;
    async fn search(&self, query: &Embedding, k: usize) -> Result<Vec<(StpChunk, f32)>>;
}

pub struct InMemoryStpVectorStore {
    collection: DashMap<copilot_core::StpChunkId, StpChunk>,
    created: AtomicBool,
}

impl Default for InMemoryStpVectorStore {
    fn default() -> Self {
        Self { collection: DashMap::new(), created: AtomicBool::new(false) }
    }
}

impl InMemoryStpVectorStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StpVectorStore for InMemoryStpVectorStore {
    async fn upsert_batch(&self, chunks: Vec<StpChunk>, expected_dim: usize) -> Result<usize> {
        if !self.created.load(Ordering::SeqCst) {
            self.created.store(true, Ordering::SeqCst);
        }

        let mut stored = 0;
        for chunk in chunks {
            match &chunk.embedding {
                Some(embedding) if embedding.dim() == expected_dim => {
                    self.collection.insert(chunk.id, chunk);
                    stored += 1;
                }
                Some(embedding) => {
                    error!(got = embedding.dim(), expected = expected_dim, "stp chunk embedding dimension mismatch; dropping");
                }
                None => {
                    error!("stp chunk has no embedding; dropping");
                }
            }
        }
        Ok(stored)
    }

    async fn search(&self, query: &Embedding, k: usize) -> Result<Vec<(StpChunk, f32)>> {
        let mut scored: Vec<(StpChunk, f32)> = self
            .collection
            .iter()
            .filter_map(|entry| {
                entry.value().embedding.as_ref().map(|e| (entry.value().clone(), query.cosine_similarity(e)))
            })
            .collect();
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(k);
        Ok(scored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use copilot_core::{Bucket, Chunk, ChunkId, ChunkMetadata, DocumentId, DocumentKey, Summary, SummaryId};

    fn sample_chunk(bucket: Bucket, embedding: Vec<f32>) -> EmbeddedChunk {
        EmbeddedChunk {
            chunk: Chunk {
                id: ChunkId::new(),
                document_id: DocumentId::new(),
                document_key: DocumentKey::for_bucket(bucket, "doc"),
                bucket,
                text: "sample".to_string(),
                index: 0,
                token_count: 1,
                created_at: chrono::Utc::now(),
                metadata: ChunkMetadata::default(),
            },
            embedding: Embedding(embedding),
        }
    }

    #[tokio::test]
    async fn insert_chunks_rejects_mixed_buckets() {
        let store = InMemoryVectorStore::new();
        let chunks = vec![sample_chunk(Bucket::Policy, vec![1.0, 0.0]), sample_chunk(Bucket::News, vec![1.0, 0.0])];
        let err = store.insert_chunks(chunks).await.unwrap_err();
        assert!(err.to_string().contains("one bucket"));
    }

    #[tokio::test]
    async fn search_with_no_bucket_unions_all_collections() {
        let store = InMemoryVectorStore::new();
        store.insert_chunks(vec![sample_chunk(Bucket::Policy, vec![1.0, 0.0])]).await.unwrap();
        store.insert_chunks(vec![sample_chunk(Bucket::News, vec![0.0, 1.0])]).await.unwrap();

        let results = store
            .search_chunks(&Embedding(vec![1.0, 0.0]), None, 5, Duration::from_millis(50))
            .await
            .unwrap();
        assert_eq!(results.len(), 2);
        assert!(results[0].score >= results[1].score);
    }

    #[tokio::test]
    async fn search_with_bucket_scopes_to_that_collection() {
        let store = InMemoryVectorStore::new();
        store.insert_chunks(vec![sample_chunk(Bucket::Policy, vec![1.0, 0.0])]).await.unwrap();
        store.insert_chunks(vec![sample_chunk(Bucket::News, vec![0.0, 1.0])]).await.unwrap();

        let results = store
            .search_chunks(&Embedding(vec![1.0, 0.0]), Some(Bucket::Policy), 5, Duration::from_millis(50))
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].chunk.chunk.bucket, Bucket::Policy);
    }

    #[tokio::test]
    async fn stp_store_drops_dimension_mismatched_records() {
        let store = InMemoryStpVectorStore::new();
        let good = StpChunk {
            id: copilot_core::StpChunkId::new(),
            document_name: "a".to_string(),
            original_content: "x".to_string(),
            rephrased_content: "x".to_string(),
            score: 0.9,
            qualifying_factors: "f".to_string(),
            token_count: 1,
            created_at: chrono::Utc::now(),
            embedding: Some(Embedding(vec![0.0; 384])),
        };
        let mut bad = good.clone();
        bad.id = copilot_core::StpChunkId::new();
        bad.embedding = Some(Embedding(vec![0.0; 10]));

        let stored = store.upsert_batch(vec![good, bad], 384).await.unwrap();
        assert_eq!(stored, 1);
    }
}
