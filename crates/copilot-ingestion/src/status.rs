//! The Status Tracker (§4.9): per (document, bucket) processing status.
//! Writes are idempotent per stage — marking `chunks_done` twice is a
//! no-op on the stored counts (§5 "Shared-resource policy").

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use copilot_core::{Bucket, ProcessingStatus, RequestedStages};
use dashmap::DashMap;
use tracing::debug;

use crate::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Chunking,
    Summarization,
    Graphrag,
    Stp,
}

/// Per-stage counts reported alongside `mark_done`. Only the fields
/// relevant to the stage are expected to be non-zero; the tracker stores
/// whatever it's given verbatim.
#[derive(Debug, Clone, Copy, Default)]
pub struct StageCounts {
    pub chunk_count: usize,
    pub summary_count: usize,
    pub entity_count: usize,
    pub stp_chunk_count: usize,
}

#[async_trait]
pub trait StatusTracker: Send + Sync {
    async fn mark_done(
        &self,
        stage: Stage,
        document_key: &str,
        bucket: Bucket,
        counts: StageCounts,
    ) -> Result<()>;

    async fn mark_failed(&self, stage: Stage, document_key: &str, bucket: Bucket) -> Result<()>;

    async fn get_status(&self, document_key: &str, bucket: Bucket) -> Result<ProcessingStatus>;

    /// Gated against the *requested* stage set, not a fixed one (§4.9).
    async fn is_fully_processed(
        &self,
        document_key: &str,
        bucket: Bucket,
        requested: &RequestedStages,
    ) -> Result<bool> {
        Ok(self.get_status(document_key, bucket).await?.is_fully_processed(requested))
    }
}

fn status_key(document_key: &str, bucket: Bucket) -> String {
    format!("{}::{}", bucket.as_str(), document_key)
}

/// In-process status table backed by a `DashMap`, matching the teacher's
/// established pattern for shared mutable process state (§9 "no hidden
/// mutable module state" — this is an explicit handle passed to callers,
/// not a singleton).
#[derive(Default)]
pub struct InMemoryStatusTracker {
    table: DashMap<String, ProcessingStatus>,
}

impl InMemoryStatusTracker {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

#[async_trait]
impl StatusTracker for InMemoryStatusTracker {
    async fn mark_done(
        &self,
        stage: Stage,
        document_key: &str,
        bucket: Bucket,
        counts: StageCounts,
    ) -> Result<()> {
        let key = status_key(document_key, bucket);
        let mut entry = self.table.entry(key).or_default();
        match stage {
            Stage::Chunking => {
                entry.chunks_done = true;
                entry.chunk_count = counts.chunk_count;
            }
            Stage::Summarization => {
                entry.summary_done = true;
                entry.summary_count = counts.summary_count;
            }
            Stage::Graphrag => {
                entry.graphrag_done = true;
                entry.entity_count = counts.entity_count;
            }
            Stage::Stp => {
                entry.stp_done = true;
                entry.stp_chunk_count = counts.stp_chunk_count;
            }
        }
        entry.updated_at = Some(chrono::Utc::now());
        debug!(document_key, bucket = bucket.as_str(), ?stage, "stage marked done");
        Ok(())
    }

    async fn mark_failed(&self, stage: Stage, document_key: &str, bucket: Bucket) -> Result<()> {
        let key = status_key(document_key, bucket);
        let mut entry = self.table.entry(key).or_default();
        entry.updated_at = Some(chrono::Utc::now());
        debug!(document_key, bucket = bucket.as_str(), ?stage, "stage marked failed");
        Ok(())
    }

    async fn get_status(&self, document_key: &str, bucket: Bucket) -> Result<ProcessingStatus> {
        let key = status_key(document_key, bucket);
        Ok(self.table.get(&key).map(|e| e.clone()).unwrap_or_default())
    }
}

/// A snapshot view used by batch ingestion to decide "skip if already
/// processed" across many documents at once without one round-trip per
/// document.
pub async fn filter_unprocessed(
    tracker: &dyn StatusTracker,
    bucket: Bucket,
    requested: &RequestedStages,
    document_keys: &[String],
) -> Result<Vec<String>> {
    let mut unprocessed = Vec::new();
    let mut cache: HashMap<String, bool> = HashMap::new();
    for key in document_keys {
        if let Some(done) = cache.get(key) {
            if !*done {
                unprocessed.push(key.clone());
            }
            continue;
        }
        let done = tracker.is_fully_processed(key, bucket, requested).await?;
        cache.insert(key.clone(), done);
        if !done {
            unprocessed.push(key.clone());
        }
    }
    Ok(unprocessed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn marking_a_stage_done_is_idempotent() {
        let tracker = InMemoryStatusTracker::new();
        let counts = StageCounts { chunk_count: 5, ..Default::default() };
        tracker.mark_done(Stage::Chunking, "doc.pdf", Bucket::Policy, counts).await.unwrap();
        tracker.mark_done(Stage::Chunking, "doc.pdf", Bucket::Policy, counts).await.unwrap();

        let status = tracker.get_status("doc.pdf", Bucket::Policy).await.unwrap();
        assert!(status.chunks_done);
        assert_eq!(status.chunk_count, 5);
    }

    #[tokio::test]
    async fn is_fully_processed_depends_on_requested_stages() {
        let tracker = InMemoryStatusTracker::new();
        tracker
            .mark_done(Stage::Chunking, "doc.pdf", Bucket::Policy, StageCounts::default())
            .await
            .unwrap();

        let chunking_only = RequestedStages { chunking: true, ..Default::default() };
        assert!(tracker.is_fully_processed("doc.pdf", Bucket::Policy, &chunking_only).await.unwrap());

        let chunking_and_summary = RequestedStages {
            chunking: true,
            summarization: true,
            ..Default::default()
        };
        assert!(!tracker
            .is_fully_processed("doc.pdf", Bucket::Policy, &chunking_and_summary)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn filter_unprocessed_skips_completed_documents() {
        let tracker = InMemoryStatusTracker::new();
        tracker
            .mark_done(Stage::Chunking, "a.pdf", Bucket::Policy, StageCounts::default())
            .await
            .unwrap();

        let requested = RequestedStages { chunking: true, ..Default::default() };
        let keys = vec!["a.pdf".to_string(), "b.pdf".to_string()];
        let remaining = filter_unprocessed(tracker.as_ref(), Bucket::Policy, &requested, &keys)
            .await
            .unwrap();
        assert_eq!(remaining, vec!["b.pdf".to_string()]);
    }
}
