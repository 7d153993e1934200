//! Bridges `copilot-context`'s store traits to the narrow sink traits
//! `copilot-ingestion`'s orchestrator expects. Kept here, at the
//! composition root, rather than in either crate, so neither gains a
//! dependency on the other (§9 "no circular crate dependencies").

use std::sync::Arc;

use async_trait::async_trait;
use copilot_context::{
    GraphStore, InMemoryGraphStore, InMemoryStpVectorStore, InMemoryVectorStore, StpVectorStore, VectorStore,
};
use copilot_core::{Document, EmbeddedChunk, EmbeddedSummary, StpChunk};
use copilot_ingestion::{ChunkSink, GraphSink, IngestionError, Result, StpSink};

fn to_ingestion_error(err: impl std::fmt::Display) -> IngestionError {
    IngestionError::ExternalUnavailable(err.to_string())
}

pub struct ContextChunkSink {
    pub vector_store: Arc<InMemoryVectorStore>,
}

#[async_trait]
impl ChunkSink for ContextChunkSink {
    async fn insert_chunks(&self, chunks: Vec<EmbeddedChunk>) -> Result<()> {
        self.vector_store.insert_chunks(chunks).await.map_err(to_ingestion_error)
    }

    async fn insert_summary(&self, summary: EmbeddedSummary) -> Result<()> {
        self.vector_store.insert_summary(summary).await.map_err(to_ingestion_error)
    }
}

pub struct ContextGraphSink {
    pub graph_store: Arc<InMemoryGraphStore>,
}

#[async_trait]
impl GraphSink for ContextGraphSink {
    async fn commit(
        &self,
        document: &Document,
        entities: Vec<copilot_core::GraphEntity>,
        relationships: Vec<copilot_core::GraphRelationship>,
        communities: Vec<copilot_core::Community>,
        claims: Vec<copilot_core::Claim>,
        covariates: Vec<copilot_core::Covariate>,
        text_units: Vec<copilot_core::TextUnit>,
    ) -> Result<usize> {
        let counts = self
            .graph_store
            .commit_document(document, entities, relationships, communities, claims, covariates, text_units)
            .await
            .map_err(to_ingestion_error)?;
        Ok(counts.entities + counts.relationships)
    }
}

pub struct ContextStpSink {
    pub stp_vector_store: Arc<InMemoryStpVectorStore>,
}

#[async_trait]
impl StpSink for ContextStpSink {
    async fn upsert_batch(&self, chunks: Vec<StpChunk>, expected_dim: usize) -> Result<usize> {
        self.stp_vector_store
            .upsert_batch(chunks, expected_dim)
            .await
            .map_err(to_ingestion_error)
    }
}
