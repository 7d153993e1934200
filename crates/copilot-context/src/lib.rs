//! Context Engine for the Climate Document Intelligence Platform
//!
//! Provides the Vector Store (§4.7), Graph Store (§4.8), and the Retrieval
//! Orchestrator (§4.12): parallel fan-out search, fusion, cross-encoder
//! rerank, and token/character-budgeted context assembly.

pub mod graph_store;
pub mod reranking;
pub mod retrieval;
pub mod vector_store;

pub use graph_store::{DocumentGraph, GraphCommitCounts, GraphSearchHit, GraphStore, InMemoryGraphStore, SearchTarget};
pub use reranking::{CrossEncoderReranker, Reranker, RerankerConfig, RerankerResult};
pub use retrieval::{
    assemble_context, fan_out_retrieve, fuse_and_rerank, tipping_point_signature, AssembledContextItem,
    NoopTippingPointLookup, QueryState, QueryTurn, RetrievalRequest, RetrievedItem, SourceKind, TippingPointLookup,
    NO_TIPPING_POINT_AVAILABLE,
};
pub use vector_store::{InMemoryStpVectorStore, InMemoryVectorStore, ScoredChunk, ScoredSummary, StpVectorStore, VectorStore};

/// Error types for context operations
#[derive(Debug, thiserror::Error)]
pub enum ContextError {
    #[error("Token limit exceeded: {current} / {limit}")]
    TokenLimitExceeded { current: usize, limit: usize },

    #[error("Invalid tier: {0}")]
    InvalidTier(String),

    #[error("Memory item not found: {0}")]
    ItemNotFound(String),

    #[error("Compression failed: {0}")]
    CompressionFailed(String),

    #[error("Retrieval failed: {0}")]
    RetrievalFailed(String),

    #[error("Storage error: {0}")]
    StorageError(String),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Core error: {0}")]
    CoreError(String),
}

pub type Result<T> = std::result::Result<T, ContextError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ContextError::TokenLimitExceeded {
            current: 250000,
            limit: 200000,
        };
        assert!(err.to_string().contains("250000"));
        assert!(err.to_string().contains("200000"));
    }
}
