//! Document Ingestion Pipeline for the Climate Document Intelligence Platform
//!
//! Bucket-aware ingestion: extraction, chunking, summarization, graph
//! extraction, the Social Tipping Point sub-pipeline, embedding, and the
//! orchestrator (§4.10) that wires those stages together per document and
//! drives batch ingestion, wrapped by a Background Task Manager for
//! long-running jobs.

pub mod chunking;
pub mod embedding;
pub mod extraction;
pub mod extractors;
pub mod graph_extraction;
pub mod pipeline;
pub mod status;
pub mod stp;
pub mod summarization;
pub mod tasks;

pub use chunking::{
    chunker_for_bucket, count_tokens, Chunker, ChunkingOutcome, NewsChunker, PolicyChunker,
    RecursiveSplitter, ResearchPapersChunker, ScientificDataChunker,
};
pub use embedding::{Embedder, EmbedderDims, EmbeddingBackend, EmbeddingModel, HashingEmbeddingBackend};
pub use extraction::Extractor;
pub use extractors::{ExtractionResult, ExtractorRegistry, JsonExtractor, MarkdownExtractor, PlainTextExtractor, TextExtractor};
pub use graph_extraction::{
    ExtractedEntityRef, ExtractedRelationshipRef, GraphExtractionOutput, GraphExtractor, GraphRagExtraction,
    GraphRagLlm, HeuristicGraphRagLlm,
};
pub use pipeline::{
    expand_news_spreadsheet_rows, BatchDocument, BatchIngestor, ChunkSink, GraphSink, IngestOutcome, IngestRequest,
    IngestResult, IngestionOrchestrator, NewsSpreadsheetRow, StageResult, StpSink,
};
pub use status::{InMemoryStatusTracker, Stage, StageCounts, StatusTracker};
pub use stp::{
    HeuristicQualifyingFactors, KeywordStpClassifier, QualifyingFactorsGenerator, StpClassifier, StpConfigParams,
    StpPipeline, StpRephraser, TruncatingRephraser,
};
pub use summarization::{ExtractiveFallback, SummaryLlm, Summarizer};
pub use tasks::{BackgroundTaskManager, TaskCounts, TaskRecord, TaskStatus};

/// Error types for ingestion operations
#[derive(Debug, thiserror::Error)]
pub enum IngestionError {
    #[error("Unsupported document type: {0}")]
    UnsupportedType(String),

    #[error("Extraction failed: {0}")]
    ExtractionFailed(String),

    #[error("Chunking failed: {0}")]
    ChunkingFailed(String),

    #[error("Processing failed: {0}")]
    ProcessingFailed(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Encoding error: {0}")]
    EncodingError(String),

    #[error("Pipeline error: {0}")]
    PipelineError(String),

    #[error("Duplicate document: {0}")]
    DuplicateDocument(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("External backend unavailable: {0}")]
    ExternalUnavailable(String),
}

pub type Result<T> = std::result::Result<T, IngestionError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = IngestionError::UnsupportedType("application/octet-stream".to_string());
        assert!(err.to_string().contains("Unsupported document type"));
    }
}
