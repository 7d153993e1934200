//! The Ingestion Orchestrator (§4.10): single-document mode and batch mode,
//! wrapped by a Background Task Manager for long-running jobs. Wires
//! together the Extractor, bucket-dispatched Chunker, Summarizer, Graph
//! Extractor, STP pipeline, Embedder and the store/status adapters behind
//! small, mockable traits so the orchestrator has no opinion about which
//! concrete vector/graph/status backend it's talking to.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use copilot_core::{
    Bucket, Chunk, Document, DocumentKey, EmbeddedChunk, EmbeddedSummary, RequestedStages, StpChunk,
};
use tokio::sync::Semaphore;
use tracing::{error, info, warn};

use crate::embedding::{Embedder, EmbeddingModel};
use crate::extraction::Extractor;
use crate::graph_extraction::GraphExtractor;
use crate::status::{Stage, StageCounts, StatusTracker};
use crate::stp::StpPipeline;
use crate::summarization::Summarizer;
use crate::{IngestionError, Result};

/// Overall per-document ingestion outcome (§4.10 step 6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    Success,
    PartialSuccess,
    Failed,
}

#[derive(Debug, Clone, Default)]
pub struct StageResult {
    pub ran: bool,
    pub succeeded: bool,
    pub count: usize,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct IngestResult {
    pub document_id: Option<copilot_core::DocumentId>,
    pub chunking: StageResult,
    pub summarization: StageResult,
    pub graphrag: StageResult,
    pub stp: StageResult,
    pub outcome: Option<IngestOutcome>,
}

impl IngestResult {
    fn compute_outcome(&mut self, requested: &RequestedStages) {
        let ran: Vec<&StageResult> = [
            (requested.chunking, &self.chunking),
            (requested.summarization, &self.summarization),
            (requested.graphrag, &self.graphrag),
            (requested.stp, &self.stp),
        ]
        .into_iter()
        .filter(|(wanted, _)| *wanted)
        .map(|(_, r)| r)
        .collect();

        if ran.is_empty() {
            self.outcome = Some(IngestOutcome::Failed);
            return;
        }
        let succeeded = ran.iter().filter(|r| r.succeeded).count();
        self.outcome = Some(if succeeded == ran.len() {
            IngestOutcome::Success
        } else if succeeded == 0 {
            IngestOutcome::Failed
        } else {
            IngestOutcome::PartialSuccess
        });
    }
}

/// Committed graph artifacts for one document, handed to whatever
/// `copilot-context::GraphStore` the composition root wires up. Kept
/// narrow (a trait, not a concrete dependency) so this crate never depends
/// on `copilot-context`.
#[async_trait]
pub trait GraphSink: Send + Sync {
    #[allow(clippy::too_many_arguments)]
    async fn commit(
        &self,
        document: &Document,
        entities: Vec<copilot_core::GraphEntity>,
        relationships: Vec<copilot_core::GraphRelationship>,
        communities: Vec<copilot_core::Community>,
        claims: Vec<copilot_core::Claim>,
        covariates: Vec<copilot_core::Covariate>,
        text_units: Vec<copilot_core::TextUnit>,
    ) -> Result<usize>;
}

#[async_trait]
pub trait ChunkSink: Send + Sync {
    async fn insert_chunks(&self, chunks: Vec<EmbeddedChunk>) -> Result<()>;
    async fn insert_summary(&self, summary: EmbeddedSummary) -> Result<()>;
}

#[async_trait]
pub trait StpSink: Send + Sync {
    async fn upsert_batch(&self, chunks: Vec<StpChunk>, expected_dim: usize) -> Result<usize>;
}

/// One ingestion request (§4.10 "Single-document mode").
pub struct IngestRequest<'a> {
    pub content: &'a [u8],
    pub filename_or_url: &'a str,
    pub bucket: Bucket,
    pub requested: RequestedStages,
    /// Set when this request is one row of an expanded news spreadsheet
    /// (§4.1, §4.10 step 2); stamped onto every chunk's
    /// `ChunkMetadata::row_index` so downstream consumers can recover which
    /// spreadsheet row a chunk came from (§8 property 4).
    pub row_index: Option<usize>,
}

/// The document pipeline's collaborators, gathered in one place so
/// `ingest_document`'s signature stays manageable. All fields are borrowed
/// references so the caller owns lifetimes and can swap implementations
/// per test.
pub struct IngestionOrchestrator<'a> {
    pub extractor: &'a Extractor,
    pub summarizer_llm: &'a dyn crate::summarization::SummaryLlm,
    pub graphrag_llm: &'a dyn crate::graph_extraction::GraphRagLlm,
    pub entity_types_by_bucket: &'a HashMap<String, Vec<String>>,
    pub graphrag_min_text_length: usize,
    pub stp_classifier: &'a dyn crate::stp::StpClassifier,
    pub stp_rephraser: &'a dyn crate::stp::StpRephraser,
    pub stp_factors: &'a dyn crate::stp::QualifyingFactorsGenerator,
    pub stp_params: crate::stp::StpConfigParams,
    pub stp_embedding_dim: usize,
    pub embedder: &'a Embedder<'a>,
    pub chunk_sink: &'a dyn ChunkSink,
    pub graph_sink: &'a dyn GraphSink,
    pub stp_sink: &'a dyn StpSink,
    pub status: &'a dyn StatusTracker,
}

impl<'a> IngestionOrchestrator<'a> {
    /// Runs every enabled stage for one document. Bucket `scientificdata`
    /// implicitly disables graphrag/stp (§4.10 step 3) before anything else
    /// happens. Stages run independently; one stage's failure does not
    /// prevent the others from running (§4.10 step 5, §5 ordering).
    pub async fn ingest_document(&self, request: IngestRequest<'_>) -> Result<IngestResult> {
        let requested = request.requested.masked_for_bucket(request.bucket);
        let document_key = DocumentKey::for_bucket(request.bucket, request.filename_or_url);
        let document = Document::new(document_key.clone(), request.bucket);

        let elements = match self.extractor.extract(request.content, request.filename_or_url).await {
            Ok(elements) => elements,
            Err(err) => {
                error!(document_key = %document_key, error = %err, "extraction failed; no stages can run");
                return Err(err);
            }
        };

        let mut result = IngestResult { document_id: Some(document.id), ..Default::default() };

        if requested.chunking || requested.summarization {
            let chunker = crate::chunking::chunker_for_bucket(request.bucket);
            let mut outcome = chunker.chunk(&elements, document.id, &document_key);
            if let Some(row_index) = request.row_index {
                for chunk in &mut outcome.chunks {
                    chunk.metadata.row_index = Some(row_index);
                }
            }

            if requested.summarization {
                let full_text = elements.iter().map(|e| e.text.as_str()).collect::<Vec<_>>().join("\n\n");
                result.summarization = self.run_summarization_stage(&document, &document_key, &full_text).await;
            }

            if requested.chunking {
                result.chunking = self.run_chunking_stage(&document, &document_key, outcome.chunks).await;
            }
        }

        if requested.graphrag {
            let chunker = crate::chunking::chunker_for_bucket(request.bucket);
            let chunks = chunker.chunk(&elements, document.id, &document_key).chunks;
            result.graphrag = self.run_graphrag_stage(&document, &document_key, &chunks).await;
        }

        if requested.stp {
            result.stp = self.run_stp_stage(&document, &document_key, &elements).await;
        }

        result.compute_outcome(&requested);
        Ok(result)
    }

    async fn run_chunking_stage(&self, document: &Document, document_key: &DocumentKey, chunks: Vec<Chunk>) -> StageResult {
        if chunks.is_empty() {
            return StageResult { ran: true, succeeded: true, count: 0, error: None };
        }
        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let embeddings = self.embedder.embed(EmbeddingModel::Chunk, &texts).await;

        let embedded: Vec<EmbeddedChunk> = chunks
            .into_iter()
            .zip(embeddings)
            .map(|(chunk, embedding)| EmbeddedChunk { chunk, embedding })
            .collect();
        let count = embedded.len();

        match self.chunk_sink.insert_chunks(embedded).await {
            Ok(()) => {
                let _ = self
                    .status
                    .mark_done(Stage::Chunking, document_key.as_str(), document.bucket, StageCounts { chunk_count: count, ..Default::default() })
                    .await;
                StageResult { ran: true, succeeded: true, count, error: None }
            }
            Err(err) => {
                warn!(document_key = %document_key, error = %err, "chunk insert failed");
                let _ = self.status.mark_failed(Stage::Chunking, document_key.as_str(), document.bucket).await;
                StageResult { ran: true, succeeded: false, count: 0, error: Some(err.to_string()) }
            }
        }
    }

    async fn run_summarization_stage(&self, document: &Document, document_key: &DocumentKey, full_text: &str) -> StageResult {
        let summarizer = Summarizer::new(self.summarizer_llm);
        let summary = match summarizer.summarize(document, full_text).await {
            Ok(summary) => summary,
            Err(err) => {
                warn!(document_key = %document_key, error = %err, "summarization failed");
                let _ = self.status.mark_failed(Stage::Summarization, document_key.as_str(), document.bucket).await;
                return StageResult { ran: true, succeeded: false, count: 0, error: Some(err.to_string()) };
            }
        };

        let embedding = self.embedder.embed_one(EmbeddingModel::Summary, &summary.text).await;
        let embedded = EmbeddedSummary { summary, embedding };

        match self.chunk_sink.insert_summary(embedded).await {
            Ok(()) => {
                let _ = self
                    .status
                    .mark_done(Stage::Summarization, document_key.as_str(), document.bucket, StageCounts { summary_count: 1, ..Default::default() })
                    .await;
                StageResult { ran: true, succeeded: true, count: 1, error: None }
            }
            Err(err) => {
                warn!(document_key = %document_key, error = %err, "summary insert failed");
                let _ = self.status.mark_failed(Stage::Summarization, document_key.as_str(), document.bucket).await;
                StageResult { ran: true, succeeded: false, count: 0, error: Some(err.to_string()) }
            }
        }
    }

    async fn run_graphrag_stage(&self, document: &Document, document_key: &DocumentKey, chunks: &[Chunk]) -> StageResult {
        let extractor = GraphExtractor::new(self.graphrag_llm, self.graphrag_min_text_length, self.entity_types_by_bucket);
        let extraction = match extractor.extract(document, chunks).await {
            Ok(extraction) => extraction,
            Err(err) => {
                warn!(document_key = %document_key, error = %err, "graph extraction failed");
                let _ = self.status.mark_failed(Stage::Graphrag, document_key.as_str(), document.bucket).await;
                return StageResult { ran: true, succeeded: false, count: 0, error: Some(err.to_string()) };
            }
        };

        if let Some(reason) = &extraction.skipped_reason {
            info!(document_key = %document_key, reason, "graph extraction skipped (text too short)");
            return StageResult { ran: true, succeeded: true, count: 0, error: None };
        }

        let entity_count = extraction.entities.len();
        match self
            .graph_sink
            .commit(
                document,
                extraction.entities,
                extraction.relationships,
                extraction.communities,
                extraction.claims,
                extraction.covariates,
                extraction.text_units,
            )
            .await
        {
            Ok(_) => {
                let _ = self
                    .status
                    .mark_done(Stage::Graphrag, document_key.as_str(), document.bucket, StageCounts { entity_count, ..Default::default() })
                    .await;
                StageResult { ran: true, succeeded: true, count: entity_count, error: None }
            }
            Err(err) => {
                warn!(document_key = %document_key, error = %err, "graph commit failed");
                let _ = self.status.mark_failed(Stage::Graphrag, document_key.as_str(), document.bucket).await;
                StageResult { ran: true, succeeded: false, count: 0, error: Some(err.to_string()) }
            }
        }
    }

    async fn run_stp_stage(&self, document: &Document, document_key: &DocumentKey, elements: &[copilot_core::Element]) -> StageResult {
        let pipeline = StpPipeline::new(self.stp_classifier, self.stp_rephraser, self.stp_factors, self.stp_params.clone());
        let mut stp_chunks = match pipeline.run(document_key.as_str(), elements).await {
            Ok(chunks) => chunks,
            Err(err) => {
                warn!(document_key = %document_key, error = %err, "stp pipeline failed");
                let _ = self.status.mark_failed(Stage::Stp, document_key.as_str(), document.bucket).await;
                return StageResult { ran: true, succeeded: false, count: 0, error: Some(err.to_string()) };
            }
        };

        if stp_chunks.is_empty() {
            let _ = self.status.mark_done(Stage::Stp, document_key.as_str(), document.bucket, StageCounts::default()).await;
            return StageResult { ran: true, succeeded: true, count: 0, error: None };
        }

        let texts: Vec<String> = stp_chunks.iter().map(|c| c.rephrased_content.clone()).collect();
        let embeddings = self.embedder.embed(EmbeddingModel::Stp, &texts).await;
        for (chunk, embedding) in stp_chunks.iter_mut().zip(embeddings) {
            chunk.embedding = Some(embedding);
        }

        let count = stp_chunks.len();
        match self.stp_sink.upsert_batch(stp_chunks, self.stp_embedding_dim).await {
            Ok(stored) => {
                let _ = self
                    .status
                    .mark_done(Stage::Stp, document_key.as_str(), document.bucket, StageCounts { stp_chunk_count: stored, ..Default::default() })
                    .await;
                StageResult { ran: true, succeeded: true, count, error: None }
            }
            Err(err) => {
                warn!(document_key = %document_key, error = %err, "stp upsert failed");
                let _ = self.status.mark_failed(Stage::Stp, document_key.as_str(), document.bucket).await;
                StageResult { ran: true, succeeded: false, count: 0, error: Some(err.to_string()) }
            }
        }
    }
}

/// One document to process in batch mode, paired with its raw bytes.
pub struct BatchDocument {
    pub content: Vec<u8>,
    pub filename_or_url: String,
    pub bucket: Bucket,
    pub row_index: Option<usize>,
}

/// Batch-mode driver (§4.10 "Batch mode"): bounded concurrency, "skip if
/// already processed" gated by the Status Tracker, each document's
/// success/failure isolated from the others.
pub struct BatchIngestor<'a> {
    orchestrator: &'a IngestionOrchestrator<'a>,
    max_concurrent_documents: usize,
}

impl<'a> BatchIngestor<'a> {
    pub fn new(orchestrator: &'a IngestionOrchestrator<'a>, max_concurrent_documents: usize) -> Self {
        Self { orchestrator, max_concurrent_documents: max_concurrent_documents.max(1) }
    }

    pub async fn ingest_batch(&self, documents: Vec<BatchDocument>, requested: RequestedStages) -> Vec<(String, Result<IngestResult>)> {
        let semaphore = Arc::new(Semaphore::new(self.max_concurrent_documents));
        let mut futures = Vec::with_capacity(documents.len());

        for doc in documents {
            let key = DocumentKey::for_bucket(doc.bucket, doc.filename_or_url.clone());
            if self
                .orchestrator
                .status
                .is_fully_processed(key.as_str(), doc.bucket, &requested)
                .await
                .unwrap_or(false)
            {
                info!(document_key = %key, "skipping already-processed document");
                continue;
            }

            let semaphore = semaphore.clone();
            let filename = doc.filename_or_url.clone();

            // Each document's ingestion runs independently; a permit scopes
            // this document's share of the concurrency cap and is dropped
            // when the stage work for it completes. The permit is acquired
            // inside the future so up to `max_concurrent_documents` of these
            // actually run at once under `join_all`, instead of serializing
            // on an `.await` per loop iteration (§5, spec.md "documents in
            // flight per ingestion batch").
            futures.push(async move {
                let permit = semaphore.acquire_owned().await;
                let Ok(permit) = permit else {
                    return (filename, Err(IngestionError::ProcessingFailed("semaphore closed".to_string())));
                };
                let result = self
                    .orchestrator
                    .ingest_document(IngestRequest {
                        content: &doc.content,
                        filename_or_url: &doc.filename_or_url,
                        bucket: doc.bucket,
                        requested,
                        row_index: doc.row_index,
                    })
                    .await;
                drop(permit);
                (filename, result)
            });
        }

        futures::future::join_all(futures).await
    }
}

/// One row of an expanded news spreadsheet, ready to dispatch through
/// `ingest_document` as an ordinary news document (§4.10 step 2).
#[derive(Debug, Clone)]
pub struct NewsSpreadsheetRow {
    pub url: String,
    pub pre_text: String,
    /// Spreadsheet row number the content came from. The header occupies
    /// row 2, so the first data row is row 3 (§8 property 4).
    pub row_index: usize,
}

/// Expands a `news`-bucket spreadsheet into one virtual document per row
/// (§4.10 step 2, §4.1). Each row becomes its own pre-text string plus its
/// 1-based spreadsheet row number; the caller dispatches each through
/// `ingest_document` as an ordinary news document keyed by the row's URL
/// column.
pub fn expand_news_spreadsheet_rows(rows: &[HashMap<String, String>], url_column: &str) -> Result<Vec<NewsSpreadsheetRow>> {
    const FIRST_DATA_ROW: usize = 3;
    let mut expanded = Vec::with_capacity(rows.len());
    for (offset, row) in rows.iter().enumerate() {
        let url = row
            .get(url_column)
            .cloned()
            .ok_or_else(|| IngestionError::ValidationError(format!("row missing url column {url_column}")))?;
        let pre_text = row
            .iter()
            .filter(|(k, _)| *k != url_column)
            .map(|(k, v)| format!("{k}: {v}"))
            .collect::<Vec<_>>()
            .join("\n");
        expanded.push(NewsSpreadsheetRow { url, pre_text, row_index: FIRST_DATA_ROW + offset });
    }
    Ok(expanded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::{EmbedderDims, HashingEmbeddingBackend};
    use crate::graph_extraction::HeuristicGraphRagLlm;
    use crate::status::InMemoryStatusTracker;
    use crate::stp::{HeuristicQualifyingFactors, KeywordStpClassifier, TruncatingRephraser};
    use crate::summarization::ExtractiveFallback;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingSink {
        chunks: Mutex<Vec<EmbeddedChunk>>,
        summaries: Mutex<Vec<EmbeddedSummary>>,
    }

    #[async_trait]
    impl ChunkSink for RecordingSink {
        async fn insert_chunks(&self, chunks: Vec<EmbeddedChunk>) -> Result<()> {
            self.chunks.lock().unwrap().extend(chunks);
            Ok(())
        }
        async fn insert_summary(&self, summary: EmbeddedSummary) -> Result<()> {
            self.summaries.lock().unwrap().push(summary);
            Ok(())
        }
    }

    #[derive(Default)]
    struct RecordingGraphSink {
        commits: Mutex<usize>,
    }

    #[async_trait]
    impl GraphSink for RecordingGraphSink {
        async fn commit(
            &self,
            _document: &Document,
            entities: Vec<copilot_core::GraphEntity>,
            _relationships: Vec<copilot_core::GraphRelationship>,
            _communities: Vec<copilot_core::Community>,
            _claims: Vec<copilot_core::Claim>,
            _covariates: Vec<copilot_core::Covariate>,
            _text_units: Vec<copilot_core::TextUnit>,
        ) -> Result<usize> {
            *self.commits.lock().unwrap() += 1;
            Ok(entities.len())
        }
    }

    #[derive(Default)]
    struct RecordingStpSink {
        stored: Mutex<usize>,
    }

    #[async_trait]
    impl StpSink for RecordingStpSink {
        async fn upsert_batch(&self, chunks: Vec<StpChunk>, _expected_dim: usize) -> Result<usize> {
            let n = chunks.len();
            *self.stored.lock().unwrap() += n;
            Ok(n)
        }
    }

    fn test_orchestrator<'a>(
        extractor: &'a Extractor,
        summarizer_llm: &'a ExtractiveFallback,
        graphrag_llm: &'a HeuristicGraphRagLlm,
        entity_types: &'a HashMap<String, Vec<String>>,
        stp_classifier: &'a KeywordStpClassifier,
        stp_rephraser: &'a TruncatingRephraser,
        stp_factors: &'a HeuristicQualifyingFactors,
        embedder: &'a Embedder<'a>,
        chunk_sink: &'a RecordingSink,
        graph_sink: &'a RecordingGraphSink,
        stp_sink: &'a RecordingStpSink,
        status: &'a InMemoryStatusTracker,
    ) -> IngestionOrchestrator<'a> {
        IngestionOrchestrator {
            extractor,
            summarizer_llm,
            graphrag_llm,
            entity_types_by_bucket: entity_types,
            graphrag_min_text_length: 10,
            stp_classifier,
            stp_rephraser,
            stp_factors,
            stp_params: crate::stp::StpConfigParams {
                min_confidence_threshold: 0.1,
                rephrase_max_words: 80,
                min_chunk_tokens: 5,
                max_chunk_tokens: 1500,
                target_chunk_tokens: 800,
            },
            stp_embedding_dim: 4,
            embedder,
            chunk_sink,
            graph_sink,
            stp_sink,
            status,
        }
    }

    #[tokio::test]
    async fn ingest_document_runs_all_requested_stages_and_reports_success() {
        let extractor = Extractor::new();
        let summarizer_llm = ExtractiveFallback::default();
        let graphrag_llm = HeuristicGraphRagLlm;
        let entity_types: HashMap<String, Vec<String>> = HashMap::new();
        let stp_classifier = KeywordStpClassifier;
        let stp_rephraser = TruncatingRephraser;
        let stp_factors = HeuristicQualifyingFactors;
        let backend = HashingEmbeddingBackend;
        let dims = EmbedderDims { chunk_dim: 16, summary_dim: 8, stp_dim: 4 };
        let embedder = Embedder::new(&backend, dims, 8);
        let chunk_sink = RecordingSink::default();
        let graph_sink = RecordingGraphSink::default();
        let stp_sink = RecordingStpSink::default();
        let status = InMemoryStatusTracker::new();

        let orchestrator = test_orchestrator(
            &extractor,
            &summarizer_llm,
            &graphrag_llm,
            &entity_types,
            &stp_classifier,
            &stp_rephraser,
            &stp_factors,
            &embedder,
            &chunk_sink,
            &graph_sink,
            &stp_sink,
            status.as_ref(),
        );

        let content = b"Emissions Reduction Act\n\nThis policy establishes a tipping point mechanism for industrial emissions across the region.";
        let result = orchestrator
            .ingest_document(IngestRequest {
                content,
                filename_or_url: "law.pdf",
                bucket: Bucket::Policy,
                requested: RequestedStages { chunking: true, summarization: true, graphrag: true, stp: true },
                row_index: None,
            })
            .await
            .unwrap();

        assert_eq!(result.outcome, Some(IngestOutcome::Success));
        assert!(result.chunking.succeeded);
        assert!(result.summarization.succeeded);
        assert!(result.graphrag.succeeded);
        assert!(result.stp.succeeded);
    }

    #[tokio::test]
    async fn scientific_data_bucket_masks_out_graphrag_and_stp() {
        let extractor = Extractor::new();
        let summarizer_llm = ExtractiveFallback::default();
        let graphrag_llm = HeuristicGraphRagLlm;
        let entity_types: HashMap<String, Vec<String>> = HashMap::new();
        let stp_classifier = KeywordStpClassifier;
        let stp_rephraser = TruncatingRephraser;
        let stp_factors = HeuristicQualifyingFactors;
        let backend = HashingEmbeddingBackend;
        let dims = EmbedderDims { chunk_dim: 16, summary_dim: 8, stp_dim: 4 };
        let embedder = Embedder::new(&backend, dims, 8);
        let chunk_sink = RecordingSink::default();
        let graph_sink = RecordingGraphSink::default();
        let stp_sink = RecordingStpSink::default();
        let status = InMemoryStatusTracker::new();

        let orchestrator = test_orchestrator(
            &extractor,
            &summarizer_llm,
            &graphrag_llm,
            &entity_types,
            &stp_classifier,
            &stp_rephraser,
            &stp_factors,
            &embedder,
            &chunk_sink,
            &graph_sink,
            &stp_sink,
            status.as_ref(),
        );

        let content = b"Dataset readme\n\nThis dataset tracks sea surface temperature anomalies collected by buoy arrays.";
        let result = orchestrator
            .ingest_document(IngestRequest {
                content,
                filename_or_url: "dataset.csv",
                bucket: Bucket::ScientificData,
                requested: RequestedStages { chunking: true, summarization: true, graphrag: true, stp: true },
                row_index: None,
            })
            .await
            .unwrap();

        assert!(!result.graphrag.ran);
        assert!(!result.stp.ran);
        assert!(result.chunking.ran);
    }

    #[test]
    fn news_spreadsheet_rows_expand_into_one_virtual_document_each() {
        let mut row = HashMap::new();
        row.insert("url".to_string(), "https://example.com/a".to_string());
        row.insert("headline".to_string(), "Heatwave breaks records".to_string());

        let expanded = expand_news_spreadsheet_rows(&[row], "url").unwrap();
        assert_eq!(expanded.len(), 1);
        assert_eq!(expanded[0].url, "https://example.com/a");
        assert!(expanded[0].pre_text.contains("Heatwave"));
        assert_eq!(expanded[0].row_index, 3);
    }

    #[test]
    fn news_spreadsheet_row_indices_start_at_three_and_are_contiguous() {
        let rows: Vec<HashMap<String, String>> = (0..3)
            .map(|i| {
                let mut row = HashMap::new();
                row.insert("url".to_string(), format!("https://example.com/{i}"));
                row
            })
            .collect();

        let expanded = expand_news_spreadsheet_rows(&rows, "url").unwrap();
        let indices: Vec<usize> = expanded.iter().map(|r| r.row_index).collect();
        assert_eq!(indices, vec![3, 4, 5]);
    }
}
