//! Batch ingestion boundary (§4.10 "Batch mode", §6): `POST
//! /batch/process-bucket` and `POST /batch/process-all`. Both run under the
//! Background Task Manager, same as the single-document endpoints — a batch
//! can take far longer than one HTTP request should block for.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use base64::Engine;
use copilot_core::{Bucket, RequestedStages};
use copilot_ingestion::pipeline::{BatchDocument, BatchIngestor};
use copilot_ingestion::stp::StpConfigParams;
use copilot_ingestion::{Embedder, IngestionOrchestrator};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct BatchDocumentBody {
    pub filename: String,
    pub content_base64: String,
}

#[derive(Debug, Deserialize)]
pub struct BatchStageSelection {
    #[serde(default = "default_true")]
    pub include_chunking: bool,
    #[serde(default = "default_true")]
    pub include_summarization: bool,
    #[serde(default = "default_true")]
    pub include_graphrag: bool,
    #[serde(default)]
    pub include_stp: bool,
}

fn default_true() -> bool {
    true
}

impl BatchStageSelection {
    fn requested_stages(&self) -> RequestedStages {
        RequestedStages {
            chunking: self.include_chunking,
            summarization: self.include_summarization,
            graphrag: self.include_graphrag,
            stp: self.include_stp,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct BatchBucketGroup {
    pub bucket: String,
    pub documents: Vec<BatchDocumentBody>,
}

#[derive(Debug, Deserialize)]
pub struct ProcessBucketBody {
    pub bucket: String,
    pub documents: Vec<BatchDocumentBody>,
    #[serde(flatten)]
    pub stages: BatchStageSelection,
    #[serde(default)]
    pub max_concurrent_documents: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct ProcessAllBody {
    pub groups: Vec<BatchBucketGroup>,
    #[serde(flatten)]
    pub stages: BatchStageSelection,
    #[serde(default)]
    pub max_concurrent_documents: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct TaskAccepted {
    pub task_id: String,
    pub status_endpoint: String,
}

fn decode_documents(documents: Vec<BatchDocumentBody>, bucket: Bucket) -> Result<Vec<BatchDocument>, ApiError> {
    documents
        .into_iter()
        .map(|doc| {
            let content = base64::engine::general_purpose::STANDARD
                .decode(&doc.content_base64)
                .map_err(|e| ApiError::BadRequest(format!("invalid content_base64 for {}: {e}", doc.filename)))?;
            Ok(BatchDocument { content, filename_or_url: doc.filename, bucket, row_index: None })
        })
        .collect()
}

/// Builds the per-call `IngestionOrchestrator` from shared `AppState`
/// collaborators (§4.10). Mirrors `ingestion::run_single_document`'s
/// composition, generalized to feed `BatchIngestor` instead of a single call.
fn build_orchestrator<'a>(state: &'a AppState, embedder: &'a Embedder<'a>) -> IngestionOrchestrator<'a> {
    let stp_params = StpConfigParams {
        min_confidence_threshold: state.config.stp.min_confidence_threshold,
        rephrase_max_words: state.config.stp.rephrase_max_words,
        min_chunk_tokens: state.config.stp.min_chunk_tokens,
        max_chunk_tokens: state.config.stp.max_chunk_tokens,
        target_chunk_tokens: state.config.stp.max_chunk_tokens,
    };

    IngestionOrchestrator {
        extractor: &state.extractor,
        summarizer_llm: &state.summarizer_llm,
        graphrag_llm: &state.graphrag_llm,
        entity_types_by_bucket: &state.entity_types_by_bucket,
        graphrag_min_text_length: state.config.graphrag.min_text_length,
        stp_classifier: &state.stp_classifier,
        stp_rephraser: &state.stp_rephraser,
        stp_factors: &state.stp_factors,
        stp_params,
        stp_embedding_dim: state.embedder_dims.stp_dim,
        embedder,
        chunk_sink: &state.chunk_sink,
        graph_sink: &state.graph_sink,
        stp_sink: &state.stp_sink,
        status: state.status.as_ref(),
    }
}

fn batch_results_json(results: Vec<(String, copilot_ingestion::Result<copilot_ingestion::IngestResult>)>) -> Value {
    let documents: Vec<Value> = results
        .into_iter()
        .map(|(filename, result)| match result {
            Ok(r) => json!({
                "filename": filename,
                "outcome": match r.outcome {
                    Some(copilot_ingestion::IngestOutcome::Success) => "success",
                    Some(copilot_ingestion::IngestOutcome::PartialSuccess) => "partial_success",
                    Some(copilot_ingestion::IngestOutcome::Failed) | None => "failed",
                },
            }),
            Err(err) => json!({ "filename": filename, "outcome": "failed", "error": err.to_string() }),
        })
        .collect();
    json!({ "documents": documents })
}

/// `POST /batch/process-bucket` (§6, §4.10 "Batch mode"): ingests every
/// document in the request against one bucket, skipping documents the
/// Status Tracker already reports as fully processed for the requested
/// stages, bounded by `max_concurrent_documents`.
pub async fn process_bucket(
    State(state): State<Arc<AppState>>,
    Json(body): Json<ProcessBucketBody>,
) -> Result<Json<TaskAccepted>, ApiError> {
    let bucket = Bucket::from_str(&body.bucket).map_err(ApiError::BadRequest)?;
    let requested = body.stages.requested_stages();
    if !requested.any() {
        return Err(ApiError::BadRequest("zero enabled stages".to_string()));
    }
    let documents = decode_documents(body.documents, bucket)?;
    let max_concurrent = body.max_concurrent_documents.unwrap_or(state.config.processing.max_concurrent_documents);

    let mut metadata = HashMap::new();
    metadata.insert("bucket".to_string(), json!(body.bucket));
    metadata.insert("document_count".to_string(), json!(documents.len()));

    let task_id = state.tasks.clone().create_task("ingest_batch", metadata, move |_cancel| {
        let state = state.clone();
        async move {
            let embedder = Embedder::new(&state.embedding_backend, state.embedder_dims, state.embedder_batch_size);
            let orchestrator = build_orchestrator(&state, &embedder);
            let batcher = BatchIngestor::new(&orchestrator, max_concurrent);
            let results = batcher.ingest_batch(documents, requested).await;
            Ok(batch_results_json(results))
        }
    });

    Ok(Json(TaskAccepted { task_id: task_id.to_string(), status_endpoint: format!("/tasks/{task_id}") }))
}

/// `POST /batch/process-all` (§6, §4.10 "Batch mode"): the same as
/// `process-bucket`, run once per bucket group in the request, sequentially,
/// under one task so batch progress across the whole corpus is visible from
/// a single task ID.
pub async fn process_all(
    State(state): State<Arc<AppState>>,
    Json(body): Json<ProcessAllBody>,
) -> Result<Json<TaskAccepted>, ApiError> {
    let requested = body.stages.requested_stages();
    if !requested.any() {
        return Err(ApiError::BadRequest("zero enabled stages".to_string()));
    }

    let mut grouped: Vec<(Bucket, Vec<BatchDocument>)> = Vec::with_capacity(body.groups.len());
    for group in body.groups {
        let bucket = Bucket::from_str(&group.bucket).map_err(ApiError::BadRequest)?;
        let documents = decode_documents(group.documents, bucket)?;
        grouped.push((bucket, documents));
    }
    let max_concurrent = body.max_concurrent_documents.unwrap_or(state.config.processing.max_concurrent_documents);

    let mut metadata = HashMap::new();
    metadata.insert("bucket_count".to_string(), json!(grouped.len()));
    metadata.insert(
        "document_count".to_string(),
        json!(grouped.iter().map(|(_, docs)| docs.len()).sum::<usize>()),
    );

    let task_id = state.tasks.clone().create_task("ingest_batch_all", metadata, move |_cancel| {
        let state = state.clone();
        async move {
            let embedder = Embedder::new(&state.embedding_backend, state.embedder_dims, state.embedder_batch_size);
            let orchestrator = build_orchestrator(&state, &embedder);
            let batcher = BatchIngestor::new(&orchestrator, max_concurrent);

            let mut by_bucket = serde_json::Map::new();
            for (bucket, documents) in grouped {
                let results = batcher.ingest_batch(documents, requested).await;
                by_bucket.insert(bucket.as_str().to_string(), batch_results_json(results));
            }
            Ok(Value::Object(by_bucket))
        }
    });

    Ok(Json(TaskAccepted { task_id: task_id.to_string(), status_endpoint: format!("/tasks/{task_id}") }))
}
