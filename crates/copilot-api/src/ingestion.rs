//! The ingestion boundary (§6): `POST /process/document` and friends.
//! Thin by design — the only job here is translating an HTTP request into
//! an [`IngestRequest`](copilot_ingestion::IngestRequest) and handing it to
//! the Background Task Manager so the caller gets `{task_id,
//! status_endpoint}` back immediately (§6).

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::Json;
use base64::Engine;
use copilot_core::{Bucket, RequestedStages};
use copilot_ingestion::{
    expand_news_spreadsheet_rows, stp::StpConfigParams, Embedder, IngestRequest, IngestionOrchestrator,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ProcessDocumentBody {
    pub bucket: String,
    pub filename: String,
    /// Out-of-scope object-store fetch is stood in for by accepting the
    /// document bytes inline (§1: "object-store client... specified only
    /// by interface"). Empty/absent when `article_rows` drives a news
    /// spreadsheet expansion instead (§4.10 step 2).
    #[serde(default)]
    pub content_base64: String,
    /// `news`-bucket spreadsheet rows already parsed into column maps by
    /// the caller (sniffing `.xlsx`/`.csv` bytes is the object-store
    /// client's job, out of scope per §1). When present and non-empty,
    /// each row is expanded into its own virtual sub-document (§4.10 step
    /// 2, §8 property 4) instead of treating `content_base64` as one
    /// document.
    #[serde(default)]
    pub article_rows: Option<Vec<HashMap<String, String>>>,
    #[serde(default = "default_url_column")]
    pub url_column: String,
    #[serde(default = "default_true")]
    pub include_chunking: bool,
    #[serde(default = "default_true")]
    pub include_summarization: bool,
    #[serde(default = "default_true")]
    pub include_graphrag: bool,
    #[serde(default)]
    pub include_stp: bool,
}

fn default_url_column() -> String {
    "article link".to_string()
}

fn default_true() -> bool {
    true
}

impl ProcessDocumentBody {
    fn requested_stages(&self) -> RequestedStages {
        RequestedStages {
            chunking: self.include_chunking,
            summarization: self.include_summarization,
            graphrag: self.include_graphrag,
            stp: self.include_stp,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct TaskAccepted {
    pub task_id: String,
    pub status_endpoint: String,
}

/// `POST /process/document` (§6).
pub async fn process_document(
    State(state): State<Arc<AppState>>,
    Json(body): Json<ProcessDocumentBody>,
) -> Result<Json<TaskAccepted>, ApiError> {
    let bucket = Bucket::from_str(&body.bucket).map_err(ApiError::BadRequest)?;
    let requested = body.requested_stages();
    if !requested.any() {
        return Err(ApiError::BadRequest("zero enabled stages".to_string()));
    }

    if bucket == Bucket::News {
        if let Some(rows) = body.article_rows.clone().filter(|r| !r.is_empty()) {
            return process_news_spreadsheet(state, rows, body.url_column.clone(), requested).await;
        }
    }

    let content = base64::engine::general_purpose::STANDARD
        .decode(&body.content_base64)
        .map_err(|e| ApiError::BadRequest(format!("invalid content_base64: {e}")))?;

    let mut metadata = HashMap::new();
    metadata.insert("bucket".to_string(), json!(body.bucket));
    metadata.insert("filename".to_string(), json!(body.filename));

    let filename = body.filename.clone();
    let task_id = state.tasks.clone().create_task("ingest_document", metadata, move |_cancel| {
        let state = state.clone();
        async move {
            let result = run_single_document(&state, &content, &filename, bucket, requested)
                .await
                .map_err(|e| e.to_string())?;
            Ok(ingest_result_json(&result, &requested))
        }
    });

    Ok(Json(TaskAccepted { task_id: task_id.to_string(), status_endpoint: format!("/tasks/{task_id}") }))
}

/// News-bucket spreadsheet expansion (§4.10 step 2, §8 scenario S2): each
/// row dispatches through single-document mode independently, tagged with
/// its spreadsheet row index, under one background task. A row that fails
/// to ingest does not abort the others (Open Question #2 in `DESIGN.md`:
/// per-row counts rather than aborting the whole submission on one bad row).
async fn process_news_spreadsheet(
    state: Arc<AppState>,
    rows: Vec<HashMap<String, String>>,
    url_column: String,
    requested: RequestedStages,
) -> Result<Json<TaskAccepted>, ApiError> {
    let expanded = expand_news_spreadsheet_rows(&rows, &url_column).map_err(|e| ApiError::BadRequest(e.to_string()))?;
    if expanded.is_empty() {
        return Err(ApiError::BadRequest("no articles found".to_string()));
    }

    let mut metadata = HashMap::new();
    metadata.insert("bucket".to_string(), json!("news"));
    metadata.insert("articles_found".to_string(), json!(expanded.len()));

    let task_id = state.tasks.clone().create_task("ingest_news_spreadsheet", metadata, move |_cancel| {
        let state = state.clone();
        async move {
            let mut rows_json = Vec::with_capacity(expanded.len());
            let mut any_success = false;
            let mut any_failure = false;

            for row in &expanded {
                let result =
                    run_single_document_row(&state, row.pre_text.as_bytes(), &row.url, Bucket::News, requested, row.row_index)
                        .await;
                match result {
                    Ok(r) => {
                        any_success |= !matches!(r.outcome, Some(copilot_ingestion::IngestOutcome::Failed) | None);
                        any_failure |= !matches!(r.outcome, Some(copilot_ingestion::IngestOutcome::Success));
                        let mut row_value = ingest_result_json(&r, &requested);
                        row_value["row_index"] = json!(row.row_index);
                        row_value["article_link"] = json!(row.url);
                        rows_json.push(row_value);
                    }
                    Err(err) => {
                        any_failure = true;
                        rows_json.push(json!({
                            "row_index": row.row_index,
                            "article_link": row.url,
                            "overall_status": "failed",
                            "message": err.to_string(),
                        }));
                    }
                }
            }

            let overall_status = if any_success && any_failure {
                "partial_success"
            } else if any_success {
                "success"
            } else {
                "failed"
            };

            Ok(json!({
                "overall_status": overall_status,
                "articles_found": rows_json.len(),
                "rows": rows_json,
                "processing_timestamp": chrono::Utc::now().to_rfc3339(),
            }))
        }
    });

    Ok(Json(TaskAccepted { task_id: task_id.to_string(), status_endpoint: format!("/tasks/{task_id}") }))
}

/// The convenience single-stage forms (`POST /process/{chunks|summary|graphrag|stp}`,
/// §6): each forces exactly one stage on, regardless of what the body asked for.
fn force_single_stage(mut body: ProcessDocumentBody, stage: &str) -> ProcessDocumentBody {
    body.include_chunking = stage == "chunks";
    body.include_summarization = stage == "summary";
    body.include_graphrag = stage == "graphrag";
    body.include_stp = stage == "stp";
    body
}

pub async fn process_chunks_only(
    state: State<Arc<AppState>>,
    Json(body): Json<ProcessDocumentBody>,
) -> Result<Json<TaskAccepted>, ApiError> {
    process_document(state, Json(force_single_stage(body, "chunks"))).await
}

pub async fn process_summary_only(
    state: State<Arc<AppState>>,
    Json(body): Json<ProcessDocumentBody>,
) -> Result<Json<TaskAccepted>, ApiError> {
    process_document(state, Json(force_single_stage(body, "summary"))).await
}

pub async fn process_graphrag_only(
    state: State<Arc<AppState>>,
    Json(body): Json<ProcessDocumentBody>,
) -> Result<Json<TaskAccepted>, ApiError> {
    process_document(state, Json(force_single_stage(body, "graphrag"))).await
}

pub async fn process_stp_only(
    state: State<Arc<AppState>>,
    Json(body): Json<ProcessDocumentBody>,
) -> Result<Json<TaskAccepted>, ApiError> {
    process_document(state, Json(force_single_stage(body, "stp"))).await
}

async fn run_single_document(
    state: &AppState,
    content: &[u8],
    filename: &str,
    bucket: Bucket,
    requested: RequestedStages,
) -> copilot_ingestion::Result<copilot_ingestion::IngestResult> {
    run_single_document_row(state, content, filename, bucket, requested, None).await
}

/// Same composition as [`run_single_document`], with an optional spreadsheet
/// row index threaded through to [`IngestRequest::row_index`] (§4.10 step 2).
async fn run_single_document_row(
    state: &AppState,
    content: &[u8],
    filename_or_url: &str,
    bucket: Bucket,
    requested: RequestedStages,
    row_index: Option<usize>,
) -> copilot_ingestion::Result<copilot_ingestion::IngestResult> {
    let embedder = Embedder::new(&state.embedding_backend, state.embedder_dims, state.embedder_batch_size);
    let stp_params = StpConfigParams {
        min_confidence_threshold: state.config.stp.min_confidence_threshold,
        rephrase_max_words: state.config.stp.rephrase_max_words,
        min_chunk_tokens: state.config.stp.min_chunk_tokens,
        max_chunk_tokens: state.config.stp.max_chunk_tokens,
        target_chunk_tokens: state.config.stp.max_chunk_tokens,
    };

    let orchestrator = IngestionOrchestrator {
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
        embedder: &embedder,
        chunk_sink: &state.chunk_sink,
        graph_sink: &state.graph_sink,
        stp_sink: &state.stp_sink,
        status: state.status.as_ref(),
    };

    orchestrator
        .ingest_document(IngestRequest { content, filename_or_url, bucket, requested, row_index })
        .await
}

fn stage_json(result: &copilot_ingestion::StageResult) -> Value {
    let status = if !result.ran {
        "skipped"
    } else if result.succeeded {
        "success"
    } else {
        "failed"
    };
    json!({ "status": status, "count": result.count, "message": result.error })
}

fn ingest_result_json(result: &copilot_ingestion::IngestResult, requested: &RequestedStages) -> Value {
    let overall_status = match result.outcome {
        Some(copilot_ingestion::IngestOutcome::Success) => "success",
        Some(copilot_ingestion::IngestOutcome::PartialSuccess) => "partial_success",
        Some(copilot_ingestion::IngestOutcome::Failed) | None => "failed",
    };
    let mut stages = serde_json::Map::new();
    if requested.chunking {
        stages.insert("chunking".to_string(), stage_json(&result.chunking));
    }
    if requested.summarization {
        stages.insert("summarization".to_string(), stage_json(&result.summarization));
    }
    if requested.graphrag {
        stages.insert("graphrag".to_string(), stage_json(&result.graphrag));
    }
    if requested.stp {
        stages.insert("stp".to_string(), stage_json(&result.stp));
    }
    json!({
        "overall_status": overall_status,
        "results": stages,
        "processing_timestamp": chrono::Utc::now().to_rfc3339(),
    })
}

/// `GET /tasks/{task_id}` (§6).
pub async fn get_task(State(state): State<Arc<AppState>>, Path(task_id): Path<String>) -> Result<Json<Value>, ApiError> {
    let uuid = uuid::Uuid::parse_str(&task_id).map_err(|_| ApiError::BadRequest("malformed task_id".to_string()))?;
    let task_id = copilot_core::TaskId::from_uuid(uuid);
    let record = state.tasks.status(task_id).await.ok_or_else(|| ApiError::NotFound("unknown task".to_string()))?;
    Ok(Json(serde_json::to_value(record).expect("TaskRecord serializes")))
}

#[derive(Debug, Deserialize)]
pub struct CleanupQuery {
    #[serde(default = "default_max_age_hours")]
    pub max_age_hours: i64,
}

fn default_max_age_hours() -> i64 {
    24
}

/// `DELETE /tasks/cleanup?max_age_hours=H` (§6).
pub async fn cleanup_tasks(State(state): State<Arc<AppState>>, Query(query): Query<CleanupQuery>) -> Json<Value> {
    let removed = state.tasks.cleanup(query.max_age_hours).await;
    Json(json!({ "removed": removed }))
}

/// `GET /queue/status` (§6).
pub async fn queue_status(State(state): State<Arc<AppState>>) -> Json<Value> {
    let counts = state.tasks.counts().await;
    Json(json!({
        "pending": counts.pending,
        "running": counts.running,
        "completed": counts.completed,
        "failed": counts.failed,
    }))
}
