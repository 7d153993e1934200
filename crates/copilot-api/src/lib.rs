//! Thin, swappable REST surface over the Ingestion Pipeline and the Query
//! Orchestrator (§1, §6). This crate is the only place either subsystem's
//! internal error types become HTTP status codes, and the only place their
//! trait-bounded collaborators are wired into concrete backends
//! ([`state::AppState::bootstrap`]) — every other crate in the workspace
//! stays free of HTTP and of each other.

pub mod adapters;
pub mod batch;
pub mod error;
pub mod ingestion;
pub mod query;
pub mod state;

use std::sync::Arc;

use axum::routing::{delete, get, post};
use axum::Router;

use state::AppState;

/// Builds the full HTTP surface (§6) over one shared [`AppState`].
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/query", post(query::ask_query))
        .route("/graphrag/health", get(query::graphrag_health))
        .route("/process/document", post(ingestion::process_document))
        .route("/process/chunks", post(ingestion::process_chunks_only))
        .route("/process/summary", post(ingestion::process_summary_only))
        .route("/process/graphrag", post(ingestion::process_graphrag_only))
        .route("/process/stp", post(ingestion::process_stp_only))
        .route("/batch/process-bucket", post(batch::process_bucket))
        .route("/batch/process-all", post(batch::process_all))
        .route("/tasks/:task_id", get(ingestion::get_task))
        .route("/tasks/cleanup", delete(ingestion::cleanup_tasks))
        .route("/queue/status", get(ingestion::queue_status))
        .with_state(state)
}
