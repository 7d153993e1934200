//! The Query boundary: a thin HTTP front for the Query Orchestrator's
//! per-query state machine (§4.12):
//!
//! ```text
//! INIT -> CLASSIFY -> (SHORT_CIRCUIT_REPLY -> DONE)
//!                    | (RESOLVE -> RETRIEVE -> (EMPTY -> FALLBACK_GEN -> DONE)
//!                                             | RERANK -> GENERATE -> STP_LOOKUP -> ENQUEUE_EVAL -> DONE)
//! any state -> TIMEOUT -> TIMEOUT_REPLY -> DONE
//! ```
//!
//! This module is the composition root's wiring of the state machine:
//! `copilot-nlp` (classify, generate), `copilot-conversation` (session,
//! reference resolution) and `copilot-context` (retrieval) each own one
//! slice of it and have no dependency on each other.

use std::str::FromStr;
use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use copilot_context::{
    assemble_context, fan_out_retrieve, fuse_and_rerank, tipping_point_signature, GraphStore, QueryTurn,
    RetrievalRequest, SourceKind, NO_TIPPING_POINT_AVAILABLE,
};
use copilot_conversation::SessionStore;
use copilot_core::{Bucket, ConversationType, EvaluationContext, EvaluationRecord, Message, SessionId, UserId};
use copilot_ingestion::{Embedder, EmbeddingModel};
use copilot_nlp::{QueryCategory, TitleExpectation};
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct QueryBody {
    pub query: String,
    pub session_id: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub bucket: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct QuerySource {
    pub source: String,
    pub document_identifier: String,
    pub score: f32,
}

#[derive(Debug, Serialize)]
pub struct QueryResponse {
    pub answer: String,
    pub title: String,
    pub social_tipping_point: String,
    pub sources: Vec<QuerySource>,
    pub total_references: usize,
    pub session_id: String,
}

fn canonical_timeout_reply(session_id: SessionId) -> QueryResponse {
    QueryResponse {
        answer: "This is taking longer than expected. Please try again in a moment.".to_string(),
        title: String::new(),
        social_tipping_point: NO_TIPPING_POINT_AVAILABLE.to_string(),
        sources: Vec::new(),
        total_references: 0,
        session_id: session_id.to_string(),
    }
}

fn source_kind_tag(kind: SourceKind) -> &'static str {
    match kind {
        SourceKind::Chunk => "chunk",
        SourceKind::Summary => "summary",
        SourceKind::Graph => "graph",
    }
}

/// `POST /query` — ask a question (§4.12). The HTTP envelope itself is out
/// of scope (§1); this handler's only job is parsing the request, loading
/// or creating the session, and handing the turn to `run_query`, which owns
/// the actual state machine and the end-to-end wall-clock deadline.
pub async fn ask_query(
    State(state): State<Arc<AppState>>,
    Json(body): Json<QueryBody>,
) -> Result<Json<QueryResponse>, ApiError> {
    if body.query.trim().is_empty() {
        return Err(ApiError::BadRequest("query must not be empty".to_string()));
    }

    let bucket = body
        .bucket
        .as_deref()
        .map(Bucket::from_str)
        .transpose()
        .map_err(ApiError::BadRequest)?;

    let session = match &body.session_id {
        Some(raw) => {
            let uuid = uuid::Uuid::parse_str(raw).map_err(|_| ApiError::BadRequest("malformed session_id".to_string()))?;
            let id = SessionId::from_uuid(uuid);
            state
                .session_store
                .get(id)
                .await
                .map_err(ApiError::Conversation)?
                .ok_or_else(|| ApiError::NotFound("unknown session".to_string()))?
        }
        None => {
            let user_id = body
                .user_id
                .as_deref()
                .map(|raw| uuid::Uuid::parse_str(raw).map(UserId::from_uuid))
                .transpose()
                .map_err(|_| ApiError::BadRequest("malformed user_id".to_string()))?
                .unwrap_or_else(UserId::new);
            state.session_store.create(user_id, "en").await.map_err(ApiError::Conversation)?
        }
    };

    let deadline = state.config.retrieval.max_response_time();
    let response = match tokio::time::timeout(deadline, run_query(&state, &session, &body.query, bucket)).await {
        Ok(response) => response,
        Err(_) => canonical_timeout_reply(session.id),
    };

    let user_message = Message::user(body.query.clone());
    let _ = state.session_store.append_message(session.id, user_message).await;
    let assistant_message = Message::assistant(response.answer.clone());
    let _ = state.session_store.append_message(session.id, assistant_message).await;

    Ok(Json(response))
}

/// The actual state machine: CLASSIFY, then either SHORT_CIRCUIT_REPLY or
/// RESOLVE -> RETRIEVE -> (EMPTY -> FALLBACK_GEN | RERANK -> GENERATE) ->
/// STP_LOOKUP -> ENQUEUE_EVAL. Runs under the caller's wall-clock deadline.
async fn run_query(state: &AppState, session: &copilot_core::Session, query: &str, bucket: Option<Bucket>) -> QueryResponse {
    let classification = state.classifier.classify(query).await;

    if classification.category.short_circuits_retrieval() {
        return short_circuit_reply(session.id, &classification);
    }

    let conversation_type = session.conversation_type();
    let turn = match conversation_type {
        ConversationType::Start => QueryTurn::Start,
        ConversationType::Continue => QueryTurn::Continue,
    };

    let resolved_query = match turn {
        QueryTurn::Start => state.reference_resolver.resolve_start(query).await,
        QueryTurn::Continue => {
            state
                .reference_resolver
                .resolve_continue(query, session.recent_messages(state.config.retrieval.recent_messages_k))
                .await
        }
    };

    let embedder = Embedder::new(&state.embedding_backend, state.embedder_dims, state.embedder_batch_size);
    let query_embedding = embedder.embed_one(EmbeddingModel::Chunk, &resolved_query).await;
    let summary_query_embedding = embedder.embed_one(EmbeddingModel::Summary, &resolved_query).await;

    let request = RetrievalRequest {
        query_text: resolved_query.clone(),
        query_embedding,
        summary_query_embedding,
        turn,
        bucket,
        vector_store: state.vector_store.as_ref(),
        graph_store: state.graph_store.as_ref(),
        config: &state.config.retrieval,
    };

    let retrieved = fan_out_retrieve(&request).await;

    let title_expectation = match turn {
        QueryTurn::Start => TitleExpectation::Expected,
        QueryTurn::Continue => TitleExpectation::AlwaysEmpty,
    };

    let (context_items, generation_prompt, used_fallback_context) = if retrieved.is_empty() {
        (Vec::new(), no_context_prompt(&resolved_query), true)
    } else {
        let ranked = fuse_and_rerank(retrieved, turn, &resolved_query, &state.reranker, &state.config.retrieval).await;
        if ranked.is_empty() {
            (Vec::new(), no_context_prompt(&resolved_query), true)
        } else {
            let assembled = assemble_context(&ranked, state.config.retrieval.context_char_budget);
            let prompt = context_prompt(&resolved_query, &assembled);
            (assembled, prompt, false)
        }
    };

    let remaining_budget = state.config.retrieval.max_response_time();
    let parsed = state
        .response_generator
        .generate(&generation_prompt, remaining_budget, title_expectation)
        .await;

    let signature = tipping_point_signature(&parsed.content);
    let social_tipping_point = if signature.is_empty() {
        NO_TIPPING_POINT_AVAILABLE.to_string()
    } else {
        state
            .tipping_point_lookup
            .lookup(&signature)
            .await
            .unwrap_or_else(|| NO_TIPPING_POINT_AVAILABLE.to_string())
    };

    let sources: Vec<QuerySource> = context_items
        .iter()
        .map(|item| QuerySource {
            source: source_kind_tag(item.source),
            document_identifier: item.document_identifier.clone(),
            score: item.score,
        })
        .collect();
    let total_references = sources.len();

    enqueue_evaluation(
        state,
        query,
        &parsed.content,
        &context_items,
        session.id,
        conversation_type,
    );

    let _ = used_fallback_context;
    QueryResponse {
        answer: parsed.content,
        title: parsed.title,
        social_tipping_point,
        sources,
        total_references,
        session_id: session.id.to_string(),
    }
}

fn short_circuit_reply(session_id: SessionId, classification: &copilot_nlp::Classification) -> QueryResponse {
    let answer = classification
        .corpus_reply
        .clone()
        .unwrap_or_else(|| default_reply_for(classification.category));
    QueryResponse {
        answer,
        title: String::new(),
        social_tipping_point: NO_TIPPING_POINT_AVAILABLE.to_string(),
        sources: Vec::new(),
        total_references: 0,
        session_id: session_id.to_string(),
    }
}

fn default_reply_for(category: QueryCategory) -> String {
    match category {
        QueryCategory::BotIdentity => {
            "I'm a climate-document assistant built to help you explore research papers, policy texts, \
             scientific datasets and news coverage on climate change.".to_string()
        }
        _ => "Hello! How can I help you with climate-related research today?".to_string(),
    }
}

fn context_prompt(query: &str, items: &[copilot_context::AssembledContextItem]) -> String {
    let context_block = items.iter().map(|i| i.formatted.as_str()).collect::<Vec<_>>().join("\n\n");
    format!(
        "Answer the user's climate-related question using only the context below.\n\nContext:\n{context_block}\n\nQuestion: {query}"
    )
}

fn no_context_prompt(query: &str) -> String {
    format!(
        "No relevant context was retrieved for this climate-related question. Answer from general knowledge \
         and note the lack of supporting sources.\n\nQuestion: {query}"
    )
}

/// Pushes an `EvaluationRecord` into the bounded FIFO (§4.12 "Async
/// evaluation enqueue"). Gated by a uniform Bernoulli sample so it never
/// runs for every query; always synchronous so it cannot add latency to the
/// reply.
fn enqueue_evaluation(
    state: &AppState,
    query: &str,
    response: &str,
    context_items: &[copilot_context::AssembledContextItem],
    session_id: SessionId,
    conversation_type: ConversationType,
) {
    let draw: f64 = rand::thread_rng().gen();
    if !copilot_workflow::should_sample(state.config.evaluation.sampling_rate, draw) {
        return;
    }

    let mut context = EvaluationContext::default();
    for item in context_items {
        match item.source {
            SourceKind::Chunk => context.chunk_texts.push(item.formatted.clone()),
            SourceKind::Summary => context.summary_texts.push(item.formatted.clone()),
            SourceKind::Graph => context.graph_snippets.push(item.formatted.clone()),
        }
    }

    let record = EvaluationRecord::new(query, response, context, session_id, conversation_type);
    state.evaluation.queue().push(record);
}

/// `GET /graphrag/health` (§6): availability probe for the graph store this
/// process talks to.
pub async fn graphrag_health(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let healthy = state.graph_store.health_check().await;
    Json(json!({ "healthy": healthy }))
}
