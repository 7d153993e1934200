//! The Retrieval Orchestrator (§4.12): parallel fan-out across chunks,
//! summaries and graph-structured search, fusion + cross-encoder rerank,
//! score-priority context assembly, and the per-query state machine
//!
//! ```text
//! INIT -> CLASSIFY -> (SHORT_CIRCUIT_REPLY -> DONE)
//!                    | (RESOLVE -> RETRIEVE -> (EMPTY -> FALLBACK_GEN -> DONE)
//!                                             | RERANK -> GENERATE -> STP_LOOKUP -> ENQUEUE_EVAL -> DONE)
//! any state -> TIMEOUT -> TIMEOUT_REPLY -> DONE
//! ```
//!
//! This module owns fan-out/fusion/assembly; query classification (§4.11)
//! and response generation/parsing (§4.13) live in `copilot-nlp` and are
//! supplied to the orchestrator by the caller, keeping this crate free of a
//! dependency on `copilot-nlp`.

use std::time::Duration;

use copilot_core::{Bucket, Embedding, RetrievalConfig};
use tokio::time::timeout;
use tracing::warn;

use crate::graph_store::{GraphStore, SearchTarget};
use crate::reranking::{RerankDocument, Reranker};
use crate::vector_store::{ScoredChunk, ScoredSummary, VectorStore};

/// What conversational turn this query belongs to (§4.12). `Start` applies
/// grammar fixes only; `Continue` applies full reference resolution against
/// the last `recent_messages_k` messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryTurn {
    Start,
    Continue,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    Chunk,
    Summary,
    Graph,
}

impl SourceKind {
    /// Tie-break priority when fusion scores are equal (§5 Ordering guarantees).
    fn priority(&self) -> u8 {
        match self {
            SourceKind::Chunk => 2,
            SourceKind::Summary => 1,
            SourceKind::Graph => 0,
        }
    }
}

/// One fused, source-tagged retrieval result, ready for reranking and
/// context assembly.
#[derive(Debug, Clone)]
pub struct RetrievedItem {
    pub source: SourceKind,
    pub document_identifier: String,
    pub text: String,
    pub score: f32,
    pub insertion_order: usize,
}

/// Everything the Retrieval Orchestrator needs to run one query, gathered by
/// the caller (composition root) from classification + reference resolution.
///
/// `query_embedding` and `summary_query_embedding` are the same query text
/// embedded against the `chunk` and `summary` models respectively: D_chunk
/// and D_summary are configured independently (§3), so the chunks and
/// summaries collections cannot share one query vector.
pub struct RetrievalRequest<'a> {
    pub query_text: String,
    pub query_embedding: Embedding,
    pub summary_query_embedding: Embedding,
    pub turn: QueryTurn,
    pub bucket: Option<Bucket>,
    pub vector_store: &'a dyn VectorStore,
    pub graph_store: &'a dyn GraphStore,
    pub config: &'a RetrievalConfig,
}

/// Queries the graph store and converts hits into cosine-filtered
/// [`RetrievedItem`]s (§4.12 "Graph search semantics"). The graph endpoint's
/// "single-element array wrapper" unwrap is modeled by `structured_search`
/// already returning a flat `Vec`, so there's nothing left to unwrap here;
/// the threshold filter below is the part that survives the port.
async fn graph_search(
    graph_store: &dyn GraphStore,
    query_text: &str,
    bucket: Option<Bucket>,
    relevance_threshold: f32,
) -> Vec<RetrievedItem> {
    let entity_hits = graph_store
        .structured_search(SearchTarget::Entities, query_text, bucket, 20)
        .await
        .unwrap_or_default();
    let relationship_hits = graph_store
        .structured_search(SearchTarget::Relationships, query_text, bucket, 20)
        .await
        .unwrap_or_default();

    entity_hits
        .into_iter()
        .chain(relationship_hits)
        .enumerate()
        .filter(|(_, hit)| hit.rank >= relevance_threshold)
        .map(|(i, hit)| RetrievedItem {
            source: SourceKind::Graph,
            document_identifier: hit.name,
            text: hit.description,
            score: hit.rank,
            insertion_order: i,
        })
        .collect()
}

/// Runs the three-source parallel fan-out (§4.12). Each source has an
/// independent timeout; a timed-out source contributes an empty set rather
/// than failing the query.
pub async fn fan_out_retrieve(request: &RetrievalRequest<'_>) -> Vec<RetrievedItem> {
    let source_timeout = request.config.source_timeout();

    let chunks_fut = timeout(
        source_timeout,
        request.vector_store.search_chunks(&request.query_embedding, request.bucket, 10, source_timeout),
    );
    let summaries_fut = timeout(
        source_timeout,
        request
            .vector_store
            .search_summaries(&request.summary_query_embedding, 5, 0.0, source_timeout),
    );
    let graph_fut = timeout(
        source_timeout,
        graph_search(request.graph_store, &request.query_text, request.bucket, request.config.graph_relevance_threshold),
    );

    let (chunks_result, summaries_result, graph_result) = tokio::join!(chunks_fut, summaries_fut, graph_fut);

    let mut items = Vec::new();

    match chunks_result {
        Ok(Ok(scored)) => items.extend(tag_chunks(scored)),
        Ok(Err(err)) => warn!(error = %err, "chunk search failed; contributing zero results"),
        Err(_) => warn!("chunk search timed out; contributing zero results"),
    }

    match summaries_result {
        Ok(Ok(scored)) => items.extend(tag_summaries(scored)),
        Ok(Err(err)) => warn!(error = %err, "summary search failed; contributing zero results"),
        Err(_) => warn!("summary search timed out; contributing zero results"),
    }

    match graph_result {
        Ok(graph_items) => items.extend(graph_items),
        Err(_) => warn!("graph search timed out; contributing zero results"),
    }

    items
}

fn tag_chunks(scored: Vec<ScoredChunk>) -> Vec<RetrievedItem> {
    scored
        .into_iter()
        .enumerate()
        .map(|(i, s)| RetrievedItem {
            source: SourceKind::Chunk,
            document_identifier: s.chunk.chunk.document_key.as_str().to_string(),
            text: s.chunk.chunk.text,
            score: s.score,
            insertion_order: i,
        })
        .collect()
}

fn tag_summaries(scored: Vec<ScoredSummary>) -> Vec<RetrievedItem> {
    scored
        .into_iter()
        .enumerate()
        .map(|(i, s)| RetrievedItem {
            source: SourceKind::Summary,
            document_identifier: s.summary.summary.document_key.as_str().to_string(),
            text: s.summary.summary.text.clone(),
            score: s.score,
            insertion_order: i,
        })
        .collect()
}

/// Fuses the fan-out results and, if the merged set exceeds the
/// conversation-type cutoff, reranks with a cross-encoder (any
/// [`Reranker`](crate::reranking::Reranker) implementation, e.g.
/// `CrossEncoderReranker`); otherwise orders by native similarity score
/// (§4.12 "Fusion & rerank").
pub async fn fuse_and_rerank(
    items: Vec<RetrievedItem>,
    turn: QueryTurn,
    query_text: &str,
    reranker: &dyn Reranker,
    config: &RetrievalConfig,
) -> Vec<RetrievedItem> {
    let cutoff = match turn {
        QueryTurn::Start => config.rerank_cutoff_start,
        QueryTurn::Continue => config.rerank_cutoff_continue,
    };

    if items.len() <= cutoff {
        let mut sorted = items;
        sorted.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| b.source.priority().cmp(&a.source.priority()))
                .then_with(|| a.insertion_order.cmp(&b.insertion_order))
        });
        return sorted;
    }

    let documents: Vec<RerankDocument> = items
        .iter()
        .enumerate()
        .map(|(i, item)| {
            RerankDocument::new(format!("{i}"), item.text.clone()).with_score(item.score)
        })
        .collect();

    match reranker.rerank(query_text, documents).await {
        Ok(results) => {
            let mut by_index: Vec<(usize, f32)> = results
                .iter()
                .filter_map(|r| r.id.parse::<usize>().ok().map(|i| (i, r.score)))
                .collect();
            by_index.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
            by_index
                .into_iter()
                .filter_map(|(i, score)| {
                    items.get(i).map(|item| RetrievedItem { score, ..item.clone() })
                })
                .take(config.top_k_rerank)
                .collect()
        }
        Err(err) => {
            warn!(error = %err, "cross-encoder rerank failed; falling back to native score order");
            let mut sorted = items;
            sorted.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
            sorted.truncate(config.top_k_rerank);
            sorted
        }
    }
}

/// One formatted, budget-accepted context item, ready to splice into the
/// generation prompt (§4.12 "Context assembly").
#[derive(Debug, Clone)]
pub struct AssembledContextItem {
    pub formatted: String,
    pub source: SourceKind,
    pub document_identifier: String,
    pub score: f32,
}

/// Strict score-priority assembler: items already carry their final rank
/// order from `fuse_and_rerank`; this just walks them in order until the
/// character budget is exhausted (§4.12 "Context assembly").
pub fn assemble_context(items: &[RetrievedItem], char_budget: usize) -> Vec<AssembledContextItem> {
    let mut assembled = Vec::new();
    let mut used = 0usize;

    for item in items {
        let tag = match item.source {
            SourceKind::Chunk => "chunk",
            SourceKind::Summary => "summary",
            SourceKind::Graph => "graph",
        };
        let formatted = format!(
            "[{tag} | {} | score={:.3}]\n{}",
            item.document_identifier, item.score, item.text
        );
        if used + formatted.len() > char_budget {
            if used == 0 {
                // Always admit at least one item, truncated to fit, so a
                // single oversized chunk doesn't yield an empty context.
                let truncated: String = formatted.chars().take(char_budget).collect();
                assembled.push(AssembledContextItem {
                    formatted: truncated,
                    source: item.source,
                    document_identifier: item.document_identifier.clone(),
                    score: item.score,
                });
            }
            break;
        }
        used += formatted.len();
        assembled.push(AssembledContextItem {
            formatted,
            source: item.source,
            document_identifier: item.document_identifier.clone(),
            score: item.score,
        });
    }

    assembled
}

/// Condensed, filler-stripped signature of a response body used as the
/// tipping-point lookup input instead of the original query (§4.12 "Post-hoc
/// tipping-point lookup"). Draws from the middle sentences, capped at 500
/// characters.
pub fn tipping_point_signature(response_body: &str) -> String {
    const MAX_LEN: usize = 500;
    let sentences: Vec<&str> = response_body
        .split(|c| c == '.' || c == '!' || c == '?')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect();

    if sentences.is_empty() {
        return String::new();
    }

    let start = sentences.len() / 4;
    let end = (sentences.len() * 3 / 4).max(start + 1).min(sentences.len());
    let middle = sentences[start..end].join(". ");

    const FILLER: &[&str] = &["basically", "essentially", "in other words", "that said", "actually"];
    let mut cleaned = middle;
    for filler in FILLER {
        cleaned = cleaned.replace(filler, "");
    }
    let cleaned = cleaned.split_whitespace().collect::<Vec<_>>().join(" ");

    cleaned.chars().take(MAX_LEN).collect()
}

/// The tipping-point lookup service (§4.12 "Post-hoc tipping-point lookup",
/// §6): an external collaborator reached with the response signature, never
/// the query itself. `None` means the service had nothing to offer; the
/// caller substitutes the canonical fallback string.
#[async_trait::async_trait]
pub trait TippingPointLookup: Send + Sync {
    async fn lookup(&self, signature: &str) -> Option<String>;
}

/// Stand-in for the external tipping-point service: always "not available".
/// A real deployment swaps this for an HTTP client at the composition root.
pub struct NoopTippingPointLookup;

#[async_trait::async_trait]
impl TippingPointLookup for NoopTippingPointLookup {
    async fn lookup(&self, _signature: &str) -> Option<String> {
        None
    }
}

/// The canonical fallback when the lookup service has nothing for this
/// response (§4.12).
pub const NO_TIPPING_POINT_AVAILABLE: &str = "No specific social tipping point available for this query.";

/// The per-query state machine (§4.12). States beyond `Init`/`Classify` are
/// driven by the composition root, which owns the classifier and generator;
/// this enum exists so the orchestrator's callers and the evaluation/logging
/// layer share one vocabulary for "where did this query end up".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryState {
    Init,
    Classify,
    ShortCircuitReply,
    Resolve,
    Retrieve,
    Empty,
    FallbackGen,
    Rerank,
    Generate,
    StpLookup,
    EnqueueEval,
    Timeout,
    TimeoutReply,
    Done,
}

impl QueryState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, QueryState::Done)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph_store::InMemoryGraphStore;
    use crate::vector_store::InMemoryVectorStore;
    use copilot_core::{Chunk, ChunkId, ChunkMetadata, DocumentId, DocumentKey, EmbeddedChunk};

    fn sample_item(source: SourceKind, score: f32, order: usize) -> RetrievedItem {
        RetrievedItem {
            source,
            document_identifier: "doc.pdf".to_string(),
            text: "some retrieved text".to_string(),
            score,
            insertion_order: order,
        }
    }

    #[test]
    fn fusion_tie_break_prefers_chunk_over_summary_over_graph() {
        let items = vec![
            sample_item(SourceKind::Graph, 0.5, 0),
            sample_item(SourceKind::Chunk, 0.5, 1),
            sample_item(SourceKind::Summary, 0.5, 2),
        ];
        let mut sorted = items;
        sorted.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap()
                .then_with(|| b.source.priority().cmp(&a.source.priority()))
        });
        assert_eq!(sorted[0].source, SourceKind::Chunk);
        assert_eq!(sorted[1].source, SourceKind::Summary);
        assert_eq!(sorted[2].source, SourceKind::Graph);
    }

    #[test]
    fn context_assembly_stops_at_char_budget() {
        let items = vec![sample_item(SourceKind::Chunk, 0.9, 0), sample_item(SourceKind::Chunk, 0.8, 1)];
        let assembled = assemble_context(&items, 40);
        assert_eq!(assembled.len(), 1);
    }

    #[test]
    fn context_assembly_always_admits_at_least_one_item() {
        let items = vec![sample_item(SourceKind::Chunk, 0.9, 0)];
        let assembled = assemble_context(&items, 5);
        assert_eq!(assembled.len(), 1);
    }

    #[test]
    fn tipping_point_signature_is_bounded_and_draws_from_the_middle() {
        let body = (0..20).map(|i| format!("Sentence number {i}")).collect::<Vec<_>>().join(". ");
        let sig = tipping_point_signature(&body);
        assert!(sig.len() <= 500);
        assert!(!sig.contains("number 0"), "should skip the opening sentences");
    }

    #[tokio::test]
    async fn fan_out_retrieve_merges_chunk_and_graph_sources() {
        let vector_store = InMemoryVectorStore::new();
        let graph_store = InMemoryGraphStore::new();
        let document = copilot_core::Document::new(DocumentKey::for_bucket(Bucket::Policy, "a.pdf"), Bucket::Policy);

        vector_store
            .insert_chunks(vec![EmbeddedChunk {
                chunk: Chunk {
                    id: ChunkId::new(),
                    document_id: DocumentId::new(),
                    document_key: document.key.clone(),
                    bucket: Bucket::Policy,
                    text: "emissions policy text".to_string(),
                    index: 0,
                    token_count: 3,
                    created_at: chrono::Utc::now(),
                    metadata: ChunkMetadata::default(),
                },
                embedding: Embedding(vec![1.0, 0.0]),
            }])
            .await
            .unwrap();

        let config = RetrievalConfig::default();
        let request = RetrievalRequest {
            query_text: "emissions policy".to_string(),
            query_embedding: Embedding(vec![1.0, 0.0]),
            summary_query_embedding: Embedding(vec![1.0, 0.0]),
            turn: QueryTurn::Start,
            bucket: None,
            vector_store: &vector_store,
            graph_store: &graph_store,
            config: &config,
        };

        let items = fan_out_retrieve(&request).await;
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].source, SourceKind::Chunk);
    }
}
