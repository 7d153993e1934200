//! The composition root: wires the Ingestion Pipeline and the Query
//! Orchestrator's collaborators into one process-lifetime [`AppState`].
//!
//! Every collaborator here is the backend-free default (hashing embedder,
//! extractive summarizer, keyword STP classifier, in-memory stores...) —
//! concrete LLM/vector/graph backends are swapped in by constructing this
//! struct differently, never by branching inside a handler (§1, §9).

use std::collections::HashMap;
use std::sync::Arc;

use copilot_context::{
    CrossEncoderReranker, GraphStore, InMemoryGraphStore, InMemoryStpVectorStore, InMemoryVectorStore,
    NoopTippingPointLookup, RerankerConfig, TippingPointLookup, VectorStore,
};
use copilot_conversation::{IdentityRewriter, InMemorySessionStore, ReferenceResolver, SessionStore};
use copilot_core::AppConfig;
use copilot_ingestion::{
    BackgroundTaskManager, EmbedderDims, Extractor, HeuristicGraphRagLlm, HeuristicQualifyingFactors,
    InMemoryStatusTracker, KeywordStpClassifier, StatusTracker, TruncatingRephraser,
};
use copilot_nlp::{NoLlmClassifier, QueryClassifier, ResponseGenerator, UtteranceCorpus};
use copilot_workflow::{default_metrics, EvaluationWorker, NoopTraceSink};

use crate::adapters::{ContextChunkSink, ContextGraphSink, ContextStpSink};

/// Everything a request handler needs, gathered once at startup. Holds
/// owned collaborators rather than trait objects wherever the CORE's own
/// types take a borrowed `&'a dyn Trait` (`Extractor`, the STP/GraphRAG
/// fallbacks, the embedding backend): handlers borrow these fields off the
/// shared `Arc<AppState>` for the lifetime of one request.
pub struct AppState {
    pub config: AppConfig,

    pub extractor: Extractor,
    pub summarizer_llm: copilot_ingestion::ExtractiveFallback,
    pub graphrag_llm: HeuristicGraphRagLlm,
    pub entity_types_by_bucket: HashMap<String, Vec<String>>,
    pub stp_classifier: KeywordStpClassifier,
    pub stp_rephraser: TruncatingRephraser,
    pub stp_factors: HeuristicQualifyingFactors,
    pub embedding_backend: copilot_ingestion::HashingEmbeddingBackend,
    pub embedder_dims: EmbedderDims,
    pub embedder_batch_size: usize,

    pub vector_store: Arc<InMemoryVectorStore>,
    pub stp_vector_store: Arc<InMemoryStpVectorStore>,
    pub graph_store: Arc<InMemoryGraphStore>,
    pub status: Arc<InMemoryStatusTracker>,
    pub tasks: Arc<BackgroundTaskManager>,

    pub chunk_sink: ContextChunkSink,
    pub graph_sink: ContextGraphSink,
    pub stp_sink: ContextStpSink,

    pub reranker: CrossEncoderReranker,
    pub classifier: QueryClassifier<NoLlmClassifier>,
    pub response_generator: ResponseGenerator<copilot_nlp::EchoResponseLlm>,
    pub reference_resolver: ReferenceResolver<IdentityRewriter>,
    pub session_store: Arc<InMemorySessionStore>,

    pub evaluation: Arc<EvaluationWorker>,

    /// External tipping-point service (§4.12 "Post-hoc tipping-point
    /// lookup"); defaults to a no-op so the query path works with nothing
    /// configured.
    pub tipping_point_lookup: Arc<dyn TippingPointLookup>,
}

impl AppState {
    pub fn bootstrap(config: AppConfig) -> Arc<Self> {
        let vector_store = Arc::new(InMemoryVectorStore::new());
        let stp_vector_store = Arc::new(InMemoryStpVectorStore::new());
        let graph_store = Arc::new(InMemoryGraphStore::new());
        let status = InMemoryStatusTracker::new();
        let tasks = BackgroundTaskManager::new();
        let session_store = Arc::new(InMemorySessionStore::with_max_messages(
            copilot_conversation::DEFAULT_MAX_MESSAGES,
        ));

        let chunk_sink = ContextChunkSink { vector_store: vector_store.clone() };
        let graph_sink = ContextGraphSink { graph_store: graph_store.clone() };
        let stp_sink = ContextStpSink { stp_vector_store: stp_vector_store.clone() };

        let reranker_config = RerankerConfig { max_documents: config.retrieval.top_k_rerank, ..Default::default() };
        let reranker = CrossEncoderReranker::new(
            reranker_config,
            Arc::new(copilot_context::reranking::MockRerankerProvider::new()),
        );

        let classifier = QueryClassifier::new(
            UtteranceCorpus::default_climate_corpus(),
            NoLlmClassifier,
            config.retrieval.fuzzy_match_threshold,
        );
        let response_generator = ResponseGenerator::new(copilot_nlp::EchoResponseLlm);
        let reference_resolver = ReferenceResolver::new(IdentityRewriter, config.retrieval.recent_messages_k);

        let evaluation = Arc::new(EvaluationWorker::new(
            config.evaluation.clone(),
            default_metrics(),
            Arc::new(NoopTraceSink),
        ));

        Arc::new(Self {
            entity_types_by_bucket: config.graphrag.entity_types_by_bucket.clone(),
            embedder_dims: EmbedderDims {
                chunk_dim: config.embeddings.chunk_dim,
                summary_dim: config.embeddings.summary_dim,
                stp_dim: config.embeddings.stp_dim,
            },
            embedder_batch_size: config.embeddings.batch_size,
            config,
            extractor: Extractor::new(),
            summarizer_llm: copilot_ingestion::ExtractiveFallback { sentence_count: 3 },
            graphrag_llm: HeuristicGraphRagLlm,
            stp_classifier: KeywordStpClassifier,
            stp_rephraser: TruncatingRephraser,
            stp_factors: HeuristicQualifyingFactors,
            embedding_backend: copilot_ingestion::HashingEmbeddingBackend,
            vector_store,
            stp_vector_store,
            graph_store,
            status,
            tasks,
            chunk_sink,
            graph_sink,
            stp_sink,
            reranker,
            classifier,
            response_generator,
            reference_resolver,
            session_store,
            evaluation,
            tipping_point_lookup: Arc::new(NoopTippingPointLookup),
        })
    }

    /// Spawns the Evaluation Worker's fixed-interval background loop
    /// (§4.14). Returned handle should be aborted via
    /// `EvaluationWorker::shutdown` on process exit.
    pub fn spawn_evaluation_worker(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        self.evaluation.clone().spawn()
    }
}
