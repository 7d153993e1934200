//! Layered configuration: defaults -> `config/*.toml` -> environment
//! variables, following `config.py`'s dot-path sections but as a typed
//! struct rather than a dynamic map (documented deviation, see DESIGN.md).

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;

fn minutes_env_to_duration(raw_minutes: u64) -> Duration {
    Duration::from_secs(raw_minutes * 60)
}

/// Top-level application configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub app: AppSection,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub embeddings: EmbeddingsConfig,
    #[serde(default)]
    pub vector_store: VectorStoreConfig,
    #[serde(default)]
    pub graph_store: GraphStoreConfig,
    #[serde(default)]
    pub status_store: StatusStoreConfig,
    #[serde(default)]
    pub object_store: ObjectStoreConfig,
    #[serde(default)]
    pub processing: ProcessingConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub graphrag: GraphRagConfig,
    #[serde(default)]
    pub stp: StpConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub evaluation: EvaluationConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

impl AppConfig {
    /// Load configuration from environment variables with a `APP__` prefix,
    /// layered over built-in defaults.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_env("APP")
    }

    pub fn load_from_env(prefix: &str) -> Result<Self, ConfigError> {
        let builder = Config::builder().add_source(
            Environment::with_prefix(prefix)
                .separator("__")
                .try_parsing(true),
        );
        let config = builder.build()?;
        config.try_deserialize().or_else(|_| Ok(Self::default()))
    }

    pub fn load_from_file(path: &str) -> Result<Self, ConfigError> {
        let builder = Config::builder()
            .add_source(File::with_name(path))
            .add_source(Environment::with_prefix("APP").separator("__"));
        let config = builder.build()?;
        config.try_deserialize()
    }

    pub fn stp_enabled(&self) -> bool {
        self.processing.enable_stp && self.stp.enabled
    }

    pub fn graphrag_enabled(&self) -> bool {
        self.processing.enable_graphrag && self.graphrag.enabled
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            app: AppSection::default(),
            llm: LlmConfig::default(),
            embeddings: EmbeddingsConfig::default(),
            vector_store: VectorStoreConfig::default(),
            graph_store: GraphStoreConfig::default(),
            status_store: StatusStoreConfig::default(),
            object_store: ObjectStoreConfig::default(),
            processing: ProcessingConfig::default(),
            chunking: ChunkingConfig::default(),
            graphrag: GraphRagConfig::default(),
            stp: StpConfig::default(),
            retrieval: RetrievalConfig::default(),
            evaluation: EvaluationConfig::default(),
            server: ServerConfig::default(),
            telemetry: TelemetryConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppSection {
    #[serde(default = "default_app_name")]
    pub name: String,
    #[serde(default)]
    pub debug: bool,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            name: default_app_name(),
            debug: false,
            log_level: default_log_level(),
        }
    }
}

fn default_app_name() -> String {
    "climate-document-copilot".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

/// LLM endpoint configuration. Model selectors (`response`, `classifier`,
/// `rephrase`, `qualifying_factors`) may point at the same or different
/// backing models.
#[derive(Debug, Clone, Deserialize)]
pub struct LlmConfig {
    #[serde(default = "default_llm_base_url")]
    pub base_url: String,
    #[serde(default = "default_llm_model")]
    pub model: String,
    #[serde(default = "default_llm_timeout_minutes")]
    pub timeout_minutes: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

impl LlmConfig {
    pub fn timeout(&self) -> Duration {
        minutes_env_to_duration(self.timeout_minutes)
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: default_llm_base_url(),
            model: default_llm_model(),
            timeout_minutes: default_llm_timeout_minutes(),
            max_retries: default_max_retries(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
        }
    }
}

fn default_llm_base_url() -> String {
    "http://localhost:11434".to_string()
}
fn default_llm_model() -> String {
    "mistral:7b".to_string()
}
fn default_llm_timeout_minutes() -> u64 {
    2
}
fn default_max_retries() -> u32 {
    3
}
fn default_temperature() -> f32 {
    0.3
}
fn default_max_tokens() -> u32 {
    600
}

/// Embedding model dimensions, independently configured per §3.
#[derive(Debug, Clone, Deserialize)]
pub struct EmbeddingsConfig {
    #[serde(default = "default_chunk_dim")]
    pub chunk_dim: usize,
    #[serde(default = "default_summary_dim")]
    pub summary_dim: usize,
    #[serde(default = "default_stp_dim")]
    pub stp_dim: usize,
    #[serde(default = "default_embedding_batch_size")]
    pub batch_size: usize,
}

impl Default for EmbeddingsConfig {
    fn default() -> Self {
        Self {
            chunk_dim: default_chunk_dim(),
            summary_dim: default_summary_dim(),
            stp_dim: default_stp_dim(),
            batch_size: default_embedding_batch_size(),
        }
    }
}

fn default_chunk_dim() -> usize {
    1024
}
fn default_summary_dim() -> usize {
    768
}
fn default_stp_dim() -> usize {
    384
}
fn default_embedding_batch_size() -> usize {
    32
}

#[derive(Debug, Clone, Deserialize)]
pub struct VectorStoreConfig {
    #[serde(default = "default_vector_store_url")]
    pub url: String,
    #[serde(default = "default_search_timeout_ms")]
    pub per_collection_timeout_ms: u64,
}

impl VectorStoreConfig {
    pub fn per_collection_timeout(&self) -> Duration {
        Duration::from_millis(self.per_collection_timeout_ms)
    }
}

impl Default for VectorStoreConfig {
    fn default() -> Self {
        Self {
            url: default_vector_store_url(),
            per_collection_timeout_ms: default_search_timeout_ms(),
        }
    }
}

fn default_vector_store_url() -> String {
    "http://localhost:19530".to_string()
}
fn default_search_timeout_ms() -> u64 {
    2_000
}

#[derive(Debug, Clone, Deserialize)]
pub struct GraphStoreConfig {
    #[serde(default = "default_graph_store_dir")]
    pub base_dir: String,
    #[serde(default = "default_max_nodes")]
    pub max_nodes: usize,
    #[serde(default = "default_max_edges")]
    pub max_edges: usize,
}

impl Default for GraphStoreConfig {
    fn default() -> Self {
        Self {
            base_dir: default_graph_store_dir(),
            max_nodes: default_max_nodes(),
            max_edges: default_max_edges(),
        }
    }
}

fn default_graph_store_dir() -> String {
    "./graphrag_workspace".to_string()
}
fn default_max_nodes() -> usize {
    200
}
fn default_max_edges() -> usize {
    500
}

#[derive(Debug, Clone, Deserialize)]
pub struct StatusStoreConfig {
    #[serde(default = "default_status_store_url")]
    pub url: String,
}

impl Default for StatusStoreConfig {
    fn default() -> Self {
        Self {
            url: default_status_store_url(),
        }
    }
}

fn default_status_store_url() -> String {
    "mongodb://localhost:27017".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct ObjectStoreConfig {
    #[serde(default = "default_object_store_url")]
    pub url: String,
    #[serde(default = "default_allowed_extensions")]
    pub allowed_extensions: Vec<String>,
}

impl Default for ObjectStoreConfig {
    fn default() -> Self {
        Self {
            url: default_object_store_url(),
            allowed_extensions: default_allowed_extensions(),
        }
    }
}

fn default_object_store_url() -> String {
    "http://localhost:9000".to_string()
}

/// Document extensions recognized (§6).
fn default_allowed_extensions() -> Vec<String> {
    vec![
        "pdf", "docx", "doc", "xlsx", "xls", "csv", "txt",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProcessingConfig {
    #[serde(default = "default_max_file_size_mb")]
    pub max_file_size_mb: u64,
    #[serde(default = "default_true")]
    pub enable_graphrag: bool,
    #[serde(default = "default_true")]
    pub enable_stp: bool,
    #[serde(default = "default_max_concurrent_documents")]
    pub max_concurrent_documents: usize,
    #[serde(default = "default_stage_workers")]
    pub stage_workers: usize,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            max_file_size_mb: default_max_file_size_mb(),
            enable_graphrag: true,
            enable_stp: true,
            max_concurrent_documents: default_max_concurrent_documents(),
            stage_workers: default_stage_workers(),
        }
    }
}

fn default_max_file_size_mb() -> u64 {
    100
}
fn default_true() -> bool {
    true
}
fn default_max_concurrent_documents() -> usize {
    3
}
fn default_stage_workers() -> usize {
    3
}

/// Per-bucket chunk size bounds and overlap ratios, §4.2.
#[derive(Debug, Clone, Deserialize)]
pub struct ChunkingConfig {
    #[serde(default = "default_news_overlap")]
    pub news_overlap: f32,
    #[serde(default = "default_policy_overlap")]
    pub policy_overlap: f32,
    #[serde(default = "default_research_overlap")]
    pub research_overlap: f32,
    #[serde(default = "default_scientific_hard_cap")]
    pub scientific_hard_cap: usize,
    #[serde(default = "default_emergency_split_tolerance")]
    pub emergency_split_tolerance: f32,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            news_overlap: default_news_overlap(),
            policy_overlap: default_policy_overlap(),
            research_overlap: default_research_overlap(),
            scientific_hard_cap: default_scientific_hard_cap(),
            emergency_split_tolerance: default_emergency_split_tolerance(),
        }
    }
}

fn default_news_overlap() -> f32 {
    0.15
}
fn default_policy_overlap() -> f32 {
    0.15
}
fn default_research_overlap() -> f32 {
    0.15
}
fn default_scientific_hard_cap() -> usize {
    950
}
fn default_emergency_split_tolerance() -> f32 {
    1.02
}

#[derive(Debug, Clone, Deserialize)]
pub struct GraphRagConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_graphrag_timeout_minutes")]
    pub timeout_minutes: u64,
    #[serde(default = "default_min_text_length")]
    pub min_text_length: usize,
    #[serde(default = "default_entity_types_by_bucket")]
    pub entity_types_by_bucket: HashMap<String, Vec<String>>,
}

impl GraphRagConfig {
    pub fn timeout(&self) -> Duration {
        minutes_env_to_duration(self.timeout_minutes)
    }
}

impl Default for GraphRagConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            timeout_minutes: default_graphrag_timeout_minutes(),
            min_text_length: default_min_text_length(),
            entity_types_by_bucket: default_entity_types_by_bucket(),
        }
    }
}

fn default_graphrag_timeout_minutes() -> u64 {
    60
}
fn default_min_text_length() -> usize {
    100
}

fn default_entity_types_by_bucket() -> HashMap<String, Vec<String>> {
    let mut map = HashMap::new();
    map.insert(
        "researchpapers".to_string(),
        vec_of(&["ORGANIZATION", "PERSON", "LOCATION", "RESEARCH_TOPIC", "METHODOLOGY", "DATASET"]),
    );
    map.insert(
        "policy".to_string(),
        vec_of(&["ORGANIZATION", "PERSON", "LOCATION", "POLICY", "REGULATION", "LEGAL_ENTITY"]),
    );
    map.insert(
        "scientificdata".to_string(),
        vec_of(&["ORGANIZATION", "PERSON", "LOCATION", "DATASET", "MEASUREMENT", "VARIABLE"]),
    );
    map.insert(
        "news".to_string(),
        vec_of(&["ORGANIZATION", "PERSON", "LOCATION", "EVENT", "TOPIC"]),
    );
    map
}

fn vec_of(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

/// STP sub-pipeline configuration, §4.5.
#[derive(Debug, Clone, Deserialize)]
pub struct StpConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_stp_timeout_minutes")]
    pub timeout_minutes: u64,
    #[serde(default = "default_stp_min_confidence")]
    pub min_confidence_threshold: f32,
    #[serde(default = "default_stp_rephrase_max_words")]
    pub rephrase_max_words: usize,
    #[serde(default = "default_stp_min_chunk_tokens")]
    pub min_chunk_tokens: usize,
    #[serde(default = "default_stp_max_chunk_tokens")]
    pub max_chunk_tokens: usize,
    #[serde(default = "default_stp_target_chunk_tokens")]
    pub target_chunk_tokens: usize,
    #[serde(default = "default_stp_boundary_threshold")]
    pub boundary_threshold: f32,
    #[serde(default = "default_embedding_batch_size")]
    pub batch_size: usize,
}

impl StpConfig {
    pub fn timeout(&self) -> Duration {
        minutes_env_to_duration(self.timeout_minutes)
    }
}

impl Default for StpConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            timeout_minutes: default_stp_timeout_minutes(),
            min_confidence_threshold: default_stp_min_confidence(),
            rephrase_max_words: default_stp_rephrase_max_words(),
            min_chunk_tokens: default_stp_min_chunk_tokens(),
            max_chunk_tokens: default_stp_max_chunk_tokens(),
            target_chunk_tokens: default_stp_target_chunk_tokens(),
            boundary_threshold: default_stp_boundary_threshold(),
            batch_size: default_embedding_batch_size(),
        }
    }
}

fn default_stp_timeout_minutes() -> u64 {
    5
}
fn default_stp_min_confidence() -> f32 {
    0.5
}
fn default_stp_rephrase_max_words() -> usize {
    80
}
fn default_stp_min_chunk_tokens() -> usize {
    200
}
fn default_stp_max_chunk_tokens() -> usize {
    1500
}
fn default_stp_target_chunk_tokens() -> usize {
    800
}
fn default_stp_boundary_threshold() -> f32 {
    0.6
}

/// Query-path configuration: deadlines, rerank cutoffs, graph relevance
/// threshold, §4.12.
#[derive(Debug, Clone, Deserialize)]
pub struct RetrievalConfig {
    #[serde(default = "default_max_response_time_ms")]
    pub max_response_time_ms: u64,
    #[serde(default = "default_source_timeout_ms")]
    pub source_timeout_ms: u64,
    #[serde(default = "default_rerank_cutoff_start")]
    pub rerank_cutoff_start: usize,
    #[serde(default = "default_rerank_cutoff_continue")]
    pub rerank_cutoff_continue: usize,
    #[serde(default = "default_top_k_rerank")]
    pub top_k_rerank: usize,
    #[serde(default = "default_graph_relevance_threshold")]
    pub graph_relevance_threshold: f32,
    #[serde(default = "default_fuzzy_match_threshold")]
    pub fuzzy_match_threshold: f32,
    #[serde(default = "default_context_char_budget")]
    pub context_char_budget: usize,
    #[serde(default = "default_recent_messages_k")]
    pub recent_messages_k: usize,
}

impl RetrievalConfig {
    pub fn max_response_time(&self) -> Duration {
        Duration::from_millis(self.max_response_time_ms)
    }

    pub fn source_timeout(&self) -> Duration {
        Duration::from_millis(self.source_timeout_ms)
    }
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            max_response_time_ms: default_max_response_time_ms(),
            source_timeout_ms: default_source_timeout_ms(),
            rerank_cutoff_start: default_rerank_cutoff_start(),
            rerank_cutoff_continue: default_rerank_cutoff_continue(),
            top_k_rerank: default_top_k_rerank(),
            graph_relevance_threshold: default_graph_relevance_threshold(),
            fuzzy_match_threshold: default_fuzzy_match_threshold(),
            context_char_budget: default_context_char_budget(),
            recent_messages_k: default_recent_messages_k(),
        }
    }
}

fn default_max_response_time_ms() -> u64 {
    20_000
}
fn default_source_timeout_ms() -> u64 {
    4_000
}
fn default_rerank_cutoff_start() -> usize {
    5
}
fn default_rerank_cutoff_continue() -> usize {
    6
}
fn default_top_k_rerank() -> usize {
    5
}
fn default_graph_relevance_threshold() -> f32 {
    0.35
}
fn default_fuzzy_match_threshold() -> f32 {
    0.8
}
fn default_context_char_budget() -> usize {
    6_000
}
fn default_recent_messages_k() -> usize {
    6
}

#[derive(Debug, Clone, Deserialize)]
pub struct EvaluationConfig {
    #[serde(default = "default_sampling_rate")]
    pub sampling_rate: f64,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    #[serde(default = "default_eval_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_eval_interval_secs")]
    pub tick_interval_secs: u64,
}

impl EvaluationConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.tick_interval_secs)
    }
}

impl Default for EvaluationConfig {
    fn default() -> Self {
        Self {
            sampling_rate: default_sampling_rate(),
            queue_capacity: default_queue_capacity(),
            batch_size: default_eval_batch_size(),
            tick_interval_secs: default_eval_interval_secs(),
        }
    }
}

fn default_sampling_rate() -> f64 {
    1.0
}
fn default_queue_capacity() -> usize {
    1000
}
fn default_eval_batch_size() -> usize {
    10
}
fn default_eval_interval_secs() -> u64 {
    30
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_workers")]
    pub workers: usize,
}

impl ServerConfig {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            workers: default_workers(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    5000
}
fn default_workers() -> usize {
    num_cpus::get().max(1)
}

#[derive(Debug, Clone, Deserialize)]
pub struct TelemetryConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub otlp_endpoint: Option<String>,
    #[serde(default = "default_service_name")]
    pub service_name: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            otlp_endpoint: None,
            service_name: default_service_name(),
        }
    }
}

fn default_service_name() -> String {
    "climate-document-copilot".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_four_entity_type_buckets() {
        let config = AppConfig::default();
        assert_eq!(config.graphrag.entity_types_by_bucket.len(), 4);
        assert!(config.graphrag.entity_types_by_bucket.contains_key("news"));
    }

    #[test]
    fn minutes_env_vars_convert_to_seconds() {
        let llm = LlmConfig {
            timeout_minutes: 2,
            ..LlmConfig::default()
        };
        assert_eq!(llm.timeout(), Duration::from_secs(120));

        let stp = StpConfig {
            timeout_minutes: 5,
            ..StpConfig::default()
        };
        assert_eq!(stp.timeout(), Duration::from_secs(300));
    }

    #[test]
    fn scientific_data_chunk_hard_cap_matches_spec() {
        assert_eq!(ChunkingConfig::default().scientific_hard_cap, 950);
    }

    #[test]
    fn stp_gated_by_both_processing_and_stp_flags() {
        let mut config = AppConfig::default();
        assert!(config.stp_enabled());
        config.processing.enable_stp = false;
        assert!(!config.stp_enabled());
    }

    #[test]
    fn allowed_extensions_match_spec_section_6() {
        let exts = ObjectStoreConfig::default().allowed_extensions;
        for ext in ["pdf", "docx", "doc", "xlsx", "xls", "csv", "txt"] {
            assert!(exts.iter().any(|e| e == ext), "missing extension {ext}");
        }
    }
}
