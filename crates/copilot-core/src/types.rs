//! Shared data model for the climate-document ingestion and retrieval system.
//!
//! These types are intentionally store-agnostic: a `Chunk` or `GraphEntity`
//! here carries no opinion about which vector database or columnar backend
//! persists it. Adapters in `copilot-context` and `copilot-adapters` own that.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

macro_rules! opaque_id {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub struct $name(Uuid);

        impl $name {
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            pub fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

opaque_id!(DocumentId);
opaque_id!(ChunkId);
opaque_id!(SummaryId);
opaque_id!(EntityId);
opaque_id!(RelationshipId);
opaque_id!(CommunityId);
opaque_id!(ClaimId);
opaque_id!(CovariateId);
opaque_id!(TextUnitId);
opaque_id!(StpChunkId);
opaque_id!(TaskId);
opaque_id!(EvaluationId);
opaque_id!(SessionId);
opaque_id!(UserId);
opaque_id!(MessageId);

/// The four logical corpora. Routes chunking/summarization policy and
/// vector-store collection selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Bucket {
    ResearchPapers,
    Policy,
    ScientificData,
    News,
}

impl Bucket {
    pub const ALL: [Bucket; 4] = [
        Bucket::ResearchPapers,
        Bucket::Policy,
        Bucket::ScientificData,
        Bucket::News,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Bucket::ResearchPapers => "researchpapers",
            Bucket::Policy => "policy",
            Bucket::ScientificData => "scientificdata",
            Bucket::News => "news",
        }
    }

    /// Whether the document-identifying field for this bucket is a URL
    /// (`news`) rather than a filename (every other bucket). §4.7.
    pub fn identifies_by_url(&self) -> bool {
        matches!(self, Bucket::News)
    }
}

impl std::str::FromStr for Bucket {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "researchpapers" | "research_papers" => Ok(Bucket::ResearchPapers),
            "policy" => Ok(Bucket::Policy),
            "scientificdata" | "scientific_data" => Ok(Bucket::ScientificData),
            "news" => Ok(Bucket::News),
            other => Err(format!("unknown bucket: {other}")),
        }
    }
}

impl std::fmt::Display for Bucket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Stable identifier a document is addressed by: a filename for every
/// bucket except `news`, which addresses by canonical URL (§4.7).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "value")]
pub enum DocumentKey {
    Filename(String),
    Url(String),
}

impl DocumentKey {
    pub fn for_bucket(bucket: Bucket, value: impl Into<String>) -> Self {
        if bucket.identifies_by_url() {
            DocumentKey::Url(value.into())
        } else {
            DocumentKey::Filename(value.into())
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            DocumentKey::Filename(s) => s,
            DocumentKey::Url(s) => s,
        }
    }
}

impl std::fmt::Display for DocumentKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A Document: created when ingestion starts, terminal after all enabled
/// stages commit or fail (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: DocumentId,
    pub key: DocumentKey,
    pub bucket: Bucket,
    pub ingested_at: DateTime<Utc>,
    pub chunk_count: usize,
    pub summary_count: usize,
    pub entity_count: usize,
    pub stp_chunk_count: usize,
}

impl Document {
    pub fn new(key: DocumentKey, bucket: Bucket) -> Self {
        Self {
            id: DocumentId::new(),
            key,
            bucket,
            ingested_at: Utc::now(),
            chunk_count: 0,
            summary_count: 0,
            entity_count: 0,
            stp_chunk_count: 0,
        }
    }
}

/// Element types produced by the Extractor. Mirrors the `unstructured`
/// element taxonomy the original Python extractor relied on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ElementType {
    Title,
    NarrativeText,
    ListItem,
    Table,
    FigureCaption,
    Header,
    Footer,
    PageBreak,
    UncategorizedText,
}

/// A single extracted element. Ephemeral: lives only in-memory between the
/// Extractor and downstream stages (§4.1); never persisted on its own.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Element {
    pub element_type: ElementType,
    pub text: String,
    pub page_number: Option<u32>,
    pub coordinates: Option<(f64, f64, f64, f64)>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl Element {
    pub fn new(element_type: ElementType, text: impl Into<String>) -> Self {
        Self {
            element_type,
            text: text.into(),
            page_number: None,
            coordinates: None,
            metadata: HashMap::new(),
        }
    }

    pub fn with_page(mut self, page: u32) -> Self {
        self.page_number = Some(page);
        self
    }
}

/// The strategy a chunker used, recorded for provenance (§3 Chunk metadata).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkingStrategy {
    ImradSections,
    PolicyHierarchical,
    ScientificSmallTable,
    RecursiveText,
    EmergencySplit,
}

/// Free-form provenance carried alongside every chunk.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChunkMetadata {
    pub strategy: Option<ChunkingStrategy>,
    pub section_type: Option<String>,
    pub legal_references: Vec<String>,
    pub row_index: Option<usize>,
    pub split_lineage: Vec<String>,
    #[serde(default)]
    pub extra: HashMap<String, String>,
}

/// A Chunk: unique per (Document, index), immutable once inserted (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    pub id: ChunkId,
    pub document_id: DocumentId,
    pub document_key: DocumentKey,
    pub bucket: Bucket,
    pub text: String,
    pub index: usize,
    pub token_count: usize,
    pub created_at: DateTime<Utc>,
    pub metadata: ChunkMetadata,
}

/// Exactly one per Document per successful summarization (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Summary {
    pub id: SummaryId,
    pub document_id: DocumentId,
    pub document_key: DocumentKey,
    pub bucket: Bucket,
    pub text: String,
    pub title: String,
    pub document_type: String,
    pub created_at: DateTime<Utc>,
}

/// A dense vector. An all-zero vector is the sentinel for "embedding
/// failed" (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Embedding(pub Vec<f32>);

impl Embedding {
    pub fn zeros(dim: usize) -> Self {
        Self(vec![0.0; dim])
    }

    pub fn is_sentinel_zero(&self) -> bool {
        self.0.iter().all(|v| *v == 0.0)
    }

    pub fn dim(&self) -> usize {
        self.0.len()
    }

    /// Pad with zeros or truncate to exactly `dim` floats (§4.4 transfer rules).
    pub fn normalized_to(mut self, dim: usize) -> Self {
        match self.0.len().cmp(&dim) {
            std::cmp::Ordering::Less => self.0.resize(dim, 0.0),
            std::cmp::Ordering::Greater => self.0.truncate(dim),
            std::cmp::Ordering::Equal => {}
        }
        self
    }

    pub fn cosine_similarity(&self, other: &Embedding) -> f32 {
        if self.0.len() != other.0.len() || self.0.is_empty() {
            return 0.0;
        }
        let dot: f32 = self.0.iter().zip(other.0.iter()).map(|(a, b)| a * b).sum();
        let norm_a = self.0.iter().map(|v| v * v).sum::<f32>().sqrt();
        let norm_b = other.0.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm_a == 0.0 || norm_b == 0.0 {
            0.0
        } else {
            dot / (norm_a * norm_b)
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddedChunk {
    pub chunk: Chunk,
    pub embedding: Embedding,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddedSummary {
    pub summary: Summary,
    pub embedding: Embedding,
}

/// Binary STP relevance label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StpLabel {
    Stp,
    NonStp,
}

/// STP Chunk: only relevance-positive chunks are persisted (§3, §4.5).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StpChunk {
    pub id: StpChunkId,
    pub document_name: String,
    pub original_content: String,
    pub rephrased_content: String,
    pub score: f32,
    pub qualifying_factors: String,
    pub token_count: usize,
    pub created_at: DateTime<Utc>,
    pub embedding: Option<Embedding>,
}

/// Graph Entity. Name uniqueness is not enforced; names are normalized
/// case-insensitively for lookups (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphEntity {
    pub id: EntityId,
    pub document_id: DocumentId,
    pub name: String,
    pub entity_type: String,
    pub description: String,
    pub degree: u32,
    pub rank: f32,
    pub description_embedding: Embedding,
    /// JSON-encoded list of community IDs, per §3/§9's "always emits JSON"
    /// normalization rule.
    pub community_ids_json: String,
}

impl GraphEntity {
    pub fn normalized_name(&self) -> String {
        self.name.trim().to_ascii_lowercase()
    }
}

/// Graph Relationship. Invariant: source != target after normalization (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphRelationship {
    pub id: RelationshipId,
    pub document_id: DocumentId,
    pub source_entity_name: String,
    pub target_entity_name: String,
    pub description: String,
    pub strength: f32,
    pub rank: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Community {
    pub id: CommunityId,
    pub document_id: DocumentId,
    pub community_key: u64,
    pub title: String,
    pub summary: String,
    /// JSON-encoded member entity IDs.
    pub member_ids_json: String,
    pub member_count: usize,
    pub rating: f32,
    pub level: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ClaimStatus {
    True,
    False,
    Suspected,
    Unknown,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claim {
    pub id: ClaimId,
    pub document_id: DocumentId,
    pub subject: String,
    pub object: String,
    pub claim_type: String,
    pub status: ClaimStatus,
    pub description: String,
    pub source_text: String,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Covariate {
    pub id: CovariateId,
    pub document_id: DocumentId,
    pub subject_id: String,
    pub subject_type: String,
    pub covariate_type: String,
    pub text_unit_id: TextUnitId,
    pub attributes_json: String,
}

/// Text Unit: critical for local graph search (§3). `entity_ids` /
/// `relationship_ids` are carried as JSON strings; if missing, local graph
/// search degrades non-fatally (§4.4 transfer rules).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TextUnit {
    pub id: TextUnitId,
    pub document_id: DocumentId,
    pub text: String,
    pub token_count: usize,
    pub chunk_id: Option<ChunkId>,
    pub text_embedding: Embedding,
    pub entity_ids_json: String,
    pub relationship_ids_json: String,
}

/// Per (Document, bucket) processing status (§3, §4.9).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProcessingStatus {
    pub chunks_done: bool,
    pub summary_done: bool,
    pub graphrag_done: bool,
    pub stp_done: bool,
    pub chunk_count: usize,
    pub summary_count: usize,
    pub entity_count: usize,
    pub stp_chunk_count: usize,
    pub updated_at: Option<DateTime<Utc>>,
}

impl ProcessingStatus {
    /// "Is fully processed" against a *requested* stage set, not a fixed
    /// one — a document can be fully processed under one configuration and
    /// not another (§4.9).
    pub fn is_fully_processed(&self, requested: &RequestedStages) -> bool {
        (!requested.chunking || self.chunks_done)
            && (!requested.summarization || self.summary_done)
            && (!requested.graphrag || self.graphrag_done)
            && (!requested.stp || self.stp_done)
    }
}

/// Stage flags for a single ingestion request (§4.10).
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct RequestedStages {
    pub chunking: bool,
    pub summarization: bool,
    pub graphrag: bool,
    pub stp: bool,
}

impl RequestedStages {
    pub fn any(&self) -> bool {
        self.chunking || self.summarization || self.graphrag || self.stp
    }

    /// Scientific-data documents implicitly disable graphrag and stp (§4.10 step 3).
    pub fn masked_for_bucket(mut self, bucket: Bucket) -> Self {
        if bucket == Bucket::ScientificData {
            self.graphrag = false;
            self.stp = false;
        }
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    User,
    Assistant,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub role: MessageRole,
    pub content: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            id: MessageId::new(),
            role: MessageRole::User,
            content: content.into(),
            created_at: Utc::now(),
            metadata: HashMap::new(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            id: MessageId::new(),
            role: MessageRole::Assistant,
            content: content.into(),
            created_at: Utc::now(),
            metadata: HashMap::new(),
        }
    }
}

/// A conversation session. Owns its Messages exclusively (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    pub user_id: UserId,
    pub language: String,
    pub title: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
    pub messages: Vec<Message>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

/// `start` = first turn (title generation + basic query fixes only);
/// `continue` = later turn (full rewriting, title suppressed). Glossary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationType {
    Start,
    Continue,
}

impl Session {
    pub fn new(user_id: UserId, language: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: SessionId::new(),
            user_id,
            language: language.into(),
            title: None,
            created_at: now,
            updated_at: now,
            last_activity_at: now,
            messages: Vec::new(),
            metadata: HashMap::new(),
        }
    }

    /// `start` for an empty session, `continue` otherwise.
    pub fn conversation_type(&self) -> ConversationType {
        if self.messages.is_empty() {
            ConversationType::Start
        } else {
            ConversationType::Continue
        }
    }

    /// Last `k` messages, oldest first, for reference-resolution context (§4.12).
    pub fn recent_messages(&self, k: usize) -> &[Message] {
        let len = self.messages.len();
        &self.messages[len.saturating_sub(k)..]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvaluationStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    Skipped,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EvaluationContext {
    pub chunk_texts: Vec<String>,
    pub summary_texts: Vec<String>,
    pub graph_snippets: Vec<String>,
}

/// Owned by the Evaluation Worker; may reference but does not own external
/// traces (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationRecord {
    pub id: EvaluationId,
    pub query: String,
    pub response: String,
    pub context: EvaluationContext,
    pub session_id: SessionId,
    pub conversation_type: ConversationType,
    pub status: EvaluationStatus,
    pub scores: HashMap<String, f32>,
    pub explanations: HashMap<String, String>,
    pub trace_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl EvaluationRecord {
    pub fn new(
        query: impl Into<String>,
        response: impl Into<String>,
        context: EvaluationContext,
        session_id: SessionId,
        conversation_type: ConversationType,
    ) -> Self {
        Self {
            id: EvaluationId::new(),
            query: query.into(),
            response: response.into(),
            context,
            session_id,
            conversation_type,
            status: EvaluationStatus::Pending,
            scores: HashMap::new(),
            explanations: HashMap::new(),
            trace_id: None,
            created_at: Utc::now(),
            completed_at: None,
        }
    }

    pub fn overall_score(&self) -> Option<f32> {
        if self.scores.is_empty() {
            return None;
        }
        Some(self.scores.values().sum::<f32>() / self.scores.len() as f32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bucket_round_trips_through_str() {
        for bucket in Bucket::ALL {
            let parsed: Bucket = bucket.as_str().parse().unwrap();
            assert_eq!(parsed, bucket);
        }
    }

    #[test]
    fn news_bucket_identifies_by_url() {
        assert!(Bucket::News.identifies_by_url());
        assert!(!Bucket::Policy.identifies_by_url());
    }

    #[test]
    fn embedding_normalizes_short_and_long_vectors() {
        let short = Embedding(vec![1.0, 2.0]).normalized_to(4);
        assert_eq!(short.0, vec![1.0, 2.0, 0.0, 0.0]);

        let long = Embedding(vec![1.0, 2.0, 3.0, 4.0]).normalized_to(2);
        assert_eq!(long.0, vec![1.0, 2.0]);
    }

    #[test]
    fn zero_embedding_is_sentinel() {
        assert!(Embedding::zeros(8).is_sentinel_zero());
        assert!(!Embedding(vec![0.0, 0.1]).is_sentinel_zero());
    }

    #[test]
    fn scientific_data_masks_graphrag_and_stp() {
        let requested = RequestedStages {
            chunking: true,
            summarization: true,
            graphrag: true,
            stp: true,
        }
        .masked_for_bucket(Bucket::ScientificData);

        assert!(requested.chunking);
        assert!(requested.summarization);
        assert!(!requested.graphrag);
        assert!(!requested.stp);
    }

    #[test]
    fn session_conversation_type_switches_after_first_message() {
        let mut session = Session::new(UserId::new(), "en");
        assert_eq!(session.conversation_type(), ConversationType::Start);
        session.messages.push(Message::user("hi"));
        assert_eq!(session.conversation_type(), ConversationType::Continue);
    }

    #[test]
    fn recent_messages_caps_at_k() {
        let mut session = Session::new(UserId::new(), "en");
        for i in 0..10 {
            session.messages.push(Message::user(format!("msg {i}")));
        }
        assert_eq!(session.recent_messages(6).len(), 6);
        assert_eq!(session.recent_messages(6).last().unwrap().content, "msg 9");
    }
}
