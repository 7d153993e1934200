//! The Graph Extractor (§4.4): entities, relationships, communities, claims,
//! covariates, and text units for one document. Entity type vocabularies
//! are bucket-specific (`copilot_core::GraphRagConfig::entity_types_by_bucket`).
//!
//! Transfer rule (§3, §9): community/covariate/text-unit ID lists are always
//! normalized to a JSON-encoded string before leaving this module, regardless
//! of whether the backing representation was a native array, a typed array,
//! or already a JSON string.

use std::collections::HashMap;

use async_trait::async_trait;
use copilot_core::{
    Bucket, Chunk, Claim, ClaimStatus, Community, Covariate, Document, Embedding, GraphEntity,
    GraphRelationship, TextUnit,
};
use regex::Regex;
use std::sync::OnceLock;

use crate::Result;

#[derive(Debug, Clone, Default)]
pub struct ExtractedEntityRef {
    pub name: String,
    pub entity_type: String,
    pub description: String,
}

#[derive(Debug, Clone, Default)]
pub struct ExtractedRelationshipRef {
    pub source: String,
    pub target: String,
    pub description: String,
    pub strength: f32,
}

#[derive(Debug, Clone, Default)]
pub struct GraphRagExtraction {
    pub entities: Vec<ExtractedEntityRef>,
    pub relationships: Vec<ExtractedRelationshipRef>,
}

/// Entity/relationship extraction over one document's concatenated text,
/// scoped to an allowed entity-type vocabulary.
#[async_trait]
pub trait GraphRagLlm: Send + Sync {
    async fn extract(&self, text: &str, allowed_entity_types: &[String]) -> Result<GraphRagExtraction>;
}

fn title_case_phrase_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b([A-Z][a-zA-Z]+(?:\s+[A-Z][a-zA-Z]+){0,3})\b").unwrap())
}

/// Heuristic fallback: treats capitalized multi-word phrases as entity
/// candidates, cycling through the allowed type vocabulary. No-op-grade
/// default so this crate is testable without a real model backend, the
/// same shape as the no-LLM summarization fallback.
pub struct HeuristicGraphRagLlm;

#[async_trait]
impl GraphRagLlm for HeuristicGraphRagLlm {
    async fn extract(&self, text: &str, allowed_entity_types: &[String]) -> Result<GraphRagExtraction> {
        if allowed_entity_types.is_empty() {
            return Ok(GraphRagExtraction::default());
        }

        let mut seen: HashMap<String, ExtractedEntityRef> = HashMap::new();
        for (i, m) in title_case_phrase_regex().find_iter(text).enumerate() {
            let name = m.as_str().to_string();
            if name.split_whitespace().count() < 2 {
                continue;
            }
            let entity_type = allowed_entity_types[i % allowed_entity_types.len()].clone();
            seen.entry(name.clone()).or_insert(ExtractedEntityRef {
                name,
                entity_type,
                description: format!("Mentioned in: \"{}\"", snippet_around(text, m.start(), m.end())),
            });
        }

        let entities: Vec<ExtractedEntityRef> = seen.into_values().take(50).collect();

        let mut relationships = Vec::new();
        for window in entities.windows(2) {
            relationships.push(ExtractedRelationshipRef {
                source: window[0].name.clone(),
                target: window[1].name.clone(),
                description: "co-occurs in source document".to_string(),
                strength: 0.3,
            });
        }

        Ok(GraphRagExtraction { entities, relationships })
    }
}

fn snippet_around(text: &str, start: usize, end: usize) -> String {
    let ctx_start = start.saturating_sub(40);
    let ctx_end = (end + 40).min(text.len());
    text.get(ctx_start..ctx_end).unwrap_or("").trim().to_string()
}

/// Always produces a JSON array string, whatever the source shape (§9).
pub fn normalize_id_list_to_json<T: ToString>(ids: &[T]) -> String {
    let strings: Vec<String> = ids.iter().map(ToString::to_string).collect();
    serde_json::to_string(&strings).unwrap_or_else(|_| "[]".to_string())
}

#[derive(Debug, Default)]
pub struct GraphExtractionOutput {
    pub entities: Vec<GraphEntity>,
    pub relationships: Vec<GraphRelationship>,
    pub communities: Vec<Community>,
    pub claims: Vec<Claim>,
    pub covariates: Vec<Covariate>,
    pub text_units: Vec<TextUnit>,
    pub skipped_reason: Option<String>,
}

pub struct GraphExtractor<'a> {
    llm: &'a dyn GraphRagLlm,
    min_text_length: usize,
    entity_types_by_bucket: &'a HashMap<String, Vec<String>>,
}

impl<'a> GraphExtractor<'a> {
    pub fn new(
        llm: &'a dyn GraphRagLlm,
        min_text_length: usize,
        entity_types_by_bucket: &'a HashMap<String, Vec<String>>,
    ) -> Self {
        Self {
            llm,
            min_text_length,
            entity_types_by_bucket,
        }
    }

    pub async fn extract(&self, document: &Document, chunks: &[Chunk]) -> Result<GraphExtractionOutput> {
        let full_text = chunks.iter().map(|c| c.text.as_str()).collect::<Vec<_>>().join("\n\n");

        if full_text.trim().len() < self.min_text_length {
            return Ok(GraphExtractionOutput {
                skipped_reason: Some(format!(
                    "text length {} below min_text_length {}",
                    full_text.trim().len(),
                    self.min_text_length
                )),
                ..Default::default()
            });
        }

        let allowed_types = self
            .entity_types_by_bucket
            .get(document.bucket.as_str())
            .cloned()
            .unwrap_or_default();

        let extraction = self.llm.extract(&full_text, &allowed_types).await?;

        let mut entity_ids: HashMap<String, copilot_core::EntityId> = HashMap::new();
        let mut entities = Vec::with_capacity(extraction.entities.len());
        for e in &extraction.entities {
            let id = copilot_core::EntityId::new();
            entity_ids.insert(e.name.trim().to_ascii_lowercase(), id);
            entities.push(GraphEntity {
                id,
                document_id: document.id,
                name: e.name.clone(),
                entity_type: e.entity_type.clone(),
                description: e.description.clone(),
                degree: 0,
                rank: 0.0,
                description_embedding: Embedding::zeros(0),
                community_ids_json: normalize_id_list_to_json::<String>(&[]),
            });
        }

        let mut relationships = Vec::with_capacity(extraction.relationships.len());
        for r in &extraction.relationships {
            let source_norm = r.source.trim().to_ascii_lowercase();
            let target_norm = r.target.trim().to_ascii_lowercase();
            if source_norm == target_norm {
                continue;
            }
            relationships.push(GraphRelationship {
                id: copilot_core::RelationshipId::new(),
                document_id: document.id,
                source_entity_name: r.source.clone(),
                target_entity_name: r.target.clone(),
                description: r.description.clone(),
                strength: r.strength,
                rank: 0.0,
            });
        }

        for entity in &mut entities {
            entity.degree = relationships
                .iter()
                .filter(|r| {
                    r.source_entity_name.trim().to_ascii_lowercase() == entity.normalized_name()
                        || r.target_entity_name.trim().to_ascii_lowercase() == entity.normalized_name()
                })
                .count() as u32;
        }

        let communities = if entities.is_empty() {
            Vec::new()
        } else {
            vec![Community {
                id: copilot_core::CommunityId::new(),
                document_id: document.id,
                community_key: 0,
                title: format!("{} community", document.bucket),
                summary: format!("{} entities extracted from this document", entities.len()),
                member_ids_json: normalize_id_list_to_json(
                    &entities.iter().map(|e| e.id.to_string()).collect::<Vec<_>>(),
                ),
                member_count: entities.len(),
                rating: 0.5,
                level: 0,
            }]
        };

        let text_units = chunks
            .iter()
            .map(|chunk| TextUnit {
                id: copilot_core::TextUnitId::new(),
                document_id: document.id,
                text: chunk.text.clone(),
                token_count: chunk.token_count,
                chunk_id: Some(chunk.id),
                text_embedding: Embedding::zeros(0),
                entity_ids_json: normalize_id_list_to_json::<String>(&[]),
                relationship_ids_json: normalize_id_list_to_json::<String>(&[]),
            })
            .collect();

        let claims = Vec::new();
        let covariates = Vec::new();

        Ok(GraphExtractionOutput {
            entities,
            relationships,
            communities,
            claims,
            covariates,
            text_units,
            skipped_reason: None,
        })
    }
}

/// Builds an unverified claim record. The original pipeline derives claims
/// from a separate covariate-extraction prompt; kept explicit here rather
/// than inferred, since the heuristic fallback has no basis for truth
/// status beyond `Unknown` (§4.4 edge case).
pub fn unverified_claim(
    document_id: copilot_core::DocumentId,
    subject: impl Into<String>,
    object: impl Into<String>,
    claim_type: impl Into<String>,
    description: impl Into<String>,
    source_text: impl Into<String>,
) -> Claim {
    Claim {
        id: copilot_core::ClaimId::new(),
        document_id,
        subject: subject.into(),
        object: object.into(),
        claim_type: claim_type.into(),
        status: ClaimStatus::Unknown,
        description: description.into(),
        source_text: source_text.into(),
        start_date: None,
        end_date: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use copilot_core::{ChunkId, ChunkMetadata, DocumentKey};

    fn sample_chunk(document_id: copilot_core::DocumentId, text: &str) -> Chunk {
        Chunk {
            id: ChunkId::new(),
            document_id,
            document_key: DocumentKey::for_bucket(Bucket::News, "x"),
            bucket: Bucket::News,
            text: text.to_string(),
            index: 0,
            token_count: text.split_whitespace().count(),
            created_at: chrono::Utc::now(),
            metadata: ChunkMetadata::default(),
        }
    }

    #[tokio::test]
    async fn short_text_skips_extraction_non_fatally() {
        let llm = HeuristicGraphRagLlm;
        let mut types = HashMap::new();
        types.insert("news".to_string(), vec!["ORGANIZATION".to_string()]);
        let extractor = GraphExtractor::new(&llm, 100, &types);

        let document = Document::new(DocumentKey::for_bucket(Bucket::News, "x"), Bucket::News);
        let chunks = vec![sample_chunk(document.id, "short")];

        let output = extractor.extract(&document, &chunks).await.unwrap();
        assert!(output.entities.is_empty());
        assert!(output.skipped_reason.is_some());
    }

    #[tokio::test]
    async fn extracts_entities_and_builds_a_community() {
        let llm = HeuristicGraphRagLlm;
        let mut types = HashMap::new();
        types.insert("news".to_string(), vec!["ORGANIZATION".to_string(), "PERSON".to_string()]);
        let extractor = GraphExtractor::new(&llm, 10, &types);

        let document = Document::new(DocumentKey::for_bucket(Bucket::News, "x"), Bucket::News);
        let text = "The United Nations Framework met with Global Climate Fund representatives to discuss the Paris Agreement targets for the coming decade.";
        let chunks = vec![sample_chunk(document.id, text)];

        let output = extractor.extract(&document, &chunks).await.unwrap();
        assert!(!output.entities.is_empty());
        assert_eq!(output.communities.len(), 1);
        assert!(serde_json::from_str::<Vec<String>>(&output.communities[0].member_ids_json).is_ok());
    }

    #[test]
    fn normalizes_id_lists_to_json_regardless_of_input_shape() {
        let from_strings = normalize_id_list_to_json(&["a".to_string(), "b".to_string()]);
        assert_eq!(from_strings, "[\"a\",\"b\"]");

        let empty = normalize_id_list_to_json::<String>(&[]);
        assert_eq!(empty, "[]");
    }
}
