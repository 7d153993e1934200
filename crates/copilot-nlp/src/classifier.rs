//! The Query Classifier (§4.11): exact match against a curated utterance
//! corpus, then fuzzy match, then an LLM fallback, then a rule-based
//! keyword fallback if the LLM response doesn't parse. Classification order
//! is strict — later stages only run if every earlier stage came up empty.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, warn};

use crate::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryCategory {
    Conversational,
    BotIdentity,
    ClimateQuestion,
    GeneralQuestion,
    Unclear,
}

impl QueryCategory {
    /// `conversational` and `bot_identity` short-circuit retrieval (§4.11).
    pub fn short_circuits_retrieval(&self) -> bool {
        matches!(self, QueryCategory::Conversational | QueryCategory::BotIdentity)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Classification {
    pub category: QueryCategory,
    pub confidence: f32,
    pub should_retrieve: bool,
    pub enhanced_query: Option<String>,
    pub reasoning: String,
    /// Populated only when the category short-circuits retrieval and the
    /// corpus (rather than the LLM) supplied the reply directly.
    pub corpus_reply: Option<String>,
}

/// One curated utterance: its normalized text, category, and (for
/// short-circuiting categories) a canned direct reply.
#[derive(Debug, Clone)]
pub struct CorpusEntry {
    pub normalized_text: String,
    pub category: QueryCategory,
    pub reply: Option<String>,
}

fn normalize(text: &str) -> String {
    let lowered = text.trim().to_ascii_lowercase();
    let stripped: String = lowered
        .chars()
        .map(|c| if c.is_alphanumeric() || c.is_whitespace() { c } else { ' ' })
        .collect();
    stripped.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// A typed, versioned corpus of bot-identity and conversational utterances,
/// loaded once at startup (§9 "explicit trie- or hash-backed exact-match
/// layer followed by a normalized-edit-distance fuzzy match").
#[derive(Debug, Clone, Default)]
pub struct UtteranceCorpus {
    entries: Vec<CorpusEntry>,
    exact_index: HashMap<String, usize>,
}

impl UtteranceCorpus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entry(mut self, text: &str, category: QueryCategory, reply: Option<&str>) -> Self {
        let normalized_text = normalize(text);
        self.exact_index.insert(normalized_text.clone(), self.entries.len());
        self.entries.push(CorpusEntry {
            normalized_text,
            category,
            reply: reply.map(str::to_string),
        });
        self
    }

    /// The default curated corpus, grounded in the climate-copilot domain:
    /// bot-identity questions and small talk.
    pub fn default_climate_corpus() -> Self {
        Self::new()
            .with_entry(
                "who made you",
                QueryCategory::BotIdentity,
                Some("I'm a climate document assistant built to help you explore research papers, policy text, scientific datasets, and news about climate change."),
            )
            .with_entry(
                "who built you",
                QueryCategory::BotIdentity,
                Some("I'm a climate document assistant built to help you explore research papers, policy text, scientific datasets, and news about climate change."),
            )
            .with_entry(
                "what are you",
                QueryCategory::BotIdentity,
                Some("I'm an assistant that answers questions by searching a curated library of climate research, policy, and news."),
            )
            .with_entry(
                "are you a bot",
                QueryCategory::BotIdentity,
                Some("Yes, I'm an AI assistant focused on climate documents."),
            )
            .with_entry(
                "what is your name",
                QueryCategory::BotIdentity,
                Some("I don't have a personal name — I'm a climate document assistant."),
            )
            .with_entry("hello", QueryCategory::Conversational, Some("Hello! Ask me anything about climate research, policy, or news."))
            .with_entry("hi", QueryCategory::Conversational, Some("Hi there! What would you like to know about climate change?"))
            .with_entry("thanks", QueryCategory::Conversational, Some("You're welcome!"))
            .with_entry("thank you", QueryCategory::Conversational, Some("You're welcome!"))
            .with_entry("good morning", QueryCategory::Conversational, Some("Good morning! How can I help with climate information today?"))
            .with_entry("bye", QueryCategory::Conversational, Some("Goodbye! Come back any time you have climate questions."))
    }

    /// Whole-string equality after normalization (§4.11 step 1).
    pub fn exact_match(&self, query: &str) -> Option<&CorpusEntry> {
        self.exact_index.get(&normalize(query)).map(|&i| &self.entries[i])
    }

    /// Ratio-similarity fuzzy match (§4.11 step 2), accepted at or above
    /// `threshold`. Ties broken by taking the first highest-scoring entry.
    pub fn fuzzy_match(&self, query: &str, threshold: f32) -> Option<(&CorpusEntry, f32)> {
        let normalized = normalize(query);
        self.entries
            .iter()
            .map(|entry| (entry, ratio_similarity(&normalized, &entry.normalized_text)))
            .filter(|(_, score)| *score >= threshold)
            .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))
    }
}

/// Normalized-edit-distance similarity in [0, 1], 1.0 = identical. Backed by
/// `strsim`'s Levenshtein distance, the same building block used elsewhere
/// in the pack for fuzzy text matching.
fn ratio_similarity(a: &str, b: &str) -> f32 {
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    let max_len = a.chars().count().max(b.chars().count());
    if max_len == 0 {
        return 1.0;
    }
    let distance = strsim::levenshtein(a, b);
    1.0 - (distance as f32 / max_len as f32)
}

/// The curated climate-keyword set used when the LLM fallback's JSON fails
/// to parse (§4.11 step 3 "fall back to rule-based classification").
const CLIMATE_KEYWORDS: &[&str] = &[
    "climate", "emissions", "carbon", "warming", "greenhouse", "co2",
    "renewable", "fossil", "sustainability", "biodiversity", "deforestation",
    "sea level", "drought", "flood", "wildfire", "adaptation", "mitigation",
    "cbam", "eudr", "paris agreement", "net zero", "decarbonization",
];

fn keyword_fallback_classification(query: &str) -> Classification {
    let lowered = query.to_ascii_lowercase();
    let hits = CLIMATE_KEYWORDS.iter().filter(|kw| lowered.contains(*kw)).count();
    let category = if hits > 0 { QueryCategory::ClimateQuestion } else { QueryCategory::GeneralQuestion };
    Classification {
        category,
        confidence: if hits > 0 { (0.5 + 0.1 * hits as f32).min(0.95) } else { 0.4 },
        should_retrieve: true,
        enhanced_query: None,
        reasoning: format!("rule-based keyword fallback matched {hits} climate keyword(s)"),
        corpus_reply: None,
    }
}

/// The structured classification response the LLM is asked to return
/// (§4.11 step 3): `{category, confidence, should_retrieve, enhanced_query?, reasoning}`.
#[derive(Debug, Clone, Deserialize)]
pub struct LlmClassificationResponse {
    pub category: QueryCategory,
    pub confidence: f32,
    pub should_retrieve: bool,
    #[serde(default)]
    pub enhanced_query: Option<String>,
    #[serde(default)]
    pub reasoning: String,
}

#[async_trait]
pub trait ClassifierLlm: Send + Sync {
    /// Returns the raw LLM completion text for the structured classification
    /// prompt; parsing/validation happens in [`QueryClassifier`].
    async fn classify_raw(&self, query: &str) -> Result<String>;
}

/// No-op LLM stand-in: always produces output that fails JSON parsing, so
/// classification degrades straight to the keyword fallback. Useful for
/// tests and for running with no LLM backend configured.
pub struct NoLlmClassifier;

#[async_trait]
impl ClassifierLlm for NoLlmClassifier {
    async fn classify_raw(&self, _query: &str) -> Result<String> {
        Ok(String::new())
    }
}

pub struct QueryClassifier<L: ClassifierLlm> {
    corpus: UtteranceCorpus,
    llm: L,
    fuzzy_threshold: f32,
}

impl<L: ClassifierLlm> QueryClassifier<L> {
    pub fn new(corpus: UtteranceCorpus, llm: L, fuzzy_threshold: f32) -> Self {
        Self { corpus, llm, fuzzy_threshold }
    }

    pub async fn classify(&self, query: &str) -> Classification {
        if let Some(entry) = self.corpus.exact_match(query) {
            debug!(category = ?entry.category, "exact corpus match");
            return Classification {
                category: entry.category,
                confidence: 1.0,
                should_retrieve: false,
                enhanced_query: None,
                reasoning: "exact corpus match".to_string(),
                corpus_reply: entry.reply.clone(),
            };
        }

        if let Some((entry, score)) = self.corpus.fuzzy_match(query, self.fuzzy_threshold) {
            debug!(category = ?entry.category, score, "fuzzy corpus match");
            return Classification {
                category: entry.category,
                confidence: score,
                should_retrieve: false,
                enhanced_query: None,
                reasoning: format!("fuzzy corpus match (ratio={score:.2})"),
                corpus_reply: entry.reply.clone(),
            };
        }

        match self.llm.classify_raw(query).await {
            Ok(raw) => match parse_llm_classification(&raw) {
                Some(parsed) => Classification {
                    category: parsed.category,
                    confidence: parsed.confidence,
                    should_retrieve: parsed.should_retrieve,
                    enhanced_query: parsed.enhanced_query,
                    reasoning: parsed.reasoning,
                    corpus_reply: None,
                },
                None => {
                    warn!("LLM classification response failed to parse; falling back to keyword rules");
                    keyword_fallback_classification(query)
                }
            },
            Err(err) => {
                warn!(error = %err, "LLM classification unavailable; falling back to keyword rules");
                keyword_fallback_classification(query)
            }
        }
    }
}

fn parse_llm_classification(raw: &str) -> Option<LlmClassificationResponse> {
    if raw.trim().is_empty() {
        return None;
    }
    serde_json::from_str(raw).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn exact_match_short_circuits_with_corpus_reply() {
        let classifier = QueryClassifier::new(UtteranceCorpus::default_climate_corpus(), NoLlmClassifier, 0.8);
        let result = classifier.classify("who made you?").await;
        assert_eq!(result.category, QueryCategory::BotIdentity);
        assert!(!result.should_retrieve);
        assert!(result.corpus_reply.is_some());
    }

    #[tokio::test]
    async fn fuzzy_match_accepts_close_variants() {
        let classifier = QueryClassifier::new(UtteranceCorpus::default_climate_corpus(), NoLlmClassifier, 0.8);
        let result = classifier.classify("who  made  you??").await;
        assert!(result.category.short_circuits_retrieval());
    }

    #[tokio::test]
    async fn unmatched_query_falls_back_to_keywords() {
        let classifier = QueryClassifier::new(UtteranceCorpus::default_climate_corpus(), NoLlmClassifier, 0.8);
        let result = classifier.classify("How does CBAM interact with EUDR?").await;
        assert_eq!(result.category, QueryCategory::ClimateQuestion);
        assert!(result.should_retrieve);
    }

    #[tokio::test]
    async fn non_climate_query_falls_back_to_general() {
        let classifier = QueryClassifier::new(UtteranceCorpus::default_climate_corpus(), NoLlmClassifier, 0.8);
        let result = classifier.classify("What's the best pizza topping?").await;
        assert_eq!(result.category, QueryCategory::GeneralQuestion);
    }

    #[test]
    fn ratio_similarity_is_one_for_identical_strings() {
        assert_eq!(ratio_similarity("hello", "hello"), 1.0);
    }

    #[test]
    fn ratio_similarity_degrades_with_distance() {
        let sim = ratio_similarity("who made you", "who painted you");
        assert!(sim < 1.0 && sim > 0.0);
    }
}
