//! The Social Tipping Point (STP) sub-pipeline (§4.5): semantic chunking,
//! binary relevance classification, rephrasing (<=80 words), a fixed
//! five-line qualifying-factors block, then a vector insert left to
//! [`crate::embedding`]. Only relevance-positive chunks are persisted (§3).
//!
//! Reuses the Extractor's element list directly; this stage never
//! re-invokes the Extractor (§4.5 Non-goals).

use async_trait::async_trait;
use copilot_core::{Element, StpChunk, StpLabel};
use tracing::warn;

use crate::chunking::RecursiveSplitter;
use crate::Result;

#[async_trait]
pub trait StpClassifier: Send + Sync {
    async fn classify(&self, text: &str) -> Result<f32>;
}

#[async_trait]
pub trait StpRephraser: Send + Sync {
    async fn rephrase(&self, text: &str, max_words: usize) -> Result<String>;
}

#[async_trait]
pub trait QualifyingFactorsGenerator: Send + Sync {
    async fn generate(&self, text: &str) -> Result<String>;
}

const STP_KEYWORDS: [&str; 10] = [
    "tipping point",
    "threshold",
    "irreversible",
    "cascade",
    "feedback loop",
    "regime shift",
    "abrupt change",
    "critical transition",
    "social norm",
    "collective action",
];

/// Keyword-density heuristic. No-op-grade default so the sub-pipeline is
/// exercisable without a real classifier backend.
pub struct KeywordStpClassifier;

#[async_trait]
impl StpClassifier for KeywordStpClassifier {
    async fn classify(&self, text: &str) -> Result<f32> {
        let lower = text.to_ascii_lowercase();
        let hits = STP_KEYWORDS.iter().filter(|k| lower.contains(*k)).count();
        Ok((hits as f32 / 3.0).min(1.0))
    }
}

pub struct TruncatingRephraser;

#[async_trait]
impl StpRephraser for TruncatingRephraser {
    async fn rephrase(&self, text: &str, max_words: usize) -> Result<String> {
        let words: Vec<&str> = text.split_whitespace().take(max_words).collect();
        Ok(words.join(" "))
    }
}

pub struct HeuristicQualifyingFactors;

#[async_trait]
impl QualifyingFactorsGenerator for HeuristicQualifyingFactors {
    async fn generate(&self, text: &str) -> Result<String> {
        let lower = text.to_ascii_lowercase();
        let present: Vec<&str> = STP_KEYWORDS.iter().filter(|k| lower.contains(*k)).copied().collect();
        let factor_at = |i: usize| present.get(i).copied().unwrap_or("not identified");
        Ok(format!(
            "Factor 1 (Driver): {}\nFactor 2 (Threshold signal): {}\nFactor 3 (Actor): social or institutional\nFactor 4 (Timescale): not specified\nFactor 5 (Confidence): heuristic",
            factor_at(0),
            factor_at(1),
        ))
    }
}

/// Forces exactly five lines: pads with placeholders or truncates (§4.5
/// "fixed five-line block").
fn normalize_to_five_lines(text: &str) -> String {
    let mut lines: Vec<String> = text.lines().map(|l| l.to_string()).take(5).collect();
    while lines.len() < 5 {
        lines.push(format!("Factor {}: not identified", lines.len() + 1));
    }
    lines.join("\n")
}

#[derive(Debug, Clone, Copy)]
pub struct StpConfigParams {
    pub min_confidence_threshold: f32,
    pub rephrase_max_words: usize,
    pub min_chunk_tokens: usize,
    pub max_chunk_tokens: usize,
    pub target_chunk_tokens: usize,
}

fn semantic_chunk(elements: &[Element], params: &StpConfigParams) -> Vec<String> {
    let text = elements
        .iter()
        .map(|e| e.text.as_str())
        .collect::<Vec<_>>()
        .join("\n\n");
    if text.trim().is_empty() {
        return Vec::new();
    }

    let splitter = RecursiveSplitter::new(params.target_chunk_tokens, 0.0);
    let pieces = splitter.split(&text);

    // Merge-up short pieces, split-down long ones, to respect [min, max].
    let mut merged: Vec<String> = Vec::new();
    for piece in pieces {
        if let Some(last) = merged.last_mut() {
            if crate::chunking::count_tokens(last) < params.min_chunk_tokens {
                last.push_str("\n\n");
                last.push_str(&piece);
                continue;
            }
        }
        merged.push(piece);
    }

    merged
        .into_iter()
        .flat_map(|piece| {
            if crate::chunking::count_tokens(&piece) > params.max_chunk_tokens {
                RecursiveSplitter::new(params.max_chunk_tokens, 0.0).split(&piece)
            } else {
                vec![piece]
            }
        })
        .collect()
}

pub struct StpPipeline<'a> {
    classifier: &'a dyn StpClassifier,
    rephraser: &'a dyn StpRephraser,
    qualifying_factors: &'a dyn QualifyingFactorsGenerator,
    params: StpConfigParams,
}

impl<'a> StpPipeline<'a> {
    pub fn new(
        classifier: &'a dyn StpClassifier,
        rephraser: &'a dyn StpRephraser,
        qualifying_factors: &'a dyn QualifyingFactorsGenerator,
        params: StpConfigParams,
    ) -> Self {
        Self {
            classifier,
            rephraser,
            qualifying_factors,
            params,
        }
    }

    pub async fn run(&self, document_name: &str, elements: &[Element]) -> Result<Vec<StpChunk>> {
        let candidates = semantic_chunk(elements, &self.params);
        let mut results = Vec::new();

        for candidate in candidates {
            let score = self.classifier.classify(&candidate).await?;
            let label = if score >= self.params.min_confidence_threshold {
                StpLabel::Stp
            } else {
                StpLabel::NonStp
            };
            if label != StpLabel::Stp {
                continue;
            }

            // A failed rephrase or factor-generation call is per-chunk, not
            // fatal to the document's STP run (§4.5 stages 3-4): fall back
            // to the original content, and store an error marker in the
            // factor field, rather than aborting the whole batch.
            let rephrased = match self.rephraser.rephrase(&candidate, self.params.rephrase_max_words).await {
                Ok(rephrased) => rephrased,
                Err(err) => {
                    warn!(error = %err, "STP rephrase failed; falling back to original content");
                    candidate.clone()
                }
            };
            let factors_raw = match self.qualifying_factors.generate(&candidate).await {
                Ok(factors) => factors,
                Err(err) => {
                    warn!(error = %err, "STP qualifying-factors generation failed");
                    format!("error: qualifying-factors generation failed: {err}")
                }
            };
            let qualifying_factors = normalize_to_five_lines(&factors_raw);
            let token_count = crate::chunking::count_tokens(&rephrased);

            results.push(StpChunk {
                id: copilot_core::StpChunkId::new(),
                document_name: document_name.to_string(),
                original_content: candidate,
                rephrased_content: rephrased,
                score,
                qualifying_factors,
                token_count,
                created_at: chrono::Utc::now(),
                embedding: None,
            });
        }

        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use copilot_core::ElementType;

    fn default_params() -> StpConfigParams {
        StpConfigParams {
            min_confidence_threshold: 0.3,
            rephrase_max_words: 80,
            min_chunk_tokens: 5,
            max_chunk_tokens: 1500,
            target_chunk_tokens: 800,
        }
    }

    #[tokio::test]
    async fn only_relevance_positive_chunks_are_kept() {
        let classifier = KeywordStpClassifier;
        let rephraser = TruncatingRephraser;
        let factors = HeuristicQualifyingFactors;
        let pipeline = StpPipeline::new(&classifier, &rephraser, &factors, default_params());

        let elements = vec![
            Element::new(ElementType::NarrativeText, "This report discusses a tipping point and irreversible feedback loop in the climate system across several key regions."),
            Element::new(ElementType::NarrativeText, "The weather today was mild with a light breeze in the afternoon and no major news."),
        ];

        let chunks = pipeline.run("doc.pdf", &elements).await.unwrap();
        assert!(!chunks.is_empty());
        for chunk in &chunks {
            assert!(chunk.score >= 0.3);
        }
    }

    #[tokio::test]
    async fn qualifying_factors_is_always_five_lines() {
        let classifier = KeywordStpClassifier;
        let rephraser = TruncatingRephraser;
        let factors = HeuristicQualifyingFactors;
        let pipeline = StpPipeline::new(&classifier, &rephraser, &factors, default_params());

        let elements = vec![Element::new(
            ElementType::NarrativeText,
            "A critical transition and regime shift was observed, driven by social norm change and collective action across the region, marking an abrupt change in behavior.",
        )];

        let chunks = pipeline.run("doc.pdf", &elements).await.unwrap();
        assert!(!chunks.is_empty());
        assert_eq!(chunks[0].qualifying_factors.lines().count(), 5);
    }

    #[tokio::test]
    async fn rephrase_respects_max_words() {
        let rephraser = TruncatingRephraser;
        let long_text = "word ".repeat(200);
        let result = rephraser.rephrase(&long_text, 80).await.unwrap();
        assert!(result.split_whitespace().count() <= 80);
    }

    struct FailingRephraser;

    #[async_trait]
    impl StpRephraser for FailingRephraser {
        async fn rephrase(&self, _text: &str, _max_words: usize) -> Result<String> {
            Err(crate::IngestionError::ExternalUnavailable("rephrase backend timed out".to_string()))
        }
    }

    struct FailingFactors;

    #[async_trait]
    impl QualifyingFactorsGenerator for FailingFactors {
        async fn generate(&self, _text: &str) -> Result<String> {
            Err(crate::IngestionError::ExternalUnavailable("factors backend timed out".to_string()))
        }
    }

    #[tokio::test]
    async fn rephrase_failure_falls_back_to_original_content_and_keeps_the_chunk() {
        let classifier = KeywordStpClassifier;
        let rephraser = FailingRephraser;
        let factors = HeuristicQualifyingFactors;
        let pipeline = StpPipeline::new(&classifier, &rephraser, &factors, default_params());

        let elements = vec![Element::new(
            ElementType::NarrativeText,
            "This report discusses a tipping point and irreversible feedback loop in the climate system across several key regions.",
        )];

        let chunks = pipeline.run("doc.pdf", &elements).await.unwrap();
        assert!(!chunks.is_empty());
        assert_eq!(chunks[0].rephrased_content, chunks[0].original_content);
    }

    #[tokio::test]
    async fn factors_failure_stores_error_marker_and_keeps_the_chunk() {
        let classifier = KeywordStpClassifier;
        let rephraser = TruncatingRephraser;
        let factors = FailingFactors;
        let pipeline = StpPipeline::new(&classifier, &rephraser, &factors, default_params());

        let elements = vec![Element::new(
            ElementType::NarrativeText,
            "This report discusses a tipping point and irreversible feedback loop in the climate system across several key regions.",
        )];

        let chunks = pipeline.run("doc.pdf", &elements).await.unwrap();
        assert!(!chunks.is_empty());
        assert!(chunks[0].qualifying_factors.contains("error"));
        assert_eq!(chunks[0].qualifying_factors.lines().count(), 5);
    }
}
