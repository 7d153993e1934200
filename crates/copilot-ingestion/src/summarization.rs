//! The Summarizer Family (§4.3): exactly one [`Summary`] per document, with
//! bucket-specific prompt framing. The LLM call itself is behind
//! [`SummaryLlm`] so this crate never couples to a concrete model backend;
//! [`ExtractiveFallback`] keeps it usable (and testable) with no backend at
//! all, the same no-op-default shape as the STP and graph-extraction stages.

use async_trait::async_trait;
use copilot_core::{Bucket, Document, Summary};

use crate::Result;

#[async_trait]
pub trait SummaryLlm: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<String>;
}

/// Extracts the first few sentences as a stand-in summary. Used when no
/// LLM backend is configured; never fails.
pub struct ExtractiveFallback {
    pub sentence_count: usize,
}

impl Default for ExtractiveFallback {
    fn default() -> Self {
        Self { sentence_count: 3 }
    }
}

#[async_trait]
impl SummaryLlm for ExtractiveFallback {
    async fn complete(&self, prompt: &str) -> Result<String> {
        let sentences: Vec<&str> = prompt
            .split(['.', '\n'])
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .take(self.sentence_count)
            .collect();
        Ok(sentences.join(". "))
    }
}

fn bucket_persona(bucket: Bucket) -> &'static str {
    match bucket {
        Bucket::ResearchPapers => "You summarize peer-reviewed climate research. Emphasize methodology and findings.",
        Bucket::Policy => "You summarize climate policy and legal text. Emphasize obligations, scope, and enforcement.",
        Bucket::ScientificData => "You summarize tabular scientific datasets. Emphasize variables, units, and coverage.",
        Bucket::News => "You summarize climate news articles. Emphasize the event, actors, and stated impact.",
    }
}

fn bucket_document_type(bucket: Bucket) -> &'static str {
    match bucket {
        Bucket::ResearchPapers => "research_paper",
        Bucket::Policy => "policy_document",
        Bucket::ScientificData => "scientific_dataset",
        Bucket::News => "news_article",
    }
}

fn build_prompt(bucket: Bucket, full_text: &str) -> String {
    format!(
        "{persona}\n\nProduce a concise summary (3-5 sentences) and a short title.\n\nDocument:\n{text}",
        persona = bucket_persona(bucket),
        text = truncate_for_prompt(full_text),
    )
}

const MAX_PROMPT_CHARS: usize = 12_000;

fn truncate_for_prompt(text: &str) -> &str {
    if text.len() <= MAX_PROMPT_CHARS {
        text
    } else {
        &text[..MAX_PROMPT_CHARS]
    }
}

/// Derives a short title from the first non-empty line, falling back to a
/// generic bucket-typed title if nothing usable is present (§4.3 edge case).
fn derive_title(bucket: Bucket, full_text: &str, llm_output: &str) -> String {
    if let Some(first_line) = llm_output.lines().next() {
        let candidate = first_line.trim().trim_start_matches('#').trim();
        if !candidate.is_empty() && candidate.len() <= 200 {
            return candidate.to_string();
        }
    }
    if let Some(first_line) = full_text.lines().find(|l| !l.trim().is_empty()) {
        let candidate = first_line.trim();
        if candidate.len() <= 200 {
            return candidate.to_string();
        }
    }
    format!("Untitled {}", bucket_document_type(bucket))
}

pub struct Summarizer<'a> {
    llm: &'a dyn SummaryLlm,
}

impl<'a> Summarizer<'a> {
    pub fn new(llm: &'a dyn SummaryLlm) -> Self {
        Self { llm }
    }

    pub async fn summarize(&self, document: &Document, full_text: &str) -> Result<Summary> {
        if full_text.trim().is_empty() {
            return Ok(Summary {
                id: copilot_core::SummaryId::new(),
                document_id: document.id,
                document_key: document.key.clone(),
                bucket: document.bucket,
                text: String::new(),
                title: format!("Untitled {}", bucket_document_type(document.bucket)),
                document_type: bucket_document_type(document.bucket).to_string(),
                created_at: chrono::Utc::now(),
            });
        }

        let prompt = build_prompt(document.bucket, full_text);
        let output = self.llm.complete(&prompt).await?;
        let title = derive_title(document.bucket, full_text, &output);

        Ok(Summary {
            id: copilot_core::SummaryId::new(),
            document_id: document.id,
            document_key: document.key.clone(),
            bucket: document.bucket,
            text: output,
            title,
            document_type: bucket_document_type(document.bucket).to_string(),
            created_at: chrono::Utc::now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use copilot_core::DocumentKey;

    #[tokio::test]
    async fn empty_document_yields_empty_summary_with_fallback_title() {
        let llm = ExtractiveFallback::default();
        let summarizer = Summarizer::new(&llm);
        let doc = Document::new(DocumentKey::for_bucket(Bucket::News, "https://x"), Bucket::News);

        let summary = summarizer.summarize(&doc, "").await.unwrap();
        assert!(summary.text.is_empty());
        assert!(summary.title.starts_with("Untitled"));
    }

    #[tokio::test]
    async fn summarizes_with_bucket_specific_document_type() {
        let llm = ExtractiveFallback::default();
        let summarizer = Summarizer::new(&llm);
        let doc = Document::new(DocumentKey::for_bucket(Bucket::Policy, "law.pdf"), Bucket::Policy);

        let text = "Emissions Reduction Act. This law establishes binding emissions targets. It applies to all industrial facilities.";
        let summary = summarizer.summarize(&doc, text).await.unwrap();

        assert_eq!(summary.document_type, "policy_document");
        assert!(!summary.text.is_empty());
    }
}
