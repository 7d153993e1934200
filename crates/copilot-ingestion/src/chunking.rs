//! Bucket-specific chunking (§4.2). A closed variant dispatches to one
//! `Chunker` implementation per [`Bucket`]; all of them share the recursive
//! text splitter primitive below (§9: "Dynamic factory dispatch by bucket
//! is best modeled as a closed variant").
//!
//! A chunker never fails the document: an empty element set yields an empty
//! chunk list and a non-fatal warning (§4.2 Error policy).

use std::sync::OnceLock;

use copilot_core::{Bucket, Chunk, ChunkMetadata, ChunkingStrategy, DocumentId, DocumentKey, Element, ElementType};
use regex::Regex;
use tiktoken_rs::CoreBPE;
use tracing::warn;

/// Approximate-but-real token counting via the `cl100k_base` BPE, falling
/// back to a chars/4 heuristic if the tokenizer fails to initialize (it
/// never should, but the fallback keeps chunking infallible).
fn token_counter() -> &'static Option<CoreBPE> {
    static BPE: OnceLock<Option<CoreBPE>> = OnceLock::new();
    BPE.get_or_init(|| tiktoken_rs::cl100k_base().ok())
}

pub fn count_tokens(text: &str) -> usize {
    match token_counter() {
        Some(bpe) => bpe.encode_ordinary(text).len(),
        None => (text.len() + 3) / 4,
    }
}

/// The recursive text splitter shared by every bucket (§4.2 "Shared
/// primitive"). Separators trend from paragraph breaks to whitespace.
pub struct RecursiveSplitter {
    pub chunk_size_tokens: usize,
    pub overlap_ratio: f32,
    pub separators: Vec<&'static str>,
}

impl Default for RecursiveSplitter {
    fn default() -> Self {
        Self {
            chunk_size_tokens: 512,
            overlap_ratio: 0.15,
            separators: vec!["\n\n", "\n", ". ", "! ", "? ", "; ", ", ", " "],
        }
    }
}

impl RecursiveSplitter {
    pub fn new(chunk_size_tokens: usize, overlap_ratio: f32) -> Self {
        Self {
            chunk_size_tokens,
            overlap_ratio,
            ..Default::default()
        }
    }

    pub fn split(&self, text: &str) -> Vec<String> {
        if text.trim().is_empty() {
            return Vec::new();
        }
        let pieces = self.split_recursive(text, 0);
        self.apply_overlap(pieces)
    }

    fn split_recursive(&self, text: &str, separator_idx: usize) -> Vec<String> {
        if count_tokens(text) <= self.chunk_size_tokens {
            return vec![text.to_string()];
        }

        let Some(sep) = self.separators.get(separator_idx) else {
            return self.fixed_size_fallback(text);
        };

        let parts: Vec<&str> = text.split(sep).filter(|p| !p.is_empty()).collect();
        if parts.len() <= 1 {
            return self.split_recursive(text, separator_idx + 1);
        }

        let mut merged = Vec::new();
        let mut current = String::new();
        for part in parts {
            let candidate = if current.is_empty() {
                part.to_string()
            } else {
                format!("{current}{sep}{part}")
            };
            if count_tokens(&candidate) <= self.chunk_size_tokens {
                current = candidate;
            } else {
                if !current.is_empty() {
                    merged.push(std::mem::take(&mut current));
                }
                current = part.to_string();
            }
        }
        if !current.is_empty() {
            merged.push(current);
        }

        merged
            .into_iter()
            .flat_map(|piece| {
                if count_tokens(&piece) > self.chunk_size_tokens {
                    self.split_recursive(&piece, separator_idx + 1)
                } else {
                    vec![piece]
                }
            })
            .collect()
    }

    fn fixed_size_fallback(&self, text: &str) -> Vec<String> {
        let chars: Vec<char> = text.chars().collect();
        let chars_per_token = 4;
        let chunk_chars = (self.chunk_size_tokens * chars_per_token).max(1);
        let mut out = Vec::new();
        let mut start = 0;
        while start < chars.len() {
            let end = (start + chunk_chars).min(chars.len());
            out.push(chars[start..end].iter().collect());
            if end >= chars.len() {
                break;
            }
            start = end;
        }
        out
    }

    fn apply_overlap(&self, pieces: Vec<String>) -> Vec<String> {
        if pieces.len() <= 1 || self.overlap_ratio <= 0.0 {
            return pieces;
        }
        let overlap_tokens = ((self.chunk_size_tokens as f32) * self.overlap_ratio) as usize;
        if overlap_tokens == 0 {
            return pieces;
        }
        let mut out = Vec::with_capacity(pieces.len());
        for (i, piece) in pieces.iter().enumerate() {
            if i == 0 {
                out.push(piece.clone());
                continue;
            }
            let prev = &pieces[i - 1];
            let tail = trailing_tokens(prev, overlap_tokens);
            out.push(format!("{tail} {piece}"));
        }
        out
    }
}

fn trailing_tokens(text: &str, approx_tokens: usize) -> String {
    let words: Vec<&str> = text.split_whitespace().collect();
    let approx_words = (approx_tokens as f32 * 0.75).ceil() as usize;
    let start = words.len().saturating_sub(approx_words.max(1));
    words[start..].join(" ")
}

/// Result of chunking one document: the chunks plus diagnostics the
/// orchestrator logs but never fails on.
#[derive(Debug, Default)]
pub struct ChunkingOutcome {
    pub chunks: Vec<Chunk>,
    pub excluded_reference_elements: usize,
    pub warnings: Vec<String>,
}

pub trait Chunker: Send + Sync {
    fn chunk(
        &self,
        elements: &[Element],
        document_id: DocumentId,
        document_key: &DocumentKey,
    ) -> ChunkingOutcome;
}

fn new_chunk(
    document_id: DocumentId,
    document_key: &DocumentKey,
    bucket: Bucket,
    index: usize,
    text: String,
    metadata: ChunkMetadata,
) -> Chunk {
    let token_count = count_tokens(&text);
    Chunk {
        id: copilot_core::ChunkId::new(),
        document_id,
        document_key: document_key.clone(),
        bucket,
        text,
        index,
        token_count,
        created_at: chrono::Utc::now(),
        metadata,
    }
}

/// Emergency-splits any chunk whose size exceeds `hard_cap * tolerance`,
/// tagging lineage metadata (Testable property 2, §4.2 scientific-data path).
fn emergency_split(text: &str, hard_cap: usize, lineage: &str) -> Vec<(String, Vec<String>)> {
    if text.chars().count() <= hard_cap {
        return vec![(text.to_string(), vec![])];
    }
    let chars: Vec<char> = text.chars().collect();
    let mut out = Vec::new();
    let mut start = 0;
    while start < chars.len() {
        let end = (start + hard_cap).min(chars.len());
        let piece: String = chars[start..end].iter().collect();
        out.push((piece, vec![lineage.to_string()]));
        start = end;
    }
    out
}

fn concatenate_narrative(elements: &[Element]) -> String {
    elements
        .iter()
        .filter(|e| e.element_type != ElementType::PageBreak)
        .map(|e| e.text.as_str())
        .collect::<Vec<_>>()
        .join("\n\n")
}

const REFERENCE_TITLES: [&str; 4] = ["references", "bibliography", "works cited", "citations"];

fn is_reference_title(text: &str) -> bool {
    let lower = text.trim().to_ascii_lowercase();
    REFERENCE_TITLES.iter().any(|t| lower == *t || lower.starts_with(t))
}

// ---------------------------------------------------------------------
// Research papers: IMRAD section classification.
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ImradSection {
    Abstract,
    Methodology,
    Results,
    Discussion,
    Tables,
    Figures,
    References,
    Other,
}

impl ImradSection {
    fn from_title(text: &str) -> Self {
        let lower = text.trim().to_ascii_lowercase();
        if is_reference_title(&lower) {
            ImradSection::References
        } else if lower.contains("abstract") {
            ImradSection::Abstract
        } else if lower.contains("method") {
            ImradSection::Methodology
        } else if lower.contains("result") || lower.contains("finding") {
            ImradSection::Results
        } else if lower.contains("discussion") || lower.contains("conclusion") {
            ImradSection::Discussion
        } else if lower.contains("table") {
            ImradSection::Tables
        } else if lower.contains("figure") {
            ImradSection::Figures
        } else {
            ImradSection::Other
        }
    }

    fn as_str(&self) -> &'static str {
        match self {
            ImradSection::Abstract => "abstract",
            ImradSection::Methodology => "methodology",
            ImradSection::Results => "results",
            ImradSection::Discussion => "discussion",
            ImradSection::Tables => "tables",
            ImradSection::Figures => "figures",
            ImradSection::References => "references",
            ImradSection::Other => "other",
        }
    }

    fn chunk_size_tokens(&self) -> usize {
        match self {
            ImradSection::Abstract => 300,
            ImradSection::Methodology => 600,
            ImradSection::Results => 450,
            _ => 512,
        }
    }
}

fn group_by_titles<F>(elements: &[Element], classify: F) -> Vec<(String, Vec<Element>)>
where
    F: Fn(&str) -> String,
{
    let mut groups: Vec<(String, Vec<Element>)> = Vec::new();
    let mut current_label = "other".to_string();
    let mut current: Vec<Element> = Vec::new();

    for element in elements {
        if element.element_type == ElementType::Title {
            if !current.is_empty() {
                groups.push((current_label.clone(), std::mem::take(&mut current)));
            }
            current_label = classify(&element.text);
        }
        current.push(element.clone());
    }
    if !current.is_empty() {
        groups.push((current_label, current));
    }
    groups
}

pub struct ResearchPapersChunker;

impl Chunker for ResearchPapersChunker {
    fn chunk(
        &self,
        elements: &[Element],
        document_id: DocumentId,
        document_key: &DocumentKey,
    ) -> ChunkingOutcome {
        let mut outcome = ChunkingOutcome::default();
        if elements.is_empty() {
            outcome.warnings.push("no elements to chunk".to_string());
            return outcome;
        }

        let groups = group_by_titles(elements, |title| ImradSection::from_title(title).as_str().to_string());
        let mut index = 0;

        for (label, group_elements) in groups {
            let section = match label.as_str() {
                "abstract" => ImradSection::Abstract,
                "methodology" => ImradSection::Methodology,
                "results" => ImradSection::Results,
                "discussion" => ImradSection::Discussion,
                "tables" => ImradSection::Tables,
                "figures" => ImradSection::Figures,
                "references" => ImradSection::References,
                _ => ImradSection::Other,
            };

            if section == ImradSection::References {
                outcome.excluded_reference_elements += group_elements.len();
                continue;
            }

            let text = concatenate_narrative(&group_elements);
            if text.trim().is_empty() {
                continue;
            }

            let splitter = RecursiveSplitter::new(section.chunk_size_tokens(), 0.15);
            for piece in splitter.split(&text) {
                let metadata = ChunkMetadata {
                    strategy: Some(ChunkingStrategy::ImradSections),
                    section_type: Some(section.as_str().to_string()),
                    ..Default::default()
                };
                outcome.chunks.push(new_chunk(
                    document_id,
                    document_key,
                    Bucket::ResearchPapers,
                    index,
                    piece,
                    metadata,
                ));
                index += 1;
            }
        }

        if outcome.excluded_reference_elements > 0 {
            warn!(
                excluded = outcome.excluded_reference_elements,
                "excluded reference-section elements from research-paper chunking"
            );
        }
        outcome
    }
}

// ---------------------------------------------------------------------
// Policy: hierarchical sections + legal reference extraction.
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PolicySection {
    Preamble,
    Definitions,
    MainProvisions,
    Enforcement,
    Amendments,
    Annexes,
    Schedules,
    Tables,
    Other,
}

impl PolicySection {
    fn from_title(text: &str) -> Self {
        let lower = text.trim().to_ascii_lowercase();
        if lower.contains("preamble") || lower.contains("recital") {
            PolicySection::Preamble
        } else if lower.contains("definition") {
            PolicySection::Definitions
        } else if lower.contains("enforcement") || lower.contains("penalt") {
            PolicySection::Enforcement
        } else if lower.contains("amendment") {
            PolicySection::Amendments
        } else if lower.contains("annex") {
            PolicySection::Annexes
        } else if lower.contains("schedule") {
            PolicySection::Schedules
        } else if lower.contains("table") {
            PolicySection::Tables
        } else if lower.contains("article")
            || lower.contains("section")
            || lower.contains("chapter")
            || lower.contains("provision")
        {
            PolicySection::MainProvisions
        } else {
            PolicySection::Other
        }
    }

    fn as_str(&self) -> &'static str {
        match self {
            PolicySection::Preamble => "preamble",
            PolicySection::Definitions => "definitions",
            PolicySection::MainProvisions => "main_provisions",
            PolicySection::Enforcement => "enforcement",
            PolicySection::Amendments => "amendments",
            PolicySection::Annexes => "annexes",
            PolicySection::Schedules => "schedules",
            PolicySection::Tables => "tables",
            PolicySection::Other => "other",
        }
    }
}

fn legal_reference_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)\b(article|section|chapter|annex|schedule)\s+[0-9]+[a-z]?\b").unwrap()
    })
}

fn extract_legal_references(text: &str) -> Vec<String> {
    legal_reference_regex()
        .find_iter(text)
        .map(|m| m.as_str().to_string())
        .collect()
}

pub struct PolicyChunker;

const POLICY_MIN_CHARS: usize = 100;
const POLICY_MAX_CHARS: usize = 1000;

impl Chunker for PolicyChunker {
    fn chunk(
        &self,
        elements: &[Element],
        document_id: DocumentId,
        document_key: &DocumentKey,
    ) -> ChunkingOutcome {
        let mut outcome = ChunkingOutcome::default();
        if elements.is_empty() {
            outcome.warnings.push("no elements to chunk".to_string());
            return outcome;
        }

        let groups = group_by_titles(elements, |title| PolicySection::from_title(title).as_str().to_string());
        let splitter = RecursiveSplitter::new(512, 0.15);

        // First pass: split per-section, tagging a hierarchical marker.
        let mut raw_pieces: Vec<(String, String)> = Vec::new();
        for (label, group_elements) in groups {
            let text = concatenate_narrative(&group_elements);
            if text.trim().is_empty() {
                continue;
            }
            for piece in splitter.split(&text) {
                raw_pieces.push((label.clone(), piece));
            }
        }

        // Merge-up pass: stitch consecutive same-section pieces under the
        // minimum size bound.
        let mut merged: Vec<(String, String)> = Vec::new();
        for (label, piece) in raw_pieces {
            if let Some((last_label, last_text)) = merged.last_mut() {
                if *last_label == label && last_text.len() < POLICY_MIN_CHARS {
                    last_text.push_str("\n\n");
                    last_text.push_str(&piece);
                    continue;
                }
            }
            merged.push((label, piece));
        }

        // Split-down pass: hard-enforce the upper bound.
        let mut index = 0;
        for (label, text) in merged {
            let split_parts: Vec<String> = if text.len() > POLICY_MAX_CHARS {
                text.chars()
                    .collect::<Vec<_>>()
                    .chunks(POLICY_MAX_CHARS)
                    .map(|c| c.iter().collect())
                    .collect()
            } else {
                vec![text]
            };

            for part in split_parts {
                let legal_refs = extract_legal_references(&part);
                let metadata = ChunkMetadata {
                    strategy: Some(ChunkingStrategy::PolicyHierarchical),
                    section_type: Some(label.clone()),
                    legal_references: legal_refs,
                    ..Default::default()
                };
                outcome.chunks.push(new_chunk(
                    document_id,
                    document_key,
                    Bucket::Policy,
                    index,
                    part,
                    metadata,
                ));
                index += 1;
            }
        }

        outcome
    }
}

// ---------------------------------------------------------------------
// Scientific data: aggressive small-chunking for tables.
// ---------------------------------------------------------------------

pub struct ScientificDataChunker {
    pub hard_cap: usize,
}

impl Default for ScientificDataChunker {
    fn default() -> Self {
        Self { hard_cap: 950 }
    }
}

const TABLE_SPLIT_THRESHOLD: usize = 800;
const TABLE_MAX_ROWS_PER_CHUNK: usize = 5;

/// Split an oversized table's text into row groups, replicating the header.
/// Falls back to a character split if no row structure is detectable.
fn split_table(text: &str) -> Vec<(String, bool)> {
    let lines: Vec<&str> = text.lines().collect();
    if lines.len() < 2 {
        return vec![(text.to_string(), false)];
    }
    let header = lines[0];
    let rows = &lines[1..];
    if rows.is_empty() {
        return vec![(text.to_string(), false)];
    }

    rows.chunks(TABLE_MAX_ROWS_PER_CHUNK)
        .map(|group| {
            let mut out = String::from(header);
            for row in group {
                out.push('\n');
                out.push_str(row);
            }
            (out, true)
        })
        .collect()
}

impl Chunker for ScientificDataChunker {
    fn chunk(
        &self,
        elements: &[Element],
        document_id: DocumentId,
        document_key: &DocumentKey,
    ) -> ChunkingOutcome {
        let mut outcome = ChunkingOutcome::default();
        if elements.is_empty() {
            outcome.warnings.push("no elements to chunk".to_string());
            return outcome;
        }

        let mut index = 0;
        for element in elements {
            if element.element_type == ElementType::Table && element.text.len() > TABLE_SPLIT_THRESHOLD {
                let row_split = split_table(&element.text);
                for (piece, was_row_split) in row_split {
                    for (final_text, lineage) in emergency_split(&piece, self.hard_cap, "table_row_group_oversize") {
                        let mut metadata = ChunkMetadata {
                            strategy: Some(ChunkingStrategy::ScientificSmallTable),
                            section_type: Some("table".to_string()),
                            split_lineage: lineage,
                            ..Default::default()
                        };
                        if !was_row_split {
                            metadata.split_lineage.push("character_fallback_split".to_string());
                        }
                        outcome.chunks.push(new_chunk(
                            document_id,
                            document_key,
                            Bucket::ScientificData,
                            index,
                            final_text,
                            metadata,
                        ));
                        index += 1;
                    }
                }
            } else {
                for (final_text, lineage) in emergency_split(&element.text, self.hard_cap, "element_oversize") {
                    let section_type = match element.element_type {
                        ElementType::Table => "table",
                        ElementType::Title => "title",
                        _ => "narrative",
                    };
                    let metadata = ChunkMetadata {
                        strategy: Some(ChunkingStrategy::ScientificSmallTable),
                        section_type: Some(section_type.to_string()),
                        split_lineage: lineage,
                        ..Default::default()
                    };
                    if final_text.trim().is_empty() {
                        continue;
                    }
                    outcome.chunks.push(new_chunk(
                        document_id,
                        document_key,
                        Bucket::ScientificData,
                        index,
                        final_text,
                        metadata,
                    ));
                    index += 1;
                }
            }
        }

        outcome
    }
}

// ---------------------------------------------------------------------
// News: standard recursive splitter. Excel row expansion is the
// orchestrator's job, not the chunker's (§4.2).
// ---------------------------------------------------------------------

pub struct NewsChunker;

impl Chunker for NewsChunker {
    fn chunk(
        &self,
        elements: &[Element],
        document_id: DocumentId,
        document_key: &DocumentKey,
    ) -> ChunkingOutcome {
        let mut outcome = ChunkingOutcome::default();
        let text = concatenate_narrative(elements);
        if text.trim().is_empty() {
            outcome.warnings.push("no elements to chunk".to_string());
            return outcome;
        }

        let splitter = RecursiveSplitter::new(512, 0.15);
        for (index, piece) in splitter.split(&text).into_iter().enumerate() {
            let metadata = ChunkMetadata {
                strategy: Some(ChunkingStrategy::RecursiveText),
                ..Default::default()
            };
            outcome.chunks.push(new_chunk(
                document_id,
                document_key,
                Bucket::News,
                index,
                piece,
                metadata,
            ));
        }
        outcome
    }
}

/// Closed-variant dispatch by bucket (§9).
pub fn chunker_for_bucket(bucket: Bucket) -> Box<dyn Chunker> {
    match bucket {
        Bucket::ResearchPapers => Box::new(ResearchPapersChunker),
        Bucket::Policy => Box::new(PolicyChunker),
        Bucket::ScientificData => Box::new(ScientificDataChunker::default()),
        Bucket::News => Box::new(NewsChunker),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use copilot_core::DocumentKey;

    fn elements(pairs: &[(ElementType, &str)]) -> Vec<Element> {
        pairs.iter().map(|(t, text)| Element::new(*t, *text)).collect()
    }

    #[test]
    fn empty_elements_yield_empty_chunks_never_fail() {
        let doc_id = DocumentId::new();
        let key = DocumentKey::for_bucket(Bucket::News, "x.txt");
        for bucket in Bucket::ALL {
            let chunker = chunker_for_bucket(bucket);
            let outcome = chunker.chunk(&[], doc_id, &key);
            assert!(outcome.chunks.is_empty());
            assert!(!outcome.warnings.is_empty());
        }
    }

    #[test]
    fn research_paper_excludes_references_section() {
        let els = elements(&[
            (ElementType::Title, "Abstract"),
            (ElementType::NarrativeText, "This paper studies climate tipping points in detail across many pages of content that is long enough to be chunked multiple times over and over with plenty of words."),
            (ElementType::Title, "References"),
            (ElementType::NarrativeText, "Smith et al. 2020. Some Journal."),
        ]);
        let doc_id = DocumentId::new();
        let key = DocumentKey::for_bucket(Bucket::ResearchPapers, "paper.pdf");
        let outcome = ResearchPapersChunker.chunk(&els, doc_id, &key);

        assert!(outcome.excluded_reference_elements > 0);
        assert!(outcome
            .chunks
            .iter()
            .all(|c| c.metadata.section_type.as_deref() != Some("references")));
    }

    #[test]
    fn policy_chunks_stay_within_bounds_and_tag_legal_refs() {
        let long_text = "Article 5 establishes emissions limits. ".repeat(60);
        let els = elements(&[(ElementType::Title, "Main Provisions"), (ElementType::NarrativeText, &long_text)]);
        let doc_id = DocumentId::new();
        let key = DocumentKey::for_bucket(Bucket::Policy, "law.pdf");
        let outcome = PolicyChunker.chunk(&els, doc_id, &key);

        assert!(!outcome.chunks.is_empty());
        for chunk in &outcome.chunks {
            assert!(chunk.text.len() <= POLICY_MAX_CHARS);
        }
        assert!(outcome.chunks.iter().any(|c| !c.metadata.legal_references.is_empty()));
    }

    #[test]
    fn scientific_data_respects_hard_cap_with_tolerance() {
        let big_table = format!("h1,h2\n{}", "1,2\n".repeat(400));
        let els = elements(&[(ElementType::Table, &big_table)]);
        let doc_id = DocumentId::new();
        let key = DocumentKey::for_bucket(Bucket::ScientificData, "data.csv");
        let outcome = ScientificDataChunker::default().chunk(&els, doc_id, &key);

        assert!(!outcome.chunks.is_empty());
        for chunk in &outcome.chunks {
            assert!(chunk.text.chars().count() as f32 <= 950.0 * 1.02);
        }
    }

    #[test]
    fn news_chunker_uses_recursive_splitter() {
        let text = "Paragraph one about climate news.\n\nParagraph two with further detail and context about the same event.".repeat(3);
        let els = elements(&[(ElementType::NarrativeText, &text)]);
        let doc_id = DocumentId::new();
        let key = DocumentKey::for_bucket(Bucket::News, "https://example.com/a");
        let outcome = NewsChunker.chunk(&els, doc_id, &key);
        assert!(!outcome.chunks.is_empty());
    }
}
