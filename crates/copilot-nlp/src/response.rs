//! The Response Generator & Parser (§4.13). Given a prompt and a deadline,
//! calls the LLM once and parses the delimited output into (title?,
//! content). The parser is a chain of pure strategies — marker pairs, the
//! "smart" non-keyword marker scan, tag pairs, then a raw heuristic — the
//! first `Some` wins, and a terminal default makes the chain total: it
//! never panics and never returns empty content (§9, invariant 7 of §8).

use std::time::Duration;

use async_trait::async_trait;
use tracing::warn;

use crate::Result;

/// Parser strategy names reserved so the "smart" scan (step 2) doesn't
/// mistake a marker keyword for a title candidate.
const RESERVED_MARKERS: &[&str] = &["TITLE_START", "TITLE_END", "CONTENT_START", "CONTENT_END"];
const DEFAULT_TITLE: &str = "Climate Document Assistant Response";

#[async_trait]
pub trait ResponseLlm: Send + Sync {
    /// Calls the LLM with `prompt`, giving up once `deadline` elapses.
    async fn complete(&self, prompt: &str, deadline: Duration) -> Result<String>;
}

/// Deterministic stand-in: echoes the prompt's last paragraph as content
/// with no title, wrapped in the primary delimiter format. Used for tests
/// and for running with no LLM backend configured.
pub struct EchoResponseLlm;

#[async_trait]
impl ResponseLlm for EchoResponseLlm {
    async fn complete(&self, prompt: &str, _deadline: Duration) -> Result<String> {
        let body = prompt.split("\n\n").last().unwrap_or(prompt).trim();
        Ok(format!("===CONTENT_START===\n{body}\n===CONTENT_END==="))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedResponse {
    pub title: String,
    pub content: String,
    /// True when no clean delimiter pair was found and the raw heuristic
    /// or default had to run (§4.13 step 6 / §7 ParseError policy).
    pub used_fallback: bool,
}

/// Whether a conversation turn expects a generated title (§4.12/glossary:
/// `start` generates a title, `continue` always has an empty one).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TitleExpectation {
    Expected,
    AlwaysEmpty,
}

pub struct ResponseGenerator<L: ResponseLlm> {
    llm: L,
}

impl<L: ResponseLlm> ResponseGenerator<L> {
    pub fn new(llm: L) -> Self {
        Self { llm }
    }

    /// Generates and parses one response (§4.13 contract: prompt + deadline
    /// -> (title?, content)).
    pub async fn generate(&self, prompt: &str, deadline: Duration, title_expectation: TitleExpectation) -> ParsedResponse {
        let raw = match self.llm.complete(prompt, deadline).await {
            Ok(raw) => raw,
            Err(err) => {
                warn!(error = %err, "response LLM call failed; returning default response");
                return default_response();
            }
        };
        let mut parsed = parse_response(&raw);
        if title_expectation == TitleExpectation::AlwaysEmpty {
            parsed.title.clear();
        }
        parsed
    }
}

fn default_response() -> ParsedResponse {
    ParsedResponse {
        title: DEFAULT_TITLE.to_string(),
        content: "I wasn't able to generate a response right now. Please try again.".to_string(),
        used_fallback: true,
    }
}

/// The total parser: tries each strategy in order, first `Some` wins, and
/// falls back to a non-empty default so the contract in §8 property 7
/// ("the parser is total") always holds.
pub fn parse_response(raw: &str) -> ParsedResponse {
    if let Some(parsed) = marker_pairs(raw) {
        return finalize(parsed, false);
    }
    if let Some(parsed) = smart_non_keyword_markers(raw) {
        return finalize(parsed, true);
    }
    if let Some(parsed) = tag_pairs(raw) {
        return finalize(parsed, false);
    }
    if let Some(parsed) = raw_heuristic(raw) {
        return finalize(parsed, true);
    }
    default_response()
}

fn finalize(mut parsed: (String, String), used_fallback: bool) -> ParsedResponse {
    parsed.0 = clean_field(&parsed.0);
    parsed.1 = clean_field(&parsed.1);
    parsed.1 = collapse_blank_runs(&parsed.1);

    let title_too_short = parsed.0.chars().count() < 3;
    let title_has_marker = RESERVED_MARKERS.iter().any(|m| parsed.0.to_ascii_uppercase().contains(m));
    let title = if parsed.0.is_empty() || title_too_short || title_has_marker {
        DEFAULT_TITLE.to_string()
    } else {
        parsed.0
    };

    let content = if parsed.1.is_empty() {
        "I don't have enough information to answer that right now.".to_string()
    } else {
        parsed.1
    };

    ParsedResponse { title, content, used_fallback }
}

/// Strategy 1: `===TITLE_START===.../===TITLE_END===` +
/// `===CONTENT_START===.../===CONTENT_END===` (§4.13 step 1).
fn marker_pairs(raw: &str) -> Option<(String, String)> {
    let content = extract_between(raw, "===CONTENT_START===", "===CONTENT_END===")?;
    let title = extract_between(raw, "===TITLE_START===", "===TITLE_END===").unwrap_or_default();
    Some((title, content))
}

/// Strategy 2: only content markers are present; scan the first 10
/// non-empty lines for a `===...===`-wrapped string that isn't one of the
/// reserved marker keywords, and treat the first such match as the title
/// (§4.13 step 2).
fn smart_non_keyword_markers(raw: &str) -> Option<(String, String)> {
    let content = extract_between(raw, "===CONTENT_START===", "===CONTENT_END===")?;

    let non_empty_lines: Vec<&str> = raw.lines().map(str::trim).filter(|l| !l.is_empty()).take(10).collect();

    let marker_index = non_empty_lines.iter().position(|line| {
        line.strip_prefix("===")
            .and_then(|s| s.strip_suffix("==="))
            .map(|inner| !RESERVED_MARKERS.iter().any(|m| inner.to_ascii_uppercase() == *m))
            .unwrap_or(false)
    });

    // The marker line (e.g. `===Title===`) labels the *next* non-empty line
    // as the title value; a marker wrapping the title text itself (e.g.
    // `===My Title===`) is used directly when nothing useful follows.
    let title = marker_index
        .and_then(|i| non_empty_lines.get(i + 1).copied())
        .filter(|next| !next.starts_with("==="))
        .map(str::to_string)
        .or_else(|| {
            marker_index.map(|i| {
                non_empty_lines[i].trim_matches('=').trim().to_string()
            })
        })
        .unwrap_or_default();

    Some((title, content))
}

/// Strategy 3: `<TITLE>...</TITLE>` / `<CONTENT>...</CONTENT>`,
/// case-insensitive (§4.13 step 3).
fn tag_pairs(raw: &str) -> Option<(String, String)> {
    let content = extract_between_ci(raw, "<content>", "</content>")?;
    let title = extract_between_ci(raw, "<title>", "</title>").unwrap_or_default();
    Some((title, content))
}

/// Strategy 4: no delimiters at all. Title is the first 3-12 word,
/// >=50%-capitalized line; content is the remainder (§4.13 step 4).
fn raw_heuristic(raw: &str) -> Option<(String, String)> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }

    let mut lines = trimmed.lines();
    let mut title = String::new();
    let mut consumed_first_line = false;

    if let Some(first) = lines.clone().next() {
        let words: Vec<&str> = first.split_whitespace().collect();
        if (3..=12).contains(&words.len()) {
            let capitalized = words
                .iter()
                .filter(|w| w.chars().next().map(|c| c.is_uppercase()).unwrap_or(false))
                .count();
            if capitalized * 2 >= words.len() {
                title = first.trim().to_string();
                consumed_first_line = true;
            }
        }
    }

    let content = if consumed_first_line {
        lines.skip(1).collect::<Vec<_>>().join("\n")
    } else {
        trimmed.to_string()
    };

    Some((title, content))
}

fn extract_between(raw: &str, start: &str, end: &str) -> Option<String> {
    let start_idx = raw.find(start)? + start.len();
    let end_idx = raw[start_idx..].find(end)? + start_idx;
    Some(raw[start_idx..end_idx].trim().to_string())
}

fn extract_between_ci(raw: &str, start: &str, end: &str) -> Option<String> {
    let lower = raw.to_ascii_lowercase();
    let start_idx = lower.find(start)? + start.len();
    let end_idx = lower[start_idx..].find(end)? + start_idx;
    Some(raw[start_idx..end_idx].trim().to_string())
}

/// Strips marker/tag artifacts and wrapping quotes left over from a
/// strategy match (§4.13 step 5).
fn clean_field(field: &str) -> String {
    let mut cleaned = field.trim().to_string();
    for token in ["===TITLE_START===", "===TITLE_END===", "===CONTENT_START===", "===CONTENT_END==="] {
        cleaned = cleaned.replace(token, "");
    }
    let cleaned = cleaned.trim();
    let cleaned = cleaned
        .strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .unwrap_or(cleaned);
    let cleaned = cleaned
        .strip_prefix('\'')
        .and_then(|s| s.strip_suffix('\''))
        .unwrap_or(cleaned);
    cleaned.trim().to_string()
}

/// Collapses runs of 3+ blank lines down to 2, preserving paragraph breaks
/// (§4.13 step 5).
fn collapse_blank_runs(text: &str) -> String {
    let mut result = String::with_capacity(text.len());
    let mut blank_run = 0usize;
    for line in text.lines() {
        if line.trim().is_empty() {
            blank_run += 1;
            if blank_run <= 2 {
                result.push('\n');
            }
        } else {
            blank_run = 0;
            result.push_str(line);
            result.push('\n');
        }
    }
    result.trim_end().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn marker_pair_format_extracts_title_and_content() {
        let raw = "===TITLE_START===\nClimate Policy Overview\n===TITLE_END===\n===CONTENT_START===\nFirst paragraph.\n\nSecond paragraph.\n===CONTENT_END===";
        let parsed = parse_response(raw);
        assert_eq!(parsed.title, "Climate Policy Overview");
        assert!(parsed.content.contains("First paragraph."));
        assert!(parsed.content.contains("Second paragraph."));
        assert!(!parsed.used_fallback);
    }

    #[test]
    fn smart_marker_scan_extracts_non_keyword_title() {
        let raw = "===Title===\nSome Climate Topic\n===CONTENT_START===\nFirst paragraph.\n\nSecond paragraph.\n===CONTENT_END===";
        let parsed = parse_response(raw);
        assert_eq!(parsed.title, "Some Climate Topic");
        assert!(parsed.content.contains("First paragraph."));
        assert!(parsed.content.contains("\n\nSecond paragraph."));
        assert!(parsed.used_fallback);
    }

    #[test]
    fn tag_pair_format_is_case_insensitive() {
        let raw = "<Title>CBAM Explained</Title><Content>CBAM taxes embedded carbon.</Content>";
        let parsed = parse_response(raw);
        assert_eq!(parsed.title, "CBAM Explained");
        assert_eq!(parsed.content, "CBAM taxes embedded carbon.");
    }

    #[test]
    fn raw_heuristic_extracts_capitalized_title_line() {
        let raw = "Climate Policy Overview Today\nThis explains the policy in detail across several lines of content.";
        let parsed = parse_response(raw);
        assert_eq!(parsed.title, "Climate Policy Overview Today");
        assert!(parsed.content.starts_with("This explains"));
    }

    #[test]
    fn parser_never_panics_and_never_returns_empty_content() {
        for raw in ["", "   ", "\u{0}\u{1}garbage", "===TITLE_START===unterminated"] {
            let parsed = parse_response(raw);
            assert!(!parsed.content.is_empty());
        }
    }

    #[test]
    fn title_with_marker_keyword_is_replaced_with_default() {
        let parsed = finalize(("TITLE_END".to_string(), "body".to_string()), false);
        assert_eq!(parsed.title, DEFAULT_TITLE);
    }
}
