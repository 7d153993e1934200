//! Shared error vocabulary (§7 of the spec).
//!
//! Every stage in the ingestion and retrieval paths converts its failures
//! into a [`StageError`] carrying a [`StageErrorKind`] plus a human-readable
//! message and retry advice. Per-crate error enums (`IngestionError`,
//! `ContextError`, ...) wrap or convert into this where they cross a
//! component boundary that the orchestrators fold over.

use serde::{Deserialize, Serialize};

/// The error kinds named in §7.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageErrorKind {
    /// Malformed request, unknown bucket, zero enabled stages.
    Input,
    /// Unknown document, task, or session.
    NotFound,
    /// Vector store, graph store, LLM, embedder, or tipping-point service unreachable.
    ExternalUnavailable,
    /// Per-call or end-to-end deadline exceeded.
    Timeout,
    /// LLM response delimiters malformed; never raised, only recorded.
    Parse,
    /// Dimension mismatch in embeddings, malformed columnar data.
    Data,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryAdvice {
    /// Retrying immediately is unlikely to help (bad input, not found).
    DoNotRetry,
    /// The caller may retry, ideally with backoff.
    Retryable,
}

#[derive(Debug, Clone, thiserror::Error, Serialize, Deserialize)]
#[error("{kind:?}: {message}")]
pub struct StageError {
    pub kind: StageErrorKind,
    pub message: String,
    #[serde(skip, default = "default_retry_advice")]
    retryable: bool,
}

fn default_retry_advice() -> bool {
    false
}

impl StageError {
    pub fn new(kind: StageErrorKind, message: impl Into<String>) -> Self {
        let retryable = matches!(
            kind,
            StageErrorKind::ExternalUnavailable | StageErrorKind::Timeout
        );
        Self {
            kind,
            message: message.into(),
            retryable,
        }
    }

    pub fn input(message: impl Into<String>) -> Self {
        Self::new(StageErrorKind::Input, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StageErrorKind::NotFound, message)
    }

    pub fn external_unavailable(message: impl Into<String>) -> Self {
        Self::new(StageErrorKind::ExternalUnavailable, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(StageErrorKind::Timeout, message)
    }

    pub fn parse(message: impl Into<String>) -> Self {
        Self::new(StageErrorKind::Parse, message)
    }

    pub fn data(message: impl Into<String>) -> Self {
        Self::new(StageErrorKind::Data, message)
    }

    pub fn retry_advice(&self) -> RetryAdvice {
        if self.retryable {
            RetryAdvice::Retryable
        } else {
            RetryAdvice::DoNotRetry
        }
    }
}

/// The status of one stage's execution, as reported in the ingestion
/// response body (§7 "Ingestion: {overall_status, results: {stage: {...}}}").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Success,
    PartialSuccess,
    Failed,
    Skipped,
}

/// Per-stage result folded into the overall ingestion result (§9: "Collecting
/// per-stage results into an overall ingestion result is a fold").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageOutcome {
    pub status: StageStatus,
    pub message: Option<String>,
    pub counts: std::collections::HashMap<String, usize>,
}

impl StageOutcome {
    pub fn success() -> Self {
        Self {
            status: StageStatus::Success,
            message: None,
            counts: Default::default(),
        }
    }

    pub fn skipped(message: impl Into<String>) -> Self {
        Self {
            status: StageStatus::Skipped,
            message: Some(message.into()),
            counts: Default::default(),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            status: StageStatus::Failed,
            message: Some(message.into()),
            counts: Default::default(),
        }
    }

    pub fn partial_success(message: impl Into<String>) -> Self {
        Self {
            status: StageStatus::PartialSuccess,
            message: Some(message.into()),
            counts: Default::default(),
        }
    }

    pub fn with_count(mut self, key: impl Into<String>, value: usize) -> Self {
        self.counts.insert(key.into(), value);
        self
    }
}

/// Overall status for a multi-stage ingestion result, folded from the
/// per-stage outcomes: any failure without a success demotes the whole to
/// `failed`; a mix of success and failure/skip demotes to `partial_success`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverallStatus {
    Success,
    PartialSuccess,
    Failed,
}

pub fn fold_overall_status<'a>(outcomes: impl IntoIterator<Item = &'a StageOutcome>) -> OverallStatus {
    let mut saw_success = false;
    let mut saw_failure = false;
    let mut any = false;

    for outcome in outcomes {
        any = true;
        match outcome.status {
            StageStatus::Success => saw_success = true,
            StageStatus::Failed => saw_failure = true,
            StageStatus::PartialSuccess => {
                saw_success = true;
                saw_failure = true;
            }
            StageStatus::Skipped => {}
        }
    }

    if !any {
        return OverallStatus::Failed;
    }
    match (saw_success, saw_failure) {
        (true, false) => OverallStatus::Success,
        (true, true) => OverallStatus::PartialSuccess,
        (false, _) => OverallStatus::Failed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn external_unavailable_is_retryable() {
        let err = StageError::external_unavailable("vector store down");
        assert_eq!(err.retry_advice(), RetryAdvice::Retryable);
    }

    #[test]
    fn input_error_is_not_retryable() {
        let err = StageError::input("zero stages enabled");
        assert_eq!(err.retry_advice(), RetryAdvice::DoNotRetry);
    }

    #[test]
    fn fold_all_success_is_success() {
        let outcomes = vec![StageOutcome::success(), StageOutcome::success()];
        assert_eq!(fold_overall_status(&outcomes), OverallStatus::Success);
    }

    #[test]
    fn fold_mixed_is_partial_success() {
        let outcomes = vec![StageOutcome::success(), StageOutcome::failed("boom")];
        assert_eq!(fold_overall_status(&outcomes), OverallStatus::PartialSuccess);
    }

    #[test]
    fn fold_all_failed_is_failed() {
        let outcomes = vec![StageOutcome::failed("a"), StageOutcome::failed("b")];
        assert_eq!(fold_overall_status(&outcomes), OverallStatus::Failed);
    }

    #[test]
    fn fold_empty_is_failed() {
        let outcomes: Vec<StageOutcome> = vec![];
        assert_eq!(fold_overall_status(&outcomes), OverallStatus::Failed);
    }

    #[test]
    fn fold_all_skipped_is_failed() {
        let outcomes = vec![StageOutcome::skipped("disabled"), StageOutcome::skipped("disabled")];
        assert_eq!(fold_overall_status(&outcomes), OverallStatus::Failed);
    }
}
