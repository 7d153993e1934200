//! NLP-specific error types.

use thiserror::Error;

/// Errors raised by the Query Classifier (§4.11) and Response Generator (§4.13).
#[derive(Error, Debug)]
pub enum NlpError {
    #[error("corpus load error: {0}")]
    Corpus(String),

    #[error("LLM call failed: {0}")]
    LlmUnavailable(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl NlpError {
    pub fn corpus(msg: impl Into<String>) -> Self {
        Self::Corpus(msg.into())
    }

    pub fn llm_unavailable(msg: impl Into<String>) -> Self {
        Self::LlmUnavailable(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
}

/// Result type for NLP operations.
pub type Result<T> = std::result::Result<T, NlpError>;

impl From<NlpError> for copilot_core::StageError {
    fn from(err: NlpError) -> Self {
        match err {
            NlpError::Corpus(msg) => {
                copilot_core::StageError::new(copilot_core::StageErrorKind::Input, msg)
            }
            NlpError::LlmUnavailable(msg) => {
                copilot_core::StageError::new(copilot_core::StageErrorKind::ExternalUnavailable, msg)
            }
            NlpError::Internal(msg) => {
                copilot_core::StageError::new(copilot_core::StageErrorKind::Data, msg)
            }
        }
    }
}
