//! Conversation-crate error types.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConversationError {
    #[error("session not found: {0}")]
    SessionNotFound(String),

    #[error("session store error: {0}")]
    Store(String),

    #[error("LLM call failed: {0}")]
    LlmUnavailable(String),
}

pub type Result<T> = std::result::Result<T, ConversationError>;

impl From<ConversationError> for copilot_core::StageError {
    fn from(err: ConversationError) -> Self {
        match err {
            ConversationError::SessionNotFound(msg) => {
                copilot_core::StageError::new(copilot_core::StageErrorKind::NotFound, msg)
            }
            ConversationError::Store(msg) => {
                copilot_core::StageError::new(copilot_core::StageErrorKind::ExternalUnavailable, msg)
            }
            ConversationError::LlmUnavailable(msg) => {
                copilot_core::StageError::new(copilot_core::StageErrorKind::ExternalUnavailable, msg)
            }
        }
    }
}
