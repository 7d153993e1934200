//! Conversation memory (§3 "Session") and reference resolution (§4.12's
//! "Start"/"Continue" sub-paths) for the Query Orchestrator.

pub mod error;
pub mod resolution;
pub mod session;

pub use error::{ConversationError, Result};
pub use resolution::{IdentityRewriter, QueryRewriterLlm, ReferenceResolver};
pub use session::{InMemorySessionStore, SessionStore, DEFAULT_MAX_MESSAGES};
