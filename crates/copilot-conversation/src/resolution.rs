//! Reference resolution (§4.12 "Start" / "Continue" sub-paths). `Start`
//! (first turn) applies LLM-driven basic grammar fixes only; `Continue`
//! (subsequent turns) applies full LLM-driven rewriting, including
//! pronoun/reference resolution, using the last `recent_messages_k`
//! conversation messages as context.

use async_trait::async_trait;
use copilot_core::Message;
use tracing::warn;

use crate::Result;

#[async_trait]
pub trait QueryRewriterLlm: Send + Sync {
    /// Start-turn grammar fix: no conversation context needed.
    async fn fix_grammar(&self, query: &str) -> Result<String>;

    /// Continue-turn full rewrite: resolves pronouns/references against the
    /// given recent messages (oldest first).
    async fn rewrite_with_context(&self, query: &str, recent_messages: &[Message]) -> Result<String>;
}

/// Identity stand-in: returns the query unchanged. Used for tests and when
/// no LLM backend is configured — degradation here is silent because an
/// unresolved query still reaches retrieval, just with lower recall.
pub struct IdentityRewriter;

#[async_trait]
impl QueryRewriterLlm for IdentityRewriter {
    async fn fix_grammar(&self, query: &str) -> Result<String> {
        Ok(query.to_string())
    }

    async fn rewrite_with_context(&self, query: &str, _recent_messages: &[Message]) -> Result<String> {
        Ok(query.to_string())
    }
}

pub struct ReferenceResolver<L: QueryRewriterLlm> {
    llm: L,
    recent_messages_k: usize,
}

impl<L: QueryRewriterLlm> ReferenceResolver<L> {
    pub fn new(llm: L, recent_messages_k: usize) -> Self {
        Self { llm, recent_messages_k }
    }

    /// Resolves `query` for a `start` turn: grammar fix only, no context.
    pub async fn resolve_start(&self, query: &str) -> String {
        match self.llm.fix_grammar(query).await {
            Ok(fixed) if !fixed.trim().is_empty() => fixed,
            Ok(_) => query.to_string(),
            Err(err) => {
                warn!(error = %err, "grammar-fix LLM call failed; using raw query");
                query.to_string()
            }
        }
    }

    /// Resolves `query` for a `continue` turn: full rewrite using the last
    /// `recent_messages_k` messages from `all_messages`.
    pub async fn resolve_continue(&self, query: &str, all_messages: &[Message]) -> String {
        let k = self.recent_messages_k.min(all_messages.len());
        let recent = &all_messages[all_messages.len() - k..];

        match self.llm.rewrite_with_context(query, recent).await {
            Ok(rewritten) if !rewritten.trim().is_empty() => rewritten,
            Ok(_) => query.to_string(),
            Err(err) => {
                warn!(error = %err, "reference-resolution LLM call failed; using raw query");
                query.to_string()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn start_turn_uses_grammar_fix_only() {
        let resolver = ReferenceResolver::new(IdentityRewriter, 6);
        let resolved = resolver.resolve_start("how cbam work").await;
        assert_eq!(resolved, "how cbam work");
    }

    #[tokio::test]
    async fn continue_turn_caps_context_at_k_messages() {
        let resolver = ReferenceResolver::new(IdentityRewriter, 2);
        let messages: Vec<Message> = (0..10).map(|i| Message::user(format!("msg {i}"))).collect();
        let resolved = resolver.resolve_continue("what about it", &messages).await;
        assert_eq!(resolved, "what about it");
    }

    struct RecordingRewriter;

    #[async_trait]
    impl QueryRewriterLlm for RecordingRewriter {
        async fn fix_grammar(&self, query: &str) -> Result<String> {
            Ok(format!("fixed: {query}"))
        }

        async fn rewrite_with_context(&self, query: &str, recent_messages: &[Message]) -> Result<String> {
            Ok(format!("rewritten ({} ctx msgs): {query}", recent_messages.len()))
        }
    }

    #[tokio::test]
    async fn continue_turn_passes_only_the_last_k_messages() {
        let resolver = ReferenceResolver::new(RecordingRewriter, 3);
        let messages: Vec<Message> = (0..10).map(|i| Message::user(format!("msg {i}"))).collect();
        let resolved = resolver.resolve_continue("what about it", &messages).await;
        assert_eq!(resolved, "rewritten (3 ctx msgs): what about it");
    }
}
