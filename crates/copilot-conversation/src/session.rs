//! Session store (§3 "Session", §6 "conversational session store's wire
//! protocol (treated as a keyed record store with TTL)"). The wire protocol
//! itself is out of scope; this crate only needs the logical contract: get
//! by id, append a message with per-session serialization, and expire idle
//! sessions after a TTL.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use copilot_core::{Message, Session, SessionId, UserId};
use parking_lot::Mutex;
use tracing::debug;

use crate::{ConversationError, Result};

/// Default bound on messages kept per session (§3 "bounded history").
pub const DEFAULT_MAX_MESSAGES: usize = 50;

#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn get(&self, id: SessionId) -> Result<Option<Session>>;
    async fn create(&self, user_id: UserId, language: &str) -> Result<Session>;
    /// Appends a message and returns the updated session. Per-session
    /// serialization is the only in-process locking the store does (§5
    /// "Shared-resource policy": "no in-process locking beyond per-session
    /// serialization of message appends").
    async fn append_message(&self, id: SessionId, message: Message) -> Result<Session>;
    /// Removes sessions whose `last_activity_at` is older than `ttl`.
    async fn expire_idle(&self, ttl: Duration) -> Result<usize>;
}

struct SessionRecord {
    session: Session,
    lock: Arc<tokio::sync::Mutex<()>>,
}

/// An in-memory stand-in for the external session store. Keyed record store
/// with TTL, as specced; a real deployment swaps this for whatever backs
/// the actual session service (§6).
#[derive(Default)]
pub struct InMemorySessionStore {
    sessions: Mutex<HashMap<SessionId, SessionRecord>>,
    max_messages: usize,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self { sessions: Mutex::new(HashMap::new()), max_messages: DEFAULT_MAX_MESSAGES }
    }

    pub fn with_max_messages(max_messages: usize) -> Self {
        Self { sessions: Mutex::new(HashMap::new()), max_messages }
    }

    fn per_session_lock(&self, id: SessionId) -> Arc<tokio::sync::Mutex<()>> {
        let mut sessions = self.sessions.lock();
        sessions
            .get(&id)
            .map(|r| r.lock.clone())
            .unwrap_or_else(|| Arc::new(tokio::sync::Mutex::new(())))
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn get(&self, id: SessionId) -> Result<Option<Session>> {
        Ok(self.sessions.lock().get(&id).map(|r| r.session.clone()))
    }

    async fn create(&self, user_id: UserId, language: &str) -> Result<Session> {
        let session = Session::new(user_id, language);
        let mut sessions = self.sessions.lock();
        sessions.insert(
            session.id,
            SessionRecord { session: session.clone(), lock: Arc::new(tokio::sync::Mutex::new(())) },
        );
        Ok(session)
    }

    async fn append_message(&self, id: SessionId, message: Message) -> Result<Session> {
        let lock = self.per_session_lock(id);
        let _guard = lock.lock().await;

        let mut sessions = self.sessions.lock();
        let record = sessions
            .get_mut(&id)
            .ok_or_else(|| ConversationError::SessionNotFound(id.to_string()))?;

        record.session.messages.push(message);
        if record.session.messages.len() > self.max_messages {
            let overflow = record.session.messages.len() - self.max_messages;
            record.session.messages.drain(0..overflow);
        }
        record.session.updated_at = Utc::now();
        record.session.last_activity_at = Utc::now();
        Ok(record.session.clone())
    }

    async fn expire_idle(&self, ttl: Duration) -> Result<usize> {
        let cutoff = Utc::now() - chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::zero());
        let mut sessions = self.sessions.lock();
        let before = sessions.len();
        sessions.retain(|_, r| r.session.last_activity_at >= cutoff);
        let removed = before - sessions.len();
        if removed > 0 {
            debug!(removed, "expired idle sessions");
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn append_message_updates_activity_and_bounds_history() {
        let store = InMemorySessionStore::with_max_messages(2);
        let session = store.create(UserId::new(), "en").await.unwrap();

        store.append_message(session.id, Message::user("first")).await.unwrap();
        store.append_message(session.id, Message::user("second")).await.unwrap();
        let updated = store.append_message(session.id, Message::user("third")).await.unwrap();

        assert_eq!(updated.messages.len(), 2);
        assert_eq!(updated.messages[0].content, "second");
        assert_eq!(updated.messages[1].content, "third");
    }

    #[tokio::test]
    async fn first_message_is_a_start_conversation() {
        let store = InMemorySessionStore::new();
        let session = store.create(UserId::new(), "en").await.unwrap();
        assert_eq!(session.conversation_type(), copilot_core::ConversationType::Start);
    }

    #[tokio::test]
    async fn second_turn_is_a_continue_conversation() {
        let store = InMemorySessionStore::new();
        let session = store.create(UserId::new(), "en").await.unwrap();
        let updated = store.append_message(session.id, Message::user("hi")).await.unwrap();
        assert_eq!(updated.conversation_type(), copilot_core::ConversationType::Continue);
    }

    #[tokio::test]
    async fn expire_idle_removes_stale_sessions() {
        let store = InMemorySessionStore::new();
        let session = store.create(UserId::new(), "en").await.unwrap();
        {
            let mut sessions = store.sessions.lock();
            let record = sessions.get_mut(&session.id).unwrap();
            record.session.last_activity_at = Utc::now() - chrono::Duration::hours(2);
        }
        let removed = store.expire_idle(Duration::from_secs(3600)).await.unwrap();
        assert_eq!(removed, 1);
        assert!(store.get(session.id).await.unwrap().is_none());
    }
}
