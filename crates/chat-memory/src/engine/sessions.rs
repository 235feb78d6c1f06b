//! Session operations and the current-session pointer.

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use super::{EngineState, MemoryEngine};
use crate::fallback::CURRENT_SESSION_KEY;
use crate::memory_db::{now_millis, time_derived_id, ChatSession, StoredMessage, DEFAULT_SESSION_TITLE};

impl MemoryEngine {
    /// The pointer lives in key-value storage so it survives restarts and a
    /// degraded primary.
    pub fn current_session_id(&self) -> Option<String> {
        match self.fallback.storage().get_item(CURRENT_SESSION_KEY) {
            Ok(id) => id.filter(|id| !id.is_empty()),
            Err(e) => {
                warn!("Failed to read current session pointer: {:#}", e);
                None
            }
        }
    }

    pub fn set_current_session(&self, session_id: &str) {
        if let Err(e) = self.fallback.storage().set_item(CURRENT_SESSION_KEY, session_id) {
            warn!("Failed to store current session pointer: {:#}", e);
        }
    }

    fn clear_current_session(&self) {
        if let Err(e) = self.fallback.storage().remove_item(CURRENT_SESSION_KEY) {
            warn!("Failed to clear current session pointer: {:#}", e);
        }
    }

    /// Creates a session and makes it current. An empty title falls back to
    /// the placeholder, which the first user message later replaces.
    pub async fn create_session(&self, title: Option<&str>) -> ChatSession {
        self.init().await;
        self.create_session_inner(title.map(str::to_string)).await
    }

    pub(super) async fn create_session_inner(&self, title: Option<String>) -> ChatSession {
        let now = now_millis();
        let session = ChatSession {
            id: time_derived_id("session"),
            title: title
                .map(|t| t.trim().to_string())
                .filter(|t| !t.is_empty())
                .unwrap_or_else(|| DEFAULT_SESSION_TITLE.to_string()),
            created_at: now,
            last_message_at: now,
            message_count: 0,
        };

        let record = session.clone();
        match self.run_primary("create_session", move |db| db.sessions.insert(&record)).await {
            Some(Err(e)) => warn!("{}; session {} gets its row with its first message", e, session.id),
            Some(Ok(())) => {}
            None => debug!("Session {} created without an embedded database", session.id),
        }

        self.set_current_session(&session.id);
        session
    }

    /// Makes sure the pointer names a session. A dangling pointer is replaced
    /// when the embedded database can prove the session is gone.
    pub(super) async fn ensure_current_session(&self) {
        if let Some(current) = self.current_session_id() {
            let lookup_id = current.clone();
            match self.run_primary("get_session", move |db| db.sessions.get(&lookup_id)).await {
                Some(Ok(None)) => info!("Current session {} no longer exists, starting a new one", current),
                _ => return,
            }
        }
        let session = self.create_session_inner(None).await;
        info!("Started session {}", session.id);
    }

    /// Most recently active first. Empty when degraded.
    pub async fn get_all_sessions(&self) -> Vec<ChatSession> {
        self.read_with_fallback("get_all_sessions", |db| db.sessions.all(), Vec::new).await
    }

    pub async fn get_session(&self, session_id: &str) -> Option<ChatSession> {
        let id = session_id.to_string();
        self.read_with_fallback("get_session", move |db| db.sessions.get(&id), || None).await
    }

    /// Messages of one session, ascending. `limit` keeps the newest ones.
    pub async fn get_session_messages(&self, session_id: &str, limit: Option<usize>) -> Vec<StoredMessage> {
        let id = session_id.to_string();
        self.read_with_fallback(
            "get_session_messages",
            move |db| db.messages.by_session(&id, limit),
            || self.fallback.session_messages(session_id),
        )
        .await
    }

    /// Bumps the count and last-activity time, and titles the session from
    /// its first user message. A session whose row is missing is recreated
    /// with the placeholder title first. No-op when degraded.
    pub async fn update_session(
        &self,
        session_id: &str,
        last_message_at: DateTime<Utc>,
        first_user_message: Option<&str>,
    ) -> Option<ChatSession> {
        self.init().await;
        self.update_session_inner(session_id, last_message_at, first_user_message.map(str::to_string))
            .await
    }

    pub(super) async fn update_session_inner(
        &self,
        session_id: &str,
        last_message_at: DateTime<Utc>,
        first_user_message: Option<String>,
    ) -> Option<ChatSession> {
        let id = session_id.to_string();
        match self
            .run_primary("update_session", move |db| {
                db.sessions.record_message(&id, last_message_at, first_user_message.as_deref())
            })
            .await
        {
            Some(Ok(session)) => Some(session),
            Some(Err(e)) => {
                warn!("{}", e);
                None
            }
            None => None,
        }
    }

    pub async fn rename_session(&self, session_id: &str, title: &str) -> bool {
        self.init().await;
        let id = session_id.to_string();
        let title = title.trim().to_string();
        match self.run_primary("rename_session", move |db| db.sessions.rename(&id, &title)).await {
            Some(Ok(renamed)) => renamed,
            Some(Err(e)) => {
                warn!("{}", e);
                false
            }
            None => false,
        }
    }

    /// Deletes the session, every message in it and its conversation
    /// context. Returns whether the session existed. Clears the pointer when
    /// it named this session.
    pub async fn delete_session(&self, session_id: &str) -> bool {
        self.init().await;
        let id = session_id.to_string();
        let removed = match self
            .run_primary("delete_session", move |db| {
                let sessions = db.sessions.delete(&id)?;
                let messages = db.messages.delete_by_session(&id)?;
                db.contexts.clear(&id)?;
                Ok((sessions, messages))
            })
            .await
        {
            Some(Ok((sessions, messages))) => {
                info!("Deleted session {} with {} messages", session_id, messages);
                sessions > 0
            }
            Some(Err(e)) => {
                warn!("{}", e);
                false
            }
            None => {
                debug!("Cannot delete session {} while {}", session_id, EngineState::Degraded);
                false
            }
        };

        if self.current_session_id().as_deref() == Some(session_id) {
            self.clear_current_session();
        }
        removed
    }

    // ----- conversation context -----

    /// Replaces the topic-tracking state kept for a session. Returns whether
    /// it was stored; there is no fallback copy.
    pub async fn save_conversation_context(&self, session_id: &str, context: Map<String, Value>) -> bool {
        self.init().await;
        let id = session_id.to_string();
        match self
            .run_primary("save_conversation_context", move |db| db.contexts.save(&id, &context, now_millis()))
            .await
        {
            Some(Ok(())) => true,
            Some(Err(e)) => {
                warn!("{}", e);
                false
            }
            None => {
                debug!("Conversation context for {} not kept while {}", session_id, EngineState::Degraded);
                false
            }
        }
    }

    pub async fn get_conversation_context(&self, session_id: &str) -> Option<Map<String, Value>> {
        let id = session_id.to_string();
        self.read_with_fallback("get_conversation_context", move |db| db.contexts.get(&id), || None)
            .await
    }

    /// Drops a session's context, e.g. when the user starts a new topic.
    /// Returns whether one was stored.
    pub async fn clear_conversation_context(&self, session_id: &str) -> bool {
        self.init().await;
        let id = session_id.to_string();
        match self.run_primary("clear_conversation_context", move |db| db.contexts.clear(&id)).await {
            Some(Ok(cleared)) => cleared,
            Some(Err(e)) => {
                warn!("{}", e);
                false
            }
            None => false,
        }
    }
}
