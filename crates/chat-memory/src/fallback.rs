//! Degraded storage used when the embedded database is missing or failing.
//!
//! Messages and facts are kept as flat JSON arrays under fixed keys of a
//! [`KeyValueStorage`]. There are no indexes, so session-scoped queries are
//! not served from here.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::kv_storage::KeyValueStorage;
use crate::memory_db::{StoredMessage, UserFact};

pub const MESSAGES_KEY: &str = "chat_memory.messages";
pub const FACTS_KEY: &str = "chat_memory.facts";
/// Flat message list written by the pre-session format.
pub const LEGACY_MESSAGES_KEY: &str = "chat_history";
pub const LEGACY_BACKUP_KEY: &str = "chat_history_backup";
pub const CURRENT_SESSION_KEY: &str = "chat_memory.current_session";

/// Messages kept once the list grows past this; oldest are dropped first.
pub const DEFAULT_MESSAGE_CAP: usize = 100;

#[derive(Clone)]
pub struct FallbackStore {
    storage: Arc<dyn KeyValueStorage>,
    message_cap: usize,
}

impl FallbackStore {
    pub fn new(storage: Arc<dyn KeyValueStorage>, message_cap: usize) -> Self {
        Self { storage, message_cap }
    }

    pub fn storage(&self) -> &Arc<dyn KeyValueStorage> {
        &self.storage
    }

    pub fn message_cap(&self) -> usize {
        self.message_cap
    }

    /// Every stored message, ascending by timestamp.
    pub fn messages(&self) -> Vec<StoredMessage> {
        let mut messages: Vec<StoredMessage> = self.read_list(MESSAGES_KEY);
        messages.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then_with(|| a.id.cmp(&b.id)));
        messages
    }

    pub fn recent_messages(&self, limit: usize) -> Vec<StoredMessage> {
        let mut messages = self.messages();
        if messages.len() > limit {
            messages.drain(..messages.len() - limit);
        }
        messages
    }

    pub fn append_message(&self, message: &StoredMessage) -> anyhow::Result<()> {
        let mut messages: Vec<StoredMessage> = self.read_list(MESSAGES_KEY);
        messages.retain(|m| m.id != message.id);
        messages.push(message.clone());
        if messages.len() > self.message_cap {
            let dropped = messages.len() - self.message_cap;
            messages.drain(..dropped);
            debug!("Fallback message list capped, dropped {} oldest", dropped);
        }
        self.write_list(MESSAGES_KEY, &messages)
    }

    pub fn clear_messages(&self) -> anyhow::Result<()> {
        self.storage.remove_item(MESSAGES_KEY)
    }

    pub fn facts(&self) -> Vec<UserFact> {
        self.read_list(FACTS_KEY)
    }

    pub fn append_fact(&self, fact: &UserFact) -> anyhow::Result<()> {
        let mut facts: Vec<UserFact> = self.read_list(FACTS_KEY);
        facts.push(fact.clone());
        self.write_list(FACTS_KEY, &facts)
    }

    /// Returns whether a fact with `id` was present.
    pub fn remove_fact(&self, id: &str) -> anyhow::Result<bool> {
        let mut facts: Vec<UserFact> = self.read_list(FACTS_KEY);
        let before = facts.len();
        facts.retain(|f| f.id != id);
        if facts.len() == before {
            return Ok(false);
        }
        self.write_list(FACTS_KEY, &facts)?;
        Ok(true)
    }

    pub fn clear_facts(&self) -> anyhow::Result<()> {
        self.storage.remove_item(FACTS_KEY)
    }

    /// Session-scoped reads need an index the fallback store does not have.
    pub fn session_messages(&self, session_id: &str) -> Vec<StoredMessage> {
        debug!("Session-scoped read for {} is not supported by the fallback store", session_id);
        Vec::new()
    }

    fn read_list<T: DeserializeOwned>(&self, key: &str) -> Vec<T> {
        let raw = match self.storage.get_item(key) {
            Ok(Some(raw)) => raw,
            Ok(None) => return Vec::new(),
            Err(e) => {
                warn!("Failed to read fallback key {}: {:#}", key, e);
                return Vec::new();
            }
        };
        serde_json::from_str(&raw).unwrap_or_else(|e| {
            warn!("Fallback key {} holds unreadable JSON, treating as empty: {}", key, e);
            Vec::new()
        })
    }

    fn write_list<T: Serialize>(&self, key: &str, items: &[T]) -> anyhow::Result<()> {
        let json = serde_json::to_string(items)?;
        self.storage.set_item(key, &json)
    }
}
