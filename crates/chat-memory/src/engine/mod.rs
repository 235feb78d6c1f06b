//! Memory engine - the single entry point over the embedded database and the
//! fallback store.
//!
//! Every public call first awaits the initialization barrier, then tries the
//! embedded database and degrades to the fallback store on failure. Callers get
//! the same result shape either way.

mod facts;
mod import;
mod sessions;

pub use facts::DEFAULT_FACT_CONFIDENCE;
pub use import::parse_message_record;

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use std::fmt;
use std::sync::{Arc, RwLock};
use tokio::sync::{watch, OnceCell};
use tracing::{debug, error, info, warn};

use crate::config::MemoryConfig;
use crate::error::{MemoryError, Result};
use crate::fallback::FallbackStore;
use crate::kv_storage::{FileStorage, InMemoryStorage, KeyValueStorage};
use crate::memory_db::{from_millis, now_millis, time_derived_id, DatabaseStats, MemoryDatabase, Role, StoredMessage};
use crate::metrics::{AtomicCounters, CounterSnapshot};
use crate::utils::TextUtils;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    /// Initialization has not finished yet.
    Opening,
    /// The embedded database is open and serving requests.
    Ready,
    /// Only the fallback store is available, for the rest of this instance's life.
    Degraded,
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EngineState::Opening => "opening",
            EngineState::Ready => "ready",
            EngineState::Degraded => "degraded",
        };
        f.write_str(name)
    }
}

/// Input to [`MemoryEngine::save_message`]. Unset fields are filled in by the engine.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub role: Role,
    pub content: String,
    pub timestamp: Option<DateTime<Utc>>,
    pub id: Option<String>,
    pub metadata: Map<String, Value>,
    pub session_id: Option<String>,
}

impl NewMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            timestamp: None,
            id: None,
            metadata: Map::new(),
            session_id: None,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_metadata(mut self, metadata: Map<String, Value>) -> Self {
        self.metadata = metadata;
        self
    }
}

pub struct MemoryEngine {
    config: MemoryConfig,
    fallback: FallbackStore,
    primary: RwLock<Option<MemoryDatabase>>,
    state: watch::Sender<EngineState>,
    init: OnceCell<()>,
    counters: AtomicCounters,
}

impl MemoryEngine {
    /// Build an engine over an explicit key-value storage. Nothing is opened
    /// until [`init`](Self::init) or the first operation runs.
    pub fn new(config: MemoryConfig, storage: Arc<dyn KeyValueStorage>) -> Self {
        let fallback = FallbackStore::new(storage, config.fallback_message_cap);
        let (state, _) = watch::channel(EngineState::Opening);
        Self {
            config,
            fallback,
            primary: RwLock::new(None),
            state,
            init: OnceCell::new(),
            counters: AtomicCounters::new(),
        }
    }

    /// Build an engine whose key-value storage follows `config.fallback_dir`.
    pub fn from_config(config: MemoryConfig) -> anyhow::Result<Self> {
        let storage: Arc<dyn KeyValueStorage> = match &config.fallback_dir {
            Some(dir) => Arc::new(FileStorage::new(dir)?),
            None => Arc::new(InMemoryStorage::new()),
        };
        Ok(Self::new(config, storage))
    }

    /// [`from_config`](Self::from_config) followed by [`init`](Self::init).
    pub async fn open(config: MemoryConfig) -> anyhow::Result<Self> {
        let engine = Self::from_config(config)?;
        engine.init().await;
        Ok(engine)
    }

    pub fn config(&self) -> &MemoryConfig {
        &self.config
    }

    pub fn state(&self) -> EngineState {
        *self.state.borrow()
    }

    /// Receives every state transition; the first one leaves `Opening`.
    pub fn subscribe_state(&self) -> watch::Receiver<EngineState> {
        self.state.subscribe()
    }

    pub fn counters(&self) -> CounterSnapshot {
        self.counters.snapshot()
    }

    /// Runs initialization exactly once. Concurrent callers all wait for the
    /// same run; later calls return immediately.
    pub async fn init(&self) {
        self.init.get_or_init(|| self.initialize()).await;
    }

    /// Waits for the barrier and reports the resulting state.
    pub async fn ready(&self) -> EngineState {
        self.init().await;
        self.state()
    }

    async fn initialize(&self) {
        info!("Initializing memory engine");

        let state = match self.open_primary().await {
            Ok(db) => {
                if let Ok(mut primary) = self.primary.write() {
                    *primary = Some(db);
                    EngineState::Ready
                } else {
                    error!("Primary backend lock poisoned; continuing with fallback store");
                    EngineState::Degraded
                }
            }
            Err(e) => {
                warn!("{}; continuing with fallback store", e);
                EngineState::Degraded
            }
        };

        if state == EngineState::Ready {
            let migrated = self.migrate_legacy_messages().await;
            if migrated > 0 {
                info!("Migrated {} legacy messages", migrated);
            }
        }

        self.ensure_current_session().await;

        self.state.send_replace(state);
        info!("Memory engine {}", state);
    }

    async fn open_primary(&self) -> Result<MemoryDatabase> {
        if !self.config.primary_enabled {
            return Err(MemoryError::EngineUnavailable("disabled by configuration".into()));
        }

        let path = self.config.db_path.clone();
        let pool_size = self.config.pool_size;
        let opened = tokio::task::spawn_blocking(move || match path {
            Some(path) => MemoryDatabase::new(&path, pool_size),
            None => MemoryDatabase::new_in_memory(),
        })
        .await
        .map_err(|e| MemoryError::EngineUnavailable(format!("open task failed: {}", e)))?;

        opened.map_err(|e| MemoryError::EngineUnavailable(format!("{:#}", e)))
    }

    /// Checkpoints and releases the embedded database. Later calls are served
    /// by the fallback store.
    pub async fn dispose(&self) {
        self.init().await;

        let db = self.primary.write().ok().and_then(|mut primary| primary.take());
        if let Some(db) = db {
            match tokio::task::spawn_blocking(move || db.checkpoint()).await {
                Ok(Ok(())) => debug!("Checkpointed memory database"),
                Ok(Err(e)) => warn!("Checkpoint on dispose failed: {:#}", e),
                Err(e) => warn!("Checkpoint task failed: {}", e),
            }
        }

        self.state.send_replace(EngineState::Degraded);
        info!("Memory engine disposed");
    }

    fn primary(&self) -> Option<MemoryDatabase> {
        self.primary.read().ok().and_then(|primary| primary.clone())
    }

    /// Runs `f` on the blocking pool against the embedded database. `None`
    /// means there is no embedded database to run against.
    async fn run_primary<T, F>(&self, operation: &'static str, f: F) -> Option<Result<T>>
    where
        F: FnOnce(&MemoryDatabase) -> anyhow::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let db = self.primary()?;
        let outcome = match tokio::task::spawn_blocking(move || f(&db)).await {
            Ok(result) => result,
            Err(e) => Err(anyhow::anyhow!("blocking task failed: {}", e)),
        };
        Some(outcome.map_err(|e| MemoryError::transaction(operation, e)))
    }

    /// Read path shared by every query: primary first, `fallback` when the
    /// primary is missing or the read fails.
    async fn read_with_fallback<T, F, G>(&self, operation: &'static str, primary: F, fallback: G) -> T
    where
        F: FnOnce(&MemoryDatabase) -> anyhow::Result<T> + Send + 'static,
        T: Send + 'static,
        G: FnOnce() -> T,
    {
        self.init().await;
        match self.run_primary(operation, primary).await {
            Some(Ok(value)) => value,
            Some(Err(e)) => {
                warn!("{}; serving degraded result", e);
                self.counters.inc_degraded_reads();
                fallback()
            }
            None => fallback(),
        }
    }

    pub async fn stats(&self) -> Option<DatabaseStats> {
        self.init().await;
        match self.run_primary("stats", |db| db.get_stats()).await? {
            Ok(stats) => Some(stats),
            Err(e) => {
                warn!("{}", e);
                None
            }
        }
    }

    // ----- messages -----

    /// Stores a message and returns its id.
    ///
    /// Fails only when neither backend accepted the write.
    pub async fn save_message(&self, message: NewMessage) -> Result<String> {
        self.init().await;
        self.write_message(message).await.map(|(id, _)| id)
    }

    /// Save path without the barrier, also used by import and legacy
    /// migration. The flag is `false` when a message with that id already existed.
    async fn write_message(&self, message: NewMessage) -> Result<(String, bool)> {
        let session_id = match message.session_id {
            Some(id) => id,
            None => match self.current_session_id() {
                Some(id) => id,
                None => self.create_session_inner(None).await.id,
            },
        };

        let record = StoredMessage {
            id: message.id.unwrap_or_else(|| time_derived_id("msg")),
            role: message.role,
            content: message.content,
            timestamp: message
                .timestamp
                .map(|ts| from_millis(ts.timestamp_millis()))
                .unwrap_or_else(now_millis),
            session_id: Some(session_id.clone()),
            metadata: message.metadata,
        };

        let to_insert = record.clone();
        match self.run_primary("save_message", move |db| db.messages.insert(&to_insert)).await {
            Some(Ok(false)) => Ok((record.id, false)),
            Some(Ok(true)) => {
                self.counters.inc_primary_writes();
                let first_user_message = (record.role == Role::User).then(|| record.content.clone());
                self.update_session_inner(&session_id, record.timestamp, first_user_message).await;
                debug!("Saved {} message {} in session {}", record.role, record.id, session_id);
                Ok((record.id, true))
            }
            Some(Err(e)) => {
                warn!("{}; writing message {} to fallback store", e, record.id);
                self.write_fallback_message(&record)?;
                Ok((record.id, true))
            }
            None => {
                self.write_fallback_message(&record)?;
                Ok((record.id, true))
            }
        }
    }

    fn write_fallback_message(&self, record: &StoredMessage) -> Result<()> {
        self.fallback.append_message(record).map_err(|e| {
            error!("Fallback store rejected message {}: {:#}", record.id, e);
            MemoryError::Fallback(e)
        })?;
        self.counters.inc_fallback_writes();
        Ok(())
    }

    /// Global tail of the timeline, oldest to newest.
    pub async fn get_recent_messages(&self, limit: usize) -> Vec<StoredMessage> {
        self.read_with_fallback(
            "get_recent_messages",
            move |db| db.messages.recent(limit),
            || self.fallback.recent_messages(limit),
        )
        .await
    }

    /// Every message, ascending by timestamp.
    pub async fn get_all_messages(&self) -> Vec<StoredMessage> {
        self.read_with_fallback("get_all_messages", |db| db.messages.all(), || self.fallback.messages())
            .await
    }

    pub async fn get_message_count(&self) -> usize {
        self.read_with_fallback("get_message_count", |db| db.messages.count(), || self.fallback.messages().len())
            .await
    }

    /// Wipes messages from both backends. Sessions and facts are untouched.
    pub async fn clear_history(&self) {
        self.init().await;
        if let Some(Err(e)) = self.run_primary("clear_history", |db| db.messages.clear()).await {
            warn!("{}", e);
        }
        if let Err(e) = self.fallback.clear_messages() {
            warn!("Failed to clear fallback messages: {:#}", e);
        }
        info!("Chat history cleared");
    }

    /// Case-insensitive substring match on content, keeping the last `limit` hits.
    pub async fn search_messages(&self, query: &str, limit: usize) -> Vec<StoredMessage> {
        let mut hits: Vec<StoredMessage> = self
            .get_all_messages()
            .await
            .into_iter()
            .filter(|m| TextUtils::contains_ignore_case(&m.content, query))
            .collect();
        if hits.len() > limit {
            hits.drain(..hits.len() - limit);
        }
        hits
    }

    /// Messages with `start <= timestamp <= end`.
    pub async fn get_messages_by_date_range(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Vec<StoredMessage> {
        self.get_all_messages()
            .await
            .into_iter()
            .filter(|m| m.timestamp >= start && m.timestamp <= end)
            .collect()
    }

    /// Merges `patch` into a stored message's metadata. Returns whether a
    /// message was updated.
    pub async fn update_message_metadata(&self, id: &str, patch: Map<String, Value>) -> bool {
        self.init().await;
        let message_id = id.to_string();
        match self
            .run_primary("update_message_metadata", move |db| db.messages.merge_metadata(&message_id, &patch))
            .await
        {
            Some(Ok(updated)) => updated,
            Some(Err(e)) => {
                warn!("{}", e);
                false
            }
            None => {
                debug!("Metadata backfill for {} skipped: no embedded database", id);
                false
            }
        }
    }
}
