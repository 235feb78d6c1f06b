//! Per-session conversation context (topic tracking state) as one JSON object per session
use crate::memory_db::schema::*;
use chrono::{DateTime, Utc};
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, OptionalExtension};
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Clone)]
pub struct ContextStore {
    pool: Arc<Pool<SqliteConnectionManager>>,
}

impl ContextStore {
    pub fn new(pool: Arc<Pool<SqliteConnectionManager>>) -> Self {
        Self { pool }
    }

    fn get_conn(&self) -> anyhow::Result<r2d2::PooledConnection<SqliteConnectionManager>> {
        self.pool.get().map_err(|e| anyhow::anyhow!("Failed to get connection from pool: {}", e))
    }

    /// Replaces the stored context for `session_id`.
    pub fn save(&self, session_id: &str, context: &Map<String, Value>, updated_at: DateTime<Utc>) -> anyhow::Result<()> {
        let conn = self.get_conn()?;
        conn.execute(
            "INSERT INTO conversation_context (session_id, context_data, updated_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(session_id) DO UPDATE SET
                context_data = excluded.context_data,
                updated_at = excluded.updated_at",
            params![session_id, serde_json::to_string(context)?, updated_at.timestamp_millis()],
        )?;
        debug!("Saved conversation context for session {}", session_id);
        Ok(())
    }

    /// `None` when nothing was saved. A stored value that is not a JSON
    /// object is logged and read as absent.
    pub fn get(&self, session_id: &str) -> anyhow::Result<Option<Map<String, Value>>> {
        let conn = self.get_conn()?;
        let raw: Option<String> = conn
            .query_row(
                "SELECT context_data FROM conversation_context WHERE session_id = ?1",
                [session_id],
                |row| row.get(0),
            )
            .optional()?;

        Ok(raw.and_then(|raw| match serde_json::from_str::<Map<String, Value>>(&raw) {
            Ok(context) => Some(context),
            Err(e) => {
                warn!("Unreadable conversation context for session {}: {}", session_id, e);
                None
            }
        }))
    }

    /// Returns whether a context was stored.
    pub fn clear(&self, session_id: &str) -> anyhow::Result<bool> {
        let conn = self.get_conn()?;
        let deleted = conn.execute("DELETE FROM conversation_context WHERE session_id = ?1", [session_id])?;
        Ok(deleted > 0)
    }
}
