//! Message storage and retrieval operations
use crate::memory_db::migration::index_exists;
use crate::memory_db::schema::*;
use crate::error::MemoryError;
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, OptionalExtension, Row};
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{debug, info, warn};

const MESSAGE_COLUMNS: &str = "id, role, content, timestamp, session_id, metadata";

#[derive(Clone)]
pub struct MessageStore {
    pool: Arc<Pool<SqliteConnectionManager>>,
}

impl MessageStore {
    pub fn new(pool: Arc<Pool<SqliteConnectionManager>>) -> Self {
        Self { pool }
    }

    fn get_conn(&self) -> anyhow::Result<r2d2::PooledConnection<SqliteConnectionManager>> {
        self.pool.get().map_err(|e| anyhow::anyhow!("Failed to get connection from pool: {}", e))
    }

    /// Insert a message. Returns `false` when a message with the same id
    /// already exists; the stored record is left untouched.
    pub fn insert(&self, message: &StoredMessage) -> anyhow::Result<bool> {
        let conn = self.get_conn()?;
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO messages (id, role, content, timestamp, session_id, metadata)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                &message.id,
                message.role.as_str(),
                &message.content,
                message.timestamp.timestamp_millis(),
                message.session_id.as_deref(),
                serde_json::to_string(&message.metadata)?,
            ],
        )?;

        if inserted == 0 {
            debug!("Message {} already stored, skipping", message.id);
        }
        Ok(inserted > 0)
    }

    pub fn get(&self, id: &str) -> anyhow::Result<Option<StoredMessage>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(&format!("SELECT {} FROM messages WHERE id = ?1", MESSAGE_COLUMNS))?;
        let mut rows = stmt.query([id])?;

        if let Some(row) = rows.next()? {
            Ok(Some(row_to_stored_message(row)?))
        } else {
            Ok(None)
        }
    }

    /// Global tail of the timeline, returned oldest to newest.
    pub fn recent(&self, limit: usize) -> anyhow::Result<Vec<StoredMessage>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM messages ORDER BY timestamp DESC, id DESC LIMIT ?1",
            MESSAGE_COLUMNS
        ))?;
        let mut rows = stmt.query([limit as i64])?;
        let mut messages = Vec::new();
        while let Some(row) = rows.next()? {
            messages.push(row_to_stored_message(row)?);
        }
        messages.reverse();
        Ok(messages)
    }

    pub fn all(&self) -> anyhow::Result<Vec<StoredMessage>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM messages ORDER BY timestamp ASC, id ASC",
            MESSAGE_COLUMNS
        ))?;
        let mut rows = stmt.query([])?;
        let mut messages = Vec::new();
        while let Some(row) = rows.next()? {
            messages.push(row_to_stored_message(row)?);
        }
        Ok(messages)
    }

    pub fn count(&self) -> anyhow::Result<usize> {
        let conn = self.get_conn()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM messages", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    /// Messages of one session, ascending, keeping only the last `limit` when given.
    ///
    /// Uses the `session_id` index when it exists; a database whose index has
    /// not been created yet is served by a full scan filtered in memory.
    pub fn by_session(&self, session_id: &str, limit: Option<usize>) -> anyhow::Result<Vec<StoredMessage>> {
        let conn = self.get_conn()?;

        let mut messages = if index_exists(&conn, MESSAGES_SESSION_INDEX)? {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM messages INDEXED BY {} WHERE session_id = ?1 ORDER BY timestamp ASC, id ASC",
                MESSAGE_COLUMNS, MESSAGES_SESSION_INDEX
            ))?;
            let mut rows = stmt.query([session_id])?;
            let mut messages = Vec::new();
            while let Some(row) = rows.next()? {
                messages.push(row_to_stored_message(row)?);
            }
            messages
        } else {
            let missing = MemoryError::IndexMissing { index: MESSAGES_SESSION_INDEX };
            warn!("{}; scanning all messages for session {}", missing, session_id);
            drop(conn);
            let mut messages = self.all()?;
            messages.retain(|m| m.session_id.as_deref() == Some(session_id));
            messages
        };

        if let Some(limit) = limit {
            if messages.len() > limit {
                messages.drain(..messages.len() - limit);
            }
        }
        Ok(messages)
    }

    /// Deletes every message stamped with `session_id`.
    pub fn delete_by_session(&self, session_id: &str) -> anyhow::Result<usize> {
        let conn = self.get_conn()?;
        let deleted = conn.execute("DELETE FROM messages WHERE session_id = ?1", [session_id])?;
        debug!("Deleted {} messages for session {}", deleted, session_id);
        Ok(deleted)
    }

    pub fn clear(&self) -> anyhow::Result<usize> {
        let conn = self.get_conn()?;
        let deleted = conn.execute("DELETE FROM messages", [])?;
        info!("Cleared {} messages", deleted);
        Ok(deleted)
    }

    /// Merges `patch` into the stored metadata object. Returns `false` if the
    /// message does not exist.
    pub fn merge_metadata(&self, id: &str, patch: &Map<String, Value>) -> anyhow::Result<bool> {
        let mut conn = self.get_conn()?;
        let tx = conn.transaction()?;

        let existing: Option<String> = tx
            .query_row("SELECT metadata FROM messages WHERE id = ?1", [id], |row| row.get(0))
            .optional()?;

        let Some(existing) = existing else {
            return Ok(false);
        };

        let mut metadata: Map<String, Value> = serde_json::from_str(&existing).unwrap_or_default();
        for (key, value) in patch {
            metadata.insert(key.clone(), value.clone());
        }

        tx.execute(
            "UPDATE messages SET metadata = ?1 WHERE id = ?2",
            params![serde_json::to_string(&metadata)?, id],
        )?;
        tx.commit()?;
        Ok(true)
    }
}

fn row_to_stored_message(row: &Row) -> anyhow::Result<StoredMessage> {
    let role: String = row.get(1)?;
    let metadata_json: Option<String> = row.get(5)?;
    let metadata = metadata_json
        .and_then(|json| serde_json::from_str::<Map<String, Value>>(&json).ok())
        .unwrap_or_default();

    Ok(StoredMessage {
        id: row.get(0)?,
        role: role.parse()?,
        content: row.get(2)?,
        timestamp: from_millis(row.get(3)?),
        session_id: row.get(4)?,
        metadata,
    })
}
