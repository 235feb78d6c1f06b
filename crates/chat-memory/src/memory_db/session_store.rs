//! Session storage: grouping metadata for conversations
use crate::memory_db::schema::*;
use crate::utils::TextUtils;
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, OptionalExtension, Row, TransactionBehavior};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, info};

/// Longest title derived from a first user message, ellipsis included.
pub const MAX_TITLE_CHARS: usize = 50;

const SESSION_COLUMNS: &str = "id, title, created_at, last_message_at, message_count";

#[derive(Clone)]
pub struct SessionStore {
    pool: Arc<Pool<SqliteConnectionManager>>,
}

impl SessionStore {
    pub fn new(pool: Arc<Pool<SqliteConnectionManager>>) -> Self {
        Self { pool }
    }

    fn get_conn(&self) -> anyhow::Result<r2d2::PooledConnection<SqliteConnectionManager>> {
        self.pool.get().map_err(|e| anyhow::anyhow!("Failed to get connection from pool: {}", e))
    }

    pub fn insert(&self, session: &ChatSession) -> anyhow::Result<()> {
        let conn = self.get_conn()?;
        conn.execute(
            "INSERT INTO sessions (id, title, created_at, last_message_at, message_count)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                &session.id,
                &session.title,
                session.created_at.timestamp_millis(),
                session.last_message_at.timestamp_millis(),
                session.message_count,
            ],
        )?;
        info!("Created session with ID: {}", session.id);
        Ok(())
    }

    pub fn get(&self, session_id: &str) -> anyhow::Result<Option<ChatSession>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(&format!("SELECT {} FROM sessions WHERE id = ?1", SESSION_COLUMNS))?;
        let mut rows = stmt.query([session_id])?;

        if let Some(row) = rows.next()? {
            Ok(Some(row_to_session(row)?))
        } else {
            Ok(None)
        }
    }

    /// Most recently active first.
    pub fn all(&self) -> anyhow::Result<Vec<ChatSession>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM sessions ORDER BY last_message_at DESC, created_at DESC",
            SESSION_COLUMNS
        ))?;
        let mut rows = stmt.query([])?;
        let mut sessions = Vec::new();

        while let Some(row) = rows.next()? {
            sessions.push(row_to_session(row)?);
        }

        Ok(sessions)
    }

    /// Bookkeeping after a message lands in `session_id`.
    ///
    /// The title is replaced only when this is the session's first message
    /// and the title is still [`DEFAULT_SESSION_TITLE`]. The message count is
    /// the guard, not the title text. A session without a row (its insert
    /// failed, or it came from an import) gets one with the placeholder title.
    pub fn record_message(
        &self,
        session_id: &str,
        last_message_at: DateTime<Utc>,
        first_user_message: Option<&str>,
    ) -> anyhow::Result<ChatSession> {
        let mut conn = self.get_conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let existing = tx
            .query_row(
                &format!("SELECT {} FROM sessions WHERE id = ?1", SESSION_COLUMNS),
                [session_id],
                |row| Ok(row_to_session(row)),
            )
            .optional()?
            .transpose()?;

        let mut session = match existing {
            Some(session) => session,
            None => {
                debug!("Session {} has no row yet, creating it", session_id);
                tx.execute(
                    "INSERT INTO sessions (id, title, created_at, last_message_at, message_count)
                     VALUES (?1, ?2, ?3, ?3, 0)",
                    params![session_id, DEFAULT_SESSION_TITLE, last_message_at.timestamp_millis()],
                )?;
                ChatSession {
                    id: session_id.to_string(),
                    title: DEFAULT_SESSION_TITLE.to_string(),
                    created_at: last_message_at,
                    last_message_at,
                    message_count: 0,
                }
            }
        };

        let is_first_message = session.message_count == 0;
        session.message_count += 1;
        session.last_message_at = last_message_at;

        if is_first_message && session.title == DEFAULT_SESSION_TITLE {
            if let Some(text) = first_user_message.map(str::trim).filter(|t| !t.is_empty()) {
                let text = TextUtils::normalize_whitespace(text);
                session.title = TextUtils::truncate_with_ellipsis(&text, MAX_TITLE_CHARS).into_owned();
                info!("Titled session {}: {}", session_id, session.title);
            }
        }

        tx.execute(
            "UPDATE sessions SET title = ?1, last_message_at = ?2, message_count = ?3 WHERE id = ?4",
            params![
                &session.title,
                session.last_message_at.timestamp_millis(),
                session.message_count,
                session_id,
            ],
        )?;
        tx.commit()?;

        Ok(session)
    }

    pub fn rename(&self, session_id: &str, title: &str) -> anyhow::Result<bool> {
        let conn = self.get_conn()?;
        let updated = conn.execute(
            "UPDATE sessions SET title = ?1 WHERE id = ?2",
            params![title, session_id],
        )?;
        if updated > 0 {
            info!("Updated session {} title to: {}", session_id, title);
        }
        Ok(updated > 0)
    }

    pub fn delete(&self, session_id: &str) -> anyhow::Result<usize> {
        let conn = self.get_conn()?;
        let deleted = conn.execute("DELETE FROM sessions WHERE id = ?1", [session_id])?;
        info!("Deleted session {}", session_id);
        Ok(deleted)
    }
}

fn row_to_session(row: &Row) -> anyhow::Result<ChatSession> {
    let message_count: i64 = row.get(4)?;
    Ok(ChatSession {
        id: row.get(0)?,
        title: row.get(1)?,
        created_at: from_millis(row.get(2)?),
        last_message_at: from_millis(row.get(3)?),
        message_count: message_count.max(0) as u32,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory_db::MemoryDatabase;

    fn new_session(id: &str, created: i64) -> ChatSession {
        ChatSession {
            id: id.to_string(),
            title: DEFAULT_SESSION_TITLE.to_string(),
            created_at: from_millis(created),
            last_message_at: from_millis(created),
            message_count: 0,
        }
    }

    #[test]
    fn first_user_message_sets_title_once() {
        let db = MemoryDatabase::new_in_memory().unwrap();
        db.sessions.insert(&new_session("s", 1)).unwrap();

        let s = db.sessions.record_message("s", from_millis(10), Some("My name is Frank")).unwrap();
        assert_eq!(s.title, "My name is Frank");
        assert_eq!(s.message_count, 1);

        let s = db.sessions.record_message("s", from_millis(20), Some("Something else")).unwrap();
        assert_eq!(s.title, "My name is Frank");
        assert_eq!(s.message_count, 2);
        assert_eq!(s.last_message_at, from_millis(20));
    }

    #[test]
    fn title_guard_is_the_message_count() {
        let db = MemoryDatabase::new_in_memory().unwrap();
        db.sessions.insert(&new_session("s", 1)).unwrap();

        // assistant greeting first: no title text offered
        db.sessions.record_message("s", from_millis(2), None).unwrap();
        let s = db.sessions.record_message("s", from_millis(3), Some("late user text")).unwrap();
        assert_eq!(s.title, DEFAULT_SESSION_TITLE);

        db.sessions.insert(&new_session("p", 1)).unwrap();
        db.sessions.record_message("p", from_millis(2), Some(DEFAULT_SESSION_TITLE)).unwrap();
        let p = db.sessions.record_message("p", from_millis(3), Some("second")).unwrap();
        assert_eq!(p.title, DEFAULT_SESSION_TITLE);
        assert_eq!(p.message_count, 2);
    }

    #[test]
    fn long_first_message_is_truncated() {
        let db = MemoryDatabase::new_in_memory().unwrap();
        db.sessions.insert(&new_session("s", 1)).unwrap();
        let text = "a".repeat(80);

        let s = db.sessions.record_message("s", from_millis(2), Some(&text)).unwrap();
        assert_eq!(s.title.chars().count(), MAX_TITLE_CHARS);
        assert!(s.title.ends_with("..."));
    }

    #[test]
    fn missing_session_row_is_recreated() {
        let db = MemoryDatabase::new_in_memory().unwrap();
        let s = db.sessions.record_message("orphan", from_millis(5), Some("hello")).unwrap();
        assert_eq!(s.title, "hello");
        assert_eq!(s.message_count, 1);
        assert_eq!(s.created_at, from_millis(5));

        let stored = db.sessions.get("orphan").unwrap().unwrap();
        assert_eq!(stored, s);
    }

    #[test]
    fn all_orders_by_last_activity() {
        let db = MemoryDatabase::new_in_memory().unwrap();
        db.sessions.insert(&new_session("old", 1)).unwrap();
        db.sessions.insert(&new_session("new", 2)).unwrap();
        db.sessions.record_message("old", from_millis(50), None).unwrap();

        let ids: Vec<String> = db.sessions.all().unwrap().into_iter().map(|s| s.id).collect();
        assert_eq!(ids, vec!["old", "new"]);
    }

    #[test]
    fn rename_and_delete() {
        let db = MemoryDatabase::new_in_memory().unwrap();
        db.sessions.insert(&new_session("s", 1)).unwrap();
        assert!(db.sessions.rename("s", "Trip planning").unwrap());
        assert_eq!(db.sessions.get("s").unwrap().unwrap().title, "Trip planning");
        assert_eq!(db.sessions.delete("s").unwrap(), 1);
        assert!(db.sessions.get("s").unwrap().is_none());
        assert!(!db.sessions.rename("s", "x").unwrap());
    }
}
