//! Fact storage and prompt ranking
use crate::memory_db::schema::*;
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, Row};
use std::sync::Arc;
use tracing::{debug, info};

/// How many facts make it into the prompt sentence.
pub const PROMPT_FACT_LIMIT: usize = 20;

pub const PROMPT_PREFIX: &str = "You remember the following about the user: ";

const FACT_COLUMNS: &str = "id, fact, category, confidence, created_at, updated_at";

#[derive(Clone)]
pub struct FactStore {
    pool: Arc<Pool<SqliteConnectionManager>>,
}

impl FactStore {
    pub fn new(pool: Arc<Pool<SqliteConnectionManager>>) -> Self {
        Self { pool }
    }

    fn get_conn(&self) -> anyhow::Result<r2d2::PooledConnection<SqliteConnectionManager>> {
        self.pool.get()
            .map_err(|e| anyhow::anyhow!("Failed to get connection from pool: {}", e))
    }

    pub fn insert(&self, fact: &UserFact) -> anyhow::Result<()> {
        let conn = self.get_conn()?;

        debug!("Storing {} fact {} (confidence {})", fact.category, fact.id, fact.confidence);

        conn.execute(
            "INSERT INTO facts (id, fact, category, confidence, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                &fact.id,
                &fact.fact,
                fact.category.as_str(),
                fact.confidence,
                fact.created_at.timestamp_millis(),
                fact.updated_at.timestamp_millis(),
            ],
        )?;

        Ok(())
    }

    /// Oldest first.
    pub fn all(&self) -> anyhow::Result<Vec<UserFact>> {
        self.query(&format!("SELECT {} FROM facts ORDER BY created_at ASC, id ASC", FACT_COLUMNS), params![])
    }

    pub fn by_category(&self, category: FactCategory) -> anyhow::Result<Vec<UserFact>> {
        self.query(
            &format!("SELECT {} FROM facts WHERE category = ?1 ORDER BY updated_at DESC", FACT_COLUMNS),
            [category.as_str()],
        )
    }

    pub fn top_by_confidence(&self, limit: usize) -> anyhow::Result<Vec<UserFact>> {
        self.query(
            &format!("SELECT {} FROM facts ORDER BY confidence DESC, updated_at DESC LIMIT ?1", FACT_COLUMNS),
            [limit as i64],
        )
    }

    pub fn delete(&self, id: &str) -> anyhow::Result<bool> {
        let conn = self.get_conn()?;
        let deleted = conn.execute("DELETE FROM facts WHERE id = ?1", [id])?;
        Ok(deleted > 0)
    }

    pub fn clear(&self) -> anyhow::Result<usize> {
        let conn = self.get_conn()?;
        let deleted = conn.execute("DELETE FROM facts", [])?;
        info!("Cleared {} facts", deleted);
        Ok(deleted)
    }

    fn query<P: rusqlite::Params>(&self, sql: &str, params: P) -> anyhow::Result<Vec<UserFact>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(sql)?;
        let mut rows = stmt.query(params)?;
        let mut facts = Vec::new();

        while let Some(row) = rows.next()? {
            facts.push(row_to_fact(row)?);
        }

        Ok(facts)
    }
}

fn row_to_fact(row: &Row) -> anyhow::Result<UserFact> {
    let category: String = row.get(2)?;
    Ok(UserFact {
        id: row.get(0)?,
        fact: row.get(1)?,
        category: category.parse().unwrap_or_default(),
        confidence: row.get(3)?,
        created_at: from_millis(row.get(4)?),
        updated_at: from_millis(row.get(5)?),
    })
}

/// Highest confidence first, most recently updated among equals, at most
/// `limit`. Same order as [`FactStore::top_by_confidence`], for facts that did
/// not come out of SQLite already ordered.
pub fn rank_facts(mut facts: Vec<UserFact>, limit: usize) -> Vec<UserFact> {
    facts.sort_by(|a, b| {
        b.confidence
            .total_cmp(&a.confidence)
            .then_with(|| b.updated_at.cmp(&a.updated_at))
    });
    facts.truncate(limit);
    facts
}

/// Joins ranked facts into one sentence for the system prompt. Empty input
/// yields an empty string, which callers treat as "no context".
pub fn format_facts_prompt(facts: &[UserFact]) -> String {
    let parts: Vec<&str> = facts
        .iter()
        .map(|f| f.fact.trim().trim_end_matches('.'))
        .filter(|f| !f.is_empty())
        .collect();

    if parts.is_empty() {
        return String::new();
    }

    format!("{}{}.", PROMPT_PREFIX, parts.join(". "))
}
