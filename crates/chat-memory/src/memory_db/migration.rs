//! Database migration system
//!
//! Upgrades are a fixed, ordered list of idempotent "ensure" steps that run on
//! every open regardless of the stored version, so a database several versions
//! behind is brought current in a single pass.

use rusqlite::{Connection, OptionalExtension, Result};
use tracing::{debug, info, warn};

use crate::memory_db::schema::{self, ColumnSpec, IndexSpec};

/// What a call to [`MigrationManager::initialize_database`] changed.
#[derive(Debug, Clone, Default)]
pub struct MigrationReport {
    pub previous_version: i32,
    pub current_version: i32,
    pub added_columns: Vec<&'static str>,
    pub created_indexes: Vec<&'static str>,
}

/// Manages database schema migrations
pub struct MigrationManager<'a> {
    conn: &'a mut Connection,
}

impl<'a> MigrationManager<'a> {
    pub fn new(conn: &'a mut Connection) -> Self {
        Self { conn }
    }

    /// Bring the database up to [`schema::CURRENT_SCHEMA_VERSION`].
    pub fn initialize_database(&mut self) -> Result<MigrationReport> {
        info!("Initializing memory database schema...");

        self.conn.execute(
            "CREATE TABLE IF NOT EXISTS schema_version (
                version INTEGER PRIMARY KEY,
                applied_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
            )",
            [],
        )?;

        let previous_version = self.get_current_version()?;
        info!("Current database schema version: {}", previous_version);

        let tx = self.conn.transaction()?;

        for (table, ddl) in schema::TABLES {
            debug!("Ensuring table {}", table);
            tx.execute_batch(ddl)?;
        }

        let mut added_columns = Vec::new();
        for spec in schema::COLUMNS {
            if ensure_column(&tx, spec)? {
                added_columns.push(spec.column);
            }
        }

        let mut created_indexes = Vec::new();
        for spec in schema::INDEXES {
            if ensure_index(&tx, spec)? {
                created_indexes.push(spec.name);
            }
        }

        if previous_version < schema::CURRENT_SCHEMA_VERSION {
            tx.execute(
                "INSERT OR IGNORE INTO schema_version (version) VALUES (?1)",
                [schema::CURRENT_SCHEMA_VERSION],
            )?;
        } else if previous_version > schema::CURRENT_SCHEMA_VERSION {
            warn!(
                "Database schema version {} is newer than supported version {}",
                previous_version,
                schema::CURRENT_SCHEMA_VERSION
            );
        }

        tx.commit()?;

        if !created_indexes.is_empty() || !added_columns.is_empty() {
            info!(
                "Schema upgraded {} -> {} (columns: {:?}, indexes: {:?})",
                previous_version,
                schema::CURRENT_SCHEMA_VERSION,
                added_columns,
                created_indexes
            );
        }

        Ok(MigrationReport {
            previous_version,
            current_version: previous_version.max(schema::CURRENT_SCHEMA_VERSION),
            added_columns,
            created_indexes,
        })
    }

    pub fn get_current_version(&self) -> Result<i32> {
        current_version(self.conn)
    }
}

pub fn current_version(conn: &Connection) -> Result<i32> {
    conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |row| row.get(0),
    )
    .or_else(|_| Ok(0))
}

pub fn index_exists(conn: &Connection, name: &str) -> Result<bool> {
    conn.query_row(
        "SELECT 1 FROM sqlite_master WHERE type = 'index' AND name = ?1",
        [name],
        |_| Ok(1),
    )
    .optional()
    .map(|found| found.is_some())
}

fn column_exists(conn: &Connection, table: &str, column: &str) -> Result<bool> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", table))?;
    let names = stmt
        .query_map([], |row| row.get::<_, String>(1))?
        .collect::<Result<Vec<_>>>()?;
    Ok(names.iter().any(|name| name == column))
}

fn ensure_column(conn: &Connection, spec: &ColumnSpec) -> Result<bool> {
    if column_exists(conn, spec.table, spec.column)? {
        return Ok(false);
    }
    info!("Adding column {}.{}", spec.table, spec.column);
    conn.execute_batch(&format!(
        "ALTER TABLE {} ADD COLUMN {} {}",
        spec.table, spec.column, spec.declaration
    ))?;
    Ok(true)
}

fn ensure_index(conn: &Connection, spec: &IndexSpec) -> Result<bool> {
    if index_exists(conn, spec.name)? {
        return Ok(false);
    }
    info!("Creating index {} on {}({})", spec.name, spec.table, spec.column);
    conn.execute_batch(&format!(
        "CREATE INDEX {} ON {} ({})",
        spec.name, spec.table, spec.column
    ))?;
    Ok(true)
}

/// Row counts and on-disk size. Missing tables count as zero.
pub fn get_database_stats(conn: &Connection) -> Result<schema::DatabaseStats> {
    fn get_table_count(conn: &Connection, table_name: &str) -> Result<i64> {
        conn.query_row(&format!("SELECT COUNT(*) FROM {}", table_name), [], |row| row.get(0))
            .or_else(|e| {
                warn!("Failed to get count from table {}: {}", table_name, e);
                Ok(0)
            })
    }

    let database_size_bytes: i64 = conn
        .query_row(
            "SELECT page_count * page_size FROM pragma_page_count(), pragma_page_size()",
            [],
            |row| row.get(0),
        )
        .unwrap_or(0);

    Ok(schema::DatabaseStats {
        schema_version: current_version(conn)?,
        total_sessions: get_table_count(conn, "sessions")?,
        total_messages: get_table_count(conn, "messages")?,
        total_facts: get_table_count(conn, "facts")?,
        database_size_bytes,
    })
}
