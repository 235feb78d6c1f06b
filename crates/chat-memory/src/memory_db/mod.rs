//! Memory database module - SQLite-based storage for messages, sessions and facts
pub mod schema;
pub mod migration;
pub mod message_store;
pub mod session_store;
pub mod fact_store;
pub mod context_store;
pub use schema::*;
pub use migration::{MigrationManager, MigrationReport};
pub use message_store::MessageStore;
pub use session_store::SessionStore;
pub use fact_store::FactStore;
pub use context_store::ContextStore;
use std::path::Path;
use std::sync::Arc;
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use tracing::{debug, info};

/// Handle to the primary backend. Cheap to clone; every clone shares one pool.
#[derive(Clone)]
pub struct MemoryDatabase {
    pub messages: MessageStore,
    pub sessions: SessionStore,
    pub facts: FactStore,
    pub contexts: ContextStore,
    pool: Arc<Pool<SqliteConnectionManager>>,
}

impl MemoryDatabase {
    /// Open (or create) the database file and run the schema steps.
    pub fn new(db_path: &Path, pool_size: u32) -> anyhow::Result<Self> {
        info!("Opening memory database at: {}", db_path.display());
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let manager = SqliteConnectionManager::file(db_path)
            .with_flags(
                rusqlite::OpenFlags::SQLITE_OPEN_READ_WRITE
                | rusqlite::OpenFlags::SQLITE_OPEN_CREATE
                | rusqlite::OpenFlags::SQLITE_OPEN_FULL_MUTEX,
            )
            .with_init(|conn| {
                conn.execute_batch(
                    "PRAGMA synchronous = NORMAL;
                     PRAGMA busy_timeout = 5000;",
                )
            });
        let pool = Pool::builder()
            .max_size(pool_size.max(1))
            .build(manager)
            .map_err(|e| anyhow::anyhow!("Failed to create connection pool: {}", e))?;

        {
            let mut conn = pool.get()?;
            conn.execute_batch("PRAGMA journal_mode = WAL;")?;
            let report = MigrationManager::new(&mut conn).initialize_database()?;
            debug!("Schema ready at version {}", report.current_version);
        }

        info!("Memory database initialized successfully");
        Ok(Self::from_pool(pool))
    }

    /// Private in-memory database. The pool holds a single connection so
    /// every store sees the same data, and that connection is never recycled:
    /// a replacement would open an empty database.
    pub fn new_in_memory() -> anyhow::Result<Self> {
        let manager = SqliteConnectionManager::memory();
        let pool = Pool::builder()
            .max_size(1)
            .max_lifetime(None)
            .idle_timeout(None)
            .build(manager)?;
        {
            let mut conn = pool.get()?;
            MigrationManager::new(&mut conn).initialize_database()?;
        }
        Ok(Self::from_pool(pool))
    }

    fn from_pool(pool: Pool<SqliteConnectionManager>) -> Self {
        let pool = Arc::new(pool);
        Self {
            messages: MessageStore::new(Arc::clone(&pool)),
            sessions: SessionStore::new(Arc::clone(&pool)),
            facts: FactStore::new(Arc::clone(&pool)),
            contexts: ContextStore::new(Arc::clone(&pool)),
            pool,
        }
    }

    /// Run `f` against a pooled connection.
    pub fn with_connection<T, F>(&self, f: F) -> anyhow::Result<T>
    where
        F: FnOnce(&mut rusqlite::Connection) -> anyhow::Result<T>,
    {
        let mut conn = self.pool.get()?;
        f(&mut conn)
    }

    pub fn get_stats(&self) -> anyhow::Result<DatabaseStats> {
        let conn = self.pool.get()?;
        Ok(migration::get_database_stats(&conn)?)
    }

    /// Flush the WAL into the main file. Called when the engine is disposed.
    pub fn checkpoint(&self) -> anyhow::Result<()> {
        let conn = self.pool.get()?;
        conn.execute_batch("PRAGMA wal_checkpoint(TRUNCATE);")?;
        Ok(())
    }
}
