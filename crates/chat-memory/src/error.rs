//! Error taxonomy surfaced by the memory engine.
//!
//! Most variants are only ever logged: the engine recovers locally by routing
//! to the fallback store, scanning, or returning an empty result. They reach
//! the caller only when no safe default exists.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum MemoryError {
    /// The embedded database cannot be used at all in this environment.
    #[error("embedded database unavailable: {0}")]
    EngineUnavailable(String),

    /// A single read or write against the embedded database failed.
    #[error("{operation} failed on the embedded database: {source}")]
    TransactionFailed {
        operation: &'static str,
        #[source]
        source: anyhow::Error,
    },

    /// An import payload (or one record in it) could not be parsed.
    #[error("malformed import: {0}")]
    MalformedImport(String),

    /// A session-scoped read ran before the session index existed.
    #[error("index {index} is missing")]
    IndexMissing { index: &'static str },

    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The fallback key-value store failed as well.
    #[error("fallback store failed: {0}")]
    Fallback(#[source] anyhow::Error),
}

impl MemoryError {
    pub fn transaction(operation: &'static str, source: anyhow::Error) -> Self {
        MemoryError::TransactionFailed { operation, source }
    }
}

pub type Result<T> = std::result::Result<T, MemoryError>;
