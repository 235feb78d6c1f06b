// chat-memory/crates/chat-memory/src/lib.rs

pub mod config;
pub mod engine;
pub mod error;
pub mod fallback;
pub mod kv_storage;
pub mod memory_db;
pub mod metrics;
pub mod telemetry;
pub mod utils;

// Public API exports
pub use config::MemoryConfig;
pub use engine::{parse_message_record, EngineState, MemoryEngine, NewMessage, DEFAULT_FACT_CONFIDENCE};
pub use error::{MemoryError, Result};
pub use fallback::FallbackStore;
pub use kv_storage::{FileStorage, InMemoryStorage, KeyValueStorage};
pub use memory_db::{ChatSession, DatabaseStats, FactCategory, MemoryDatabase, Role, StoredMessage, UserFact};
pub use metrics::CounterSnapshot;
