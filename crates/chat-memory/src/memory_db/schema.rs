//! Database schema definitions for the memory system
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

/// Bumped whenever a table, column or index is added to the ensure steps below.
pub const CURRENT_SCHEMA_VERSION: i32 = 4;

/// Title every session starts with until its first user message arrives.
pub const DEFAULT_SESSION_TITLE: &str = "New Chat";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            other => Err(anyhow::anyhow!("Unknown message role: {}", other)),
        }
    }
}

/// A single chat message. Immutable once written apart from `metadata`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredMessage {
    pub id: String,
    pub role: Role,
    #[serde(default)]
    pub content: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FactCategory {
    Personal,
    Preference,
    Context,
    #[default]
    Other,
}

impl FactCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            FactCategory::Personal => "personal",
            FactCategory::Preference => "preference",
            FactCategory::Context => "context",
            FactCategory::Other => "other",
        }
    }
}

impl fmt::Display for FactCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FactCategory {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "personal" => Ok(FactCategory::Personal),
            "preference" => Ok(FactCategory::Preference),
            "context" => Ok(FactCategory::Context),
            "other" => Ok(FactCategory::Other),
            other => Err(anyhow::anyhow!("Unknown fact category: {}", other)),
        }
    }
}

/// Something inferred about the user. `confidence` is only ever used for ranking.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserFact {
    pub id: String,
    pub fact: String,
    #[serde(default)]
    pub category: FactCategory,
    pub confidence: f64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatSession {
    pub id: String,
    pub title: String,
    pub created_at: DateTime<Utc>,
    pub last_message_at: DateTime<Utc>,
    pub message_count: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct DatabaseStats {
    pub schema_version: i32,
    pub total_sessions: i64,
    pub total_messages: i64,
    pub total_facts: i64,
    pub database_size_bytes: i64,
}

/// Current time truncated to the millisecond precision stored on disk.
pub fn now_millis() -> DateTime<Utc> {
    from_millis(Utc::now().timestamp_millis())
}

pub fn from_millis(millis: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(millis).single().unwrap_or_default()
}

/// Prefix plus a millisecond timestamp plus a short random suffix, e.g. `msg_1718000000000_3f9a1c2e`.
pub fn time_derived_id(prefix: &str) -> String {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("{}_{}_{}", prefix, Utc::now().timestamp_millis(), &suffix[..8])
}

/// Lenient timestamp parsing for imported and legacy records.
///
/// Accepts RFC 3339 strings, a few common SQL-style layouts, and integer
/// milliseconds since the epoch.
pub fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::Number(n) => n.as_i64().and_then(|ms| Utc.timestamp_millis_opt(ms).single()),
        Value::String(s) => parse_datetime_safe(s),
        _ => None,
    }
}

fn parse_datetime_safe(datetime_str: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(datetime_str) {
        return Some(from_millis(dt.with_timezone(&Utc).timestamp_millis()));
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(datetime_str, "%Y-%m-%d %H:%M:%S") {
        return Some(DateTime::from_naive_utc_and_offset(dt, Utc));
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(datetime_str, "%Y-%m-%d %H:%M:%S%.f") {
        return Some(from_millis(DateTime::<Utc>::from_naive_utc_and_offset(dt, Utc).timestamp_millis()));
    }
    datetime_str.parse::<i64>().ok().and_then(|ms| Utc.timestamp_millis_opt(ms).single())
}

/// Table definitions. Every statement is `IF NOT EXISTS`; columns added after
/// version 1 are listed separately in [`COLUMNS`] so old tables get them too.
pub const TABLES: &[(&str, &str)] = &[
    (
        "messages",
        "CREATE TABLE IF NOT EXISTS messages (
            id TEXT PRIMARY KEY,
            role TEXT NOT NULL,
            content TEXT NOT NULL DEFAULT '',
            timestamp INTEGER NOT NULL,
            session_id TEXT,
            metadata TEXT NOT NULL DEFAULT '{}'
        )",
    ),
    (
        "facts",
        "CREATE TABLE IF NOT EXISTS facts (
            id TEXT PRIMARY KEY,
            fact TEXT NOT NULL,
            category TEXT NOT NULL DEFAULT 'other',
            confidence REAL NOT NULL DEFAULT 0.8,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        )",
    ),
    (
        "sessions",
        "CREATE TABLE IF NOT EXISTS sessions (
            id TEXT PRIMARY KEY,
            title TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            last_message_at INTEGER NOT NULL,
            message_count INTEGER NOT NULL DEFAULT 0
        )",
    ),
    (
        "conversation_context",
        "CREATE TABLE IF NOT EXISTS conversation_context (
            session_id TEXT PRIMARY KEY,
            context_data TEXT NOT NULL DEFAULT '{}',
            updated_at INTEGER NOT NULL
        )",
    ),
];

#[derive(Debug, Clone, Copy)]
pub struct ColumnSpec {
    pub table: &'static str,
    pub column: &'static str,
    pub declaration: &'static str,
}

pub const COLUMNS: &[ColumnSpec] = &[
    ColumnSpec { table: "messages", column: "session_id", declaration: "TEXT" },
    ColumnSpec { table: "messages", column: "metadata", declaration: "TEXT NOT NULL DEFAULT '{}'" },
];

#[derive(Debug, Clone, Copy)]
pub struct IndexSpec {
    pub name: &'static str,
    pub table: &'static str,
    pub column: &'static str,
}

pub const MESSAGES_SESSION_INDEX: &str = "idx_messages_session";

pub const INDEXES: &[IndexSpec] = &[
    IndexSpec { name: "idx_messages_timestamp", table: "messages", column: "timestamp" },
    IndexSpec { name: "idx_messages_role", table: "messages", column: "role" },
    IndexSpec { name: MESSAGES_SESSION_INDEX, table: "messages", column: "session_id" },
    IndexSpec { name: "idx_facts_category", table: "facts", column: "category" },
    IndexSpec { name: "idx_facts_updated_at", table: "facts", column: "updated_at" },
    IndexSpec { name: "idx_sessions_created_at", table: "sessions", column: "created_at" },
    IndexSpec { name: "idx_sessions_last_message_at", table: "sessions", column: "last_message_at" },
];
