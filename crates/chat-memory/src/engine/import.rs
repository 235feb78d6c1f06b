//! JSON export/import and the one-time move of pre-session history into the
//! embedded database.

use serde_json::Value;
use tracing::{info, warn};

use super::{MemoryEngine, NewMessage};
use crate::error::{MemoryError, Result};
use crate::fallback::{LEGACY_BACKUP_KEY, LEGACY_MESSAGES_KEY};
use crate::memory_db::{parse_timestamp, Role};

/// Turns one exported or legacy JSON record into a [`NewMessage`].
///
/// `role` is required. A missing `content` reads as empty. An unparseable
/// `timestamp` is dropped so the save stamps the current time.
pub fn parse_message_record(record: Value) -> Result<NewMessage> {
    let Value::Object(mut fields) = record else {
        return Err(MemoryError::MalformedImport("record is not an object".into()));
    };

    let role: Role = fields
        .get("role")
        .and_then(Value::as_str)
        .ok_or_else(|| MemoryError::MalformedImport("record has no role".into()))?
        .parse()
        .map_err(|e: anyhow::Error| MemoryError::MalformedImport(e.to_string()))?;

    let content = match fields.remove("content") {
        Some(Value::String(content)) => content,
        None | Some(Value::Null) => String::new(),
        Some(other) => return Err(MemoryError::MalformedImport(format!("content is not a string: {}", other))),
    };

    let mut message = NewMessage::new(role, content);

    match fields.get("id") {
        Some(Value::String(id)) if !id.is_empty() => message.id = Some(id.clone()),
        Some(Value::Number(id)) => message.id = Some(id.to_string()),
        _ => {}
    }

    if let Some(raw) = fields.get("timestamp") {
        message.timestamp = parse_timestamp(raw);
        if message.timestamp.is_none() {
            warn!("Unparseable timestamp {} on imported record, using import time", raw);
        }
    }

    message.session_id = fields
        .get("sessionId")
        .or_else(|| fields.get("session_id"))
        .and_then(Value::as_str)
        .filter(|id| !id.is_empty())
        .map(str::to_string);

    if let Some(Value::Object(metadata)) = fields.remove("metadata") {
        message.metadata = metadata;
    }

    Ok(message)
}

impl MemoryEngine {
    /// Pretty-printed JSON array of every message, oldest first.
    pub async fn export_messages(&self) -> Result<String> {
        let messages = self.get_all_messages().await;
        Ok(serde_json::to_string_pretty(&messages)?)
    }

    /// Saves every record of a JSON array exported by
    /// [`export_messages`](Self::export_messages) (or shaped like one).
    /// Bad records are skipped; the count of newly stored messages is returned.
    pub async fn import_messages(&self, data: &str) -> Result<usize> {
        let records = parse_record_array(data)?;
        self.init().await;

        let total = records.len();
        let imported = self.save_records(records, "import").await;
        info!("Imported {} of {} records", imported, total);
        Ok(imported)
    }

    async fn save_records(&self, records: Vec<Value>, source: &str) -> usize {
        let mut saved = 0;
        for (index, record) in records.into_iter().enumerate() {
            let message = match parse_message_record(record) {
                Ok(message) => message,
                Err(e) => {
                    warn!("Skipping {} record {}: {}", source, index, e);
                    continue;
                }
            };
            match self.write_message(message).await {
                Ok((_, true)) => saved += 1,
                Ok((id, false)) => info!("Skipping {} record {}: message {} already stored", source, index, id),
                Err(e) => warn!("Failed to store {} record {}: {}", source, index, e),
            }
        }
        saved
    }

    /// Moves the flat pre-session history into the embedded database, keeps a
    /// backup copy, then removes the original key. A payload that is not a
    /// JSON array is left untouched.
    pub(super) async fn migrate_legacy_messages(&self) -> usize {
        let storage = self.fallback.storage();
        let raw = match storage.get_item(LEGACY_MESSAGES_KEY) {
            Ok(Some(raw)) => raw,
            Ok(None) => return 0,
            Err(e) => {
                warn!("Failed to read legacy history: {:#}", e);
                return 0;
            }
        };

        let records = match parse_record_array(&raw) {
            Ok(records) => records,
            Err(e) => {
                warn!("Leaving legacy history in place: {}", e);
                return 0;
            }
        };

        info!("Migrating {} legacy records", records.len());
        let migrated = self.save_records(records, "legacy").await;
        self.counters.add_migrated_messages(migrated);

        if let Err(e) = storage.set_item(LEGACY_BACKUP_KEY, &raw) {
            warn!("Failed to back up legacy history, keeping the original: {:#}", e);
            return migrated;
        }
        if let Err(e) = storage.remove_item(LEGACY_MESSAGES_KEY) {
            warn!("Failed to remove legacy history after backup: {:#}", e);
        }
        migrated
    }
}

fn parse_record_array(data: &str) -> Result<Vec<Value>> {
    match serde_json::from_str::<Value>(data) {
        Ok(Value::Array(records)) => Ok(records),
        Ok(other) => Err(MemoryError::MalformedImport(format!(
            "expected a JSON array, found {}",
            json_kind(&other)
        ))),
        Err(e) => Err(MemoryError::MalformedImport(e.to_string())),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MemoryConfig;
    use crate::kv_storage::{InMemoryStorage, KeyValueStorage};
    use crate::memory_db::from_millis;
    use serde_json::json;
    use std::sync::Arc;

    #[test]
    fn record_parsing_is_lenient_where_it_can_be() {
        let message = parse_message_record(json!({
            "id": 42,
            "role": "USER",
            "timestamp": "yesterday-ish",
            "metadata": {"k": 1}
        }))
        .unwrap();
        assert_eq!(message.id.as_deref(), Some("42"));
        assert_eq!(message.role, Role::User);
        assert_eq!(message.content, "");
        assert!(message.timestamp.is_none());
        assert_eq!(message.metadata["k"], 1);

        assert!(parse_message_record(json!({"content": "no role"})).is_err());
        assert!(parse_message_record(json!({"role": "system", "content": "x"})).is_err());
        assert!(parse_message_record(json!("just text")).is_err());
    }

    #[tokio::test]
    async fn export_then_import_into_a_fresh_engine() {
        let source = MemoryEngine::open(MemoryConfig::in_memory()).await.unwrap();
        source
            .save_message(NewMessage::user("first").with_timestamp(from_millis(1_700_000_000_000)))
            .await
            .unwrap();
        source
            .save_message(NewMessage::assistant("second").with_timestamp(from_millis(1_700_000_001_000)))
            .await
            .unwrap();
        let exported = source.export_messages().await.unwrap();

        let target = MemoryEngine::open(MemoryConfig::in_memory()).await.unwrap();
        assert_eq!(target.import_messages(&exported).await.unwrap(), 2);

        let original = source.get_all_messages().await;
        let copied = target.get_all_messages().await;
        assert_eq!(copied.len(), 2);
        for (a, b) in original.iter().zip(&copied) {
            assert_eq!(a.id, b.id);
            assert_eq!(a.role, b.role);
            assert_eq!(a.content, b.content);
            assert_eq!(a.timestamp, b.timestamp);
        }

        // importing again stores nothing new
        assert_eq!(target.import_messages(&exported).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn import_skips_bad_records_and_rejects_non_arrays() {
        let engine = MemoryEngine::open(MemoryConfig::in_memory()).await.unwrap();
        let data = json!([
            {"role": "user", "content": "ok", "timestamp": 1_700_000_000_000i64},
            {"content": "missing role"},
            {"role": "assistant", "content": "bad time", "timestamp": "not a date"}
        ])
        .to_string();

        assert_eq!(engine.import_messages(&data).await.unwrap(), 2);
        assert_eq!(engine.get_message_count().await, 2);

        assert!(matches!(
            engine.import_messages("{\"role\": \"user\"}").await,
            Err(MemoryError::MalformedImport(_))
        ));
        assert!(matches!(engine.import_messages("not json").await, Err(MemoryError::MalformedImport(_))));
    }

    #[tokio::test]
    async fn legacy_history_is_migrated_once_and_backed_up() {
        let storage = Arc::new(InMemoryStorage::new());
        let legacy = json!([
            {"role": "user", "content": "Plan a trip to Rome", "timestamp": "2024-03-01T10:00:00Z"},
            {"role": "assistant", "content": "Sure!", "timestamp": "2024-03-01T10:00:05Z"}
        ])
        .to_string();
        storage.set_item(LEGACY_MESSAGES_KEY, &legacy).unwrap();

        let engine = MemoryEngine::new(MemoryConfig::in_memory(), storage.clone());
        engine.init().await;

        assert_eq!(engine.get_message_count().await, 2);
        assert_eq!(storage.get_item(LEGACY_MESSAGES_KEY).unwrap(), None);
        assert_eq!(storage.get_item(LEGACY_BACKUP_KEY).unwrap().as_deref(), Some(legacy.as_str()));
        assert_eq!(engine.counters().migrated_messages, 2);

        let current = engine.current_session_id().unwrap();
        let session = engine.get_session(&current).await.unwrap();
        assert_eq!(session.title, "Plan a trip to Rome");
        assert_eq!(session.message_count, 2);
    }

    #[tokio::test]
    async fn unparseable_legacy_history_is_left_alone() {
        let storage = Arc::new(InMemoryStorage::new());
        storage.set_item(LEGACY_MESSAGES_KEY, "{broken").unwrap();

        let engine = MemoryEngine::new(MemoryConfig::in_memory(), storage.clone());
        engine.init().await;

        assert_eq!(engine.get_message_count().await, 0);
        assert_eq!(storage.get_item(LEGACY_MESSAGES_KEY).unwrap().as_deref(), Some("{broken"));
        assert_eq!(storage.get_item(LEGACY_BACKUP_KEY).unwrap(), None);
    }

    #[tokio::test]
    async fn degraded_engine_does_not_migrate() {
        let storage = Arc::new(InMemoryStorage::new());
        storage.set_item(LEGACY_MESSAGES_KEY, "[]").unwrap();

        let engine = MemoryEngine::new(MemoryConfig::fallback_only(), storage.clone());
        engine.init().await;
        assert_eq!(storage.get_item(LEGACY_MESSAGES_KEY).unwrap().as_deref(), Some("[]"));
    }
}
