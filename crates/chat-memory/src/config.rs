// chat-memory/crates/chat-memory/src/config.rs

use anyhow::{Context, Result};
use std::env;
use std::path::PathBuf;
use tracing::{info, warn};

use crate::fallback::DEFAULT_MESSAGE_CAP;
use crate::memory_db::fact_store::PROMPT_FACT_LIMIT;

#[derive(Debug, Clone)]
pub struct MemoryConfig {
    /// SQLite file. `None` keeps the database in memory for the process lifetime.
    pub db_path: Option<PathBuf>,
    /// When false the engine starts degraded and only the fallback store is used.
    pub primary_enabled: bool,
    pub pool_size: u32,
    /// Directory for the file-backed key-value store. `None` keeps it in memory.
    pub fallback_dir: Option<PathBuf>,
    pub fallback_message_cap: usize,
    pub prompt_fact_limit: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        let data_dir = PathBuf::from("./data");
        Self {
            db_path: Some(data_dir.join("memory.db")),
            primary_enabled: true,
            pool_size: 4,
            fallback_dir: Some(data_dir.join("kv")),
            fallback_message_cap: DEFAULT_MESSAGE_CAP,
            prompt_fact_limit: PROMPT_FACT_LIMIT,
        }
    }
}

impl MemoryConfig {
    pub fn from_env() -> Result<Self> {
        if let Err(e) = dotenvy::dotenv() {
            warn!("Failed to load .env file: {}. Using system environment variables.", e);
        } else {
            info!("Loaded environment variables from .env file");
        }

        let defaults = Self::default();

        let db_path = match env::var("MEMORY_DB_PATH") {
            Ok(path) if path == ":memory:" => None,
            Ok(path) => Some(PathBuf::from(path)),
            Err(_) => defaults.db_path,
        };

        let fallback_dir = match env::var("MEMORY_FALLBACK_DIR") {
            Ok(dir) if dir == ":memory:" => None,
            Ok(dir) => Some(PathBuf::from(dir)),
            Err(_) => defaults.fallback_dir,
        };

        Ok(Self {
            db_path,
            primary_enabled: parse_bool(
                &env::var("MEMORY_PRIMARY_ENABLED").unwrap_or_else(|_| "true".into()),
            )
            .context("MEMORY_PRIMARY_ENABLED must be true or false")?,
            pool_size: env::var("MEMORY_POOL_SIZE")
                .unwrap_or_else(|_| defaults.pool_size.to_string())
                .parse()
                .context("MEMORY_POOL_SIZE must be a positive integer")?,
            fallback_dir,
            fallback_message_cap: env::var("MEMORY_FALLBACK_MESSAGE_CAP")
                .unwrap_or_else(|_| defaults.fallback_message_cap.to_string())
                .parse()
                .context("MEMORY_FALLBACK_MESSAGE_CAP must be an integer")?,
            prompt_fact_limit: env::var("MEMORY_PROMPT_FACT_LIMIT")
                .unwrap_or_else(|_| defaults.prompt_fact_limit.to_string())
                .parse()
                .context("MEMORY_PROMPT_FACT_LIMIT must be an integer")?,
        })
    }

    /// Everything in memory: nothing touches the filesystem.
    pub fn in_memory() -> Self {
        Self {
            db_path: None,
            fallback_dir: None,
            ..Self::default()
        }
    }

    /// In-memory configuration with the embedded database switched off.
    pub fn fallback_only() -> Self {
        Self {
            primary_enabled: false,
            ..Self::in_memory()
        }
    }

    pub fn print_config(&self) {
        info!("Current Configuration:");
        match &self.db_path {
            Some(path) => info!("- Database: {}", path.display()),
            None => info!("- Database: in-memory"),
        }
        info!("- Primary Enabled: {}", self.primary_enabled);
        info!("- Pool Size: {}", self.pool_size);
        match &self.fallback_dir {
            Some(dir) => info!("- Fallback Store: {}", dir.display()),
            None => info!("- Fallback Store: in-memory"),
        }
        info!("- Fallback Message Cap: {}", self.fallback_message_cap);
        info!("- Prompt Fact Limit: {}", self.prompt_fact_limit);
    }
}

fn parse_bool(value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(anyhow::anyhow!("not a boolean: {}", other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_values() {
        let config = MemoryConfig::default();

        assert!(config.primary_enabled);
        assert_eq!(config.fallback_message_cap, 100);
        assert_eq!(config.prompt_fact_limit, 20);
        assert_eq!(config.db_path, Some(PathBuf::from("./data/memory.db")));
    }

    #[test]
    fn test_in_memory_config_has_no_paths() {
        let config = MemoryConfig::in_memory();
        assert!(config.db_path.is_none());
        assert!(config.fallback_dir.is_none());
        assert!(config.primary_enabled);

        let degraded = MemoryConfig::fallback_only();
        assert!(!degraded.primary_enabled);
        assert!(degraded.db_path.is_none());
    }

    #[test]
    fn test_parse_bool_variants() {
        assert!(parse_bool("TRUE").unwrap());
        assert!(parse_bool(" on ").unwrap());
        assert!(!parse_bool("0").unwrap());
        assert!(parse_bool("maybe").is_err());
    }
}
