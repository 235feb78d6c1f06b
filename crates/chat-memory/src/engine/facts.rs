//! User facts and the prompt snippet built from them.

use tracing::{debug, error, warn};

use super::MemoryEngine;
use crate::error::{MemoryError, Result};
use crate::memory_db::fact_store::{format_facts_prompt, rank_facts};
use crate::memory_db::{now_millis, time_derived_id, FactCategory, UserFact};

/// Confidence given to facts when the caller has no better estimate.
pub const DEFAULT_FACT_CONFIDENCE: f64 = 0.8;

impl MemoryEngine {
    /// Stores a fact and returns its id. Fails only when neither backend
    /// accepted the write.
    pub async fn save_fact(&self, fact: impl Into<String>, category: FactCategory, confidence: f64) -> Result<String> {
        self.init().await;

        let now = now_millis();
        let record = UserFact {
            id: time_derived_id("fact"),
            fact: fact.into(),
            category,
            confidence,
            created_at: now,
            updated_at: now,
        };

        let to_insert = record.clone();
        match self.run_primary("save_fact", move |db| db.facts.insert(&to_insert)).await {
            Some(Ok(())) => {
                self.counters.inc_primary_writes();
                debug!("Saved {} fact {}", record.category, record.id);
                return Ok(record.id);
            }
            Some(Err(e)) => warn!("{}; writing fact {} to fallback store", e, record.id),
            None => {}
        }

        self.fallback.append_fact(&record).map_err(|e| {
            error!("Fallback store rejected fact {}: {:#}", record.id, e);
            MemoryError::Fallback(e)
        })?;
        self.counters.inc_fallback_writes();
        Ok(record.id)
    }

    /// Every fact, oldest first.
    pub async fn get_all_facts(&self) -> Vec<UserFact> {
        self.read_with_fallback("get_all_facts", |db| db.facts.all(), || self.fallback.facts())
            .await
    }

    pub async fn get_facts_by_category(&self, category: FactCategory) -> Vec<UserFact> {
        self.read_with_fallback(
            "get_facts_by_category",
            move |db| db.facts.by_category(category),
            || {
                self.fallback
                    .facts()
                    .into_iter()
                    .filter(|f| f.category == category)
                    .collect()
            },
        )
        .await
    }

    /// The highest-confidence facts as one sentence for a system prompt, or
    /// an empty string when nothing is known.
    pub async fn get_facts_for_prompt(&self) -> String {
        let limit = self.config.prompt_fact_limit;
        let facts = self
            .read_with_fallback(
                "get_facts_for_prompt",
                move |db| db.facts.top_by_confidence(limit),
                || rank_facts(self.fallback.facts(), limit),
            )
            .await;
        format_facts_prompt(&facts)
    }

    /// Removes the fact from both backends. Returns whether either held it.
    pub async fn delete_fact(&self, id: &str) -> bool {
        self.init().await;
        let fact_id = id.to_string();
        let in_primary = match self.run_primary("delete_fact", move |db| db.facts.delete(&fact_id)).await {
            Some(Ok(deleted)) => deleted,
            Some(Err(e)) => {
                warn!("{}", e);
                false
            }
            None => false,
        };
        let in_fallback = self.fallback.remove_fact(id).unwrap_or_else(|e| {
            warn!("Failed to remove fact {} from fallback store: {:#}", id, e);
            false
        });
        in_primary || in_fallback
    }

    pub async fn clear_facts(&self) {
        self.init().await;
        if let Some(Err(e)) = self.run_primary("clear_facts", |db| db.facts.clear()).await {
            warn!("{}", e);
        }
        if let Err(e) = self.fallback.clear_facts() {
            warn!("Failed to clear fallback facts: {:#}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MemoryConfig;
    use crate::memory_db::fact_store::PROMPT_PREFIX;

    async fn engine(config: MemoryConfig) -> MemoryEngine {
        MemoryEngine::open(config).await.unwrap()
    }

    #[tokio::test]
    async fn prompt_lists_facts_by_confidence() {
        let engine = engine(MemoryConfig::in_memory()).await;
        assert_eq!(engine.get_facts_for_prompt().await, "");

        engine.save_fact("Likes hiking.", FactCategory::Preference, 0.6).await.unwrap();
        engine.save_fact("Name is Frank", FactCategory::Personal, 0.95).await.unwrap();

        assert_eq!(
            engine.get_facts_for_prompt().await,
            format!("{}Name is Frank. Likes hiking.", PROMPT_PREFIX)
        );
    }

    #[tokio::test]
    async fn prompt_respects_configured_limit() {
        let config = MemoryConfig {
            prompt_fact_limit: 2,
            ..MemoryConfig::in_memory()
        };
        let engine = engine(config).await;
        for (i, confidence) in [0.1, 0.9, 0.5, 0.7].into_iter().enumerate() {
            engine
                .save_fact(format!("fact {}", i), FactCategory::Other, confidence)
                .await
                .unwrap();
        }
        assert_eq!(engine.get_facts_for_prompt().await, format!("{}fact 1. fact 3.", PROMPT_PREFIX));
    }

    #[tokio::test]
    async fn category_filter_and_delete() {
        let engine = engine(MemoryConfig::in_memory()).await;
        let tea = engine.save_fact("Drinks tea", FactCategory::Preference, DEFAULT_FACT_CONFIDENCE).await.unwrap();
        engine.save_fact("Lives in Lyon", FactCategory::Personal, DEFAULT_FACT_CONFIDENCE).await.unwrap();

        let prefs = engine.get_facts_by_category(FactCategory::Preference).await;
        assert_eq!(prefs.len(), 1);
        assert_eq!(prefs[0].id, tea);

        assert!(engine.delete_fact(&tea).await);
        assert!(!engine.delete_fact(&tea).await);
        assert_eq!(engine.get_all_facts().await.len(), 1);

        engine.clear_facts().await;
        assert!(engine.get_all_facts().await.is_empty());
    }

    #[tokio::test]
    async fn degraded_facts_use_fallback_store() {
        let engine = engine(MemoryConfig::fallback_only()).await;
        engine.save_fact("Low", FactCategory::Other, 0.2).await.unwrap();
        let high = engine.save_fact("High", FactCategory::Context, 0.9).await.unwrap();

        assert_eq!(engine.get_all_facts().await.len(), 2);
        assert_eq!(engine.get_facts_by_category(FactCategory::Context).await[0].id, high);
        assert_eq!(engine.get_facts_for_prompt().await, format!("{}High. Low.", PROMPT_PREFIX));
        assert_eq!(engine.counters().fallback_writes, 2);
    }
}
