//! Cross-session knowledge base: category-partitioned entries on disk,
//! git-tracked, consolidated by LLM when they outgrow their budget, and
//! retrievable by keyword scoring.

pub mod consolidator;
pub mod retrieval;
pub mod store;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use crate::config::MemoryConfig;
use crate::error::MemoryError;
use crate::llm::LlmAdapter;

pub use consolidator::Consolidator;
pub use retrieval::{SearchHit, DEFAULT_MIN_SCORE};
pub use store::{CategoryEntries, GitMemoryStore, MemoryCategory};

/// Agent-facing long-term memory. Owns the git-backed store and the
/// consolidator; shared across sessions. All mutation goes through `&mut
/// self`, which serializes writers.
pub struct LongTermMemory {
    store: GitMemoryStore,
    consolidator: Consolidator,
    memories: CategoryEntries,
    /// Creation times for entries added in this process — the on-disk format
    /// is plain strings, so only these earn the recency bonus in scoring.
    recorded_at: HashMap<String, DateTime<Utc>>,
    min_score: f64,
    loaded: bool,
}

impl LongTermMemory {
    pub fn new(llm: Arc<dyn LlmAdapter>, config: &MemoryConfig) -> Self {
        Self::with_dir(llm, config.memory_dir(), config.consolidation_threshold)
    }

    pub fn with_dir(
        llm: Arc<dyn LlmAdapter>,
        dir: impl Into<PathBuf>,
        consolidation_threshold: u64,
    ) -> Self {
        Self {
            store: GitMemoryStore::new(dir),
            consolidator: Consolidator::new(llm, consolidation_threshold),
            memories: store::empty_entries(),
            recorded_at: HashMap::new(),
            min_score: DEFAULT_MIN_SCORE,
            loaded: false,
        }
    }

    pub fn with_min_score(mut self, min_score: f64) -> Self {
        self.min_score = min_score;
        self
    }

    /// Read all categories from disk on first use.
    async fn ensure_loaded(&mut self) -> Result<(), MemoryError> {
        if !self.loaded {
            self.memories = self.store.load_all().await?;
            self.loaded = true;
        }
        Ok(())
    }

    /// Save a new entry and commit it.
    pub async fn remember(
        &mut self,
        content: impl Into<String>,
        category: MemoryCategory,
    ) -> Result<(), MemoryError> {
        self.ensure_loaded().await?;
        let content = content.into();
        self.memories.entry(category).or_default().push(content.clone());
        self.recorded_at.insert(content, Utc::now());
        self.store
            .save_and_commit(&self.memories, &format!("memory: add {category} entry"))
            .await
    }

    /// Delete the first entry in `category` equal to `entry`. Returns
    /// whether anything was removed.
    pub async fn forget(
        &mut self,
        category: MemoryCategory,
        entry: &str,
    ) -> Result<bool, MemoryError> {
        self.ensure_loaded().await?;
        let entries = self.memories.entry(category).or_default();
        let Some(pos) = entries.iter().position(|e| e == entry) else {
            return Ok(false);
        };
        entries.remove(pos);
        self.recorded_at.remove(entry);
        self.store
            .save_and_commit(&self.memories, &format!("memory: remove {category} entry"))
            .await?;
        Ok(true)
    }

    /// All entries in one category.
    pub async fn entries(&mut self, category: MemoryCategory) -> Result<&[String], MemoryError> {
        self.ensure_loaded().await?;
        Ok(self
            .memories
            .get(&category)
            .map(Vec::as_slice)
            .unwrap_or(&[]))
    }

    /// The full category map.
    pub async fn all_entries(&mut self) -> Result<&CategoryEntries, MemoryError> {
        self.ensure_loaded().await?;
        Ok(&self.memories)
    }

    /// Keyword search across categories, best hits first.
    pub async fn recall(
        &mut self,
        query: &str,
        category: Option<MemoryCategory>,
        limit: usize,
    ) -> Result<Vec<SearchHit>, MemoryError> {
        self.ensure_loaded().await?;
        let query_keywords = retrieval::extract_keywords(query);
        let now = Utc::now();

        let mut hits = Vec::new();
        for (&cat, entries) in &self.memories {
            if category.is_some_and(|wanted| wanted != cat) {
                continue;
            }
            for entry in entries {
                let score = retrieval::score_entry(
                    entry,
                    cat,
                    self.recorded_at.get(entry).copied(),
                    query,
                    &query_keywords,
                    now,
                );
                if score >= self.min_score {
                    hits.push(SearchHit {
                        content: entry.clone(),
                        category: cat,
                        score,
                    });
                }
            }
        }

        hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        hits.truncate(limit);
        Ok(hits)
    }

    /// Run LLM consolidation when the store has outgrown its budget.
    /// Re-reads first if someone else committed since our load. A failed
    /// LLM pass is logged and skipped — the store stays as it was.
    pub async fn consolidate_if_needed(&mut self) -> Result<bool, MemoryError> {
        self.ensure_loaded().await?;
        if !self.consolidator.should_consolidate(&self.memories) {
            return Ok(false);
        }

        if self.store.has_changed_since_load().await? {
            info!("long-term store changed externally, re-reading before consolidation");
            self.memories = self.store.load_all().await?;
            self.prune_recorded();
            if !self.consolidator.should_consolidate(&self.memories) {
                return Ok(false);
            }
        }

        let before: usize = self.memories.values().map(Vec::len).sum();
        let consolidated = match self.consolidator.consolidate(&self.memories).await {
            Ok(consolidated) => consolidated,
            Err(e) => {
                warn!(error = %e, "consolidation failed, keeping entries as-is");
                return Ok(false);
            }
        };

        self.memories = consolidated;
        self.prune_recorded();
        self.store
            .save_and_commit(&self.memories, "memory: consolidate entries")
            .await?;

        let after: usize = self.memories.values().map(Vec::len).sum();
        info!(before, after, "consolidated long-term memory");
        Ok(true)
    }

    /// Drop creation times for entries that no longer exist.
    fn prune_recorded(&mut self) {
        let memories = &self.memories;
        self.recorded_at
            .retain(|content, _| memories.values().any(|entries| entries.contains(content)));
    }
}
