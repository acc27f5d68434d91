//! Background scheduler (§4.7): a single `tokio::spawn`'d loop with a
//! staleness check before each run and a plain `tokio::time::sleep`
//! between ticks, living in the core crate since the scheduler is
//! explicitly in-scope here, not a host-side concern.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration as ChronoDuration, Utc};

use crate::classify::DiscoveredCategories;
use crate::config::EngineConfig;
use crate::embedding::{cosine_similarity, EmbeddingClient};
use crate::error::Result;
use crate::fact::{Category, DecayClass, Fact, Source, Tier};
use crate::llm::{ChatMessage, ChatRole, LlmClient};
use crate::store::{FactFilter, FactStore, StoreStats};
use crate::wal::{Wal, WalOperation};

#[cfg(feature = "vector-search")]
use crate::vector::VectorIndex;

/// Upper bound on rows scanned per tier-compaction pass. Compaction is a
/// background maintenance task, not a latency-sensitive path, so a large
/// flat limit stands in for unbounded pagination.
const COMPACTION_SCAN_LIMIT: usize = 100_000;

/// Summary of the on-startup recovery sequence (§4.7 "On startup").
#[derive(Debug, Clone)]
pub struct StartupReport {
    pub wal_entries_replayed: usize,
    pub vector_orphans_removed: usize,
    pub facts_pruned: usize,
    pub stats: StoreStats,
}

/// Owns the background timer and every periodic maintenance task.
pub struct Scheduler {
    store: Arc<FactStore>,
    #[cfg(feature = "vector-search")]
    vector_index: Option<Arc<Mutex<VectorIndex>>>,
    wal: Arc<Wal>,
    llm_client: Option<Arc<dyn LlmClient>>,
    embedding_client: Option<Arc<dyn EmbeddingClient>>,
    config: EngineConfig,
    shutdown: Arc<AtomicBool>,
    discovered_categories_path: PathBuf,
    discovered_categories: Mutex<DiscoveredCategories>,
}

impl Scheduler {
    pub fn new(
        store: Arc<FactStore>,
        #[cfg(feature = "vector-search")] vector_index: Option<Arc<Mutex<VectorIndex>>>,
        wal: Arc<Wal>,
        llm_client: Option<Arc<dyn LlmClient>>,
        embedding_client: Option<Arc<dyn EmbeddingClient>>,
        config: EngineConfig,
        discovered_categories_path: PathBuf,
    ) -> Self {
        let discovered_categories = DiscoveredCategories::load(&discovered_categories_path).unwrap_or_default();
        Self {
            store,
            #[cfg(feature = "vector-search")]
            vector_index,
            wal,
            llm_client,
            embedding_client,
            config,
            shutdown: Arc::new(AtomicBool::new(false)),
            discovered_categories_path,
            discovered_categories: Mutex::new(discovered_categories),
        }
    }

    /// A clone-able flag the owner can flip to stop the loop between ticks.
    pub fn shutdown_handle(&self) -> Arc<AtomicBool> {
        self.shutdown.clone()
    }

    /// WAL recovery -> vector-orphan sweep -> `prune_expired` -> stats
    /// (§4.7 "On startup"). Synchronous; call before `spawn`.
    pub fn run_startup_recovery(&self, now: DateTime<Utc>) -> Result<StartupReport> {
        let recovered = self.wal.recover(now)?;
        for entry in &recovered {
            if self.shutdown.load(Ordering::SeqCst) {
                break;
            }
            if let Err(e) = self.replay_wal_entry(&entry.operation) {
                tracing::warn!(error = %e, entry_id = %entry.entry_id, "failed to replay WAL entry, skipping");
            }
        }
        if !recovered.is_empty() {
            if let Err(e) = self.wal.clear() {
                tracing::warn!(error = %e, "failed to clear WAL after startup recovery");
            }
        }

        let mut vector_orphans_removed = 0;
        #[cfg(feature = "vector-search")]
        if let Some(index) = &self.vector_index {
            let live = self.store.live_ids()?;
            match index.lock() {
                Ok(mut index) => vector_orphans_removed = index.sweep_orphans(&live)?,
                Err(_) => tracing::warn!("vector index lock poisoned during startup orphan sweep"),
            }
        }

        let pruned = self.store.prune_expired(now)?;
        let stats = self.store.stats(now)?;

        Ok(StartupReport {
            wal_entries_replayed: recovered.len(),
            vector_orphans_removed,
            facts_pruned: pruned.len(),
            stats,
        })
    }

    fn replay_wal_entry(&self, op: &WalOperation) -> Result<()> {
        match op {
            WalOperation::Store { fact, embedding } | WalOperation::Update { fact, embedding } => {
                self.store.put(fact)?;
                self.repair_vector_from_wal(&fact.id, embedding.as_deref());
                Ok(())
            }
            WalOperation::Delete { id } => self.store.delete(id).map(|_| ()),
        }
    }

    /// Re-upserts a fact's embedding from its WAL payload (§4.3: "if the
    /// embedding was included in the WAL payload, no external embedding
    /// call is needed during recovery") — repairs a crash that landed the
    /// Fact Store commit but not the vector-index commit.
    #[cfg(feature = "vector-search")]
    fn repair_vector_from_wal(&self, fact_id: &str, embedding: Option<&[f32]>) {
        let (Some(vec), Some(index)) = (embedding, &self.vector_index) else { return };
        match index.lock() {
            Ok(mut index) => match index.add(fact_id, vec) {
                Ok(()) => {
                    if let Err(e) = self.store.mark_has_vector(fact_id, true) {
                        tracing::warn!(error = %e, fact_id = %fact_id, "failed to mark has_vector during WAL vector repair");
                    }
                    if let Err(e) = self.store.put_embedding(fact_id, vec, Utc::now()) {
                        tracing::warn!(error = %e, fact_id = %fact_id, "failed to persist embedding during WAL vector repair");
                    }
                }
                Err(e) => tracing::warn!(error = %e, fact_id = %fact_id, "failed to repair vector index from WAL payload"),
            },
            Err(_) => tracing::warn!(fact_id = %fact_id, "vector index lock poisoned during WAL vector repair"),
        }
    }

    #[cfg(not(feature = "vector-search"))]
    fn repair_vector_from_wal(&self, _fact_id: &str, _embedding: Option<&[f32]>) {}

    /// Spawn the periodic loop (§4.7 "every 60 minutes" / "every T days" /
    /// optional reclassify / optional reflection). All tasks run serially
    /// on this one task; none overlap.
    pub fn spawn(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move { self.run_loop().await })
    }

    async fn run_loop(self: Arc<Self>) {
        let mut last_compaction = Utc::now();
        let mut last_reclassify = Utc::now();
        let mut last_reflection = Utc::now();

        loop {
            if self.shutdown.load(Ordering::SeqCst) {
                return;
            }
            tokio::time::sleep(self.config.prune_interval).await;
            if self.shutdown.load(Ordering::SeqCst) {
                return;
            }

            let now = Utc::now();

            if let Err(e) = self.store.prune_expired(now) {
                tracing::warn!(error = %e, "scheduled prune_expired failed, will retry next tick");
            }
            if let Err(e) = self.store.decay_confidences(now) {
                tracing::warn!(error = %e, "scheduled decay_confidences failed, will retry next tick");
            }

            let compaction_interval = ChronoDuration::from_std(self.config.tier_compaction_interval).unwrap_or(ChronoDuration::zero());
            if now - last_compaction >= compaction_interval {
                if let Err(e) = self.compact_tiers_now(now) {
                    tracing::warn!(error = %e, "scheduled tier compaction failed, will retry next tick");
                } else {
                    last_compaction = now;
                }
            }

            let reclassify_interval = ChronoDuration::from_std(self.config.reclassify_interval).unwrap_or(ChronoDuration::zero());
            if let Some(llm) = self.llm_client.clone() {
                if now - last_reclassify >= reclassify_interval {
                    if let Err(e) = self.reclassify(llm.as_ref()).await {
                        tracing::warn!(error = %e, "scheduled reclassify failed, will retry next tick");
                    } else {
                        last_reclassify = now;
                    }
                }
            }

            let reflection_interval = ChronoDuration::from_std(self.config.reflection_interval).unwrap_or(ChronoDuration::zero());
            if let Some(llm) = self.llm_client.clone() {
                if now - last_reflection >= reflection_interval {
                    if let Err(e) = self.reflect(llm.as_ref(), now).await {
                        tracing::warn!(error = %e, "scheduled reflection failed, will retry next tick");
                    } else {
                        last_reflection = now;
                    }
                }
            }
        }
    }

    /// Tier compaction (§4.7 "every T days"). Public so `Engine::compact()`
    /// can trigger it synchronously outside the periodic loop.
    pub fn compact_tiers_now(&self, now: DateTime<Utc>) -> Result<()> {
        let inactive_threshold = ChronoDuration::days(self.config.inactive_preference_days);

        let blockers = self.store.list(
            &FactFilter { tag: Some("blocker".to_string()), ..Default::default() },
            self.config.hot_max_facts,
        )?;
        let mut hot_tokens = 0usize;
        for mut fact in blockers {
            let tokens = fact.text.split_whitespace().count();
            if hot_tokens + tokens > self.config.hot_max_tokens {
                break;
            }
            hot_tokens += tokens;
            if fact.tier != Tier::Hot {
                fact.tier = Tier::Hot;
                self.store.put(&fact)?;
            }
        }

        let hot_facts = self.store.list(&FactFilter { tier: Some(Tier::Hot), ..Default::default() }, COMPACTION_SCAN_LIMIT)?;
        for mut fact in hot_facts {
            if fact.tags.iter().any(|t| t == "blocker") {
                continue;
            }
            if now - fact.last_confirmed_at > inactive_threshold {
                fact.tier = Tier::Warm;
                self.store.put(&fact)?;
            }
        }

        let decisions = self.store.list(&FactFilter { category: Some(Category::Decision), ..Default::default() }, COMPACTION_SCAN_LIMIT)?;
        let tasks = self.store.list(&FactFilter { tag: Some("task".to_string()), ..Default::default() }, COMPACTION_SCAN_LIMIT)?;
        for mut fact in decisions.into_iter().chain(tasks) {
            if fact.tier == Tier::Cold {
                continue;
            }
            if now - fact.last_confirmed_at > inactive_threshold {
                fact.tier = Tier::Cold;
                self.store.put(&fact)?;
            }
        }

        Ok(())
    }

    /// Reclassify facts stuck in `other` via an external LLM (§4.7 "every
    /// 24 hours, optional").
    async fn reclassify(&self, llm: &dyn LlmClient) -> Result<()> {
        let unclassified = self.store.list(&FactFilter { category: Some(Category::Other), ..Default::default() }, 50)?;
        for mut fact in unclassified {
            let prompt = format!(
                "Classify this memory into exactly one word from: preference, fact, decision, entity, pattern, rule, procedure, credential, other.\nMemory: \"{}\"",
                fact.text
            );
            let messages = [ChatMessage { role: ChatRole::User, content: prompt }];
            match llm.chat(&messages, "default").await {
                Ok(reply) => {
                    let raw = reply.trim().to_lowercase();
                    let category = Category::parse_name(raw.as_str());
                    if category != Category::Other {
                        fact.category = category;
                        self.store.put(&fact)?;
                    } else if self.observe_discovered_category(&raw) {
                        tracing::info!(category = %raw, fact_id = %fact.id, "reclassify surfaced a category outside the fixed set");
                    }
                }
                Err(e) => tracing::warn!(error = %e, fact_id = %fact.id, "reclassify call failed, leaving as other"),
            }
        }
        self.persist_discovered_categories();
        Ok(())
    }

    /// Records a category name the LLM returned that doesn't match a fixed
    /// `Category` variant (§3.1, §6.4). Returns whether it was new.
    fn observe_discovered_category(&self, name: &str) -> bool {
        match self.discovered_categories.lock() {
            Ok(mut categories) => categories.observe(name),
            Err(_) => {
                tracing::warn!("discovered-categories lock poisoned, dropping observation");
                false
            }
        }
    }

    fn persist_discovered_categories(&self) {
        let snapshot = match self.discovered_categories.lock() {
            Ok(categories) => categories.clone(),
            Err(_) => return,
        };
        if let Err(e) = snapshot.save(&self.discovered_categories_path) {
            tracing::warn!(error = %e, "failed to persist discovered categories");
        }
    }

    /// Pattern synthesis (§4.7 "every 7 days, optional"): sample recent
    /// facts, ask the LLM for recurring patterns, store new ones after
    /// semantic dedup against existing patterns.
    async fn reflect(&self, llm: &dyn LlmClient, now: DateTime<Utc>) -> Result<()> {
        let recent = self.store.list(&FactFilter::default(), 50)?;
        if recent.is_empty() {
            return Ok(());
        }

        let sample: String = recent.iter().map(|f| format!("- {}", f.text)).collect::<Vec<_>>().join("\n");
        let prompt = format!("Identify recurring patterns across these memories. Return one pattern per line, no commentary.\n{sample}");
        let messages = [ChatMessage { role: ChatRole::User, content: prompt }];
        let reply = match llm.chat(&messages, "default").await {
            Ok(reply) => reply,
            Err(e) => {
                tracing::warn!(error = %e, "reflection LLM call failed");
                return Ok(());
            }
        };

        let existing_patterns = self.store.list(&FactFilter { category: Some(Category::Pattern), ..Default::default() }, 500)?;

        for line in reply.lines().map(str::trim).filter(|l| !l.is_empty()) {
            if self.pattern_is_duplicate(line, &existing_patterns).await {
                continue;
            }
            let fact = Fact::new(
                line.to_string(),
                None,
                None,
                None,
                Category::Pattern,
                vec![],
                0.9,
                DecayClass::Permanent,
                Source::Reflection,
                None,
                now,
            );
            self.store.put(&fact)?;
        }

        Ok(())
    }

    async fn pattern_is_duplicate(&self, candidate: &str, existing: &[Fact]) -> bool {
        let Some(client) = &self.embedding_client else {
            return existing.iter().any(|p| p.text.eq_ignore_ascii_case(candidate));
        };
        let Ok(candidate_vec) = client.embed(candidate).await else {
            return false;
        };
        for pattern in existing {
            if let Ok(existing_vec) = client.embed(&pattern.text).await {
                if cosine_similarity(&candidate_vec, &existing_vec) >= self.config.reflection_dedupe_threshold {
                    return true;
                }
            }
        }
        false
    }
}
