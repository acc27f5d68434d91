//! # Hearth Core
//!
//! Embedded hybrid memory engine for conversational AI agents: a durable
//! Fact Store (SQLite + FTS5), an optional HNSW vector index, a
//! write-ahead log for crash-safe dual-index commits, regex-based
//! classification, and a background scheduler for decay and tier
//! maintenance.
//!
//! ## Feature flags
//!
//! - `vector-search` (default): HNSW approximate-nearest-neighbor recall
//!   via `usearch`. Disabling falls back to FTS-only recall.
//! - `bundled-sqlite` (default): bundle SQLite so the crate builds without
//!   a system libsqlite3.
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use hearth_core::{Engine, EngineConfig, CaptureRequest};
//! use hearth_core::fact::Source;
//!
//! let engine = Engine::open(data_dir, EngineConfig::default(), None, None)?;
//! engine.store(CaptureRequest::new("we decided to use SQLite", Source::User)).await?;
//! let facts = engine.recall("storage decision", Default::default()).await?;
//! ```

pub mod classify;
pub mod config;
pub mod embedding;
pub mod error;
pub mod fact;
pub mod graph;
pub mod llm;
pub mod recall;
pub mod scheduler;
pub mod store;
#[cfg(feature = "vector-search")]
pub mod vector;
pub mod wal;
pub mod write;

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};

pub use config::EngineConfig;
pub use error::{Class, EngineError, Result};
pub use fact::Fact;
pub use recall::{RecallOptions, RecallResult, ResultFormat};
pub use scheduler::{Scheduler, StartupReport};
pub use store::{FactFilter, FactStore, StoreStats};
pub use wal::Wal;
pub use write::{CaptureRequest, WriteOutcome};

use classify::LanguageKeywords;
use embedding::EmbeddingClient;
use fact::Source;
use llm::LlmClient;
#[cfg(feature = "vector-search")]
use vector::{VectorIndex, VectorIndexConfig};

/// Files and directories under the engine's data root (§6.4).
pub struct DataPaths {
    pub root: PathBuf,
}

impl DataPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn facts_db(&self) -> PathBuf {
        self.root.join("facts.db")
    }

    pub fn vector_index(&self) -> PathBuf {
        self.root.join("vectors.usearch")
    }

    pub fn wal(&self) -> PathBuf {
        self.root.join("memory.wal")
    }

    pub fn language_keywords(&self) -> PathBuf {
        self.root.join(".language-keywords.json")
    }

    pub fn discovered_categories(&self) -> PathBuf {
        self.root.join(".discovered-categories.json")
    }
}

/// Result of `store()` (§6.1).
#[derive(Debug, Clone)]
pub struct StoreResult {
    pub id: String,
    pub category: fact::Category,
    pub decay_class: fact::DecayClass,
    pub tier: fact::Tier,
}

impl From<&Fact> for StoreResult {
    fn from(fact: &Fact) -> Self {
        Self { id: fact.id.clone(), category: fact.category, decay_class: fact.decay_class, tier: fact.tier }
    }
}

/// Result of `prune()` (§6.3).
#[derive(Debug, Clone, Default)]
pub struct PruneResult {
    pub expired: usize,
    pub decayed: usize,
    pub deleted: usize,
}

/// Result of `compact()` (§6.3).
#[derive(Debug, Clone, Default)]
pub struct CompactResult {
    pub hot: i64,
    pub warm: i64,
    pub cold: i64,
}

/// Result of `verify()` (§6.3).
#[derive(Debug, Clone, Default)]
pub struct VerifyResult {
    pub ok: bool,
    pub errors: Vec<String>,
}

/// The top-level engine: owns the Fact Store, the optional vector index,
/// the WAL, and wires the write/recall pipelines and scheduler together.
pub struct Engine {
    store: Arc<FactStore>,
    #[cfg(feature = "vector-search")]
    vector_index: Option<Arc<Mutex<VectorIndex>>>,
    wal: Arc<Wal>,
    embedding_client: Option<Arc<dyn EmbeddingClient>>,
    llm_client: Option<Arc<dyn LlmClient>>,
    config: EngineConfig,
    language_keywords: Arc<LanguageKeywords>,
    discovered_categories_path: PathBuf,
}

impl Engine {
    /// Open (or create) an engine rooted at `data_dir` (§6.4). Runs WAL
    /// recovery and the vector-orphan sweep before returning, matching the
    /// scheduler's "on startup" sequence (§4.7).
    pub fn open(
        data_dir: impl AsRef<Path>,
        config: EngineConfig,
        embedding_client: Option<Arc<dyn EmbeddingClient>>,
        llm_client: Option<Arc<dyn LlmClient>>,
    ) -> Result<Self> {
        let paths = DataPaths::new(data_dir.as_ref());
        std::fs::create_dir_all(&paths.root)?;

        let store = Arc::new(FactStore::open(&paths.facts_db())?);
        let wal = Arc::new(Wal::open(&paths.wal(), config.wal_max_age, config.wal_max_bytes)?);
        let language_keywords = Arc::new(LanguageKeywords::load(&paths.language_keywords())?);

        // The index itself is never serialized to `paths.vector_index()`;
        // durability comes from the embeddings persisted as BLOBs alongside
        // each fact (§4.2), rebuilt here so a restart never silently drops
        // to FTS-only recall.
        #[cfg(feature = "vector-search")]
        let vector_index = {
            let vector_config = VectorIndexConfig::from_engine_config(&config);
            let mut index = VectorIndex::with_config(vector_config)?;
            let embeddings = store.all_embeddings()?;
            if !embeddings.is_empty() {
                index.reserve(embeddings.len())?;
            }
            for (fact_id, vector) in &embeddings {
                if let Err(e) = index.add(fact_id, vector) {
                    tracing::warn!(error = %e, fact_id = %fact_id, "failed to rebuild vector index entry from stored embedding");
                }
            }
            Some(Arc::new(Mutex::new(index)))
        };

        let engine = Self {
            store,
            #[cfg(feature = "vector-search")]
            vector_index,
            wal,
            embedding_client,
            llm_client,
            config,
            language_keywords,
            discovered_categories_path: paths.discovered_categories(),
        };

        let scheduler = engine.build_scheduler();
        scheduler.run_startup_recovery(Utc::now())?;

        Ok(engine)
    }

    /// Build (but do not spawn) a [`Scheduler`] sharing this engine's state.
    /// The host decides when to call [`Scheduler::spawn`] and holds the
    /// returned shutdown handle.
    pub fn build_scheduler(&self) -> Scheduler {
        Scheduler::new(
            self.store.clone(),
            #[cfg(feature = "vector-search")]
            self.vector_index.clone(),
            self.wal.clone(),
            self.llm_client.clone(),
            self.embedding_client.clone(),
            self.config.clone(),
            self.discovered_categories_path.clone(),
        )
    }

    fn write_pipeline(&self) -> write::WritePipeline<'_> {
        write::WritePipeline::new(
            &self.store,
            #[cfg(feature = "vector-search")]
            self.vector_index.as_deref(),
            self.embedding_client.as_deref(),
            &self.wal,
            &self.config,
            &self.language_keywords,
        )
    }

    fn recall_pipeline(&self) -> recall::RecallPipeline<'_> {
        recall::RecallPipeline::new(
            &self.store,
            #[cfg(feature = "vector-search")]
            self.vector_index.as_deref(),
            self.embedding_client.as_deref(),
            &self.config,
        )
    }

    /// `store(text, opts) -> {id, category, decay_class, tier}` (§6.1).
    pub async fn store(&self, request: CaptureRequest) -> Result<StoreResult> {
        let outcome = self.write_pipeline().write(request, Utc::now()).await?;
        match outcome {
            WriteOutcome::Created(fact) | WriteOutcome::Refreshed(fact) => Ok(StoreResult::from(&fact)),
            WriteOutcome::Superseded { fact, .. } => Ok(StoreResult::from(&fact)),
            WriteOutcome::Dropped { reason } => Err(EngineError::InvalidArgument(reason)),
        }
    }

    /// `forget(id) -> {removed: bool}` (§6.1). Deletes the fact and its
    /// vector, if any.
    pub fn forget(&self, id: &str) -> Result<bool> {
        let removed = self.store.delete(id)?;
        #[cfg(feature = "vector-search")]
        if let Some(index) = &self.vector_index {
            if let Ok(mut index) = index.lock() {
                let _ = index.remove(id);
            }
        }
        Ok(removed)
    }

    /// `capture_event(turn_text, role) -> {captured: [id]}` (§6.1). The
    /// engine decides, via `should_capture`, whether the turn is worth
    /// storing; returns the captured id, if any.
    pub async fn capture_event(&self, turn_text: &str, source: Source) -> Result<Vec<String>> {
        let mut request = CaptureRequest::new(turn_text, source);
        request.explicit = false;
        match self.write_pipeline().write(request, Utc::now()).await? {
            WriteOutcome::Created(fact) | WriteOutcome::Refreshed(fact) => Ok(vec![fact.id]),
            WriteOutcome::Superseded { fact, .. } => Ok(vec![fact.id]),
            WriteOutcome::Dropped { .. } => Ok(Vec::new()),
        }
    }

    /// `recall(query, opts) -> [fact]` (§6.2): the conversational hybrid
    /// variant — always fuses the vector branch and refreshes accessed
    /// stable/active facts, mirroring [`Engine::search`]'s opposite override.
    pub async fn recall(&self, query_text: &str, mut opts: RecallOptions) -> Result<RecallResult> {
        opts.use_vector_branch = true;
        opts.refresh_on_access = true;
        self.recall_pipeline().recall(query_text, &opts, Utc::now()).await
    }

    /// `lookup(entity, key?) -> [fact]` (§6.2). Exact-attribute lookup, no
    /// vector branch, no refresh-on-access side effect (Open Question (a)
    /// in `DESIGN.md`).
    pub fn lookup(&self, entity: &str, key: Option<&str>) -> Result<Vec<Fact>> {
        self.store.find(entity, key)
    }

    /// `search(query, opts) -> [fact]` (§6.2): the FTS-dominant tooling
    /// variant, no vector branch, no refresh-on-access.
    pub async fn search(&self, query_text: &str, mut opts: RecallOptions) -> Result<RecallResult> {
        opts.use_vector_branch = false;
        opts.refresh_on_access = false;
        self.recall_pipeline().recall(query_text, &opts, Utc::now()).await
    }

    /// `prune({dry_run, soft_only}) -> {expired, decayed}` (§6.3).
    pub fn prune(&self, dry_run: bool, soft_only: bool) -> Result<PruneResult> {
        let now = Utc::now();
        if dry_run {
            let stats = self.store.stats(now)?;
            return Ok(PruneResult { expired: stats.pending_expiry as usize, decayed: 0, deleted: 0 });
        }

        let mut result = PruneResult::default();
        if !soft_only {
            let expired = self.store.prune_expired(now)?;
            result.expired = expired.len();
            #[cfg(feature = "vector-search")]
            if let Some(index) = &self.vector_index {
                if let Ok(mut index) = index.lock() {
                    for id in &expired {
                        let _ = index.remove(id);
                    }
                }
            }
        }
        let (decayed, deleted) = self.store.decay_confidences(now)?;
        result.decayed = decayed;
        result.deleted = deleted;
        Ok(result)
    }

    /// `compact() -> {hot, warm, cold}` (§6.3): runs tier compaction
    /// immediately (synchronously) and reports the resulting tier counts.
    pub fn compact(&self) -> Result<CompactResult> {
        let scheduler = self.build_scheduler();
        scheduler.compact_tiers_now(Utc::now())?;
        let stats = self.store.stats(Utc::now())?;
        let count_of = |tier: &str| stats.by_tier.iter().find(|(t, _)| t == tier).map(|(_, c)| *c).unwrap_or(0);
        Ok(CompactResult { hot: count_of("hot"), warm: count_of("warm"), cold: count_of("cold") })
    }

    /// `stats() -> {counts by category, decay_class, tier; pending_expiry}` (§6.3).
    pub fn stats(&self) -> Result<StoreStats> {
        self.store.stats(Utc::now())
    }

    /// `verify() -> {ok, errors[]}` (§6.3): Fact Store integrity, vector
    /// index openness, WAL readability.
    pub fn verify(&self) -> Result<VerifyResult> {
        let mut errors = Vec::new();

        if let Err(e) = self.store.verify() {
            errors.push(format!("fact store: {e}"));
        }

        #[cfg(feature = "vector-search")]
        if let Some(index) = &self.vector_index {
            match index.lock() {
                Ok(index) => {
                    if index.dimensions() != self.config.vector_dimensions {
                        errors.push(format!(
                            "vector index dimension {} does not match configured {}",
                            index.dimensions(),
                            self.config.vector_dimensions
                        ));
                    }
                }
                Err(_) => errors.push("vector index lock poisoned".to_string()),
            }
        }

        if let Err(e) = self.wal.size_bytes() {
            errors.push(format!("wal: {e}"));
        }

        Ok(VerifyResult { ok: errors.is_empty(), errors })
    }
}
