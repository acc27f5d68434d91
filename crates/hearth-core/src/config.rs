//! Engine-wide tunables.
//!
//! A plain struct with a `Default` impl and `with_*` builder methods.
//! Loading these values from a file or environment is a host concern; this
//! crate only defines the knobs and their defaults.

use std::time::Duration;

/// Tunable parameters for every component of the engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Dimension of embeddings the vector index expects. Mismatched on open
    /// is a hard [`crate::EngineError::Init`], never a silent truncation.
    pub vector_dimensions: usize,
    /// Discard WAL entries older than this on recovery (§3.3).
    pub wal_max_age: Duration,
    /// Warn-and-compact threshold for the WAL file (§5).
    pub wal_max_bytes: u64,
    /// Max facts kept in the HOT tier prefill (§4.6 step 1).
    pub hot_max_facts: usize,
    /// Max cumulative tokens (approximated as whitespace-split words) for
    /// the HOT tier prefill.
    pub hot_max_tokens: usize,
    /// Cosine-similarity threshold above which two facts are considered
    /// fuzzy duplicates during the write pipeline (§4.5 step 3).
    pub fuzzy_dedupe_threshold: f32,
    /// Days a HOT, non-blocker fact may sit without being tagged "blocker"
    /// before tier compaction demotes it to WARM (§4.7).
    pub inactive_preference_days: i64,
    /// Reciprocal Rank Fusion constant (§4.6 step 3).
    pub rrf_k: f32,
    /// Time-decay tau (in days) for the `importance * exp(-Δt/τ)` rank
    /// adjustment (§4.6 step 5).
    pub recall_decay_tau_days: f64,
    /// Multiplier applied to permanent/stable facts when `prefer_long_term`.
    pub prefer_long_term_boost: f32,
    /// Whether recall should boost permanent/stable facts (§4.6 step 5).
    pub prefer_long_term: bool,
    /// Whether the write pipeline performs the optional conflict check
    /// against existing (entity, key) facts before falling back to refresh
    /// (§4.5 step 4, and invariant I6).
    pub classify_before_write: bool,
    /// Bounded timeout for embedding-service calls (§5, §6.5).
    pub embedding_timeout: Duration,
    /// Bounded timeout for LLM calls (§5, §6.5).
    pub llm_timeout: Duration,
    /// Interval between scheduler prune/decay ticks (§4.7).
    pub prune_interval: Duration,
    /// Interval between tier-compaction passes (§4.7, "every T days").
    pub tier_compaction_interval: Duration,
    /// Interval between optional reclassify passes.
    pub reclassify_interval: Duration,
    /// Interval between optional reflection passes.
    pub reflection_interval: Duration,
    /// Cosine-similarity floor for deduping reflection-generated patterns
    /// against existing ones (§4.7, "every 7 days").
    pub reflection_dedupe_threshold: f32,
    /// Number of FTS/vector candidates fetched per branch before fusion.
    pub candidate_limit: usize,
    /// Whether entity-branch candidate generation is enabled (§4.6 step 2).
    pub entity_branch_enabled: bool,
    /// Whether HyDE query expansion is applied to the vector branch.
    pub hyde_enabled: bool,
    /// Whether the graph-edge spreading-activation boost is applied.
    pub graph_boost_enabled: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            vector_dimensions: 1536,
            wal_max_age: Duration::from_secs(5 * 60),
            wal_max_bytes: 10 * 1024 * 1024,
            hot_max_facts: 50,
            hot_max_tokens: 4_000,
            fuzzy_dedupe_threshold: 0.9,
            inactive_preference_days: 7,
            rrf_k: 60.0,
            recall_decay_tau_days: 30.0,
            prefer_long_term_boost: 1.25,
            prefer_long_term: false,
            classify_before_write: true,
            embedding_timeout: Duration::from_secs(10),
            llm_timeout: Duration::from_secs(60),
            prune_interval: Duration::from_secs(60 * 60),
            tier_compaction_interval: Duration::from_secs(3 * 24 * 60 * 60),
            reclassify_interval: Duration::from_secs(24 * 60 * 60),
            reflection_interval: Duration::from_secs(7 * 24 * 60 * 60),
            reflection_dedupe_threshold: 0.85,
            candidate_limit: 50,
            entity_branch_enabled: true,
            hyde_enabled: true,
            graph_boost_enabled: true,
        }
    }
}

impl EngineConfig {
    /// Override the embedding dimension (must match the host's embedding
    /// service; see Open Question (b) in `DESIGN.md`).
    pub fn with_vector_dimensions(mut self, dims: usize) -> Self {
        self.vector_dimensions = dims;
        self
    }

    /// Override the WAL staleness threshold.
    pub fn with_wal_max_age(mut self, max_age: Duration) -> Self {
        self.wal_max_age = max_age;
        self
    }

    /// Override the RRF fusion constant.
    pub fn with_rrf_k(mut self, k: f32) -> Self {
        self.rrf_k = k;
        self
    }
}
