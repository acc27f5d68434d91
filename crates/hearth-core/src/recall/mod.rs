//! Recall Pipeline (§4.6): hybrid FTS + vector + graph query, fused,
//! tier-filtered, budget-trimmed.

pub mod fusion;
pub mod hyde;

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};

use crate::config::EngineConfig;
use crate::embedding::{centroid, EmbeddingClient};
use crate::error::Result;
use crate::fact::{Category, Fact, Tier};
use crate::graph;
use crate::store::{FactFilter, FactStore};

#[cfg(feature = "vector-search")]
use crate::vector::VectorIndex;

/// Output shape requested by the caller (§6.2 `format`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResultFormat {
    #[default]
    Full,
    Short,
    Progressive,
}

/// Recall query parameters (§6.2).
#[derive(Debug, Clone, Default)]
pub struct RecallOptions {
    pub k: usize,
    pub include_cold: bool,
    pub tier: Option<Tier>,
    pub tag: Option<String>,
    pub entity: Option<String>,
    pub category: Option<Category>,
    pub budget_tokens: Option<usize>,
    pub format: ResultFormat,
    /// When false (e.g. `search()`'s FTS-dominant variant), the vector
    /// branch and HyDE expansion are skipped entirely.
    pub use_vector_branch: bool,
    /// When false, recalled facts are not refreshed (used by `search()`,
    /// which per §6.2 is a plain tooling-facing query, not a conversational
    /// recall — only `recall()` carries the refresh-on-access side effect).
    pub refresh_on_access: bool,
}

impl RecallOptions {
    pub fn conversational(k: usize) -> Self {
        Self {
            k,
            use_vector_branch: true,
            refresh_on_access: true,
            ..Default::default()
        }
    }

    pub fn fts_dominant(k: usize) -> Self {
        Self {
            k,
            use_vector_branch: false,
            refresh_on_access: false,
            ..Default::default()
        }
    }
}

/// A progressive-disclosure index entry (§4.6, end).
#[derive(Debug, Clone)]
pub struct ProgressiveEntry {
    pub id: String,
    pub title: String,
    pub category: Category,
    pub tags: Vec<String>,
}

/// Result of a recall call, shaped by [`RecallOptions::format`].
#[derive(Debug, Clone)]
pub enum RecallResult {
    Full(Vec<Fact>),
    Progressive(Vec<ProgressiveEntry>),
}

fn approx_tokens(text: &str) -> usize {
    text.split_whitespace().count()
}

fn one_line_title(text: &str) -> String {
    let first_line = text.lines().next().unwrap_or(text);
    if first_line.chars().count() > 80 {
        format!("{}…", first_line.chars().take(79).collect::<String>())
    } else {
        first_line.to_string()
    }
}

/// Fuses candidates from the Fact Store, the vector index, and the
/// optional entity/graph branches into a ranked, budget-trimmed result.
pub struct RecallPipeline<'a> {
    store: &'a FactStore,
    #[cfg(feature = "vector-search")]
    vector_index: Option<&'a Mutex<VectorIndex>>,
    embedding_client: Option<&'a dyn EmbeddingClient>,
    config: &'a EngineConfig,
}

impl<'a> RecallPipeline<'a> {
    pub fn new(
        store: &'a FactStore,
        #[cfg(feature = "vector-search")] vector_index: Option<&'a Mutex<VectorIndex>>,
        embedding_client: Option<&'a dyn EmbeddingClient>,
        config: &'a EngineConfig,
    ) -> Self {
        Self {
            store,
            #[cfg(feature = "vector-search")]
            vector_index,
            embedding_client,
            config,
        }
    }

    fn filter_for(&self, opts: &RecallOptions) -> FactFilter {
        FactFilter {
            category: opts.category,
            tag: opts.tag.clone(),
            tier: opts.tier,
            entity: opts.entity.clone(),
            include_superseded: false,
        }
    }

    async fn vector_branch(&self, query_text: &str, limit: usize) -> Vec<(String, f32)> {
        #[cfg(feature = "vector-search")]
        {
            let (Some(index), Some(client)) = (self.vector_index, self.embedding_client) else {
                return Vec::new();
            };

            let texts = if self.config.hyde_enabled {
                hyde::expand_query(query_text)
            } else {
                vec![query_text.to_string()]
            };

            let mut embeddings = Vec::with_capacity(texts.len());
            for text in &texts {
                match client.embed(text).await {
                    Ok(vec) => embeddings.push(vec),
                    Err(e) => {
                        tracing::warn!(error = %e, "embedding failed during vector branch, degrading");
                    }
                }
            }

            let Some(query_vec) = centroid(&embeddings) else {
                return Vec::new();
            };

            let Ok(index) = index.lock() else {
                tracing::warn!("vector index lock poisoned, degrading to FTS-only");
                return Vec::new();
            };

            match index.search(&query_vec, limit) {
                Ok(results) => results,
                Err(e) => {
                    tracing::warn!(error = %e, "vector search failed, degrading to FTS-only");
                    Vec::new()
                }
            }
        }
        #[cfg(not(feature = "vector-search"))]
        {
            let _ = (query_text, limit);
            Vec::new()
        }
    }

    /// Run the full pipeline (§4.6 steps 1-8). `now` drives TTL/refresh
    /// decisions so the caller controls time (tests, replay).
    pub async fn recall(&self, query_text: &str, opts: &RecallOptions, now: DateTime<Utc>) -> Result<RecallResult> {
        let k = opts.k.max(1);
        let filter = self.filter_for(opts);

        // Step 1: HOT prefill.
        let hot_filter = FactFilter { tier: Some(Tier::Hot), ..filter.clone() };
        let hot_facts = self.store.list(&hot_filter, self.config.hot_max_facts)?;
        let mut hot_token_budget = self.config.hot_max_tokens;
        let mut hot_selected = Vec::new();
        for fact in hot_facts {
            let tokens = approx_tokens(&fact.text);
            if tokens > hot_token_budget && !hot_selected.is_empty() {
                break;
            }
            hot_token_budget = hot_token_budget.saturating_sub(tokens);
            hot_selected.push(fact);
        }
        let hot_ids: std::collections::HashSet<String> = hot_selected.iter().map(|f| f.id.clone()).collect();

        // Step 2: candidate generation.
        let candidate_limit = self.config.candidate_limit.max(k);
        let fts_results = self.store.search_fts(query_text, &filter, candidate_limit)?;

        let vector_results = if opts.use_vector_branch {
            self.vector_branch(query_text, candidate_limit).await
        } else {
            Vec::new()
        };

        let entity_results: Vec<(String, f32)> = if self.config.entity_branch_enabled {
            if let Some(entity) = &opts.entity {
                self.store
                    .find(entity, None)?
                    .into_iter()
                    .enumerate()
                    .map(|(rank, f)| (f.id, 1.0 / (rank as f32 + 1.0)))
                    .collect()
            } else {
                Vec::new()
            }
        } else {
            Vec::new()
        };

        // Step 3: RRF fusion.
        let branches: Vec<&[(String, f32)]> = vec![&fts_results, &vector_results, &entity_results];
        let fused = fusion::reciprocal_rank_fusion(&branches, self.config.rrf_k);

        let mut candidates: HashMap<String, Fact> = HashMap::new();
        for (id, _) in &fused {
            if hot_ids.contains(id) || candidates.contains_key(id) {
                continue;
            }
            if let Some(fact) = self.store.get(id)? {
                candidates.insert(id.clone(), fact);
            }
        }

        let mut scored: Vec<(Fact, f32)> = fused
            .into_iter()
            .filter_map(|(id, score)| candidates.remove(&id).map(|fact| (fact, score)))
            .collect();

        // Step 4: tier filter.
        scored.retain(|(fact, _)| fact.tier != Tier::Cold || opts.include_cold);

        // Step 5: rank adjustments.
        let tau = self.config.recall_decay_tau_days.max(1e-6);
        for (fact, score) in scored.iter_mut() {
            let age_days = (now - fact.last_confirmed_at).num_seconds() as f64 / 86_400.0;
            let time_decay = (-age_days.max(0.0) / tau).exp() as f32;
            let mut adjusted = fact.importance * time_decay * *score;
            if self.config.prefer_long_term
                && matches!(fact.decay_class, crate::fact::DecayClass::Permanent | crate::fact::DecayClass::Stable)
            {
                adjusted *= self.config.prefer_long_term_boost;
            }
            *score = adjusted;
        }

        // Step 6: graph boost.
        if self.config.graph_boost_enabled {
            let seed_ids: Vec<String> = scored.iter().take(k).map(|(f, _)| f.id.clone()).collect();
            if !seed_ids.is_empty() {
                if let Ok(boosts) = graph::one_hop_boost(self.store, &seed_ids) {
                    for (fact, score) in scored.iter_mut() {
                        if let Some(boost) = boosts.get(&fact.id) {
                            *score += boost;
                        }
                    }
                }
            }
        }

        // Tie-break by importance, then recency.
        scored.sort_by(|(fact_a, score_a), (fact_b, score_b)| {
            score_b
                .partial_cmp(score_a)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| fact_b.importance.partial_cmp(&fact_a.importance).unwrap_or(std::cmp::Ordering::Equal))
                .then_with(|| fact_b.last_confirmed_at.cmp(&fact_a.last_confirmed_at))
        });

        // Step 7: trim to budget. HOT facts are always included first.
        let mut result: Vec<Fact> = hot_selected;
        let mut token_budget = opts.budget_tokens;
        if let Some(budget) = token_budget.as_mut() {
            *budget = budget.saturating_sub(result.iter().map(|f| approx_tokens(&f.text)).sum());
        }

        for (fact, _) in scored {
            if result.len() >= k {
                break;
            }
            if let Some(budget) = token_budget {
                let cost = approx_tokens(&fact.text);
                if cost > budget && !result.is_empty() {
                    break;
                }
                token_budget = Some(budget.saturating_sub(cost));
            }
            result.push(fact);
            if result.len() >= k {
                break;
            }
        }

        // Step 8: refresh-on-access, once per fact, only for decay classes
        // that refresh (§4.4, Open Question (a): a single refresh per call).
        if opts.refresh_on_access {
            for fact in &result {
                if fact.decay_class.refreshes_on_access() {
                    self.store.refresh(&fact.id, now)?;
                }
            }
        }

        match opts.format {
            ResultFormat::Progressive => Ok(RecallResult::Progressive(
                result
                    .into_iter()
                    .map(|f| ProgressiveEntry {
                        id: f.id,
                        title: one_line_title(&f.text),
                        category: f.category,
                        tags: f.tags,
                    })
                    .collect(),
            )),
            _ => Ok(RecallResult::Full(result)),
        }
    }
}
