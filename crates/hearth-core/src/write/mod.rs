//! Write Pipeline (§4.5): filter, enrich, dedupe, conflict-check, embed,
//! WAL-append, commit, WAL-clear. Candidates are gathered via an FTS
//! top-1 search plus an optional cosine check, then one decision is made:
//! refresh, supersede, or create.

use std::sync::Mutex;

use chrono::{DateTime, Utc};

use crate::classify;
use crate::classify::LanguageKeywords;
use crate::config::EngineConfig;
use crate::embedding::EmbeddingClient;
use crate::error::Result;
use crate::fact::{Category, DecayClass, Fact, Source, Tier};
use crate::store::{FactFilter, FactStore};
use crate::wal::{self, Wal};

#[cfg(feature = "vector-search")]
use crate::vector::VectorIndex;

/// Default confidence bump applied on a plain refresh (capped at 1.0).
const REFRESH_CONFIDENCE_BUMP: f32 = 0.05;

/// A capture request entering the pipeline (§4.5 intro, §6.1 `opts`).
///
/// `category`/`importance`/`decay_class`/`tier` are explicit overrides for
/// the classifier's output, carried as a typed options record rather than
/// an open string-keyed map.
#[derive(Debug, Clone)]
pub struct CaptureRequest {
    pub text: String,
    pub entity: Option<String>,
    pub key: Option<String>,
    pub value: Option<String>,
    pub tags: Vec<String>,
    pub category: Option<Category>,
    pub importance: Option<f32>,
    pub decay_class: Option<DecayClass>,
    pub tier: Option<Tier>,
    pub source: Source,
    pub source_date: Option<DateTime<Utc>>,
    /// Bypasses `should_capture` (step 1) — an explicit `store()` call.
    pub explicit: bool,
}

impl CaptureRequest {
    pub fn new(text: impl Into<String>, source: Source) -> Self {
        Self {
            text: text.into(),
            entity: None,
            key: None,
            value: None,
            tags: Vec::new(),
            category: None,
            importance: None,
            decay_class: None,
            tier: None,
            source,
            source_date: None,
            explicit: true,
        }
    }
}

/// What the pipeline decided to do with a capture request.
#[derive(Debug, Clone)]
pub enum WriteOutcome {
    Created(Fact),
    Refreshed(Fact),
    Superseded { old_id: String, fact: Fact },
    Dropped { reason: String },
}

fn normalized_fingerprint(text: &str) -> String {
    text.to_lowercase()
        .chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace())
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn default_importance(category: Category, tags: &[String]) -> f32 {
    let mut importance = match category {
        Category::Decision | Category::Rule => 0.7,
        Category::Credential => 0.8,
        Category::Preference | Category::Entity | Category::Procedure => 0.6,
        Category::Pattern => 0.65,
        Category::Fact | Category::Other => 0.5,
    };
    if tags.iter().any(|t| t == "blocker") {
        importance = (importance + 0.2).min(1.0);
    }
    importance
}

pub struct WritePipeline<'a> {
    store: &'a FactStore,
    #[cfg(feature = "vector-search")]
    vector_index: Option<&'a Mutex<VectorIndex>>,
    embedding_client: Option<&'a dyn EmbeddingClient>,
    wal: &'a Wal,
    config: &'a EngineConfig,
    language_keywords: &'a LanguageKeywords,
}

impl<'a> WritePipeline<'a> {
    pub fn new(
        store: &'a FactStore,
        #[cfg(feature = "vector-search")] vector_index: Option<&'a Mutex<VectorIndex>>,
        embedding_client: Option<&'a dyn EmbeddingClient>,
        wal: &'a Wal,
        config: &'a EngineConfig,
        language_keywords: &'a LanguageKeywords,
    ) -> Self {
        Self {
            store,
            #[cfg(feature = "vector-search")]
            vector_index,
            embedding_client,
            wal,
            config,
            language_keywords,
        }
    }

    /// Run the full pipeline for one capture request (§4.5 steps 1-8).
    pub async fn write(&self, req: CaptureRequest, now: DateTime<Utc>) -> Result<WriteOutcome> {
        // Step 1: filter.
        if !req.explicit && !classify::should_capture_with_languages(&req.text, self.language_keywords) {
            return Ok(WriteOutcome::Dropped {
                reason: "text did not match a capture trigger".to_string(),
            });
        }

        // Step 2: enrich. Host-supplied opts (§6.1) override the classifier.
        let category = req.category.unwrap_or_else(|| classify::classify_category(&req.text));
        let decay_class = req
            .decay_class
            .unwrap_or_else(|| classify::classify_decay(&req.text, req.entity.as_deref(), req.key.as_deref()));
        let tags = classify::extract_tags(&req.text, &req.tags);
        let importance = req.importance.unwrap_or_else(|| default_importance(category, &tags));
        let tier_override = req.tier;

        // Step 3: dedupe via FTS top-1 + fingerprint/cosine confirmation.
        let near_filter = FactFilter { entity: req.entity.clone(), ..Default::default() };
        let near = self.store.search_fts(&req.text, &near_filter, 1)?;
        if let Some((near_id, _bm25)) = near.first() {
            if let Some(existing) = self.store.get(near_id)? {
                if !existing.is_superseded() && self.is_near_match(&req.text, &existing).await {
                    let same_key = req.entity.is_some() && req.entity == existing.entity && req.key == existing.key;
                    if same_key {
                        return self
                            .commit_supersede(existing, req, category, decay_class, tags, importance, tier_override, now)
                            .await;
                    }
                    return self.refresh_existing(existing, now);
                }
            }
        }

        // Step 4: conflict check (classify_before_write).
        if self.config.classify_before_write {
            if let (Some(entity), Some(key)) = (req.entity.as_deref(), req.key.as_deref()) {
                if let Some(existing) = self
                    .store
                    .find(entity, Some(key))?
                    .into_iter()
                    .find(|f| !f.is_superseded())
                {
                    let conflicting = match (&existing.value, &req.value) {
                        (Some(old), Some(new)) => old != new,
                        _ => false,
                    };
                    if conflicting {
                        return self
                            .commit_supersede(existing, req, category, decay_class, tags, importance, tier_override, now)
                            .await;
                    }
                    return self.refresh_existing(existing, now);
                }
            }
        }

        // Step 5: embed (outside the write lock).
        let embedding = self.try_embed(&req.text).await;

        let mut fact = Fact::new(
            req.text,
            req.entity,
            req.key,
            req.value,
            category,
            tags,
            importance,
            decay_class,
            req.source,
            req.source_date,
            now,
        );
        if let Some(tier) = tier_override {
            fact.tier = tier;
        }

        self.commit_create(fact, embedding, now)
    }

    async fn is_near_match(&self, candidate_text: &str, existing: &Fact) -> bool {
        if normalized_fingerprint(candidate_text) == normalized_fingerprint(&existing.text) {
            return true;
        }

        #[cfg(feature = "vector-search")]
        {
            if let (Some(index), Some(client)) = (self.vector_index, self.embedding_client) {
                if let Ok(vec) = client.embed(candidate_text).await {
                    if let Ok(index) = index.lock() {
                        if let Ok(hits) = index.search_with_threshold(&vec, 1, self.config.fuzzy_dedupe_threshold) {
                            return hits.iter().any(|(id, _)| id == &existing.id);
                        }
                    }
                }
            }
        }
        false
    }

    async fn try_embed(&self, text: &str) -> Option<Vec<f32>> {
        let client = self.embedding_client?;
        match client.embed(text).await {
            Ok(vec) => Some(vec),
            Err(e) => {
                tracing::warn!(error = %e, "embedding failed, writing without a vector");
                None
            }
        }
    }

    fn refresh_existing(&self, existing: Fact, now: DateTime<Utc>) -> Result<WriteOutcome> {
        let mut fact = existing;
        fact.confidence = (fact.confidence + REFRESH_CONFIDENCE_BUMP).min(1.0);
        fact.refresh(now);
        self.store.put(&fact)?;
        Ok(WriteOutcome::Refreshed(fact))
    }

    #[allow(clippy::too_many_arguments)]
    async fn commit_supersede(
        &self,
        old: Fact,
        req: CaptureRequest,
        category: Category,
        decay_class: DecayClass,
        tags: Vec<String>,
        importance: f32,
        tier_override: Option<Tier>,
        now: DateTime<Utc>,
    ) -> Result<WriteOutcome> {
        let embedding = self.try_embed(&req.text).await;
        let mut new_fact = Fact::new(
            req.text,
            req.entity,
            req.key,
            req.value,
            category,
            tags,
            importance,
            decay_class,
            req.source,
            req.source_date,
            now,
        );
        if let Some(tier) = tier_override {
            new_fact.tier = tier;
        }

        match self.commit_create(new_fact, embedding, now)? {
            WriteOutcome::Created(fact) => {
                self.store.supersede(&old.id, &fact.id)?;
                Ok(WriteOutcome::Superseded { old_id: old.id, fact })
            }
            other => Ok(other),
        }
    }

    /// Steps 6-8: the write-lock critical section. The Fact Store's own
    /// writer mutex (§5) serializes this across concurrent callers.
    fn commit_create(&self, fact: Fact, embedding: Option<Vec<f32>>, now: DateTime<Utc>) -> Result<WriteOutcome> {
        let entry = wal::store_entry(&fact, embedding.clone(), now);
        if let Err(e) = self.wal.append(&entry) {
            tracing::warn!(error = %e, "WAL append failed, continuing without crash-safety for this write");
        }

        self.store.put(&fact)?;

        let mut vector_committed = embedding.is_none();
        #[cfg(feature = "vector-search")]
        if let Some(vec) = &embedding {
            if let Some(index) = self.vector_index {
                match index.lock() {
                    Ok(mut index) => match index.add(&fact.id, vec) {
                        Ok(()) => {
                            self.store.mark_has_vector(&fact.id, true)?;
                            if let Err(e) = self.store.put_embedding(&fact.id, vec, now) {
                                tracing::warn!(error = %e, "failed to persist embedding, vector index will not survive a restart for this fact");
                            }
                            vector_committed = true;
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, "vector index commit failed, WAL entry retained for recovery");
                        }
                    },
                    Err(_) => tracing::warn!("vector index lock poisoned, WAL entry retained for recovery"),
                }
            } else {
                vector_committed = true;
            }
        }
        #[cfg(not(feature = "vector-search"))]
        {
            vector_committed = true;
        }

        if vector_committed {
            if let Err(e) = self.wal.clear() {
                tracing::warn!(error = %e, "failed to clear WAL after commit");
            }
        }

        Ok(WriteOutcome::Created(fact))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn pipeline_parts(dir: &std::path::Path) -> (FactStore, Wal, EngineConfig, LanguageKeywords) {
        let store = FactStore::open_in_memory().unwrap();
        let wal = Wal::open(&dir.join("wal.jsonl"), std::time::Duration::from_secs(5 * 60), 10 * 1024 * 1024).unwrap();
        let config = EngineConfig::default();
        (store, wal, config, LanguageKeywords::default())
    }

    #[tokio::test]
    async fn explicit_store_creates_a_fact() {
        let dir = tempdir().unwrap();
        let (store, wal, config, languages) = pipeline_parts(dir.path());
        let pipeline = WritePipeline::new(&store, None, None, &wal, &config, &languages);

        let req = CaptureRequest::new("we decided to use SQLite for storage", Source::User);
        let outcome = pipeline.write(req, Utc::now()).await.unwrap();
        match outcome {
            WriteOutcome::Created(fact) => assert_eq!(fact.category, Category::Decision),
            other => panic!("expected Created, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn implicit_low_signal_text_is_dropped() {
        let dir = tempdir().unwrap();
        let (store, wal, config, languages) = pipeline_parts(dir.path());
        let pipeline = WritePipeline::new(&store, None, None, &wal, &config, &languages);

        let mut req = CaptureRequest::new("just chatting about the weather", Source::User);
        req.explicit = false;
        let outcome = pipeline.write(req, Utc::now()).await.unwrap();
        assert!(matches!(outcome, WriteOutcome::Dropped { .. }));
    }

    #[tokio::test]
    async fn near_identical_text_refreshes_instead_of_duplicating() {
        let dir = tempdir().unwrap();
        let (store, wal, config, languages) = pipeline_parts(dir.path());
        let pipeline = WritePipeline::new(&store, None, None, &wal, &config, &languages);

        let first = CaptureRequest::new("I prefer tabs over spaces", Source::User);
        let first_outcome = pipeline.write(first, Utc::now()).await.unwrap();
        let WriteOutcome::Created(fact) = first_outcome else { panic!("expected Created") };

        let second = CaptureRequest::new("I prefer tabs over spaces!", Source::User);
        let second_outcome = pipeline.write(second, Utc::now()).await.unwrap();
        match second_outcome {
            WriteOutcome::Refreshed(refreshed) => assert_eq!(refreshed.id, fact.id),
            other => panic!("expected Refreshed, got {other:?}"),
        }

        let stats = store.stats(Utc::now()).unwrap();
        assert_eq!(stats.total_facts, 1);
    }

    #[tokio::test]
    async fn same_key_near_match_supersedes() {
        let dir = tempdir().unwrap();
        let (store, wal, config, languages) = pipeline_parts(dir.path());
        let pipeline = WritePipeline::new(&store, None, None, &wal, &config, &languages);

        let mut first = CaptureRequest::new("favorite color is blue", Source::User);
        first.entity = Some("user".into());
        first.key = Some("favorite_color".into());
        first.value = Some("blue".into());
        let first_outcome = pipeline.write(first, Utc::now()).await.unwrap();
        let WriteOutcome::Created(old_fact) = first_outcome else { panic!("expected Created") };

        let mut second = CaptureRequest::new("favorite color is blue", Source::User);
        second.entity = Some("user".into());
        second.key = Some("favorite_color".into());
        second.value = Some("blue".into());
        let second_outcome = pipeline.write(second, Utc::now()).await.unwrap();
        match second_outcome {
            WriteOutcome::Superseded { old_id, fact } => {
                assert_eq!(old_id, old_fact.id);
                assert_ne!(fact.id, old_fact.id);
            }
            other => panic!("expected Superseded, got {other:?}"),
        }

        let refreshed_old = store.get(&old_fact.id).unwrap().unwrap();
        assert!(refreshed_old.is_superseded());
    }

    #[tokio::test]
    async fn conflicting_value_for_same_key_supersedes() {
        let dir = tempdir().unwrap();
        let (store, wal, config, languages) = pipeline_parts(dir.path());
        let pipeline = WritePipeline::new(&store, None, None, &wal, &config, &languages);

        let mut first = CaptureRequest::new("the api timeout is 30 seconds", Source::User);
        first.entity = Some("config".into());
        first.key = Some("api_timeout".into());
        first.value = Some("30".into());
        pipeline.write(first, Utc::now()).await.unwrap();

        let mut second = CaptureRequest::new("the api timeout is 60 seconds now", Source::User);
        second.entity = Some("config".into());
        second.key = Some("api_timeout".into());
        second.value = Some("60".into());
        let outcome = pipeline.write(second, Utc::now()).await.unwrap();
        assert!(matches!(outcome, WriteOutcome::Superseded { .. } | WriteOutcome::Created(_)));
    }

    #[tokio::test]
    async fn opts_overrides_win_over_the_classifier() {
        let dir = tempdir().unwrap();
        let (store, wal, config, languages) = pipeline_parts(dir.path());
        let pipeline = WritePipeline::new(&store, None, None, &wal, &config, &languages);

        let mut req = CaptureRequest::new("the weather today is mild", Source::User);
        req.category = Some(Category::Rule);
        req.decay_class = Some(DecayClass::Permanent);
        req.importance = Some(0.9);
        req.tier = Some(Tier::Hot);
        let outcome = pipeline.write(req, Utc::now()).await.unwrap();
        match outcome {
            WriteOutcome::Created(fact) => {
                assert_eq!(fact.category, Category::Rule);
                assert_eq!(fact.decay_class, DecayClass::Permanent);
                assert_eq!(fact.importance, 0.9);
                assert_eq!(fact.tier, Tier::Hot);
                assert!(fact.expires_at.is_none());
            }
            other => panic!("expected Created, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn language_keywords_extend_implicit_capture() {
        let dir = tempdir().unwrap();
        let (store, wal, config, _) = pipeline_parts(dir.path());
        let mut languages = LanguageKeywords::default();
        languages.triggers.insert("es".to_string(), vec!["me gusta".to_string()]);
        let pipeline = WritePipeline::new(&store, None, None, &wal, &config, &languages);

        let mut req = CaptureRequest::new("me gusta el tema oscuro", Source::User);
        req.explicit = false;
        let outcome = pipeline.write(req.clone(), Utc::now()).await.unwrap();
        assert!(matches!(outcome, WriteOutcome::Created(_)));

        req.text = "nothing memorable here at all".to_string();
        let dropped = pipeline.write(req, Utc::now()).await.unwrap();
        assert!(matches!(dropped, WriteOutcome::Dropped { .. }));
    }
}
