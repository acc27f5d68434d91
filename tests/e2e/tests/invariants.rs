//! Property tests for the engine's core invariants (P1-P5).

use hearth_core::fact::{Category, DecayClass, Source, Tier};
use hearth_core::vector::{VectorIndex, VectorIndexConfig};
use hearth_core::{CaptureRequest, EngineConfig, Fact, RecallOptions, RecallResult};
use hearth_e2e_tests::harness::TestEngine;
use std::collections::HashSet;

fn full_facts(result: RecallResult) -> Vec<Fact> {
    match result {
        RecallResult::Full(facts) => facts,
        RecallResult::Progressive(_) => panic!("expected full recall result"),
    }
}

/// P1: after store/forget/recall ops followed by shutdown + restart, the
/// set of non-superseded facts is unchanged (modulo WAL recovery).
#[tokio::test]
async fn p1_non_superseded_fact_set_survives_restart() {
    let harness = TestEngine::new();
    let kept = harness.store_text("we decided to use SQLite for storage").await;
    let forgotten = harness.store_text("a fact nobody needs anymore").await;
    harness.engine.forget(&forgotten.id).unwrap();

    let before: HashSet<String> = full_facts(
        harness.engine.recall("SQLite", RecallOptions::fts_dominant(10)).await.unwrap(),
    )
    .into_iter()
    .filter(|f| !f.is_superseded())
    .map(|f| f.id)
    .collect();

    let harness = harness.reopen();

    let after: HashSet<String> = full_facts(
        harness.engine.recall("SQLite", RecallOptions::fts_dominant(10)).await.unwrap(),
    )
    .into_iter()
    .filter(|f| !f.is_superseded())
    .map(|f| f.id)
    .collect();

    assert!(before.contains(&kept.id));
    assert!(after.contains(&kept.id));
    assert!(!after.contains(&forgotten.id));
}

/// P2: `decay_class = permanent` iff `expires_at = None`, for every other
/// class `expires_at` is `Some`.
#[test]
fn p2_permanent_iff_no_expiry() {
    for decay_class in [
        DecayClass::Permanent,
        DecayClass::Stable,
        DecayClass::Active,
        DecayClass::Session,
        DecayClass::Checkpoint,
    ] {
        let fact = Fact::new(
            "text".to_string(),
            None,
            None,
            None,
            Category::Fact,
            vec![],
            0.5,
            decay_class,
            Source::User,
            None,
            chrono::Utc::now(),
        );
        assert_eq!(fact.expires_at.is_none(), decay_class == DecayClass::Permanent);
    }
}

/// P3: no vector exists whose id is absent from the Fact Store, after the
/// startup orphan sweep.
#[test]
fn p3_orphan_sweep_removes_vectors_with_no_live_fact() {
    let config = VectorIndexConfig::from_engine_config(&EngineConfig::default());
    let mut index = VectorIndex::with_config(config).unwrap();

    let live_vec = vec![0.1f32; EngineConfig::default().vector_dimensions];
    let orphan_vec = vec![0.2f32; EngineConfig::default().vector_dimensions];
    index.add("live-id", &live_vec).unwrap();
    index.add("orphan-id", &orphan_vec).unwrap();
    assert_eq!(index.len(), 2);

    let mut live_ids = HashSet::new();
    live_ids.insert("live-id".to_string());

    let removed = index.sweep_orphans(&live_ids).unwrap();
    assert_eq!(removed, 1);
    assert_eq!(index.len(), 1);
}

/// P5: `refresh(id)` extends `expires_at` from `last_confirmed_at`; a
/// fact whose TTL was about to lapse is pushed back out by a fresh access.
#[test]
fn p5_refresh_recomputes_expiry_from_last_confirmed_at() {
    let now = chrono::Utc::now();
    let mut fact = Fact::new(
        "active task in progress".to_string(),
        None,
        None,
        None,
        Category::Fact,
        vec![],
        0.5,
        DecayClass::Active,
        Source::User,
        None,
        now,
    );
    let original_expiry = fact.expires_at.unwrap();

    let later = now + chrono::Duration::days(10);
    fact.refresh(later);

    assert!(fact.expires_at.unwrap() > original_expiry);
    assert_eq!(fact.expires_at.unwrap(), later + DecayClass::Active.ttl().unwrap());
}

/// Tier compaction leaves untagged, fresh facts untouched (sanity check
/// alongside the seed-scenario compaction journey).
#[tokio::test]
async fn compaction_is_a_no_op_on_an_empty_store() {
    let harness = TestEngine::new();
    let result = harness.engine.compact().unwrap();
    assert_eq!(result.hot, 0);
    let stats = harness.engine.stats().unwrap();
    assert_eq!(stats.total_facts, 0);
    let _ = Tier::Warm;
}
