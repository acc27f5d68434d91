//! Journey tests covering the engine's seed scenarios end-to-end through
//! the public `Engine` API only (no private-field access, no time travel).

use hearth_core::fact::{Category, DecayClass, Source};
use hearth_core::{CaptureRequest, EngineConfig, RecallOptions, RecallResult};
use hearth_e2e_tests::harness::TestEngine;

fn full_facts(result: RecallResult) -> Vec<hearth_core::Fact> {
    match result {
        RecallResult::Full(facts) => facts,
        RecallResult::Progressive(_) => panic!("expected full recall result"),
    }
}

/// Scenario 1: capture -> recall, classified preference/stable with a
/// ~90 day TTL.
#[tokio::test]
async fn capture_then_recall_round_trips() {
    let harness = TestEngine::new();
    let mut req = CaptureRequest::new("I prefer dark mode", Source::User);
    req.entity = Some("user".to_string());
    req.key = Some("theme".to_string());
    let stored = harness.engine.store(req).await.unwrap();

    assert_eq!(stored.category, Category::Preference);
    assert_eq!(stored.decay_class, DecayClass::Stable);

    let recalled = full_facts(
        harness.engine.recall("dark mode", RecallOptions::conversational(5)).await.unwrap(),
    );
    let found = recalled.into_iter().find(|f| f.id == stored.id).expect("fact not recalled");
    let expected_expiry = found.created_at + chrono::Duration::days(90);
    assert!((found.expires_at.unwrap() - expected_expiry).num_seconds().abs() < 5);
}

/// Scenario 2: a second write for the same (entity, key) supersedes the
/// first; `lookup` returns only the live fact.
#[tokio::test]
async fn second_write_for_same_key_supersedes_the_first() {
    let harness = TestEngine::new();

    let mut first = CaptureRequest::new("user email is a@x", Source::User);
    first.entity = Some("user".to_string());
    first.key = Some("email".to_string());
    first.value = Some("a@x".to_string());
    let first_stored = harness.engine.store(first).await.unwrap();

    let mut second = CaptureRequest::new("user email is b@y", Source::User);
    second.entity = Some("user".to_string());
    second.key = Some("email".to_string());
    second.value = Some("b@y".to_string());
    let second_stored = harness.engine.store(second).await.unwrap();

    assert_ne!(first_stored.id, second_stored.id);
    let current = harness.engine.lookup("user", Some("email")).unwrap();
    assert_eq!(current.len(), 1);
    assert_eq!(current[0].id, second_stored.id);
    assert!(!current[0].is_superseded());
}

/// Scenario 3 (adapted, no time travel): a `session`-decay fact gets a
/// ~24h TTL at store time, and a dry-run prune reports it as not yet
/// expired.
#[tokio::test]
async fn session_fact_gets_a_short_ttl_and_is_not_yet_expired() {
    let harness = TestEngine::new();
    let req = CaptureRequest::new("right now I'm debugging a flaky test, this session only", Source::User);
    let stored = harness.engine.store(req).await.unwrap();
    assert_eq!(stored.decay_class, DecayClass::Session);

    let recalled = full_facts(
        harness.engine.recall("flaky test debugging", RecallOptions::fts_dominant(5)).await.unwrap(),
    );
    let found = recalled.into_iter().find(|f| f.id == stored.id).expect("fact not recalled");
    let expected_expiry = found.created_at + chrono::Duration::hours(24);
    assert!((found.expires_at.unwrap() - expected_expiry).num_seconds().abs() < 5);

    let prune_report = harness.engine.prune(true, false).unwrap();
    assert_eq!(prune_report.expired, 0);
}

/// Scenario 4: WAL recovery after a simulated crash (engine drop + reopen
/// mid-session). The committed fact survives the restart.
#[tokio::test]
async fn restart_after_write_preserves_facts_via_wal() {
    let harness = TestEngine::new();
    let stored = harness.store_text("we decided to use SQLite for storage").await;

    let harness = harness.reopen();

    let recalled = full_facts(
        harness.engine.recall("SQLite storage", RecallOptions::fts_dominant(5)).await.unwrap(),
    );
    assert!(recalled.iter().any(|f| f.id == stored.id));
}

/// Scenario 5: near-duplicate text is a refresh, not a second fact.
#[tokio::test]
async fn near_duplicate_capture_refreshes_rather_than_duplicates() {
    let harness = TestEngine::new();
    let first = harness.store_text("The project uses Postgres 16.").await;
    let second = harness.store_text("the project uses postgres 16").await;

    assert_eq!(first.id, second.id);

    let stats = harness.engine.stats().unwrap();
    assert_eq!(stats.total_facts, 1);
}

/// Scenario 6: tier compaction promotes "blocker"-tagged facts to HOT, and
/// demotes stale decision-category facts to COLD (`inactive_preference_days`
/// pinned to 0 so "older than the threshold" holds immediately, without
/// needing to fast-forward the clock).
#[tokio::test]
async fn compaction_promotes_blockers_and_demotes_stale_decisions() {
    let config = EngineConfig { inactive_preference_days: 0, ..EngineConfig::default() };
    let harness = TestEngine::with_config(config);

    let mut blocker_req = CaptureRequest::new("fix the blocking deploy issue", Source::User);
    blocker_req.tags = vec!["blocker".to_string()];
    let blocker = harness.engine.store(blocker_req).await.unwrap();

    let decision_req = CaptureRequest::new("we decided to use Postgres for storage", Source::User);
    let decision = harness.engine.store(decision_req).await.unwrap();
    assert_eq!(decision.category, Category::Decision);

    let _ = (&blocker, &decision);
    let result = harness.engine.compact().unwrap();
    assert!(result.hot >= 1, "expected the blocker-tagged fact to land in HOT: {result:?}");
    assert!(result.cold >= 1, "expected the stale decision fact to land in COLD: {result:?}");
}

#[tokio::test]
async fn forget_then_recall_returns_nothing() {
    let harness = TestEngine::new();
    let stored = harness.store_text("this fact will be forgotten").await;

    assert!(harness.engine.forget(&stored.id).unwrap());

    let recalled = full_facts(
        harness.engine.recall("this fact will be forgotten", RecallOptions::fts_dominant(5)).await.unwrap(),
    );
    assert!(!recalled.iter().any(|f| f.id == stored.id));
}
