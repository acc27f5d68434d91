//! Derived graph edges and the one-hop spreading-activation boost (§3.4,
//! §4.6 step 6): a plain `(source_id, target_id, edge_type, weight,
//! created_at)` table the Fact Store creates — purely derived, never
//! authoritative, no FK-cycle enforcement beyond app-level checks.

use std::collections::{HashMap, HashSet};

use crate::store::FactStore;

/// Record a directed edge between two facts. Calling this again for the
/// same `(source, target, edge_type)` updates the weight.
pub fn add_edge(
    store: &FactStore,
    source_id: &str,
    target_id: &str,
    edge_type: &str,
    weight: f32,
    now: chrono::DateTime<chrono::Utc>,
) -> crate::error::Result<()> {
    store.add_edge(source_id, target_id, edge_type, weight, now)
}

/// Walk outgoing edges from `seed_ids` one hop and return a boost map:
/// neighbor id -> `1/(1+hop)` (§4.6 step 6; hop is always 1 here since the
/// walk only ever goes one hop out).
pub fn one_hop_boost(
    store: &FactStore,
    seed_ids: &[String],
) -> crate::error::Result<HashMap<String, f32>> {
    let seeds: HashSet<&str> = seed_ids.iter().map(|s| s.as_str()).collect();
    let mut boosts: HashMap<String, f32> = HashMap::new();
    for seed in seed_ids {
        for (target_id, _edge_type, _weight) in store.edges_from(seed)? {
            if seeds.contains(target_id.as_str()) {
                continue;
            }
            let boost = 1.0 / (1.0 + 1.0_f32);
            let entry = boosts.entry(target_id).or_insert(0.0);
            if boost > *entry {
                *entry = boost;
            }
        }
    }
    Ok(boosts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn one_hop_boost_covers_direct_neighbors_only() {
        let store = FactStore::open_in_memory().unwrap();
        store.add_edge("a", "b", "mentions", 1.0, Utc::now()).unwrap();
        store.add_edge("b", "c", "mentions", 1.0, Utc::now()).unwrap();

        let boosts = one_hop_boost(&store, &["a".to_string()]).unwrap();
        assert!(boosts.contains_key("b"));
        assert!(!boosts.contains_key("c"), "two-hop neighbor must not be boosted");
        assert!((boosts["b"] - 0.5).abs() < 1e-6);
    }

    #[test]
    fn one_hop_boost_skips_seeds_already_present() {
        let store = FactStore::open_in_memory().unwrap();
        store.add_edge("a", "b", "mentions", 1.0, Utc::now()).unwrap();

        let boosts = one_hop_boost(&store, &["a".to_string(), "b".to_string()]).unwrap();
        assert!(!boosts.contains_key("b"));
    }
}
