//! Reciprocal Rank Fusion and linear-combination fallback (§4.6 step 3).

use std::collections::HashMap;

/// `score(id) = Σ 1/(k + rank_i)` over every branch's ranked list.
pub fn reciprocal_rank_fusion(branches: &[&[(String, f32)]], k: f32) -> Vec<(String, f32)> {
    let mut scores: HashMap<String, f32> = HashMap::new();
    for branch in branches {
        for (rank, (id, _)) in branch.iter().enumerate() {
            *scores.entry(id.clone()).or_default() += 1.0 / (k + rank as f32);
        }
    }
    let mut results: Vec<(String, f32)> = scores.into_iter().collect();
    results.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    results
}

/// Weighted-sum fallback for when RRF's rank-only view isn't desired.
pub fn linear_combination(
    keyword_results: &[(String, f32)],
    semantic_results: &[(String, f32)],
    keyword_weight: f32,
    semantic_weight: f32,
) -> Vec<(String, f32)> {
    let mut scores: HashMap<String, f32> = HashMap::new();

    let max_keyword = keyword_results.first().map(|(_, s)| *s).unwrap_or(1.0).max(0.001);
    for (key, score) in keyword_results {
        *scores.entry(key.clone()).or_default() += (score / max_keyword) * keyword_weight;
    }

    let max_semantic = semantic_results.first().map(|(_, s)| *s).unwrap_or(1.0).max(0.001);
    for (key, score) in semantic_results {
        *scores.entry(key.clone()).or_default() += (score / max_semantic) * semantic_weight;
    }

    let mut results: Vec<(String, f32)> = scores.into_iter().collect();
    results.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    results
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rrf_rewards_items_in_multiple_branches() {
        let fts: Vec<(String, f32)> = vec![("a".into(), 0.9), ("b".into(), 0.8), ("c".into(), 0.7)];
        let vector: Vec<(String, f32)> = vec![("b".into(), 0.95), ("a".into(), 0.85), ("d".into(), 0.75)];

        let results = reciprocal_rank_fusion(&[&fts, &vector], 60.0);

        for i in 1..results.len() {
            assert!(results[i - 1].1 >= results[i].1);
        }
        let top_two: Vec<&str> = results[..2].iter().map(|(id, _)| id.as_str()).collect();
        assert!(top_two.contains(&"a"));
        assert!(top_two.contains(&"b"));
    }

    #[test]
    fn rrf_with_single_branch_preserves_rank_order() {
        let fts: Vec<(String, f32)> = vec![];
        let vector: Vec<(String, f32)> = vec![("solo".into(), 0.9)];
        let results = reciprocal_rank_fusion(&[&fts, &vector], 60.0);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].0, "solo");
    }

    #[test]
    fn linear_combination_weights_dominant_branch_higher() {
        let keyword = vec![("doc-1".to_string(), 1.0)];
        let semantic = vec![("doc-2".to_string(), 1.0)];

        let results = linear_combination(&keyword, &semantic, 0.9, 0.1);

        let doc1 = results.iter().find(|(k, _)| k == "doc-1").map(|(_, s)| *s).unwrap();
        let doc2 = results.iter().find(|(k, _)| k == "doc-2").map(|(_, s)| *s).unwrap();
        assert!(doc1 > doc2);
    }
}
