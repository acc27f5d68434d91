//! HNSW approximate-nearest-neighbor index over fact embeddings (§4.2).
//!
//! A usearch-backed `Index` with a string-key/u64-id mapping, purely
//! in-memory: durability (§4.2 "the index MUST survive process restart")
//! comes from persisting the embeddings themselves as BLOBs in the Fact
//! Store and rebuilding this index from them on [`crate::Engine::open`],
//! not from serializing the index structure itself. Dimensions come from
//! [`crate::config::EngineConfig`]; a mismatch against an embedding read
//! back from storage is a hard error (Open Question (b) in `DESIGN.md`),
//! never silent truncation.

use std::collections::{HashMap, HashSet};

use usearch::{Index, IndexOptions, MetricKind, ScalarKind};

/// HNSW connectivity parameter (higher = better recall, more memory).
pub const DEFAULT_CONNECTIVITY: usize = 16;
/// HNSW expansion factor for index building.
pub const DEFAULT_EXPANSION_ADD: usize = 128;
/// HNSW expansion factor for search.
pub const DEFAULT_EXPANSION_SEARCH: usize = 64;

/// Failure modes for the vector index (§4.2, §7 `VectorIndex`).
#[non_exhaustive]
#[derive(Debug, Clone)]
pub enum VectorSearchError {
    IndexCreation(String),
    IndexAdd(String),
    IndexSearch(String),
    /// Embedding dimensionality didn't match the index's configured size —
    /// always a hard failure, never truncated or padded.
    InvalidDimensions(usize, usize),
    KeyNotFound(String),
}

impl std::fmt::Display for VectorSearchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VectorSearchError::IndexCreation(e) => write!(f, "index creation failed: {e}"),
            VectorSearchError::IndexAdd(e) => write!(f, "failed to add vector: {e}"),
            VectorSearchError::IndexSearch(e) => write!(f, "search failed: {e}"),
            VectorSearchError::InvalidDimensions(expected, got) => {
                write!(f, "invalid dimensions: expected {expected}, got {got}")
            }
            VectorSearchError::KeyNotFound(key) => write!(f, "key not found: {key}"),
        }
    }
}

impl std::error::Error for VectorSearchError {}

/// Construction parameters for a [`VectorIndex`].
#[derive(Debug, Clone)]
pub struct VectorIndexConfig {
    pub dimensions: usize,
    pub connectivity: usize,
    pub expansion_add: usize,
    pub expansion_search: usize,
    pub metric: MetricKind,
}

impl VectorIndexConfig {
    /// Build a config from the engine-wide tunables.
    pub fn from_engine_config(cfg: &crate::config::EngineConfig) -> Self {
        Self {
            dimensions: cfg.vector_dimensions,
            connectivity: DEFAULT_CONNECTIVITY,
            expansion_add: DEFAULT_EXPANSION_ADD,
            expansion_search: DEFAULT_EXPANSION_SEARCH,
            metric: MetricKind::Cos,
        }
    }
}

/// Point-in-time counts for [`VectorIndex::stats`].
#[derive(Debug, Clone)]
pub struct VectorIndexStats {
    pub total_vectors: usize,
    pub dimensions: usize,
    pub connectivity: usize,
    pub memory_bytes: usize,
}

/// HNSW index keyed by fact id.
pub struct VectorIndex {
    index: Index,
    config: VectorIndexConfig,
    key_to_id: HashMap<String, u64>,
    id_to_key: HashMap<u64, String>,
    next_id: u64,
}

impl VectorIndex {
    pub fn with_config(config: VectorIndexConfig) -> Result<Self, VectorSearchError> {
        let options = IndexOptions {
            dimensions: config.dimensions,
            metric: config.metric,
            quantization: ScalarKind::I8,
            connectivity: config.connectivity,
            expansion_add: config.expansion_add,
            expansion_search: config.expansion_search,
            multi: false,
        };

        let index =
            Index::new(&options).map_err(|e| VectorSearchError::IndexCreation(e.to_string()))?;

        Ok(Self {
            index,
            config,
            key_to_id: HashMap::new(),
            id_to_key: HashMap::new(),
            next_id: 0,
        })
    }

    pub fn len(&self) -> usize {
        self.index.size()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn dimensions(&self) -> usize {
        self.config.dimensions
    }

    /// Reserve capacity before adding — usearch requires this to avoid
    /// segfaults when the index grows past its current capacity.
    pub fn reserve(&self, capacity: usize) -> Result<(), VectorSearchError> {
        self.index
            .reserve(capacity)
            .map_err(|e| VectorSearchError::IndexCreation(format!("failed to reserve capacity: {e}")))
    }

    /// Insert or replace the embedding for `key` (a fact id).
    pub fn add(&mut self, key: &str, vector: &[f32]) -> Result<(), VectorSearchError> {
        if vector.len() != self.config.dimensions {
            return Err(VectorSearchError::InvalidDimensions(
                self.config.dimensions,
                vector.len(),
            ));
        }

        if let Some(&existing_id) = self.key_to_id.get(key) {
            self.index
                .remove(existing_id)
                .map_err(|e| VectorSearchError::IndexAdd(e.to_string()))?;
            self.reserve(self.index.size() + 1)?;
            self.index
                .add(existing_id, vector)
                .map_err(|e| VectorSearchError::IndexAdd(e.to_string()))?;
            return Ok(());
        }

        let current_capacity = self.index.capacity();
        let current_size = self.index.size();
        if current_size >= current_capacity {
            let new_capacity = std::cmp::max(current_capacity * 2, 16);
            self.reserve(new_capacity)?;
        }

        let id = self.next_id;
        self.next_id += 1;

        self.index
            .add(id, vector)
            .map_err(|e| VectorSearchError::IndexAdd(e.to_string()))?;

        self.key_to_id.insert(key.to_string(), id);
        self.id_to_key.insert(id, key.to_string());

        Ok(())
    }

    pub fn remove(&mut self, key: &str) -> Result<bool, VectorSearchError> {
        if let Some(id) = self.key_to_id.remove(key) {
            self.id_to_key.remove(&id);
            self.index
                .remove(id)
                .map_err(|e| VectorSearchError::IndexAdd(e.to_string()))?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.key_to_id.contains_key(key)
    }

    /// Drop every vector whose key is not in `live_ids` — repairs invariant
    /// I3 ("the vector index never holds an embedding for a fact the Fact
    /// Store doesn't have") after a crash or a WAL replay gap. Returns how
    /// many orphans were removed.
    pub fn sweep_orphans(&mut self, live_ids: &HashSet<String>) -> Result<usize, VectorSearchError> {
        let orphans: Vec<String> = self
            .key_to_id
            .keys()
            .filter(|k| !live_ids.contains(*k))
            .cloned()
            .collect();
        for key in &orphans {
            self.remove(key)?;
        }
        Ok(orphans.len())
    }

    pub fn search(&self, query: &[f32], limit: usize) -> Result<Vec<(String, f32)>, VectorSearchError> {
        if query.len() != self.config.dimensions {
            return Err(VectorSearchError::InvalidDimensions(
                self.config.dimensions,
                query.len(),
            ));
        }

        if self.is_empty() {
            return Ok(vec![]);
        }

        let results = self
            .index
            .search(query, limit)
            .map_err(|e| VectorSearchError::IndexSearch(e.to_string()))?;

        let mut search_results = Vec::with_capacity(results.keys.len());
        for (key, distance) in results.keys.iter().zip(results.distances.iter()) {
            if let Some(string_key) = self.id_to_key.get(key) {
                let score = 1.0 - distance;
                search_results.push((string_key.clone(), score));
            }
        }

        Ok(search_results)
    }

    pub fn search_with_threshold(
        &self,
        query: &[f32],
        limit: usize,
        min_similarity: f32,
    ) -> Result<Vec<(String, f32)>, VectorSearchError> {
        let results = self.search(query, limit)?;
        Ok(results
            .into_iter()
            .filter(|(_, score)| *score >= min_similarity)
            .collect())
    }

    pub fn stats(&self) -> VectorIndexStats {
        VectorIndexStats {
            total_vectors: self.len(),
            dimensions: self.config.dimensions,
            connectivity: self.config.connectivity,
            memory_bytes: self.index.serialized_length(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEST_DIMENSIONS: usize = 32;

    fn test_config() -> VectorIndexConfig {
        VectorIndexConfig {
            dimensions: TEST_DIMENSIONS,
            connectivity: DEFAULT_CONNECTIVITY,
            expansion_add: DEFAULT_EXPANSION_ADD,
            expansion_search: DEFAULT_EXPANSION_SEARCH,
            metric: MetricKind::Cos,
        }
    }

    fn create_test_vector(seed: f32) -> Vec<f32> {
        (0..TEST_DIMENSIONS)
            .map(|i| ((i as f32 + seed) / TEST_DIMENSIONS as f32).sin())
            .collect()
    }

    #[test]
    fn index_creation_starts_empty() {
        let index = VectorIndex::with_config(test_config()).unwrap();
        assert_eq!(index.len(), 0);
        assert!(index.is_empty());
        assert_eq!(index.dimensions(), TEST_DIMENSIONS);
    }

    #[test]
    fn add_and_search_finds_nearest() {
        let mut index = VectorIndex::with_config(test_config()).unwrap();

        let v1 = create_test_vector(1.0);
        let v2 = create_test_vector(2.0);
        let v3 = create_test_vector(100.0);

        index.add("fact-1", &v1).unwrap();
        index.add("fact-2", &v2).unwrap();
        index.add("fact-3", &v3).unwrap();

        assert_eq!(index.len(), 3);
        assert!(index.contains("fact-1"));
        assert!(!index.contains("fact-999"));

        let results = index.search(&v1, 3).unwrap();
        assert!(!results.is_empty());
        assert_eq!(results[0].0, "fact-1");
    }

    #[test]
    fn remove_drops_key() {
        let mut index = VectorIndex::with_config(test_config()).unwrap();
        let v1 = create_test_vector(1.0);

        index.add("fact-1", &v1).unwrap();
        assert!(index.remove("fact-1").unwrap());
        assert!(!index.contains("fact-1"));
        assert!(!index.remove("fact-1").unwrap());
    }

    #[test]
    fn re_add_same_key_updates_in_place() {
        let mut index = VectorIndex::with_config(test_config()).unwrap();
        let v1 = create_test_vector(1.0);
        let v2 = create_test_vector(2.0);

        index.add("fact-1", &v1).unwrap();
        assert_eq!(index.len(), 1);

        index.add("fact-1", &v2).unwrap();
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn invalid_dimensions_rejected() {
        let mut index = VectorIndex::with_config(test_config()).unwrap();
        let wrong_size: Vec<f32> = vec![1.0, 2.0, 3.0];

        let result = index.add("fact-1", &wrong_size);
        assert!(matches!(result, Err(VectorSearchError::InvalidDimensions(_, _))));
    }

    #[test]
    fn sweep_orphans_removes_unlisted_keys() {
        let mut index = VectorIndex::with_config(test_config()).unwrap();
        index.add("fact-1", &create_test_vector(1.0)).unwrap();
        index.add("fact-2", &create_test_vector(2.0)).unwrap();

        let mut live = HashSet::new();
        live.insert("fact-1".to_string());

        let removed = index.sweep_orphans(&live).unwrap();
        assert_eq!(removed, 1);
        assert!(index.contains("fact-1"));
        assert!(!index.contains("fact-2"));
    }

    #[test]
    fn search_with_threshold_filters_dissimilar() {
        let mut index = VectorIndex::with_config(test_config()).unwrap();

        let v1 = create_test_vector(1.0);
        let v2 = create_test_vector(100.0);

        index.add("similar", &v1).unwrap();
        index.add("different", &v2).unwrap();

        let results = index.search_with_threshold(&v1, 10, 0.9).unwrap();
        assert!(results.iter().any(|(k, _)| k == "similar"));
    }

    #[test]
    fn stats_reports_counts() {
        let mut index = VectorIndex::with_config(test_config()).unwrap();
        let v1 = create_test_vector(1.0);

        index.add("fact-1", &v1).unwrap();

        let stats = index.stats();
        assert_eq!(stats.total_vectors, 1);
        assert_eq!(stats.dimensions, TEST_DIMENSIONS);
    }
}
