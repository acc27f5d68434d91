//! Test Engine Manager
//!
//! Provides isolated, on-disk [`hearth_core::Engine`] instances for tests:
//! temporary data directories cleaned up on drop, and a `reopen()` helper
//! for crash-recovery scenarios (WAL replay, P1).

use hearth_core::embedding::{EmbeddingClient, MockEmbeddingClient};
use hearth_core::{CaptureRequest, Engine, EngineConfig, StoreResult};
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::TempDir;

/// An [`Engine`] rooted in a temporary directory that survives across
/// `reopen()` calls, so tests can exercise startup recovery without losing
/// the on-disk state.
pub struct TestEngine {
    pub engine: Engine,
    temp_dir: TempDir,
    config: EngineConfig,
}

impl TestEngine {
    /// Build a fresh engine with a deterministic mock embedding client, no
    /// LLM client, and default config.
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    pub fn with_config(config: EngineConfig) -> Self {
        let temp_dir = TempDir::new().expect("failed to create temp directory");
        let embedder: Arc<dyn EmbeddingClient> = Arc::new(MockEmbeddingClient::new(config.vector_dimensions));
        let engine = Engine::open(temp_dir.path(), config.clone(), Some(embedder), None)
            .expect("failed to open engine");
        Self { engine, temp_dir, config }
    }

    pub fn data_dir(&self) -> PathBuf {
        self.temp_dir.path().to_path_buf()
    }

    /// Simulate a process restart: drop the current `Engine` (releasing its
    /// SQLite/WAL/vector-index handles) and reopen against the same data
    /// directory, running startup recovery again.
    pub fn reopen(self) -> Self {
        let TestEngine { engine, temp_dir, config } = self;
        drop(engine);
        let embedder: Arc<dyn EmbeddingClient> = Arc::new(MockEmbeddingClient::new(config.vector_dimensions));
        let engine = Engine::open(temp_dir.path(), config.clone(), Some(embedder), None)
            .expect("failed to reopen engine");
        Self { engine, temp_dir, config }
    }

    /// Store `text` as an explicit fact and return the `store()` result.
    pub async fn store_text(&self, text: &str) -> StoreResult {
        self.engine
            .store(CaptureRequest::new(text, hearth_core::fact::Source::User))
            .await
            .expect("store failed")
    }
}

impl Default for TestEngine {
    fn default() -> Self {
        Self::new()
    }
}
