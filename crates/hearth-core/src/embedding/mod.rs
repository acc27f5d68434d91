//! Embedding service contract (§6.5): an external collaborator interface
//! only — this crate ships no model, no ONNX runtime. A host binds a
//! concrete client (e.g. an HTTP call to a remote embedding service) and
//! passes it in.

use async_trait::async_trait;

/// Failure modes for an embedding call (§6.5, §7 "transient external").
#[non_exhaustive]
#[derive(Debug, Clone)]
pub enum EmbeddingError {
    /// The service returned an error or timed out.
    RequestFailed(String),
    /// Input was rejected before the call was made (empty text, etc.).
    InvalidInput(String),
}

impl std::fmt::Display for EmbeddingError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EmbeddingError::RequestFailed(e) => write!(f, "embedding request failed: {e}"),
            EmbeddingError::InvalidInput(e) => write!(f, "invalid embedding input: {e}"),
        }
    }
}

impl std::error::Error for EmbeddingError {}

/// `embed(text) -> float[dim]` (§6.5). Implementations are expected to
/// retry transient failures with backoff internally; the engine applies
/// only the bounded timeout from [`crate::config::EngineConfig::embedding_timeout`]
/// around the call.
#[async_trait]
pub trait EmbeddingClient: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;

    /// Stable output dimension, used to validate against
    /// [`crate::config::EngineConfig::vector_dimensions`] on startup.
    fn dimensions(&self) -> usize;
}

/// No-op client: every call fails, so callers exercise the "continue
/// without vector" degrade path (§4.5 step 5) without needing network I/O.
pub struct NullEmbeddingClient {
    dimensions: usize,
}

impl NullEmbeddingClient {
    pub fn new(dimensions: usize) -> Self {
        Self { dimensions }
    }
}

#[async_trait]
impl EmbeddingClient for NullEmbeddingClient {
    async fn embed(&self, _text: &str) -> Result<Vec<f32>, EmbeddingError> {
        Err(EmbeddingError::RequestFailed("no embedding client configured".to_string()))
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}

/// Deterministic fixed-vector client for tests: derives a vector from a
/// hash of the input text so equal text always embeds identically.
pub struct MockEmbeddingClient {
    dimensions: usize,
}

impl MockEmbeddingClient {
    pub fn new(dimensions: usize) -> Self {
        Self { dimensions }
    }
}

#[async_trait]
impl EmbeddingClient for MockEmbeddingClient {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        if text.trim().is_empty() {
            return Err(EmbeddingError::InvalidInput("empty text".to_string()));
        }
        let mut seed: u64 = 1469598103934665603;
        for byte in text.bytes() {
            seed ^= byte as u64;
            seed = seed.wrapping_mul(1099511628211);
        }
        let vector: Vec<f32> = (0..self.dimensions)
            .map(|i| {
                let x = seed.wrapping_add(i as u64) as f64;
                ((x.sin()) as f32).clamp(-1.0, 1.0)
            })
            .collect();
        Ok(normalize(&vector))
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}

/// L2-normalize a vector, leaving zero vectors untouched.
pub fn normalize(vector: &[f32]) -> Vec<f32> {
    let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm == 0.0 {
        return vector.to_vec();
    }
    vector.iter().map(|x| x / norm).collect()
}

/// Cosine similarity between two equal-length vectors; `0.0` if either is
/// zero-length or dimensions mismatch.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

/// Componentwise mean of one or more vectors, L2-normalized — used for
/// HyDE centroid embeddings (§4.6 step 2).
pub fn centroid(vectors: &[Vec<f32>]) -> Option<Vec<f32>> {
    let dims = vectors.first()?.len();
    let mut sum = vec![0.0f32; dims];
    for v in vectors {
        for (i, x) in v.iter().enumerate() {
            sum[i] += x;
        }
    }
    let n = vectors.len() as f32;
    for x in &mut sum {
        *x /= n;
    }
    Some(normalize(&sum))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mock_client_is_deterministic() {
        let client = MockEmbeddingClient::new(16);
        let a = client.embed("hello world").await.unwrap();
        let b = client.embed("hello world").await.unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 16);
    }

    #[tokio::test]
    async fn mock_client_rejects_empty_input() {
        let client = MockEmbeddingClient::new(16);
        assert!(client.embed("").await.is_err());
    }

    #[tokio::test]
    async fn null_client_always_fails() {
        let client = NullEmbeddingClient::new(16);
        assert!(client.embed("anything").await.is_err());
    }

    #[test]
    fn cosine_similarity_of_identical_vectors_is_one() {
        let v = vec![1.0, 2.0, 3.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-5);
    }

    #[test]
    fn centroid_of_single_vector_is_itself_normalized() {
        let v = vec![3.0, 4.0];
        let c = centroid(&[v]).unwrap();
        assert!((c[0] - 0.6).abs() < 1e-5);
        assert!((c[1] - 0.8).abs() < 1e-5);
    }
}
