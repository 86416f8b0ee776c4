use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};

use crate::{Error, Result};

/// Dimension of the AllMiniLML6V2 model
pub const MINILM_DIMENSION: usize = 384;

/// Turns text into vectors for the vector index
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Dimension of produced vectors
    fn dimension(&self) -> usize;

    /// Embed a batch of texts, one vector per input
    async fn embed(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>>;

    /// Embed a single search query
    async fn embed_query(&self, query: &str) -> Result<Vec<f32>> {
        let mut vectors = self.embed(vec![query.to_string()]).await?;
        vectors.pop().ok_or_else(|| embed_error("embedder returned no vector"))
    }
}

fn embed_error(reason: &str) -> Error {
    Error::VectorStore {
        operation: "embed",
        id: "-".into(),
        reason: reason.into(),
    }
}

/// Engine for generating text embeddings using local transformer models
pub struct FastEmbedder {
    model: Arc<Mutex<TextEmbedding>>,
}

impl FastEmbedder {
    /// Create a new embedding engine with the default model
    pub fn new() -> Result<Self> {
        let mut options = InitOptions::default();
        options.model_name = EmbeddingModel::AllMiniLML6V2;
        options.show_download_progress = true;

        let model = TextEmbedding::try_new(options).map_err(|e| {
            tracing::warn!("Failed to load embedding model: {}", e);
            embed_error("embedding model could not be loaded")
        })?;

        Ok(Self {
            model: Arc::new(Mutex::new(model)),
        })
    }
}

#[async_trait]
impl Embedder for FastEmbedder {
    fn dimension(&self) -> usize {
        MINILM_DIMENSION
    }

    async fn embed(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(vec![]);
        }

        let model = Arc::clone(&self.model);
        let result = tokio::task::spawn_blocking(move || {
            let model = model.lock().map_err(|_| embed_error("embedding model lock poisoned"))?;
            model.embed(texts, None).map_err(|e| {
                tracing::warn!("Embedding generation failed: {}", e);
                embed_error("embedding generation failed")
            })
        })
        .await
        .map_err(|_| embed_error("embedding task aborted"))?;

        result
    }
}

/// Deterministic offline embedder: feature-hashed character bigrams.
///
/// Needs no model download; similar strings land close together, which
/// is enough for tests and for running without a transformer model.
#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dimension: usize,
}

impl HashingEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self { dimension: dimension.max(1) }
    }

    pub fn embed_text(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimension];
        let chars: Vec<char> = text.to_lowercase().chars().filter(|c| !c.is_whitespace()).collect();

        let mut bump = |gram: &str| {
            let hash = blake3::hash(gram.as_bytes());
            let bytes = hash.as_bytes();
            let slot = u64::from_le_bytes([
                bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5], bytes[6], bytes[7],
            ]) as usize
                % self.dimension;
            let sign = if bytes[8] & 1 == 0 { 1.0 } else { -1.0 };
            vector[slot] += sign;
        };

        if chars.len() == 1 {
            bump(&chars[0].to_string());
        }
        for pair in chars.windows(2) {
            let gram: String = pair.iter().collect();
            bump(&gram);
        }

        let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            vector.iter_mut().for_each(|x| *x /= norm);
        }
        vector
    }
}

#[async_trait]
impl Embedder for HashingEmbedder {
    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed_text(t)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::vector::cosine_similarity;

    #[tokio::test]
    async fn test_hashing_embedder_is_deterministic() {
        let embedder = HashingEmbedder::new(64);
        let a = embedder.embed_query("苹果公司股价").await.unwrap();
        let b = embedder.embed_query("苹果公司股价").await.unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[tokio::test]
    async fn test_hashing_embedder_similarity() {
        let embedder = HashingEmbedder::new(256);
        let a = embedder.embed_query("Apple Inc reported earnings").await.unwrap();
        let b = embedder.embed_query("Apple Inc earnings report").await.unwrap();
        let c = embedder.embed_query("香蕉").await.unwrap();
        assert!(cosine_similarity(&a, &b) > cosine_similarity(&a, &c));
    }

    #[tokio::test]
    async fn test_empty_text_is_zero_vector() {
        let embedder = HashingEmbedder::new(8);
        let v = embedder.embed_query("").await.unwrap();
        assert!(v.iter().all(|x| *x == 0.0));
    }
}
