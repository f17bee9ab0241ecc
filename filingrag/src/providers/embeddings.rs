//! Embedding provider seam plus the rig-backed adapter and a deterministic
//! mock.

use async_trait::async_trait;
use rig::embeddings::EmbeddingModel;

use super::ProviderError;

/// Fixed-dimension vector computation for chunks and queries.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Dimensionality of every vector this provider returns.
    fn dimensions(&self) -> usize;

    /// Embed a single text.
    async fn embed(&self, text: &str) -> Result<Vec<f32>, ProviderError>;

    /// Embed a batch; vectors are returned positionally, one per input.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError>;
}

/// Adapter over any [`rig::embeddings::EmbeddingModel`].
///
/// Splits batches at the model's document limit and narrows the provider's
/// `f64` components to the `f32` the vector store persists.
#[derive(Clone)]
pub struct RigEmbeddingProvider<M> {
    model: M,
    dimensions: usize,
}

impl<M> RigEmbeddingProvider<M>
where
    M: EmbeddingModel,
{
    pub fn new(model: M) -> Self {
        let dimensions = model.ndims();
        Self { model, dimensions }
    }
}

#[async_trait]
impl<M> EmbeddingProvider for RigEmbeddingProvider<M>
where
    M: EmbeddingModel + Sync,
{
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, ProviderError> {
        let mut vectors = self.embed_batch(std::slice::from_ref(&text.to_string())).await?;
        vectors
            .pop()
            .ok_or_else(|| ProviderError::failed("embedding", "model returned no vector"))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
        let mut out = Vec::with_capacity(texts.len());
        let batch_limit = M::MAX_DOCUMENTS.max(1);
        for window in texts.chunks(batch_limit) {
            let embeddings = self
                .model
                .embed_texts(window.iter().cloned())
                .await
                .map_err(|err| ProviderError::failed("embedding", err.to_string()))?;
            if embeddings.len() != window.len() {
                return Err(ProviderError::failed(
                    "embedding",
                    format!(
                        "model returned {} vectors for {} inputs",
                        embeddings.len(),
                        window.len()
                    ),
                ));
            }
            out.extend(
                embeddings
                    .into_iter()
                    .map(|e| e.vec.into_iter().map(|v| v as f32).collect::<Vec<f32>>()),
            );
        }
        Ok(out)
    }
}

/// Deterministic hash-derived embeddings for tests and offline runs.
///
/// Identical inputs yield identical vectors and distinct inputs almost
/// always differ, which is all the retrieval tests need.
#[derive(Clone, Debug)]
pub struct MockEmbeddingProvider {
    dimensions: usize,
}

impl Default for MockEmbeddingProvider {
    fn default() -> Self {
        Self::new(1536)
    }
}

impl MockEmbeddingProvider {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions: dimensions.max(1),
        }
    }

    fn vector_for(&self, text: &str) -> Vec<f32> {
        use std::collections::hash_map::DefaultHasher;
        use std::hash::{Hash, Hasher};

        let mut hasher = DefaultHasher::new();
        text.hash(&mut hasher);
        let seed = hasher.finish();
        let mut raw: Vec<f32> = (0..self.dimensions)
            .map(|i| {
                let bits = seed.rotate_left((i % 64) as u32) ^ ((i as u64) << 17);
                (bits as f64 / u64::MAX as f64) as f32 - 0.5
            })
            .collect();
        let norm = raw.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > f32::EPSILON {
            for v in &mut raw {
                *v /= norm;
            }
        }
        raw
    }
}

#[async_trait]
impl EmbeddingProvider for MockEmbeddingProvider {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, ProviderError> {
        Ok(self.vector_for(text))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
        Ok(texts.iter().map(|t| self.vector_for(t)).collect())
    }
}
