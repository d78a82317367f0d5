use async_trait::async_trait;
use botway_common::Result;

/// Turns text into vectors. Concrete implementations wrap an embedding
/// model endpoint; tests use a deterministic fake.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// UUID of the runtime model backing this embedder.
    fn model_uuid(&self) -> &str;

    /// Embed a batch of texts. The output preserves input order and every
    /// vector has the same dimensionality.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    async fn embed_one(&self, text: &str) -> Result<Vec<f32>> {
        let mut vectors = self.embed(std::slice::from_ref(&text.to_string())).await?;
        Ok(vectors.pop().unwrap_or_default())
    }
}
