mod http;
mod mock;

use async_trait::async_trait;

use crate::error::Result;

pub use http::HttpEmbeddingClient;
pub use mock::MockEmbeddingClient;

/// Remote collaborator that turns text into fixed-dimension dense vectors.
///
/// Transient failures (timeouts, 5xx) are surfaced as `Error::Embedding` for
/// the caller to retry; the vector dimensionality is fixed per deployment
/// and must match the vector index's mapping.
#[async_trait]
pub trait EmbeddingClient: Send + Sync {
    async fn embed_query(&self, text: &str) -> Result<Vec<f32>>;
    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}
