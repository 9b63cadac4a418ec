mod http;
mod memory;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::{Error, Result};

pub use http::ElasticsearchAdapter;
pub use memory::InMemoryVectorIndexAdapter;

/// A document as stored in the vector index: dense embedding plus the same
/// `context`/`metadata` carried from the catalog.
#[derive(Debug, Clone)]
pub struct IndexDoc {
    pub id: String,
    pub context: String,
    pub embedding: Vec<f32>,
    pub metadata: Value,
}

/// A document returned from a search, annotated with its match score.
#[derive(Debug, Clone)]
pub struct ScoredDoc {
    pub doc: IndexDoc,
    pub score: f64,
}

/// Capability the engine needs from a remote vector-index backend.
///
/// `add_docs` must read back what it just wrote before returning, surfacing
/// `Error::IndexIntegrity` if the source it just indexed comes back with
/// zero hits — the index is expected to behave as an absent → present →
/// absent state machine per source file.
#[async_trait]
pub trait VectorIndexAdapter: Send + Sync {
    async fn exists_kb(&self, kb: &str) -> Result<bool>;
    async fn create_kb(&self, kb: &str) -> Result<()>;
    async fn delete_kb(&self, kb: &str) -> Result<()>;
    async fn clear_kb(&self, kb: &str) -> Result<()>;

    /// Write `docs` to the index without performing the read-back check.
    async fn write_docs(&self, kb: &str, docs: &[IndexDoc]) -> Result<()>;
    /// Exact lookup of every doc tagged with `metadata.source == source`.
    async fn docs_by_source(&self, kb: &str, source: &str) -> Result<Vec<IndexDoc>>;

    async fn delete_docs(&self, kb: &str, ids: &[String]) -> Result<()>;
    async fn get_docs_by_ids(&self, kb: &str, ids: &[String]) -> Result<Vec<IndexDoc>>;

    async fn knn_search(&self, kb: &str, vector: &[f32], top_k: usize) -> Result<Vec<ScoredDoc>>;
    async fn bm25_search(&self, kb: &str, query: &str, top_k: usize) -> Result<Vec<ScoredDoc>>;

    /// Write `docs`, then read back the source they share to confirm the
    /// index actually indexed them. All docs in one call are expected to
    /// belong to the same source file.
    async fn add_docs(&self, kb: &str, docs: &[IndexDoc]) -> Result<()> {
        self.write_docs(kb, docs).await?;

        let Some(source) = docs.first().and_then(|d| d.metadata.get("source")).and_then(|v| v.as_str())
        else {
            return Ok(());
        };

        let hits = self.docs_by_source(kb, source).await?;
        if hits.is_empty() {
            return Err(Error::IndexIntegrity {
                kb: kb.to_string(),
                source: source.to_string(),
            });
        }
        Ok(())
    }
}
