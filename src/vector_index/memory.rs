use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;

use super::{IndexDoc, ScoredDoc, VectorIndexAdapter};
use crate::error::{Error, Result};

/// Default per-call cap on how many ids `delete_docs` removes before
/// looping, mirroring `ElasticsearchAdapter`'s `delete_docs_cap`.
const DEFAULT_DELETE_DOCS_CAP: usize = 50;

/// Deterministic, in-process stand-in for a remote vector index. Brute-force
/// cosine kNN and a simple term-frequency BM25 approximation over `context`
/// are enough to exercise fusion, the integrity check, and the delete-cap
/// loop without a live backend.
pub struct InMemoryVectorIndexAdapter {
    kbs: RwLock<HashMap<String, Vec<IndexDoc>>>,
    delete_docs_cap: usize,
}

impl InMemoryVectorIndexAdapter {
    pub fn new() -> Self {
        Self::with_delete_docs_cap(DEFAULT_DELETE_DOCS_CAP)
    }

    /// Construct with a custom per-call delete cap, mainly so tests can
    /// exercise the looping behavior with a small number of docs.
    pub fn with_delete_docs_cap(delete_docs_cap: usize) -> Self {
        Self {
            kbs: RwLock::new(HashMap::new()),
            delete_docs_cap: delete_docs_cap.max(1),
        }
    }
}

impl Default for InMemoryVectorIndexAdapter {
    fn default() -> Self {
        Self::new()
    }
}

fn cosine(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    (dot / (norm_a * norm_b)) as f64
}

fn term_frequency_score(query: &str, context: &str) -> f64 {
    let query_terms: Vec<String> = query.to_lowercase().split_whitespace().map(String::from).collect();
    if query_terms.is_empty() {
        return 0.0;
    }
    let lower = context.to_lowercase();
    let mut score = 0.0;
    for term in &query_terms {
        let hits = lower.matches(term.as_str()).count();
        score += hits as f64;
    }
    score
}

#[async_trait]
impl VectorIndexAdapter for InMemoryVectorIndexAdapter {
    async fn exists_kb(&self, kb: &str) -> Result<bool> {
        Ok(self.kbs.read().contains_key(kb))
    }

    async fn create_kb(&self, kb: &str) -> Result<()> {
        self.kbs.write().entry(kb.to_string()).or_default();
        Ok(())
    }

    async fn delete_kb(&self, kb: &str) -> Result<()> {
        self.kbs.write().remove(kb);
        Ok(())
    }

    async fn clear_kb(&self, kb: &str) -> Result<()> {
        if let Some(docs) = self.kbs.write().get_mut(kb) {
            docs.clear();
        }
        Ok(())
    }

    async fn write_docs(&self, kb: &str, docs: &[IndexDoc]) -> Result<()> {
        let mut kbs = self.kbs.write();
        let entry = kbs.entry(kb.to_string()).or_default();
        entry.retain(|d| !docs.iter().any(|n| n.id == d.id));
        entry.extend(docs.iter().cloned());
        Ok(())
    }

    async fn docs_by_source(&self, kb: &str, source: &str) -> Result<Vec<IndexDoc>> {
        let kbs = self.kbs.read();
        let Some(docs) = kbs.get(kb) else {
            return Err(Error::KbNotFound(kb.to_string()));
        };
        Ok(docs
            .iter()
            .filter(|d| d.metadata.get("source").and_then(|v| v.as_str()) == Some(source))
            .cloned()
            .collect())
    }

    async fn delete_docs(&self, kb: &str, ids: &[String]) -> Result<()> {
        if !self.kbs.read().contains_key(kb) {
            return Err(Error::KbNotFound(kb.to_string()));
        }
        for batch in ids.chunks(self.delete_docs_cap) {
            let mut kbs = self.kbs.write();
            let Some(docs) = kbs.get_mut(kb) else {
                return Err(Error::KbNotFound(kb.to_string()));
            };
            docs.retain(|d| !batch.contains(&d.id));
        }
        Ok(())
    }

    async fn get_docs_by_ids(&self, kb: &str, ids: &[String]) -> Result<Vec<IndexDoc>> {
        let kbs = self.kbs.read();
        let Some(docs) = kbs.get(kb) else {
            return Err(Error::KbNotFound(kb.to_string()));
        };
        Ok(docs.iter().filter(|d| ids.contains(&d.id)).cloned().collect())
    }

    async fn knn_search(&self, kb: &str, vector: &[f32], top_k: usize) -> Result<Vec<ScoredDoc>> {
        let kbs = self.kbs.read();
        let Some(docs) = kbs.get(kb) else {
            return Err(Error::KbNotFound(kb.to_string()));
        };
        let mut scored: Vec<ScoredDoc> = docs
            .iter()
            .map(|d| ScoredDoc {
                doc: d.clone(),
                score: cosine(vector, &d.embedding),
            })
            .collect();
        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(top_k);
        Ok(scored)
    }

    async fn bm25_search(&self, kb: &str, query: &str, top_k: usize) -> Result<Vec<ScoredDoc>> {
        let kbs = self.kbs.read();
        let Some(docs) = kbs.get(kb) else {
            return Err(Error::KbNotFound(kb.to_string()));
        };
        let mut scored: Vec<ScoredDoc> = docs
            .iter()
            .map(|d| ScoredDoc {
                doc: d.clone(),
                score: term_frequency_score(query, &d.context),
            })
            .filter(|s| s.score > 0.0)
            .collect();
        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(top_k);
        Ok(scored)
    }
}
