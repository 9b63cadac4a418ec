use std::collections::HashMap;

use crate::config::Config;
use crate::embedding::EmbeddingClient;
use crate::error::Result;
use crate::reranker::ReRankerClient;
use crate::vector_index::{ScoredDoc, VectorIndexAdapter};

/// Reciprocal Rank Fusion constant; larger values flatten the influence of
/// rank position, smaller values emphasize top ranks more sharply.
const RRF_C: f64 = 60.0;
const RRF_WEIGHT: f64 = 0.5;

/// A document returned from hybrid retrieval, carrying its fused RRF score
/// and, if re-ranking ran, the re-ranker's relevance score.
#[derive(Debug, Clone)]
pub struct RetrievedDoc {
    pub doc: ScoredDoc,
    pub rrf_score: f64,
    pub relevance_score: Option<f64>,
}

/// Run kNN and BM25 search in parallel, fuse with Reciprocal Rank Fusion,
/// then optionally re-rank. `score_threshold` is accepted for callers that
/// want to apply it themselves but is not applied by this function.
pub async fn search_docs(
    config: &Config,
    embedding: &dyn EmbeddingClient,
    index: &dyn VectorIndexAdapter,
    reranker: Option<&dyn ReRankerClient>,
    kb: &str,
    query: &str,
    top_k: usize,
) -> Result<Vec<RetrievedDoc>> {
    let vector = embedding.embed_query(query).await?;

    let (knn_hits, bm25_hits) = tokio::try_join!(
        index.knn_search(kb, &vector, top_k),
        index.bm25_search(kb, query, top_k),
    )?;

    let mut fused = fuse_rrf(&knn_hits, &bm25_hits);
    fused.truncate(top_k);

    if config.use_reranker {
        if let Some(reranker) = reranker {
            fused = rerank(reranker, query, fused, config.reranker_score_min, config.reranker_top_n).await?;
        }
    }

    Ok(fused)
}

/// Fuse two ranked lists with `score = sum(weight / (c + rank))`, tie-broken
/// by whichever list first introduced the document. Documents are deduped by
/// `context` (the document's `page_content`), not by id, so the same text
/// surfaced under two different ids still fuses into one result.
fn fuse_rrf(knn_hits: &[ScoredDoc], bm25_hits: &[ScoredDoc]) -> Vec<RetrievedDoc> {
    let mut scores: HashMap<String, f64> = HashMap::new();
    let mut docs: HashMap<String, ScoredDoc> = HashMap::new();
    let mut insertion_order: Vec<String> = Vec::new();

    for (rank, hit) in knn_hits.iter().enumerate() {
        let key = hit.doc.context.clone();
        *scores.entry(key.clone()).or_insert(0.0) += RRF_WEIGHT / (RRF_C + rank as f64 + 1.0);
        if !docs.contains_key(&key) {
            insertion_order.push(key.clone());
            docs.insert(key, hit.clone());
        }
    }
    for (rank, hit) in bm25_hits.iter().enumerate() {
        let key = hit.doc.context.clone();
        *scores.entry(key.clone()).or_insert(0.0) += RRF_WEIGHT / (RRF_C + rank as f64 + 1.0);
        if !docs.contains_key(&key) {
            insertion_order.push(key.clone());
            docs.insert(key, hit.clone());
        }
    }

    let mut order_index: HashMap<&str, usize> = HashMap::new();
    for (i, key) in insertion_order.iter().enumerate() {
        order_index.insert(key.as_str(), i);
    }

    let mut result: Vec<RetrievedDoc> = insertion_order
        .into_iter()
        .map(|key| {
            let rrf_score = scores[&key];
            let doc = docs.remove(&key).expect("doc present for scored key");
            RetrievedDoc {
                doc,
                rrf_score,
                relevance_score: None,
            }
        })
        .collect();

    result.sort_by(|a, b| {
        b.rrf_score
            .partial_cmp(&a.rrf_score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| {
                order_index[a.doc.doc.context.as_str()].cmp(&order_index[b.doc.doc.context.as_str()])
            })
    });

    result
}

async fn rerank(
    reranker: &dyn ReRankerClient,
    query: &str,
    docs: Vec<RetrievedDoc>,
    score_min: f64,
    top_n: usize,
) -> Result<Vec<RetrievedDoc>> {
    if docs.is_empty() {
        return Ok(docs);
    }

    let texts: Vec<String> = docs.iter().map(|d| d.doc.doc.context.clone()).collect();
    let scores = reranker.rerank(query, &texts).await?;

    let mut scored: Vec<RetrievedDoc> = docs
        .into_iter()
        .zip(scores)
        .map(|(mut doc, score)| {
            doc.relevance_score = Some(score);
            doc
        })
        .filter(|d| d.relevance_score.unwrap_or(0.0) > score_min)
        .collect();

    scored.sort_by(|a, b| {
        b.relevance_score
            .partial_cmp(&a.relevance_score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    scored.truncate(top_n);
    Ok(scored)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::MockEmbeddingClient;
    use crate::reranker::MockReRankerClient;
    use crate::vector_index::{IndexDoc, InMemoryVectorIndexAdapter, VectorIndexAdapter};
    use serde_json::json;

    fn doc(id: &str, context: &str, embedding: Vec<f32>) -> IndexDoc {
        IndexDoc {
            id: id.to_string(),
            context: context.to_string(),
            embedding,
            metadata: json!({ "source": format!("{id}.md") }),
        }
    }

    #[tokio::test]
    async fn fuses_knn_and_bm25_results() {
        let index = InMemoryVectorIndexAdapter::new();
        index.create_kb("samples").await.unwrap();
        index
            .write_docs(
                "samples",
                &[
                    doc("1", "rust error handling guide", vec![1.0, 0.0, 0.0]),
                    doc("2", "cooking recipes", vec![0.0, 1.0, 0.0]),
                ],
            )
            .await
            .unwrap();

        let embedding = MockEmbeddingClient::new(3);
        let config = Config::load(std::path::Path::new("/nonexistent")).unwrap();

        let results = search_docs(&config, &embedding, &index, None, "samples", "rust error handling", 5)
            .await
            .unwrap();

        assert!(!results.is_empty());
        assert_eq!(results[0].doc.doc.id, "1");
    }

    #[tokio::test]
    async fn dedups_by_context_across_distinct_ids() {
        let index = InMemoryVectorIndexAdapter::new();
        index.create_kb("samples").await.unwrap();
        index
            .write_docs(
                "samples",
                &[
                    doc("1", "rust error handling guide", vec![1.0, 0.0]),
                    doc("2", "rust error handling guide", vec![0.9, 0.1]),
                ],
            )
            .await
            .unwrap();

        let embedding = MockEmbeddingClient::new(2);
        let config = Config::load(std::path::Path::new("/nonexistent")).unwrap();

        let results = search_docs(&config, &embedding, &index, None, "samples", "rust error handling", 5)
            .await
            .unwrap();

        assert_eq!(results.len(), 1);
    }

    #[tokio::test]
    async fn reranker_drops_low_scores_and_truncates() {
        let index = InMemoryVectorIndexAdapter::new();
        index.create_kb("samples").await.unwrap();
        index
            .write_docs(
                "samples",
                &[
                    doc("1", "rust error handling guide", vec![1.0, 0.0]),
                    doc("2", "totally unrelated cooking text", vec![0.9, 0.1]),
                ],
            )
            .await
            .unwrap();

        let embedding = MockEmbeddingClient::new(2);
        let reranker = MockReRankerClient;
        let mut config = Config::load(std::path::Path::new("/nonexistent")).unwrap();
        config.use_reranker = true;
        config.reranker_score_min = 0.5;
        config.reranker_top_n = 10;

        let results = search_docs(
            &config,
            &embedding,
            &index,
            Some(&reranker),
            "samples",
            "rust error handling",
            5,
        )
        .await
        .unwrap();

        assert!(results.iter().all(|d| d.relevance_score.unwrap() > 0.5));
    }
}
