use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::{IndexDoc, ScoredDoc, VectorIndexAdapter};
use crate::config::{Config, VectorSimilarity};
use crate::error::{Error, Result};

/// Talks to an Elasticsearch-like REST backend: one index per knowledge
/// base, a `dense_vector` field for embeddings, a custom-analyzed `context`
/// field for BM25, and an exact-match `metadata.source` keyword field.
pub struct ElasticsearchAdapter {
    client: reqwest::Client,
    endpoint: String,
    dimensions: usize,
    bm25_k1: f64,
    bm25_b: f64,
    similarity: VectorSimilarity,
    delete_docs_cap: usize,
}

impl ElasticsearchAdapter {
    pub fn new(config: &Config) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.remote_call_timeout_secs))
            .build()
            .map_err(|e| Error::Index(format!("failed to build http client: {e}")))?;

        Ok(Self {
            client,
            endpoint: config.index_endpoint.trim_end_matches('/').to_string(),
            dimensions: config.embedding_dimensions,
            bm25_k1: config.bm25_k1,
            bm25_b: config.bm25_b,
            similarity: config.vector_similarity,
            delete_docs_cap: config.delete_docs_cap,
        })
    }

    fn index_name(&self, kb: &str) -> String {
        format!("kb-{kb}")
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.endpoint, path)
    }

    fn similarity_name(&self) -> &'static str {
        match self.similarity {
            VectorSimilarity::Cosine => "cosine",
            VectorSimilarity::L2Norm => "l2_norm",
            VectorSimilarity::DotProduct => "dot_product",
            VectorSimilarity::MaxInnerProduct => "max_inner_product",
        }
    }

    async fn send_ok(&self, req: reqwest::RequestBuilder, context: &str) -> Result<Value> {
        let response = req
            .send()
            .await
            .map_err(|e| Error::Index(format!("{context}: request failed: {e}")))?;
        let status = response.status();
        let body: Value = response
            .json()
            .await
            .unwrap_or_else(|_| json!({}));
        if !status.is_success() && status.as_u16() != 404 {
            return Err(Error::Index(format!("{context}: status {status}: {body}")));
        }
        Ok(body)
    }
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    hits: SearchHits,
}

#[derive(Debug, Deserialize)]
struct SearchHits {
    hits: Vec<SearchHit>,
}

#[derive(Debug, Deserialize)]
struct SearchHit {
    #[serde(rename = "_id")]
    id: String,
    #[serde(rename = "_score")]
    score: f64,
    #[serde(rename = "_source")]
    source: SearchHitSource,
}

#[derive(Debug, Deserialize)]
struct SearchHitSource {
    context: String,
    embedding: Vec<f32>,
    metadata: Value,
}

fn hit_to_scored(hit: SearchHit) -> ScoredDoc {
    ScoredDoc {
        doc: IndexDoc {
            id: hit.id,
            context: hit.source.context,
            embedding: hit.source.embedding,
            metadata: hit.source.metadata,
        },
        score: hit.score,
    }
}

#[async_trait]
impl VectorIndexAdapter for ElasticsearchAdapter {
    async fn exists_kb(&self, kb: &str) -> Result<bool> {
        let response = self
            .client
            .head(self.url(&self.index_name(kb)))
            .send()
            .await
            .map_err(|e| Error::Index(format!("exists_kb: request failed: {e}")))?;
        Ok(response.status().is_success())
    }

    async fn create_kb(&self, kb: &str) -> Result<()> {
        let mapping = json!({
            "settings": {
                "similarity": {
                    "default": { "type": "BM25", "k1": self.bm25_k1, "b": self.bm25_b }
                }
            },
            "mappings": {
                "properties": {
                    "context": { "type": "text" },
                    "embedding": {
                        "type": "dense_vector",
                        "dims": self.dimensions,
                        "similarity": self.similarity_name(),
                    },
                    "metadata": {
                        "properties": {
                            "source": { "type": "keyword" },
                            "head1": { "type": "keyword" },
                            "head2": { "type": "keyword" },
                            "head3": { "type": "keyword" },
                        }
                    },
                }
            }
        });
        self.send_ok(
            self.client.put(self.url(&self.index_name(kb))).json(&mapping),
            "create_kb",
        )
        .await?;
        Ok(())
    }

    async fn delete_kb(&self, kb: &str) -> Result<()> {
        self.send_ok(self.client.delete(self.url(&self.index_name(kb))), "delete_kb")
            .await?;
        Ok(())
    }

    async fn clear_kb(&self, kb: &str) -> Result<()> {
        let body = json!({ "query": { "match_all": {} } });
        self.send_ok(
            self.client
                .post(self.url(&format!("{}/_delete_by_query", self.index_name(kb))))
                .json(&body),
            "clear_kb",
        )
        .await?;
        Ok(())
    }

    async fn write_docs(&self, kb: &str, docs: &[IndexDoc]) -> Result<()> {
        let mut body = String::new();
        for doc in docs {
            body.push_str(&json!({"index": {"_index": self.index_name(kb), "_id": doc.id}}).to_string());
            body.push('\n');
            body.push_str(
                &json!({
                    "context": doc.context,
                    "embedding": doc.embedding,
                    "metadata": doc.metadata,
                })
                .to_string(),
            );
            body.push('\n');
        }

        self.client
            .post(self.url("_bulk"))
            .header("Content-Type", "application/x-ndjson")
            .body(body)
            .send()
            .await
            .map_err(|e| Error::Index(format!("write_docs: bulk request failed: {e}")))?;
        Ok(())
    }

    async fn docs_by_source(&self, kb: &str, source: &str) -> Result<Vec<IndexDoc>> {
        let body = json!({ "query": { "term": { "metadata.source": source } }, "size": 10_000 });
        let response = self
            .send_ok(
                self.client
                    .post(self.url(&format!("{}/_search", self.index_name(kb))))
                    .json(&body),
                "docs_by_source",
            )
            .await?;
        let parsed: SearchResponse = serde_json::from_value(response)
            .map_err(|e| Error::Index(format!("docs_by_source: malformed response: {e}")))?;
        Ok(parsed.hits.hits.into_iter().map(|h| hit_to_scored(h).doc).collect())
    }

    async fn delete_docs(&self, kb: &str, ids: &[String]) -> Result<()> {
        for batch in ids.chunks(self.delete_docs_cap) {
            let should_clauses: Vec<Value> = batch.iter().map(|id| json!({ "term": { "_id": id } })).collect();
            let body = json!({ "query": { "bool": { "should": should_clauses } } });
            self.send_ok(
                self.client
                    .post(self.url(&format!("{}/_delete_by_query", self.index_name(kb))))
                    .json(&body),
                "delete_docs",
            )
            .await?;
        }
        Ok(())
    }

    async fn get_docs_by_ids(&self, kb: &str, ids: &[String]) -> Result<Vec<IndexDoc>> {
        let body = json!({ "ids": ids });
        let response = self
            .send_ok(
                self.client
                    .post(self.url(&format!("{}/_mget", self.index_name(kb))))
                    .json(&body),
                "get_docs_by_ids",
            )
            .await?;

        #[derive(Deserialize)]
        struct MgetResponse {
            docs: Vec<MgetDoc>,
        }
        #[derive(Deserialize)]
        struct MgetDoc {
            #[serde(rename = "_id")]
            id: String,
            found: bool,
            #[serde(rename = "_source")]
            source: Option<SearchHitSource>,
        }

        let parsed: MgetResponse = serde_json::from_value(response)
            .map_err(|e| Error::Index(format!("get_docs_by_ids: malformed response: {e}")))?;

        Ok(parsed
            .docs
            .into_iter()
            .filter(|d| d.found)
            .filter_map(|d| {
                d.source.map(|s| IndexDoc {
                    id: d.id,
                    context: s.context,
                    embedding: s.embedding,
                    metadata: s.metadata,
                })
            })
            .collect())
    }

    async fn knn_search(&self, kb: &str, vector: &[f32], top_k: usize) -> Result<Vec<ScoredDoc>> {
        let body = json!({
            "knn": {
                "field": "embedding",
                "query_vector": vector,
                "k": top_k,
                "num_candidates": (top_k * 10).max(50),
            }
        });
        let response = self
            .send_ok(
                self.client
                    .post(self.url(&format!("{}/_search", self.index_name(kb))))
                    .json(&body),
                "knn_search",
            )
            .await?;
        let parsed: SearchResponse = serde_json::from_value(response)
            .map_err(|e| Error::Index(format!("knn_search: malformed response: {e}")))?;
        Ok(parsed.hits.hits.into_iter().map(hit_to_scored).collect())
    }

    async fn bm25_search(&self, kb: &str, query: &str, top_k: usize) -> Result<Vec<ScoredDoc>> {
        let body = json!({
            "query": { "match": { "context": query } },
            "size": top_k,
        });
        let response = self
            .send_ok(
                self.client
                    .post(self.url(&format!("{}/_search", self.index_name(kb))))
                    .json(&body),
                "bm25_search",
            )
            .await?;
        let parsed: SearchResponse = serde_json::from_value(response)
            .map_err(|e| Error::Index(format!("bm25_search: malformed response: {e}")))?;
        Ok(parsed.hits.hits.into_iter().map(hit_to_scored).collect())
    }
}
