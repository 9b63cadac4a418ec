use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::ReRankerClient;
use crate::config::Config;
use crate::error::{Error, Result};

#[derive(Debug, Serialize)]
struct RerankRequest<'a> {
    query: &'a str,
    texts: &'a [String],
}

#[derive(Debug, Deserialize)]
struct RerankResponse {
    scores: Vec<f64>,
}

/// Talks to a single configurable re-ranker endpoint over HTTP.
pub struct HttpReRankerClient {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpReRankerClient {
    pub fn new(config: &Config) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.remote_call_timeout_secs))
            .build()
            .map_err(|e| Error::Rerank(format!("failed to build http client: {e}")))?;

        Ok(Self {
            client,
            endpoint: config.reranker_endpoint.clone(),
        })
    }
}

#[async_trait]
impl ReRankerClient for HttpReRankerClient {
    async fn rerank(&self, query: &str, texts: &[String]) -> Result<Vec<f64>> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(&RerankRequest { query, texts })
            .send()
            .await
            .map_err(|e| Error::Rerank(format!("request to {} failed: {e}", self.endpoint)))?;

        if !response.status().is_success() {
            return Err(Error::Rerank(format!(
                "re-ranker endpoint returned status {}",
                response.status()
            )));
        }

        let body: RerankResponse = response
            .json()
            .await
            .map_err(|e| Error::Rerank(format!("failed to decode re-rank response: {e}")))?;

        if body.scores.len() != texts.len() {
            return Err(Error::Rerank(format!(
                "re-ranker returned {} scores for {} texts",
                body.scores.len(),
                texts.len()
            )));
        }

        Ok(body.scores)
    }
}
