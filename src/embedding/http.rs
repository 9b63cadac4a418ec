use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::EmbeddingClient;
use crate::config::Config;
use crate::error::{Error, Result};

#[derive(Debug, Serialize)]
struct EmbedRequest<'a> {
    texts: &'a [String],
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

/// Talks to a single configurable embedding endpoint over HTTP. Generalizes
/// the idea of a provider-specific client into one shape, treating embedding
/// as one remote collaborator rather than a vendor choice.
pub struct HttpEmbeddingClient {
    client: reqwest::Client,
    endpoint: String,
    dimensions: usize,
}

impl HttpEmbeddingClient {
    pub fn new(config: &Config) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.remote_call_timeout_secs))
            .build()
            .map_err(|e| Error::Embedding(format!("failed to build http client: {e}")))?;

        Ok(Self {
            client,
            endpoint: config.embedding_endpoint.clone(),
            dimensions: config.embedding_dimensions,
        })
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(&EmbedRequest { texts })
            .send()
            .await
            .map_err(|e| Error::Embedding(format!("request to {} failed: {e}", self.endpoint)))?;

        if !response.status().is_success() {
            return Err(Error::Embedding(format!(
                "embedding endpoint returned status {}",
                response.status()
            )));
        }

        let body: EmbedResponse = response
            .json()
            .await
            .map_err(|e| Error::Embedding(format!("failed to decode embedding response: {e}")))?;

        for vec in &body.embeddings {
            if vec.len() != self.dimensions {
                return Err(Error::Embedding(format!(
                    "embedding endpoint returned dimension {}, expected {}",
                    vec.len(),
                    self.dimensions
                )));
            }
        }

        Ok(body.embeddings)
    }
}

#[async_trait]
impl EmbeddingClient for HttpEmbeddingClient {
    async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        let mut result = self.embed(&[text.to_string()]).await?;
        result.pop().ok_or_else(|| Error::Embedding("empty embedding response".into()))
    }

    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.embed(texts).await
    }
}
