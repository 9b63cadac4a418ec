use async_trait::async_trait;

use super::ReRankerClient;
use crate::error::Result;

/// Deterministic re-ranker for tests: scores each text by the fraction of
/// query words it contains.
pub struct MockReRankerClient;

#[async_trait]
impl ReRankerClient for MockReRankerClient {
    async fn rerank(&self, query: &str, texts: &[String]) -> Result<Vec<f64>> {
        let query_words: Vec<String> = query.to_lowercase().split_whitespace().map(String::from).collect();
        if query_words.is_empty() {
            return Ok(vec![0.0; texts.len()]);
        }

        Ok(texts
            .iter()
            .map(|text| {
                let lower = text.to_lowercase();
                let hits = query_words.iter().filter(|w| lower.contains(w.as_str())).count();
                hits as f64 / query_words.len() as f64
            })
            .collect())
    }
}
