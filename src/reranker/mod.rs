mod http;
mod mock;

use async_trait::async_trait;

use crate::error::Result;

pub use http::HttpReRankerClient;
pub use mock::MockReRankerClient;

/// Remote collaborator that scores how relevant each of `texts` is to
/// `query`, returning one relevance score per text in the same order.
#[async_trait]
pub trait ReRankerClient: Send + Sync {
    async fn rerank(&self, query: &str, texts: &[String]) -> Result<Vec<f64>>;
}
