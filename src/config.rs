use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::error::Error;

/// Distance metric used by the vector index's dense field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum VectorSimilarity {
    Cosine,
    L2Norm,
    DotProduct,
    MaxInnerProduct,
}

impl FromStr for VectorSimilarity {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "cosine" => Ok(Self::Cosine),
            "l2_norm" | "l2norm" | "l2" => Ok(Self::L2Norm),
            "dot_product" | "dotproduct" | "dot" => Ok(Self::DotProduct),
            "max_inner_product" | "maxinnerproduct" => Ok(Self::MaxInnerProduct),
            other => Err(Error::Config(format!(
                "unknown vector similarity '{other}': expected cosine, l2_norm, dot_product, or max_inner_product"
            ))),
        }
    }
}

/// Process-wide configuration for the knowledge-base engine, fixed at startup.
#[derive(Debug, Clone, serde::Serialize)]
pub struct Config {
    /// Root directory for the blob store (`<kb_root_path>/<kb>/content/`).
    pub kb_root_path: PathBuf,
    /// Path to the catalog's SQLite database file, relative to `kb_root_path`.
    pub catalog_file: PathBuf,

    /// Target chunk length in splitter-defined units (characters).
    pub chunk_size: usize,
    /// Overlap between adjacent chunks, in the same units as `chunk_size`.
    pub chunk_overlap: usize,
    /// Whether the splitter should propagate ancestor Chinese-style titles into chunks.
    pub zh_title_enhance: bool,

    /// Default number of results requested from each leg of hybrid search.
    pub vector_search_top_k: usize,
    /// Pre-fusion score threshold; tolerant of values up to 2.0 (see design notes).
    pub score_threshold: f64,

    /// Whether to call the re-ranker after RRF fusion.
    pub use_reranker: bool,
    /// Minimum re-ranker relevance score; results at or below this are dropped.
    pub reranker_score_min: f64,
    /// Maximum number of results kept after re-ranking.
    pub reranker_top_n: usize,

    /// Default vector-store backend identifier (e.g. `"es"`).
    pub default_vs_type: String,

    /// Base URL of the remote embedding service.
    pub embedding_endpoint: String,
    /// Vector dimensionality produced by the embedding service; must match the index mapping.
    pub embedding_dimensions: usize,
    /// Maximum number of texts embedded per remote call.
    pub embedding_batch_size: usize,

    /// Base URL of the remote re-ranker service.
    pub reranker_endpoint: String,

    /// Base URL of the remote vector-index backend.
    pub index_endpoint: String,
    /// BM25 `k1` parameter for the `context` field.
    pub bm25_k1: f64,
    /// BM25 `b` parameter for the `context` field.
    pub bm25_b: f64,
    /// Similarity function for the dense vector field.
    pub vector_similarity: VectorSimilarity,
    /// Per-call cap on `delete_docs` rows removed before looping.
    pub delete_docs_cap: usize,

    /// Deadline for any single remote call (embedding, re-rank, index).
    pub remote_call_timeout_secs: u64,
    /// Size of the bounded worker pool for per-file ingestion work, 0 = auto (CPU x2).
    pub ingest_worker_pool_size: usize,
}

impl Config {
    /// Load configuration with priority: shell env > `.env` file > built-in defaults.
    pub fn load(project_root: &Path) -> Result<Self, Error> {
        let _ = dotenvy::from_path(project_root.join(".env"));

        let kb_root_path = PathBuf::from(env_or_default("KBE_KB_ROOT_PATH", "./kb_data"));
        let catalog_file = PathBuf::from(env_or_default("KBE_CATALOG_FILE", "info.db"));

        let chunk_size = parse_env::<usize>("KBE_CHUNK_SIZE", 250)?;
        let chunk_overlap = parse_env::<usize>("KBE_CHUNK_OVERLAP", 50)?;
        let zh_title_enhance = parse_env_bool("KBE_ZH_TITLE_ENHANCE", false)?;

        let vector_search_top_k = parse_env::<usize>("KBE_VECTOR_SEARCH_TOP_K", 3)?;
        let score_threshold = parse_env::<f64>("KBE_SCORE_THRESHOLD", 1.0)?;

        let use_reranker = parse_env_bool("KBE_USE_RERANKER", false)?;
        let reranker_score_min = parse_env::<f64>("KBE_RERANKER_SCORE_MIN", 0.7)?;
        let reranker_top_n = parse_env::<usize>("KBE_RERANKER_TOP_N", 3)?;

        let default_vs_type = env_or_default("KBE_DEFAULT_VS_TYPE", "es");

        let embedding_endpoint =
            env_or_default("KBE_EMBEDDING_ENDPOINT", "http://localhost:9001/embed");
        let embedding_dimensions = parse_env::<usize>("KBE_EMBEDDING_DIMENSIONS", 1024)?;
        let embedding_batch_size = parse_env::<usize>("KBE_EMBEDDING_BATCH_SIZE", 64)?;

        let reranker_endpoint =
            env_or_default("KBE_RERANKER_ENDPOINT", "http://localhost:9002/rerank");

        let index_endpoint = env_or_default("KBE_INDEX_ENDPOINT", "http://localhost:9200");
        let bm25_k1 = parse_env::<f64>("KBE_BM25_K1", 2.0)?;
        let bm25_b = parse_env::<f64>("KBE_BM25_B", 0.75)?;
        let vector_similarity =
            env_or_default("KBE_VECTOR_SIMILARITY", "l2_norm").parse::<VectorSimilarity>()?;
        let delete_docs_cap = parse_env::<usize>("KBE_DELETE_DOCS_CAP", 50)?;

        let remote_call_timeout_secs = parse_env::<u64>("KBE_REMOTE_CALL_TIMEOUT_SECS", 300)?;
        let ingest_worker_pool_size = parse_env::<usize>("KBE_INGEST_WORKER_POOL_SIZE", 0)?;

        let config = Self {
            kb_root_path,
            catalog_file,
            chunk_size,
            chunk_overlap,
            zh_title_enhance,
            vector_search_top_k,
            score_threshold,
            use_reranker,
            reranker_score_min,
            reranker_top_n,
            default_vs_type,
            embedding_endpoint,
            embedding_dimensions,
            embedding_batch_size,
            reranker_endpoint,
            index_endpoint,
            bm25_k1,
            bm25_b,
            vector_similarity,
            delete_docs_cap,
            remote_call_timeout_secs,
            ingest_worker_pool_size,
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate constraint invariants on the loaded config.
    fn validate(&self) -> Result<(), Error> {
        if self.embedding_dimensions == 0 {
            return Err(Error::Config("embedding_dimensions must be > 0".into()));
        }
        if self.embedding_batch_size == 0 {
            return Err(Error::Config("embedding_batch_size must be > 0".into()));
        }
        if self.chunk_overlap >= self.chunk_size {
            return Err(Error::Config(format!(
                "chunk_overlap ({}) must be less than chunk_size ({})",
                self.chunk_overlap, self.chunk_size
            )));
        }
        if !(0.0..=2.0).contains(&self.score_threshold) {
            return Err(Error::Config(format!(
                "score_threshold ({}) must be in [0.0, 2.0]",
                self.score_threshold
            )));
        }
        if self.delete_docs_cap == 0 {
            return Err(Error::Config("delete_docs_cap must be > 0".into()));
        }
        Ok(())
    }

    /// Resolve the effective ingest worker pool size for a batch of `batch_len` files.
    pub fn effective_worker_pool_size(&self, batch_len: usize) -> usize {
        if self.ingest_worker_pool_size > 0 {
            return self.ingest_worker_pool_size.min(batch_len.max(1));
        }
        let cpu_based = std::thread::available_parallelism()
            .map(|n| n.get() * 2)
            .unwrap_or(4);
        cpu_based.min(batch_len.max(1))
    }
}

/// Read an env var or return a default string value.
fn env_or_default(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Parse an env var into a typed value, using a default if not set.
fn parse_env<T>(key: &str, default: T) -> Result<T, Error>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(val) => val
            .parse::<T>()
            .map_err(|e| Error::Config(format!("failed to parse {key}='{val}': {e}"))),
        Err(_) => Ok(default),
    }
}

/// Parse a boolean env var (true/false/1/0/yes/no).
fn parse_env_bool(key: &str, default: bool) -> Result<bool, Error> {
    match std::env::var(key) {
        Ok(val) => match val.to_lowercase().as_str() {
            "true" | "1" | "yes" => Ok(true),
            "false" | "0" | "no" => Ok(false),
            _ => Err(Error::Config(format!(
                "failed to parse {key}='{val}': expected true/false/1/0/yes/no"
            ))),
        },
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Mutex to serialize tests that read/write environment variables.
    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    const ALL_VARS: &[&str] = &[
        "KBE_KB_ROOT_PATH",
        "KBE_CATALOG_FILE",
        "KBE_CHUNK_SIZE",
        "KBE_CHUNK_OVERLAP",
        "KBE_ZH_TITLE_ENHANCE",
        "KBE_VECTOR_SEARCH_TOP_K",
        "KBE_SCORE_THRESHOLD",
        "KBE_USE_RERANKER",
        "KBE_RERANKER_SCORE_MIN",
        "KBE_RERANKER_TOP_N",
        "KBE_DEFAULT_VS_TYPE",
        "KBE_EMBEDDING_ENDPOINT",
        "KBE_EMBEDDING_DIMENSIONS",
        "KBE_EMBEDDING_BATCH_SIZE",
        "KBE_RERANKER_ENDPOINT",
        "KBE_INDEX_ENDPOINT",
        "KBE_BM25_K1",
        "KBE_BM25_B",
        "KBE_VECTOR_SIMILARITY",
        "KBE_DELETE_DOCS_CAP",
        "KBE_REMOTE_CALL_TIMEOUT_SECS",
        "KBE_INGEST_WORKER_POOL_SIZE",
    ];

    fn clear_env() {
        for var in ALL_VARS {
            std::env::remove_var(var);
        }
    }

    #[test]
    fn default_values_match_spec() {
        let _lock = ENV_MUTEX.lock().unwrap();
        clear_env();
        let config = Config::load(Path::new("/nonexistent")).unwrap();

        assert_eq!(config.chunk_size, 250);
        assert_eq!(config.chunk_overlap, 50);
        assert!(!config.zh_title_enhance);
        assert_eq!(config.vector_search_top_k, 3);
        assert_eq!(config.score_threshold, 1.0);
        assert!(!config.use_reranker);
        assert_eq!(config.reranker_score_min, 0.7);
        assert_eq!(config.default_vs_type, "es");
        assert_eq!(config.embedding_dimensions, 1024);
        assert_eq!(config.bm25_k1, 2.0);
        assert_eq!(config.bm25_b, 0.75);
        assert_eq!(config.vector_similarity, VectorSimilarity::L2Norm);
        assert_eq!(config.delete_docs_cap, 50);
        clear_env();
    }

    #[test]
    fn validation_rejects_overlap_exceeds_size() {
        let _lock = ENV_MUTEX.lock().unwrap();
        clear_env();
        std::env::set_var("KBE_CHUNK_SIZE", "10");
        std::env::set_var("KBE_CHUNK_OVERLAP", "20");
        let result = Config::load(Path::new("/nonexistent"));
        clear_env();
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("chunk_overlap"));
    }

    #[test]
    fn validation_rejects_threshold_out_of_range() {
        let _lock = ENV_MUTEX.lock().unwrap();
        clear_env();
        std::env::set_var("KBE_SCORE_THRESHOLD", "2.5");
        let result = Config::load(Path::new("/nonexistent"));
        clear_env();
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("score_threshold"));
    }

    #[test]
    fn validation_rejects_negative_threshold() {
        let _lock = ENV_MUTEX.lock().unwrap();
        clear_env();
        std::env::set_var("KBE_SCORE_THRESHOLD", "-0.1");
        let result = Config::load(Path::new("/nonexistent"));
        clear_env();
        assert!(result.is_err());
    }

    #[test]
    fn validation_rejects_zero_delete_cap() {
        let _lock = ENV_MUTEX.lock().unwrap();
        clear_env();
        std::env::set_var("KBE_DELETE_DOCS_CAP", "0");
        let result = Config::load(Path::new("/nonexistent"));
        clear_env();
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("delete_docs_cap"));
    }

    #[test]
    fn vector_similarity_case_insensitive() {
        assert_eq!(
            "COSINE".parse::<VectorSimilarity>().unwrap(),
            VectorSimilarity::Cosine
        );
        assert_eq!(
            "l2_norm".parse::<VectorSimilarity>().unwrap(),
            VectorSimilarity::L2Norm
        );
        assert!("bogus".parse::<VectorSimilarity>().is_err());
    }

    #[test]
    fn worker_pool_size_respects_override() {
        let _lock = ENV_MUTEX.lock().unwrap();
        clear_env();
        std::env::set_var("KBE_INGEST_WORKER_POOL_SIZE", "3");
        let config = Config::load(Path::new("/nonexistent")).unwrap();
        clear_env();
        assert_eq!(config.effective_worker_pool_size(100), 3);
        assert_eq!(config.effective_worker_pool_size(1), 1);
    }

    #[test]
    fn worker_pool_size_auto_bounded_by_batch_len() {
        let _lock = ENV_MUTEX.lock().unwrap();
        clear_env();
        let config = Config::load(Path::new("/nonexistent")).unwrap();
        clear_env();
        assert_eq!(config.effective_worker_pool_size(1), 1);
    }
}
