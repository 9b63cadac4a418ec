use std::sync::Arc;

use futures::stream::{self, StreamExt};

use crate::blob::BlobStore;
use crate::config::Config;
use crate::error::Error;
use crate::loader::LoaderRegistry;
use crate::splitter::{Chunk, SplitterRegistry};

/// Outcome of ingesting one file: either its chunks, ready to embed and
/// index, or the error that stopped it. Per-file, never aborts the batch.
pub enum IngestOutcome {
    Ok {
        filename: String,
        chunks: Vec<Chunk>,
    },
    Err {
        filename: String,
        error: Error,
    },
}

/// Load and split `filenames` from `kb`'s blob store across a bounded worker
/// pool, yielding outcomes in completion order rather than input order.
///
/// Grounded on the batch-embedding bounded-concurrency pattern: one task per
/// file, `buffer_unordered(N)` capping in-flight work.
pub async fn ingest_files(
    config: &Config,
    blob: Arc<BlobStore>,
    loaders: Arc<LoaderRegistry>,
    splitters: Arc<SplitterRegistry>,
    kb: String,
    filenames: Vec<String>,
) -> Vec<IngestOutcome> {
    let worker_count = config.effective_worker_pool_size(filenames.len());
    let zh_title_enhance = config.zh_title_enhance;

    stream::iter(filenames.into_iter().map(|filename| {
        let blob = Arc::clone(&blob);
        let loaders = Arc::clone(&loaders);
        let splitters = Arc::clone(&splitters);
        let kb = kb.clone();
        async move { ingest_one_file(&blob, &loaders, &splitters, &kb, filename, zh_title_enhance) }
    }))
    .buffer_unordered(worker_count.max(1))
    .collect()
    .await
}

fn ingest_one_file(
    blob: &BlobStore,
    loaders: &LoaderRegistry,
    splitters: &SplitterRegistry,
    kb: &str,
    filename: String,
    zh_title_enhance: bool,
) -> IngestOutcome {
    let path = blob.file_path(kb, &filename);

    let bytes = match std::fs::read(&path) {
        Ok(b) => b,
        Err(e) => {
            return IngestOutcome::Err {
                filename,
                error: Error::Io(e),
            }
        }
    };

    let raw_docs = match loaders.load(&path, &bytes) {
        Ok(docs) => docs,
        Err(error) => return IngestOutcome::Err { filename, error },
    };

    let mut chunks = Vec::new();
    for raw_doc in raw_docs {
        let mut doc_metadata = raw_doc.metadata;
        if let serde_json::Value::Object(ref mut map) = doc_metadata {
            map.insert("source".into(), serde_json::Value::String(filename.clone()));
        }
        for mut chunk in splitters.split(&path, &raw_doc.context, &doc_metadata) {
            if let serde_json::Value::Object(ref mut map) = chunk.metadata {
                map.insert("source".into(), serde_json::Value::String(filename.clone()));
            }
            if zh_title_enhance {
                apply_zh_title_enhance(&mut chunk);
            }
            chunks.push(chunk);
        }
    }

    IngestOutcome::Ok { filename, chunks }
}

/// Prefix a chunk's context with its carried-forward heading path, the way a
/// title-aware splitter pass would for CJK-style documents whose headings
/// carry most of the retrievable signal.
fn apply_zh_title_enhance(chunk: &mut Chunk) {
    let serde_json::Value::Object(ref map) = chunk.metadata else {
        return;
    };
    let mut path = Vec::new();
    for key in ["head1", "head2", "head3", "head4"] {
        if let Some(head) = map.get(key).and_then(|v| v.as_str()) {
            path.push(head.to_string());
        }
    }
    if !path.is_empty() {
        chunk.context = format!("{}\n{}", path.join(" > "), chunk.context);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn test_config(root: &std::path::Path) -> Config {
        let mut cfg = Config::load(std::path::Path::new("/nonexistent")).unwrap();
        cfg.kb_root_path = root.to_path_buf();
        cfg
    }

    #[tokio::test]
    async fn ingests_multiple_files_and_preserves_source_metadata() {
        let dir = tempdir().unwrap();
        let config = test_config(dir.path());
        let blob = Arc::new(BlobStore::new(&config));
        blob.create_kb_dirs("samples").unwrap();
        blob.save_upload("samples", "a.md", b"# Title\nbody", false).unwrap();
        blob.save_upload("samples", "b.txt", b"plain text body", false).unwrap();

        let loaders = Arc::new(LoaderRegistry::with_defaults());
        let splitters = Arc::new(SplitterRegistry::new(config.chunk_size, config.chunk_overlap));

        let outcomes = ingest_files(
            &config,
            blob,
            loaders,
            splitters,
            "samples".to_string(),
            vec!["a.md".to_string(), "b.txt".to_string()],
        )
        .await;

        assert_eq!(outcomes.len(), 2);
        for outcome in &outcomes {
            match outcome {
                IngestOutcome::Ok { chunks, .. } => {
                    assert!(!chunks.is_empty());
                    for chunk in chunks {
                        assert!(chunk.metadata.get("source").is_some());
                    }
                }
                IngestOutcome::Err { .. } => panic!("expected ok outcome"),
            }
        }
    }

    #[tokio::test]
    async fn missing_file_yields_err_outcome_not_panic() {
        let dir = tempdir().unwrap();
        let config = test_config(dir.path());
        let blob = Arc::new(BlobStore::new(&config));
        blob.create_kb_dirs("samples").unwrap();

        let loaders = Arc::new(LoaderRegistry::with_defaults());
        let splitters = Arc::new(SplitterRegistry::new(config.chunk_size, config.chunk_overlap));

        let outcomes = ingest_files(
            &config,
            blob,
            loaders,
            splitters,
            "samples".to_string(),
            vec!["missing.md".to_string()],
        )
        .await;

        assert_eq!(outcomes.len(), 1);
        assert!(matches!(outcomes[0], IngestOutcome::Err { .. }));
    }

    #[tokio::test]
    async fn zh_title_enhance_prefixes_heading_path() {
        let dir = tempdir().unwrap();
        let mut config = test_config(dir.path());
        config.zh_title_enhance = true;
        let blob = Arc::new(BlobStore::new(&config));
        blob.create_kb_dirs("samples").unwrap();
        blob.save_upload("samples", "a.md", b"# Top\n## Sub\nbody text", false).unwrap();

        let loaders = Arc::new(LoaderRegistry::with_defaults());
        let splitters = Arc::new(SplitterRegistry::new(config.chunk_size, config.chunk_overlap));

        let outcomes = ingest_files(&config, blob, loaders, splitters, "samples".to_string(), vec!["a.md".to_string()]).await;
        let IngestOutcome::Ok { chunks, .. } = &outcomes[0] else {
            panic!("expected ok");
        };
        assert!(chunks[0].context.starts_with("Top"));
    }
}
