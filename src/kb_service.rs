use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock as SyncRwLock;
use serde_json::Value;
use tokio::sync::{Mutex as AsyncMutex, RwLock as AsyncRwLock};
use tracing::warn;

use crate::blob::BlobStore;
use crate::catalog::{Catalog, FileDoc, FileRecord, KnowledgeBase};
use crate::config::Config;
use crate::embedding::EmbeddingClient;
use crate::error::{Error, Result};
use crate::ingest::{ingest_files, IngestOutcome};
use crate::loader::LoaderRegistry;
use crate::reranker::ReRankerClient;
use crate::retrieval::{self, RetrievedDoc};
use crate::splitter::{Chunk, SplitterRegistry};
use crate::validation::{fold_case, validate_filename, validate_kb_name};
use crate::vector_index::{IndexDoc, VectorIndexAdapter};

/// Facade enforcing three-way consistency between the catalog, blob store,
/// and vector index. Every create/delete/clear takes the knowledge base's
/// exclusive lock; every add/delete of a single file takes that file's lock;
/// search only needs the knowledge base's shared lock.
pub struct KbService {
    config: Arc<Config>,
    catalog: Catalog,
    blob: Arc<BlobStore>,
    loaders: Arc<LoaderRegistry>,
    splitters: Arc<SplitterRegistry>,
    embedding: Arc<dyn EmbeddingClient>,
    index: Arc<dyn VectorIndexAdapter>,
    reranker: Option<Arc<dyn ReRankerClient>>,

    kb_locks: SyncRwLock<HashMap<String, Arc<AsyncRwLock<()>>>>,
    file_locks: SyncRwLock<HashMap<(String, String), Arc<AsyncMutex<()>>>>,
}

impl KbService {
    pub async fn new(
        config: Config,
        embedding: Arc<dyn EmbeddingClient>,
        index: Arc<dyn VectorIndexAdapter>,
        reranker: Option<Arc<dyn ReRankerClient>>,
    ) -> Result<Self> {
        let catalog = Catalog::open(&config).await?;
        let blob = Arc::new(BlobStore::new(&config));
        let loaders = Arc::new(LoaderRegistry::with_defaults());
        let splitters = Arc::new(SplitterRegistry::new(config.chunk_size, config.chunk_overlap));

        Ok(Self {
            config: Arc::new(config),
            catalog,
            blob,
            loaders,
            splitters,
            embedding,
            index,
            reranker,
            kb_locks: SyncRwLock::new(HashMap::new()),
            file_locks: SyncRwLock::new(HashMap::new()),
        })
    }

    /// Locks are keyed by case-folded name, so `"Samples"` and `"samples"`
    /// always contend on the same lock regardless of which casing a caller
    /// happens to use.
    fn kb_lock(&self, kb: &str) -> Arc<AsyncRwLock<()>> {
        let key = fold_case(kb);
        if let Some(lock) = self.kb_locks.read().get(&key) {
            return Arc::clone(lock);
        }
        let mut locks = self.kb_locks.write();
        Arc::clone(locks.entry(key).or_insert_with(|| Arc::new(AsyncRwLock::new(()))))
    }

    fn file_lock(&self, kb: &str, filename: &str) -> Arc<AsyncMutex<()>> {
        let key = (fold_case(kb), fold_case(filename));
        if let Some(lock) = self.file_locks.read().get(&key) {
            return Arc::clone(lock);
        }
        let mut locks = self.file_locks.write();
        Arc::clone(locks.entry(key).or_insert_with(|| Arc::new(AsyncMutex::new(()))))
    }

    /// Resolve a caller-supplied, possibly differently-cased knowledge base
    /// name to the casing stored at `create_kb` time, so Blob and Index
    /// lookups (which key on the literal string, unlike the Catalog) always
    /// target the directory/index entries that were actually created.
    async fn canonical_kb_name(&self, kb: &str) -> Result<String> {
        Ok(self.catalog.load_kb(kb).await?.name)
    }

    /// Create a knowledge base's blob directory, index, and catalog row, in
    /// that order. Best-effort undoes whatever succeeded, in reverse order,
    /// on failure.
    pub async fn create_kb(&self, name: &str, create_time: i64) -> Result<()> {
        validate_kb_name(name)?;
        let lock = self.kb_lock(name);
        let _guard = lock.write().await;

        self.blob.create_kb_dirs(name)?;

        if let Err(e) = self.index.create_kb(name).await {
            if let Err(undo_err) = self.blob.delete_kb_tree(name) {
                warn!("undo failed for blob after index create_kb error: {undo_err}");
            }
            return Err(e);
        }

        if let Err(e) = self.catalog.upsert_kb(name, create_time).await {
            if let Err(undo_err) = self.index.delete_kb(name).await {
                warn!("undo failed for index after catalog upsert_kb error: {undo_err}");
            }
            if let Err(undo_err) = self.blob.delete_kb_tree(name) {
                warn!("undo failed for blob after catalog upsert_kb error: {undo_err}");
            }
            return Err(e);
        }

        Ok(())
    }

    /// Delete a knowledge base: index, then its catalog rows, then the
    /// knowledge base's own catalog row, then its blob tree.
    pub async fn delete_kb(&self, name: &str) -> Result<()> {
        validate_kb_name(name)?;
        let lock = self.kb_lock(name);
        let _guard = lock.write().await;

        let canonical = self.canonical_kb_name(name).await?;
        self.index.delete_kb(&canonical).await?;
        self.catalog.delete_files_for_kb(name).await?;
        self.catalog.delete_kb(name).await?;
        self.blob.delete_kb_tree(&canonical)?;
        Ok(())
    }

    pub async fn exist_kb(&self, name: &str) -> Result<bool> {
        self.catalog.kb_exists(name).await
    }

    /// Empty a knowledge base's index and catalog rows; the blob tree is
    /// left untouched so the caller may re-ingest from disk.
    pub async fn clear_kb(&self, name: &str) -> Result<()> {
        validate_kb_name(name)?;
        let lock = self.kb_lock(name);
        let _guard = lock.write().await;

        let canonical = self.canonical_kb_name(name).await?;
        self.index.clear_kb(&canonical).await?;
        self.catalog.delete_files_for_kb(name).await?;
        Ok(())
    }

    /// Save file bytes to the blob store without touching the index or
    /// catalog. Returns the filenames that saved successfully and a map of
    /// the ones that didn't, to their errors.
    pub async fn upload_files(
        &self,
        kb: &str,
        files: &[(String, Vec<u8>)],
        overwrite: bool,
    ) -> Result<(Vec<String>, HashMap<String, Error>)> {
        validate_kb_name(kb)?;
        let kb_lock = self.kb_lock(kb);
        let _kb_guard = kb_lock.read().await;
        let canonical = self.canonical_kb_name(kb).await?;

        let mut ok_filenames = Vec::new();
        let mut failed = HashMap::new();
        for (filename, bytes) in files {
            if let Err(e) = validate_filename(filename) {
                failed.insert(filename.clone(), e);
                continue;
            }
            let file_lock = self.file_lock(kb, filename);
            let _file_guard = file_lock.lock().await;
            match self.blob.save_upload(&canonical, filename, bytes, overwrite) {
                Ok(()) => ok_filenames.push(filename.clone()),
                Err(e) => {
                    failed.insert(filename.clone(), e);
                }
            }
        }
        Ok((ok_filenames, failed))
    }

    /// Load+split, embed, and index a file already present in the blob
    /// store. Acquires the knowledge base's shared lock (concurrent with
    /// search, exclusive with create/delete/clear) plus that file's own
    /// exclusive lock.
    pub async fn add_file(&self, kb: &str, filename: &str, indexed_at: i64) -> Result<()> {
        validate_kb_name(kb)?;
        validate_filename(filename)?;

        let kb_lock = self.kb_lock(kb);
        let _kb_guard = kb_lock.read().await;
        let file_lock = self.file_lock(kb, filename);
        let _file_guard = file_lock.lock().await;
        let canonical = self.canonical_kb_name(kb).await?;

        let outcomes = ingest_files(
            &self.config,
            Arc::clone(&self.blob),
            Arc::clone(&self.loaders),
            Arc::clone(&self.splitters),
            canonical.clone(),
            vec![filename.to_string()],
        )
        .await;

        let chunks = match outcomes.into_iter().next() {
            Some(IngestOutcome::Ok { chunks, .. }) => chunks,
            Some(IngestOutcome::Err { error, .. }) => return Err(error),
            None => return Err(Error::Internal("ingest produced no outcome".into())),
        };

        self.index_chunks(&canonical, filename, indexed_at, chunks).await
    }

    /// Embed and index a file's chunks, then record them in the catalog.
    /// Shared by `add_file` and `update_files` so both go through the exact
    /// same write path regardless of whether they ingest one file or a batch.
    async fn index_chunks(&self, kb: &str, filename: &str, indexed_at: i64, chunks: Vec<Chunk>) -> Result<()> {
        let texts: Vec<String> = chunks.iter().map(|c| c.context.clone()).collect();
        let embeddings = self.embedding.embed_documents(&texts).await?;

        let mut docs = Vec::with_capacity(chunks.len());
        let mut file_docs = Vec::with_capacity(chunks.len());
        for (chunk, embedding) in chunks.into_iter().zip(embeddings) {
            let id = uuid::Uuid::new_v4().to_string();
            docs.push(IndexDoc {
                id: id.clone(),
                context: chunk.context.clone(),
                embedding,
                metadata: chunk.metadata.clone(),
            });
            file_docs.push(FileDoc {
                id,
                kb_name: kb.to_string(),
                filename: filename.to_string(),
                context: chunk.context,
                metadata: chunk.metadata,
            });
        }

        self.index.add_docs(kb, &docs).await?;
        self.catalog.add_file(kb, filename, indexed_at).await?;
        self.catalog.replace_file_docs(kb, filename, &file_docs).await?;
        Ok(())
    }

    /// Re-ingest files already present in the knowledge base: the whole
    /// batch runs through the ingestion pipeline's bounded worker pool in one
    /// call, so files actually ingest in parallel. Old chunks for a file stay
    /// in place until its ingest succeeds, then are swapped in by a
    /// delete-without-content followed by an index of the new chunks.
    pub async fn update_files(&self, kb: &str, filenames: &[String], indexed_at: i64) -> Result<Vec<(String, Result<()>)>> {
        validate_kb_name(kb)?;
        for filename in filenames {
            validate_filename(filename)?;
        }
        let canonical = self.canonical_kb_name(kb).await?;

        let outcomes = ingest_files(
            &self.config,
            Arc::clone(&self.blob),
            Arc::clone(&self.loaders),
            Arc::clone(&self.splitters),
            canonical.clone(),
            filenames.to_vec(),
        )
        .await;

        let mut by_filename: HashMap<String, IngestOutcome> =
            outcomes.into_iter().map(|o| (outcome_filename(&o).to_string(), o)).collect();

        let mut results = Vec::with_capacity(filenames.len());
        for filename in filenames {
            let kb_lock = self.kb_lock(kb);
            let _kb_guard = kb_lock.read().await;
            let file_lock = self.file_lock(kb, filename);
            let _file_guard = file_lock.lock().await;

            let result = async {
                match by_filename.remove(filename) {
                    Some(IngestOutcome::Err { error, .. }) => Err(error),
                    Some(IngestOutcome::Ok { chunks, .. }) => {
                        self.delete_file_locked(&canonical, filename, false).await?;
                        self.index_chunks(&canonical, filename, indexed_at, chunks).await
                    }
                    None => Err(Error::Internal("ingest produced no outcome".into())),
                }
            }
            .await;
            results.push((filename.clone(), result));
        }
        Ok(results)
    }

    /// Remove a file's chunks from the index and catalog; `delete_content`
    /// additionally removes its bytes from the blob store.
    pub async fn delete_file(&self, kb: &str, filename: &str, delete_content: bool) -> Result<()> {
        validate_kb_name(kb)?;
        validate_filename(filename)?;

        let kb_lock = self.kb_lock(kb);
        let _kb_guard = kb_lock.read().await;
        let file_lock = self.file_lock(kb, filename);
        let _file_guard = file_lock.lock().await;
        let canonical = self.canonical_kb_name(kb).await?;

        self.delete_file_locked(&canonical, filename, delete_content).await
    }

    /// `delete_file`'s body, assuming the caller already holds the knowledge
    /// base's and file's locks (e.g. `update_files`, which locks once per
    /// file across its own delete-then-reindex swap).
    async fn delete_file_locked(&self, kb: &str, filename: &str, delete_content: bool) -> Result<()> {
        let docs = self.catalog.list_file_docs(kb, Some(filename), None).await?;
        let ids: Vec<String> = docs.into_iter().map(|d| d.id).collect();
        if !ids.is_empty() {
            self.index.delete_docs(kb, &ids).await?;
        }
        self.catalog.delete_file(kb, filename).await?;
        if delete_content {
            self.blob.delete_file(kb, filename)?;
        }
        Ok(())
    }

    pub async fn search_docs(&self, kb: &str, query: &str, top_k: usize) -> Result<Vec<RetrievedDoc>> {
        validate_kb_name(kb)?;
        let kb_lock = self.kb_lock(kb);
        let _guard = kb_lock.read().await;
        let canonical = self.canonical_kb_name(kb).await?;

        retrieval::search_docs(
            &self.config,
            self.embedding.as_ref(),
            self.index.as_ref(),
            self.reranker.as_deref(),
            &canonical,
            query,
            top_k,
        )
        .await
    }

    pub async fn list_kb_file_details(&self, kb: &str) -> Result<Vec<FileRecord>> {
        self.catalog.list_files(kb).await
    }

    pub async fn list_file_docs(
        &self,
        kb: &str,
        filename: Option<&str>,
        metadata_filter: Option<&Value>,
    ) -> Result<Vec<FileDoc>> {
        self.catalog.list_file_docs(kb, filename, metadata_filter).await
    }

    pub async fn list_kbs(&self, min_file_count: i64) -> Result<Vec<KnowledgeBase>> {
        self.catalog.list_kbs(min_file_count).await
    }

    pub async fn get_kb_detail(&self, name: &str) -> Result<KnowledgeBase> {
        self.catalog.get_kb_detail(name).await
    }
}

fn outcome_filename(outcome: &IngestOutcome) -> &str {
    match outcome {
        IngestOutcome::Ok { filename, .. } => filename,
        IngestOutcome::Err { filename, .. } => filename,
    }
}
