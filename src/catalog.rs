use serde_json::Value;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::validation::fold_case;

/// A knowledge base as stored in the catalog.
#[derive(Debug, Clone, serde::Serialize)]
pub struct KnowledgeBase {
    pub name: String,
    pub create_time: i64,
    pub file_count: i64,
}

/// A file as stored in the catalog.
#[derive(Debug, Clone, serde::Serialize)]
pub struct FileRecord {
    pub kb_name: String,
    pub filename: String,
    pub file_version: i64,
    pub indexed_at: i64,
}

/// A chunk (FileDoc) as stored in the catalog.
#[derive(Debug, Clone, serde::Serialize)]
pub struct FileDoc {
    pub id: String,
    pub kb_name: String,
    pub filename: String,
    pub context: String,
    pub metadata: Value,
}

/// The async relational store backing knowledge-base/file/chunk bookkeeping.
///
/// Grounded on the sqlx-backed `KbStore` pattern: one pool, idempotent schema
/// bootstrap on open, multi-statement operations wrapped in a transaction.
#[derive(Debug, Clone)]
pub struct Catalog {
    pool: SqlitePool,
}

impl Catalog {
    /// Open (creating if necessary) the catalog database under `config.kb_root_path`.
    pub async fn open(config: &Config) -> Result<Self> {
        std::fs::create_dir_all(&config.kb_root_path)?;
        let db_path = config.kb_root_path.join(&config.catalog_file);

        let options = SqliteConnectOptions::new()
            .filename(&db_path)
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new().max_connections(5).connect_with(options).await?;

        let catalog = Self { pool };
        catalog.bootstrap().await?;
        Ok(catalog)
    }

    async fn bootstrap(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS knowledge_base (
                name TEXT NOT NULL,
                name_ci TEXT NOT NULL UNIQUE,
                create_time INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS file (
                kb_name_ci TEXT NOT NULL,
                filename TEXT NOT NULL,
                filename_ci TEXT NOT NULL,
                file_version INTEGER NOT NULL,
                indexed_at INTEGER NOT NULL,
                UNIQUE(kb_name_ci, filename_ci)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS file_doc (
                id TEXT NOT NULL PRIMARY KEY,
                kb_name_ci TEXT NOT NULL,
                filename TEXT NOT NULL,
                filename_ci TEXT NOT NULL,
                context TEXT NOT NULL,
                metadata TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Insert a knowledge base if it doesn't already exist (case-insensitively).
    /// Returns an error if one already exists under a different casing.
    pub async fn upsert_kb(&self, name: &str, create_time: i64) -> Result<()> {
        let name_ci = fold_case(name);
        let existing = sqlx::query("SELECT name FROM knowledge_base WHERE name_ci = ?")
            .bind(&name_ci)
            .fetch_optional(&self.pool)
            .await?;
        if existing.is_some() {
            return Err(Error::KbAlreadyExists(name.to_string()));
        }
        sqlx::query("INSERT INTO knowledge_base (name, name_ci, create_time) VALUES (?, ?, ?)")
            .bind(name)
            .bind(&name_ci)
            .bind(create_time)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn kb_exists(&self, name: &str) -> Result<bool> {
        let name_ci = fold_case(name);
        let row = sqlx::query("SELECT 1 FROM knowledge_base WHERE name_ci = ?")
            .bind(&name_ci)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    /// List knowledge bases with at least `min_file_count` files.
    pub async fn list_kbs(&self, min_file_count: i64) -> Result<Vec<KnowledgeBase>> {
        let rows = sqlx::query(
            r#"
            SELECT kb.name, kb.create_time,
                   (SELECT COUNT(*) FROM file f WHERE f.kb_name_ci = kb.name_ci) AS file_count
            FROM knowledge_base kb
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut out = Vec::new();
        for row in rows {
            let file_count: i64 = row.try_get("file_count")?;
            if file_count >= min_file_count {
                out.push(KnowledgeBase {
                    name: row.try_get("name")?,
                    create_time: row.try_get("create_time")?,
                    file_count,
                });
            }
        }
        Ok(out)
    }

    pub async fn load_kb(&self, name: &str) -> Result<KnowledgeBase> {
        let name_ci = fold_case(name);
        let row = sqlx::query(
            r#"
            SELECT kb.name, kb.create_time,
                   (SELECT COUNT(*) FROM file f WHERE f.kb_name_ci = kb.name_ci) AS file_count
            FROM knowledge_base kb
            WHERE kb.name_ci = ?
            "#,
        )
        .bind(&name_ci)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| Error::KbNotFound(name.to_string()))?;

        Ok(KnowledgeBase {
            name: row.try_get("name")?,
            create_time: row.try_get("create_time")?,
            file_count: row.try_get("file_count")?,
        })
    }

    pub async fn get_kb_detail(&self, name: &str) -> Result<KnowledgeBase> {
        self.load_kb(name).await
    }

    /// Delete a knowledge base and cascade into its files and chunks.
    pub async fn delete_kb(&self, name: &str) -> Result<()> {
        let name_ci = fold_case(name);
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM file_doc WHERE kb_name_ci = ?")
            .bind(&name_ci)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM file WHERE kb_name_ci = ?")
            .bind(&name_ci)
            .execute(&mut *tx)
            .await?;
        let result = sqlx::query("DELETE FROM knowledge_base WHERE name_ci = ?")
            .bind(&name_ci)
            .execute(&mut *tx)
            .await?;
        if result.rows_affected() == 0 {
            return Err(Error::KbNotFound(name.to_string()));
        }
        tx.commit().await?;
        Ok(())
    }

    /// Add (or re-version) a file record. Re-insertion of a known filename
    /// bumps `file_version` rather than erroring.
    pub async fn add_file(&self, kb: &str, filename: &str, indexed_at: i64) -> Result<i64> {
        let kb_ci = fold_case(kb);
        let filename_ci = fold_case(filename);

        let existing: Option<i64> = sqlx::query(
            "SELECT file_version FROM file WHERE kb_name_ci = ? AND filename_ci = ?",
        )
        .bind(&kb_ci)
        .bind(&filename_ci)
        .fetch_optional(&self.pool)
        .await?
        .map(|row| row.try_get("file_version"))
        .transpose()?;

        let version = existing.unwrap_or(0) + 1;

        if existing.is_some() {
            sqlx::query(
                "UPDATE file SET file_version = ?, indexed_at = ? WHERE kb_name_ci = ? AND filename_ci = ?",
            )
            .bind(version)
            .bind(indexed_at)
            .bind(&kb_ci)
            .bind(&filename_ci)
            .execute(&self.pool)
            .await?;
        } else {
            sqlx::query(
                "INSERT INTO file (kb_name_ci, filename, filename_ci, file_version, indexed_at) VALUES (?, ?, ?, ?, ?)",
            )
            .bind(&kb_ci)
            .bind(filename)
            .bind(&filename_ci)
            .bind(version)
            .bind(indexed_at)
            .execute(&self.pool)
            .await?;
        }

        Ok(version)
    }

    pub async fn file_exists(&self, kb: &str, filename: &str) -> Result<bool> {
        let kb_ci = fold_case(kb);
        let filename_ci = fold_case(filename);
        let row = sqlx::query("SELECT 1 FROM file WHERE kb_name_ci = ? AND filename_ci = ?")
            .bind(&kb_ci)
            .bind(&filename_ci)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    pub async fn list_files(&self, kb: &str) -> Result<Vec<FileRecord>> {
        let kb_ci = fold_case(kb);
        let rows = sqlx::query(
            "SELECT filename, file_version, indexed_at FROM file WHERE kb_name_ci = ? ORDER BY filename",
        )
        .bind(&kb_ci)
        .fetch_all(&self.pool)
        .await?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            out.push(FileRecord {
                kb_name: kb.to_string(),
                filename: row.try_get("filename")?,
                file_version: row.try_get("file_version")?,
                indexed_at: row.try_get("indexed_at")?,
            });
        }
        Ok(out)
    }

    pub async fn get_file_detail(&self, kb: &str, filename: &str) -> Result<FileRecord> {
        let kb_ci = fold_case(kb);
        let filename_ci = fold_case(filename);
        let row = sqlx::query(
            "SELECT filename, file_version, indexed_at FROM file WHERE kb_name_ci = ? AND filename_ci = ?",
        )
        .bind(&kb_ci)
        .bind(&filename_ci)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| Error::FileNotFound {
            kb: kb.to_string(),
            filename: filename.to_string(),
        })?;

        Ok(FileRecord {
            kb_name: kb.to_string(),
            filename: row.try_get("filename")?,
            file_version: row.try_get("file_version")?,
            indexed_at: row.try_get("indexed_at")?,
        })
    }

    /// Delete a file record and cascade into its chunks.
    pub async fn delete_file(&self, kb: &str, filename: &str) -> Result<()> {
        let kb_ci = fold_case(kb);
        let filename_ci = fold_case(filename);
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM file_doc WHERE kb_name_ci = ? AND filename_ci = ?")
            .bind(&kb_ci)
            .bind(&filename_ci)
            .execute(&mut *tx)
            .await?;
        let result = sqlx::query("DELETE FROM file WHERE kb_name_ci = ? AND filename_ci = ?")
            .bind(&kb_ci)
            .bind(&filename_ci)
            .execute(&mut *tx)
            .await?;
        if result.rows_affected() == 0 {
            return Err(Error::FileNotFound {
                kb: kb.to_string(),
                filename: filename.to_string(),
            });
        }
        tx.commit().await?;
        Ok(())
    }

    /// Delete all file records (and chunks) belonging to a knowledge base,
    /// without removing the knowledge base itself.
    pub async fn delete_files_for_kb(&self, kb: &str) -> Result<()> {
        let kb_ci = fold_case(kb);
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM file_doc WHERE kb_name_ci = ?")
            .bind(&kb_ci)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM file WHERE kb_name_ci = ?")
            .bind(&kb_ci)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    /// Persist chunks produced for a file. Replaces any previously stored
    /// chunks for that (kb, filename) pair.
    pub async fn replace_file_docs(&self, kb: &str, filename: &str, docs: &[FileDoc]) -> Result<()> {
        let kb_ci = fold_case(kb);
        let filename_ci = fold_case(filename);
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM file_doc WHERE kb_name_ci = ? AND filename_ci = ?")
            .bind(&kb_ci)
            .bind(&filename_ci)
            .execute(&mut *tx)
            .await?;

        for doc in docs {
            sqlx::query(
                "INSERT INTO file_doc (id, kb_name_ci, filename, filename_ci, context, metadata) VALUES (?, ?, ?, ?, ?, ?)",
            )
            .bind(&doc.id)
            .bind(&kb_ci)
            .bind(filename)
            .bind(&filename_ci)
            .bind(&doc.context)
            .bind(doc.metadata.to_string())
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    /// List chunks for a knowledge base, optionally scoped to one filename and
    /// to chunks whose metadata is a superset of `metadata_filter`.
    pub async fn list_file_docs(
        &self,
        kb: &str,
        filename: Option<&str>,
        metadata_filter: Option<&Value>,
    ) -> Result<Vec<FileDoc>> {
        let kb_ci = fold_case(kb);
        let rows = if let Some(filename) = filename {
            let filename_ci = fold_case(filename);
            sqlx::query("SELECT id, context, metadata, filename FROM file_doc WHERE kb_name_ci = ? AND filename_ci = ?")
                .bind(&kb_ci)
                .bind(&filename_ci)
                .fetch_all(&self.pool)
                .await?
        } else {
            sqlx::query("SELECT id, context, metadata, filename FROM file_doc WHERE kb_name_ci = ?")
                .bind(&kb_ci)
                .fetch_all(&self.pool)
                .await?
        };

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let metadata_str: String = row.try_get("metadata")?;
            let metadata: Value = serde_json::from_str(&metadata_str)
                .map_err(|e| Error::Catalog(format!("corrupt metadata json: {e}")))?;
            if let Some(filter) = metadata_filter {
                if !metadata_matches(&metadata, filter) {
                    continue;
                }
            }
            out.push(FileDoc {
                id: row.try_get("id")?,
                kb_name: kb.to_string(),
                filename: row.try_get("filename")?,
                context: row.try_get("context")?,
                metadata,
            });
        }
        Ok(out)
    }
}

/// Whether every key/value pair in `filter` is also present in `metadata`.
/// A non-object filter matches everything; a non-object metadata value
/// matches nothing but the empty filter.
fn metadata_matches(metadata: &Value, filter: &Value) -> bool {
    let Value::Object(filter_map) = filter else {
        return true;
    };
    let Value::Object(metadata_map) = metadata else {
        return filter_map.is_empty();
    };
    filter_map.iter().all(|(k, v)| metadata_map.get(k) == Some(v))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    async fn test_catalog(dir: &std::path::Path) -> Catalog {
        let mut cfg = Config::load(std::path::Path::new("/nonexistent")).unwrap();
        cfg.kb_root_path = dir.to_path_buf();
        cfg.catalog_file = std::path::PathBuf::from("info.db");
        Catalog::open(&cfg).await.unwrap()
    }

    #[tokio::test]
    async fn upsert_and_load_kb() {
        let dir = tempdir().unwrap();
        let catalog = test_catalog(dir.path()).await;
        catalog.upsert_kb("Samples", 100).await.unwrap();
        let kb = catalog.load_kb("samples").await.unwrap();
        assert_eq!(kb.name, "Samples");
        assert_eq!(kb.file_count, 0);
    }

    #[tokio::test]
    async fn upsert_kb_rejects_case_insensitive_duplicate() {
        let dir = tempdir().unwrap();
        let catalog = test_catalog(dir.path()).await;
        catalog.upsert_kb("Samples", 100).await.unwrap();
        let err = catalog.upsert_kb("SAMPLES", 101).await.unwrap_err();
        assert!(matches!(err, Error::KbAlreadyExists(_)));
    }

    #[tokio::test]
    async fn delete_kb_cascades_files_and_docs() {
        let dir = tempdir().unwrap();
        let catalog = test_catalog(dir.path()).await;
        catalog.upsert_kb("samples", 100).await.unwrap();
        catalog.add_file("samples", "a.md", 101).await.unwrap();
        catalog
            .replace_file_docs(
                "samples",
                "a.md",
                &[FileDoc {
                    id: "id-1".into(),
                    kb_name: "samples".into(),
                    filename: "a.md".into(),
                    context: "hello".into(),
                    metadata: serde_json::json!({"source": "a.md"}),
                }],
            )
            .await
            .unwrap();

        catalog.delete_kb("samples").await.unwrap();
        assert!(!catalog.kb_exists("samples").await.unwrap());
        assert!(catalog.list_file_docs("samples", None, None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn add_file_increments_version_on_reinsert() {
        let dir = tempdir().unwrap();
        let catalog = test_catalog(dir.path()).await;
        catalog.upsert_kb("samples", 100).await.unwrap();
        let v1 = catalog.add_file("samples", "a.md", 101).await.unwrap();
        let v2 = catalog.add_file("samples", "a.md", 102).await.unwrap();
        assert_eq!(v1, 1);
        assert_eq!(v2, 2);
    }

    #[tokio::test]
    async fn list_kbs_filters_by_min_file_count() {
        let dir = tempdir().unwrap();
        let catalog = test_catalog(dir.path()).await;
        catalog.upsert_kb("empty", 100).await.unwrap();
        catalog.upsert_kb("full", 100).await.unwrap();
        catalog.add_file("full", "a.md", 101).await.unwrap();

        let all = catalog.list_kbs(0).await.unwrap();
        assert_eq!(all.len(), 2);
        let populated = catalog.list_kbs(1).await.unwrap();
        assert_eq!(populated.len(), 1);
        assert_eq!(populated[0].name, "full");
    }

    #[tokio::test]
    async fn delete_file_not_found_errors() {
        let dir = tempdir().unwrap();
        let catalog = test_catalog(dir.path()).await;
        catalog.upsert_kb("samples", 100).await.unwrap();
        let err = catalog.delete_file("samples", "missing.md").await.unwrap_err();
        assert!(matches!(err, Error::FileNotFound { .. }));
    }

    #[tokio::test]
    async fn list_file_docs_scoped_to_filename() {
        let dir = tempdir().unwrap();
        let catalog = test_catalog(dir.path()).await;
        catalog.upsert_kb("samples", 100).await.unwrap();
        catalog.add_file("samples", "a.md", 101).await.unwrap();
        catalog.add_file("samples", "b.md", 101).await.unwrap();
        catalog
            .replace_file_docs(
                "samples",
                "a.md",
                &[FileDoc {
                    id: "id-a".into(),
                    kb_name: "samples".into(),
                    filename: "a.md".into(),
                    context: "from a".into(),
                    metadata: serde_json::json!({}),
                }],
            )
            .await
            .unwrap();
        catalog
            .replace_file_docs(
                "samples",
                "b.md",
                &[FileDoc {
                    id: "id-b".into(),
                    kb_name: "samples".into(),
                    filename: "b.md".into(),
                    context: "from b".into(),
                    metadata: serde_json::json!({}),
                }],
            )
            .await
            .unwrap();

        let docs = catalog.list_file_docs("samples", Some("a.md"), None).await.unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].context, "from a");
    }

    #[tokio::test]
    async fn list_file_docs_filters_by_metadata() {
        let dir = tempdir().unwrap();
        let catalog = test_catalog(dir.path()).await;
        catalog.upsert_kb("samples", 100).await.unwrap();
        catalog.add_file("samples", "a.md", 101).await.unwrap();
        catalog
            .replace_file_docs(
                "samples",
                "a.md",
                &[
                    FileDoc {
                        id: "id-1".into(),
                        kb_name: "samples".into(),
                        filename: "a.md".into(),
                        context: "intro section".into(),
                        metadata: serde_json::json!({"source": "a.md", "head1": "Intro"}),
                    },
                    FileDoc {
                        id: "id-2".into(),
                        kb_name: "samples".into(),
                        filename: "a.md".into(),
                        context: "appendix section".into(),
                        metadata: serde_json::json!({"source": "a.md", "head1": "Appendix"}),
                    },
                ],
            )
            .await
            .unwrap();

        let filter = serde_json::json!({"head1": "Intro"});
        let docs = catalog.list_file_docs("samples", None, Some(&filter)).await.unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].context, "intro section");
    }
}
