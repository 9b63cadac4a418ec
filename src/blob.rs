use std::collections::HashSet;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::config::Config;
use crate::error::{Error, Result};

/// Basenames that are never part of a knowledge base's content, regardless
/// of where they appear in the tree.
const SKIP_PREFIXES: &[&str] = &["tmp", "temp", ".", "~$"];

/// File-backed store for the raw bytes of each file in a knowledge base,
/// rooted at `<kb_root_path>/<kb>/content/`.
#[derive(Debug, Clone)]
pub struct BlobStore {
    root: PathBuf,
}

impl BlobStore {
    pub fn new(config: &Config) -> Self {
        Self {
            root: config.kb_root_path.clone(),
        }
    }

    fn kb_dir(&self, kb: &str) -> PathBuf {
        self.root.join(kb)
    }

    fn content_dir(&self, kb: &str) -> PathBuf {
        self.kb_dir(kb).join("content")
    }

    /// Create the directory tree for a knowledge base. Idempotent.
    pub fn create_kb_dirs(&self, kb: &str) -> Result<()> {
        std::fs::create_dir_all(self.content_dir(kb))?;
        Ok(())
    }

    /// Whether the knowledge base's directory tree exists.
    pub fn kb_exists(&self, kb: &str) -> bool {
        self.content_dir(kb).is_dir()
    }

    /// Remove the whole knowledge base directory tree, content included.
    pub fn delete_kb_tree(&self, kb: &str) -> Result<()> {
        let dir = self.kb_dir(kb);
        if dir.is_dir() {
            std::fs::remove_dir_all(&dir)?;
        }
        Ok(())
    }

    /// Absolute path a relative filename resolves to within a knowledge base.
    pub fn file_path(&self, kb: &str, filename: &str) -> PathBuf {
        self.content_dir(kb).join(normalize_relative_path(filename))
    }

    pub fn file_exists(&self, kb: &str, filename: &str) -> bool {
        self.file_path(kb, filename).is_file()
    }

    /// Write `bytes` to `kb/filename`, creating parent directories as needed.
    ///
    /// If the file already exists, same-size content is treated as a no-op
    /// success unless `overwrite` is set, in which case the new bytes always
    /// replace the old ones. The write itself is atomic: bytes land in a
    /// sibling temp file first, then are renamed into place.
    pub fn save_upload(&self, kb: &str, filename: &str, bytes: &[u8], overwrite: bool) -> Result<()> {
        let dest = self.file_path(kb, filename);
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent)?;
        }

        if !overwrite && dest.is_file() {
            let existing_len = std::fs::metadata(&dest)?.len();
            if existing_len == bytes.len() as u64 {
                return Ok(());
            }
            return Err(Error::FileAlreadyExists {
                kb: kb.to_string(),
                filename: filename.to_string(),
            });
        }

        let tmp_name = format!(
            ".tmp-{}-{}",
            std::process::id(),
            dest.file_name().and_then(|n| n.to_str()).unwrap_or("upload")
        );
        let tmp_path = dest
            .parent()
            .map(|p| p.join(&tmp_name))
            .unwrap_or_else(|| PathBuf::from(&tmp_name));

        std::fs::write(&tmp_path, bytes)?;
        std::fs::rename(&tmp_path, &dest)?;
        Ok(())
    }

    pub fn delete_file(&self, kb: &str, filename: &str) -> Result<()> {
        let path = self.file_path(kb, filename);
        if path.is_file() {
            std::fs::remove_file(&path)?;
        }
        Ok(())
    }

    /// List every file under a knowledge base's content root, as paths
    /// relative to that root, posix-normalized and sorted.
    pub fn list_files(&self, kb: &str) -> Result<Vec<String>> {
        let root = self.content_dir(kb);
        if !root.is_dir() {
            return Ok(Vec::new());
        }

        let mut visited = HashSet::new();
        let mut results = Vec::new();
        walk(&root, &root, &mut visited, &mut results)?;
        results.sort();
        Ok(results)
    }
}

/// Recursively collect files under `dir`, skipping temp/dotfile basenames
/// and breaking symlink cycles via a set of visited canonical paths.
fn walk(
    root: &Path,
    dir: &Path,
    visited: &mut HashSet<PathBuf>,
    results: &mut Vec<String>,
) -> Result<()> {
    let canonical = dir.canonicalize().unwrap_or_else(|_| dir.to_path_buf());
    if !visited.insert(canonical) {
        debug!("skipping already-visited directory (symlink cycle): {}", dir.display());
        return Ok(());
    }

    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let basename = entry.file_name();
        let basename = basename.to_string_lossy();

        if should_skip(&basename) {
            continue;
        }

        // `std::fs::metadata` follows symlinks (unlike `DirEntry::file_type`,
        // which has lstat semantics and would skip a symlinked entry
        // entirely), so symlinked files and directories are walked the same
        // as real ones; the canonical-path check at the top of `walk` stops
        // a symlink cycle from recursing forever.
        let Ok(metadata) = std::fs::metadata(&path) else {
            continue;
        };
        if metadata.is_dir() {
            walk(root, &path, visited, results)?;
        } else if metadata.is_file() {
            let relative = path
                .strip_prefix(root)
                .map_err(|_| Error::Internal(format!("{} is not under {}", path.display(), root.display())))?;
            results.push(relative.to_string_lossy().replace('\\', "/"));
        }
    }

    Ok(())
}

fn should_skip(basename: &str) -> bool {
    let lower = basename.to_lowercase();
    SKIP_PREFIXES.iter().any(|p| lower.starts_with(p))
}

/// Normalize a caller-supplied relative filename to use forward slashes and
/// strip any leading separators, so it composes safely with `content_dir`.
fn normalize_relative_path(filename: &str) -> PathBuf {
    let cleaned = filename.replace('\\', "/");
    let cleaned = cleaned.trim_start_matches('/');
    PathBuf::from(cleaned)
}
