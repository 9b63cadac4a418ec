mod csv;
mod markdown;
mod text;

use std::collections::HashMap;
use std::path::Path;

use serde_json::Value;

use crate::error::Result;

pub use csv::CsvLoader;
pub use markdown::MarkdownLoader;
pub use text::PlainTextLoader;

/// A single unit of loaded, not-yet-split content pulled out of a source file.
#[derive(Debug, Clone)]
pub struct RawDoc {
    pub context: String,
    pub metadata: Value,
}

/// Converts the bytes of a file into one or more `RawDoc`s.
///
/// Implementations of individual file formats beyond the reference set here
/// (PDF, OCR, HTML, ...) are external collaborators; the registry only
/// describes how the engine picks between whatever is registered.
pub trait Loader: Send + Sync {
    fn load(&self, path: &Path, bytes: &[u8]) -> Result<Vec<RawDoc>>;
}

/// Maps file extensions to loader implementations, falling back to a plain
/// text loader with automatic encoding detection for anything unregistered
/// that still looks like text.
pub struct LoaderRegistry {
    loaders: HashMap<String, Box<dyn Loader>>,
    fallback: PlainTextLoader,
}

impl LoaderRegistry {
    pub fn with_defaults() -> Self {
        let mut loaders: HashMap<String, Box<dyn Loader>> = HashMap::new();
        loaders.insert("md".to_string(), Box::new(MarkdownLoader));
        loaders.insert("markdown".to_string(), Box::new(MarkdownLoader));
        loaders.insert("csv".to_string(), Box::new(CsvLoader));
        loaders.insert("txt".to_string(), Box::new(PlainTextLoader));

        Self {
            loaders,
            fallback: PlainTextLoader,
        }
    }

    /// Load `path`'s content, dispatching on its extension. Any unregistered
    /// or failing loader falls back to the plain text loader.
    pub fn load(&self, path: &Path, bytes: &[u8]) -> Result<Vec<RawDoc>> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_lowercase());

        match ext.as_deref().and_then(|e| self.loaders.get(e)) {
            Some(loader) => loader.load(path, bytes).or_else(|_| self.fallback.load(path, bytes)),
            None => self.fallback.load(path, bytes),
        }
    }
}

impl Default for LoaderRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn dispatches_markdown_by_extension() {
        let registry = LoaderRegistry::with_defaults();
        let docs = registry
            .load(&PathBuf::from("notes.md"), b"# Title\nbody")
            .unwrap();
        assert_eq!(docs.len(), 1);
    }

    #[test]
    fn falls_back_to_text_loader_for_unknown_extension() {
        let registry = LoaderRegistry::with_defaults();
        let docs = registry.load(&PathBuf::from("readme.rst"), b"hello world").unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].context, "hello world");
    }

    #[test]
    fn falls_back_to_text_loader_when_registered_loader_fails() {
        let registry = LoaderRegistry::with_defaults();
        // Mismatched field count makes the CSV loader error.
        let docs = registry
            .load(&PathBuf::from("data.csv"), b"name,age\nalice,30,extra\n")
            .unwrap();
        assert_eq!(docs.len(), 1);
        assert!(docs[0].context.contains("alice,30,extra"));
    }

    #[test]
    fn csv_loads_one_doc_per_row() {
        let registry = LoaderRegistry::with_defaults();
        let docs = registry
            .load(&PathBuf::from("data.csv"), b"name,age\nalice,30\nbob,40\n")
            .unwrap();
        assert_eq!(docs.len(), 2);
    }
}
