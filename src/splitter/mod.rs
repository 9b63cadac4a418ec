mod markdown_header;
mod recursive;

use std::collections::HashMap;
use std::path::Path;

use serde_json::Value;

pub use markdown_header::MarkdownHeaderSplitter;
pub use recursive::RecursiveSplitter;

/// A chunk of text carved out of a `RawDoc`, with whatever metadata the
/// splitter attached (heading context, row data, ...).
#[derive(Debug, Clone)]
pub struct Chunk {
    pub context: String,
    pub metadata: Value,
}

/// Splits a single `RawDoc`'s text into `Chunk`s.
pub trait Splitter: Send + Sync {
    fn split(&self, context: &str, metadata: &Value) -> Vec<Chunk>;
}

/// Maps file extensions to splitter implementations. `.csv` is intentionally
/// unregistered: CSV rows pass through as one chunk per row, already sized
/// correctly by the loader.
pub struct SplitterRegistry {
    splitters: HashMap<String, Box<dyn Splitter>>,
    default: RecursiveSplitter,
}

impl SplitterRegistry {
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Self {
        let mut splitters: HashMap<String, Box<dyn Splitter>> = HashMap::new();
        splitters.insert("md".to_string(), Box::new(MarkdownHeaderSplitter::new()));
        splitters.insert("markdown".to_string(), Box::new(MarkdownHeaderSplitter::new()));

        Self {
            splitters,
            default: RecursiveSplitter::new(chunk_size, chunk_overlap),
        }
    }

    /// Split a loaded doc's content, dispatching on `path`'s extension.
    /// `.csv` passes the content through untouched as a single chunk.
    pub fn split(&self, path: &Path, context: &str, metadata: &Value) -> Vec<Chunk> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_lowercase());

        if ext.as_deref() == Some("csv") {
            return vec![Chunk {
                context: context.to_string(),
                metadata: metadata.clone(),
            }];
        }

        match ext.as_deref().and_then(|e| self.splitters.get(e)) {
            Some(splitter) => splitter.split(context, metadata),
            None => self.default.split(context, metadata),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::path::PathBuf;

    #[test]
    fn csv_passes_through_untouched() {
        let registry = SplitterRegistry::new(10, 2);
        let chunks = registry.split(&PathBuf::from("a.csv"), "name: alice", &json!({}));
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].context, "name: alice");
    }

    #[test]
    fn markdown_uses_header_splitter() {
        let registry = SplitterRegistry::new(500, 50);
        let chunks = registry.split(
            &PathBuf::from("a.md"),
            "# Intro\nbody text here",
            &json!({"source": "a.md"}),
        );
        assert!(!chunks.is_empty());
        assert_eq!(chunks[0].metadata["head1"], "Intro");
    }

    #[test]
    fn unknown_extension_uses_recursive_default() {
        let registry = SplitterRegistry::new(10, 2);
        let chunks = registry.split(&PathBuf::from("a.txt"), "one two three four five", &json!({}));
        assert!(chunks.len() > 1);
    }
}
