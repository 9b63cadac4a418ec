use std::path::Path;

use serde_json::json;

use super::text::decode_text;
use super::{Loader, RawDoc};
use crate::error::Result;

/// Loads a whole markdown file as a single `RawDoc`; heading structure is
/// pulled out later by the markdown header splitter, not here.
pub struct MarkdownLoader;

impl Loader for MarkdownLoader {
    fn load(&self, path: &Path, bytes: &[u8]) -> Result<Vec<RawDoc>> {
        let text = decode_text(bytes);
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();

        Ok(vec![RawDoc {
            context: text,
            metadata: json!({ "source": filename }),
        }])
    }
}
