use std::path::Path;

use serde_json::{json, Value};

use super::text::decode_text;
use super::{Loader, RawDoc};
use crate::error::{Error, Result};

/// One `RawDoc` per data row; header fields become `"column: value"` lines
/// joined into that row's context, with the raw field values also carried in
/// metadata.
pub struct CsvLoader;

impl Loader for CsvLoader {
    fn load(&self, path: &Path, bytes: &[u8]) -> Result<Vec<RawDoc>> {
        let text = decode_text(bytes);
        let mut lines = text.lines();

        let header = match lines.next() {
            Some(h) => h,
            None => return Ok(Vec::new()),
        };
        let columns: Vec<&str> = header.split(',').map(str::trim).collect();

        let mut docs = Vec::new();
        for (row_idx, line) in lines.enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let fields: Vec<&str> = line.split(',').collect();
            if fields.len() != columns.len() {
                return Err(Error::Loader {
                    path: path.to_path_buf(),
                    message: format!(
                        "row {} has {} fields, expected {} (header: {header})",
                        row_idx + 1,
                        fields.len(),
                        columns.len()
                    ),
                });
            }

            let mut context_lines = Vec::with_capacity(columns.len());
            let mut row_obj = serde_json::Map::new();
            for (col, val) in columns.iter().zip(fields.iter()) {
                context_lines.push(format!("{col}: {val}"));
                row_obj.insert(col.to_string(), Value::String(val.trim().to_string()));
            }

            docs.push(RawDoc {
                context: context_lines.join("\n"),
                metadata: json!({
                    "source": path.file_name().map(|n| n.to_string_lossy().to_string()),
                    "row": row_obj,
                }),
            });
        }

        Ok(docs)
    }
}
