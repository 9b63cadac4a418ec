use std::path::Path;

use serde_json::json;

use super::{Loader, RawDoc};
use crate::error::Result;

/// Generic text loader with automatic encoding detection, used both directly
/// for `.txt` files and as the fallback for unregistered extensions.
pub struct PlainTextLoader;

impl Loader for PlainTextLoader {
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

/// Sniff an encoding from a BOM if present, otherwise fall back to UTF-8 with
/// a lossless `encoding_rs` decode (which degrades gracefully for latin-1-ish
/// byte streams rather than erroring).
pub(super) fn decode_text(bytes: &[u8]) -> String {
    let (encoding, bom_len) = encoding_rs::Encoding::for_bom(bytes).unwrap_or((encoding_rs::UTF_8, 0));
    let (decoded, _, _) = encoding.decode(&bytes[bom_len..]);
    decoded.into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn decodes_plain_utf8() {
        let loader = PlainTextLoader;
        let docs = loader.load(&PathBuf::from("a.txt"), "hello, world".as_bytes()).unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].context, "hello, world");
    }

    #[test]
    fn decodes_utf8_bom() {
        let mut bytes = vec![0xEF, 0xBB, 0xBF];
        bytes.extend_from_slice("bom text".as_bytes());
        let loader = PlainTextLoader;
        let docs = loader.load(&PathBuf::from("a.txt"), &bytes).unwrap();
        assert_eq!(docs[0].context, "bom text");
    }

    #[test]
    fn sets_source_metadata_to_filename() {
        let loader = PlainTextLoader;
        let docs = loader.load(&PathBuf::from("notes/a.txt"), b"x").unwrap();
        assert_eq!(docs[0].metadata["source"], "a.txt");
    }
}
