use serde_json::Value;

use super::{Chunk, Splitter};

/// Splits text on a descending cascade of separators (paragraph, sentence,
/// word), falling back to a hard character cut when none of those fit the
/// target size. Units are characters, not tokens — this engine never fetches
/// a BPE table at rest.
pub struct RecursiveSplitter {
    chunk_size: usize,
    chunk_overlap: usize,
}

const SEPARATORS: &[&str] = &["\n\n", "\n", ". ", " "];

impl RecursiveSplitter {
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
            chunk_overlap,
        }
    }

    fn split_text(&self, text: &str) -> Vec<String> {
        let pieces = split_recursive(text, SEPARATORS, self.chunk_size);
        merge_with_overlap(&pieces, self.chunk_size, self.chunk_overlap)
    }
}

impl Splitter for RecursiveSplitter {
    fn split(&self, context: &str, metadata: &Value) -> Vec<Chunk> {
        self.split_text(context)
            .into_iter()
            .map(|context| Chunk {
                context,
                metadata: metadata.clone(),
            })
            .collect()
    }
}

/// Recursively break `text` into pieces no longer than `chunk_size`,
/// trying each separator in turn before falling back to a hard cut.
fn split_recursive(text: &str, separators: &[&str], chunk_size: usize) -> Vec<String> {
    if text.chars().count() <= chunk_size {
        return vec![text.to_string()];
    }

    let Some((sep, rest_seps)) = separators.split_first() else {
        return hard_cut(text, chunk_size);
    };

    if sep.is_empty() || !text.contains(sep) {
        return split_recursive(text, rest_seps, chunk_size);
    }

    let mut out = Vec::new();
    for part in text.split(sep.as_ref() as &str) {
        if part.is_empty() {
            continue;
        }
        if part.chars().count() > chunk_size {
            out.extend(split_recursive(part, rest_seps, chunk_size));
        } else {
            out.push(part.to_string());
        }
    }
    if out.is_empty() {
        hard_cut(text, chunk_size)
    } else {
        out
    }
}

fn hard_cut(text: &str, chunk_size: usize) -> Vec<String> {
    text.chars()
        .collect::<Vec<char>>()
        .chunks(chunk_size.max(1))
        .map(|c| c.iter().collect())
        .collect()
}

/// Greedily pack small pieces back together up to `chunk_size`, carrying
/// `chunk_overlap` characters from the tail of one chunk into the next.
fn merge_with_overlap(pieces: &[String], chunk_size: usize, chunk_overlap: usize) -> Vec<String> {
    if pieces.is_empty() {
        return Vec::new();
    }

    let mut chunks = Vec::new();
    let mut current = String::new();

    for piece in pieces {
        let candidate_len = current.chars().count() + piece.chars().count();
        if !current.is_empty() && candidate_len > chunk_size {
            chunks.push(current.clone());
            let overlap_tail: String = current
                .chars()
                .rev()
                .take(chunk_overlap)
                .collect::<Vec<_>>()
                .into_iter()
                .rev()
                .collect();
            current = overlap_tail;
        }
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(piece);
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn short_text_is_one_chunk() {
        let splitter = RecursiveSplitter::new(100, 10);
        let chunks = splitter.split("short text", &json!({}));
        assert_eq!(chunks.len(), 1);
    }

    #[test]
    fn long_text_splits_on_paragraphs() {
        let splitter = RecursiveSplitter::new(20, 5);
        let text = "first paragraph here\n\nsecond paragraph here\n\nthird paragraph here";
        let chunks = splitter.split(text, &json!({}));
        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert!(chunk.context.chars().count() <= 40);
        }
    }

    #[test]
    fn metadata_is_preserved_across_chunks() {
        let splitter = RecursiveSplitter::new(5, 1);
        let chunks = splitter.split("one two three four five", &json!({"source": "a.txt"}));
        assert!(chunks.iter().all(|c| c.metadata["source"] == "a.txt"));
    }

    #[test]
    fn overlap_carries_tail_into_next_chunk() {
        let pieces: Vec<String> = vec!["aaaaa".into(), "bbbbb".into(), "ccccc".into()];
        let merged = merge_with_overlap(&pieces, 6, 3);
        assert!(merged.len() >= 2);
    }

    #[test]
    fn hard_cut_on_unsplittable_word() {
        let splitter = RecursiveSplitter::new(5, 0);
        let chunks = splitter.split("supercalifragilisticexpialidocious", &json!({}));
        assert!(chunks.len() > 1);
    }
}
