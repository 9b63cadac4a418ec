use pulldown_cmark::{Event, HeadingLevel, Parser, Tag, TagEnd};
use serde_json::Value;

use super::{Chunk, Splitter};

/// Splits markdown on `#`..`####` headings, tagging each resulting chunk with
/// `head1..head4` metadata carried forward from the most recent heading at
/// each level. Ignores `chunk_size`/`chunk_overlap`: heading boundaries are
/// the unit, however long or short the section between them is.
pub struct MarkdownHeaderSplitter;

impl MarkdownHeaderSplitter {
    pub fn new() -> Self {
        Self
    }
}

impl Default for MarkdownHeaderSplitter {
    fn default() -> Self {
        Self::new()
    }
}

struct Section {
    heads: [Option<String>; 4],
    body: String,
}

impl Splitter for MarkdownHeaderSplitter {
    fn split(&self, context: &str, metadata: &Value) -> Vec<Chunk> {
        let parser = Parser::new(context);

        let mut heads: [Option<String>; 4] = [None, None, None, None];
        let mut sections: Vec<Section> = Vec::new();
        let mut current_body = String::new();
        let mut in_heading: Option<usize> = None;
        let mut heading_text = String::new();

        for event in parser {
            match event {
                Event::Start(Tag::Heading { level, .. }) => {
                    if let Some(level_idx) = heading_level_index(level) {
                        if !current_body.trim().is_empty() || sections.is_empty() {
                            sections.push(Section {
                                heads: heads.clone(),
                                body: std::mem::take(&mut current_body),
                            });
                        } else {
                            current_body.clear();
                        }
                        in_heading = Some(level_idx);
                        heading_text.clear();
                    }
                }
                Event::End(TagEnd::Heading(level)) => {
                    if let Some(level_idx) = heading_level_index(level) {
                        heads[level_idx] = Some(heading_text.trim().to_string());
                        for h in heads.iter_mut().skip(level_idx + 1) {
                            *h = None;
                        }
                        in_heading = None;
                    }
                }
                Event::Text(text) | Event::Code(text) => {
                    if in_heading.is_some() {
                        heading_text.push_str(&text);
                    } else {
                        current_body.push_str(&text);
                        current_body.push(' ');
                    }
                }
                Event::SoftBreak | Event::HardBreak => {
                    if in_heading.is_none() {
                        current_body.push('\n');
                    }
                }
                _ => {}
            }
        }

        if !current_body.trim().is_empty() {
            sections.push(Section {
                heads,
                body: current_body,
            });
        }

        sections
            .into_iter()
            .filter(|s| !s.body.trim().is_empty())
            .map(|s| {
                let mut m = metadata.clone();
                if let Value::Object(ref mut map) = m {
                    for (i, head) in s.heads.iter().enumerate() {
                        if let Some(h) = head {
                            map.insert(format!("head{}", i + 1), Value::String(h.clone()));
                        }
                    }
                }
                Chunk {
                    context: s.body.trim().to_string(),
                    metadata: m,
                }
            })
            .collect()
    }
}

fn heading_level_index(level: HeadingLevel) -> Option<usize> {
    match level {
        HeadingLevel::H1 => Some(0),
        HeadingLevel::H2 => Some(1),
        HeadingLevel::H3 => Some(2),
        HeadingLevel::H4 => Some(3),
        _ => None,
    }
}
