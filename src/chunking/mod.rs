//! Chunking: turning parsed segments into searchable chunks.
//!
//! The splitter buffers consecutive text segments and flushes them into
//! size-bounded chunks, keeps code blocks whole where possible, and turns
//! every media reference into a dedicated chunk.

use crate::parser::{Segment, SegmentType};
use crate::store::{Chunk, ChunkType};
use serde_json::json;

/// Size limits for the splitter, in characters.
#[derive(Debug, Clone, Copy)]
pub struct SplitterConfig {
    pub text_chunk_size: usize,
    pub code_chunk_size: usize,
}

impl Default for SplitterConfig {
    fn default() -> Self {
        Self {
            text_chunk_size: 1800,
            code_chunk_size: 2000,
        }
    }
}

/// Splits segment sequences into chunks, preserving document hierarchy.
#[derive(Debug, Clone, Default)]
pub struct SmartSplitter {
    config: SplitterConfig,
}

impl SmartSplitter {
    pub fn new(config: SplitterConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SplitterConfig {
        &self.config
    }

    /// Transform a segment sequence into chunks with dense indexes
    /// starting at `base_index`.
    pub fn split(&self, segments: &[Segment], base_index: i64) -> Vec<Chunk> {
        let mut chunks: Vec<Chunk> = Vec::new();
        let mut next_index = base_index;

        // Buffered text plus the breadcrumbs it was collected under.
        let mut buffer = String::new();
        let mut buffer_headers: Vec<String> = Vec::new();

        let flush =
            |buffer: &mut String, headers: &[String], chunks: &mut Vec<Chunk>, next_index: &mut i64| {
                let text = buffer.trim();
                if text.is_empty() {
                    buffer.clear();
                    return;
                }
                for piece in split_text(text, self.config.text_chunk_size) {
                    let mut chunk = Chunk::new(piece, ChunkType::Text, *next_index);
                    if !headers.is_empty() {
                        chunk.set_meta("headers", json!(headers));
                    }
                    chunks.push(chunk);
                    *next_index += 1;
                }
                buffer.clear();
            };

        for segment in segments {
            match segment.segment_type {
                SegmentType::Text => {
                    // A breadcrumb change closes the buffer so each chunk
                    // keeps accurate hierarchy.
                    if !buffer.is_empty() && segment.headers != buffer_headers {
                        flush(&mut buffer, &buffer_headers, &mut chunks, &mut next_index);
                    }
                    if buffer.is_empty() {
                        buffer_headers = segment.headers.clone();
                    } else {
                        buffer.push_str("\n\n");
                    }
                    buffer.push_str(&segment.content);
                }
                SegmentType::Code => {
                    flush(&mut buffer, &buffer_headers, &mut chunks, &mut next_index);
                    for piece in split_code(&segment.content, self.config.code_chunk_size) {
                        let mut chunk = Chunk::new(piece, ChunkType::Code, next_index);
                        chunk.language = segment.language.clone();
                        if !segment.headers.is_empty() {
                            chunk.set_meta("headers", json!(segment.headers));
                        }
                        chunks.push(chunk);
                        next_index += 1;
                    }
                }
                SegmentType::ImageRef | SegmentType::AudioRef | SegmentType::VideoRef => {
                    flush(&mut buffer, &buffer_headers, &mut chunks, &mut next_index);
                    let chunk_type = match segment.segment_type {
                        SegmentType::ImageRef => ChunkType::ImageRef,
                        SegmentType::AudioRef => ChunkType::AudioRef,
                        _ => ChunkType::VideoRef,
                    };
                    let mut chunk = Chunk::new(&segment.content, chunk_type, next_index);
                    if let Some(alt) = &segment.alt {
                        chunk.set_meta("alt", json!(alt));
                    }
                    if let Some(title) = &segment.title {
                        chunk.set_meta("title", json!(title));
                    }
                    if !segment.headers.is_empty() {
                        chunk.set_meta("headers", json!(segment.headers));
                    }
                    chunks.push(chunk);
                    next_index += 1;
                }
            }
        }

        flush(&mut buffer, &buffer_headers, &mut chunks, &mut next_index);
        chunks
    }

    /// Split bare text into size-bounded text chunks.
    pub fn split_plain_text(&self, text: &str, max_size: usize, base_index: i64) -> Vec<Chunk> {
        split_text(text.trim(), max_size)
            .into_iter()
            .enumerate()
            .map(|(i, piece)| Chunk::new(piece, ChunkType::Text, base_index + i as i64))
            .collect()
    }
}

/// Split text into pieces of at most `max_size` characters, preferring
/// paragraph, then sentence, then whitespace boundaries.
pub fn split_text(text: &str, max_size: usize) -> Vec<String> {
    let text = text.trim();
    if text.is_empty() {
        return Vec::new();
    }
    if text.chars().count() <= max_size {
        return vec![text.to_string()];
    }

    let mut pieces: Vec<String> = Vec::new();
    let mut current = String::new();
    let mut current_len = 0usize;

    let push_unit = |unit: &str, pieces: &mut Vec<String>, current: &mut String, current_len: &mut usize, sep: &str| {
        let unit_len = unit.chars().count();
        let sep_len = sep.chars().count();
        if *current_len > 0 && *current_len + sep_len + unit_len > max_size {
            pieces.push(std::mem::take(current));
            *current_len = 0;
        }
        if *current_len > 0 {
            current.push_str(sep);
            *current_len += sep_len;
        }
        current.push_str(unit);
        *current_len += unit_len;
    };

    for paragraph in text.split("\n\n") {
        let paragraph = paragraph.trim();
        if paragraph.is_empty() {
            continue;
        }

        if paragraph.chars().count() <= max_size {
            push_unit(paragraph, &mut pieces, &mut current, &mut current_len, "\n\n");
            continue;
        }

        // Oversized paragraph: fall back to sentences.
        for sentence in split_sentences(paragraph) {
            if sentence.chars().count() <= max_size {
                push_unit(&sentence, &mut pieces, &mut current, &mut current_len, " ");
                continue;
            }

            // Oversized sentence: fall back to whitespace.
            for word in sentence.split_whitespace() {
                if word.chars().count() > max_size {
                    // A single unbreakable token: hard split on char bounds.
                    for fragment in hard_split(word, max_size) {
                        push_unit(&fragment, &mut pieces, &mut current, &mut current_len, " ");
                    }
                } else {
                    push_unit(word, &mut pieces, &mut current, &mut current_len, " ");
                }
            }
        }
    }

    if current_len > 0 {
        pieces.push(current);
    }
    pieces
}

/// Split code into pieces of at most `max_size` characters, never breaking
/// a line in two unless the line itself exceeds the limit.
pub fn split_code(code: &str, max_size: usize) -> Vec<String> {
    if code.chars().count() <= max_size {
        return vec![code.to_string()];
    }

    let mut pieces: Vec<String> = Vec::new();
    let mut current = String::new();
    let mut current_len = 0usize;

    for line in code.lines() {
        let line_len = line.chars().count();
        if current_len > 0 && current_len + 1 + line_len > max_size {
            pieces.push(std::mem::take(&mut current));
            current_len = 0;
        }

        if line_len > max_size {
            for fragment in hard_split(line, max_size) {
                if current_len > 0 {
                    pieces.push(std::mem::take(&mut current));
                    current_len = 0;
                }
                pieces.push(fragment);
            }
            continue;
        }

        if current_len > 0 {
            current.push('\n');
            current_len += 1;
        }
        current.push_str(line);
        current_len += line_len;
    }

    if current_len > 0 {
        pieces.push(current);
    }
    pieces
}

/// Naive sentence boundary split on `.`, `!` or `?` followed by whitespace.
fn split_sentences(text: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut start = 0;
    let bytes: Vec<char> = text.chars().collect();

    let mut i = 0;
    while i < bytes.len() {
        if matches!(bytes[i], '.' | '!' | '?')
            && bytes.get(i + 1).map_or(true, |c| c.is_whitespace())
        {
            let sentence: String = bytes[start..=i].iter().collect();
            let sentence = sentence.trim().to_string();
            if !sentence.is_empty() {
                sentences.push(sentence);
            }
            start = i + 1;
        }
        i += 1;
    }

    if start < bytes.len() {
        let rest: String = bytes[start..].iter().collect();
        let rest = rest.trim().to_string();
        if !rest.is_empty() {
            sentences.push(rest);
        }
    }
    sentences
}

/// Hard split on character boundaries, last resort only.
fn hard_split(text: &str, max_size: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    chars
        .chunks(max_size)
        .map(|c| c.iter().collect())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::MarkdownNodeParser;

    fn splitter(text_size: usize, code_size: usize) -> SmartSplitter {
        SmartSplitter::new(SplitterConfig {
            text_chunk_size: text_size,
            code_chunk_size: code_size,
        })
    }

    #[test]
    fn test_exactly_chunk_size_is_one_chunk() {
        let text = "a".repeat(100);
        assert_eq!(split_text(&text, 100).len(), 1);
        assert_eq!(split_text(&"a".repeat(101), 100).len(), 2);
    }

    #[test]
    fn test_split_prefers_paragraph_boundaries() {
        let text = format!("{}\n\n{}", "x".repeat(60), "y".repeat(60));
        let pieces = split_text(&text, 80);
        assert_eq!(pieces.len(), 2);
        assert!(pieces[0].chars().all(|c| c == 'x'));
        assert!(pieces[1].chars().all(|c| c == 'y'));
    }

    #[test]
    fn test_split_falls_back_to_sentences() {
        let text = format!("{}. {}. {}.", "a".repeat(40), "b".repeat(40), "c".repeat(40));
        let pieces = split_text(&text, 90);
        assert!(pieces.len() >= 2);
        for piece in &pieces {
            assert!(piece.chars().count() <= 90);
        }
    }

    #[test]
    fn test_split_code_preserves_lines() {
        let code = (0..40)
            .map(|i| format!("let x{} = {};", i, i))
            .collect::<Vec<_>>()
            .join("\n");
        let pieces = split_code(&code, 120);
        assert!(pieces.len() > 1);
        for piece in &pieces {
            assert!(piece.chars().count() <= 120);
            for line in piece.lines() {
                assert!(line.starts_with("let x"));
            }
        }
    }

    #[test]
    fn test_chunk_indexes_are_dense() {
        let parser = MarkdownNodeParser::new();
        let segments = parser.parse(
            "# Doc\n\nSome intro text.\n\n```rust\nfn f() {}\n```\n\n![pic](a.png)\n\nClosing words.",
        );
        let chunks = splitter(1800, 2000).split(&segments, 0);

        for (i, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.chunk_index, i as i64);
        }
        assert_eq!(chunks[1].chunk_type, ChunkType::Code);
        assert_eq!(chunks[2].chunk_type, ChunkType::ImageRef);
    }

    #[test]
    fn test_media_ref_flushes_text_buffer() {
        let parser = MarkdownNodeParser::new();
        let segments = parser.parse("before\n\n![shot](s.jpg)\n\nafter");
        let chunks = splitter(1800, 2000).split(&segments, 0);

        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].content, "before");
        assert_eq!(chunks[1].chunk_type, ChunkType::ImageRef);
        assert_eq!(chunks[1].content, "s.jpg");
        assert_eq!(chunks[1].meta_str("alt"), Some("shot"));
        assert_eq!(chunks[2].content, "after");
    }

    #[test]
    fn test_code_chunk_carries_language() {
        let parser = MarkdownNodeParser::new();
        let segments = parser.parse("```python\nprint('hi')\n```");
        let chunks = splitter(1800, 2000).split(&segments, 0);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].chunk_type, ChunkType::Code);
        assert_eq!(chunks[0].language.as_deref(), Some("python"));
    }

    #[test]
    fn test_headers_attached_to_chunks() {
        let parser = MarkdownNodeParser::new();
        let segments = parser.parse("# A\n\n## B\n\nsection body");
        let chunks = splitter(1800, 2000).split(&segments, 0);
        assert_eq!(chunks[0].headers(), vec!["A".to_string(), "B".to_string()]);
    }

    #[test]
    fn test_header_change_flushes_buffer() {
        let parser = MarkdownNodeParser::new();
        let segments = parser.parse("# One\n\nfirst part\n\n# Two\n\nsecond part");
        let chunks = splitter(1800, 2000).split(&segments, 0);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].headers(), vec!["One".to_string()]);
        assert_eq!(chunks[1].headers(), vec!["Two".to_string()]);
    }

    #[test]
    fn test_base_index_offset() {
        let parser = MarkdownNodeParser::new();
        let segments = parser.parse("some text");
        let chunks = splitter(1800, 2000).split(&segments, 7);
        assert_eq!(chunks[0].chunk_index, 7);
    }

    #[test]
    fn test_split_plain_text_chunks() {
        let s = splitter(1800, 2000);
        let chunks = s.split_plain_text(&"word ".repeat(1000), 500, 3);
        assert!(chunks.len() > 1);
        assert_eq!(chunks[0].chunk_index, 3);
        assert_eq!(chunks[1].chunk_index, 4);
    }
}
