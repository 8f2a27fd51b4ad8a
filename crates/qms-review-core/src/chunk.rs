//! Section-aware, overlap-linked text chunker.
//!
//! Splits procedure text into [`Chunk`]s no longer than `chunk_size`
//! characters, with consecutive chunks of a section sharing up to `overlap`
//! characters. When `preserve_sections` is on, structural markers (Markdown
//! headings, numbered outline entries, legal clauses) delimit sections and
//! each chunk carries the header of the section it was cut from.
//!
//! All sizes and offsets count Unicode scalar values, not bytes.
//!
//! # Algorithm
//!
//! 1. Split the text into sections at structural markers. Text before the
//!    first marker becomes an untagged leading section; without markers the
//!    whole text is one untagged section.
//! 2. Within a section, take a window of up to `chunk_size` characters. If
//!    the window stops short of the section end, look back at most
//!    [`BREAK_LOOKBACK`] characters for a paragraph break, then a sentence
//!    boundary, then a line break; otherwise cut hard at the window edge.
//! 3. Start the next window at `end - overlap`. Stop once a window reaches
//!    the section end.
//! 4. Number chunks document-wide and record absolute window offsets.
//!    Whitespace-only windows are dropped.
//!
//! # Example
//!
//! ```rust
//! use qms_review_core::chunk::{chunk_document, ChunkOptions};
//!
//! let chunks = chunk_document("Hello world.", "sop-001.md", &ChunkOptions::default()).unwrap();
//! assert_eq!(chunks.len(), 1);
//! assert_eq!(chunks[0].start_offset, 0);
//! assert_eq!(chunks[0].end_offset, 12);
//! ```

use std::sync::OnceLock;

use regex::Regex;
use uuid::Uuid;

use crate::error::ConfigError;
use crate::models::Chunk;

/// How far back from a window edge the chunker searches for a natural break.
pub const BREAK_LOOKBACK: usize = 100;

/// Structural markers, one per line:
/// Markdown headings, numbered outline entries (`1.`, `4.2.1`),
/// `Article`/`Section`/`Clause`/`§` clauses, and `제N조` / `제N항` clauses.
const SECTION_MARKERS: &str = concat!(
    r"(?m)^(?:",
    r"#{1,6}[ \t]+\S.*",
    r"|\d+\.[\d.]*[ \t]+\S.*",
    r"|(?:Article|ARTICLE|Section|SECTION|Clause|CLAUSE)[ \t]+\d+[\w.]*.*",
    r"|§[ \t]*\d+.*",
    r"|제[ \t]*\d+[ \t]*[조항].*",
    r")$"
);

fn section_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(SECTION_MARKERS).expect("section marker pattern compiles"))
}

/// Chunking parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkOptions {
    /// Maximum characters per chunk.
    pub chunk_size: usize,
    /// Characters shared by consecutive chunks of a section.
    pub overlap: usize,
    /// Split at structural markers and tag chunks with their section header.
    pub preserve_sections: bool,
}

impl Default for ChunkOptions {
    fn default() -> Self {
        Self {
            chunk_size: 1000,
            overlap: 200,
            preserve_sections: true,
        }
    }
}

impl ChunkOptions {
    /// Reject options that cannot make progress.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.chunk_size == 0 {
            return Err(ConfigError::ZeroChunkSize);
        }
        if self.overlap >= self.chunk_size {
            return Err(ConfigError::OverlapTooLarge {
                chunk_size: self.chunk_size,
                overlap: self.overlap,
            });
        }
        Ok(())
    }
}

/// A contiguous character range of the source, optionally headed.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Section {
    start: usize,
    end: usize,
    header: Option<String>,
}

/// Character-indexed view over a `&str`.
struct CharText<'a> {
    text: &'a str,
    chars: Vec<char>,
    /// Byte offset of every char, plus `text.len()` as a sentinel.
    bounds: Vec<usize>,
}

impl<'a> CharText<'a> {
    fn new(text: &'a str) -> Self {
        let mut chars = Vec::with_capacity(text.len());
        let mut bounds = Vec::with_capacity(text.len() + 1);
        for (i, c) in text.char_indices() {
            chars.push(c);
            bounds.push(i);
        }
        bounds.push(text.len());
        Self {
            text,
            chars,
            bounds,
        }
    }

    fn len(&self) -> usize {
        self.chars.len()
    }

    fn slice(&self, start: usize, end: usize) -> &'a str {
        &self.text[self.bounds[start]..self.bounds[end]]
    }

    fn char_pos(&self, byte: usize) -> usize {
        self.bounds
            .binary_search(&byte)
            .unwrap_or_else(|insert_at| insert_at)
    }
}

/// Split `text` into ordered, size-bounded, overlap-linked chunks.
///
/// # Guarantees
///
/// - Text no longer than `chunk_size` yields at most one chunk per section.
///   It is a single chunk when `preserve_sections` is off or the text has no
///   section markers.
/// - The windows `[start_offset, end_offset)` of a section are contiguous:
///   each starts at or before the previous end, so together they cover the
///   section.
/// - Consecutive chunks share at most `overlap` characters.
/// - `chunk_index` is `0, 1, 2, …` across the whole document.
/// - No chunk has empty content.
///
/// # Errors
///
/// Returns [`ConfigError`] when `chunk_size` is zero or `overlap` is not
/// smaller than `chunk_size`.
pub fn chunk_document(
    text: &str,
    source_id: &str,
    options: &ChunkOptions,
) -> Result<Vec<Chunk>, ConfigError> {
    options.validate()?;

    let doc = CharText::new(text);
    let sections = if options.preserve_sections {
        split_sections(&doc)
    } else {
        vec![Section {
            start: 0,
            end: doc.len(),
            header: None,
        }]
    };

    let mut chunks = Vec::new();
    for section in &sections {
        for (start, end) in section_windows(&doc.chars, section.start, section.end, options) {
            let content = doc.slice(start, end).trim();
            if content.is_empty() {
                continue;
            }
            chunks.push(Chunk {
                id: Uuid::new_v4().to_string(),
                content: content.to_string(),
                source_id: source_id.to_string(),
                chunk_index: chunks.len(),
                start_offset: start,
                end_offset: end,
                section_header: section.header.clone(),
            });
        }
    }

    Ok(chunks)
}

fn split_sections(doc: &CharText<'_>) -> Vec<Section> {
    let markers: Vec<(usize, String)> = section_pattern()
        .find_iter(doc.text)
        .map(|m| (doc.char_pos(m.start()), m.as_str().trim().to_string()))
        .collect();

    if markers.is_empty() {
        return vec![Section {
            start: 0,
            end: doc.len(),
            header: None,
        }];
    }

    let mut sections = Vec::with_capacity(markers.len() + 1);
    if markers[0].0 > 0 {
        sections.push(Section {
            start: 0,
            end: markers[0].0,
            header: None,
        });
    }
    for (i, (start, header)) in markers.iter().enumerate() {
        let end = markers.get(i + 1).map(|(s, _)| *s).unwrap_or(doc.len());
        sections.push(Section {
            start: *start,
            end,
            header: Some(header.clone()),
        });
    }
    sections
}

/// Window bounds for one section, in absolute character positions.
fn section_windows(
    chars: &[char],
    lo: usize,
    hi: usize,
    options: &ChunkOptions,
) -> Vec<(usize, usize)> {
    let mut windows = Vec::new();
    let mut start = lo;

    while start < hi {
        let mut end = (start + options.chunk_size).min(hi);
        if end < hi {
            let brk = find_break_point(chars, start, end);
            if brk > start {
                end = brk;
            }
        }
        windows.push((start, end));

        if end >= hi {
            break;
        }
        let next = end - options.overlap.min(end);
        // A break point close to `start` can leave no room for the overlap.
        start = if next > start { next } else { end };
    }

    windows
}

/// Best cut position in `(start, end]`, searching back from `end`.
fn find_break_point(chars: &[char], start: usize, end: usize) -> usize {
    let from = end.saturating_sub(BREAK_LOOKBACK).max(start);
    let window = &chars[from..end];

    if let Some(i) = (0..window.len().saturating_sub(1))
        .rev()
        .find(|&i| window[i] == '\n' && window[i + 1] == '\n')
    {
        return from + i + 2;
    }

    if let Some(i) = (0..window.len())
        .rev()
        .find(|&i| is_sentence_boundary(window, i))
    {
        return from + i + 2;
    }

    if let Some(i) = window.iter().rposition(|&c| c == '\n') {
        return from + i + 1;
    }

    end
}

/// `[.!?]`, then whitespace, then an upper-case or Hangul letter.
fn is_sentence_boundary(window: &[char], i: usize) -> bool {
    if !matches!(window[i], '.' | '!' | '?') {
        return false;
    }
    let mut k = i + 1;
    if k >= window.len() || !window[k].is_whitespace() {
        return false;
    }
    while k < window.len() && window[k].is_whitespace() {
        k += 1;
    }
    k < window.len() && starts_sentence(window[k])
}

fn starts_sentence(c: char) -> bool {
    c.is_uppercase() || ('\u{AC00}'..='\u{D7A3}').contains(&c)
}
