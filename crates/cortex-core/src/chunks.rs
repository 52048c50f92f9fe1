//! Splits note text into chunks for embedding and search.
//! Prefers paragraph boundaries; falls back to line breaks, then spaces, then character splits.
//!
//! Chunks cover the whole text: dropping each chunk's `overlap` prefix and joining
//! the rest gives back the note text byte for byte.

use std::collections::BTreeSet;
use std::path::PathBuf;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::config::ChunkingConfig;
use crate::notes::{NoteDocument, NoteKind};

/// Default maximum characters per chunk. Keeps chunks small enough for embedding models.
pub const DEFAULT_MAX_CHARS: usize = 512;
/// Default characters carried over from the previous chunk.
pub const DEFAULT_OVERLAP_CHARS: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkKind {
    /// A slice of the note's own text.
    Original,
    /// LLM-written summary of the whole note.
    Summary,
}

impl ChunkKind {
    fn as_str(self) -> &'static str {
        match self {
            ChunkKind::Original => "original",
            ChunkKind::Summary => "summary",
        }
    }
}

/// Note-level metadata copied onto every chunk so results need no second lookup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    pub title: String,
    pub source_path: PathBuf,
    pub note_kind: NoteKind,
    pub journal_date: Option<NaiveDate>,
    pub tags: BTreeSet<String>,
    pub links: BTreeSet<String>,
}

impl From<&NoteDocument> for ChunkMetadata {
    fn from(doc: &NoteDocument) -> Self {
        Self {
            title: doc.title.clone(),
            source_path: doc.source_path.clone(),
            note_kind: doc.kind,
            journal_date: doc.journal_date,
            tags: doc.tags.clone(),
            links: doc.links.clone(),
        }
    }
}

/// A chunk of text from a note, with source reference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub chunk_id: String,
    /// Id of the [`NoteDocument`] this chunk came from.
    pub parent_id: String,
    pub text: String,
    /// Index of this chunk within the note and kind (0, 1, 2, …).
    pub position: usize,
    /// Leading bytes of `text` repeated from the previous chunk.
    pub overlap: usize,
    pub kind: ChunkKind,
    pub metadata: ChunkMetadata,
}

impl Chunk {
    pub fn is_summary(&self) -> bool {
        self.kind == ChunkKind::Summary
    }

    /// The text this chunk contributes beyond its overlap.
    pub fn body(&self) -> &str {
        &self.text[self.overlap..]
    }
}

/// Deterministic chunk id: same parent, kind and position always give the same id.
pub fn chunk_id(parent_id: &str, kind: ChunkKind, position: usize) -> String {
    let key = format!("{}:{}:{}", parent_id, kind.as_str(), position);
    hex::encode(Sha256::digest(key.as_bytes()))
}

/// Chunk a single note's text into smaller pieces.
pub fn chunk_document(doc: &NoteDocument, config: &ChunkingConfig) -> Vec<Chunk> {
    let metadata = ChunkMetadata::from(doc);
    split_spans(&doc.raw_text, config.max_chars, config.overlap_chars)
        .into_iter()
        .enumerate()
        .map(|(position, span)| Chunk {
            chunk_id: chunk_id(&doc.id, ChunkKind::Original, position),
            parent_id: doc.id.clone(),
            text: doc.raw_text[span.text_start..span.end].to_string(),
            position,
            overlap: span.body_start - span.text_start,
            kind: ChunkKind::Original,
            metadata: metadata.clone(),
        })
        .collect()
}

/// Chunk all notes. Returns chunks from all notes in order.
pub fn chunk_notes(notes: &[NoteDocument], config: &ChunkingConfig) -> Vec<Chunk> {
    notes.iter().flat_map(|n| chunk_document(n, config)).collect()
}

/// Build the summary chunk for a note from LLM output.
pub fn summary_chunk(doc: &NoteDocument, text: String) -> Chunk {
    Chunk {
        chunk_id: chunk_id(&doc.id, ChunkKind::Summary, 0),
        parent_id: doc.id.clone(),
        text,
        position: 0,
        overlap: 0,
        kind: ChunkKind::Summary,
        metadata: ChunkMetadata::from(doc),
    }
}

/// Byte ranges of one chunk: `text_start..end` is the chunk text,
/// `body_start..end` the part not shared with the previous chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Span {
    text_start: usize,
    body_start: usize,
    end: usize,
}

/// Splits text into spans of at most `max_chars` bytes (overlap included),
/// preferring paragraph, line, then word boundaries.
fn split_spans(text: &str, max_chars: usize, overlap_chars: usize) -> Vec<Span> {
    if text.is_empty() {
        return Vec::new();
    }
    let max_chars = max_chars.max(1);
    let overlap_chars = overlap_chars.min(max_chars - 1);

    let mut spans: Vec<Span> = Vec::new();
    let mut start = 0;
    while start < text.len() {
        let lead = if spans.is_empty() { 0 } else { overlap_chars };
        let budget = max_chars - lead;
        let text_start = ceil_boundary(text, start.saturating_sub(lead));
        let end = if text.len() - start <= budget {
            text.len()
        } else {
            find_cut(text, start, budget)
        };
        spans.push(Span {
            text_start,
            body_start: start,
            end,
        });
        start = end;
    }
    spans
}

/// Prefer a cut after the last "\n\n" in the window; else after the last "\n";
/// else after the last space; else a hard cut.
fn find_cut(text: &str, start: usize, budget: usize) -> usize {
    let limit = floor_boundary(text, start + budget);
    let window = &text[start..limit];
    let boundary = window
        .rfind("\n\n")
        .filter(|&p| p > 0)
        .map(|p| p + 2)
        .or_else(|| window.rfind('\n').filter(|&p| p > 0).map(|p| p + 1))
        .or_else(|| window.rfind(' ').filter(|&p| p > 0).map(|p| p + 1));
    match boundary {
        Some(offset) => start + offset,
        None if limit > start => limit,
        // A single character wider than the budget.
        None => start + text[start..].chars().next().map_or(1, char::len_utf8),
    }
}

fn floor_boundary(text: &str, index: usize) -> usize {
    let mut i = index.min(text.len());
    while !text.is_char_boundary(i) {
        i -= 1;
    }
    i
}

fn ceil_boundary(text: &str, index: usize) -> usize {
    let mut i = index.min(text.len());
    while !text.is_char_boundary(i) {
        i += 1;
    }
    i
}
