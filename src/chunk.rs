//! Paragraph-boundary text chunker for the retrieval index.
//!
//! Splits document text into [`Chunk`]s of at most `max_tokens`
//! (approximated as 4 chars per token). Paragraphs (`\n\n`) are packed
//! greedily; a paragraph longer than the limit is hard-split at the last
//! newline or space before the limit.
//!
//! Each chunk carries a SHA-256 hash of its text so identical chunks are
//! embedded only once per index build.

use sha2::{Digest, Sha256};

/// Approximate characters-per-token ratio.
const CHARS_PER_TOKEN: usize = 4;

/// A retrievable slice of one document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// Position of the parent document within the index.
    pub document: usize,
    /// Position of the chunk within its document, contiguous from 0.
    pub index: usize,
    pub text: String,
    pub hash: String,
}

/// Split `text` into chunks on paragraph boundaries.
///
/// Empty or whitespace-only text yields no chunks.
pub fn chunk_text(document: usize, text: &str, max_tokens: usize) -> Vec<Chunk> {
    let max_chars = max_tokens.max(1) * CHARS_PER_TOKEN;
    let mut pieces: Vec<String> = Vec::new();
    let mut buf = String::new();

    for para in text.split("\n\n").map(str::trim).filter(|p| !p.is_empty()) {
        let would_be = if buf.is_empty() {
            para.len()
        } else {
            buf.len() + 2 + para.len()
        };
        if would_be > max_chars && !buf.is_empty() {
            pieces.push(std::mem::take(&mut buf));
        }

        if para.len() > max_chars {
            pieces.extend(hard_split(para, max_chars));
            continue;
        }

        if !buf.is_empty() {
            buf.push_str("\n\n");
        }
        buf.push_str(para);
    }
    if !buf.is_empty() {
        pieces.push(buf);
    }

    pieces
        .into_iter()
        .enumerate()
        .map(|(index, text)| make_chunk(document, index, text))
        .collect()
}

/// Split an oversized paragraph at whitespace near `max_chars`.
fn hard_split(mut remaining: &str, max_chars: usize) -> Vec<String> {
    let mut out = Vec::new();
    while !remaining.is_empty() {
        let limit = snap_to_char_boundary(remaining, max_chars);
        let split_at = if limit >= remaining.len() {
            remaining.len()
        } else {
            remaining[..limit]
                .rfind(|c: char| c == '\n' || c == ' ')
                .map(|pos| pos + 1)
                .unwrap_or(limit)
        };
        // Always make progress, even when max_chars falls inside the first char.
        let split_at = if split_at == 0 {
            remaining
                .char_indices()
                .nth(1)
                .map(|(i, _)| i)
                .unwrap_or(remaining.len())
        } else {
            split_at
        };
        let piece = remaining[..split_at].trim();
        if !piece.is_empty() {
            out.push(piece.to_string());
        }
        remaining = &remaining[split_at..];
    }
    out
}

/// Snap a byte index back to the nearest valid UTF-8 char boundary.
fn snap_to_char_boundary(s: &str, index: usize) -> usize {
    if index >= s.len() {
        return s.len();
    }
    let mut i = index;
    while i > 0 && !s.is_char_boundary(i) {
        i -= 1;
    }
    i
}

fn make_chunk(document: usize, index: usize, text: String) -> Chunk {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    let hash = format!("{:x}", hasher.finalize());
    Chunk {
        document,
        index,
        text,
        hash,
    }
}
