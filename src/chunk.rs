//! Paragraph-boundary passage splitter.
//!
//! Splits an extracted document's text into [`Passage`]s of at most
//! `max_tokens` (approximated as 4 characters per token). Splitting
//! happens on blank lines (`\n\n`) so a passage keeps whole paragraphs;
//! a single paragraph longer than the limit is cut at the last newline
//! or space before the limit.
//!
//! Each passage carries its source key, a contiguous index starting at 0,
//! and the SHA-256 of its text.

use sha2::{Digest, Sha256};

use crate::models::{ExtractedDocument, Passage};

const CHARS_PER_TOKEN: usize = 4;

/// Split one document into passages.
pub fn chunk_document(doc: &ExtractedDocument, max_tokens: usize) -> Vec<Passage> {
    chunk_text(&doc.source_key, &doc.text, max_tokens)
}

/// Split `text` into passages. Whitespace-only text yields none.
pub fn chunk_text(source_key: &str, text: &str, max_tokens: usize) -> Vec<Passage> {
    let max_chars = (max_tokens * CHARS_PER_TOKEN).max(1);
    let mut pieces: Vec<String> = Vec::new();
    let mut buf = String::new();

    for para in text.split("\n\n") {
        let para = para.trim();
        if para.is_empty() {
            continue;
        }

        let would_be = if buf.is_empty() {
            para.len()
        } else {
            buf.len() + 2 + para.len()
        };
        if would_be > max_chars && !buf.is_empty() {
            pieces.push(std::mem::take(&mut buf));
        }

        if para.len() > max_chars {
            hard_split(para, max_chars, &mut pieces);
        } else {
            if !buf.is_empty() {
                buf.push_str("\n\n");
            }
            buf.push_str(para);
        }
    }
    if !buf.is_empty() {
        pieces.push(buf);
    }

    pieces
        .into_iter()
        .enumerate()
        .map(|(i, text)| make_passage(source_key, i as i64, text))
        .collect()
}

fn hard_split(para: &str, max_chars: usize, out: &mut Vec<String>) {
    let mut remaining = para;
    while !remaining.is_empty() {
        let mut limit = remaining.len().min(max_chars);
        while !remaining.is_char_boundary(limit) {
            limit -= 1;
        }
        if limit == 0 {
            // A single multi-byte char wider than the limit.
            limit = remaining
                .char_indices()
                .nth(1)
                .map(|(i, _)| i)
                .unwrap_or(remaining.len());
        }
        let split_at = if limit < remaining.len() {
            remaining[..limit]
                .rfind('\n')
                .or_else(|| remaining[..limit].rfind(' '))
                .map(|pos| pos + 1)
                .unwrap_or(limit)
        } else {
            limit
        };
        let piece = remaining[..split_at].trim();
        if !piece.is_empty() {
            out.push(piece.to_string());
        }
        remaining = &remaining[split_at..];
    }
}

fn make_passage(source_key: &str, index: i64, text: String) -> Passage {
    let hash = format!("{:x}", Sha256::digest(text.as_bytes()));
    Passage {
        source_key: source_key.to_string(),
        chunk_index: index,
        text,
        hash,
    }
}
