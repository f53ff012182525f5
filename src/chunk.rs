//! Paragraph-boundary span splitter.
//!
//! Splits loaded corpus text into [`Span`]s no larger than `max_tokens`
//! (estimated at [`CHARS_PER_TOKEN`] characters per token). Splitting
//! happens on blank lines first, then on single newlines, then on spaces.
//!
//! A span's record id is derived from the source path and span index so a
//! rebuild produces the same ids.

use sha2::{Digest, Sha256};
use std::path::Path;

/// Approximate chars-per-token ratio shared by every token estimate.
pub const CHARS_PER_TOKEN: usize = 4;

/// A contiguous piece of a source file selected for embedding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Span {
    pub index: usize,
    pub text: String,
}

/// Split text into spans, respecting `max_tokens`.
/// Returns spans with contiguous indices starting at 0; empty input yields
/// no spans.
pub fn split_spans(text: &str, max_tokens: usize) -> Vec<Span> {
    let max_chars = max_tokens.max(1) * CHARS_PER_TOKEN;
    let mut pieces: Vec<String> = Vec::new();
    let mut current = String::new();

    for para in text.split("\n\n") {
        let trimmed = para.trim();
        if trimmed.is_empty() {
            continue;
        }

        let would_be = if current.is_empty() {
            char_len(trimmed)
        } else {
            char_len(&current) + 2 + char_len(trimmed)
        };

        if would_be > max_chars && !current.is_empty() {
            pieces.push(std::mem::take(&mut current));
        }

        if char_len(trimmed) > max_chars {
            hard_split(trimmed, max_chars, &mut pieces);
        } else {
            if !current.is_empty() {
                current.push_str("\n\n");
            }
            current.push_str(trimmed);
        }
    }

    if !current.is_empty() {
        pieces.push(current);
    }

    pieces
        .into_iter()
        .filter(|p| !p.is_empty())
        .enumerate()
        .map(|(index, text)| Span { index, text })
        .collect()
}

/// Cut an oversized paragraph at newline or space boundaries.
fn hard_split(mut remaining: &str, max_chars: usize, out: &mut Vec<String>) {
    while !remaining.is_empty() {
        let limit = byte_offset(remaining, max_chars);
        let cut = if limit < remaining.len() {
            remaining[..limit]
                .rfind('\n')
                .or_else(|| remaining[..limit].rfind(' '))
                .filter(|&pos| pos > 0)
                .map(|pos| pos + 1)
                .unwrap_or(limit)
        } else {
            limit
        };
        let piece = remaining[..cut].trim();
        if !piece.is_empty() {
            out.push(piece.to_string());
        }
        remaining = &remaining[cut..];
    }
}

/// Largest byte offset covering at most `max_chars` characters.
fn byte_offset(s: &str, max_chars: usize) -> usize {
    s.char_indices()
        .nth(max_chars)
        .map(|(i, _)| i)
        .unwrap_or(s.len())
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

/// Cut `text` to at most `max_tokens` worth of characters on a char boundary.
pub fn truncate_tokens(text: &str, max_tokens: usize) -> &str {
    &text[..byte_offset(text, max_tokens * CHARS_PER_TOKEN)]
}

/// Estimated token count, rounded up.
pub fn estimate_tokens(text: &str) -> usize {
    char_len(text).div_ceil(CHARS_PER_TOKEN)
}

/// Stable record id for span `index` of `source`.
pub fn record_id(source: &Path, index: usize) -> String {
    sha256_hex(&format!("{}#{}", source.display(), index))
}

fn sha256_hex(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn small_text_single_span() {
        let spans = split_spans("Hello, world!", 700);
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].index, 0);
        assert_eq!(spans[0].text, "Hello, world!");
    }

    #[test]
    fn empty_text_has_no_spans() {
        assert!(split_spans("", 700).is_empty());
        assert!(split_spans("\n\n  \n\n", 700).is_empty());
    }

    #[test]
    fn paragraphs_under_limit_are_merged() {
        let text = "First paragraph.\n\nSecond paragraph.\n\nThird paragraph.";
        let spans = split_spans(text, 700);
        assert_eq!(spans.len(), 1);
        assert!(spans[0].text.contains("First paragraph."));
        assert!(spans[0].text.contains("Third paragraph."));
    }

    #[test]
    fn indices_contiguous_when_split() {
        let text = (0..50)
            .map(|i| format!("Paragraph number {}.", i))
            .collect::<Vec<_>>()
            .join("\n\n");
        let spans = split_spans(&text, 10);
        assert!(spans.len() > 1);
        for (i, s) in spans.iter().enumerate() {
            assert_eq!(s.index, i, "Index mismatch at position {}", i);
            assert!(s.text.chars().count() <= 40);
        }
    }

    #[test]
    fn long_paragraph_is_hard_split_on_multibyte_text() {
        let text = "écoute ".repeat(40);
        let spans = split_spans(&text, 5);
        assert!(spans.len() > 1);
        for s in &spans {
            assert!(s.text.chars().count() <= 20);
        }
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        assert_eq!(truncate_tokens("ééééé", 1), "éééé");
        assert_eq!(truncate_tokens("abc", 10), "abc");
    }

    #[test]
    fn token_estimate_rounds_up() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("abcd"), 1);
        assert_eq!(estimate_tokens("abcde"), 2);
    }

    #[test]
    fn record_ids_are_stable() {
        let path = PathBuf::from("/data/news/2024/1/2/3/abc.xml");
        assert_eq!(record_id(&path, 0), record_id(&path, 0));
        assert_ne!(record_id(&path, 0), record_id(&path, 1));
    }
}
