//! Splits a document into the ordered, bounded chunks that are sent to the summarizer.
//!
//! All lengths are counted in `char`s.

use std::sync::LazyLock;

use regex::Regex;

pub const TARGET_CHUNK_CHARS: usize = 5_000;
pub const MIN_CHUNK_CHARS: usize = 2_000;
pub const MIN_SERVICE_CHARS: usize = 100;
pub const MAX_SERVICE_CHARS: usize = 15_000;
pub const MAX_CHUNKS: usize = 15;

const OVERSIZE_FACTOR: usize = 3;
const SECTION_SEPARATOR: &str = "\n\n";
const MAX_PLAIN_CODE_POINT: u32 = 0xFFFF;
const BINARY_PROBE_CHARS: usize = 4_096;

static PARAGRAPH_BREAK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n[ \t]*\n[ \t]*\n").expect("valid paragraph regex"));

static HEADING: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?mi)^[ \t]*(?:(?:chapter|part|section)[ \t]+(?:\d+|[ivxlc]+)\b|#{1,2}[ \t])")
        .expect("valid heading regex")
});

/// Cheap check for text that is really a binary document (PDF bytes, NUL-heavy data).
pub fn looks_binary(text: &str) -> bool {
    if text.trim_start().starts_with("%PDF-") {
        return true;
    }
    if text.contains("endobj") && text.contains("endstream") {
        return true;
    }

    let mut probed = 0usize;
    let mut nul = 0usize;
    for ch in text.chars().take(BINARY_PROBE_CHARS) {
        probed += 1;
        if ch == '\0' {
            nul += 1;
        }
    }
    probed > 0 && nul * 10 > probed
}

/// Folds `\r\n` and lone `\r` into `\n`, then replaces other control characters (except
/// tab) and out-of-range code points with spaces.
pub fn normalize(text: &str) -> String {
    text.replace("\r\n", "\n")
        .chars()
        .map(|ch| {
            if ch == '\r' {
                return '\n';
            }
            let disallowed = (ch.is_control() && !matches!(ch, '\t' | '\n'))
                || ch as u32 > MAX_PLAIN_CODE_POINT
                || ch == char::REPLACEMENT_CHARACTER;
            if disallowed { ' ' } else { ch }
        })
        .collect()
}

/// Splits `text` into at most [`MAX_CHUNKS`] chunks. Never fails and never returns an
/// empty list.
pub fn split(text: &str) -> Vec<String> {
    let cleaned = normalize(text);
    let cleaned = cleaned.trim();

    if char_len(cleaned) < MIN_SERVICE_CHARS {
        return vec![cleaned.to_owned()];
    }

    let sections = candidate_sections(cleaned);
    let greedy = accumulate(&sections);

    let mut chunks = match greedy.as_slice() {
        [only] if char_len(only) > OVERSIZE_FACTOR * TARGET_CHUNK_CHARS => {
            tracing::debug!(
                chars = char_len(only),
                "no paragraph boundaries found; slicing at fixed size"
            );
            slice_chars(only, TARGET_CHUNK_CHARS)
        }
        _ => greedy
            .into_iter()
            .flat_map(|chunk| {
                if char_len(&chunk) > MAX_SERVICE_CHARS {
                    slice_chars(&chunk, TARGET_CHUNK_CHARS)
                } else {
                    vec![chunk]
                }
            })
            .collect(),
    };
    enforce_chunk_cap(&mut chunks);
    chunks.retain(|chunk| char_len(chunk.trim()) >= MIN_SERVICE_CHARS);

    if chunks.is_empty() {
        return vec![cleaned.to_owned()];
    }
    chunks
}

/// Drops chunks past [`MAX_CHUNKS`] and returns how many were dropped.
fn enforce_chunk_cap(chunks: &mut Vec<String>) -> usize {
    let dropped = chunks.len().saturating_sub(MAX_CHUNKS);
    if dropped > 0 {
        tracing::warn!(
            max_chunks = MAX_CHUNKS,
            dropped,
            "document exceeds chunk cap; dropping remaining text"
        );
        chunks.truncate(MAX_CHUNKS);
    }
    dropped
}

fn candidate_sections(text: &str) -> Vec<&str> {
    let mut sections = Vec::new();
    for block in PARAGRAPH_BREAK.split(text) {
        let mut start = 0usize;
        for heading in HEADING.find_iter(block) {
            if heading.start() > start {
                sections.push(&block[start..heading.start()]);
            }
            start = heading.start();
        }
        sections.push(&block[start..]);
    }

    sections
        .into_iter()
        .map(str::trim)
        .filter(|section| !section.is_empty())
        .collect()
}

fn accumulate(sections: &[&str]) -> Vec<String> {
    let separator_len = char_len(SECTION_SEPARATOR);
    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut current_len = 0usize;

    for section in sections {
        let len = char_len(section);
        if current_len > 0
            && current_len + separator_len + len > TARGET_CHUNK_CHARS
            && current_len >= MIN_CHUNK_CHARS
        {
            chunks.push(std::mem::take(&mut current));
            current_len = 0;
            if chunks.len() == MAX_CHUNKS {
                tracing::warn!(
                    max_chunks = MAX_CHUNKS,
                    "document exceeds chunk cap; dropping remaining text"
                );
                break;
            }
        }
        if current_len > 0 {
            current.push_str(SECTION_SEPARATOR);
            current_len += separator_len;
        }
        current.push_str(section);
        current_len += len;
    }

    if current_len > 0 && chunks.len() < MAX_CHUNKS {
        chunks.push(current);
    }
    chunks
}

fn slice_chars(text: &str, size: usize) -> Vec<String> {
    let mut slices = Vec::new();
    let mut current = String::new();
    let mut count = 0usize;
    for ch in text.chars() {
        current.push(ch);
        count += 1;
        if count == size {
            slices.push(std::mem::take(&mut current));
            count = 0;
        }
    }
    if !current.is_empty() {
        slices.push(current);
    }
    slices
}

pub fn char_len(text: &str) -> usize {
    text.chars().count()
}

/// First `max` chars of `text`, without splitting a code point.
pub fn take_chars(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((byte_idx, _)) => &text[..byte_idx],
        None => text,
    }
}

/// Last `max` chars of `text`, without splitting a code point.
pub fn tail_chars(text: &str, max: usize) -> &str {
    let len = char_len(text);
    if len <= max {
        return text;
    }
    match text.char_indices().nth(len - max) {
        Some((byte_idx, _)) => &text[byte_idx..],
        None => text,
    }
}
