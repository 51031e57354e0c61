//! Maps summarizer responses into chapters, and builds raw-text fallbacks.

use crate::backend::{ResponseBlock, SummaryResponse};
use crate::chunker::{char_len, take_chars};
use crate::formats::{Chapter, ImageRef, LearningBlock, default_chapter_title, estimate_read_time_secs};

pub const FALLBACK_PREVIEW_CHARS: usize = 800;
pub const FALLBACK_TAG: &str = "PREVIEW";
const HEADLINE_SENTENCE_MAX_CHARS: usize = 100;
const HEADLINE_PREFIX_CHARS: usize = 80;
const ELLIPSIS: &str = "...";

const TAGS: &[(&str, &str)] = &[
    ("scene", "THE SCENE"),
    ("reveal", "PLOT TWIST"),
    ("emotion", "INNER WORLD"),
    ("tension", "RISING TENSION"),
    ("insight", "KEY INSIGHT"),
    ("quote", "MEMORABLE QUOTE"),
    ("visual", "PICTURE THIS"),
    ("lyric_scroll", "IN FLOW"),
    ("core_idea", "CORE IDEA"),
    ("explanation", "EXPLAINED"),
    ("example", "EXAMPLE"),
    ("takeaway", "TAKEAWAY"),
    ("nuance", "NUANCE"),
    ("contrast", "CONTRAST"),
    ("reflection", "REFLECT"),
];

pub fn category_tag(kind: &str) -> String {
    let kind = kind.trim();
    TAGS.iter()
        .find(|(known, _)| known.eq_ignore_ascii_case(kind))
        .map(|(_, tag)| (*tag).to_owned())
        .unwrap_or_else(|| kind.replace('_', " ").to_uppercase())
}

/// Uses `explicit` if present, else the first short sentence of `body`, else a prefix.
pub fn derive_headline(explicit: Option<&str>, body: &str) -> String {
    if let Some(headline) = explicit.map(str::trim).filter(|h| !h.is_empty()) {
        return headline.to_owned();
    }

    let body = body.trim();
    if let Some(end) = body.find(['.', '!', '?']) {
        let sentence = body[..=end].trim();
        if !sentence.is_empty() && char_len(sentence) < HEADLINE_SENTENCE_MAX_CHARS {
            return sentence.to_owned();
        }
    }

    truncate_with_ellipsis(body, HEADLINE_PREFIX_CHARS)
}

pub fn truncate_with_ellipsis(text: &str, max: usize) -> String {
    let prefix = take_chars(text, max);
    if prefix.len() == text.len() {
        return text.to_owned();
    }
    format!("{}{ELLIPSIS}", prefix.trim_end())
}

fn block_body(block: &ResponseBlock) -> String {
    let non_empty = |v: &Option<String>| {
        v.as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_owned)
    };
    non_empty(&block.body)
        .or_else(|| non_empty(&block.text))
        .unwrap_or_else(|| block.lyric_lines.join("\n"))
}

fn map_block(book_id: &str, index: usize, position: usize, block: &ResponseBlock) -> LearningBlock {
    let body = block_body(block);
    let kind = block.kind.trim().to_ascii_lowercase();
    let image = block
        .image_prompt
        .as_deref()
        .map(str::trim)
        .filter(|prompt| block.image_hint && !prompt.is_empty())
        .map(|prompt| ImageRef::Pending {
            prompt: prompt.to_owned(),
        });

    LearningBlock {
        id: format!("{book_id}_ch{}_b{position}", index + 1),
        tag: Some(category_tag(&kind)),
        headline: derive_headline(block.headline.as_deref(), &body),
        quote: (kind == "quote" && !body.is_empty()).then(|| body.clone()),
        key_takeaway: (kind == "takeaway" && !body.is_empty()).then(|| body.clone()),
        image,
        read_time_secs: estimate_read_time_secs(&body),
        body,
    }
}

/// Returns `None` when the response carries no blocks.
pub fn chapter_from_response(
    book_id: &str,
    index: usize,
    response: &SummaryResponse,
) -> Option<Chapter> {
    if response.blocks.is_empty() {
        return None;
    }

    let title = match response.unit_title.trim() {
        "" => default_chapter_title(index),
        title => title.to_owned(),
    };
    let blocks = response
        .blocks
        .iter()
        .enumerate()
        .map(|(position, block)| map_block(book_id, index, position, block))
        .collect();

    Some(Chapter {
        id: format!("{book_id}_ch{}", index + 1),
        title,
        number: index + 1,
        blocks,
    })
}

/// A single-block chapter previewing the raw chunk text.
pub fn fallback_chapter(book_id: &str, index: usize, raw: &str) -> Chapter {
    let body = truncate_with_ellipsis(raw.trim(), FALLBACK_PREVIEW_CHARS);
    let title = default_chapter_title(index);
    let block = LearningBlock {
        id: format!("{book_id}_ch{}_fallback", index + 1),
        tag: Some(FALLBACK_TAG.to_owned()),
        headline: derive_headline(None, &body),
        quote: None,
        key_takeaway: None,
        image: None,
        read_time_secs: estimate_read_time_secs(&body),
        body,
    };

    Chapter {
        id: format!("{book_id}_ch{}", index + 1),
        title,
        number: index + 1,
        blocks: vec![block],
    }
}
