use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const LOADING_BLOCK_ID: &str = "loading";

pub const MIN_READ_TIME_SECS: u32 = 30;
pub const MAX_READ_TIME_SECS: u32 = 300;
const WORDS_PER_MINUTE: f64 = 200.0;

/// A document being turned into chapters. `chapters` has one slot per raw chunk and is
/// only ever written slot-by-slot.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Book {
    pub id: String,
    pub title: String,
    pub author: String,
    pub chapters: Vec<Chapter>,
}

impl Book {
    pub fn with_placeholders(id: String, title: String, author: String, chunks: usize) -> Self {
        let chapters = (0..chunks).map(Chapter::placeholder).collect();
        Self {
            id,
            title,
            author,
            chapters,
        }
    }

    /// Replaces the chapter slot at `index`. Out-of-range indices are ignored.
    pub fn replace_chapter(&mut self, index: usize, chapter: Chapter) -> bool {
        match self.chapters.get_mut(index) {
            Some(slot) => {
                *slot = chapter;
                true
            }
            None => false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Chapter {
    pub id: String,
    pub title: String,
    pub number: usize,
    pub blocks: Vec<LearningBlock>,
}

impl Chapter {
    pub fn placeholder(index: usize) -> Self {
        let number = index + 1;
        Self {
            id: format!("chapter_{number}"),
            title: default_chapter_title(index),
            number,
            blocks: vec![LearningBlock {
                id: LOADING_BLOCK_ID.to_owned(),
                tag: None,
                headline: "Loading...".to_owned(),
                body: String::new(),
                quote: None,
                key_takeaway: None,
                image: None,
                read_time_secs: MIN_READ_TIME_SECS,
            }],
        }
    }

    pub fn is_loading(&self) -> bool {
        matches!(self.blocks.as_slice(), [block] if block.id == LOADING_BLOCK_ID)
    }
}

pub fn default_chapter_title(index: usize) -> String {
    format!("Chapter {}", index + 1)
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LearningBlock {
    pub id: String,
    pub tag: Option<String>,
    pub headline: String,
    pub body: String,
    pub quote: Option<String>,
    pub key_takeaway: Option<String>,
    pub image: Option<ImageRef>,
    pub read_time_secs: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ImageRef {
    Url { url: String },
    Pending { prompt: String },
}

/// `round(words / 200 * 60)` clamped to `[30, 300]` seconds.
pub fn estimate_read_time_secs(text: &str) -> u32 {
    let words = text.split_whitespace().count() as f64;
    let secs = (words / WORDS_PER_MINUTE * 60.0).round() as u32;
    secs.clamp(MIN_READ_TIME_SECS, MAX_READ_TIME_SECS)
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PendingSource {
    pub path: String,
    pub content: String,
    /// Title and author the ingest was started with, if the caller gave them.
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub author: Option<String>,
}

/// Everything needed to resume an interrupted session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Snapshot {
    pub book: Option<Book>,
    pub raw_chunks: Vec<String>,
    pub processed: Vec<usize>,
    pub book_id: Option<String>,
    pub book_title: Option<String>,
    pub pending_source: Option<PendingSource>,
    pub saved_at: Option<DateTime<Utc>>,
}

impl Snapshot {
    pub fn empty() -> Self {
        Self {
            book: None,
            raw_chunks: Vec::new(),
            processed: Vec::new(),
            book_id: None,
            book_title: None,
            pending_source: None,
            saved_at: None,
        }
    }
}
