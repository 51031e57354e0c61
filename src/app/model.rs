use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// Per-chunk bookkeeping. An index is in at most one of the two sets.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessingState {
    processed: BTreeSet<usize>,
    processing: BTreeSet<usize>,
}

impl ProcessingState {
    pub fn with_processed(processed: impl IntoIterator<Item = usize>) -> Self {
        Self {
            processed: processed.into_iter().collect(),
            processing: BTreeSet::new(),
        }
    }

    /// Marks `index` in flight. Returns `false` if it is already done or claimed.
    pub fn claim(&mut self, index: usize) -> bool {
        if self.is_settled_or_claimed(index) {
            return false;
        }
        self.processing.insert(index)
    }

    pub fn complete(&mut self, index: usize) {
        self.processing.remove(&index);
        self.processed.insert(index);
    }

    pub fn is_settled_or_claimed(&self, index: usize) -> bool {
        self.processed.contains(&index) || self.processing.contains(&index)
    }

    pub fn is_processing(&self, index: usize) -> bool {
        self.processing.contains(&index)
    }

    pub fn has_in_flight(&self) -> bool {
        !self.processing.is_empty()
    }

    pub fn processed(&self) -> Vec<usize> {
        self.processed.iter().copied().collect()
    }

    pub fn processing(&self) -> Vec<usize> {
        self.processing.iter().copied().collect()
    }

    pub fn pending(&self, total: usize) -> Vec<usize> {
        (0..total)
            .filter(|idx| !self.is_settled_or_claimed(*idx))
            .collect()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FallbackReason {
    TooSmall,
    EmptyResponse,
    RemoteError,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ChunkOutcome {
    Succeeded,
    Fallback { reason: FallbackReason },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineEvent {
    BookLoaded { book_id: String, chunks: usize },
    ChunkClaimed { index: usize },
    ChunkCompleted { index: usize, outcome: ChunkOutcome },
    Advisory { message: String },
    BookCleared,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PipelineStatus {
    pub book_id: String,
    pub title: String,
    pub chunks: usize,
    pub processed: Vec<usize>,
    pub processing: Vec<usize>,
    pub pending: Vec<usize>,
    pub loading: bool,
    pub advisory: Option<String>,
}
