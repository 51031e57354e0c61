#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use flashbook::app::pipeline::BookPipeline;
use flashbook::app::progress_store::ProgressStore;
use flashbook::backend::{
    ImageGenerator, ImageRequest, ResponseBlock, Summarizer, SummaryRequest, SummaryResponse,
};
use flashbook::config::PipelineConfig;
use tokio::sync::Notify;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reply {
    Blocks,
    Empty,
    Fail,
    Hang,
}

/// In-process summarizer whose behavior is scripted per chapter title.
pub struct ScriptedSummarizer {
    default_reply: Reply,
    overrides: Mutex<Vec<(String, Reply)>>,
    gated: Mutex<HashSet<String>>,
    gate: Notify,
    calls: Mutex<Vec<SummaryRequest>>,
}

impl ScriptedSummarizer {
    pub fn new(default_reply: Reply) -> Arc<Self> {
        Arc::new(Self {
            default_reply,
            overrides: Mutex::new(Vec::new()),
            gated: Mutex::new(HashSet::new()),
            gate: Notify::new(),
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn reply_for(&self, chapter_title: &str, reply: Reply) {
        self.overrides
            .lock()
            .unwrap()
            .push((chapter_title.to_owned(), reply));
    }

    /// Calls for `chapter_title` block until [`ScriptedSummarizer::release`].
    pub fn gate(&self, chapter_title: &str) {
        self.gated.lock().unwrap().insert(chapter_title.to_owned());
    }

    pub fn release(&self) {
        self.gate.notify_one();
    }

    pub fn calls(&self) -> Vec<SummaryRequest> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    fn reply(&self, chapter_title: &str) -> Reply {
        self.overrides
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|(title, _)| title == chapter_title)
            .map(|(_, reply)| *reply)
            .unwrap_or(self.default_reply)
    }
}

#[async_trait]
impl Summarizer for ScriptedSummarizer {
    async fn summarize(&self, request: &SummaryRequest) -> anyhow::Result<SummaryResponse> {
        self.calls.lock().unwrap().push(request.clone());

        let gated = self.gated.lock().unwrap().contains(&request.chapter_title);
        if gated {
            self.gate.notified().await;
        }

        match self.reply(&request.chapter_title) {
            Reply::Blocks => Ok(SummaryResponse {
                unit_title: format!("{} (summarized)", request.chapter_title),
                blocks: vec![
                    ResponseBlock {
                        kind: "scene".to_owned(),
                        headline: Some("Opening".to_owned()),
                        body: Some("The scene opens on a quiet harbor.".to_owned()),
                        image_hint: true,
                        image_prompt: Some("a quiet harbor at dawn".to_owned()),
                        ..ResponseBlock::default()
                    },
                    ResponseBlock {
                        kind: "takeaway".to_owned(),
                        body: Some("Patience pays off.".to_owned()),
                        ..ResponseBlock::default()
                    },
                ],
                visual_slots_used: 1,
                cached: false,
                notes: serde_json::Value::Null,
            }),
            Reply::Empty => Ok(SummaryResponse {
                unit_title: request.chapter_title.clone(),
                blocks: Vec::new(),
                visual_slots_used: 0,
                cached: false,
                notes: serde_json::Value::Null,
            }),
            Reply::Fail => anyhow::bail!("backend error (503 Service Unavailable): overloaded"),
            Reply::Hang => std::future::pending().await,
        }
    }
}

pub struct FixedImages {
    pub calls: Mutex<Vec<ImageRequest>>,
    pub fail: bool,
}

impl FixedImages {
    pub fn new(fail: bool) -> Arc<Self> {
        Arc::new(Self {
            calls: Mutex::new(Vec::new()),
            fail,
        })
    }
}

#[async_trait]
impl ImageGenerator for FixedImages {
    async fn generate_image(&self, request: &ImageRequest) -> anyhow::Result<String> {
        self.calls.lock().unwrap().push(request.clone());
        if self.fail {
            anyhow::bail!("image backend down");
        }
        Ok("http://images.test/generated.png".to_owned())
    }
}

pub fn test_config() -> PipelineConfig {
    PipelineConfig {
        min_call_interval: Duration::ZERO,
        ..PipelineConfig::default()
    }
}

pub fn pipeline_with(
    config: PipelineConfig,
    summarizer: Arc<ScriptedSummarizer>,
    store: ProgressStore,
) -> Arc<BookPipeline> {
    BookPipeline::new(config, summarizer, None, None, store)
}

/// `n` paragraphs of roughly 4,000 chars each; the chunker keeps one paragraph per chunk.
pub fn paragraphs(n: usize) -> String {
    (0..n)
        .map(|i| format!("Paragraph {i} keeps the story moving forward. ").repeat(88))
        .collect::<Vec<_>>()
        .join("\n\n\n")
}
