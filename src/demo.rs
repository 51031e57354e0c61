//! Offline backend used in `demo` mode: builds blocks from the chunk's own sentences.

use async_trait::async_trait;
use sha2::Digest as _;

use crate::backend::{
    ImageGenerator, ImageRequest, ResponseBlock, Summarizer, SummaryRequest, SummaryResponse,
};

const DEMO_BLOCK_KINDS: [&str; 5] = ["scene", "insight", "quote", "tension", "takeaway"];
const SENTENCES_PER_BLOCK: usize = 3;

#[derive(Debug, Clone, Default)]
pub struct DemoBackend;

#[async_trait]
impl Summarizer for DemoBackend {
    async fn summarize(&self, request: &SummaryRequest) -> anyhow::Result<SummaryResponse> {
        let sentences = sentences(&request.text_chunk);
        if sentences.is_empty() {
            anyhow::bail!("demo summarizer found no sentences");
        }

        let blocks = sentences
            .chunks(SENTENCES_PER_BLOCK)
            .zip(DEMO_BLOCK_KINDS)
            .enumerate()
            .map(|(idx, (group, kind))| ResponseBlock {
                kind: kind.to_owned(),
                body: Some(group.join(" ")),
                image_hint: idx == 0,
                image_prompt: (idx == 0).then(|| group[0].to_owned()),
                ..ResponseBlock::default()
            })
            .collect::<Vec<_>>();
        let visual_slots_used = blocks.iter().filter(|b| b.image_hint).count() as u32;

        Ok(SummaryResponse {
            unit_title: request.chapter_title.clone(),
            blocks,
            visual_slots_used,
            cached: false,
            notes: serde_json::json!({ "demo": true }),
        })
    }
}

#[async_trait]
impl ImageGenerator for DemoBackend {
    async fn generate_image(&self, request: &ImageRequest) -> anyhow::Result<String> {
        let digest = sha2::Sha256::digest(request.prompt.as_bytes());
        let seed = hex::encode(&digest[..6]);
        Ok(format!(
            "https://picsum.photos/seed/{seed}/{}/{}",
            request.width, request.height
        ))
    }
}

fn sentences(text: &str) -> Vec<&str> {
    text.split_inclusive(['.', '!', '?'])
        .map(str::trim)
        .filter(|s| s.chars().any(char::is_alphanumeric))
        .collect()
}
