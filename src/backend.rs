use std::time::Duration;

use anyhow::Context as _;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use url::Url;

pub const SUMMARY_MODE_CHAPTER: &str = "chapter";

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct SummaryRequest {
    pub text_chunk: String,
    pub mode: String,
    pub book_id: String,
    pub chapter_title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prev_context: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_context: Option<String>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct SummaryResponse {
    #[serde(default)]
    pub unit_title: String,
    #[serde(default)]
    pub blocks: Vec<ResponseBlock>,
    #[serde(default)]
    pub visual_slots_used: u32,
    #[serde(default)]
    pub cached: bool,
    #[serde(default)]
    pub notes: serde_json::Value,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct ResponseBlock {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub slide_title: Option<String>,
    #[serde(default)]
    pub headline: Option<String>,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub lyric_lines: Vec<String>,
    #[serde(default)]
    pub image_hint: bool,
    #[serde(default)]
    pub image_prompt: Option<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ImageRequest {
    pub prompt: String,
    pub width: u32,
    pub height: u32,
    pub style: String,
    pub book_title: String,
    pub character_context: String,
}

impl ImageRequest {
    pub fn for_book(prompt: &str, book_title: &str) -> Self {
        Self {
            prompt: prompt.to_owned(),
            width: 512,
            height: 768,
            style: "anime".to_owned(),
            book_title: book_title.to_owned(),
            character_context: String::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
struct ImageResponse {
    image_url: String,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct ExtractedText {
    pub text: String,
    #[serde(default)]
    pub page_count: u32,
    #[serde(default)]
    pub filename: String,
}

/// Turns one chunk of text into structured blocks.
#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(&self, request: &SummaryRequest) -> anyhow::Result<SummaryResponse>;
}

/// Produces an illustration URL for a prompt.
#[async_trait]
pub trait ImageGenerator: Send + Sync {
    async fn generate_image(&self, request: &ImageRequest) -> anyhow::Result<String>;
}

/// Pulls plain text out of an uploaded PDF.
#[async_trait]
pub trait TextExtractor: Send + Sync {
    async fn extract_text(&self, filename: &str, pdf: Vec<u8>) -> anyhow::Result<ExtractedText>;
}

#[derive(Debug, Clone)]
pub struct HttpBackend {
    client: reqwest::Client,
    base_url: Url,
}

impl HttpBackend {
    pub fn new(base_url: &str, timeout: Duration) -> anyhow::Result<Self> {
        let base_url = parse_base_url(base_url)?;
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("build http client")?;
        Ok(Self { client, base_url })
    }

    fn endpoint(&self, name: &str) -> anyhow::Result<Url> {
        self.base_url
            .join(name)
            .with_context(|| format!("build endpoint url for {name}"))
    }

    async fn post_json<T, R>(&self, name: &str, body: &T) -> anyhow::Result<R>
    where
        T: Serialize + Sync,
        R: serde::de::DeserializeOwned,
    {
        let endpoint = self.endpoint(name)?;
        let response = self
            .client
            .post(endpoint.clone())
            .json(body)
            .send()
            .await
            .with_context(|| format!("POST {endpoint}"))?;
        read_response(name, response).await
    }
}

async fn read_response<R>(name: &str, response: reqwest::Response) -> anyhow::Result<R>
where
    R: serde::de::DeserializeOwned,
{
    let status = response.status();
    let raw = response.text().await.context("read backend response body")?;
    if !status.is_success() {
        let message = parse_error_message(&raw).unwrap_or(raw);
        anyhow::bail!("backend error ({status}): {message}");
    }

    serde_json::from_str(&raw).with_context(|| format!("parse {name} response"))
}

#[async_trait]
impl Summarizer for HttpBackend {
    async fn summarize(&self, request: &SummaryRequest) -> anyhow::Result<SummaryResponse> {
        tracing::debug!(
            book_id = %request.book_id,
            chapter = %request.chapter_title,
            text_len = request.text_chunk.len(),
            "generate summary"
        );
        self.post_json("generateSummary", request).await
    }
}

#[async_trait]
impl TextExtractor for HttpBackend {
    async fn extract_text(&self, filename: &str, pdf: Vec<u8>) -> anyhow::Result<ExtractedText> {
        let endpoint = self.endpoint("extractText")?;
        let size = pdf.len();
        let part = reqwest::multipart::Part::bytes(pdf)
            .file_name(filename.to_owned())
            .mime_str("application/pdf")
            .context("build pdf upload part")?;
        let form = reqwest::multipart::Form::new().part("file", part);

        tracing::debug!(filename, size, "extract text");
        let response = self
            .client
            .post(endpoint.clone())
            .multipart(form)
            .send()
            .await
            .with_context(|| format!("POST {endpoint}"))?;
        read_response("extractText", response).await
    }
}

#[async_trait]
impl ImageGenerator for HttpBackend {
    async fn generate_image(&self, request: &ImageRequest) -> anyhow::Result<String> {
        let response: ImageResponse = self.post_json("generateImage", request).await?;
        resolve_image_url(&self.base_url, &response.image_url)
    }
}

/// Makes `raw` absolute, resolving relative paths against the backend base.
pub fn resolve_image_url(base_url: &Url, raw: &str) -> anyhow::Result<String> {
    let raw = raw.trim();
    if raw.is_empty() {
        anyhow::bail!("image url is empty");
    }
    if let Ok(absolute) = Url::parse(raw) {
        return Ok(absolute.to_string());
    }
    let resolved = base_url
        .join(raw)
        .with_context(|| format!("resolve image url: {raw}"))?;
    Ok(resolved.to_string())
}

fn parse_base_url(raw: &str) -> anyhow::Result<Url> {
    let trimmed = raw.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        anyhow::bail!("backend base url is empty");
    }
    // A trailing slash keeps `join` from replacing the last path segment.
    let url = Url::parse(&format!("{trimmed}/"))
        .with_context(|| format!("parse backend base url: {raw}"))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => anyhow::bail!("backend base url must be http/https, got {other}"),
    }
}

fn parse_error_message(raw_json: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(raw_json).ok()?;
    if let Some(message) = value.get("message").and_then(|v| v.as_str()) {
        return Some(message.to_owned());
    }
    let detail = value.get("detail")?;
    match detail.as_str() {
        Some(text) => Some(text.to_owned()),
        None => Some(detail.to_string()),
    }
}
