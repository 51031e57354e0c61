use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context as _;

pub const DEFAULT_API_BASE_URL: &str = "http://127.0.0.1:8080";
pub const DEFAULT_MIN_CALL_INTERVAL: Duration = Duration::from_secs(13);
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);
pub const DEFAULT_WINDOW_SIZE: usize = 3;
pub const DEFAULT_SUMMARY_RETRIES: usize = 1;
pub const DEFAULT_CONTEXT_CHARS: usize = 500;
/// Upper bound the backend accepts for `prev_context` / `next_context`.
pub const MAX_CONTEXT_CHARS: usize = 2_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum BackendMode {
    Demo,
    Live,
}

impl BackendMode {
    pub fn from_env() -> anyhow::Result<Self> {
        let raw = std::env::var("FLASHBOOK_BACKEND_MODE").unwrap_or_else(|_| "live".to_string());
        Self::parse(&raw).with_context(|| {
            format!("invalid FLASHBOOK_BACKEND_MODE={raw:?}. expected one of: demo, live")
        })
    }

    pub fn parse(raw: &str) -> anyhow::Result<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "" | "live" => Ok(Self::Live),
            "demo" => Ok(Self::Demo),
            other => anyhow::bail!("unsupported backend mode: {other}"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub api_base_url: String,
    pub backend_mode: BackendMode,
    pub min_call_interval: Duration,
    pub request_timeout: Duration,
    pub window_size: usize,
    pub summary_retries: usize,
    pub resolve_images: bool,
    pub context_chars: usize,
    pub data_dir: PathBuf,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            backend_mode: BackendMode::Live,
            min_call_interval: DEFAULT_MIN_CALL_INTERVAL,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            window_size: DEFAULT_WINDOW_SIZE,
            summary_retries: DEFAULT_SUMMARY_RETRIES,
            resolve_images: false,
            context_chars: DEFAULT_CONTEXT_CHARS,
            data_dir: PathBuf::from("flashbook-data"),
        }
    }
}

impl PipelineConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let mut config = Self {
            backend_mode: BackendMode::from_env()?,
            ..Self::default()
        };

        if let Some(url) = non_empty_env("FLASHBOOK_API_BASE_URL") {
            config.api_base_url = url;
        }
        if let Some(dir) = non_empty_env("FLASHBOOK_DATA_DIR") {
            config.data_dir = PathBuf::from(dir);
        }
        if let Some(raw) = non_empty_env("FLASHBOOK_MIN_CALL_INTERVAL_SECS") {
            let secs = raw.parse::<u64>().with_context(|| {
                format!("invalid FLASHBOOK_MIN_CALL_INTERVAL_SECS={raw:?}. expected whole seconds")
            })?;
            config.min_call_interval = Duration::from_secs(secs);
        }

        Ok(config)
    }

    pub fn window_size(&self) -> usize {
        self.window_size.max(1)
    }

    pub fn context_chars(&self) -> usize {
        self.context_chars.min(MAX_CONTEXT_CHARS)
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
