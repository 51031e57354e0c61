use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};

use crate::config::{BackendMode, PipelineConfig};

#[derive(Debug, Parser)]
#[command(author, version, about)]
pub struct Cli {
    #[command(flatten)]
    pub backend: BackendArgs,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    Ingest(IngestArgs),
    View(ViewArgs),
    Status,
    Clear,
}

/// Overrides for values otherwise taken from `FLASHBOOK_*` env vars.
#[derive(Debug, Args)]
pub struct BackendArgs {
    /// Directory holding saved reading progress.
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// Summarizer backend base URL (live mode).
    #[arg(long, global = true)]
    pub api_base_url: Option<String>,

    #[arg(long, global = true, value_enum)]
    pub mode: Option<BackendMode>,

    /// Minimum seconds between summarizer calls.
    #[arg(long, global = true)]
    pub min_call_interval_secs: Option<u64>,

    /// Ask the backend for illustrations of image-hinted blocks.
    #[arg(long, global = true)]
    pub resolve_images: bool,
}

impl BackendArgs {
    pub fn apply(&self, config: &mut PipelineConfig) {
        if let Some(dir) = &self.data_dir {
            config.data_dir = dir.clone();
        }
        if let Some(url) = &self.api_base_url {
            config.api_base_url = url.clone();
        }
        if let Some(mode) = self.mode {
            config.backend_mode = mode;
        }
        if let Some(secs) = self.min_call_interval_secs {
            config.min_call_interval = Duration::from_secs(secs);
        }
        if self.resolve_images {
            config.resolve_images = true;
        }
    }
}

#[derive(Debug, Args)]
pub struct IngestArgs {
    /// Plain-text source document.
    #[arg(long)]
    pub file: PathBuf,

    /// Book title (default: derived from the file name).
    #[arg(long)]
    pub title: Option<String>,

    #[arg(long)]
    pub author: Option<String>,

    /// Return after the first chapter instead of waiting for the initial window.
    #[arg(long)]
    pub no_wait: bool,
}

#[derive(Debug, Args)]
pub struct ViewArgs {
    /// 1-based chapter number to open.
    #[arg(long)]
    pub chapter: usize,
}
