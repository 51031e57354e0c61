use std::process::ExitCode;

use anyhow::Context as _;
use clap::Parser as _;

use flashbook::app::pipeline::BookPipeline;
use flashbook::cli::{Cli, Command};
use flashbook::config::PipelineConfig;

#[tokio::main]
async fn main() -> ExitCode {
    if let Err(err) = try_main().await {
        eprintln!("{err:#}");
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}

async fn try_main() -> anyhow::Result<()> {
    flashbook::logging::init().context("init logging")?;

    let cli = Cli::parse();
    tracing::debug!(?cli, "parsed cli");

    let mut config = PipelineConfig::from_env().context("load config")?;
    cli.backend.apply(&mut config);
    let pipeline = BookPipeline::from_config(config).context("build pipeline")?;

    match cli.command {
        Command::Ingest(args) => {
            pipeline
                .ingest_file(&args.file, args.title.as_deref(), args.author.as_deref())
                .await
                .context("ingest")?;
            pipeline.on_init().await;
            if !args.no_wait {
                pipeline.wait_for_background().await;
            }
            print_json(&pipeline.status())?;
        }
        Command::View(args) => {
            if !pipeline.restore().await {
                anyhow::bail!("no book loaded; run `flashbook ingest --file <path>` first");
            }
            let chunks = pipeline.chunk_count();
            if args.chapter == 0 || args.chapter > chunks {
                anyhow::bail!("chapter {} is out of range (1..={chunks})", args.chapter);
            }
            let index = args.chapter - 1;
            pipeline.on_chunk_viewed(index).await;
            print_json(&pipeline.chapter(index))?;
        }
        Command::Status => {
            pipeline.restore().await;
            print_json(&pipeline.status())?;
        }
        Command::Clear => {
            pipeline.clear().await;
        }
    }

    Ok(())
}

fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(value).context("serialize output")?;
    println!("{json}");
    Ok(())
}
