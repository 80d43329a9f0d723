use anyhow::Result;
use bpscraper::{config::PipelineConfig, pipeline};
use clap::Parser;
use std::path::PathBuf;
use tokio::time::Instant;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

/// Build the permits time series from BPS releases.
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// YAML configuration file (defaults to ./bpscraper.yaml when present)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Read releases from a local mirror instead of the Census server
    #[arg(long)]
    mirror_dir: Option<PathBuf>,

    /// Directory for parquet and JSON outputs
    #[arg(short, long)]
    output_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // ─── 1) init logging ─────────────────────────────────────────────
    let env = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt::Subscriber::builder()
        .with_env_filter(env)
        .with_span_events(fmt::format::FmtSpan::CLOSE)
        .init();
    info!("startup");

    // ─── 2) configuration ────────────────────────────────────────────
    let args = Args::parse();
    let mut config = PipelineConfig::load(args.config.as_deref())?;
    if let Some(dir) = args.mirror_dir {
        config.source.mirror_dir = Some(dir);
    }
    if let Some(dir) = args.output_dir {
        config.output_dir = dir;
    }

    // ─── 3) run ──────────────────────────────────────────────────────
    let start = Instant::now();
    let manifest = pipeline::run(&config).await?;
    info!(
        fetched = manifest.fetch.fetched,
        places = manifest.resolution.total_rows,
        metros = manifest.metros.emitted,
        elapsed = ?start.elapsed(),
        "all done"
    );
    Ok(())
}
