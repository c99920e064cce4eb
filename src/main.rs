// Licensed under the MIT License
// Copyright (c) 2025 Accelara contributors

// Use high-performance memory allocator
#[cfg(not(disable_mimalloc))]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use accelara::{
    format_byte_size, logging, parse_byte_size, DownloadEngine, DownloadJob, Event, EventSink,
    JsonLineReporter, Reporter, Result,
};

/// Accelara - Segmented Download Engine
///
/// Downloads one file and emits newline-delimited JSON progress events on
/// stdout for a supervising process. Exit code 0 on completion, 1 on any
/// terminal failure.
#[derive(Parser)]
#[command(name = "accelara")]
#[command(about = "Segmented HTTP download engine with resume and adaptive fallback")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    /// Source URL to download
    #[arg(long)]
    source: String,

    /// Destination file, or directory to derive a filename in
    #[arg(long)]
    output: PathBuf,

    /// Identifier echoed in every emitted event
    #[arg(long)]
    download_id: String,

    /// Requested worker count (capped at 8)
    #[arg(long, default_value_t = 8)]
    concurrency: usize,

    /// Minimum chunk size, e.g. "4MB" or "512K"
    #[arg(long, default_value = "4MB")]
    chunk_size: String,

    /// Aggregate download rate cap, e.g. "1MB"
    #[arg(long)]
    limit: Option<String>,

    /// Per-chunk retry budget
    #[arg(long, default_value_t = 5)]
    retries: u32,

    /// Connect timeout in seconds
    #[arg(long, default_value_t = 15)]
    connect_timeout: u64,

    /// Read timeout in seconds
    #[arg(long, default_value_t = 60)]
    read_timeout: u64,

    /// Expected SHA-256 of the final artifact (hex)
    #[arg(long)]
    sha256: Option<String>,

    /// HTTP(S) proxy URL; defaults to the standard environment
    #[arg(long)]
    proxy: Option<String>,

    /// Enable verbose diagnostics on stderr
    #[arg(short, long)]
    verbose: bool,
}

fn build_job(cli: &Cli) -> Result<DownloadJob> {
    let mut job = DownloadJob::new(
        cli.source.clone(),
        cli.output.clone(),
        cli.download_id.clone(),
    );

    job.concurrency = cli.concurrency.max(1);
    job.min_chunk_size = parse_byte_size(&cli.chunk_size)?;
    job.retries = cli.retries;
    job.connect_timeout = cli.connect_timeout;
    job.read_timeout = cli.read_timeout;
    job.expected_sha256 = cli.sha256.as_ref().map(|s| s.to_ascii_lowercase());
    job.proxy = cli.proxy.clone();

    job.rate_limit = match &cli.limit {
        Some(limit) => {
            let bytes = parse_byte_size(limit)?;
            (bytes > 0).then_some(bytes)
        }
        None => None,
    };

    Ok(job)
}

async fn run(cli: Cli) -> Result<()> {
    let reporter: Arc<dyn Reporter> =
        Arc::new(JsonLineReporter::stdout(cli.download_id.clone()));

    let engine = match build_job(&cli).and_then(|job| DownloadEngine::new(job, reporter.clone())) {
        Ok(engine) => engine,
        Err(e) => {
            // The engine never came up, so the terminal error event is on us.
            EventSink::new(reporter)
                .emit(Event::error(&e.to_string()))
                .await;
            return Err(e);
        }
    };

    let outcome = engine.run().await?;
    info!(
        "Published {} ({}, {:.2} MB/s{})",
        outcome.path.display(),
        format_byte_size(outcome.size),
        outcome.speed / 1024.0 / 1024.0,
        if outcome.resumed { ", resumed" } else { "" }
    );

    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    logging::init_cli_logging(cli.verbose)
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {e}"))?;

    if let Err(e) = run(cli).await {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }

    Ok(())
}
