//! wsfs daemon entry point.

mod app;
mod config;

use std::path::PathBuf;

use clap::Parser;
use tracing_subscriber::EnvFilter;

/// Accepts WebSocket peers and copies the files they announce.
#[derive(Debug, Parser)]
#[command(name = "wsfsd", version, about)]
pub struct Cli {
    /// TOML configuration file [default: ./wsfs.toml if present]
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Port to listen on
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Directory that receives copied files
    #[arg(short, long)]
    pub output_dir: Option<PathBuf>,

    /// Bytes requested per chunk
    #[arg(long)]
    pub chunk_size: Option<u64>,

    /// Concurrent chunk workers per file
    #[arg(short, long)]
    pub workers: Option<usize>,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize structured logging.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "starting wsfsd");

    let mut config = config::Config::load(cli.config.as_deref())?;
    config.apply_cli(&cli);
    config.validate()?;
    tracing::info!(
        port = config.port,
        output_dir = %config.output_dir.display(),
        chunk_size = config.chunk_size,
        workers = config.workers,
        "configuration loaded"
    );

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(app::run(config))?;

    tracing::info!("wsfsd shut down cleanly");
    Ok(())
}
