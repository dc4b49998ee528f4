//! photolift command line entry point.

mod app;
mod config;
mod fs_store;
mod services;

use std::path::PathBuf;

use clap::Parser;
use tracing_subscriber::EnvFilter;

/// Uploads photos and videos to a photo server in resumable chunks.
#[derive(Debug, Parser)]
#[command(name = "photolift", version, about)]
pub struct Cli {
    /// Files to add to the upload queue.
    pub files: Vec<PathBuf>,

    /// Album (category) id the new files go to.
    #[arg(short, long, default_value_t = 0)]
    pub collection: i64,

    /// Privacy level of the new files.
    #[arg(long, default_value_t = 0)]
    pub privacy_level: i32,

    /// Comma-separated tag ids for the new files.
    #[arg(long, value_delimiter = ',')]
    pub tags: Vec<i64>,

    /// Delete each file once the server holds it.
    #[arg(long)]
    pub delete_after_upload: bool,

    /// Queue failed items again before running.
    #[arg(long)]
    pub retry_failed: bool,

    /// Drop every queued item and exit.
    #[arg(long, conflicts_with = "files")]
    pub clear: bool,

    /// Run a single time-boxed background window.
    #[arg(long)]
    pub background: bool,

    /// Configuration file.
    #[arg(long, env = "PHOTOLIFT_CONFIG")]
    pub config: Option<PathBuf>,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "starting photolift");

    let config_path = cli.config.clone().unwrap_or_else(config::default_config_path);
    let config = config::AppConfig::load(&config_path)?;
    tracing::info!(
        path = %config_path.display(),
        server = %config.server_url,
        "configuration loaded"
    );

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(app::run(config, cli))?;

    Ok(())
}
