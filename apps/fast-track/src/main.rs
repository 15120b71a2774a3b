mod cli;
mod commands;
mod render;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, Context as _, Result};
use clap::Parser;
use directories::ProjectDirs;
use fast_track_sync::{FileStore, HttpRemoteStore};
use tracing::debug;
use tracing_subscriber::EnvFilter;

use crate::cli::Cli;
use crate::commands::{store_path, Context};

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let data_dir = match cli.data_dir {
        Some(dir) => dir,
        None => default_data_dir()?,
    };
    let path = store_path(&data_dir);
    debug!(path = %path.display(), server = %cli.server, "opening local store");

    let store = FileStore::open(path.clone())
        .with_context(|| format!("failed to open local store at {}", path.display()))?;
    let remote = HttpRemoteStore::new(&cli.server)
        .with_context(|| format!("invalid session store URL {}", cli.server))?;
    let ctx = Context::new(Arc::new(store), Arc::new(remote));

    let mut stdout = std::io::stdout();
    ctx.run(cli.command, &mut stdout).await
}

fn default_data_dir() -> Result<PathBuf> {
    ProjectDirs::from("", "", "fast-track")
        .map(|dirs| dirs.data_dir().to_path_buf())
        .ok_or_else(|| anyhow!("unable to determine a data directory; pass --data-dir"))
}
