mod app;
mod cli;
mod config;
mod db;
mod http;
mod paths;
mod remote;
mod story;

use std::fs::{self, OpenOptions};
use std::sync::Mutex;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::{EnvFilter, prelude::*};

fn main() -> Result<()> {
    let cli = cli::Cli::parse();
    if let Err(err) = init_logging() {
        eprintln!("warning: logging disabled: {err:#}");
    }
    app::run(cli)
}

/// Log to a file only; stdout belongs to the map and the printed stories.
fn init_logging() -> Result<()> {
    let log_path = paths::log_file_path()?;
    if let Some(parent) = log_path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create log directory {}", parent.display()))?;
    }
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .with_context(|| format!("failed to open log file {}", log_path.display()))?;

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let file_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_ansi(false)
        .compact()
        .with_writer(Mutex::new(file));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .try_init()
        .context("failed to install log subscriber")?;
    Ok(())
}
