//! replicate-rs: resumable replication between two REST item stores.
//!
//! Lists every collection on the Source, records each item in a ledger,
//! marks items the Target already holds with the same size, and copies the
//! rest with a pool of workers. The ledger is snapshotted to disk after each
//! phase so an interrupted run picks up where it stopped.

#![warn(clippy::all)]

mod cli;
mod config;
mod ledger;
mod progress;
mod retry;
mod shutdown;
mod store;
mod sync;
mod types;

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use ledger::SnapshotStore;
use progress::format_size;
use store::{RestStore, Store};
use sync::{Controller, SyncOutcome};

async fn run_status(path: &Path) -> anyhow::Result<()> {
    if !path.exists() {
        println!("No snapshot found at {}", path.display());
        println!("Run a replication first to create it.");
        return Ok(());
    }

    let ledger = SnapshotStore::new(path).load().await?;
    let summary = ledger.summary();

    println!("Snapshot: {}", path.display());
    println!();
    println!("Collections: {}", summary.collections);
    println!("Items:");
    println!(
        "  Total:     {:>8} ({})",
        summary.total.items,
        format_size(summary.total.bytes)
    );
    println!(
        "  Pending:   {:>8} ({})",
        summary.new.items,
        format_size(summary.new.bytes)
    );
    println!(
        "  Skipped:   {:>8} ({})",
        summary.skipped.items,
        format_size(summary.skipped.bytes)
    );
    println!(
        "  Completed: {:>8} ({})",
        summary.completed.items,
        format_size(summary.completed.bytes)
    );
    if let Some(collection) = ledger.scanning() {
        println!();
        println!("Scan of collection {} was interrupted", collection);
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = cli::Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(cli.log_level.filter())),
        )
        .init();

    if cli.status {
        return run_status(&config::expand_tilde(&cli.save)).await;
    }

    let config = config::Config::from_cli(cli)?;
    tracing::info!(
        source = %config.source_url,
        target = %config.target_url,
        concurrency = config.threads,
        "Starting replicate-rs"
    );
    tracing::debug!(?config, "Resolved configuration");

    let source: Arc<dyn Store> = Arc::new(
        RestStore::new(&config.source_url, config.credentials.clone(), config.timeout)
            .context("Failed to build HTTP client for the Source")?,
    );
    let target: Arc<dyn Store> = Arc::new(
        RestStore::new(&config.target_url, config.credentials.clone(), config.timeout)
            .context("Failed to build HTTP client for the Target")?,
    );

    let snapshot = SnapshotStore::open_locked(&config.snapshot_path).await?;
    let controller = Controller::new(source, target, snapshot, config.sync_config());
    shutdown::install_signal_handler(controller.stop_token())
        .context("Failed to install signal handlers")?;

    match controller.run().await? {
        SyncOutcome::Completed { summary, transfer } => {
            if transfer.failed > 0 {
                tracing::warn!(
                    "Replication finished with {} items still pending",
                    summary.new.items
                );
            } else {
                tracing::info!("Replication complete");
            }
        }
        SyncOutcome::DryRun { summary } => {
            tracing::info!(
                "Dry run complete, {} items ({}) would be transferred",
                summary.new.items,
                format_size(summary.new.bytes)
            );
        }
        SyncOutcome::Interrupted { summary } => {
            tracing::info!(
                "Stopped with {} items pending, progress saved to {}. Run again to resume.",
                summary.new.items,
                config.snapshot_path.display()
            );
        }
    }

    Ok(())
}
