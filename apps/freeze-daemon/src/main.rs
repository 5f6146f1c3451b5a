//! Headless host process for the sandbox revert engine: opens the store,
//! seeds the curated baseline, and runs the sweeper until ctrl-c.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::broadcast;
use tracing::info;

use freeze_engine::{RevertEvent, RevertFeed};
use freeze_kernel::Kernel;

mod tasks;

use tasks::{TaskHandle, TaskManager};

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let dir = state_dir();
    let kernel = {
        let dir = dir.clone();
        tokio::task::spawn_blocking(move || Kernel::open(&dir))
            .await
            .context("join kernel open")?
            .context("open kernel")?
    };
    let seeded = {
        let kernel = kernel.clone();
        tokio::task::spawn_blocking(move || kernel.seed_baseline())
            .await
            .context("join baseline seed")?
            .context("seed baseline data")?
    };
    let pending = kernel.pending_counts_async().await.context("read ledger")?;
    info!(
        state_dir = %dir.display(),
        seeded,
        pending = pending.total,
        "kernel ready"
    );

    let feed = RevertFeed::default();
    let mut background = TaskManager::new();
    background.push(TaskHandle::new(
        "freeze.sweeper",
        freeze_engine::start(kernel.clone(), feed.clone()),
    ));
    background.push(TaskHandle::new(
        "freeze.feed_log",
        tokio::spawn(log_feed(feed.subscribe())),
    ));

    tokio::signal::ctrl_c().await.context("wait for ctrl-c")?;
    info!("shutdown requested");
    background.shutdown_with_grace(Duration::from_secs(2)).await;
    Ok(())
}

async fn log_feed(mut rx: broadcast::Receiver<RevertEvent>) {
    loop {
        match rx.recv().await {
            Ok(ev) => info!(
                target: "freeze::sweeper",
                table = %ev.table,
                record = ev.record_id,
                action = ev.action.label(),
                outcome = ev.outcome,
                "revert applied"
            ),
            Err(broadcast::error::RecvError::Lagged(_)) => continue,
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

fn state_dir() -> PathBuf {
    std::env::var("FREEZE_STATE_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("state"))
}

fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
}
