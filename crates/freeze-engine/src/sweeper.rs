use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use tokio::task::{spawn_blocking, JoinHandle};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, warn};

use freeze_kernel::{Kernel, RevertEntry, RevertOutcome};

use crate::events::{RevertEvent, RevertFeed};

const DEFAULT_INTERVAL_SECS: u64 = 60;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepStats {
    pub processed: usize,
    /// Undos that changed store state.
    pub undone: usize,
    /// Entries whose undo found nothing left to do.
    pub noop: usize,
    /// Unusable entries discarded so they cannot jam the sweep.
    pub dropped: usize,
}

/// Start the sweeper as an owned background task. The loop never exits on its
/// own; a failed cycle is logged and retried on the next tick.
pub fn start(kernel: Kernel, feed: RevertFeed) -> JoinHandle<()> {
    let mut ticker = interval(Duration::from_secs(sweep_interval_secs()));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    tokio::spawn(async move {
        loop {
            ticker.tick().await;
            match sweep_once(&kernel, &feed, Utc::now()).await {
                Ok(stats) if stats.processed > 0 => {
                    debug!(
                        target: "freeze::sweeper",
                        processed = stats.processed,
                        undone = stats.undone,
                        noop = stats.noop,
                        dropped = stats.dropped,
                        "sweep cycle reverted expired mutations"
                    );
                }
                Ok(_) => {}
                Err(err) => {
                    warn!(target: "freeze::sweeper", error = %err, "sweep cycle failed; retrying next tick");
                }
            }
        }
    })
}

/// Drain the entire expired backlog as of `now`. Each entry's undo and ledger
/// removal commit together; a store-level failure aborts the rest of the
/// cycle and leaves the unprocessed entries for the next tick.
pub async fn sweep_once(kernel: &Kernel, feed: &RevertFeed, now: DateTime<Utc>) -> Result<SweepStats> {
    let k = kernel.clone();
    let results = spawn_blocking(move || -> std::result::Result<_, freeze_kernel::StoreError> {
        let due = k.pull_expired(now)?;
        let mut out: Vec<(RevertEntry, RevertOutcome)> = Vec::with_capacity(due.len());
        for entry in due {
            let outcome = k.revert_entry(&entry)?;
            out.push((entry, outcome));
        }
        Ok(out)
    })
    .await
    .context("join sweep task")?
    .context("apply expired reverts")?;

    let time = now.to_rfc3339_opts(SecondsFormat::Millis, true);
    let mut stats = SweepStats::default();
    for (entry, outcome) in results {
        stats.processed += 1;
        match &outcome {
            RevertOutcome::Deleted | RevertOutcome::Restored | RevertOutcome::Reinserted => {
                stats.undone += 1;
            }
            RevertOutcome::AlreadyGone
            | RevertOutcome::TargetMissing
            | RevertOutcome::AlreadyPresent => {
                stats.noop += 1;
            }
            RevertOutcome::DroppedMalformed(reason)
            | RevertOutcome::DroppedUnknownTable(reason)
            | RevertOutcome::DroppedUnknownAction(reason)
            | RevertOutcome::DroppedConflict(reason) => {
                stats.dropped += 1;
                warn!(
                    target: "freeze::sweeper",
                    entry = entry.id,
                    table = %entry.table_name,
                    record = entry.record_id,
                    reason = %reason,
                    "discarded unusable revert entry"
                );
            }
        }
        feed.publish(RevertEvent {
            time: time.clone(),
            table: entry.table_name,
            record_id: entry.record_id,
            action: entry.action,
            outcome: outcome.label(),
        });
    }
    Ok(stats)
}

fn sweep_interval_secs() -> u64 {
    std::env::var("FREEZE_SWEEP_INTERVAL_SECS")
        .ok()
        .and_then(|raw| raw.parse::<u64>().ok())
        .filter(|val| *val > 0)
        .unwrap_or(DEFAULT_INTERVAL_SECS)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interval_respects_env_and_floor() {
        std::env::set_var("FREEZE_SWEEP_INTERVAL_SECS", "15");
        assert_eq!(sweep_interval_secs(), 15);
        std::env::set_var("FREEZE_SWEEP_INTERVAL_SECS", "0");
        assert_eq!(sweep_interval_secs(), DEFAULT_INTERVAL_SECS);
        std::env::remove_var("FREEZE_SWEEP_INTERVAL_SECS");
        assert_eq!(sweep_interval_secs(), DEFAULT_INTERVAL_SECS);
    }
}
