use anyhow::{Context, Result};
use chrono::Utc;
use tokio::task::spawn_blocking;
use tracing::debug;

use freeze_kernel::{Kernel, StoreError};
use freeze_schema::{Action, Snapshot};

/// API-facing facade: every write endpoint calls one of these immediately
/// around its SQL mutation. Append failures propagate to the caller — an
/// unrecorded mutation would silently become permanent, so this is the one
/// place the engine is loud.
#[derive(Clone)]
pub struct Recorder {
    kernel: Kernel,
}

impl Recorder {
    pub fn new(kernel: Kernel) -> Self {
        Self { kernel }
    }

    pub fn kernel(&self) -> &Kernel {
        &self.kernel
    }

    /// Record a successful INSERT. The row dies in 2h unless promoted.
    pub async fn on_create(&self, table: &str, id: i64, actor: Option<&str>) -> Result<i64> {
        let k = self.kernel.clone();
        let t = table.to_string();
        let a = actor.map(str::to_string);
        let entry = spawn_blocking(move || {
            k.append_revert(&t, id, Action::Create, None, a.as_deref(), Utc::now())
        })
        .await
        .context("join recorder task")?
        .with_context(|| format!("record create of {table}/{id}"))?;
        debug!(target: "freeze::recorder", table, id, entry, "provisional create recorded");
        Ok(entry)
    }

    /// Record an UPDATE, given the before-image captured prior to mutating.
    /// Older live update entries for the row are superseded: the new
    /// before-image already embeds their effect.
    pub async fn on_update(
        &self,
        table: &str,
        id: i64,
        before: Snapshot,
        actor: Option<&str>,
    ) -> Result<i64> {
        let k = self.kernel.clone();
        let t = table.to_string();
        let a = actor.map(str::to_string);
        let (superseded, entry) = spawn_blocking(move || -> std::result::Result<_, StoreError> {
            let superseded = k.supersede_updates(&t, id)?;
            let entry = k.append_revert(&t, id, Action::Update, Some(&before), a.as_deref(), Utc::now())?;
            Ok((superseded, entry))
        })
        .await
        .context("join recorder task")?
        .with_context(|| format!("record update of {table}/{id}"))?;
        debug!(
            target: "freeze::recorder",
            table, id, entry, superseded, "provisional update recorded"
        );
        Ok(entry)
    }

    /// Record a DELETE, given the before-image captured prior to deleting.
    ///
    /// If the row still had a pending create entry it was ephemeral and is
    /// simply gone early: the create entry (and any update entries referencing
    /// the vanished id) are cancelled and nothing new is recorded. Returns the
    /// ledger entry id, or `None` in the cancellation case.
    pub async fn on_delete(
        &self,
        table: &str,
        id: i64,
        before: Snapshot,
        actor: Option<&str>,
    ) -> Result<Option<i64>> {
        let k = self.kernel.clone();
        let t = table.to_string();
        let a = actor.map(str::to_string);
        let entry = spawn_blocking(move || -> std::result::Result<_, StoreError> {
            if let Some(create_entry) = k.pending_create(&t, id)? {
                k.remove_revert(create_entry)?;
                k.supersede_updates(&t, id)?;
                return Ok(None);
            }
            let entry =
                k.append_revert(&t, id, Action::Delete, Some(&before), a.as_deref(), Utc::now())?;
            Ok(Some(entry))
        })
        .await
        .context("join recorder task")?
        .with_context(|| format!("record delete of {table}/{id}"))?;
        match entry {
            Some(entry) => {
                debug!(target: "freeze::recorder", table, id, entry, "provisional delete recorded")
            }
            None => {
                debug!(target: "freeze::recorder", table, id, "pending create cancelled by delete")
            }
        }
        Ok(entry)
    }

    /// Before-image helper for write endpoints; call prior to UPDATE/DELETE.
    pub async fn capture(&self, table: &str, id: i64) -> std::result::Result<Snapshot, StoreError> {
        self.kernel.capture_snapshot_async(table, id).await
    }
}
