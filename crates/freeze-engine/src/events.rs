use freeze_kernel::LedgerAction;
use serde::Serialize;
use tokio::sync::broadcast;

/// One applied (or discarded) undo, as seen by observers.
#[derive(Debug, Clone, Serialize)]
pub struct RevertEvent {
    pub time: String,
    pub table: String,
    pub record_id: i64,
    pub action: LedgerAction,
    pub outcome: &'static str,
}

/// Broadcast feed of revert events. Slow subscribers lag and drop, they never
/// block the sweeper.
#[derive(Clone)]
pub struct RevertFeed {
    tx: broadcast::Sender<RevertEvent>,
}

impl RevertFeed {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RevertEvent> {
        self.tx.subscribe()
    }

    pub(crate) fn publish(&self, event: RevertEvent) {
        let _ = self.tx.send(event);
    }
}

impl Default for RevertFeed {
    fn default() -> Self {
        Self::new(256)
    }
}
