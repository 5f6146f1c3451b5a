use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::debug;

pub struct TaskHandle {
    name: &'static str,
    handle: JoinHandle<()>,
}

impl TaskHandle {
    pub fn new(name: &'static str, handle: JoinHandle<()>) -> Self {
        Self { name, handle }
    }
}

/// Owns the daemon's background tasks so shutdown is explicit rather than a
/// process-exit side effect.
#[derive(Default)]
pub struct TaskManager {
    tasks: Vec<TaskHandle>,
}

impl TaskManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, task: TaskHandle) {
        debug!(task = task.name, "task registered");
        self.tasks.push(task);
    }

    /// Give each task `grace` to finish, then abort it.
    pub async fn shutdown_with_grace(self, grace: Duration) {
        for task in self.tasks {
            let TaskHandle { name, mut handle } = task;
            let sleeper = tokio::time::sleep(grace);
            tokio::pin!(sleeper);
            tokio::select! {
                res = &mut handle => {
                    if let Err(err) = res {
                        debug!(task = name, ?err, "task exited with error");
                    }
                }
                _ = &mut sleeper => {
                    handle.abort();
                    if let Err(err) = handle.await {
                        if !err.is_cancelled() {
                            debug!(task = name, ?err, "task join after abort failed");
                        }
                    }
                }
            }
        }
    }
}
