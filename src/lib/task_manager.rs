use tokio::task::JoinHandle;

use crate::utils::Mutex;

/// Keeps the join handles of the tasks spawned by the bridge.
///
/// Used on shutdown to wait for every task, or to abort the ones still running after the grace
/// period.
pub struct TaskManager {
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Default for TaskManager {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskManager {
    pub fn new() -> Self {
        Self {
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Spawns `fut` in a span pointing at the caller and tracks its handle.
    #[track_caller]
    pub fn spawn<F>(&self, fut: F)
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        use tracing::Instrument;
        let location = std::panic::Location::caller();
        let span = tracing::trace_span!(
            "task",
            file = location.file(),
            line = location.line(),
            column = location.column(),
        );

        let handle = tokio::spawn(fut.instrument(span));
        self.tasks.super_safe_lock(|tasks| {
            tasks.retain(|task| !task.is_finished());
            tasks.push(handle);
        });
    }

    /// Number of tracked tasks that are still running.
    pub fn running(&self) -> usize {
        self.tasks
            .super_safe_lock(|tasks| tasks.iter().filter(|task| !task.is_finished()).count())
    }

    /// Waits for every tracked task to finish.
    pub async fn join_all(&self) {
        let handles = self.tasks.super_safe_lock(std::mem::take);
        for handle in handles {
            let _ = handle.await;
        }
    }

    /// Aborts every tracked task without waiting.
    pub async fn abort_all(&self) {
        self.tasks.super_safe_lock(|tasks| {
            for handle in tasks.drain(..) {
                handle.abort();
            }
        });
    }
}
