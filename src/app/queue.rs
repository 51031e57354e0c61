use std::future::Future;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio_util::task::TaskTracker;

/// Runs background work (window prefetch) on the current runtime, bounded by a
/// semaphore, and lets callers wait for everything spawned so far.
#[derive(Debug, Clone)]
pub struct InProcessQueue {
    semaphore: Arc<Semaphore>,
    tracker: TaskTracker,
}

impl InProcessQueue {
    pub fn new(max_concurrency: usize) -> Self {
        let permits = max_concurrency.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(permits)),
            tracker: TaskTracker::new(),
        }
    }

    pub fn spawn<F>(&self, fut: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let semaphore = Arc::clone(&self.semaphore);
        self.tracker.spawn(async move {
            let Ok(_permit) = semaphore.acquire_owned().await else {
                tracing::warn!("background queue is closed; dropping task");
                return;
            };
            fut.await;
        });
    }

    /// Resolves once every task spawned before the call has finished.
    pub async fn wait_idle(&self) {
        self.tracker.close();
        self.tracker.wait().await;
        self.tracker.reopen();
    }
}
