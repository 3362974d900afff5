use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// Bounded set of worker slots. Submitted jobs queue for a permit and run on
/// the tokio runtime; the submitter never waits for them to finish.
#[derive(Clone)]
pub struct WorkerPool {
    name: &'static str,
    capacity: usize,
    permits: Arc<Semaphore>,
    tasks: Arc<Mutex<JoinSet<()>>>,
    running: Arc<AtomicUsize>,
    closed: Arc<AtomicBool>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrainReport {
    pub drained: bool,
    pub aborted: usize,
}

struct RunningSlot(Arc<AtomicUsize>);

impl RunningSlot {
    fn enter(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(Arc::clone(counter))
    }
}

impl Drop for RunningSlot {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl WorkerPool {
    pub fn new(name: &'static str, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            name,
            capacity,
            permits: Arc::new(Semaphore::new(capacity)),
            tasks: Arc::new(Mutex::new(JoinSet::new())),
            running: Arc::new(AtomicUsize::new(0)),
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Jobs currently holding a slot.
    pub fn running(&self) -> usize {
        self.running.load(Ordering::SeqCst)
    }

    /// Jobs submitted and not yet reaped, queued ones included.
    pub async fn pending(&self) -> usize {
        self.tasks.lock().await.len()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Queues `job`; returns `false` once the pool is shutting down.
    pub async fn submit<F>(&self, job: F) -> bool
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if self.is_closed() {
            return false;
        }
        let permits = Arc::clone(&self.permits);
        let running = Arc::clone(&self.running);
        let mut tasks = self.tasks.lock().await;
        // shutdown may have taken the set while we waited for the lock.
        if self.is_closed() {
            return false;
        }
        while tasks.try_join_next().is_some() {}
        tasks.spawn(async move {
            let Ok(_permit) = permits.acquire_owned().await else {
                return;
            };
            let _slot = RunningSlot::enter(&running);
            job.await;
        });
        true
    }

    /// Stops accepting jobs and waits up to `grace` for queued and running
    /// jobs; whatever is left after that is aborted.
    pub async fn shutdown(&self, grace: Duration) -> DrainReport {
        self.closed.store(true, Ordering::SeqCst);
        let mut tasks = std::mem::take(&mut *self.tasks.lock().await);
        let outstanding = tasks.len();
        debug!(pool = self.name, outstanding, "draining worker pool");

        let drained = tokio::time::timeout(grace, async {
            while tasks.join_next().await.is_some() {}
        })
        .await
        .is_ok();

        let aborted = tasks.len();
        if !drained {
            warn!(pool = self.name, aborted, ?grace, "worker pool did not drain in time, aborting");
            tasks.abort_all();
            while tasks.join_next().await.is_some() {}
        }
        self.permits.close();
        info!(pool = self.name, drained, "worker pool stopped");
        DrainReport { drained, aborted }
    }
}
