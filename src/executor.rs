use std::future::Future;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{AcquireError, Semaphore};
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, warn};

#[derive(Error, Debug)]
#[error("Worker pool closed: {0}")]
pub struct PoolError(#[from] AcquireError);

/// Fixed-size pool of async workers.
///
/// [`submit`](Self::submit) waits for a free slot before spawning, so a
/// saturated pool pushes back on the caller instead of queueing.
pub struct WorkerPool<T> {
    semaphore: Arc<Semaphore>,
    tasks: JoinSet<T>,
    completed: Vec<T>,
    panicked: usize,
}

impl<T: Send + 'static> WorkerPool<T> {
    pub fn new(concurrency_limit: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(concurrency_limit)),
            tasks: JoinSet::new(),
            completed: Vec::new(),
            panicked: 0,
        }
    }

    /// Spawns `task` once a slot is free. The slot is held until the task ends.
    pub async fn submit<F>(&mut self, task: F) -> Result<(), PoolError>
    where
        F: Future<Output = T> + Send + 'static,
    {
        let permit = Arc::clone(&self.semaphore).acquire_owned().await?;
        self.tasks.spawn(async move {
            let _permit = permit;
            task.await
        });
        self.reap();
        Ok(())
    }

    /// Number of free slots.
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Takes the outputs of tasks finished so far.
    pub fn drain_completed(&mut self) -> Vec<T> {
        self.reap();
        std::mem::take(&mut self.completed)
    }

    /// Waits for every in-flight task and returns all outputs not yet drained.
    pub async fn join(mut self) -> Vec<T> {
        while let Some(result) = self.tasks.join_next().await {
            self.collect(result);
        }
        if self.panicked > 0 {
            warn!(panicked = self.panicked, "Some workers panicked");
        }
        self.completed
    }

    fn reap(&mut self) {
        while let Some(result) = self.tasks.try_join_next() {
            self.collect(result);
        }
    }

    fn collect(&mut self, result: Result<T, JoinError>) {
        match result {
            Ok(output) => self.completed.push(output),
            Err(e) => {
                self.panicked += 1;
                debug!(error = %e, "Worker task failed");
            }
        }
    }
}
