use crate::{PodFsError, PodFsResult};
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinSet;

/// Bounded pool shared by block I/O and directory fan-out.
///
/// A permit is held only while a task performs its own I/O, never while it
/// waits on child tasks, so nested fan-out cannot starve the pool.
#[derive(Clone)]
pub struct WorkerPool {
    semaphore: Arc<Semaphore>,
    size: usize,
}

impl WorkerPool {
    pub fn new(size: usize) -> Self {
        let size = size.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(size)),
            size,
        }
    }

    pub fn with_cpu_count() -> Self {
        Self::new(num_cpus::get())
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    pub async fn acquire(&self) -> PodFsResult<OwnedSemaphorePermit> {
        self.semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|e| PodFsError::Internal(format!("worker pool closed: {}", e)))
    }

    /// Run `fut` while holding one worker slot.
    pub async fn run<F: Future>(&self, fut: F) -> PodFsResult<F::Output> {
        let _permit = self.acquire().await?;
        Ok(fut.await)
    }
}

impl Default for WorkerPool {
    fn default() -> Self {
        Self::with_cpu_count()
    }
}

/// Index-keyed results of tasks running on a [`WorkerPool`].
///
/// Completion order is arbitrary; [`OrderedTasks::finish`] hands the results
/// back sorted by index. The first failure aborts every outstanding task.
pub struct OrderedTasks<T> {
    pool: WorkerPool,
    tasks: JoinSet<PodFsResult<(usize, T)>>,
    results: BTreeMap<usize, T>,
}

impl<T: Send + 'static> OrderedTasks<T> {
    pub fn new(pool: WorkerPool) -> Self {
        Self {
            pool,
            tasks: JoinSet::new(),
            results: BTreeMap::new(),
        }
    }

    /// Wait for a free worker, then start `fut` as task `index`. Fails early
    /// if an already finished task reported an error.
    pub async fn spawn<F>(&mut self, index: usize, fut: F) -> PodFsResult<()>
    where
        F: Future<Output = PodFsResult<T>> + Send + 'static,
    {
        while let Some(joined) = self.tasks.try_join_next() {
            self.collect(joined)?;
        }

        let permit = self.pool.acquire().await?;
        self.tasks.spawn(async move {
            let _permit = permit;
            fut.await.map(|value| (index, value))
        });
        Ok(())
    }

    fn collect(
        &mut self,
        joined: Result<PodFsResult<(usize, T)>, tokio::task::JoinError>,
    ) -> PodFsResult<()> {
        let outcome = match joined {
            Ok(Ok((index, value))) => {
                self.results.insert(index, value);
                return Ok(());
            }
            Ok(Err(e)) => e,
            Err(join_err) => PodFsError::Internal(format!("worker task failed: {}", join_err)),
        };
        self.tasks.abort_all();
        Err(outcome)
    }

    /// Wait for every task and return their results in index order.
    pub async fn finish(self) -> PodFsResult<Vec<T>> {
        Ok(self.finish_indexed().await?.into_values().collect())
    }

    pub async fn finish_indexed(mut self) -> PodFsResult<BTreeMap<usize, T>> {
        while let Some(joined) = self.tasks.join_next().await {
            self.collect(joined)?;
        }
        Ok(self.results)
    }

    /// Drop everything still running.
    pub fn abort(mut self) {
        self.tasks.abort_all();
    }
}
