//! Named bounded-concurrency executor pools for compaction jobs.
//!
//! A pool runs a fixed number of worker tasks draining a rendezvous channel,
//! so submission waits for a free worker instead of queueing unbounded work.

use std::{collections::HashMap, fmt, future::Future, pin::Pin, sync::Arc};

use crate::{error::CompactionError, logging::tessera_log};

/// Work item executed by a pool worker.
pub(crate) type JobFuture = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Opaque handle to an executor pool.
///
/// Stable for the lifetime of the owning compaction service instantiation.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ExecutorPoolId(Arc<str>);

impl ExecutorPoolId {
    pub(crate) fn scoped(service: &str, name: &str) -> Self {
        Self(Arc::from(format!("{service}.{name}")))
    }

    /// The scoped `service.pool` name.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ExecutorPoolId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Bounded-concurrency worker resource jobs are submitted to.
pub(crate) struct ExecutorPool {
    id: ExecutorPoolId,
    capacity: usize,
    tx: flume::Sender<JobFuture>,
}

impl ExecutorPool {
    /// Start `capacity` workers. Workers exit once the pool is dropped and
    /// their current job finishes.
    pub(crate) fn start(id: ExecutorPoolId, capacity: usize) -> Arc<Self> {
        let capacity = capacity.max(1);
        let (tx, rx) = flume::bounded::<JobFuture>(0);
        for _ in 0..capacity {
            let rx = rx.clone();
            tokio::spawn(async move {
                while let Ok(job) = rx.recv_async().await {
                    job.await;
                }
            });
        }
        tessera_log!(
            log::Level::Debug,
            "pool_started",
            "pool={id} capacity={capacity}"
        );
        Arc::new(Self { id, capacity, tx })
    }

    #[allow(dead_code)]
    pub(crate) fn capacity(&self) -> usize {
        self.capacity
    }

    /// Hand a job to a worker; waits while the pool is saturated.
    pub(crate) async fn submit(&self, job: JobFuture) -> Result<(), CompactionError> {
        self.tx
            .send_async(job)
            .await
            .map_err(|_| CompactionError::PoolClosed)
    }
}

impl Drop for ExecutorPool {
    fn drop(&mut self) {
        // Workers drain their current job and exit once the channel closes.
        tessera_log!(log::Level::Debug, "pool_closed", "pool={}", self.id);
    }
}

/// Factory a planner uses during `init` to declare its pools.
pub struct ExecutorManager {
    service: String,
    pools: HashMap<ExecutorPoolId, Arc<ExecutorPool>>,
}

impl ExecutorManager {
    pub(crate) fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            pools: HashMap::new(),
        }
    }

    /// Declare a pool with the given name and concurrency capacity.
    ///
    /// Redeclaring a name returns the already-created pool's id.
    pub fn create_executor(&mut self, name: &str, capacity: usize) -> ExecutorPoolId {
        let id = ExecutorPoolId::scoped(&self.service, name);
        if !self.pools.contains_key(&id) {
            let pool = ExecutorPool::start(id.clone(), capacity);
            self.pools.insert(id.clone(), pool);
        }
        id
    }

    pub(crate) fn into_pools(self) -> HashMap<ExecutorPoolId, Arc<ExecutorPool>> {
        self.pools
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn runs_at_most_capacity_jobs_concurrently() {
        let pool = ExecutorPool::start(ExecutorPoolId::scoped("svc", "e0"), 2);
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let (done_tx, done_rx) = flume::unbounded::<()>();

        for _ in 0..6 {
            let active = Arc::clone(&active);
            let peak = Arc::clone(&peak);
            let done_tx = done_tx.clone();
            pool.submit(Box::pin(async move {
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(10)).await;
                active.fetch_sub(1, Ordering::SeqCst);
                let _ = done_tx.send(());
            }))
            .await
            .expect("submit");
        }
        for _ in 0..6 {
            done_rx.recv_async().await.expect("job done");
        }
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn saturated_pool_blocks_submission() {
        let pool = ExecutorPool::start(ExecutorPoolId::scoped("svc", "e0"), 1);
        let (gate_tx, gate_rx) = flume::bounded::<()>(1);
        pool.submit(Box::pin(async move {
            let _ = gate_rx.recv_async().await;
        }))
        .await
        .expect("submit");

        // The single worker is occupied, so the next submission must wait.
        let blocked = tokio::time::timeout(
            Duration::from_millis(50),
            pool.submit(Box::pin(async {})),
        )
        .await;
        assert!(blocked.is_err());

        gate_tx.send(()).expect("release gate");
    }

    #[tokio::test]
    async fn manager_reuses_pool_names() {
        let mut manager = ExecutorManager::new("svc");
        let a = manager.create_executor("e0", 2);
        let b = manager.create_executor("e0", 4);
        let c = manager.create_executor("e1", 2);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(manager.into_pools().len(), 2);
    }
}
