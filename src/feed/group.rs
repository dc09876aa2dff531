use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::{Semaphore, SemaphorePermit};

use super::breaker::{CircuitBreaker, Clock, MonotonicClock};
use crate::config::{BreakerConfig, FetchConfig};

/// Isolation boundary for one class of outbound calls.
///
/// Owns a bounded worker pool (semaphore permits), a bounded queue of
/// callers waiting for a worker, and the circuit breaker for the group.
/// Nothing outside the group shares these, so a slow or failing set of feed
/// hosts cannot exhaust capacity used elsewhere.
pub struct ResourceGroup {
    name: Arc<str>,
    workers: Semaphore,
    pool_size: usize,
    queue_depth: usize,
    waiting: AtomicUsize,
    breaker: CircuitBreaker,
}

/// Decrements the wait counter even if the waiting future is dropped.
struct QueueSlot<'a>(&'a AtomicUsize);

impl Drop for QueueSlot<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

impl ResourceGroup {
    pub fn new(
        name: &str,
        pool_size: usize,
        queue_depth: usize,
        breaker: &BreakerConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let pool_size = pool_size.max(1);
        Self {
            name: Arc::from(name),
            workers: Semaphore::new(pool_size),
            pool_size,
            queue_depth,
            waiting: AtomicUsize::new(0),
            breaker: CircuitBreaker::new(name, breaker, clock),
        }
    }

    /// Build the fetch group from configuration, on the monotonic clock.
    pub fn from_config(fetch: &FetchConfig, breaker: &BreakerConfig) -> Self {
        Self::new(
            &fetch.group,
            fetch.worker_pool_size,
            fetch.queue_depth,
            breaker,
            Arc::new(MonotonicClock),
        )
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    /// Workers currently running a call.
    pub fn active_workers(&self) -> usize {
        self.pool_size - self.workers.available_permits()
    }

    /// Claim a worker, waiting in the queue if the pool is busy.
    ///
    /// Returns `None` when the queue is already at `queue_depth`; the caller
    /// treats that exactly like a timed-out call.
    pub async fn acquire_worker(&self) -> Option<SemaphorePermit<'_>> {
        if let Ok(permit) = self.workers.try_acquire() {
            return Some(permit);
        }

        let queued = self.waiting.fetch_add(1, Ordering::AcqRel) + 1;
        let _slot = QueueSlot(&self.waiting);
        if queued > self.queue_depth {
            tracing::debug!(
                group = %self.name,
                queue_depth = self.queue_depth,
                "Worker queue full, rejecting call"
            );
            return None;
        }

        self.workers.acquire().await.ok()
    }
}
