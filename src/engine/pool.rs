//! Bounded worker pool shared by the scheduler and the job queue.
//!
//! A [`Claim`] is a held worker permit plus the in-flight marker for one
//! work item. Holding the claim is what guarantees a work item never runs
//! twice at once, whichever path dispatched it.

use std::future::Future;
use std::sync::Arc;

use dashmap::DashSet;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::task::TaskTracker;

use crate::model::work::WorkItem;

#[derive(Clone)]
pub struct WorkerPool {
    permits: Arc<Semaphore>,
    in_flight: Arc<DashSet<WorkItem>>,
    tasks: TaskTracker,
    capacity: usize,
}

impl WorkerPool {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            permits: Arc::new(Semaphore::new(capacity)),
            in_flight: Arc::new(DashSet::new()),
            tasks: TaskTracker::new(),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Free worker slots right now.
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    pub fn is_in_flight(&self, item: &WorkItem) -> bool {
        self.in_flight.contains(item)
    }

    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }

    /// Claim a worker for `item`. `None` if the item is already running or
    /// every worker is busy.
    pub fn try_claim(&self, item: &WorkItem) -> Option<Claim> {
        if !self.in_flight.insert(item.clone()) {
            return None;
        }
        match Arc::clone(&self.permits).try_acquire_owned() {
            Ok(permit) => Some(Claim {
                item: item.clone(),
                _permit: permit,
                in_flight: Arc::clone(&self.in_flight),
            }),
            Err(_) => {
                self.in_flight.remove(item);
                None
            }
        }
    }

    /// Spawn a task tracked by the pool.
    pub fn spawn<F>(&self, task: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        self.tasks.spawn(task)
    }

    /// Mark the pool closed so [`wait`](Self::wait) returns once drained.
    pub fn close(&self) {
        self.tasks.close();
    }

    /// Wait for every spawned task. Only returns after [`close`](Self::close).
    pub async fn wait(&self) {
        self.tasks.wait().await;
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("capacity", &self.capacity)
            .field("available", &self.available())
            .field("in_flight", &self.in_flight_count())
            .finish()
    }
}

/// Exclusive right to run one work item on one worker. Released on drop.
pub struct Claim {
    item: WorkItem,
    _permit: OwnedSemaphorePermit,
    in_flight: Arc<DashSet<WorkItem>>,
}

impl Claim {
    pub fn item(&self) -> &WorkItem {
        &self.item
    }
}

impl Drop for Claim {
    fn drop(&mut self) {
        self.in_flight.remove(&self.item);
    }
}

impl std::fmt::Debug for Claim {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Claim").field(&self.item).finish()
    }
}
