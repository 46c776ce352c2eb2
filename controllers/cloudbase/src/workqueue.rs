//! Deduplicating, delay-capable work queue.
//!
//! Decouples event arrival from reconcile execution. Semantics:
//!
//! - An item added while already pending collapses into the existing entry
//!   (at-least-once delivery, so consumers must tolerate redundant runs).
//! - An item added while being processed is marked dirty and re-queued when
//!   its worker calls [`WorkQueue::done`]. As long as workers call `done`
//!   only after finishing, no two workers ever process the same item
//!   concurrently.
//! - Pending items are FIFO; delayed re-adds land at their scheduled time.
//!
//! The queue also keeps per-item consecutive failure counts so the worker
//! pool can compute backoff delays without carrying state in the items.

use std::collections::{HashMap, HashSet, VecDeque};
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::Notify;
use tracing::debug;

struct Inner<T> {
    queue: VecDeque<T>,
    dirty: HashSet<T>,
    processing: HashSet<T>,
    failures: HashMap<T, u32>,
    shut_down: bool,
}

/// Work queue of deduplicated items.
pub struct WorkQueue<T> {
    inner: Mutex<Inner<T>>,
    notify: Notify,
}

impl<T> WorkQueue<T>
where
    T: Clone + Eq + Hash + std::fmt::Debug + Send + Sync + 'static,
{
    /// Create an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                queue: VecDeque::new(),
                dirty: HashSet::new(),
                processing: HashSet::new(),
                failures: HashMap::new(),
                shut_down: false,
            }),
            notify: Notify::new(),
        }
    }

    fn locked(&self) -> MutexGuard<'_, Inner<T>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Enqueue an item unless it is already pending.
    ///
    /// An item currently being processed is not re-queued here; it is
    /// marked dirty and comes back when its worker calls [`Self::done`].
    pub fn add(&self, item: T) {
        let mut inner = self.locked();
        if inner.shut_down {
            return;
        }
        if !inner.dirty.insert(item.clone()) {
            return;
        }
        if inner.processing.contains(&item) {
            return;
        }
        inner.queue.push_back(item);
        drop(inner);
        self.notify.notify_one();
    }

    /// Dequeue the next item, waiting until one is available.
    ///
    /// Returns `None` once the queue has been shut down; remaining entries
    /// are abandoned, never delivered.
    pub async fn get(&self) -> Option<T> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            // Register before checking state, so a notify between the check
            // and the await still wakes us.
            notified.as_mut().enable();
            {
                let mut inner = self.locked();
                if inner.shut_down {
                    return None;
                }
                if let Some(item) = inner.queue.pop_front() {
                    inner.dirty.remove(&item);
                    inner.processing.insert(item.clone());
                    return Some(item);
                }
            }
            notified.await;
        }
    }

    /// Mark an item finished. If it went dirty while being processed it is
    /// re-queued immediately.
    pub fn done(&self, item: &T) {
        let mut inner = self.locked();
        inner.processing.remove(item);
        let requeued = if inner.dirty.contains(item) && !inner.shut_down {
            inner.queue.push_back(item.clone());
            true
        } else {
            false
        };
        drop(inner);
        if requeued {
            debug!("Item {:?} went dirty while processing, re-queued", item);
            self.notify.notify_one();
        }
    }

    /// Enqueue an item after a delay. A zero delay adds immediately.
    pub fn add_after(self: Arc<Self>, item: T, delay: Duration) {
        if delay.is_zero() {
            self.add(item);
            return;
        }
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            self.add(item);
        });
    }

    /// Record a failed attempt, returning the consecutive failure count.
    pub fn record_failure(&self, item: &T) -> u32 {
        let mut inner = self.locked();
        let count = inner.failures.entry(item.clone()).or_insert(0);
        *count += 1;
        *count
    }

    /// Clear failure accounting for an item after a success.
    pub fn forget(&self, item: &T) {
        self.locked().failures.remove(item);
    }

    /// Number of items waiting to be dequeued.
    #[must_use]
    pub fn len(&self) -> usize {
        self.locked().queue.len()
    }

    /// True when nothing is waiting to be dequeued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stop accepting and delivering work, waking every blocked getter.
    pub fn shut_down(&self) {
        let mut inner = self.locked();
        inner.shut_down = true;
        drop(inner);
        self.notify.notify_waiters();
    }
}

impl<T> Default for WorkQueue<T>
where
    T: Clone + Eq + Hash + std::fmt::Debug + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}
