//! Worker pool draining the work queue.
//!
//! Dispatch is gated on leadership: workers sit idle without the lease,
//! and an item dequeued across a leadership flip is put back untouched.
//! `done` runs only after a pass completes, which is the discipline that
//! keeps two workers off the same identity.

use std::sync::Arc;

use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Service;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::backoff;
use crate::cluster::ObjectClient;
use crate::metrics::Metrics;
use crate::reconciler::{Reconciler, Requeue, Request};
use crate::workqueue::WorkQueue;
use crds::CloudBaseMain;

/// Fixed-size pool of reconcile workers.
pub struct WorkerPool<C> {
    queue: Arc<WorkQueue<Request>>,
    reconciler: Arc<Reconciler<C>>,
    leadership: watch::Receiver<bool>,
    metrics: Metrics,
}

impl<C> WorkerPool<C>
where
    C: ObjectClient<CloudBaseMain> + ObjectClient<Deployment> + ObjectClient<Service> + 'static,
{
    /// Creates the pool; workers start on [`Self::spawn`].
    pub fn new(
        queue: Arc<WorkQueue<Request>>,
        reconciler: Arc<Reconciler<C>>,
        leadership: watch::Receiver<bool>,
        metrics: Metrics,
    ) -> Self {
        Self {
            queue,
            reconciler,
            leadership,
            metrics,
        }
    }

    /// Spawn `count` workers. Handles resolve once the queue shuts down or
    /// the leadership channel closes.
    pub fn spawn(&self, count: usize) -> Vec<JoinHandle<()>> {
        (0..count)
            .map(|id| {
                let queue = Arc::clone(&self.queue);
                let reconciler = Arc::clone(&self.reconciler);
                let leadership = self.leadership.clone();
                let metrics = self.metrics.clone();
                tokio::spawn(worker_loop(id, queue, reconciler, leadership, metrics))
            })
            .collect()
    }
}

pub(crate) async fn worker_loop<C>(
    id: usize,
    queue: Arc<WorkQueue<Request>>,
    reconciler: Arc<Reconciler<C>>,
    mut leadership: watch::Receiver<bool>,
    metrics: Metrics,
) where
    C: ObjectClient<CloudBaseMain> + ObjectClient<Deployment> + ObjectClient<Service> + 'static,
{
    info!("Worker {} started", id);
    loop {
        // only the leaseholder dispatches writes
        if leadership.wait_for(|leader| *leader).await.is_err() {
            break;
        }

        let Some(request) = queue.get().await else {
            break;
        };

        if !*leadership.borrow() {
            // lost the lease while blocked on the queue: put the item back
            // untouched for whoever leads next
            debug!("Worker {} dequeued {} without leadership, re-queueing", id, request);
            queue.add(request.clone());
            queue.done(&request);
            continue;
        }

        metrics.reconciles.inc();
        match reconciler.reconcile(&request).await {
            Ok(Requeue::No) => {
                queue.forget(&request);
            }
            Ok(Requeue::Immediate) => {
                metrics.requeues.inc();
                queue.add(request.clone());
            }
            Ok(Requeue::Backoff) => {
                metrics.requeues.inc();
                let attempt = queue.record_failure(&request);
                let delay = backoff::delay_for_attempt(attempt);
                debug!(
                    "Requeueing {} in {:?} (attempt {})",
                    request, delay, attempt
                );
                Arc::clone(&queue).add_after(request.clone(), delay);
            }
            Err(e) => {
                // terminal for this spec revision; the next edit re-enqueues
                // through the watch
                metrics.reconcile_failures.inc();
                error!("Reconcile of {} failed terminally: {}", request, e);
                queue.forget(&request);
            }
        }
        queue.done(&request);
    }
    info!("Worker {} stopped", id);
}
