//! CloudBaseMain watch stream feeding the work queue.
//!
//! Events only enqueue identities; dedup, backoff, and dispatch belong to
//! the queue and the worker pool. Deletions are enqueued too: the
//! reconciler observes the resource as gone and finishes cleanly.

use std::sync::Arc;
use std::time::Duration;

use futures::TryStreamExt;
use kube::Api;
use kube_runtime::watcher;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::reconciler::Request;
use crate::workqueue::WorkQueue;
use crds::CloudBaseMain;

const RESTART_DELAY: Duration = Duration::from_secs(5);

/// Watches CloudBaseMain resources and enqueues reconcile requests.
pub struct Watcher {
    api: Api<CloudBaseMain>,
    queue: Arc<WorkQueue<Request>>,
}

impl Watcher {
    /// Creates a new watcher feeding the given queue.
    pub fn new(api: Api<CloudBaseMain>, queue: Arc<WorkQueue<Request>>) -> Self {
        Self { api, queue }
    }

    /// Watch until shutdown, re-establishing the stream after errors.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!("Starting CloudBaseMain watcher");
        loop {
            let mut restart_shutdown = shutdown.clone();
            tokio::select! {
                _ = async { let _ = shutdown.wait_for(|stop| *stop).await; } => {
                    info!("Watcher stopping");
                    return;
                }
                result = self.watch_stream() => {
                    match result {
                        Ok(()) => {
                            warn!("Watch stream ended, restarting in {:?}", RESTART_DELAY);
                        }
                        Err(e) => {
                            warn!("Watch stream error: {}, restarting in {:?}", e, RESTART_DELAY);
                        }
                    }
                    tokio::select! {
                        _ = async { let _ = restart_shutdown.wait_for(|stop| *stop).await; } => {
                            info!("Watcher stopping");
                            return;
                        }
                        _ = tokio::time::sleep(RESTART_DELAY) => {}
                    }
                }
            }
        }
    }

    async fn watch_stream(&self) -> Result<(), watcher::Error> {
        let mut stream = Box::pin(watcher(self.api.clone(), watcher::Config::default()));

        while let Some(event) = stream.try_next().await? {
            match event {
                watcher::Event::Apply(workload) => {
                    self.enqueue(&workload, "applied");
                }
                watcher::Event::Delete(workload) => {
                    self.enqueue(&workload, "deleted");
                }
                watcher::Event::Init => {
                    debug!("Watch initializing");
                }
                watcher::Event::InitApply(workload) => {
                    self.enqueue(&workload, "listed");
                }
                watcher::Event::InitDone => {
                    info!("Watch initialization complete");
                }
            }
        }

        Ok(())
    }

    fn enqueue(&self, workload: &CloudBaseMain, cause: &str) {
        let Some(name) = workload.metadata.name.as_deref() else {
            warn!("Ignoring {} CloudBaseMain without a name", cause);
            return;
        };
        let namespace = workload.metadata.namespace.as_deref().unwrap_or("default");
        debug!("CloudBaseMain {}/{} {}, enqueueing", namespace, name, cause);
        self.queue.add(Request::new(namespace, name));
    }
}
