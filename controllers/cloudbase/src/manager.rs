//! Process lifecycle coordination.
//!
//! Owns the Kubernetes client, the work queue, leader election, the probe
//! and metrics servers, the watcher, the worker pool, and the trigger
//! server. Startup order matters: probes bind first so the process reports
//! healthy while waiting for the lease, writers start only behind the
//! leadership gate, the trigger binds last. Every subsystem runs as a
//! named task joined here, so a failure is attributed instead of dying
//! silently in the background.

use std::sync::Arc;

use kube::{Api, Client};
use tokio::sync::watch;
use tokio::task::{JoinError, JoinHandle};
use tracing::{error, info, warn};

use crate::cluster::{KubeCluster, ObjectClient};
use crate::error::ControllerError;
use crate::leader::LeaderElector;
use crate::metrics::Metrics;
use crate::probes;
use crate::provisioner::Provisioner;
use crate::reconciler::{Reconciler, Request};
use crate::trigger::{self, TriggerState};
use crate::watcher::Watcher;
use crate::worker::WorkerPool;
use crate::workqueue::WorkQueue;
use crds::CloudBaseMain;

/// Runtime configuration, read from the environment in `main`.
#[derive(Debug, Clone)]
pub struct Config {
    /// Metrics endpoint listen address
    pub metrics_addr: String,
    /// Health/readiness probe listen address
    pub probe_addr: String,
    /// Trigger endpoint listen address
    pub trigger_addr: String,
    /// Whether replicas contend for the leader lease
    pub enable_leader_election: bool,
    /// This replica's identity in the lease
    pub leader_identity: String,
    /// Namespace holding the leader lease
    pub lease_namespace: String,
    /// Namespace to watch; `None` watches all namespaces
    pub watch_namespace: Option<String>,
    /// Worker pool size
    pub workers: usize,
}

/// Lifecycle coordinator for the whole process.
pub struct Manager {
    config: Config,
    client: Client,
    cluster: Arc<KubeCluster>,
    queue: Arc<WorkQueue<Request>>,
    metrics: Metrics,
}

impl Manager {
    /// Construct the manager. Client construction failure is fatal.
    pub async fn new(config: Config) -> Result<Self, ControllerError> {
        info!("Initializing CloudBase operator");

        let client = Client::try_default().await?;
        let cluster = Arc::new(KubeCluster::new(client.clone()));
        let queue = Arc::new(WorkQueue::new());
        let metrics = Metrics::new()?;

        Ok(Self {
            config,
            client,
            cluster,
            queue,
            metrics,
        })
    }

    /// Run until shutdown or a fatal subsystem failure.
    pub async fn run(self) -> Result<(), ControllerError> {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (leadership_tx, leadership_rx) = watch::channel(false);

        let signal_task = {
            let shutdown_tx = shutdown_tx.clone();
            tokio::spawn(async move {
                wait_for_signal().await;
                info!("Shutdown signal received");
                let _ = shutdown_tx.send(true);
            })
        };

        // probes and metrics bind before anything else; bind failure is fatal
        let probe_listener = probes::bind(&self.config.probe_addr).await?;
        let mut probe_task = tokio::spawn(probes::serve_on(
            probe_listener,
            probes::probe_router(),
            "Probe server",
            shutdown_rx.clone(),
        ));

        let metrics_listener = probes::bind(&self.config.metrics_addr).await?;
        let mut metrics_task = tokio::spawn(probes::serve_on(
            metrics_listener,
            probes::metrics_router(self.metrics.clone()),
            "Metrics server",
            shutdown_rx.clone(),
        ));

        // leadership: contended through the lease, or granted outright
        let election_task: JoinHandle<()> = if self.config.enable_leader_election {
            let elector = LeaderElector::new(
                self.client.clone(),
                &self.config.lease_namespace,
                &self.config.leader_identity,
            );
            tokio::spawn(elector.run(leadership_tx, shutdown_rx.clone()))
        } else {
            info!("Leader election disabled, assuming leadership");
            let _ = leadership_tx.send(true);
            let mut shutdown = shutdown_rx.clone();
            // park the sender so the channel stays open until shutdown
            tokio::spawn(async move {
                let _ = shutdown.wait_for(|stop| *stop).await;
                drop(leadership_tx);
            })
        };

        // on every leadership gain, rebuild the queue from the list state
        let refill_task = {
            let cluster = Arc::clone(&self.cluster);
            let queue = Arc::clone(&self.queue);
            let namespace = self.config.watch_namespace.clone().unwrap_or_default();
            let mut leadership = leadership_rx.clone();
            tokio::spawn(async move {
                loop {
                    if leadership.wait_for(|leader| *leader).await.is_err() {
                        return;
                    }
                    enqueue_all(cluster.as_ref(), &queue, &namespace).await;
                    if leadership.wait_for(|leader| !*leader).await.is_err() {
                        return;
                    }
                }
            })
        };

        // watch feeds the queue on every replica; only dispatch is gated
        let workload_api: Api<CloudBaseMain> = match &self.config.watch_namespace {
            Some(namespace) => Api::namespaced(self.client.clone(), namespace),
            None => Api::all(self.client.clone()),
        };
        let mut watcher_task = tokio::spawn(
            Watcher::new(workload_api, Arc::clone(&self.queue)).run(shutdown_rx.clone()),
        );

        let provisioner = Provisioner::new(Arc::clone(&self.cluster));
        let reconciler = Arc::new(Reconciler::new(
            Arc::clone(&self.cluster),
            provisioner.clone(),
        ));
        let pool = WorkerPool::new(
            Arc::clone(&self.queue),
            reconciler,
            leadership_rx.clone(),
            self.metrics.clone(),
        );
        let worker_handles = pool.spawn(self.config.workers);
        info!("Started {} workers", self.config.workers);

        // trigger binds last, once the write paths exist
        let trigger_listener = probes::bind(&self.config.trigger_addr).await?;
        let mut trigger_task = tokio::spawn(probes::serve_on(
            trigger_listener,
            trigger::router(TriggerState {
                provisioner,
                leadership: leadership_rx,
                metrics: self.metrics.clone(),
            }),
            "Trigger server",
            shutdown_rx.clone(),
        ));

        info!("CloudBase operator running");

        let mut shutdown = shutdown_rx.clone();
        let failure = tokio::select! {
            _ = shutdown.wait_for(|stop| *stop) => None,
            result = &mut probe_task => Some(server_failure("probe server", result)),
            result = &mut metrics_task => Some(server_failure("metrics server", result)),
            result = &mut trigger_task => Some(server_failure("trigger server", result)),
            result = &mut watcher_task => Some(task_failure("watcher", result)),
        };

        if let Some(e) = failure {
            // cannot safely run half-initialized; tear everything down
            error!("Fatal subsystem failure: {}", e);
            let _ = shutdown_tx.send(true);
            self.queue.shut_down();
            return Err(e);
        }

        info!("Shutting down");
        self.queue.shut_down();
        for handle in worker_handles {
            let _ = handle.await;
        }
        let _ = election_task.await;
        let _ = refill_task.await;
        let _ = watcher_task.await;
        let _ = probe_task.await;
        let _ = metrics_task.await;
        let _ = trigger_task.await;
        signal_task.abort();
        info!("Shutdown complete");
        Ok(())
    }
}

/// Enqueue every CloudBaseMain the operator can see.
async fn enqueue_all<C>(cluster: &C, queue: &WorkQueue<Request>, namespace: &str)
where
    C: ObjectClient<CloudBaseMain>,
{
    match cluster.list(namespace).await {
        Ok(workloads) => {
            info!("Enqueueing {} existing workloads", workloads.len());
            for workload in workloads {
                let Some(name) = workload.metadata.name else {
                    continue;
                };
                let namespace = workload
                    .metadata
                    .namespace
                    .unwrap_or_else(|| "default".to_string());
                queue.add(Request::new(namespace, name));
            }
        }
        Err(e) => {
            // the watch's initial list covers this eventually
            warn!("Failed to list workloads for queue rebuild: {}", e);
        }
    }
}

fn server_failure(
    name: &'static str,
    result: Result<Result<(), ControllerError>, JoinError>,
) -> ControllerError {
    match result {
        Ok(Ok(())) => ControllerError::Subsystem(name, "exited unexpectedly".to_string()),
        Ok(Err(e)) => e,
        Err(e) => ControllerError::Subsystem(name, format!("panicked: {e}")),
    }
}

fn task_failure(name: &'static str, result: Result<(), JoinError>) -> ControllerError {
    match result {
        Ok(()) => ControllerError::Subsystem(name, "exited unexpectedly".to_string()),
        Err(e) => ControllerError::Subsystem(name, format!("panicked: {e}")),
    }
}

async fn wait_for_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                let _ = ctrl_c.await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = ctrl_c.await;
    }
}
