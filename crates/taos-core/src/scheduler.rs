// Copyright (C) 2025 The taos Authors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Hand-off of workflows from request handling to background execution.
//!
//! Requests perform their synchronous write and then enqueue a [`WorkItem`].
//! [`ChannelScheduler`] feeds a [`WorkflowWorker`] over an unbounded channel;
//! the worker runs every workflow as its own task so workflows proceed
//! concurrently and outlive the request that started them.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Notify, mpsc};
use tokio::task::{AbortHandle, JoinSet};
use tracing::{debug, error, info, warn};

use crate::error::{Error, Result};
use crate::workflow::WorkflowRunner;

/// Default time in-flight workflows get to finish at shutdown.
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

/// Workflow kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    /// Bring infrastructure up.
    Provision,
    /// Tear infrastructure down.
    Destroy,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Provision => f.write_str("provision"),
            Self::Destroy => f.write_str("destroy"),
        }
    }
}

/// A unit of background work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkItem {
    /// Cluster the workflow acts on.
    pub cluster_id: String,
    /// Which workflow to run.
    pub operation: Operation,
    /// Correlation token of the originating request.
    pub request_id: String,
}

/// Accepts work items for asynchronous execution.
#[async_trait]
pub trait WorkflowScheduler: Send + Sync {
    /// Enqueue a work item. Fails with [`Error::Scheduler`] when no longer accepting work.
    async fn schedule(&self, item: WorkItem) -> Result<()>;
}

/// Scheduler backed by an unbounded mpsc channel.
#[derive(Clone)]
pub struct ChannelScheduler {
    sender: mpsc::UnboundedSender<WorkItem>,
}

impl ChannelScheduler {
    /// Create a scheduler and the worker that consumes its queue.
    pub fn new(runner: WorkflowRunner, shutdown_grace: Duration) -> (Self, WorkflowWorker) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let worker = WorkflowWorker {
            receiver,
            runner,
            shutdown: Arc::new(Notify::new()),
            shutdown_grace,
        };
        (Self { sender }, worker)
    }
}

#[async_trait]
impl WorkflowScheduler for ChannelScheduler {
    async fn schedule(&self, item: WorkItem) -> Result<()> {
        debug!(
            cluster_id = %item.cluster_id,
            operation = %item.operation,
            request_id = %item.request_id,
            "Scheduling workflow"
        );
        self.sender
            .send(item)
            .map_err(|_| Error::Scheduler("workflow worker is not running".to_string()))
    }
}

/// Background consumer of the [`ChannelScheduler`] queue.
pub struct WorkflowWorker {
    receiver: mpsc::UnboundedReceiver<WorkItem>,
    runner: WorkflowRunner,
    shutdown: Arc<Notify>,
    shutdown_grace: Duration,
}

impl WorkflowWorker {
    /// Get a handle that can be used to signal shutdown.
    pub fn shutdown_handle(&self) -> Arc<Notify> {
        self.shutdown.clone()
    }

    /// Run the worker loop until shutdown is signalled or every scheduler is dropped.
    ///
    /// On exit, in-flight workflows get `shutdown_grace` to finish and are
    /// aborted after that.
    pub async fn run(mut self) {
        info!(
            shutdown_grace_secs = self.shutdown_grace.as_secs(),
            "Workflow worker started"
        );

        let mut tasks: JoinSet<()> = JoinSet::new();
        let mut active: HashMap<String, AbortHandle> = HashMap::new();

        loop {
            tokio::select! {
                biased;

                _ = self.shutdown.notified() => {
                    info!("Workflow worker received shutdown signal");
                    break;
                }

                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    if let Err(e) = joined {
                        error!(error = %e, "Workflow task panicked");
                    }
                    active.retain(|_, handle| !handle.is_finished());
                }

                item = self.receiver.recv() => {
                    let Some(item) = item else {
                        debug!("All schedulers dropped");
                        break;
                    };
                    self.spawn(&mut tasks, &mut active, item);
                }
            }
        }

        self.receiver.close();
        self.drain(tasks).await;
        info!("Workflow worker stopped");
    }

    fn spawn(
        &self,
        tasks: &mut JoinSet<()>,
        active: &mut HashMap<String, AbortHandle>,
        item: WorkItem,
    ) {
        if active
            .get(&item.cluster_id)
            .is_some_and(|handle| !handle.is_finished())
        {
            warn!(
                cluster_id = %item.cluster_id,
                operation = %item.operation,
                request_id = %item.request_id,
                "Workflow already active for cluster, dropping work item"
            );
            return;
        }

        let cluster_id = item.cluster_id.clone();
        let runner = self.runner.clone();
        let handle = tasks.spawn(async move {
            let cluster_id = item.cluster_id.clone();
            let operation = item.operation;
            if let Err(e) = runner.run(item).await {
                error!(
                    cluster_id = %cluster_id,
                    operation = %operation,
                    error = %e,
                    "Workflow failed to record its outcome"
                );
            }
        });
        active.insert(cluster_id, handle);
    }

    async fn drain(&self, mut tasks: JoinSet<()>) {
        if tasks.is_empty() {
            return;
        }

        info!(in_flight = tasks.len(), "Waiting for in-flight workflows");
        let drained = tokio::time::timeout(self.shutdown_grace, async {
            while let Some(joined) = tasks.join_next().await {
                if let Err(e) = joined {
                    error!(error = %e, "Workflow task panicked");
                }
            }
        })
        .await;

        if drained.is_err() {
            warn!(
                aborted = tasks.len(),
                "Shutdown grace period elapsed, aborting workflows"
            );
            tasks.shutdown().await;
        }
    }
}

/// Scheduler that runs each workflow to completion inside `schedule`.
///
/// Intended for tests that want deterministic, synchronous outcomes.
#[derive(Clone)]
pub struct InlineScheduler {
    runner: WorkflowRunner,
}

impl InlineScheduler {
    /// Create an inline scheduler.
    pub fn new(runner: WorkflowRunner) -> Self {
        Self { runner }
    }
}

#[async_trait]
impl WorkflowScheduler for InlineScheduler {
    async fn schedule(&self, item: WorkItem) -> Result<()> {
        let cluster_id = item.cluster_id.clone();
        if let Err(e) = self.runner.run(item).await {
            error!(cluster_id = %cluster_id, error = %e, "Workflow failed to record its outcome");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::{ClusterField, ClusterStatus, NewCluster};
    use crate::executor::{MockExecutor, MockExecutorFactory};
    use crate::persistence::{ClusterStore, InMemoryClusterStore};

    async fn seeded(store: &InMemoryClusterStore, status: ClusterStatus) -> String {
        let cluster = store
            .create_cluster(
                &NewCluster {
                    name: None,
                    terraform_config: br#"{"output":{}}"#.to_vec(),
                    timeout: Duration::from_secs(600),
                    project: String::new(),
                    region: String::new(),
                },
                "req",
            )
            .await
            .unwrap();
        store
            .update_cluster_field(&cluster.id, ClusterField::Status(status), "req")
            .await
            .unwrap();
        cluster.id
    }

    fn provision(cluster_id: &str) -> WorkItem {
        WorkItem {
            cluster_id: cluster_id.to_string(),
            operation: Operation::Provision,
            request_id: "req".to_string(),
        }
    }

    #[test]
    fn test_operation_display() {
        assert_eq!(Operation::Provision.to_string(), "provision");
        assert_eq!(Operation::Destroy.to_string(), "destroy");
    }

    #[tokio::test]
    async fn test_channel_scheduler_runs_workflow() {
        let store = Arc::new(InMemoryClusterStore::new());
        let factory = Arc::new(MockExecutorFactory::new(MockExecutor::new()));
        let runner = WorkflowRunner::new(store.clone(), factory);
        let (scheduler, worker) = ChannelScheduler::new(runner, Duration::from_secs(5));
        let shutdown = worker.shutdown_handle();
        let handle = tokio::spawn(worker.run());

        let id = seeded(&store, ClusterStatus::Provisioning).await;
        scheduler.schedule(provision(&id)).await.unwrap();

        let mut status = ClusterStatus::Provisioning;
        for _ in 0..100 {
            status = store.get_cluster(&id, "req").await.unwrap().status;
            if status != ClusterStatus::Provisioning {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(status, ClusterStatus::ProvisionSuccess);

        shutdown.notify_one();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_duplicate_work_item_refused() {
        let store = Arc::new(InMemoryClusterStore::new());
        let factory = Arc::new(MockExecutorFactory::new(MockExecutor::never_completing()));
        let runner = WorkflowRunner::new(store.clone(), factory.clone());
        let (scheduler, worker) = ChannelScheduler::new(runner, Duration::from_millis(10));
        let shutdown = worker.shutdown_handle();
        let handle = tokio::spawn(worker.run());

        let id = seeded(&store, ClusterStatus::Provisioning).await;
        scheduler.schedule(provision(&id)).await.unwrap();
        scheduler.schedule(provision(&id)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(factory.created(), 1);

        // The stuck workflow is aborted once the grace period runs out
        shutdown.notify_one();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
        let status = store.get_cluster(&id, "req").await.unwrap().status;
        assert_eq!(status, ClusterStatus::Provisioning);
    }

    #[tokio::test]
    async fn test_schedule_after_worker_stopped() {
        let store = Arc::new(InMemoryClusterStore::new());
        let factory = Arc::new(MockExecutorFactory::new(MockExecutor::new()));
        let runner = WorkflowRunner::new(store, factory);
        let (scheduler, worker) = ChannelScheduler::new(runner, DEFAULT_SHUTDOWN_GRACE);
        drop(worker);

        let result = scheduler.schedule(provision("any")).await;
        assert!(matches!(result, Err(Error::Scheduler(_))));
    }

    #[tokio::test]
    async fn test_inline_scheduler_completes_before_returning() {
        let store = Arc::new(InMemoryClusterStore::new());
        let factory = Arc::new(MockExecutorFactory::new(MockExecutor::new()));
        let scheduler = InlineScheduler::new(WorkflowRunner::new(store.clone(), factory));

        let id = seeded(&store, ClusterStatus::Provisioning).await;
        scheduler.schedule(provision(&id)).await.unwrap();

        let status = store.get_cluster(&id, "req").await.unwrap().status;
        assert_eq!(status, ClusterStatus::ProvisionSuccess);
    }

    #[tokio::test]
    async fn test_inline_scheduler_swallows_store_errors() {
        let store = Arc::new(InMemoryClusterStore::new());
        let factory = Arc::new(MockExecutorFactory::new(MockExecutor::new()));
        let scheduler = InlineScheduler::new(WorkflowRunner::new(store, factory));

        assert!(scheduler.schedule(provision("missing")).await.is_ok());
    }
}
