// Copyright (C) 2025 The taos Authors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Common test infrastructure for taos-core integration tests.
//!
//! Provides TestContext wiring an in-memory store, a mock executor and a
//! running workflow worker behind a ClusterService.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use taos_core::cluster::{Cluster, ClusterStatus};
use taos_core::executor::{MockExecutor, MockExecutorFactory};
use taos_core::persistence::{ClusterStore, InMemoryClusterStore};
use taos_core::scheduler::ChannelScheduler;
use taos_core::service::ClusterService;
use taos_core::workflow::WorkflowRunner;
use taos_core::{RequestContext, Result};
use tokio::sync::Notify;
use tokio::task::JoinHandle;

/// Config whose only output is `foo = "bar"`.
pub const VALID_CONFIG: &[u8] =
    br#"{"provider":{"google":{}},"output":{"foo":{"value":"bar"}}}"#;

/// Request id used by tests that do not care about correlation.
pub const REQUEST_ID: &str = "a19e2758-0ec5-11e8-ba89-0ed5f89f718b";

pub const PROJECT: &str = "valid-project-name";
pub const REGION: &str = "valid-region";

/// Test context that manages the store, executor factory and worker.
pub struct TestContext {
    pub store: Arc<InMemoryClusterStore>,
    pub factory: Arc<MockExecutorFactory>,
    pub service: ClusterService,
    worker_shutdown: Arc<Notify>,
    worker_handle: JoinHandle<()>,
}

impl TestContext {
    /// Context with an empty store.
    pub fn new(executor: MockExecutor) -> Self {
        Self::with_store(InMemoryClusterStore::new(), executor)
    }

    /// Context over a pre-seeded store.
    pub fn with_store(store: InMemoryClusterStore, executor: MockExecutor) -> Self {
        let store = Arc::new(store);
        let factory = Arc::new(MockExecutorFactory::new(executor));
        let runner = WorkflowRunner::new(store.clone(), factory.clone());
        let (scheduler, worker) = ChannelScheduler::new(runner, Duration::from_secs(1));
        let worker_shutdown = worker.shutdown_handle();
        let worker_handle = tokio::spawn(worker.run());
        let service = ClusterService::new(store.clone(), Arc::new(scheduler));

        Self {
            store,
            factory,
            service,
            worker_shutdown,
            worker_handle,
        }
    }

    /// Stop the worker and wait for it to drain.
    pub async fn shutdown(self) {
        self.worker_shutdown.notify_one();
        self.worker_handle.await.expect("worker task panicked");
    }
}

/// A valid create request.
pub fn create_request() -> RequestContext {
    RequestContext::new(REQUEST_ID)
        .with_terraform_config(VALID_CONFIG.to_vec())
        .with_timeout("10m")
        .with_project(PROJECT)
        .with_region(REGION)
}

/// Poll the service until the cluster reaches `status` or the wait times out.
pub async fn wait_for_status(
    service: &ClusterService,
    id: &str,
    status: ClusterStatus,
) -> Result<Cluster> {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let cluster = service.get_cluster(REQUEST_ID, id).await?;
        if cluster.status == status || tokio::time::Instant::now() >= deadline {
            return Ok(cluster);
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Poll until the cluster leaves its transient statuses.
pub async fn wait_until_settled(service: &ClusterService, id: &str) -> Result<Cluster> {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let cluster = service.get_cluster(REQUEST_ID, id).await?;
        if !cluster.status.is_transient() || tokio::time::Instant::now() >= deadline {
            return Ok(cluster);
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Store a cluster directly through the port, bypassing the service.
pub async fn seed_cluster(store: &dyn ClusterStore, status: ClusterStatus) -> Cluster {
    let cluster = store
        .create_cluster(
            &taos_core::cluster::NewCluster {
                name: None,
                terraform_config: VALID_CONFIG.to_vec(),
                timeout: Duration::from_secs(600),
                project: PROJECT.to_string(),
                region: REGION.to_string(),
            },
            REQUEST_ID,
        )
        .await
        .expect("Failed to seed cluster");
    store
        .update_cluster_field(
            &cluster.id,
            taos_core::cluster::ClusterField::Status(status),
            REQUEST_ID,
        )
        .await
        .expect("Failed to set cluster status");
    store
        .get_cluster(&cluster.id, REQUEST_ID)
        .await
        .expect("Failed to read seeded cluster")
}
