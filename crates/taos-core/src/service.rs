// Copyright (C) 2025 The taos Authors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Cluster service: the public request surface of the engine.

use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, instrument};

use crate::cluster::{Cluster, ClusterField, ClusterStatus, NewCluster};
use crate::config::DEFAULT_CLUSTER_TIMEOUT;
use crate::context::{RequestContext, parse_duration};
use crate::error::{Error, Result};
use crate::persistence::ClusterStore;
use crate::scheduler::{Operation, WorkItem, WorkflowScheduler};

/// Creates, reads and deletes clusters.
///
/// Create and delete persist their first transition synchronously and hand
/// the rest of the work to the scheduler; they return without waiting for
/// the executor.
#[derive(Clone)]
pub struct ClusterService {
    store: Arc<dyn ClusterStore>,
    scheduler: Arc<dyn WorkflowScheduler>,
    default_timeout: Duration,
}

impl ClusterService {
    /// Create a service using [`DEFAULT_CLUSTER_TIMEOUT`].
    pub fn new(store: Arc<dyn ClusterStore>, scheduler: Arc<dyn WorkflowScheduler>) -> Self {
        Self {
            store,
            scheduler,
            default_timeout: DEFAULT_CLUSTER_TIMEOUT,
        }
    }

    /// Timeout applied when a request carries none.
    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    /// The backing store.
    pub fn store(&self) -> &Arc<dyn ClusterStore> {
        &self.store
    }

    /// Create a cluster and start provisioning it.
    ///
    /// Returns the cluster in status `provisioning`. If a delete claims the
    /// cluster before provisioning starts, the cluster is returned as stored
    /// and no provision is scheduled. A payload the executor cannot parse is
    /// not rejected here; it ends in `provision_failed`.
    #[instrument(skip_all, fields(request_id = %ctx.request_id()))]
    pub async fn create_cluster(&self, ctx: &RequestContext) -> Result<Cluster> {
        let request_id = ctx.request_id();
        let new = self.new_cluster(ctx)?;

        let mut cluster = self.store.create_cluster(&new, request_id).await?;
        info!(cluster_id = %cluster.id, name = %cluster.name, "Cluster requested");

        let promoted = self
            .store
            .transition_status(
                &cluster.id,
                ClusterStatus::Requested,
                ClusterStatus::Provisioning,
                request_id,
            )
            .await?;
        if !promoted {
            // A delete took the cluster first and owns its workflow
            let current = self.store.get_cluster(&cluster.id, request_id).await?;
            info!(
                cluster_id = %cluster.id,
                status = %current.status,
                "Cluster left requested before provisioning started"
            );
            return Ok(current);
        }
        cluster.status = ClusterStatus::Provisioning;

        self.hand_off(&cluster, Operation::Provision, request_id)
            .await?;
        Ok(cluster)
    }

    /// Fetch one cluster.
    pub async fn get_cluster(&self, request_id: &str, id: &str) -> Result<Cluster> {
        self.store.get_cluster(id, request_id).await
    }

    /// List every cluster, oldest first.
    pub async fn get_clusters(&self, request_id: &str) -> Result<Vec<Cluster>> {
        self.store.get_clusters(request_id).await
    }

    /// Start destroying a cluster.
    ///
    /// Returns the cluster in status `destroying`. Fails with
    /// [`Error::NotFound`], [`Error::AlreadyDestroyed`] or
    /// [`Error::WorkflowInProgress`] without changing the record.
    #[instrument(skip(self))]
    pub async fn delete_cluster(&self, request_id: &str, id: &str) -> Result<Cluster> {
        let mut cluster = self.store.delete_cluster(id, request_id).await?;
        info!(previous_status = %cluster.status, "Cluster destroy requested");
        cluster.status = ClusterStatus::Destroying;

        self.hand_off(&cluster, Operation::Destroy, request_id)
            .await?;
        Ok(cluster)
    }

    fn new_cluster(&self, ctx: &RequestContext) -> Result<NewCluster> {
        if ctx.terraform_config().is_empty() {
            return Err(Error::InvalidRequest(
                "terraform config is required".to_string(),
            ));
        }

        let timeout = match ctx.timeout().trim() {
            "" => self.default_timeout,
            raw => parse_duration(raw)
                .map_err(|e| Error::InvalidRequest(format!("invalid timeout {:?}: {}", raw, e)))?,
        };
        if timeout.is_zero() {
            return Err(Error::InvalidRequest("timeout must be positive".to_string()));
        }

        Ok(NewCluster {
            name: ctx.name().map(str::to_string),
            terraform_config: ctx.terraform_config().to_vec(),
            timeout,
            project: ctx.project().to_string(),
            region: ctx.region().to_string(),
        })
    }

    /// Enqueue the workflow; if the queue is closed, settle the cluster as failed.
    async fn hand_off(&self, cluster: &Cluster, operation: Operation, request_id: &str) -> Result<()> {
        let item = WorkItem {
            cluster_id: cluster.id.clone(),
            operation,
            request_id: request_id.to_string(),
        };

        let Err(e) = self.scheduler.schedule(item).await else {
            return Ok(());
        };

        error!(cluster_id = %cluster.id, error = %e, "Failed to schedule workflow");
        let failed = match operation {
            Operation::Provision => ClusterStatus::ProvisionFailed,
            Operation::Destroy => ClusterStatus::DestroyFailed,
        };
        self.store
            .update_cluster_field(
                &cluster.id,
                ClusterField::Message(format!("{} was not started: {}", operation, e)),
                request_id,
            )
            .await?;
        self.store
            .update_cluster_field(&cluster.id, ClusterField::Status(failed), request_id)
            .await?;

        Err(match e {
            Error::Scheduler(_) => e,
            other => Error::Scheduler(other.to_string()),
        })
    }
}
