// Copyright (C) 2025 The taos Authors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Provisioning and destruction workflows.
//!
//! A workflow reads its cluster from the store, checks the status lease,
//! drives one fresh executor through its operations and records every outcome
//! as a single-field update. The cluster's timeout is a deadline for the whole
//! workflow: once it passes, the pending executor call is dropped and the
//! cluster is marked failed.
//!
//! Status is always written last, so a reader that observes a settled status
//! also observes the state, message and outputs that belong to it.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{Instrument, debug, info, info_span, warn};

use crate::cluster::{Cluster, ClusterField, ClusterStatus};
use crate::error::Result;
use crate::executor::{self, Executor, ExecutorError, ExecutorFactory};
use crate::persistence::ClusterStore;
use crate::scheduler::{Operation, WorkItem};

/// Message recorded when a cluster is destroyed without ever having been applied.
pub const NOTHING_TO_DESTROY: &str = "No infrastructure state recorded; nothing to destroy.";

/// Executes work items against the store and a fresh executor per item.
#[derive(Clone)]
pub struct WorkflowRunner {
    store: Arc<dyn ClusterStore>,
    executor_factory: Arc<dyn ExecutorFactory>,
}

/// Deadline shared by every executor call of one workflow.
struct Deadline {
    at: Instant,
    budget: Duration,
}

impl WorkflowRunner {
    /// Create a runner.
    pub fn new(store: Arc<dyn ClusterStore>, executor_factory: Arc<dyn ExecutorFactory>) -> Self {
        Self {
            store,
            executor_factory,
        }
    }

    /// Run one work item to completion.
    ///
    /// Executor failures are recorded on the cluster and are not errors here;
    /// only failures to read or write the store are returned.
    pub async fn run(&self, item: WorkItem) -> Result<()> {
        let span = info_span!(
            "workflow",
            cluster_id = %item.cluster_id,
            operation = %item.operation,
            request_id = %item.request_id,
        );

        self.execute(&item).instrument(span).await
    }

    /// Settle clusters whose workflow died with the previous process.
    ///
    /// Must run before any workflow starts. `requested` and `provisioning`
    /// become `provision_failed`; `destroying` becomes `destroy_failed`.
    /// Returns the number of clusters settled.
    pub async fn settle_interrupted(&self, request_id: &str) -> Result<usize> {
        let mut settled = 0;

        for cluster in self.store.get_clusters(request_id).await? {
            let (operation, failed) = match cluster.status {
                ClusterStatus::Requested | ClusterStatus::Provisioning => {
                    (Operation::Provision, ClusterStatus::ProvisionFailed)
                }
                ClusterStatus::Destroying => (Operation::Destroy, ClusterStatus::DestroyFailed),
                _ => continue,
            };

            self.write(
                &cluster,
                ClusterField::Message(format!(
                    "{} interrupted: workflow did not finish before the engine stopped",
                    operation
                )),
                request_id,
            )
            .await?;
            let moved = self
                .store
                .transition_status(&cluster.id, cluster.status, failed, request_id)
                .await?;
            if moved {
                warn!(
                    cluster_id = %cluster.id,
                    previous_status = %cluster.status,
                    status = %failed,
                    "Settled interrupted workflow"
                );
                settled += 1;
            }
        }

        Ok(settled)
    }

    async fn execute(&self, item: &WorkItem) -> Result<()> {
        let cluster = self
            .store
            .get_cluster(&item.cluster_id, &item.request_id)
            .await?;

        let leased = match item.operation {
            Operation::Provision => ClusterStatus::Provisioning,
            Operation::Destroy => ClusterStatus::Destroying,
        };
        if cluster.status != leased {
            info!(
                status = %cluster.status,
                "Cluster no longer holds the workflow lease, skipping"
            );
            return Ok(());
        }

        match item.operation {
            Operation::Provision => self.provision(cluster, &item.request_id).await,
            Operation::Destroy => self.destroy(cluster, &item.request_id).await,
        }
    }

    async fn provision(&self, cluster: Cluster, request_id: &str) -> Result<()> {
        let deadline = Deadline::start(cluster.timeout);
        let mut executor = self.configured_executor(&cluster);
        debug!(executor = executor.executor_type(), "Provisioning cluster");

        if let Err(e) = deadline.bound(executor.initialize()).await {
            return self.fail(&cluster, "initialize", &e, request_id).await;
        }
        if let Err(e) = deadline.bound(executor.plan(false)).await {
            return self.fail(&cluster, "plan", &e, request_id).await;
        }

        let outcome = match deadline.bound(executor.apply()).await {
            Ok(outcome) => outcome,
            Err(e) => return self.fail(&cluster, "apply", &e, request_id).await,
        };

        self.write(&cluster, ClusterField::TerraformState(outcome.state), request_id)
            .await?;
        self.write(&cluster, ClusterField::Message(outcome.message.clone()), request_id)
            .await?;

        match deadline.bound(executor.outputs()).await {
            Ok(outputs) => {
                self.write(&cluster, ClusterField::Outputs(outputs), request_id)
                    .await?;
            }
            Err(e) => {
                let message = failure_message("outputs", &e, deadline.budget);
                warn!(error = %message, "Failed to read cluster outputs");
                if outcome.message.is_empty() {
                    self.write(&cluster, ClusterField::Message(message), request_id)
                        .await?;
                }
            }
        }

        self.write(
            &cluster,
            ClusterField::Status(ClusterStatus::ProvisionSuccess),
            request_id,
        )
        .await?;
        info!("Cluster provisioned");
        Ok(())
    }

    async fn destroy(&self, cluster: Cluster, request_id: &str) -> Result<()> {
        let Some(state) = cluster.terraform_state.clone() else {
            self.write(
                &cluster,
                ClusterField::Message(NOTHING_TO_DESTROY.to_string()),
                request_id,
            )
            .await?;
            self.write(
                &cluster,
                ClusterField::Status(ClusterStatus::Destroyed),
                request_id,
            )
            .await?;
            info!("Cluster had no infrastructure state, marked destroyed");
            return Ok(());
        };

        let deadline = Deadline::start(cluster.timeout);
        let mut executor = self.configured_executor(&cluster);
        executor.set_state(&state);
        debug!(executor = executor.executor_type(), "Destroying cluster");

        if let Err(e) = deadline.bound(executor.initialize()).await {
            return self.fail(&cluster, "initialize", &e, request_id).await;
        }
        if let Err(e) = deadline.bound(executor.plan(true)).await {
            return self.fail(&cluster, "plan", &e, request_id).await;
        }

        let outcome = match deadline.bound(executor.destroy()).await {
            Ok(outcome) => outcome,
            Err(e) => return self.fail(&cluster, "destroy", &e, request_id).await,
        };

        if !outcome.state.is_empty() {
            self.write(&cluster, ClusterField::TerraformState(outcome.state), request_id)
                .await?;
        }
        self.write(&cluster, ClusterField::Message(outcome.message), request_id)
            .await?;
        self.write(
            &cluster,
            ClusterField::Status(ClusterStatus::Destroyed),
            request_id,
        )
        .await?;
        info!("Cluster destroyed");
        Ok(())
    }

    fn configured_executor(&self, cluster: &Cluster) -> Box<dyn Executor> {
        let mut executor = self.executor_factory.create();
        executor.set_project(&cluster.project);
        executor.set_region(&cluster.region);
        executor.set_config(&cluster.terraform_config);
        executor
    }

    /// Record a failed executor call: message first, then the failed status.
    async fn fail(
        &self,
        cluster: &Cluster,
        operation: &str,
        error: &ExecutorError,
        request_id: &str,
    ) -> Result<()> {
        let status = match cluster.status {
            ClusterStatus::Destroying => ClusterStatus::DestroyFailed,
            _ => ClusterStatus::ProvisionFailed,
        };
        let message = failure_message(operation, error, cluster.timeout);
        warn!(status = %status, error = %message, "Workflow step failed");

        self.write(cluster, ClusterField::Message(message), request_id)
            .await?;
        self.write(cluster, ClusterField::Status(status), request_id)
            .await
    }

    async fn write(&self, cluster: &Cluster, field: ClusterField, request_id: &str) -> Result<()> {
        self.store
            .update_cluster_field(&cluster.id, field, request_id)
            .await
    }
}

impl Deadline {
    fn start(budget: Duration) -> Self {
        Self {
            at: Instant::now() + budget,
            budget,
        }
    }

    /// Await an executor call, failing with [`ExecutorError::Timeout`] past the deadline.
    async fn bound<T>(
        &self,
        call: impl Future<Output = executor::Result<T>>,
    ) -> executor::Result<T> {
        match tokio::time::timeout_at(self.at, call).await {
            Ok(result) => result,
            Err(_) => Err(ExecutorError::Timeout),
        }
    }
}

/// Human-readable text for a failed call. Never empty.
fn failure_message(operation: &str, error: &ExecutorError, budget: Duration) -> String {
    match error {
        ExecutorError::Timeout => {
            format!("{} timed out: cluster timeout of {:?} exceeded", operation, budget)
        }
        other => {
            let text = other.to_string();
            if text.trim().is_empty() {
                format!("{} failed", operation)
            } else {
                text
            }
        }
    }
}
