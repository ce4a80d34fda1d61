// Copyright (C) 2025 The taos Authors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Cluster entity and lifecycle vocabulary.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle status of a cluster.
///
/// `Requested`, `Provisioning` and `Destroying` are transient and act as a
/// lease: while one of them is in effect a workflow owns the cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClusterStatus {
    /// Recorded, not yet handed to a workflow.
    Requested,
    /// Provisioning workflow is running.
    Provisioning,
    /// Apply succeeded.
    ProvisionSuccess,
    /// Initialize, plan or apply failed.
    ProvisionFailed,
    /// Destruction workflow is running.
    Destroying,
    /// Infrastructure torn down. Terminal.
    Destroyed,
    /// Destroy failed; destruction may be retried.
    DestroyFailed,
}

impl ClusterStatus {
    /// All statuses, in lifecycle order.
    pub const ALL: [ClusterStatus; 7] = [
        ClusterStatus::Requested,
        ClusterStatus::Provisioning,
        ClusterStatus::ProvisionSuccess,
        ClusterStatus::ProvisionFailed,
        ClusterStatus::Destroying,
        ClusterStatus::Destroyed,
        ClusterStatus::DestroyFailed,
    ];

    /// String form used in storage and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Requested => "requested",
            Self::Provisioning => "provisioning",
            Self::ProvisionSuccess => "provision_success",
            Self::ProvisionFailed => "provision_failed",
            Self::Destroying => "destroying",
            Self::Destroyed => "destroyed",
            Self::DestroyFailed => "destroy_failed",
        }
    }

    /// No workflow may run once a cluster reaches a terminal status.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Destroyed)
    }

    /// Statuses that exist only while a workflow is being set up or running.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Requested | Self::Provisioning | Self::Destroying)
    }

    /// Post-workflow statuses from which destruction may start.
    pub fn is_stable(&self) -> bool {
        matches!(
            self,
            Self::ProvisionSuccess | Self::ProvisionFailed | Self::DestroyFailed
        )
    }

    /// Statuses held by an active workflow. A second workflow must not start.
    pub fn is_leased(&self) -> bool {
        matches!(self, Self::Provisioning | Self::Destroying)
    }

    /// Failure statuses always carry a non-empty message.
    pub fn is_failed(&self) -> bool {
        matches!(self, Self::ProvisionFailed | Self::DestroyFailed)
    }
}

impl fmt::Display for ClusterStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown status string.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown cluster status: {0}")]
pub struct UnknownStatus(pub String);

impl FromStr for ClusterStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ClusterStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| UnknownStatus(s.to_string()))
    }
}

/// A cluster under orchestration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cluster {
    /// Unique identifier (UUID v4), immutable.
    pub id: String,
    /// Descriptive label.
    pub name: String,
    /// Current lifecycle status.
    pub status: ClusterStatus,
    /// Outcome of the last executor operation. Empty when none.
    pub message: String,
    /// Target project.
    pub project: String,
    /// Target region.
    pub region: String,
    /// Time budget captured at creation.
    pub timeout: Duration,
    /// Infrastructure-as-code payload.
    pub terraform_config: Vec<u8>,
    /// Last known-good infrastructure state, set after a successful apply.
    pub terraform_state: Option<Vec<u8>>,
    /// Outputs extracted after a successful apply.
    pub outputs: Option<Vec<u8>>,
    /// When the cluster was created.
    pub created_at: DateTime<Utc>,
    /// When the record was last written.
    pub updated_at: DateTime<Utc>,
}

impl Cluster {
    /// Whether the cluster has outlived its time budget at `now`.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        match chrono::Duration::from_std(self.timeout) {
            Ok(budget) => now - self.created_at > budget,
            Err(_) => false,
        }
    }
}

/// Input for creating a cluster record.
#[derive(Debug, Clone)]
pub struct NewCluster {
    /// Optional caller-supplied name.
    pub name: Option<String>,
    /// Infrastructure-as-code payload.
    pub terraform_config: Vec<u8>,
    /// Time budget.
    pub timeout: Duration,
    /// Target project.
    pub project: String,
    /// Target region.
    pub region: String,
}

/// Default display name derived from the cluster id.
pub fn default_name(id: &str) -> String {
    let prefix: String = id.chars().take(8).collect();
    format!("cluster-{}", prefix)
}

/// A single updatable column with its typed value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClusterField {
    /// `status` column.
    Status(ClusterStatus),
    /// `message` column.
    Message(String),
    /// `outputs` column.
    Outputs(Vec<u8>),
    /// `terraform_config` column.
    TerraformConfig(Vec<u8>),
    /// `terraform_state` column.
    TerraformState(Vec<u8>),
}

impl ClusterField {
    /// Column name in the backing store.
    pub fn column(&self) -> &'static str {
        match self {
            Self::Status(_) => "status",
            Self::Message(_) => "message",
            Self::Outputs(_) => "outputs",
            Self::TerraformConfig(_) => "terraform_config",
            Self::TerraformState(_) => "terraform_state",
        }
    }

    /// Apply this field to an in-memory record.
    pub fn apply_to(self, cluster: &mut Cluster) {
        match self {
            Self::Status(status) => cluster.status = status,
            Self::Message(message) => cluster.message = message,
            Self::Outputs(outputs) => cluster.outputs = Some(outputs),
            Self::TerraformConfig(config) => cluster.terraform_config = config,
            Self::TerraformState(state) => cluster.terraform_state = Some(state),
        }
    }
}
