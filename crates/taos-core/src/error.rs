// Copyright (C) 2025 The taos Authors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for taos-core.

use thiserror::Error;

use crate::cluster::ClusterStatus;

/// Orchestration errors.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Request validation failed before anything was persisted.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Cluster was not found.
    #[error("Cluster not found: {0}")]
    NotFound(String),

    /// Delete requested on a cluster that is already destroyed.
    #[error("Cluster already destroyed: {0}")]
    AlreadyDestroyed(String),

    /// Another workflow holds the cluster.
    #[error("Cluster {id} has a workflow in progress (status {status})")]
    WorkflowInProgress {
        /// Cluster ID.
        id: String,
        /// Status holding the lease.
        status: ClusterStatus,
    },

    /// Database operation failed.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Schema migration failed.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// Other persistence failure (corrupt row, unsupported backend).
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// Workflow scheduler is not accepting work.
    #[error("Scheduler error: {0}")]
    Scheduler(String),

    /// Other error.
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Whether the error came from the backing store.
    pub fn is_persistence(&self) -> bool {
        matches!(
            self,
            Self::Database(_) | Self::Migration(_) | Self::Persistence(_)
        )
    }

    /// Whether the error is a per-cluster race the reaper can skip.
    pub fn is_cluster_race(&self) -> bool {
        matches!(
            self,
            Self::NotFound(_) | Self::AlreadyDestroyed(_) | Self::WorkflowInProgress { .. }
        )
    }
}

/// Result type using the orchestration Error.
pub type Result<T> = std::result::Result<T, Error>;
