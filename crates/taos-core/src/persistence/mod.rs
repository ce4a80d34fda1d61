// Copyright (C) 2025 The taos Authors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Persistence interfaces and backends for cluster records.
//!
//! This module defines the store abstraction and backend implementations.
//! Every backend must serialise field updates per record: the engine only
//! ever issues single-field updates after creation.

pub mod memory;
pub mod postgres;
pub mod sqlite;

pub use self::memory::InMemoryClusterStore;
pub use self::postgres::PostgresClusterStore;
pub use self::sqlite::SqliteClusterStore;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::info;

use crate::cluster::{Cluster, ClusterField, ClusterStatus, NewCluster};
use crate::error::{Error, Result};

/// SQL list of statuses eligible for expiry.
pub(crate) const EXPIRABLE_STATUSES: &str = "'provision_success', 'provision_failed', 'destroy_failed'";

/// Cluster row as stored by the SQL backends.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ClusterRecord {
    /// Unique identifier.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Status string.
    pub status: String,
    /// Last outcome message.
    pub message: String,
    /// Target project.
    pub project: String,
    /// Target region.
    pub region: String,
    /// Time budget in milliseconds.
    pub timeout_ms: i64,
    /// Infrastructure-as-code payload.
    pub terraform_config: Vec<u8>,
    /// Last known-good state.
    pub terraform_state: Option<Vec<u8>>,
    /// Extracted outputs.
    pub outputs: Option<Vec<u8>>,
    /// When the cluster was created.
    pub created_at: DateTime<Utc>,
    /// When the record was last written.
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<ClusterRecord> for Cluster {
    type Error = Error;

    fn try_from(record: ClusterRecord) -> Result<Self> {
        let status = record
            .status
            .parse::<ClusterStatus>()
            .map_err(|e| Error::Persistence(format!("cluster {}: {}", record.id, e)))?;
        let timeout_ms = u64::try_from(record.timeout_ms).map_err(|_| {
            Error::Persistence(format!(
                "cluster {}: negative timeout {}",
                record.id, record.timeout_ms
            ))
        })?;

        Ok(Cluster {
            id: record.id,
            name: record.name,
            status,
            message: record.message,
            project: record.project,
            region: record.region,
            timeout: Duration::from_millis(timeout_ms),
            terraform_config: record.terraform_config,
            terraform_state: record.terraform_state,
            outputs: record.outputs,
            created_at: record.created_at,
            updated_at: record.updated_at,
        })
    }
}

pub(crate) fn timeout_millis(timeout: Duration) -> Result<i64> {
    i64::try_from(timeout.as_millis())
        .map_err(|_| Error::InvalidRequest(format!("timeout too large: {:?}", timeout)))
}

/// Reject a delete for a cluster that is terminal or held by a workflow.
pub(crate) fn ensure_deletable(cluster: &Cluster) -> Result<()> {
    if cluster.status.is_terminal() {
        return Err(Error::AlreadyDestroyed(cluster.id.clone()));
    }
    if cluster.status.is_leased() {
        return Err(Error::WorkflowInProgress {
            id: cluster.id.clone(),
            status: cluster.status,
        });
    }
    Ok(())
}

/// Attempts made by SQL backends when a delete loses a compare-and-set race.
pub(crate) const DELETE_CAS_ATTEMPTS: usize = 3;

/// Store interface used by the orchestration engine.
///
/// `request_id` is a correlation token for tracing; it never affects results.
#[async_trait]
pub trait ClusterStore: Send + Sync {
    /// Backend identifier (e.g., "postgres", "sqlite", "memory").
    fn store_type(&self) -> &'static str;

    /// Insert a new cluster with status `requested`.
    async fn create_cluster(&self, new: &NewCluster, request_id: &str) -> Result<Cluster>;

    /// Fetch a cluster. Fails with [`Error::NotFound`] when absent.
    async fn get_cluster(&self, id: &str, request_id: &str) -> Result<Cluster>;

    /// List all clusters, oldest first.
    async fn get_clusters(&self, request_id: &str) -> Result<Vec<Cluster>>;

    /// Clusters older than their timeout whose status is stable and non-terminal.
    async fn get_expired_clusters(&self, request_id: &str) -> Result<Vec<Cluster>>;

    /// Update one column. Fails with [`Error::NotFound`] when no row matched.
    async fn update_cluster_field(
        &self,
        id: &str,
        field: ClusterField,
        request_id: &str,
    ) -> Result<()>;

    /// Set the status to `to` only while the stored status is still `from`.
    ///
    /// Returns `false`, leaving the record untouched, when the status has
    /// already moved on. Fails with [`Error::NotFound`] when absent.
    async fn transition_status(
        &self,
        id: &str,
        from: ClusterStatus,
        to: ClusterStatus,
        request_id: &str,
    ) -> Result<bool>;

    /// Atomically transition to `destroying`, returning the pre-transition cluster.
    ///
    /// Fails with [`Error::NotFound`], [`Error::AlreadyDestroyed`] or
    /// [`Error::WorkflowInProgress`].
    async fn delete_cluster(&self, id: &str, request_id: &str) -> Result<Cluster>;

    /// Check that the backend is reachable.
    async fn health_check(&self) -> Result<bool> {
        Ok(true)
    }
}

/// Connect to the store named by `database_url` and run its migrations.
///
/// `sqlite:` URLs select SQLite; `postgres://` and `postgresql://` select PostgreSQL.
pub async fn connect(database_url: &str) -> Result<Arc<dyn ClusterStore>> {
    if database_url.starts_with("sqlite:") {
        let store = SqliteClusterStore::connect(database_url).await?;
        store.migrate().await?;
        info!(store = "sqlite", "Connected to cluster store");
        Ok(Arc::new(store))
    } else if database_url.starts_with("postgres://") || database_url.starts_with("postgresql://")
    {
        let store = PostgresClusterStore::connect(database_url).await?;
        store.migrate().await?;
        info!(store = "postgres", "Connected to cluster store");
        Ok(Arc::new(store))
    } else {
        let scheme = database_url.split(':').next().unwrap_or_default();
        Err(Error::Persistence(format!(
            "Unsupported database URL scheme: {}",
            scheme
        )))
    }
}
