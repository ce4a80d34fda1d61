// Copyright (C) 2025 The taos Authors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! SQLite-backed cluster store.

use std::path::Path;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::SqlitePool;
use sqlx::sqlite::SqlitePoolOptions;
use tracing::{debug, warn};
use uuid::Uuid;

use super::{
    ClusterRecord, ClusterStore, DELETE_CAS_ATTEMPTS, EXPIRABLE_STATUSES, ensure_deletable,
    timeout_millis,
};
use crate::cluster::{Cluster, ClusterField, ClusterStatus, NewCluster, default_name};
use crate::error::{Error, Result};

static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations/sqlite");

const SELECT_COLUMNS: &str = "SELECT id, name, status, message, project, region, timeout_ms, \
     terraform_config, terraform_state, outputs, created_at, updated_at FROM clusters";

/// SQLite-backed cluster store.
#[derive(Clone)]
pub struct SqliteClusterStore {
    pool: SqlitePool,
}

impl SqliteClusterStore {
    /// Create a store from an existing pool.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Connect to a `sqlite:` URL.
    ///
    /// In-memory databases are pinned to a single connection so every query
    /// sees the same database.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let max_connections = if database_url.contains(":memory:") {
            1
        } else {
            5
        };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    /// Open (creating if needed) a database file and run migrations.
    pub async fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| {
                Error::Persistence(format!("Failed to create directory {:?}: {}", parent, e))
            })?;
        }

        let url = format!("sqlite:{}?mode=rwc", path.to_string_lossy());
        let store = Self::connect(&url).await?;
        store.migrate().await?;
        Ok(store)
    }

    /// Run pending migrations.
    pub async fn migrate(&self) -> Result<()> {
        MIGRATOR.run(&self.pool).await?;
        Ok(())
    }

    /// Underlying connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl ClusterStore for SqliteClusterStore {
    fn store_type(&self) -> &'static str {
        "sqlite"
    }

    async fn create_cluster(&self, new: &NewCluster, request_id: &str) -> Result<Cluster> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now();
        let cluster = Cluster {
            name: new.name.clone().unwrap_or_else(|| default_name(&id)),
            id,
            status: ClusterStatus::Requested,
            message: String::new(),
            project: new.project.clone(),
            region: new.region.clone(),
            timeout: new.timeout,
            terraform_config: new.terraform_config.clone(),
            terraform_state: None,
            outputs: None,
            created_at: now,
            updated_at: now,
        };

        sqlx::query(
            r#"
            INSERT INTO clusters (id, name, status, message, project, region, timeout_ms,
                                  terraform_config, created_at, updated_at)
            VALUES (?, ?, ?, '', ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&cluster.id)
        .bind(&cluster.name)
        .bind(cluster.status.as_str())
        .bind(&cluster.project)
        .bind(&cluster.region)
        .bind(timeout_millis(cluster.timeout)?)
        .bind(&cluster.terraform_config)
        .bind(cluster.created_at)
        .bind(cluster.updated_at)
        .execute(&self.pool)
        .await?;

        debug!(cluster_id = %cluster.id, request_id = %request_id, "Created cluster record");
        Ok(cluster)
    }

    async fn get_cluster(&self, id: &str, _request_id: &str) -> Result<Cluster> {
        let record = sqlx::query_as::<_, ClusterRecord>(&format!("{SELECT_COLUMNS} WHERE id = ?"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        match record {
            Some(record) => Cluster::try_from(record),
            None => Err(Error::NotFound(id.to_string())),
        }
    }

    async fn get_clusters(&self, _request_id: &str) -> Result<Vec<Cluster>> {
        let records = sqlx::query_as::<_, ClusterRecord>(&format!(
            "{SELECT_COLUMNS} ORDER BY created_at ASC, id ASC"
        ))
        .fetch_all(&self.pool)
        .await?;

        records.into_iter().map(Cluster::try_from).collect()
    }

    async fn get_expired_clusters(&self, _request_id: &str) -> Result<Vec<Cluster>> {
        let records = sqlx::query_as::<_, ClusterRecord>(&format!(
            "{SELECT_COLUMNS} \
             WHERE status IN ({EXPIRABLE_STATUSES}) \
               AND (julianday(?) - julianday(created_at)) * 86400000.0 > timeout_ms \
             ORDER BY created_at ASC, id ASC"
        ))
        .bind(Utc::now())
        .fetch_all(&self.pool)
        .await?;

        records.into_iter().map(Cluster::try_from).collect()
    }

    async fn update_cluster_field(
        &self,
        id: &str,
        field: ClusterField,
        request_id: &str,
    ) -> Result<()> {
        let column = field.column();
        let sql = format!("UPDATE clusters SET {column} = ?, updated_at = ? WHERE id = ?");
        let query = sqlx::query(&sql);
        let query = match field {
            ClusterField::Status(status) => query.bind(status.as_str().to_string()),
            ClusterField::Message(message) => query.bind(message),
            ClusterField::Outputs(bytes)
            | ClusterField::TerraformConfig(bytes)
            | ClusterField::TerraformState(bytes) => query.bind(bytes),
        };

        let result = query
            .bind(Utc::now())
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(Error::NotFound(id.to_string()));
        }

        debug!(cluster_id = %id, request_id = %request_id, field = column, "Updated cluster field");
        Ok(())
    }

    async fn delete_cluster(&self, id: &str, request_id: &str) -> Result<Cluster> {
        for attempt in 1..=DELETE_CAS_ATTEMPTS {
            let cluster = self.get_cluster(id, request_id).await?;
            ensure_deletable(&cluster)?;

            let result = sqlx::query(
                r#"
                UPDATE clusters SET status = 'destroying', updated_at = ?
                WHERE id = ? AND status = ?
                "#,
            )
            .bind(Utc::now())
            .bind(id)
            .bind(cluster.status.as_str())
            .execute(&self.pool)
            .await?;

            if result.rows_affected() == 1 {
                debug!(cluster_id = %id, request_id = %request_id, "Cluster marked destroying");
                return Ok(cluster);
            }

            warn!(
                cluster_id = %id,
                request_id = %request_id,
                attempt = attempt,
                "Cluster status changed during delete, retrying"
            );
        }

        Err(Error::Persistence(format!(
            "cluster {} changed concurrently during delete",
            id
        )))
    }

    async fn transition_status(
        &self,
        id: &str,
        from: ClusterStatus,
        to: ClusterStatus,
        request_id: &str,
    ) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE clusters SET status = ?, updated_at = ? WHERE id = ? AND status = ?",
        )
        .bind(to.as_str())
        .bind(Utc::now())
        .bind(id)
        .bind(from.as_str())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 1 {
            debug!(
                cluster_id = %id,
                request_id = %request_id,
                from = %from,
                to = %to,
                "Cluster status transitioned"
            );
            return Ok(true);
        }

        // Distinguish a lost race from a missing row
        let current = self.get_cluster(id, request_id).await?;
        debug!(
            cluster_id = %id,
            request_id = %request_id,
            expected = %from,
            current = %current.status,
            "Cluster status transition skipped"
        );
        Ok(false)
    }

    async fn health_check(&self) -> Result<bool> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(true)
    }
}
