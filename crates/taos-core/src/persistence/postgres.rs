// Copyright (C) 2025 The taos Authors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! PostgreSQL-backed cluster store.

use async_trait::async_trait;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use tracing::{debug, warn};
use uuid::Uuid;

use super::{
    ClusterRecord, ClusterStore, DELETE_CAS_ATTEMPTS, EXPIRABLE_STATUSES, ensure_deletable,
    timeout_millis,
};
use crate::cluster::{Cluster, ClusterField, ClusterStatus, NewCluster, default_name};
use crate::error::{Error, Result};

static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations/postgres");

const RETURNING_COLUMNS: &str = "id, name, status, message, project, region, timeout_ms, \
     terraform_config, terraform_state, outputs, created_at, updated_at";

/// PostgreSQL-backed cluster store.
#[derive(Clone)]
pub struct PostgresClusterStore {
    pool: PgPool,
}

impl PostgresClusterStore {
    /// Create a store from an existing pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect to a `postgres://` URL.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    /// Run pending migrations.
    pub async fn migrate(&self) -> Result<()> {
        MIGRATOR.run(&self.pool).await?;
        Ok(())
    }

    /// Underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl ClusterStore for PostgresClusterStore {
    fn store_type(&self) -> &'static str {
        "postgres"
    }

    async fn create_cluster(&self, new: &NewCluster, request_id: &str) -> Result<Cluster> {
        let id = Uuid::new_v4().to_string();
        let name = new.name.clone().unwrap_or_else(|| default_name(&id));

        let record = sqlx::query_as::<_, ClusterRecord>(&format!(
            r#"
            INSERT INTO clusters (id, name, status, message, project, region, timeout_ms,
                                  terraform_config, created_at, updated_at)
            VALUES ($1, $2, 'requested', '', $3, $4, $5, $6, NOW(), NOW())
            RETURNING {RETURNING_COLUMNS}
            "#
        ))
        .bind(&id)
        .bind(&name)
        .bind(&new.project)
        .bind(&new.region)
        .bind(timeout_millis(new.timeout)?)
        .bind(&new.terraform_config)
        .fetch_one(&self.pool)
        .await?;

        debug!(cluster_id = %id, request_id = %request_id, "Created cluster record");
        Cluster::try_from(record)
    }

    async fn get_cluster(&self, id: &str, _request_id: &str) -> Result<Cluster> {
        let record = sqlx::query_as::<_, ClusterRecord>(&format!(
            "SELECT {RETURNING_COLUMNS} FROM clusters WHERE id = $1"
        ))
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
            "SELECT {RETURNING_COLUMNS} FROM clusters ORDER BY created_at ASC, id ASC"
        ))
        .fetch_all(&self.pool)
        .await?;

        records.into_iter().map(Cluster::try_from).collect()
    }

    async fn get_expired_clusters(&self, _request_id: &str) -> Result<Vec<Cluster>> {
        let records = sqlx::query_as::<_, ClusterRecord>(&format!(
            r#"
            SELECT {RETURNING_COLUMNS} FROM clusters
            WHERE status IN ({EXPIRABLE_STATUSES})
              AND created_at + (timeout_ms * INTERVAL '1 millisecond') < NOW()
            ORDER BY created_at ASC, id ASC
            "#
        ))
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
        let sql = format!("UPDATE clusters SET {column} = $1, updated_at = NOW() WHERE id = $2");
        let query = sqlx::query(&sql);
        let query = match field {
            ClusterField::Status(status) => query.bind(status.as_str().to_string()),
            ClusterField::Message(message) => query.bind(message),
            ClusterField::Outputs(bytes)
            | ClusterField::TerraformConfig(bytes)
            | ClusterField::TerraformState(bytes) => query.bind(bytes),
        };

        let result = query.bind(id).execute(&self.pool).await?;
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
                UPDATE clusters SET status = 'destroying', updated_at = NOW()
                WHERE id = $1 AND status = $2
                "#,
            )
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
            "UPDATE clusters SET status = $1, updated_at = NOW() WHERE id = $2 AND status = $3",
        )
        .bind(to.as_str())
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
