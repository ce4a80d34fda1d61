// Copyright (C) 2025 The taos Authors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! In-memory cluster store for tests and embedding.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

use super::{ClusterStore, ensure_deletable};
use crate::cluster::{Cluster, ClusterField, ClusterStatus, NewCluster, default_name};
use crate::error::{Error, Result};

/// Cluster store backed by a `HashMap`.
///
/// A single lock guards the map, so every operation is atomic per record.
#[derive(Clone, Default)]
pub struct InMemoryClusterStore {
    clusters: Arc<Mutex<HashMap<String, Cluster>>>,
    unavailable: Arc<AtomicBool>,
}

impl InMemoryClusterStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store seeded with existing records.
    pub fn with_clusters(clusters: impl IntoIterator<Item = Cluster>) -> Self {
        let map = clusters
            .into_iter()
            .map(|cluster| (cluster.id.clone(), cluster))
            .collect();
        Self {
            clusters: Arc::new(Mutex::new(map)),
            unavailable: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Insert or replace a record directly, bypassing the lifecycle.
    pub async fn insert(&self, cluster: Cluster) {
        self.clusters.lock().await.insert(cluster.id.clone(), cluster);
    }

    /// Simulate an outage: while set, every operation fails.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Number of stored records.
    pub async fn len(&self) -> usize {
        self.clusters.lock().await.len()
    }

    /// Whether the store holds no records.
    pub async fn is_empty(&self) -> bool {
        self.clusters.lock().await.is_empty()
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(Error::Persistence("store unavailable".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl ClusterStore for InMemoryClusterStore {
    fn store_type(&self) -> &'static str {
        "memory"
    }

    async fn create_cluster(&self, new: &NewCluster, request_id: &str) -> Result<Cluster> {
        self.check_available()?;

        let id = Uuid::new_v4().to_string();
        let now = Utc::now();
        let cluster = Cluster {
            name: new.name.clone().unwrap_or_else(|| default_name(&id)),
            id: id.clone(),
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

        self.clusters.lock().await.insert(id.clone(), cluster.clone());
        debug!(cluster_id = %id, request_id = %request_id, "Created cluster record");

        Ok(cluster)
    }

    async fn get_cluster(&self, id: &str, _request_id: &str) -> Result<Cluster> {
        self.check_available()?;
        self.clusters
            .lock()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| Error::NotFound(id.to_string()))
    }

    async fn get_clusters(&self, _request_id: &str) -> Result<Vec<Cluster>> {
        self.check_available()?;
        let mut clusters: Vec<Cluster> = self.clusters.lock().await.values().cloned().collect();
        clusters.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(clusters)
    }

    async fn get_expired_clusters(&self, request_id: &str) -> Result<Vec<Cluster>> {
        let now = Utc::now();
        let clusters = self.get_clusters(request_id).await?;
        Ok(clusters
            .into_iter()
            .filter(|cluster| cluster.status.is_stable() && cluster.is_expired_at(now))
            .collect())
    }

    async fn update_cluster_field(
        &self,
        id: &str,
        field: ClusterField,
        request_id: &str,
    ) -> Result<()> {
        self.check_available()?;
        let mut clusters = self.clusters.lock().await;
        let cluster = clusters
            .get_mut(id)
            .ok_or_else(|| Error::NotFound(id.to_string()))?;

        debug!(
            cluster_id = %id,
            request_id = %request_id,
            field = field.column(),
            "Updating cluster field"
        );
        field.apply_to(cluster);
        cluster.updated_at = Utc::now();
        Ok(())
    }

    async fn transition_status(
        &self,
        id: &str,
        from: ClusterStatus,
        to: ClusterStatus,
        request_id: &str,
    ) -> Result<bool> {
        self.check_available()?;
        let mut clusters = self.clusters.lock().await;
        let cluster = clusters
            .get_mut(id)
            .ok_or_else(|| Error::NotFound(id.to_string()))?;
        if cluster.status != from {
            debug!(
                cluster_id = %id,
                request_id = %request_id,
                expected = %from,
                current = %cluster.status,
                "Cluster status transition skipped"
            );
            return Ok(false);
        }

        cluster.status = to;
        cluster.updated_at = Utc::now();
        Ok(true)
    }

    async fn delete_cluster(&self, id: &str, request_id: &str) -> Result<Cluster> {
        self.check_available()?;
        let mut clusters = self.clusters.lock().await;
        let cluster = clusters
            .get_mut(id)
            .ok_or_else(|| Error::NotFound(id.to_string()))?;
        ensure_deletable(cluster)?;

        let previous = cluster.clone();
        cluster.status = ClusterStatus::Destroying;
        cluster.updated_at = Utc::now();
        debug!(cluster_id = %id, request_id = %request_id, "Cluster marked destroying");

        Ok(previous)
    }

    async fn health_check(&self) -> Result<bool> {
        Ok(!self.unavailable.load(Ordering::SeqCst))
    }
}
