// Copyright (C) 2025 The taos Authors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Tests for the expiry reaper running inside OrchestratorRuntime.

mod common;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use common::*;
use taos_core::cluster::{Cluster, ClusterStatus};
use taos_core::executor::{MockExecutor, MockExecutorFactory};
use taos_core::persistence::{self, ClusterStore, InMemoryClusterStore, SqliteClusterStore};
use taos_core::reaper::ReaperConfig;
use taos_core::runtime::OrchestratorRuntime;

fn expired_cluster(id: &str, status: ClusterStatus) -> Cluster {
    let created_at = Utc::now() - chrono::Duration::hours(2);
    Cluster {
        id: id.to_string(),
        name: format!("cluster-{}", id),
        status,
        message: String::new(),
        project: PROJECT.to_string(),
        region: REGION.to_string(),
        timeout: Duration::from_secs(3600),
        terraform_config: VALID_CONFIG.to_vec(),
        terraform_state: Some(taos_core::executor::mock::MOCK_STATE.to_vec()),
        outputs: None,
        created_at,
        updated_at: created_at,
    }
}

fn fast_reaper() -> ReaperConfig {
    ReaperConfig {
        enabled: true,
        poll_interval: Duration::from_millis(20),
    }
}

#[tokio::test]
async fn test_runtime_reaps_expired_clusters() {
    let store = Arc::new(InMemoryClusterStore::with_clusters([
        expired_cluster("expired-success", ClusterStatus::ProvisionSuccess),
        expired_cluster("expired-failed", ClusterStatus::ProvisionFailed),
        expired_cluster("expired-destroy-failed", ClusterStatus::DestroyFailed),
        expired_cluster("interrupted", ClusterStatus::Provisioning),
    ]));
    let factory = Arc::new(MockExecutorFactory::new(MockExecutor::new()));

    let runtime = OrchestratorRuntime::builder()
        .store(store.clone())
        .executor_factory(factory.clone())
        .reaper_config(fast_reaper())
        .shutdown_grace(Duration::from_secs(1))
        .build()
        .unwrap()
        .start()
        .await
        .unwrap();

    // The interrupted cluster is settled at startup and then reaped like the rest
    for id in [
        "expired-success",
        "expired-failed",
        "expired-destroy-failed",
        "interrupted",
    ] {
        let cluster = wait_for_status(runtime.service(), id, ClusterStatus::Destroyed)
            .await
            .unwrap();
        assert_eq!(cluster.status, ClusterStatus::Destroyed, "cluster {}", id);
    }

    assert_eq!(factory.created(), 4);

    runtime.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_disabled_reaper_leaves_clusters() {
    let store = Arc::new(InMemoryClusterStore::with_clusters([expired_cluster(
        "expired",
        ClusterStatus::ProvisionSuccess,
    )]));

    let runtime = OrchestratorRuntime::builder()
        .store(store.clone())
        .executor_factory(Arc::new(MockExecutorFactory::new(MockExecutor::new())))
        .reaper_config(ReaperConfig {
            enabled: false,
            ..fast_reaper()
        })
        .build()
        .unwrap()
        .start()
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(100)).await;
    let cluster = store.get_cluster("expired", REQUEST_ID).await.unwrap();
    assert_eq!(cluster.status, ClusterStatus::ProvisionSuccess);

    runtime.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_runtime_over_sqlite_store() {
    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("taos.db");
    let store = Arc::new(SqliteClusterStore::from_path(&path).await.unwrap());

    let seeded = seed_cluster(&*store, ClusterStatus::ProvisionFailed).await;
    sqlx::query("UPDATE clusters SET created_at = ? WHERE id = ?")
        .bind(Utc::now() - chrono::Duration::hours(1))
        .bind(&seeded.id)
        .execute(store.pool())
        .await
        .unwrap();

    let runtime = OrchestratorRuntime::builder()
        .store(store.clone())
        .executor_factory(Arc::new(MockExecutorFactory::new(MockExecutor::new())))
        .reaper_config(fast_reaper())
        .build()
        .unwrap()
        .start()
        .await
        .unwrap();

    // New clusters are provisioned while the expired one is reaped
    let created = runtime.service().create_cluster(&create_request()).await.unwrap();
    let provisioned = wait_for_status(runtime.service(), &created.id, ClusterStatus::ProvisionSuccess)
        .await
        .unwrap();
    assert_eq!(provisioned.status, ClusterStatus::ProvisionSuccess);

    let reaped = wait_for_status(runtime.service(), &seeded.id, ClusterStatus::Destroyed)
        .await
        .unwrap();
    assert_eq!(reaped.status, ClusterStatus::Destroyed);

    runtime.shutdown().await.unwrap();

    // Records survive a reconnect
    let url = format!("sqlite:{}", path.display());
    let reopened = persistence::connect(&url).await.unwrap();
    let clusters = reopened.get_clusters(REQUEST_ID).await.unwrap();
    assert_eq!(clusters.len(), 2);
}
