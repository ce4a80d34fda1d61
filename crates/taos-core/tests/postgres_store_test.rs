// Copyright (C) 2025 The taos Authors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Tests for the PostgreSQL cluster store.
//!
//! Requires `TEST_TAOS_DATABASE_URL` pointing at a disposable database.

mod common;

use std::time::Duration;

use common::*;
use taos_core::Error;
use taos_core::cluster::{ClusterField, ClusterStatus, NewCluster};
use taos_core::persistence::{ClusterStore, PostgresClusterStore};

/// Helper macro to skip tests if database URL is not set.
macro_rules! skip_if_no_db {
    () => {
        if std::env::var("TEST_TAOS_DATABASE_URL").is_err() {
            eprintln!("Skipping test: TEST_TAOS_DATABASE_URL not set");
            return;
        }
    };
}

/// Connect and migrate the test database.
async fn get_test_store() -> Option<PostgresClusterStore> {
    let database_url = std::env::var("TEST_TAOS_DATABASE_URL").ok()?;
    let store = PostgresClusterStore::connect(&database_url).await.ok()?;
    store.migrate().await.ok()?;
    Some(store)
}

fn new_cluster(name: Option<&str>) -> NewCluster {
    NewCluster {
        name: name.map(str::to_string),
        terraform_config: VALID_CONFIG.to_vec(),
        timeout: Duration::from_secs(600),
        project: PROJECT.to_string(),
        region: REGION.to_string(),
    }
}

async fn cleanup(store: &PostgresClusterStore, id: &str) {
    sqlx::query("DELETE FROM clusters WHERE id = $1")
        .bind(id)
        .execute(store.pool())
        .await
        .expect("Failed to cleanup cluster");
}

#[tokio::test]
async fn test_create_get_update() {
    skip_if_no_db!();
    let store = get_test_store().await.expect("Failed to connect");

    let created = store
        .create_cluster(&new_cluster(Some("pg-cluster")), REQUEST_ID)
        .await
        .unwrap();
    assert_eq!(created.status, ClusterStatus::Requested);
    assert_eq!(created.name, "pg-cluster");

    store
        .update_cluster_field(
            &created.id,
            ClusterField::TerraformState(b"{\"version\":3}".to_vec()),
            REQUEST_ID,
        )
        .await
        .unwrap();
    store
        .update_cluster_field(
            &created.id,
            ClusterField::Status(ClusterStatus::ProvisionSuccess),
            REQUEST_ID,
        )
        .await
        .unwrap();

    let fetched = store.get_cluster(&created.id, REQUEST_ID).await.unwrap();
    assert_eq!(fetched.status, ClusterStatus::ProvisionSuccess);
    assert_eq!(fetched.timeout, Duration::from_secs(600));
    assert_eq!(
        fetched.terraform_state.as_deref(),
        Some(&b"{\"version\":3}"[..])
    );

    let listed = store.get_clusters(REQUEST_ID).await.unwrap();
    assert!(listed.iter().any(|c| c.id == created.id));

    cleanup(&store, &created.id).await;
}

#[tokio::test]
async fn test_missing_cluster() {
    skip_if_no_db!();
    let store = get_test_store().await.expect("Failed to connect");

    assert!(matches!(
        store.get_cluster("missing", REQUEST_ID).await,
        Err(Error::NotFound(_))
    ));
    assert!(matches!(
        store
            .update_cluster_field("missing", ClusterField::Message("x".into()), REQUEST_ID)
            .await,
        Err(Error::NotFound(_))
    ));
    assert!(matches!(
        store.delete_cluster("missing", REQUEST_ID).await,
        Err(Error::NotFound(_))
    ));
}

#[tokio::test]
async fn test_delete_compare_and_set() {
    skip_if_no_db!();
    let store = get_test_store().await.expect("Failed to connect");
    let cluster = seed_cluster(&store, ClusterStatus::DestroyFailed).await;

    let previous = store.delete_cluster(&cluster.id, REQUEST_ID).await.unwrap();
    assert_eq!(previous.status, ClusterStatus::DestroyFailed);
    assert!(matches!(
        store.delete_cluster(&cluster.id, REQUEST_ID).await,
        Err(Error::WorkflowInProgress { .. })
    ));

    store
        .update_cluster_field(
            &cluster.id,
            ClusterField::Status(ClusterStatus::Destroyed),
            REQUEST_ID,
        )
        .await
        .unwrap();
    assert!(matches!(
        store.delete_cluster(&cluster.id, REQUEST_ID).await,
        Err(Error::AlreadyDestroyed(_))
    ));

    cleanup(&store, &cluster.id).await;
}

#[tokio::test]
async fn test_expired_clusters() {
    skip_if_no_db!();
    let store = get_test_store().await.expect("Failed to connect");

    let expired = seed_cluster(&store, ClusterStatus::ProvisionSuccess).await;
    let leased = seed_cluster(&store, ClusterStatus::Destroying).await;
    let fresh = seed_cluster(&store, ClusterStatus::ProvisionSuccess).await;
    for id in [&expired.id, &leased.id] {
        sqlx::query("UPDATE clusters SET created_at = NOW() - INTERVAL '2 hours' WHERE id = $1")
            .bind(id)
            .execute(store.pool())
            .await
            .unwrap();
    }

    let ids: Vec<String> = store
        .get_expired_clusters(REQUEST_ID)
        .await
        .unwrap()
        .into_iter()
        .map(|c| c.id)
        .collect();
    assert!(ids.contains(&expired.id));
    assert!(!ids.contains(&leased.id));
    assert!(!ids.contains(&fresh.id));

    for id in [&expired.id, &leased.id, &fresh.id] {
        cleanup(&store, id).await;
    }
}

#[tokio::test]
async fn test_transition_status_compare_and_set() {
    skip_if_no_db!();
    let store = get_test_store().await.expect("Failed to connect");
    let cluster = seed_cluster(&store, ClusterStatus::Requested).await;

    assert!(
        store
            .transition_status(
                &cluster.id,
                ClusterStatus::Requested,
                ClusterStatus::Provisioning,
                REQUEST_ID,
            )
            .await
            .unwrap()
    );
    assert!(
        !store
            .transition_status(
                &cluster.id,
                ClusterStatus::Requested,
                ClusterStatus::ProvisionFailed,
                REQUEST_ID,
            )
            .await
            .unwrap()
    );
    let fetched = store.get_cluster(&cluster.id, REQUEST_ID).await.unwrap();
    assert_eq!(fetched.status, ClusterStatus::Provisioning);

    assert!(matches!(
        store
            .transition_status(
                "missing",
                ClusterStatus::Requested,
                ClusterStatus::Provisioning,
                REQUEST_ID,
            )
            .await,
        Err(Error::NotFound(_))
    ));

    cleanup(&store, &cluster.id).await;
}
