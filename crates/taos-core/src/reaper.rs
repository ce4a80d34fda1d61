// Copyright (C) 2025 The taos Authors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Background worker that destroys expired clusters.
//!
//! A cluster expires once it is older than its timeout while sitting in a
//! stable status (`provision_success`, `provision_failed`, `destroy_failed`).
//! Each cycle:
//! 1. Queries the store for expired clusters
//! 2. Starts a destroy for each through [`ClusterService::delete_cluster`]
//! 3. Skips clusters that were deleted or leased in the meantime

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::Result;
use crate::service::ClusterService;

/// Configuration for the expiry reaper.
#[derive(Debug, Clone)]
pub struct ReaperConfig {
    /// Whether the reaper runs at all.
    pub enabled: bool,
    /// How often to scan for expired clusters.
    pub poll_interval: Duration,
}

impl Default for ReaperConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            poll_interval: Duration::from_secs(60),
        }
    }
}

impl ReaperConfig {
    /// Load configuration from environment variables.
    ///
    /// Environment variables:
    /// - `TAOS_REAPER_ENABLED`: "false" or "0" to disable (default: true)
    /// - `TAOS_REAPER_POLL_INTERVAL_SECS`: seconds between scans (default: 60)
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary variable source.
    pub fn from_lookup<F>(get: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let enabled = get("TAOS_REAPER_ENABLED")
            .map(|v| !(v == "false" || v == "0"))
            .unwrap_or(defaults.enabled);

        let poll_interval = get("TAOS_REAPER_POLL_INTERVAL_SECS")
            .and_then(|v| v.parse::<u64>().ok())
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
            .unwrap_or(defaults.poll_interval);

        Self {
            enabled,
            poll_interval,
        }
    }
}

/// Outcome of one reaper cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReapSummary {
    /// Expired clusters returned by the store.
    pub expired: usize,
    /// Destroys started.
    pub destroying: usize,
    /// Clusters skipped because they changed since the scan.
    pub skipped: usize,
    /// Destroys that failed to start.
    pub failed: usize,
}

/// Periodically destroys clusters that outlived their timeout.
pub struct ExpiryReaper {
    service: ClusterService,
    config: ReaperConfig,
    shutdown: Arc<Notify>,
}

impl ExpiryReaper {
    /// Create a new reaper.
    pub fn new(service: ClusterService, config: ReaperConfig) -> Self {
        Self {
            service,
            config,
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// Get a handle that can be used to signal shutdown.
    pub fn shutdown_handle(&self) -> Arc<Notify> {
        self.shutdown.clone()
    }

    /// Run the reaper loop until the shutdown signal is received.
    pub async fn run(&self) {
        if !self.config.enabled {
            info!("Expiry reaper disabled");
            return;
        }

        info!(
            poll_interval_secs = self.config.poll_interval.as_secs(),
            "Expiry reaper started"
        );

        loop {
            tokio::select! {
                biased;

                _ = self.shutdown.notified() => {
                    info!("Expiry reaper received shutdown signal");
                    break;
                }

                _ = tokio::time::sleep(self.config.poll_interval) => {
                    match self.reap_expired().await {
                        Ok(summary) if summary.expired > 0 => {
                            info!(
                                expired = summary.expired,
                                destroying = summary.destroying,
                                skipped = summary.skipped,
                                failed = summary.failed,
                                "Expiry reaper cycle complete"
                            );
                        }
                        Ok(_) => debug!("No expired clusters"),
                        Err(e) => error!(error = %e, "Failed to scan for expired clusters"),
                    }
                }
            }
        }

        info!("Expiry reaper stopped");
    }

    /// Run one cycle. Fails only when the scan itself fails.
    pub async fn reap_expired(&self) -> Result<ReapSummary> {
        let request_id = Uuid::new_v4().to_string();
        let expired = self
            .service
            .store()
            .get_expired_clusters(&request_id)
            .await?;

        let mut summary = ReapSummary {
            expired: expired.len(),
            ..Default::default()
        };

        for cluster in expired {
            if cluster.status.is_terminal() || cluster.status.is_leased() {
                summary.skipped += 1;
                continue;
            }

            match self.service.delete_cluster(&request_id, &cluster.id).await {
                Ok(_) => {
                    info!(
                        cluster_id = %cluster.id,
                        request_id = %request_id,
                        status = %cluster.status,
                        "Destroying expired cluster"
                    );
                    summary.destroying += 1;
                }
                Err(e) if e.is_cluster_race() => {
                    debug!(
                        cluster_id = %cluster.id,
                        request_id = %request_id,
                        error = %e,
                        "Expired cluster changed since scan, skipping"
                    );
                    summary.skipped += 1;
                }
                Err(e) => {
                    warn!(
                        cluster_id = %cluster.id,
                        request_id = %request_id,
                        error = %e,
                        "Failed to destroy expired cluster"
                    );
                    summary.failed += 1;
                }
            }
        }

        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::{Cluster, ClusterStatus};
    use crate::executor::{MockExecutor, MockExecutorFactory};
    use crate::persistence::{ClusterStore, InMemoryClusterStore};
    use crate::scheduler::InlineScheduler;
    use crate::workflow::WorkflowRunner;
    use chrono::Utc;
    use std::collections::HashMap;

    fn cluster(id: &str, status: ClusterStatus, age: chrono::Duration) -> Cluster {
        let created_at = Utc::now() - age;
        Cluster {
            id: id.to_string(),
            name: format!("cluster-{}", id),
            status,
            message: String::new(),
            project: "valid-project-name".to_string(),
            region: "valid-region".to_string(),
            timeout: Duration::from_secs(60),
            terraform_config: br#"{"output":{}}"#.to_vec(),
            terraform_state: None,
            outputs: None,
            created_at,
            updated_at: created_at,
        }
    }

    fn reaper(store: Arc<InMemoryClusterStore>) -> ExpiryReaper {
        let factory = Arc::new(MockExecutorFactory::new(MockExecutor::new()));
        let scheduler = Arc::new(InlineScheduler::new(WorkflowRunner::new(
            store.clone(),
            factory,
        )));
        ExpiryReaper::new(
            ClusterService::new(store, scheduler),
            ReaperConfig::default(),
        )
    }

    #[test]
    fn test_config_from_lookup() {
        let vars: HashMap<&str, &str> = [
            ("TAOS_REAPER_ENABLED", "0"),
            ("TAOS_REAPER_POLL_INTERVAL_SECS", "5"),
        ]
        .into_iter()
        .collect();
        let config = ReaperConfig::from_lookup(|k| vars.get(k).map(|v| v.to_string()));
        assert!(!config.enabled);
        assert_eq!(config.poll_interval, Duration::from_secs(5));

        let config = ReaperConfig::from_lookup(|_| None);
        assert!(config.enabled);
        assert_eq!(config.poll_interval, Duration::from_secs(60));
    }

    #[tokio::test]
    async fn test_reaps_expired_stable_clusters() {
        let old = chrono::Duration::hours(1);
        let store = Arc::new(InMemoryClusterStore::with_clusters([
            cluster("a", ClusterStatus::ProvisionSuccess, old),
            cluster("b", ClusterStatus::DestroyFailed, old),
            cluster("c", ClusterStatus::Provisioning, old),
            cluster("d", ClusterStatus::Destroyed, old),
            cluster("e", ClusterStatus::ProvisionSuccess, chrono::Duration::seconds(1)),
        ]));
        let reaper = reaper(store.clone());

        let summary = reaper.reap_expired().await.unwrap();
        assert_eq!(
            summary,
            ReapSummary {
                expired: 2,
                destroying: 2,
                skipped: 0,
                failed: 0
            }
        );

        let status = |id: &'static str| {
            let store = store.clone();
            async move { store.get_cluster(id, "req").await.unwrap().status }
        };
        assert_eq!(status("a").await, ClusterStatus::Destroyed);
        assert_eq!(status("b").await, ClusterStatus::Destroyed);
        assert_eq!(status("c").await, ClusterStatus::Provisioning);
        assert_eq!(status("e").await, ClusterStatus::ProvisionSuccess);

        // Destroyed clusters are not picked up again
        let summary = reaper.reap_expired().await.unwrap();
        assert_eq!(summary.expired, 0);
    }

    #[tokio::test]
    async fn test_scan_failure_aborts_cycle() {
        let store = Arc::new(InMemoryClusterStore::with_clusters([cluster(
            "a",
            ClusterStatus::ProvisionFailed,
            chrono::Duration::hours(1),
        )]));
        let reaper = reaper(store.clone());

        store.set_unavailable(true);
        assert!(reaper.reap_expired().await.unwrap_err().is_persistence());

        store.set_unavailable(false);
        assert_eq!(reaper.reap_expired().await.unwrap().destroying, 1);
    }

    #[tokio::test]
    async fn test_disabled_reaper_returns_immediately() {
        let store = Arc::new(InMemoryClusterStore::new());
        let mut reaper = reaper(store);
        reaper.config.enabled = false;

        tokio::time::timeout(Duration::from_secs(1), reaper.run())
            .await
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_stops_on_shutdown() {
        let store = Arc::new(InMemoryClusterStore::with_clusters([cluster(
            "a",
            ClusterStatus::ProvisionSuccess,
            chrono::Duration::hours(1),
        )]));
        let reaper = Arc::new(reaper(store.clone()));
        let shutdown = reaper.shutdown_handle();

        let handle = tokio::spawn({
            let reaper = reaper.clone();
            async move { reaper.run().await }
        });

        tokio::time::sleep(Duration::from_secs(61)).await;
        shutdown.notify_one();
        handle.await.unwrap();

        let cluster = store.get_cluster("a", "req").await.unwrap();
        assert_eq!(cluster.status, ClusterStatus::Destroyed);
    }
}
