// Copyright (C) 2025 The taos Authors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Embeddable runtime for the orchestration engine.
//!
//! [`OrchestratorRuntime`] wires a store and an executor factory into a
//! [`ClusterService`], and spawns the workflow worker and the expiry reaper
//! on the current tokio runtime.
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use taos_core::executor::TerraformExecutorFactory;
//! use taos_core::runtime::OrchestratorRuntime;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let store = taos_core::persistence::connect("sqlite:.data/taos.db?mode=rwc").await?;
//!     let factory = Arc::new(TerraformExecutorFactory::new("terraform", ".data/workspaces"));
//!
//!     let runtime = OrchestratorRuntime::builder()
//!         .store(store)
//!         .executor_factory(factory)
//!         .build()?
//!         .start()
//!         .await?;
//!
//!     let service = runtime.service();
//!     // ... create and delete clusters ...
//!
//!     runtime.shutdown().await?;
//!     Ok(())
//! }
//! ```

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::DEFAULT_CLUSTER_TIMEOUT;
use crate::error::{Error, Result};
use crate::executor::ExecutorFactory;
use crate::persistence::ClusterStore;
use crate::reaper::{ExpiryReaper, ReaperConfig};
use crate::scheduler::{ChannelScheduler, DEFAULT_SHUTDOWN_GRACE};
use crate::service::ClusterService;
use crate::workflow::WorkflowRunner;

/// Builder for creating an [`OrchestratorRuntime`].
pub struct OrchestratorRuntimeBuilder {
    store: Option<Arc<dyn ClusterStore>>,
    executor_factory: Option<Arc<dyn ExecutorFactory>>,
    default_timeout: Duration,
    reaper_config: ReaperConfig,
    shutdown_grace: Duration,
}

impl Default for OrchestratorRuntimeBuilder {
    fn default() -> Self {
        Self {
            store: None,
            executor_factory: None,
            default_timeout: DEFAULT_CLUSTER_TIMEOUT,
            reaper_config: ReaperConfig::default(),
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
        }
    }
}

impl OrchestratorRuntimeBuilder {
    /// Create a new builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the cluster store (required).
    pub fn store(mut self, store: Arc<dyn ClusterStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Set the executor factory (required).
    pub fn executor_factory(mut self, factory: Arc<dyn ExecutorFactory>) -> Self {
        self.executor_factory = Some(factory);
        self
    }

    /// Timeout for create requests that carry none.
    pub fn default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    /// Set the expiry reaper configuration.
    pub fn reaper_config(mut self, config: ReaperConfig) -> Self {
        self.reaper_config = config;
        self
    }

    /// How long shutdown waits for in-flight workflows.
    pub fn shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    /// Build the runtime configuration.
    ///
    /// Returns an error if required fields are missing.
    pub fn build(self) -> Result<OrchestratorRuntimeConfig> {
        let store = self
            .store
            .ok_or_else(|| Error::Other("store is required".to_string()))?;
        let executor_factory = self
            .executor_factory
            .ok_or_else(|| Error::Other("executor_factory is required".to_string()))?;

        Ok(OrchestratorRuntimeConfig {
            store,
            executor_factory,
            default_timeout: self.default_timeout,
            reaper_config: self.reaper_config,
            shutdown_grace: self.shutdown_grace,
        })
    }
}

/// Configuration for an [`OrchestratorRuntime`].
pub struct OrchestratorRuntimeConfig {
    store: Arc<dyn ClusterStore>,
    executor_factory: Arc<dyn ExecutorFactory>,
    default_timeout: Duration,
    reaper_config: ReaperConfig,
    shutdown_grace: Duration,
}

impl OrchestratorRuntimeConfig {
    /// Start the runtime, spawning the workflow worker and expiry reaper tasks.
    ///
    /// Clusters still holding a workflow lease from an earlier run are marked
    /// failed first, so they can be deleted again.
    pub async fn start(self) -> Result<OrchestratorRuntime> {
        if !self.store.health_check().await? {
            return Err(Error::Persistence("cluster store is unhealthy".to_string()));
        }

        let runner = WorkflowRunner::new(self.store.clone(), self.executor_factory);
        let settled = runner
            .settle_interrupted(&Uuid::new_v4().to_string())
            .await?;
        if settled > 0 {
            warn!(count = settled, "Settled clusters left mid-workflow");
        }

        let (scheduler, worker) = ChannelScheduler::new(runner, self.shutdown_grace);
        let worker_shutdown = worker.shutdown_handle();
        let worker_handle = tokio::spawn(worker.run());

        let service = ClusterService::new(self.store.clone(), Arc::new(scheduler))
            .with_default_timeout(self.default_timeout);

        let reaper = ExpiryReaper::new(service.clone(), self.reaper_config);
        let reaper_shutdown = reaper.shutdown_handle();
        let reaper_handle = tokio::spawn(async move { reaper.run().await });

        info!(
            store = self.store.store_type(),
            default_timeout_secs = self.default_timeout.as_secs(),
            "OrchestratorRuntime started"
        );

        Ok(OrchestratorRuntime {
            service,
            worker_handle,
            worker_shutdown,
            reaper_handle,
            reaper_shutdown,
        })
    }
}

/// A running orchestration engine.
pub struct OrchestratorRuntime {
    service: ClusterService,
    worker_handle: JoinHandle<()>,
    worker_shutdown: Arc<Notify>,
    reaper_handle: JoinHandle<()>,
    reaper_shutdown: Arc<Notify>,
}

impl OrchestratorRuntime {
    /// Create a new builder.
    pub fn builder() -> OrchestratorRuntimeBuilder {
        OrchestratorRuntimeBuilder::new()
    }

    /// The cluster service backed by this runtime.
    pub fn service(&self) -> &ClusterService {
        &self.service
    }

    /// Check if the workflow worker is still running.
    pub fn is_running(&self) -> bool {
        !self.worker_handle.is_finished()
    }

    /// Gracefully shut down the runtime.
    ///
    /// Stops the reaper first so no new destroys are scheduled, then lets the
    /// worker drain in-flight workflows.
    pub async fn shutdown(self) -> Result<()> {
        info!("OrchestratorRuntime shutting down...");

        self.reaper_shutdown.notify_one();
        if let Err(e) = self.reaper_handle.await {
            error!("Expiry reaper task panicked: {}", e);
        }

        self.worker_shutdown.notify_one();
        match self.worker_handle.await {
            Ok(()) => {
                info!("OrchestratorRuntime shutdown complete");
                Ok(())
            }
            Err(e) => {
                error!("Workflow worker task panicked: {}", e);
                Err(Error::Other(format!("workflow worker task panicked: {}", e)))
            }
        }
    }
}
