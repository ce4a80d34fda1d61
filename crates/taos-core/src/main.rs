// Copyright (C) 2025 The taos Authors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! taos - Terraform cluster orchestration service
//!
//! Runs the orchestration engine against the configured store:
//! - Workflow worker (provision and destroy clusters with terraform)
//! - Expiry reaper (destroy clusters that outlived their timeout)

use std::sync::Arc;
use tracing::{info, warn};

use taos_core::config::Config;
use taos_core::executor::TerraformExecutorFactory;
use taos_core::logging;
use taos_core::persistence;
use taos_core::reaper::ReaperConfig;
use taos_core::runtime::OrchestratorRuntime;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    let dotenv = dotenvy::dotenv();

    // Load configuration
    let config = Config::from_env()?;

    // Initialize logging
    logging::init(&config.logging)?;
    if let Err(e) = dotenv {
        warn!("No .env file loaded: {}", e);
    }

    info!(
        terraform_bin = %config.terraform_bin.display(),
        work_dir = %config.work_dir.display(),
        "Starting taos"
    );

    // Connect to the store and run migrations
    let store = persistence::connect(&config.database_url).await?;
    info!(store = store.store_type(), "Cluster store ready");

    let executor_factory = Arc::new(TerraformExecutorFactory::new(
        &config.terraform_bin,
        &config.work_dir,
    ));

    // Start the runtime
    let runtime = OrchestratorRuntime::builder()
        .store(store)
        .executor_factory(executor_factory)
        .default_timeout(config.default_cluster_timeout)
        .reaper_config(ReaperConfig::from_env())
        .shutdown_grace(config.shutdown_grace)
        .build()?
        .start()
        .await?;

    info!("taos ready");

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");

    // Graceful shutdown
    runtime.shutdown().await?;

    info!("taos shut down");

    Ok(())
}
