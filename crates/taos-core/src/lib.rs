// Copyright (C) 2025 The taos Authors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! taos-core - Terraform Cluster Orchestration Engine
//!
//! This crate tracks the lifecycle of infrastructure clusters and drives an
//! infrastructure-as-code executor (Terraform) to provision and destroy them.
//! Requests return as soon as the first transition is persisted; the
//! executor runs in background workflows that record their outcome in the
//! cluster store.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                  Transport layer (RequestContext)                 │
//! └──────────────────────────────────────────────────────────────────┘
//!                                  │
//!                                  ▼
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                          ClusterService                          │
//! │      create_cluster · get_cluster · get_clusters · delete        │
//! └──────────────────────────────────────────────────────────────────┘
//!          │ sync writes                    │ WorkItem
//!          ▼                                ▼
//! ┌──────────────────┐   reads/writes  ┌──────────────────────────────┐
//! │   ClusterStore   │◄────────────────│  WorkflowWorker (JoinSet)    │
//! │ postgres/sqlite/ │                 │  provision · destroy         │
//! │      memory      │                 └──────────────────────────────┘
//! └──────────────────┘                                │ one per workflow
//!          ▲                                          ▼
//!          │ expired scan               ┌──────────────────────────────┐
//! ┌──────────────────┐                  │   Executor (terraform/mock)  │
//! │  ExpiryReaper    │                  └──────────────────────────────┘
//! └──────────────────┘
//! ```
//!
//! # Lifecycle
//!
//! ```text
//! requested ──► provisioning ──┬──► provision_success ──┐
//!                              └──► provision_failed  ──┤
//!                                   destroy_failed    ──┼──► destroying ──┬──► destroyed
//!                                   requested         ──┘                 └──► destroy_failed
//! ```
//!
//! `provisioning` and `destroying` act as a lease: while a cluster holds one
//! of them, no second workflow may start and delete requests are refused.
//!
//! # Configuration
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `TAOS_DATABASE_URL` | (required) | `postgres://...` or `sqlite:...` |
//! | `TAOS_LOG_LEVEL` | `error` | `debug`, `info`, `warning`, `error`, `fatal`, `panic` |
//! | `TAOS_LOG_FORMAT` | `text` | `text` or `json` |
//! | `TAOS_DEFAULT_CLUSTER_TIMEOUT` | `1h` | Timeout for requests that carry none |
//! | `TAOS_TERRAFORM_BIN` | `terraform` | Terraform binary |
//! | `TAOS_WORK_DIR` | `.data/workspaces` | Parent of executor working directories |
//! | `TAOS_WORKFLOW_SHUTDOWN_GRACE_SECS` | `30` | Drain period for in-flight workflows |
//! | `TAOS_REAPER_ENABLED` | `true` | Run the expiry reaper |
//! | `TAOS_REAPER_POLL_INTERVAL_SECS` | `60` | Seconds between expiry scans |
//!
//! `RUST_LOG`, when set, overrides `TAOS_LOG_LEVEL`.

#![deny(missing_docs)]

/// Cluster entity, status vocabulary and field updates.
pub mod cluster;

/// Configuration loaded from environment variables.
pub mod config;

/// Per-request context and duration parsing.
pub mod context;

/// Error types for orchestration operations.
pub mod error;

/// Infrastructure executors (Terraform, mock).
pub mod executor;

/// Logger setup.
pub mod logging;

/// Cluster store trait and backends.
pub mod persistence;

/// Background destruction of expired clusters.
pub mod reaper;

/// Embeddable runtime wiring the service, worker and reaper.
pub mod runtime;

/// Work items and the workflow hand-off.
pub mod scheduler;

/// Public request surface.
pub mod service;

/// Provisioning and destruction workflows.
pub mod workflow;

pub use cluster::{Cluster, ClusterStatus};
pub use context::RequestContext;
pub use error::{Error, Result};
pub use service::ClusterService;
