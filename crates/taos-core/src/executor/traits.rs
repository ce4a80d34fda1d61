// Copyright (C) 2025 The taos Authors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Executor trait definitions.
//!
//! Defines the abstract interface for infrastructure executors.

use async_trait::async_trait;
use thiserror::Error;

/// Message recorded after a successful apply.
pub const APPLY_SUCCESS: &str = "Apply complete! Cluster infrastructure provisioned.";

/// Message recorded after a successful destroy.
pub const DESTROY_SUCCESS: &str = "Destroy complete! Cluster infrastructure removed.";

/// Errors from executor operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ExecutorError {
    /// The infrastructure-as-code payload could not be parsed.
    #[error("Invalid terraform config: {0}")]
    InvalidConfig(String),

    /// An operation was invoked before the executor was initialized.
    #[error("Executor not initialized")]
    NotInitialized,

    /// The external tool exited with a non-zero code.
    #[error("{command} failed with exit code {exit_code}: {stderr}")]
    CommandFailed {
        /// Subcommand that failed (e.g. `apply`).
        command: String,
        /// Exit code from the process.
        exit_code: i32,
        /// Standard error output.
        stderr: String,
    },

    /// The operation did not finish within the workflow budget.
    #[error("Execution timeout")]
    Timeout,

    /// I/O operation failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Other error.
    #[error("{0}")]
    Other(String),
}

/// Result type for executor operations.
pub type Result<T> = std::result::Result<T, ExecutorError>;

/// Result of an apply or destroy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutorOutcome {
    /// Infrastructure state snapshot after the operation.
    pub state: Vec<u8>,
    /// Human-readable outcome.
    pub message: String,
}

/// Trait for infrastructure executors.
///
/// Executors are stateful per invocation: configure with the setters, then
/// drive `initialize → plan → apply` (or `destroy`). They do NOT access the
/// cluster store; reconciliation is handled by the caller.
///
/// All async operations may run for minutes and are cancelled by dropping
/// the future.
#[async_trait]
pub trait Executor: Send {
    /// Executor type identifier (e.g., "terraform", "mock").
    fn executor_type(&self) -> &'static str;

    /// Set the target project.
    fn set_project(&mut self, project: &str);

    /// Set the target region.
    fn set_region(&mut self, region: &str);

    /// Set the infrastructure-as-code payload.
    fn set_config(&mut self, config: &[u8]);

    /// Set the last known infrastructure state.
    fn set_state(&mut self, state: &[u8]);

    /// Prepare the executor for the configured target. Idempotent.
    async fn initialize(&mut self) -> Result<()>;

    /// Compute a change plan without mutating remote infrastructure.
    async fn plan(&mut self, destroy: bool) -> Result<String>;

    /// Perform the infrastructure change.
    async fn apply(&mut self) -> Result<ExecutorOutcome>;

    /// Tear down the infrastructure described by the current state.
    async fn destroy(&mut self) -> Result<ExecutorOutcome>;

    /// Extract structured outputs after a successful apply.
    async fn outputs(&mut self) -> Result<Vec<u8>>;
}

/// Creates one executor per workflow.
pub trait ExecutorFactory: Send + Sync {
    /// Build a fresh, unconfigured executor.
    fn create(&self) -> Box<dyn Executor>;
}
