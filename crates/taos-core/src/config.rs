// Copyright (C) 2025 The taos Authors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Configuration for taos.

use std::path::PathBuf;
use std::time::Duration;

use crate::context::parse_duration;
use crate::logging::{LogFormat, LoggingConfig};

/// Default cluster time budget when a request does not carry one.
pub const DEFAULT_CLUSTER_TIMEOUT: Duration = Duration::from_secs(3600);

/// Process configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Store URL (`postgres://...` or `sqlite:...`).
    pub database_url: String,
    /// Logger settings.
    pub logging: LoggingConfig,
    /// Time budget applied when a create request has no timeout.
    pub default_cluster_timeout: Duration,
    /// Terraform binary used by the executor.
    pub terraform_bin: PathBuf,
    /// Parent directory for executor working directories.
    pub work_dir: PathBuf,
    /// How long shutdown waits for in-flight workflows.
    pub shutdown_grace: Duration,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary variable source.
    pub fn from_lookup<F>(get: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let database_url =
            get("TAOS_DATABASE_URL").ok_or(ConfigError::MissingEnvVar("TAOS_DATABASE_URL"))?;

        let level = get("TAOS_LOG_LEVEL").unwrap_or_else(|| "error".to_string());
        let format = match get("TAOS_LOG_FORMAT") {
            Some(raw) => raw
                .parse::<LogFormat>()
                .map_err(|_| ConfigError::InvalidValue("TAOS_LOG_FORMAT", raw))?,
            None => LogFormat::default(),
        };

        let default_cluster_timeout = match get("TAOS_DEFAULT_CLUSTER_TIMEOUT") {
            Some(raw) => match parse_duration(&raw) {
                Ok(timeout) if !timeout.is_zero() => timeout,
                _ => return Err(ConfigError::InvalidValue("TAOS_DEFAULT_CLUSTER_TIMEOUT", raw)),
            },
            None => DEFAULT_CLUSTER_TIMEOUT,
        };

        let terraform_bin =
            PathBuf::from(get("TAOS_TERRAFORM_BIN").unwrap_or_else(|| "terraform".to_string()));

        let work_dir =
            PathBuf::from(get("TAOS_WORK_DIR").unwrap_or_else(|| ".data/workspaces".to_string()));

        let shutdown_grace_secs = match get("TAOS_WORKFLOW_SHUTDOWN_GRACE_SECS") {
            Some(raw) => raw.parse::<u64>().map_err(|_| {
                ConfigError::InvalidValue("TAOS_WORKFLOW_SHUTDOWN_GRACE_SECS", raw)
            })?,
            None => 30,
        };

        Ok(Self {
            database_url,
            logging: LoggingConfig { level, format },
            default_cluster_timeout,
            terraform_bin,
            work_dir,
            shutdown_grace: Duration::from_secs(shutdown_grace_secs),
        })
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A required environment variable is missing.
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(&'static str),
    /// A variable is set to a value that cannot be used.
    #[error("Invalid value for {0}: {1}")]
    InvalidValue(&'static str, String),
}
