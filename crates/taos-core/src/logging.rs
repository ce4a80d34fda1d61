// Copyright (C) 2025 The taos Authors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Logger setup.
//!
//! The subscriber is installed once at process start from an explicit
//! [`LoggingConfig`]. Library code only emits `tracing` events.

use std::str::FromStr;

use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::error::{Error, Result};

/// Output format for log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Human-readable text.
    #[default]
    Text,
    /// One JSON object per line.
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "text" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            other => Err(format!("unknown log format: {}", other)),
        }
    }
}

/// Logger settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingConfig {
    /// One of `debug`, `info`, `warning`, `error`, `fatal`, `panic`.
    pub level: String,
    /// Output format.
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "error".to_string(),
            format: LogFormat::Text,
        }
    }
}

impl LoggingConfig {
    /// Filter directive for the configured level. Unknown levels fall back to `error`.
    pub fn directive(&self) -> &'static str {
        match self.level.to_ascii_lowercase().as_str() {
            "trace" => "trace",
            "debug" => "debug",
            "info" => "info",
            "warn" | "warning" => "warn",
            _ => "error",
        }
    }
}

/// Install the global subscriber. `RUST_LOG` overrides the configured level.
pub fn init(config: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.directive()));

    let installed = match config.format {
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_current_span(true)
            .with_env_filter(filter)
            .try_init(),
        LogFormat::Text => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .try_init(),
    };
    installed.map_err(|e| Error::Other(format!("Failed to initialize logging: {}", e)))?;

    info!(
        event = "startup",
        level = config.directive(),
        format = ?config.format,
        "logging begins"
    );

    Ok(())
}
