// Copyright (C) 2025 The taos Authors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Per-request context supplied by the transport layer.

use std::time::Duration;

use uuid::Uuid;

/// Caller-supplied configuration for a single request.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    request_id: String,
    terraform_config: Vec<u8>,
    timeout: String,
    project: String,
    region: String,
    name: Option<String>,
}

impl RequestContext {
    /// Create a context for the given correlation id.
    ///
    /// An empty id is replaced with a fresh UUID.
    pub fn new(request_id: impl Into<String>) -> Self {
        let mut request_id = request_id.into();
        if request_id.is_empty() {
            request_id = Uuid::new_v4().to_string();
        }
        Self {
            request_id,
            ..Default::default()
        }
    }

    /// Set the infrastructure-as-code payload.
    pub fn with_terraform_config(mut self, config: impl Into<Vec<u8>>) -> Self {
        self.terraform_config = config.into();
        self
    }

    /// Set the desired timeout as a duration string (e.g. `10m`).
    pub fn with_timeout(mut self, timeout: impl Into<String>) -> Self {
        self.timeout = timeout.into();
        self
    }

    /// Set the target project.
    pub fn with_project(mut self, project: impl Into<String>) -> Self {
        self.project = project.into();
        self
    }

    /// Set the target region.
    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = region.into();
        self
    }

    /// Set a display name for the cluster.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Correlation id threaded through every store call.
    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    /// Infrastructure-as-code payload.
    pub fn terraform_config(&self) -> &[u8] {
        &self.terraform_config
    }

    /// Raw timeout string.
    pub fn timeout(&self) -> &str {
        &self.timeout
    }

    /// Target project.
    pub fn project(&self) -> &str {
        &self.project
    }

    /// Target region.
    pub fn region(&self) -> &str {
        &self.region
    }

    /// Display name, if supplied.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }
}

/// Parse a duration string such as `90s`, `10m`, `1h30m` or `1.5h`.
///
/// Units: `ns`, `us`, `µs`, `ms`, `s`, `m`, `h`. A bare `0` is accepted.
pub fn parse_duration(input: &str) -> Result<Duration, String> {
    let s = input.trim();
    if s.is_empty() {
        return Err("empty duration".to_string());
    }
    if s == "0" {
        return Ok(Duration::ZERO);
    }

    let mut total_nanos: f64 = 0.0;
    let mut rest = s;

    while !rest.is_empty() {
        let number_len = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(rest.len());
        if number_len == 0 {
            return Err(format!("invalid duration '{}': expected a number", input));
        }
        let value: f64 = rest[..number_len]
            .parse()
            .map_err(|_| format!("invalid duration '{}': bad number", input))?;
        rest = &rest[number_len..];

        let unit_len = rest
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(rest.len());
        let unit_nanos = match &rest[..unit_len] {
            "ns" => 1.0,
            "us" | "µs" => 1e3,
            "ms" => 1e6,
            "s" => 1e9,
            "m" => 60.0 * 1e9,
            "h" => 3600.0 * 1e9,
            "" => return Err(format!("invalid duration '{}': missing unit", input)),
            unit => return Err(format!("invalid duration '{}': unknown unit '{}'", input, unit)),
        };
        rest = &rest[unit_len..];

        total_nanos += value * unit_nanos;
    }

    if !total_nanos.is_finite() || total_nanos > u64::MAX as f64 {
        return Err(format!("invalid duration '{}': out of range", input));
    }

    Ok(Duration::from_nanos(total_nanos.round() as u64))
}
