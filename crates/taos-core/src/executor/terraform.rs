// Copyright (C) 2025 The taos Authors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Terraform CLI executor implementation.
//!
//! Runs the `terraform` binary in a private working directory. No store access.
//! Files exchanged with the tool:
//! - Config: {WORK_DIR}/taos-XXXX/main.tf.json
//! - State:  {WORK_DIR}/taos-XXXX/terraform.tfstate
//!
//! Child processes are killed when the calling future is dropped, so a
//! workflow timeout never leaves a stray `terraform apply` behind.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tempfile::TempDir;
use tokio::fs;
use tokio::process::Command;
use tracing::{debug, info, warn};

use super::traits::*;

const CONFIG_FILE: &str = "main.tf.json";
const STATE_FILE: &str = "terraform.tfstate";

/// Executor backed by the Terraform CLI.
pub struct TerraformExecutor {
    binary: PathBuf,
    work_root: PathBuf,
    workspace: Option<TempDir>,
    project: String,
    region: String,
    config: Vec<u8>,
    state: Option<Vec<u8>>,
    initialized: bool,
}

impl TerraformExecutor {
    /// Create an executor that runs `binary` inside a temp dir under `work_root`.
    pub fn new(binary: impl Into<PathBuf>, work_root: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            work_root: work_root.into(),
            workspace: None,
            project: String::new(),
            region: String::new(),
            config: Vec::new(),
            state: None,
            initialized: false,
        }
    }

    /// Working directory, once `initialize` has created it.
    pub fn workspace_path(&self) -> Option<&Path> {
        self.workspace.as_ref().map(|dir| dir.path())
    }

    fn workspace_dir(&self) -> Result<&Path> {
        self.workspace_path().ok_or(ExecutorError::NotInitialized)
    }

    fn ensure_initialized(&self) -> Result<()> {
        if self.initialized {
            Ok(())
        } else {
            Err(ExecutorError::NotInitialized)
        }
    }

    /// Create the working directory and write config and state into it.
    async fn prepare_workspace(&mut self) -> Result<()> {
        if self.config.is_empty() {
            return Err(ExecutorError::InvalidConfig("config is empty".to_string()));
        }
        serde_json::from_slice::<serde_json::Value>(&self.config)
            .map_err(|e| ExecutorError::InvalidConfig(e.to_string()))?;

        if self.workspace.is_none() {
            fs::create_dir_all(&self.work_root).await?;
            let dir = tempfile::Builder::new()
                .prefix("taos-")
                .tempdir_in(&self.work_root)?;
            debug!(workspace = %dir.path().display(), "Created terraform workspace");
            self.workspace = Some(dir);
        }

        let dir = self.workspace_dir()?.to_path_buf();
        fs::write(dir.join(CONFIG_FILE), &self.config).await?;
        if let Some(state) = &self.state {
            fs::write(dir.join(STATE_FILE), state).await?;
        }

        Ok(())
    }

    /// Run a terraform subcommand and return its stdout.
    async fn run(&self, command: &str, args: &[&str]) -> Result<Vec<u8>> {
        let dir = self.workspace_dir()?;

        let mut cmd = Command::new(&self.binary);
        cmd.arg(command)
            .args(args)
            .arg("-no-color")
            .current_dir(dir)
            .env("TF_IN_AUTOMATION", "1")
            .env("TF_INPUT", "0")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if !self.project.is_empty() {
            cmd.env("GOOGLE_PROJECT", &self.project);
        }
        if !self.region.is_empty() {
            cmd.env("GOOGLE_REGION", &self.region);
        }

        debug!(command = %command, workspace = %dir.display(), "Running terraform");
        let output = cmd.output().await?;

        if !output.status.success() {
            let exit_code = output.status.code().unwrap_or(-1);
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            warn!(command = %command, exit_code = exit_code, stderr = %stderr, "terraform failed");
            return Err(ExecutorError::CommandFailed {
                command: command.to_string(),
                exit_code,
                stderr,
            });
        }

        Ok(output.stdout)
    }

    async fn read_state(&self) -> Result<Vec<u8>> {
        let path = self.workspace_dir()?.join(STATE_FILE);
        match fs::read(&path).await {
            Ok(state) => Ok(state),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl Executor for TerraformExecutor {
    fn executor_type(&self) -> &'static str {
        "terraform"
    }

    fn set_project(&mut self, project: &str) {
        self.project = project.to_string();
    }

    fn set_region(&mut self, region: &str) {
        self.region = region.to_string();
    }

    fn set_config(&mut self, config: &[u8]) {
        self.config = config.to_vec();
    }

    fn set_state(&mut self, state: &[u8]) {
        self.state = Some(state.to_vec());
    }

    async fn initialize(&mut self) -> Result<()> {
        self.prepare_workspace().await?;
        self.run("init", &["-input=false"]).await?;
        self.initialized = true;
        Ok(())
    }

    async fn plan(&mut self, destroy: bool) -> Result<String> {
        self.ensure_initialized()?;
        let stdout = if destroy {
            self.run("plan", &["-input=false", "-destroy"]).await?
        } else {
            self.run("plan", &["-input=false"]).await?
        };
        Ok(String::from_utf8_lossy(&stdout).into_owned())
    }

    async fn apply(&mut self) -> Result<ExecutorOutcome> {
        self.ensure_initialized()?;
        self.run("apply", &["-input=false", "-auto-approve"]).await?;
        let state = self.read_state().await?;
        self.state = Some(state.clone());
        info!(state_bytes = state.len(), "terraform apply complete");
        Ok(ExecutorOutcome {
            state,
            message: APPLY_SUCCESS.to_string(),
        })
    }

    async fn destroy(&mut self) -> Result<ExecutorOutcome> {
        self.ensure_initialized()?;
        self.run("destroy", &["-input=false", "-auto-approve"]).await?;
        let state = self.read_state().await?;
        self.state = Some(state.clone());
        info!(state_bytes = state.len(), "terraform destroy complete");
        Ok(ExecutorOutcome {
            state,
            message: DESTROY_SUCCESS.to_string(),
        })
    }

    async fn outputs(&mut self) -> Result<Vec<u8>> {
        self.ensure_initialized()?;
        self.run("output", &["-json"]).await
    }
}

/// Factory for [`TerraformExecutor`]s sharing a binary and work root.
#[derive(Debug, Clone)]
pub struct TerraformExecutorFactory {
    binary: PathBuf,
    work_root: PathBuf,
}

impl TerraformExecutorFactory {
    /// Create a factory.
    pub fn new(binary: impl Into<PathBuf>, work_root: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            work_root: work_root.into(),
        }
    }
}

impl ExecutorFactory for TerraformExecutorFactory {
    fn create(&self) -> Box<dyn Executor> {
        Box::new(TerraformExecutor::new(&self.binary, &self.work_root))
    }
}
