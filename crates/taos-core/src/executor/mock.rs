// Copyright (C) 2025 The taos Authors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Mock executor for testing.
//!
//! Simulates the Terraform protocol without touching real infrastructure.
//! The config is still parsed as JSON on `initialize`, so malformed payloads
//! fail the same way they would against the real tool.

use async_trait::async_trait;
use serde_json::{Map, Value, json};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;

use super::traits::*;

/// State snapshot returned by a successful mock apply.
pub const MOCK_STATE: &[u8] = br#"{"version":3,"terraform_version":"0.11.3","serial":2,"lineage":"26655d4c-852a-41e4-b6f1-7b31ff2b2981","modules":[{"path":["root"],"outputs":{"foo":{"sensitive":false,"type":"string","value":"bar"}},"resources":{},"depends_on":[]}]}"#;

/// State snapshot returned by a successful mock destroy.
pub const MOCK_DESTROYED_STATE: &[u8] = br#"{"version":3,"terraform_version":"0.11.3","serial":3,"lineage":"26655d4c-852a-41e4-b6f1-7b31ff2b2981","modules":[{"path":["root"],"outputs":{},"resources":{},"depends_on":[]}]}"#;

/// One recorded executor operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutorCall {
    /// Operation name (`initialize`, `plan`, `apply`, `destroy`, `outputs`).
    pub operation: &'static str,
    /// Project configured at call time.
    pub project: String,
    /// Region configured at call time.
    pub region: String,
    /// Whether a state snapshot was configured.
    pub has_state: bool,
}

/// Mock executor for testing.
///
/// Clones share the call log, so a prototype held by a
/// [`MockExecutorFactory`] sees every call made by the executors it created.
#[derive(Debug, Clone)]
pub struct MockExecutor {
    calls: Arc<Mutex<Vec<ExecutorCall>>>,
    project: String,
    region: String,
    config: Vec<u8>,
    state: Option<Vec<u8>>,
    initialized: bool,
    /// Optional delay to simulate execution time (in milliseconds)
    pub execution_delay_ms: u64,
    /// Fail `initialize`.
    pub fail_initialize: bool,
    /// Fail `plan`.
    pub fail_plan: bool,
    /// Fail `apply`.
    pub fail_apply: bool,
    /// Fail `destroy`.
    pub fail_destroy: bool,
    /// Fail `outputs`.
    pub fail_outputs: bool,
    /// Error text for simulated failures.
    pub failure_message: String,
    /// If true, every async operation waits forever.
    /// This is useful for testing timeout enforcement.
    pub never_complete: bool,
}

impl Default for MockExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl MockExecutor {
    /// Create a mock executor where every operation succeeds.
    pub fn new() -> Self {
        Self {
            calls: Arc::new(Mutex::new(Vec::new())),
            project: String::new(),
            region: String::new(),
            config: Vec::new(),
            state: None,
            initialized: false,
            execution_delay_ms: 10,
            fail_initialize: false,
            fail_plan: false,
            fail_apply: false,
            fail_destroy: false,
            fail_outputs: false,
            failure_message: "Mock failure".to_string(),
            never_complete: false,
        }
    }

    /// Create a mock executor where every operation fails.
    pub fn failing() -> Self {
        Self {
            fail_initialize: true,
            fail_plan: true,
            fail_apply: true,
            fail_destroy: true,
            fail_outputs: true,
            ..Self::new()
        }
    }

    /// Create a mock executor whose operations never complete on their own.
    pub fn never_completing() -> Self {
        Self {
            execution_delay_ms: 0,
            never_complete: true,
            ..Self::new()
        }
    }

    /// Snapshot of every recorded call.
    pub async fn calls(&self) -> Vec<ExecutorCall> {
        self.calls.lock().await.clone()
    }

    /// Names of recorded operations, in order.
    pub async fn operations(&self) -> Vec<&'static str> {
        self.calls
            .lock()
            .await
            .iter()
            .map(|call| call.operation)
            .collect()
    }

    async fn simulate(&self, operation: &'static str, fail: bool) -> Result<()> {
        self.calls.lock().await.push(ExecutorCall {
            operation,
            project: self.project.clone(),
            region: self.region.clone(),
            has_state: self.state.is_some(),
        });

        if self.never_complete {
            std::future::pending::<()>().await;
        }

        if self.execution_delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.execution_delay_ms)).await;
        }

        if fail {
            return Err(ExecutorError::Other(self.failure_message.clone()));
        }

        Ok(())
    }

    fn parsed_config(&self) -> Result<Value> {
        if self.config.is_empty() {
            return Err(ExecutorError::InvalidConfig("config is empty".to_string()));
        }
        serde_json::from_slice(&self.config).map_err(|e| ExecutorError::InvalidConfig(e.to_string()))
    }

    fn ensure_initialized(&self) -> Result<()> {
        if self.initialized {
            Ok(())
        } else {
            Err(ExecutorError::NotInitialized)
        }
    }
}

/// Render the config's `output` block the way `terraform output -json` does.
fn render_outputs(config: &Value) -> Value {
    let mut rendered = Map::new();
    if let Some(outputs) = config.get("output").and_then(Value::as_object) {
        for (name, definition) in outputs {
            let value = definition.get("value").cloned().unwrap_or(Value::Null);
            let sensitive = definition
                .get("sensitive")
                .and_then(Value::as_bool)
                .unwrap_or(false);
            let kind = match &value {
                Value::Array(_) => "list",
                Value::Object(_) => "map",
                _ => "string",
            };
            rendered.insert(
                name.clone(),
                json!({"sensitive": sensitive, "type": kind, "value": value}),
            );
        }
    }
    Value::Object(rendered)
}

#[async_trait]
impl Executor for MockExecutor {
    fn executor_type(&self) -> &'static str {
        "mock"
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
        self.simulate("initialize", self.fail_initialize).await?;
        self.parsed_config()?;
        self.initialized = true;
        Ok(())
    }

    async fn plan(&mut self, destroy: bool) -> Result<String> {
        self.ensure_initialized()?;
        self.simulate("plan", self.fail_plan).await?;
        if destroy {
            Ok("Plan: 0 to add, 0 to change, 1 to destroy.".to_string())
        } else {
            Ok("Plan: 1 to add, 0 to change, 0 to destroy.".to_string())
        }
    }

    async fn apply(&mut self) -> Result<ExecutorOutcome> {
        self.ensure_initialized()?;
        self.simulate("apply", self.fail_apply).await?;
        self.state = Some(MOCK_STATE.to_vec());
        Ok(ExecutorOutcome {
            state: MOCK_STATE.to_vec(),
            message: APPLY_SUCCESS.to_string(),
        })
    }

    async fn destroy(&mut self) -> Result<ExecutorOutcome> {
        self.ensure_initialized()?;
        self.simulate("destroy", self.fail_destroy).await?;
        self.state = Some(MOCK_DESTROYED_STATE.to_vec());
        Ok(ExecutorOutcome {
            state: MOCK_DESTROYED_STATE.to_vec(),
            message: DESTROY_SUCCESS.to_string(),
        })
    }

    async fn outputs(&mut self) -> Result<Vec<u8>> {
        self.ensure_initialized()?;
        self.simulate("outputs", self.fail_outputs).await?;
        let config = self.parsed_config()?;
        serde_json::to_vec(&render_outputs(&config)).map_err(|e| ExecutorError::Other(e.to_string()))
    }
}

/// Factory handing out clones of a prototype [`MockExecutor`].
pub struct MockExecutorFactory {
    prototype: MockExecutor,
    created: AtomicUsize,
}

impl MockExecutorFactory {
    /// Create a factory from a prototype.
    pub fn new(prototype: MockExecutor) -> Self {
        Self {
            prototype,
            created: AtomicUsize::new(0),
        }
    }

    /// The prototype; its call log covers every created executor.
    pub fn prototype(&self) -> &MockExecutor {
        &self.prototype
    }

    /// Number of executors created so far.
    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }
}

impl ExecutorFactory for MockExecutorFactory {
    fn create(&self) -> Box<dyn Executor> {
        self.created.fetch_add(1, Ordering::SeqCst);
        Box::new(self.prototype.clone())
    }
}
