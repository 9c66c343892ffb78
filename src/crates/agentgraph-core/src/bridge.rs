//! Agent Bridge - the seam between the engine and the coding agent
//!
//! Agent nodes and the task scheduler never talk to a model directly. They
//! hand a task description to an [`AgentBridge`], which runs an agent to
//! completion and reports back a [`SpawnResult`]. The engine is agnostic to how
//! that happens: a subprocess, an in-process loop, or a scripted test double.
//!
//! Bridges report failure inside the result rather than as an `Err`, so a
//! failed spawn is an ordinary outcome the caller maps to task status.

use async_trait::async_trait;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Per-spawn options.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpawnConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    /// Wall-clock limit for the spawned agent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<PathBuf>,
}

impl SpawnConfig {
    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    pub fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = Some(secs);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpawnRequest {
    pub task: String,
    #[serde(default)]
    pub config: SpawnConfig,
}

impl SpawnRequest {
    pub fn new(task: impl Into<String>, config: SpawnConfig) -> Self {
        Self {
            task: task.into(),
            config,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpawnResult {
    pub success: bool,
    pub output: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SpawnResult {
    pub fn ok(output: impl Into<String>) -> Self {
        Self {
            success: true,
            output: output.into(),
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            output: String::new(),
            error: Some(error.into()),
        }
    }
}

#[async_trait]
pub trait AgentBridge: Send + Sync {
    /// Run one agent on `task` and wait for it to finish.
    async fn spawn(&self, task: &str, config: &SpawnConfig) -> SpawnResult;

    /// Run several agents concurrently. Results are returned in request order.
    async fn spawn_parallel(&self, requests: Vec<SpawnRequest>) -> Vec<SpawnResult> {
        join_all(
            requests
                .iter()
                .map(|request| self.spawn(&request.task, &request.config)),
        )
        .await
    }

    fn name(&self) -> &str {
        "agent"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    struct EchoBridge;

    #[async_trait]
    impl AgentBridge for EchoBridge {
        async fn spawn(&self, task: &str, _config: &SpawnConfig) -> SpawnResult {
            // Later requests finish first to exercise ordering.
            let delay = 50u64.saturating_sub(task.len() as u64 * 10);
            tokio::time::sleep(Duration::from_millis(delay)).await;
            if task.starts_with("fail") {
                SpawnResult::failed(format!("could not {}", task))
            } else {
                SpawnResult::ok(task.to_uppercase())
            }
        }
    }

    #[tokio::test]
    async fn test_spawn_parallel_preserves_order() {
        let results = EchoBridge
            .spawn_parallel(vec![
                SpawnRequest::new("a", SpawnConfig::default()),
                SpawnRequest::new("bbb", SpawnConfig::default()),
                SpawnRequest::new("fail", SpawnConfig::default()),
            ])
            .await;

        assert_eq!(results[0], SpawnResult::ok("A"));
        assert_eq!(results[1], SpawnResult::ok("BBB"));
        assert!(!results[2].success);
        assert_eq!(results[2].error.as_deref(), Some("could not fail"));
    }
}
