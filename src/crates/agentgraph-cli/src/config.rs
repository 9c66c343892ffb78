//! `agentgraph.toml` schema and loading
//!
//! ```toml
//! log_level = "info"
//!
//! [checkpoint]
//! backend = "session"        # "session" | "file" | "memory"
//! dir = ".agentgraph"
//!
//! [engine]
//! max_concurrency = 4
//! max_task_retries = 3
//! max_review_iterations = 3
//! auto_approve = false
//!
//! [agent]
//! command = "claude"
//! args = ["-p"]
//! timeout_secs = 600
//! ```
//!
//! Every field has a default, so an empty file (or no file) is valid.
//! Command-line flags and their environment variables are applied on top.

use agentgraph_checkpoint::{
    CheckpointSaver, FileCheckpointSaver, InMemoryCheckpointSaver, SessionDirCheckpointSaver,
};
use agentgraph_core::prebuilt::RalphConfig;
use agentgraph_core::{SchedulerConfig, SpawnConfig};
use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// File looked up in the working directory when `--config` is not given.
pub const DEFAULT_CONFIG_FILE: &str = "agentgraph.toml";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CliConfig {
    pub log_level: String,
    pub checkpoint: CheckpointConfig,
    pub engine: EngineConfig,
    pub agent: AgentConfig,
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            checkpoint: CheckpointConfig::default(),
            engine: EngineConfig::default(),
            agent: AgentConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointBackend {
    /// One directory per run with a `tasks.md` sidecar.
    Session,
    /// One JSON file per run.
    File,
    /// Process-local; runs cannot be resumed by a later invocation.
    Memory,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CheckpointConfig {
    pub backend: CheckpointBackend,
    pub dir: PathBuf,
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            backend: CheckpointBackend::Session,
            dir: PathBuf::from(".agentgraph"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Agents running at once, across parallel nodes and task waves.
    pub max_concurrency: usize,
    pub max_task_retries: u32,
    pub max_review_iterations: u32,
    pub auto_approve: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 4,
            max_task_retries: agentgraph_core::scheduler::DEFAULT_MAX_TASK_RETRIES,
            max_review_iterations: 3,
            auto_approve: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AgentConfig {
    /// Executable started once per agent turn.
    pub command: String,
    /// Arguments; `{task}` is replaced by the task text, otherwise the task
    /// is written to stdin.
    pub args: Vec<String>,
    pub timeout_secs: u64,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            command: "claude".to_string(),
            args: vec!["-p".to_string()],
            timeout_secs: 600,
        }
    }
}

impl CliConfig {
    /// Parse a TOML document.
    pub fn from_toml_str(source: &str) -> anyhow::Result<Self> {
        let config: CliConfig = toml::from_str(source).context("invalid agentgraph config")?;
        config.validate()?;
        Ok(config)
    }

    /// Load `path`, or `agentgraph.toml` from the working directory when it
    /// exists, or the defaults.
    pub async fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => {
                let fallback = PathBuf::from(DEFAULT_CONFIG_FILE);
                if !tokio::fs::try_exists(&fallback).await.unwrap_or(false) {
                    debug!("no config file, using defaults");
                    return Ok(Self::default());
                }
                fallback
            }
        };

        let source = tokio::fs::read_to_string(&path)
            .await
            .with_context(|| format!("failed to read config {}", path.display()))?;
        let config = Self::from_toml_str(&source)
            .with_context(|| format!("failed to load config {}", path.display()))?;
        debug!(path = %path.display(), "loaded config");
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.engine.max_concurrency == 0 {
            bail!("engine.max_concurrency must be at least 1");
        }
        if self.engine.max_review_iterations == 0 {
            bail!("engine.max_review_iterations must be at least 1");
        }
        if self.agent.command.trim().is_empty() {
            bail!("agent.command must not be empty");
        }
        if self.agent.timeout_secs == 0 {
            bail!("agent.timeout_secs must be at least 1");
        }
        Ok(())
    }

    pub fn with_checkpoint_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.checkpoint.dir = dir.into();
        self
    }

    pub fn with_log_level(mut self, level: impl Into<String>) -> Self {
        self.log_level = level.into();
        self
    }

    /// The configured checkpoint backend.
    pub fn saver(&self) -> Arc<dyn CheckpointSaver> {
        let dir = self.checkpoint.dir.clone();
        match self.checkpoint.backend {
            CheckpointBackend::Session => Arc::new(SessionDirCheckpointSaver::new(dir)),
            CheckpointBackend::File => Arc::new(FileCheckpointSaver::new(dir)),
            CheckpointBackend::Memory => Arc::new(InMemoryCheckpointSaver::new()),
        }
    }

    /// Workflow settings derived from `[engine]` and `[agent]`.
    ///
    /// Approval is always part of the graph so that runs started with and
    /// without `auto_approve` resume against the same node set; auto-approval
    /// is applied per run instead.
    pub fn ralph_config(&self) -> RalphConfig {
        RalphConfig::default()
            .with_max_iterations(self.engine.max_review_iterations)
            .with_require_approval(true)
            .with_scheduler(SchedulerConfig::default().with_max_retries(self.engine.max_task_retries))
            .with_spawn_config(SpawnConfig::default().with_timeout_secs(self.agent.timeout_secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_document_uses_defaults() {
        let config = CliConfig::from_toml_str("").unwrap();
        assert_eq!(config, CliConfig::default());
        assert_eq!(config.checkpoint.backend, CheckpointBackend::Session);
    }

    #[test]
    fn test_zero_concurrency_rejected() {
        let err = CliConfig::from_toml_str("[engine]\nmax_concurrency = 0").unwrap_err();
        assert!(err.to_string().contains("max_concurrency"));
    }

    #[test]
    fn test_ralph_config_follows_engine_section() {
        let config =
            CliConfig::from_toml_str("[engine]\nmax_task_retries = 5\nmax_review_iterations = 2")
                .unwrap();
        let ralph = config.ralph_config();
        assert_eq!(ralph.max_iterations, 2);
        assert_eq!(ralph.scheduler.max_retries, 5);
        assert!(ralph.require_approval);
        assert_eq!(ralph.spawn.timeout_secs, Some(600));
    }
}
