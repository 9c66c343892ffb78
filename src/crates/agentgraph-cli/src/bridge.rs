//! Process-backed agent bridge
//!
//! Each agent turn is one child process. The task text goes to the child's
//! stdin, or into its arguments wherever `{task}` appears; whatever the child
//! prints to stdout is the agent's output. A zero exit status is success.
//!
//! | Situation | Result |
//! |-----------|--------|
//! | exit 0 | `success`, trimmed stdout |
//! | non-zero exit | failure with the tail of stderr |
//! | timeout | failure, child killed |
//! | cancellation | failure, child killed |
//! | command missing | failure |

use crate::config::AgentConfig;
use agentgraph_core::{AgentBridge, SpawnConfig, SpawnResult};
use async_trait::async_trait;
use std::process::{Output, Stdio};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Replaced by the task text in configured arguments.
pub const TASK_PLACEHOLDER: &str = "{task}";

const STDERR_TAIL_CHARS: usize = 2000;

/// Runs a configured command once per agent turn.
#[derive(Debug, Clone)]
pub struct ProcessBridge {
    command: String,
    args: Vec<String>,
    timeout: Duration,
    permits: Arc<Semaphore>,
    cancel: CancellationToken,
}

impl ProcessBridge {
    pub fn new(command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            command: command.into(),
            args,
            timeout: Duration::from_secs(AgentConfig::default().timeout_secs),
            permits: Arc::new(Semaphore::new(Semaphore::MAX_PERMITS)),
            cancel: CancellationToken::new(),
        }
    }

    pub fn from_config(agent: &AgentConfig, max_concurrency: usize) -> Self {
        Self::new(agent.command.clone(), agent.args.clone())
            .with_timeout(Duration::from_secs(agent.timeout_secs))
            .with_max_concurrency(max_concurrency)
    }

    /// Default limit, used when a spawn carries no `timeout_secs`.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_concurrency(mut self, limit: usize) -> Self {
        self.permits = Arc::new(Semaphore::new(limit.max(1)));
        self
    }

    /// Children still running when `cancel` fires are killed.
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    fn uses_placeholder(&self) -> bool {
        self.args.iter().any(|arg| arg.contains(TASK_PLACEHOLDER))
    }

    fn command(&self, input: &str, config: &SpawnConfig) -> Command {
        let mut command = Command::new(&self.command);
        command
            .args(self.args.iter().map(|arg| arg.replace(TASK_PLACEHOLDER, input)))
            .stdin(if self.uses_placeholder() {
                Stdio::null()
            } else {
                Stdio::piped()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &config.working_dir {
            command.current_dir(dir);
        }
        if let Some(model) = &config.model {
            command.env("AGENTGRAPH_MODEL", model);
        }
        command
    }

    fn spawn_result(output: Output) -> SpawnResult {
        let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if output.status.success() {
            return SpawnResult::ok(stdout);
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        let stderr = stderr.trim();
        let tail: String = {
            let skip = stderr.chars().count().saturating_sub(STDERR_TAIL_CHARS);
            stderr.chars().skip(skip).collect()
        };
        let error = if tail.is_empty() {
            format!("agent exited with {}", output.status)
        } else {
            format!("agent exited with {}: {}", output.status, tail)
        };
        SpawnResult {
            success: false,
            output: stdout,
            error: Some(error),
        }
    }
}

#[async_trait]
impl AgentBridge for ProcessBridge {
    #[tracing::instrument(skip(self, task, config), fields(command = %self.command))]
    async fn spawn(&self, task: &str, config: &SpawnConfig) -> SpawnResult {
        let _permit = match self.permits.acquire().await {
            Ok(permit) => permit,
            Err(_) => return SpawnResult::failed("agent pool closed"),
        };
        if self.cancel.is_cancelled() {
            return SpawnResult::failed("cancelled");
        }

        let input = match &config.system_prompt {
            Some(system) => format!("{}\n\n{}", system, task),
            None => task.to_string(),
        };
        let timeout = config
            .timeout_secs
            .map(Duration::from_secs)
            .unwrap_or(self.timeout);

        let mut child = match self.command(&input, config).spawn() {
            Ok(child) => child,
            Err(e) => return SpawnResult::failed(format!("failed to start {}: {}", self.command, e)),
        };
        debug!(pid = ?child.id(), "agent started");

        if let Some(mut stdin) = child.stdin.take() {
            tokio::spawn(async move {
                if let Err(e) = stdin.write_all(input.as_bytes()).await {
                    warn!(error = %e, "failed to write task to agent stdin");
                }
            });
        }

        tokio::select! {
            _ = self.cancel.cancelled() => SpawnResult::failed("cancelled"),
            waited = tokio::time::timeout(timeout, child.wait_with_output()) => match waited {
                Err(_) => {
                    warn!(timeout_secs = timeout.as_secs(), "agent timed out");
                    SpawnResult::failed(format!("agent timed out after {}ms", timeout.as_millis()))
                }
                Ok(Err(e)) => SpawnResult::failed(format!("agent process error: {}", e)),
                Ok(Ok(output)) => Self::spawn_result(output),
            },
        }
    }

    fn name(&self) -> &str {
        "process"
    }
}
