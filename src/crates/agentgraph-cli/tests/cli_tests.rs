//! Integration tests for agentgraph-cli
//!
//! These tests cover:
//! - `agentgraph.toml` parsing and validation
//! - Checkpoint backend selection
//! - A full workflow run against a shell-script agent, paused for approval
//!   and resumed the way `agentgraph resume --approve` does it

use agentgraph_checkpoint::{CheckpointSaver, SessionDirCheckpointSaver};
use agentgraph_cli::{
    resume_input, AgentConfig, CheckpointBackend, CliConfig, OutputFormat, ProcessBridge,
    StepPrinter,
};
use agentgraph_core::prebuilt::{ralph_workflow, RalphState};
use agentgraph_core::{
    Checkpoint, ExecutionOptions, GraphConfig, ResumeRequest, RunStatus, TaskStatus,
};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

const FULL_CONFIG: &str = r#"
log_level = "debug"

[checkpoint]
backend = "file"
dir = "/tmp/agentgraph-runs"

[engine]
max_concurrency = 2
max_task_retries = 1
max_review_iterations = 5
auto_approve = true

[agent]
command = "codex"
args = ["exec", "{task}"]
timeout_secs = 120
"#;

#[test]
fn test_full_config_parses() {
    let config = CliConfig::from_toml_str(FULL_CONFIG).unwrap();

    assert_eq!(config.log_level, "debug");
    assert_eq!(config.checkpoint.backend, CheckpointBackend::File);
    assert_eq!(config.checkpoint.dir, Path::new("/tmp/agentgraph-runs"));
    assert_eq!(config.engine.max_concurrency, 2);
    assert_eq!(config.engine.max_task_retries, 1);
    assert_eq!(config.engine.max_review_iterations, 5);
    assert!(config.engine.auto_approve);
    assert_eq!(config.agent.command, "codex");
    assert_eq!(config.agent.args, vec!["exec", "{task}"]);
    assert_eq!(config.agent.timeout_secs, 120);
}

#[test]
fn test_partial_sections_keep_defaults() {
    let config = CliConfig::from_toml_str("[engine]\nauto_approve = true\n").unwrap();

    assert!(config.engine.auto_approve);
    assert_eq!(config.engine.max_concurrency, 4);
    assert_eq!(config.engine.max_task_retries, 3);
    assert_eq!(config.agent, AgentConfig::default());
    assert_eq!(config.log_level, "info");
}

#[test]
fn test_unknown_keys_rejected() {
    let err = CliConfig::from_toml_str("[engine]\nmax_retries = 2\n").unwrap_err();
    assert!(format!("{:#}", err).contains("max_retries"));
}

#[test]
fn test_unknown_backend_rejected() {
    assert!(CliConfig::from_toml_str("[checkpoint]\nbackend = \"sqlite\"\n").is_err());
}

#[test]
fn test_invalid_values_rejected() {
    assert!(CliConfig::from_toml_str("[agent]\ncommand = \"  \"\n").is_err());
    assert!(CliConfig::from_toml_str("[agent]\ntimeout_secs = 0\n").is_err());
    assert!(CliConfig::from_toml_str("[engine]\nmax_review_iterations = 0\n").is_err());
}

#[tokio::test]
async fn test_load_from_explicit_path() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("agentgraph.toml");
    fs::write(&path, FULL_CONFIG).unwrap();

    let config = CliConfig::load(Some(&path)).await.unwrap();
    assert_eq!(config.agent.command, "codex");
}

#[tokio::test]
async fn test_load_missing_explicit_path_fails() {
    let dir = TempDir::new().unwrap();
    let err = CliConfig::load(Some(&dir.path().join("absent.toml")))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("absent.toml"));
}

#[tokio::test]
async fn test_checkpoint_dir_override_selects_saver_location() {
    let dir = TempDir::new().unwrap();
    let config = CliConfig::from_toml_str("[checkpoint]\nbackend = \"file\"\n")
        .unwrap()
        .with_checkpoint_dir(dir.path());

    let saver = config.saver();
    saver
        .save(&Checkpoint::new("run-1", serde_json::json!({"goal": "x"})))
        .await
        .unwrap();

    assert!(dir.path().join("run-1.json").exists());
    assert_eq!(saver.list().await.unwrap(), vec!["run-1".to_string()]);
}

#[test]
fn test_resume_flags_build_update() {
    let update = resume_input(Some(r#"{"feedback": ["keep it small"]}"#), true, None).unwrap();
    assert_eq!(update.approved, Some(Some(true)));
    assert_eq!(update.feedback, Some(vec!["keep it small".to_string()]));

    assert!(resume_input(Some("[1, 2]"), false, None).is_err());
}

/// A shell agent that answers by the first line of its prompt.
#[cfg(unix)]
fn scripted_agent(dir: &Path) -> AgentConfig {
    let script = dir.join("agent.sh");
    fs::write(
        &script,
        r#"read -r first
case "$first" in
  Research*) echo "parser lives in src/parse.rs" ;;
  Plan*) echo '[{"id": "1", "content": "write parser"}, {"id": "2", "content": "test parser", "blockedBy": ["1"]}]' ;;
  Review*) echo '{"approved": true, "summary": "looks good"}' ;;
  *) echo "done" ;;
esac
"#,
    )
    .unwrap();
    AgentConfig {
        command: "sh".to_string(),
        args: vec![script.display().to_string()],
        timeout_secs: 30,
    }
}

#[cfg(unix)]
#[tokio::test]
async fn test_run_pause_and_approve_with_process_agent() {
    let dir = TempDir::new().unwrap();
    let sessions = dir.path().join("sessions");
    let mut config = CliConfig::default().with_checkpoint_dir(&sessions);
    config.agent = scripted_agent(dir.path());

    let build = |config: &CliConfig| {
        let bridge = ProcessBridge::from_config(&config.agent, config.engine.max_concurrency);
        let graph_config = GraphConfig::new().with_checkpointer(config.saver());
        ralph_workflow(Arc::new(bridge), config.ralph_config(), graph_config).unwrap()
    };

    let outcome = build(&config)
        .invoke(
            RalphState::for_goal("add a parser"),
            ExecutionOptions::new().with_execution_id("cli-run"),
        )
        .await
        .unwrap();
    assert_eq!(outcome.status, RunStatus::Paused);
    assert_eq!(outcome.paused_at.as_deref(), Some("approve_plan"));
    assert_eq!(outcome.state.tasks.len(), 2);

    let printed = StepPrinter::new(OutputFormat::Text).finished(&outcome);
    assert!(printed.contains("agentgraph resume cli-run --approve"));

    // A second process resumes from disk.
    let input = resume_input(None, true, None).unwrap();
    let outcome = build(&config)
        .resume(
            ResumeRequest::new("cli-run").with_input(input),
            ExecutionOptions::new(),
        )
        .await
        .unwrap();
    assert_eq!(outcome.status, RunStatus::Completed, "{:?}", outcome.error);
    assert!(outcome
        .state
        .tasks
        .iter()
        .all(|task| task.status == TaskStatus::Completed));
    assert_eq!(outcome.state.review.as_ref().map(|r| r.approved), Some(true));

    let stored = config.saver().load("cli-run").await.unwrap().unwrap();
    assert_eq!(stored.metadata.status, RunStatus::Completed);

    let markdown = fs::read_to_string(
        SessionDirCheckpointSaver::new(&sessions)
            .task_list_path("cli-run")
            .unwrap(),
    )
    .unwrap();
    assert!(markdown.contains("- [x] #1 write parser"));
    assert!(markdown.contains("- [x] #2 test parser (blocked by #1)"));
}
