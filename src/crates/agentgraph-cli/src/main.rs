//! agentgraph - run research → plan → implement → review workflows from the terminal

use agentgraph_checkpoint::{render_task_markdown, CheckpointSaver};
use agentgraph_cli::{
    resume_input, CheckpointBackend, CliConfig, OutputFormat, ProcessBridge, StepPrinter,
};
use agentgraph_core::prebuilt::{ralph_workflow, RalphState};
use agentgraph_core::{
    CompiledGraph, EventStream, ExecutionOptions, GraphConfig, ResumeRequest, RunEvent, RunStatus,
    StateUpdate,
};
use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use futures::StreamExt;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "agentgraph")]
#[command(about = "Run agent workflows as checkpointed graphs", long_about = None)]
#[command(version)]
struct Cli {
    /// Config file (defaults to ./agentgraph.toml when present)
    #[arg(long, global = true, env = "AGENTGRAPH_CONFIG")]
    config: Option<PathBuf>,

    /// Directory for checkpoints, overriding the config file
    #[arg(long, global = true, env = "AGENTGRAPH_CHECKPOINT_DIR")]
    checkpoint_dir: Option<PathBuf>,

    /// Log filter, e.g. "debug" or "agentgraph_core=trace"
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a new workflow run for a goal
    Run {
        /// What the agents should accomplish
        #[arg(short, long)]
        goal: String,

        /// Execution id (a UUID is generated when omitted)
        #[arg(long)]
        execution_id: Option<String>,

        /// Skip the plan approval pause
        #[arg(long)]
        auto_approve: bool,

        /// Print one JSON object per event
        #[arg(long)]
        json: bool,
    },

    /// Continue a paused, cancelled or interrupted run
    Resume {
        /// Execution id
        id: String,

        /// JSON object of state fields to merge before continuing
        #[arg(short, long)]
        input: Option<String>,

        /// Approve the pending plan
        #[arg(long, conflicts_with = "reject")]
        approve: bool,

        /// Reject the pending plan with feedback for the planner
        #[arg(long, value_name = "FEEDBACK")]
        reject: Option<String>,

        /// Print one JSON object per event
        #[arg(long)]
        json: bool,
    },

    /// Inspect stored checkpoints
    #[command(subcommand)]
    Checkpoints(CheckpointCommands),

    /// Print the task list of a run as a markdown checklist
    Tasks {
        /// Execution id
        id: String,
    },
}

#[derive(Subcommand)]
enum CheckpointCommands {
    /// List stored runs
    List,
    /// Print a checkpoint as JSON
    Show {
        /// Execution id
        id: String,
    },
    /// Delete a checkpoint
    Delete {
        /// Execution id
        id: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    let mut config = CliConfig::load(cli.config.as_deref()).await?;
    if let Some(dir) = cli.checkpoint_dir {
        config = config.with_checkpoint_dir(dir);
    }
    init_tracing(cli.log_level.as_deref(), &config.log_level);

    match cli.command {
        Commands::Run {
            goal,
            execution_id,
            auto_approve,
            json,
        } => {
            let cancel = cancel_on_ctrl_c();
            let graph = build_graph(&config, &cancel)?;
            let mut options = ExecutionOptions::new()
                .with_cancel(cancel)
                .with_auto_approve(auto_approve || config.engine.auto_approve);
            if let Some(id) = execution_id {
                options = options.with_execution_id(id);
            }
            info!(goal = %goal, "starting workflow");
            let events = graph.stream(RalphState::for_goal(goal), options);
            print_events(events, printer(json)).await
        }
        Commands::Resume {
            id,
            input,
            approve,
            reject,
            json,
        } => {
            let update = resume_input(input.as_deref(), approve, reject.as_deref())?;
            let cancel = cancel_on_ctrl_c();
            let graph = build_graph(&config, &cancel)?;
            let mut request = ResumeRequest::new(id.clone());
            if !update.is_empty() {
                request = request.with_input(update);
            }
            let options = ExecutionOptions::new()
                .with_cancel(cancel)
                .with_auto_approve(config.engine.auto_approve);
            let events = graph
                .resume_stream(request, options)
                .await
                .with_context(|| format!("cannot resume {}", id))?;
            print_events(events, printer(json)).await
        }
        Commands::Checkpoints(command) => {
            checkpoints(&config, command).await?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Tasks { id } => {
            let saver = config.saver();
            let checkpoint = saver
                .load(&id)
                .await?
                .with_context(|| format!("no checkpoint for {}", id))?;
            match checkpoint.tasks() {
                Some(tasks) if !tasks.is_empty() => print!("{}", render_task_markdown(tasks)),
                _ => println!("{} has no tasks yet", id),
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}

/// `--log-level` wins over `RUST_LOG`, which wins over the config file.
fn init_tracing(flag: Option<&str>, configured: &str) {
    let filter = match flag {
        Some(level) => EnvFilter::new(level),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(configured)),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn cancel_on_ctrl_c() -> CancellationToken {
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, cancelling run");
            token.cancel();
        }
    });
    cancel
}

fn build_graph(
    config: &CliConfig,
    cancel: &CancellationToken,
) -> anyhow::Result<CompiledGraph<RalphState>> {
    if config.checkpoint.backend == CheckpointBackend::Memory {
        warn!("memory checkpoints are lost when this process exits; the run cannot be resumed later");
    }
    let bridge = ProcessBridge::from_config(&config.agent, config.engine.max_concurrency)
        .with_cancel(cancel.clone());
    let graph_config = GraphConfig::new()
        .with_checkpointer(config.saver())
        .with_max_concurrency(config.engine.max_concurrency);
    ralph_workflow(Arc::new(bridge), config.ralph_config(), graph_config)
        .context("failed to build workflow")
}

fn printer(json: bool) -> StepPrinter {
    StepPrinter::new(if json {
        OutputFormat::Json
    } else {
        OutputFormat::Text
    })
}

async fn print_events(
    mut events: EventStream<RalphState>,
    printer: StepPrinter,
) -> anyhow::Result<ExitCode> {
    while let Some(event) = events.next().await {
        println!("{}", printer.render(&event));
        if let RunEvent::Finished(outcome) = event {
            return Ok(match outcome.status {
                RunStatus::Completed | RunStatus::Paused => ExitCode::SUCCESS,
                RunStatus::Cancelled => ExitCode::from(130),
                RunStatus::Failed | RunStatus::Running => ExitCode::FAILURE,
            });
        }
    }
    bail!("run ended without an outcome")
}

async fn checkpoints(config: &CliConfig, command: CheckpointCommands) -> anyhow::Result<()> {
    let saver = config.saver();
    match command {
        CheckpointCommands::List => {
            let mut ids = saver.list().await?;
            ids.sort();
            if ids.is_empty() {
                println!("no checkpoints in {}", config.checkpoint.dir.display());
            }
            for id in ids {
                let Some(checkpoint) = saver.load(&id).await? else {
                    continue;
                };
                let label = checkpoint
                    .label
                    .as_deref()
                    .map(|label| format!("  [{}]", label))
                    .unwrap_or_default();
                println!(
                    "{:<38} {:<9} step {:>4}  {}{}",
                    id,
                    checkpoint.metadata.status.as_str(),
                    checkpoint.metadata.step,
                    checkpoint.ts.to_rfc3339(),
                    label
                );
            }
        }
        CheckpointCommands::Show { id } => {
            let checkpoint = saver
                .load(&id)
                .await?
                .with_context(|| format!("no checkpoint for {}", id))?;
            println!("{}", serde_json::to_string_pretty(&checkpoint)?);
        }
        CheckpointCommands::Delete { id } => {
            if saver.load(&id).await?.is_none() {
                bail!("no checkpoint for {}", id);
            }
            saver.delete(&id).await?;
            println!("deleted {}", id);
        }
    }
    Ok(())
}
