//! Research → plan → implement → review loop
//!
//! ```text
//!   research ─► plan ─► approve_plan (wait) ─► approval_gate ──rejected──► plan
//!                ▲                                   │
//!                │                                   ▼ approved
//!                │                              implement (task waves)
//!                │                                   │
//!                │                                   ▼
//!                └──── not approved ──── review_gate ◄── review
//!                                           │
//!                                           ▼ approved, or max_iterations reached
//!                                          END
//! ```
//!
//! The planner must answer with a JSON array of [`Task`]s. Malformed output
//! is a [`NodeError::Validation`], so the plan step is retried with the
//! rejection appended to its prompt. The reviewer answers with a
//! [`ReviewResult`] object.
//!
//! The approval pause resumes with external input such as
//! `{"approved": true}` or `{"approved": false, "feedback": ["split task 3"]}`.
//! Runs started with auto-approve skip the pause.
//!
//! # Example
//!
//! ```rust,no_run
//! use agentgraph_core::prelude::*;
//! use agentgraph_core::prebuilt::{ralph_workflow, RalphConfig, RalphState};
//! use std::sync::Arc;
//!
//! # async fn example(bridge: Arc<dyn AgentBridge>) -> agentgraph_core::Result<()> {
//! let graph = ralph_workflow(bridge, RalphConfig::default(), GraphConfig::default())?;
//! let outcome = graph
//!     .invoke(RalphState::for_goal("add a --json flag"), ExecutionOptions::new())
//!     .await?;
//! if outcome.is_paused() {
//!     println!("waiting: {}", outcome.pending_prompt.unwrap_or_default());
//! }
//! # Ok(())
//! # }
//! ```

use crate::bridge::{AgentBridge, SpawnConfig, SpawnResult};
use crate::builder::GraphBuilder;
use crate::config::GraphConfig;
use crate::error::{NodeError, Result};
use crate::graph::{CompiledGraph, END};
use crate::nodes::{AgentNode, DecisionNode, Node, NodeContext, NodeResult, WaitNode};
use crate::retry::RetryPolicy;
use crate::scheduler::{SchedulerConfig, SchedulerNode, TaskScheduler};
use crate::state::reducers;
use crate::task::{validate_tasks, Task, TaskStatus};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Duration;

pub const RESEARCH: &str = "research";
pub const PLAN: &str = "plan";
pub const APPROVE_PLAN: &str = "approve_plan";
pub const APPROVAL_GATE: &str = "approval_gate";
pub const IMPLEMENT: &str = "implement";
pub const REVIEW: &str = "review";
pub const REVIEW_GATE: &str = "review_gate";

/// Verdict returned by the review agent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReviewResult {
    pub approved: bool,
    #[serde(default)]
    pub summary: String,
    /// Follow-up tasks for the next iteration.
    #[serde(default)]
    pub tasks: Vec<Task>,
}

crate::workflow_state! {
    /// State of one research → plan → implement → review run.
    pub struct RalphState => RalphUpdate {
        goal: String => replace,
        research: Option<String> => replace,
        plan: Option<String> => replace,
        /// Written whole by every node; see [`ralph_workflow`].
        tasks: Vec<Task> => replace,
        /// Completed plan iterations.
        iteration: u32 => replace,
        review: Option<ReviewResult> => replace,
        /// Human answer to the plan approval pause.
        approved: Option<bool> => replace,
        /// Rejection notes from humans and reviewers, oldest first.
        feedback: Vec<String> => append,
    }
}

impl RalphState {
    /// Fresh state for `goal`; the executor assigns an execution id.
    pub fn for_goal(goal: impl Into<String>) -> Self {
        let mut state = Self::new("");
        state.goal = goal.into();
        state
    }
}

#[derive(Debug, Clone)]
pub struct RalphConfig {
    /// Plan/review rounds before the run ends without approval.
    pub max_iterations: u32,
    /// Pause for a human between plan and implement.
    pub require_approval: bool,
    pub scheduler: SchedulerConfig,
    pub spawn: SpawnConfig,
    /// Retry policy for research, plan and review agents.
    pub agent_retry: RetryPolicy,
}

impl Default for RalphConfig {
    fn default() -> Self {
        Self {
            max_iterations: 3,
            require_approval: true,
            scheduler: SchedulerConfig::default(),
            spawn: SpawnConfig::default(),
            agent_retry: RetryPolicy::new(3).with_backoff(Duration::from_millis(500)),
        }
    }
}

impl RalphConfig {
    pub fn with_max_iterations(mut self, max_iterations: u32) -> Self {
        self.max_iterations = max_iterations.max(1);
        self
    }

    pub fn with_require_approval(mut self, require_approval: bool) -> Self {
        self.require_approval = require_approval;
        self
    }

    pub fn with_scheduler(mut self, scheduler: SchedulerConfig) -> Self {
        self.scheduler = scheduler;
        self
    }

    pub fn with_spawn_config(mut self, spawn: SpawnConfig) -> Self {
        self.spawn = spawn;
        self
    }

    pub fn with_agent_retry(mut self, policy: RetryPolicy) -> Self {
        self.agent_retry = policy;
        self
    }
}

/// Assemble and compile the workflow.
///
/// `tasks` is replaced wholesale: the planner writes the carried tasks plus
/// its plan, the reviewer appends follow-ups by id and `implement` writes the
/// settled list back.
pub fn ralph_workflow(
    bridge: Arc<dyn AgentBridge>,
    config: RalphConfig,
    graph: GraphConfig<RalphState>,
) -> Result<CompiledGraph<RalphState>> {
    let research = AgentNode::new(bridge.clone(), |ctx: &NodeContext<RalphState>| {
        research_prompt(ctx.state())
    })
    .with_config(config.spawn.clone())
    .on_response(|_ctx, result| {
        let output = succeeded(result)?;
        Ok(NodeResult::update(RalphUpdate::default().research(Some(output))))
    });

    let plan = AgentNode::new(bridge.clone(), |ctx: &NodeContext<RalphState>| plan_prompt(ctx.state()))
        .with_config(config.spawn.clone())
        .on_response(|ctx, result| {
            let output = succeeded(result)?;
            let state = ctx.state();
            let mut tasks = carried_tasks(state);
            let planned = parse_tasks(&output, &tasks)?;
            reducers::merge_by_id(&mut tasks, planned);
            Ok(NodeResult::update(
                RalphUpdate::default()
                    .plan(Some(output))
                    .tasks(tasks)
                    .iteration(state.iteration + 1)
                    .approved(None),
            ))
        });

    let review = AgentNode::new(bridge.clone(), |ctx: &NodeContext<RalphState>| review_prompt(ctx.state()))
        .with_config(config.spawn.clone())
        .on_response(|ctx, result| {
            let output = succeeded(result)?;
            let state = ctx.state();
            let review = parse_review(&output, &state.tasks)?;
            let mut update = RalphUpdate::default();
            if !review.approved && !review.summary.is_empty() {
                update = update.feedback(vec![review.summary.clone()]);
            }
            if !review.tasks.is_empty() {
                let mut tasks = state.tasks.clone();
                reducers::merge_by_id(&mut tasks, review.tasks.clone());
                update = update.tasks(tasks);
            }
            Ok(NodeResult::update(update.review(Some(review))))
        });

    let implement = SchedulerNode::new(
        TaskScheduler::new(bridge)
            .with_config(config.scheduler.clone())
            .with_spawn_config(config.spawn.clone()),
        |state: &RalphState| state.tasks.clone(),
        |tasks| RalphUpdate::default().tasks(tasks),
    )
    .with_preamble(implement_preamble);

    let max_iterations = config.max_iterations;
    let review_gate = DecisionNode::new([PLAN, END], move |state: &RalphState| {
        let approved = state.review.as_ref().is_some_and(|review| review.approved);
        if approved || state.iteration >= max_iterations {
            Some(END.to_string())
        } else {
            Some(PLAN.to_string())
        }
    });

    let retry = config.agent_retry.clone();
    let mut builder = GraphBuilder::new()
        .start(Node::agent(RESEARCH, research).with_retry(retry.clone()))
        .then(Node::agent(PLAN, plan).with_retry(retry.clone()));

    if config.require_approval {
        let approval_gate = DecisionNode::new([PLAN, IMPLEMENT], |state: &RalphState| {
            match state.approved {
                Some(false) => Some(PLAN.to_string()),
                _ => Some(IMPLEMENT.to_string()),
            }
        });
        builder = builder
            .then(Node::wait(APPROVE_PLAN, WaitNode::with_prompt_fn(approval_prompt)))
            .then(Node::decision(APPROVAL_GATE, approval_gate))
            .add_node(Node::scheduler(IMPLEMENT, implement));
    } else {
        builder = builder.then(Node::scheduler(IMPLEMENT, implement));
    }

    builder
        .add_node(Node::agent(REVIEW, review).with_retry(retry))
        .add_node(Node::decision(REVIEW_GATE, review_gate))
        .add_edge(IMPLEMENT, REVIEW)
        .add_edge(REVIEW, REVIEW_GATE)
        .compile(graph)
}

/// Tasks a new plan builds on. A rejected plan's unfinished tasks are
/// dropped so they are never dispatched.
fn carried_tasks(state: &RalphState) -> Vec<Task> {
    match state.approved {
        Some(false) => state.tasks.iter().filter(|task| task.is_completed()).cloned().collect(),
        _ => state.tasks.clone(),
    }
}

fn succeeded(result: SpawnResult) -> std::result::Result<String, NodeError> {
    if result.success {
        Ok(result.output)
    } else {
        Err(NodeError::Bridge(
            result.error.unwrap_or_else(|| "agent reported failure".to_string()),
        ))
    }
}

/// The outermost `open … close` span of `text`, which tolerates prose or
/// code fences around the JSON.
fn json_span(text: &str, open: char, close: char) -> Option<&str> {
    let start = text.find(open)?;
    let end = text.rfind(close)?;
    (end > start).then(|| &text[start..=end])
}

/// Parse planner output into pending tasks that fit into `existing`.
pub fn parse_tasks(output: &str, existing: &[Task]) -> std::result::Result<Vec<Task>, NodeError> {
    let json = json_span(output, '[', ']')
        .ok_or_else(|| NodeError::validation("expected a JSON array of tasks"))?;
    let mut tasks: Vec<Task> = serde_json::from_str(json)
        .map_err(|err| NodeError::validation(format!("malformed task list: {}", err)))?;
    if tasks.is_empty() {
        return Err(NodeError::validation("the plan contains no tasks"));
    }
    check_tasks(&mut tasks, existing)?;
    Ok(tasks)
}

/// Parse reviewer output. Follow-up tasks must fit into `existing`.
pub fn parse_review(output: &str, existing: &[Task]) -> std::result::Result<ReviewResult, NodeError> {
    let json = json_span(output, '{', '}')
        .ok_or_else(|| NodeError::validation("expected a JSON review object"))?;
    let mut review: ReviewResult = serde_json::from_str(json)
        .map_err(|err| NodeError::validation(format!("malformed review: {}", err)))?;
    check_tasks(&mut review.tasks, existing)?;
    Ok(review)
}

fn check_tasks(tasks: &mut [Task], existing: &[Task]) -> std::result::Result<(), NodeError> {
    for task in tasks.iter_mut() {
        task.status = TaskStatus::Pending;
    }
    validate_tasks(tasks).map_err(NodeError::validation)?;

    if let Some(task) = tasks
        .iter()
        .find(|task| existing.iter().any(|done| done.id == task.id && done.is_completed()))
    {
        return Err(NodeError::validation(format!(
            "task '{}' is already completed; use a new id",
            task.id
        )));
    }

    let known: HashSet<&str> = existing
        .iter()
        .chain(tasks.iter())
        .map(|task| task.id.as_str())
        .collect();
    for task in tasks.iter() {
        if let Some(dep) = task.blocked_by.iter().find(|dep| !known.contains(dep.as_str())) {
            return Err(NodeError::validation(format!(
                "task '{}' is blocked by unknown task '{}'",
                task.id, dep
            )));
        }
    }
    Ok(())
}

fn research_prompt(state: &RalphState) -> String {
    format!(
        "Research the codebase for this goal:\n\n{}\n\n\
         Summarize the relevant files, existing patterns and risks. Do not modify anything.",
        state.goal
    )
}

fn task_list(tasks: &[Task]) -> String {
    let mut out = String::new();
    for task in tasks {
        let _ = write!(out, "- [{}] {}: {}", task.status, task.id, task.content);
        if !task.blocked_by.is_empty() {
            let _ = write!(out, " (blocked by {})", task.blocked_by.join(", "));
        }
        out.push('\n');
    }
    out
}

fn plan_prompt(state: &RalphState) -> String {
    let mut prompt = format!("Plan the work for this goal:\n\n{}\n", state.goal);
    if let Some(research) = &state.research {
        let _ = write!(prompt, "\nResearch notes:\n{}\n", research);
    }
    let carried = carried_tasks(state);
    if !carried.is_empty() {
        let _ = write!(prompt, "\nCurrent tasks:\n{}", task_list(&carried));
    }
    if !state.feedback.is_empty() {
        let _ = write!(prompt, "\nFeedback to address:\n");
        for note in &state.feedback {
            let _ = writeln!(prompt, "- {}", note);
        }
    }
    prompt.push_str(
        "\nRespond with only a JSON array of tasks, for example \
         [{\"id\": \"1\", \"content\": \"...\", \"blockedBy\": []}]. \
         Ids must be unique and contain no whitespace. Completed tasks must not be repeated; \
         blockedBy may only name listed tasks.",
    );
    prompt
}

fn approval_prompt(state: &RalphState) -> String {
    format!(
        "Approve the plan for \"{}\" ({} task(s), iteration {})? \
         Resume with {{\"approved\": true}} or {{\"approved\": false, \"feedback\": [\"...\"]}}.",
        state.goal,
        state.tasks.len(),
        state.iteration
    )
}

fn implement_preamble(state: &RalphState) -> String {
    match &state.research {
        Some(research) => format!("Goal: {}\n\nResearch notes:\n{}", state.goal, research),
        None => format!("Goal: {}", state.goal),
    }
}

fn review_prompt(state: &RalphState) -> String {
    let mut prompt = format!(
        "Review the implementation of this goal:\n\n{}\n\nTasks:\n{}",
        state.goal,
        task_list(&state.tasks)
    );
    if let Some(summary) = state.outputs.get(IMPLEMENT) {
        let _ = write!(prompt, "\nImplementation report:\n{}\n", summary);
    }
    prompt.push_str(
        "\nRespond with only a JSON object \
         {\"approved\": true|false, \"summary\": \"...\", \"tasks\": [follow-up tasks]}.",
    );
    prompt
}
