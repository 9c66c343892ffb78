//! Task scheduler - dependency-ordered wave dispatch over a task list
//!
//! The scheduler owns task status. Agents report outcomes through the
//! [`AgentBridge`]; only the scheduler writes `pending → in_progress →
//! completed | error`.
//!
//! ```text
//!            ┌────────────────────────────────────────────────┐
//!            ▼                                                │
//!   cycle among open tasks? ──yes──► Deadlocked(Cycle)        │
//!            │                                                │
//!   blocked only by errored tasks? ──► reset blockers         │
//!            │                         (budget exhausted ──► Deadlocked(ErrorDependency))
//!            ▼                                                │
//!   ready = pending ∧ all blockers completed                  │
//!            │ empty ──► Completed | PartiallyFailed | Stalled │
//!            ▼                                                │
//!   mark in_progress ─► spawn_parallel(ready) ─► join wave ───┘
//!                        apply completed / error
//! ```
//!
//! Every task of a wave sees the task list as it was before the wave; results
//! are applied only after the whole wave settled, and one failure never
//! aborts its siblings.
//!
//! # Unresolved dependencies
//!
//! A `blockedBy` id that names no task keeps blocking under
//! [`UnresolvedPolicy::Block`] (the default) and is skipped under
//! [`UnresolvedPolicy::Ignore`]. Blocked-forever tasks end the run as
//! [`DeadlockError::Stalled`].

use crate::bridge::{AgentBridge, SpawnConfig, SpawnRequest, SpawnResult};
use crate::error::{DeadlockError, NodeError};
use crate::nodes::{Node, NodeContext, NodeHandler, NodeId, NodeKind, NodeResult};
use crate::state::{StateUpdate, WorkflowState};
use crate::task::{validate_tasks, Task, TaskId, TaskStatus};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

pub const DEFAULT_MAX_TASK_RETRIES: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnresolvedPolicy {
    /// Unknown ids keep blocking.
    #[default]
    Block,
    /// Unknown ids are treated as satisfied.
    Ignore,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Times a failed task may be reset to `pending` because another task
    /// depends on it.
    pub max_retries: u32,
    pub unresolved: UnresolvedPolicy,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_TASK_RETRIES,
            unresolved: UnresolvedPolicy::Block,
        }
    }
}

impl SchedulerConfig {
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_unresolved(mut self, policy: UnresolvedPolicy) -> Self {
        self.unresolved = policy;
        self
    }
}

/// What happened in one dispatch wave.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaveReport {
    pub wave: usize,
    pub dispatched: Vec<TaskId>,
    pub completed: Vec<TaskId>,
    pub failed: Vec<TaskId>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SchedulerOutcome {
    Completed,
    /// No pending work remains but some tasks ended in `error`.
    PartiallyFailed { failed: Vec<TaskId> },
    Deadlocked(DeadlockError),
    Cancelled,
}

impl SchedulerOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            SchedulerOutcome::Completed => "completed",
            SchedulerOutcome::PartiallyFailed { .. } => "partially_failed",
            SchedulerOutcome::Deadlocked(_) => "deadlocked",
            SchedulerOutcome::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug, Clone)]
pub struct SchedulerReport {
    pub tasks: Vec<Task>,
    pub waves: Vec<WaveReport>,
    /// Agent output per completed task.
    pub outputs: BTreeMap<TaskId, String>,
    /// Last error per failed task.
    pub errors: BTreeMap<TaskId, String>,
    pub outcome: SchedulerOutcome,
}

impl SchedulerReport {
    pub fn summary(&self) -> serde_json::Value {
        let with_status = |status: TaskStatus| -> Vec<&str> {
            self.tasks
                .iter()
                .filter(|task| task.status == status)
                .map(|task| task.id.as_str())
                .collect()
        };
        json!({
            "outcome": self.outcome.as_str(),
            "waves": self.waves.len(),
            "completed": with_status(TaskStatus::Completed),
            "failed": with_status(TaskStatus::Error),
            "outputs": self.outputs,
            "errors": self.errors,
        })
    }
}

/// Ids of tasks that may be dispatched now, in list order.
pub fn ready_set(tasks: &[Task], policy: UnresolvedPolicy) -> Vec<TaskId> {
    let status: HashMap<&str, TaskStatus> =
        tasks.iter().map(|task| (task.id.as_str(), task.status)).collect();
    tasks
        .iter()
        .filter(|task| task.status == TaskStatus::Pending)
        .filter(|task| {
            task.blocked_by.iter().all(|dep| match status.get(dep.as_str()) {
                Some(status) => *status == TaskStatus::Completed,
                None => policy == UnresolvedPolicy::Ignore,
            })
        })
        .map(|task| task.id.clone())
        .collect()
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Visiting,
    Done,
}

/// A dependency cycle among tasks that are not completed, as a closed path
/// (`a -> b -> a`).
pub fn find_cycle(tasks: &[Task]) -> Option<Vec<TaskId>> {
    let open: HashMap<&str, &Task> = tasks
        .iter()
        .filter(|task| !task.is_completed())
        .map(|task| (task.id.as_str(), task))
        .collect();
    let mut marks = HashMap::new();
    let mut path = Vec::new();

    for task in tasks.iter().filter(|task| !task.is_completed()) {
        if marks.contains_key(task.id.as_str()) {
            continue;
        }
        if let Some(cycle) = visit(task.id.as_str(), &open, &mut marks, &mut path) {
            return Some(cycle);
        }
    }
    None
}

fn visit<'a>(
    id: &'a str,
    open: &HashMap<&'a str, &'a Task>,
    marks: &mut HashMap<&'a str, Mark>,
    path: &mut Vec<&'a str>,
) -> Option<Vec<TaskId>> {
    match marks.get(id) {
        Some(Mark::Done) => return None,
        Some(Mark::Visiting) => {
            let start = path.iter().position(|seen| *seen == id).unwrap_or(0);
            let mut cycle: Vec<TaskId> = path[start..].iter().map(|seen| seen.to_string()).collect();
            cycle.push(id.to_string());
            return Some(cycle);
        }
        None => {}
    }

    marks.insert(id, Mark::Visiting);
    path.push(id);
    if let Some(task) = open.get(id) {
        for dep in &task.blocked_by {
            if let Some((dep, _)) = open.get_key_value(dep.as_str()) {
                if let Some(cycle) = visit(*dep, open, marks, path) {
                    return Some(cycle);
                }
            }
        }
    }
    path.pop();
    marks.insert(id, Mark::Done);
    None
}

/// Pending tasks whose only remaining blockers are in `error`, with those
/// blockers.
pub fn error_dependencies(tasks: &[Task], policy: UnresolvedPolicy) -> Vec<(TaskId, Vec<TaskId>)> {
    let status: HashMap<&str, TaskStatus> =
        tasks.iter().map(|task| (task.id.as_str(), task.status)).collect();
    let mut blocked = Vec::new();

    'tasks: for task in tasks.iter().filter(|task| task.status == TaskStatus::Pending) {
        let mut failed = Vec::new();
        for dep in &task.blocked_by {
            match status.get(dep.as_str()) {
                Some(TaskStatus::Completed) => {}
                Some(TaskStatus::Error) => failed.push(dep.clone()),
                Some(_) => continue 'tasks,
                None if policy == UnresolvedPolicy::Ignore => {}
                None => continue 'tasks,
            }
        }
        if !failed.is_empty() {
            blocked.push((task.id.clone(), failed));
        }
    }
    blocked
}

fn unresolved_refs(tasks: &[Task]) -> Vec<(TaskId, TaskId)> {
    let known: BTreeSet<&str> = tasks.iter().map(|task| task.id.as_str()).collect();
    tasks
        .iter()
        .filter(|task| !task.is_completed())
        .flat_map(|task| {
            task.blocked_by
                .iter()
                .filter(|dep| !known.contains(dep.as_str()))
                .map(|dep| (task.id.clone(), dep.clone()))
        })
        .collect()
}

type PromptFn = Arc<dyn Fn(&Task, &str) -> String + Send + Sync>;
type WaveFn = Arc<dyn Fn(&WaveReport) + Send + Sync>;

fn default_prompt(task: &Task, preamble: &str) -> String {
    if preamble.is_empty() {
        format!("Task {}: {}", task.id, task.content)
    } else {
        format!("{}\n\nTask {}: {}", preamble, task.id, task.content)
    }
}

/// Dispatches ready tasks to the agent bridge in waves until the list settles.
///
/// ```rust,no_run
/// # use std::sync::Arc;
/// # use agentgraph_core::prelude::*;
/// # use agentgraph_core::scheduler::{TaskScheduler, SchedulerConfig};
/// # async fn example(bridge: Arc<dyn AgentBridge>) -> Result<(), NodeError> {
/// let tasks = vec![
///     Task::new("1", "add the parser"),
///     Task::new("2", "wire the parser into the CLI").blocked_by(["1"]),
/// ];
/// let report = TaskScheduler::new(bridge)
///     .with_config(SchedulerConfig::default().with_max_retries(2))
///     .run(tasks, "You are working in the repo root.", &Default::default())
///     .await?;
/// println!("{} waves", report.waves.len());
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct TaskScheduler {
    bridge: Arc<dyn AgentBridge>,
    config: SchedulerConfig,
    spawn_config: SpawnConfig,
    prompt: PromptFn,
    on_wave: Option<WaveFn>,
}

impl std::fmt::Debug for TaskScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskScheduler")
            .field("bridge", &self.bridge.name())
            .field("config", &self.config)
            .field("spawn_config", &self.spawn_config)
            .finish()
    }
}

impl TaskScheduler {
    pub fn new(bridge: Arc<dyn AgentBridge>) -> Self {
        Self {
            bridge,
            config: SchedulerConfig::default(),
            spawn_config: SpawnConfig::default(),
            prompt: Arc::new(default_prompt),
            on_wave: None,
        }
    }

    pub fn with_config(mut self, config: SchedulerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_spawn_config(mut self, config: SpawnConfig) -> Self {
        self.spawn_config = config;
        self
    }

    /// Build the agent prompt for a task from the task and the run preamble.
    pub fn with_prompt(mut self, f: impl Fn(&Task, &str) -> String + Send + Sync + 'static) -> Self {
        self.prompt = Arc::new(f);
        self
    }

    /// Called after every wave settled.
    pub fn on_wave(mut self, f: impl Fn(&WaveReport) + Send + Sync + 'static) -> Self {
        self.on_wave = Some(Arc::new(f));
        self
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Run waves until no task is ready.
    ///
    /// Tasks left `in_progress` by an interrupted run are treated as pending.
    /// Only malformed task lists are returned as `Err`; deadlocks and
    /// cancellation are reported in [`SchedulerReport::outcome`].
    #[tracing::instrument(skip_all, fields(tasks = tasks.len(), bridge = self.bridge.name()))]
    pub async fn run(
        &self,
        mut tasks: Vec<Task>,
        preamble: &str,
        cancel: &CancellationToken,
    ) -> Result<SchedulerReport, NodeError> {
        validate_tasks(&tasks).map_err(NodeError::validation)?;
        for task in tasks.iter_mut().filter(|task| task.status == TaskStatus::InProgress) {
            task.status = TaskStatus::Pending;
        }

        let mut retries: HashMap<TaskId, u32> = HashMap::new();
        let mut waves = Vec::new();
        let mut outputs = BTreeMap::new();
        let mut errors = BTreeMap::new();

        let outcome = loop {
            if cancel.is_cancelled() {
                break SchedulerOutcome::Cancelled;
            }
            if let Some(cycle) = find_cycle(&tasks) {
                error!(cycle = ?cycle, "dependency cycle");
                break SchedulerOutcome::Deadlocked(DeadlockError::Cycle { tasks: cycle });
            }
            if let Err(deadlock) = self.reset_error_dependencies(&mut tasks, &mut retries) {
                error!(error = %deadlock, "error dependency retries exhausted");
                break SchedulerOutcome::Deadlocked(deadlock);
            }

            let ready = ready_set(&tasks, self.config.unresolved);
            if ready.is_empty() {
                break settle(&tasks);
            }

            let wave = waves.len() + 1;
            let requests = self.mark_dispatched(&mut tasks, &ready, preamble);
            info!(wave, dispatched = ready.len(), "dispatching wave");

            let results = tokio::select! {
                results = self.bridge.spawn_parallel(requests) => Some(results),
                _ = cancel.cancelled() => None,
            };
            let Some(results) = results else {
                for task in tasks.iter_mut().filter(|task| task.status == TaskStatus::InProgress) {
                    task.status = TaskStatus::Pending;
                }
                warn!(wave, "cancelled while a wave was in flight");
                break SchedulerOutcome::Cancelled;
            };

            let report = apply_wave(wave, &mut tasks, ready, results, &mut outputs, &mut errors);
            info!(
                wave,
                completed = report.completed.len(),
                failed = report.failed.len(),
                "wave settled"
            );
            if let Some(on_wave) = &self.on_wave {
                on_wave(&report);
            }
            waves.push(report);
        };

        info!(outcome = outcome.as_str(), waves = waves.len(), "scheduler finished");
        Ok(SchedulerReport {
            tasks,
            waves,
            outputs,
            errors,
            outcome,
        })
    }

    fn mark_dispatched(&self, tasks: &mut [Task], ready: &[TaskId], preamble: &str) -> Vec<SpawnRequest> {
        let mut requests = Vec::with_capacity(ready.len());
        for id in ready {
            if let Some(task) = tasks.iter_mut().find(|task| &task.id == id) {
                task.status = TaskStatus::InProgress;
                requests.push(SpawnRequest::new(
                    (self.prompt)(task, preamble),
                    self.spawn_config.clone(),
                ));
            }
        }
        requests
    }

    fn reset_error_dependencies(
        &self,
        tasks: &mut [Task],
        retries: &mut HashMap<TaskId, u32>,
    ) -> Result<(), DeadlockError> {
        let mut reset = BTreeSet::new();
        for (task, blockers) in error_dependencies(tasks, self.config.unresolved) {
            if let Some(used) = blockers
                .iter()
                .map(|blocker| retries.get(blocker).copied().unwrap_or(0))
                .find(|used| *used >= self.config.max_retries)
            {
                return Err(DeadlockError::ErrorDependency {
                    task,
                    blocked_by: blockers,
                    retries: used,
                });
            }
            for blocker in blockers {
                if reset.insert(blocker.clone()) {
                    *retries.entry(blocker).or_insert(0) += 1;
                }
            }
        }

        for task in tasks.iter_mut().filter(|task| reset.contains(&task.id)) {
            warn!(task = %task.id, retry = retries.get(&task.id).copied().unwrap_or(0), "resetting failed dependency");
            task.status = TaskStatus::Pending;
        }
        Ok(())
    }
}

fn settle(tasks: &[Task]) -> SchedulerOutcome {
    let pending: Vec<TaskId> = tasks
        .iter()
        .filter(|task| task.status == TaskStatus::Pending)
        .map(|task| task.id.clone())
        .collect();
    if !pending.is_empty() {
        let unresolved = unresolved_refs(tasks);
        return SchedulerOutcome::Deadlocked(DeadlockError::Stalled { pending, unresolved });
    }

    let failed: Vec<TaskId> = tasks
        .iter()
        .filter(|task| task.status == TaskStatus::Error)
        .map(|task| task.id.clone())
        .collect();
    if failed.is_empty() {
        SchedulerOutcome::Completed
    } else {
        SchedulerOutcome::PartiallyFailed { failed }
    }
}

fn apply_wave(
    wave: usize,
    tasks: &mut [Task],
    dispatched: Vec<TaskId>,
    results: Vec<SpawnResult>,
    outputs: &mut BTreeMap<TaskId, String>,
    errors: &mut BTreeMap<TaskId, String>,
) -> WaveReport {
    let mut completed = Vec::new();
    let mut failed = Vec::new();
    let mut results = results.into_iter();

    for id in &dispatched {
        let result = results
            .next()
            .unwrap_or_else(|| SpawnResult::failed("agent bridge returned no result"));
        let Some(task) = tasks.iter_mut().find(|task| &task.id == id) else {
            continue;
        };
        if result.success {
            debug!(task = %id, "task completed");
            task.status = TaskStatus::Completed;
            errors.remove(id);
            outputs.insert(id.clone(), result.output);
            completed.push(id.clone());
        } else {
            let message = result.error.unwrap_or_else(|| "agent reported failure".to_string());
            warn!(task = %id, error = %message, "task failed");
            task.status = TaskStatus::Error;
            errors.insert(id.clone(), message);
            failed.push(id.clone());
        }
    }

    WaveReport {
        wave,
        dispatched,
        completed,
        failed,
    }
}

type ReadTasks<S> = Arc<dyn Fn(&S) -> Vec<Task> + Send + Sync>;
type WriteTasks<S> = Arc<dyn Fn(Vec<Task>) -> <S as WorkflowState>::Update + Send + Sync>;
type Preamble<S> = Arc<dyn Fn(&S) -> String + Send + Sync>;

/// The scheduler as a graph node: reads tasks from the state, runs them to
/// settlement and writes them back. The wave summary lands in
/// `outputs[<node id>]`.
pub struct SchedulerNode<S: WorkflowState> {
    scheduler: TaskScheduler,
    read: ReadTasks<S>,
    write: WriteTasks<S>,
    preamble: Option<Preamble<S>>,
}

impl<S: WorkflowState> SchedulerNode<S> {
    pub fn new(
        scheduler: TaskScheduler,
        read: impl Fn(&S) -> Vec<Task> + Send + Sync + 'static,
        write: impl Fn(Vec<Task>) -> S::Update + Send + Sync + 'static,
    ) -> Self {
        Self {
            scheduler,
            read: Arc::new(read),
            write: Arc::new(write),
            preamble: None,
        }
    }

    /// Shared context prepended to every task prompt.
    pub fn with_preamble(mut self, f: impl Fn(&S) -> String + Send + Sync + 'static) -> Self {
        self.preamble = Some(Arc::new(f));
        self
    }
}

#[async_trait]
impl<S: WorkflowState> NodeHandler<S> for SchedulerNode<S> {
    async fn execute(&self, ctx: NodeContext<S>) -> Result<NodeResult<S>, NodeError> {
        let tasks = (self.read)(ctx.state());
        let preamble = self
            .preamble
            .as_ref()
            .map(|preamble| preamble(ctx.state()))
            .unwrap_or_default();

        let report = self.scheduler.run(tasks, &preamble, &ctx.cancel).await?;
        match report.outcome {
            SchedulerOutcome::Cancelled => Err(NodeError::Cancelled),
            SchedulerOutcome::Deadlocked(deadlock) => Err(NodeError::Deadlock(deadlock)),
            SchedulerOutcome::Completed | SchedulerOutcome::PartiallyFailed { .. } => {
                let summary = report.summary();
                let update = (self.write)(report.tasks).with_output(&ctx.node_id, summary);
                Ok(NodeResult::update(update))
            }
        }
    }
}

impl TaskScheduler {
    pub fn into_node<S: WorkflowState>(
        self,
        id: impl Into<NodeId>,
        read: impl Fn(&S) -> Vec<Task> + Send + Sync + 'static,
        write: impl Fn(Vec<Task>) -> S::Update + Send + Sync + 'static,
    ) -> Node<S> {
        Node::scheduler(id, SchedulerNode::new(self, read, write))
    }
}

impl<S: WorkflowState> Node<S> {
    pub fn scheduler(id: impl Into<NodeId>, node: SchedulerNode<S>) -> Self {
        Node::new(id, NodeKind::Parallel, node)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::GraphBuilder;
    use crate::config::{ExecutionOptions, GraphConfig};
    use proptest::prelude::*;
    use std::sync::Mutex;

    /// Fails each task id a scripted number of times, then succeeds.
    #[derive(Default)]
    struct FlakyBridge {
        failures: Mutex<HashMap<String, u32>>,
        always_fail: Vec<String>,
        calls: Mutex<Vec<String>>,
    }

    impl FlakyBridge {
        fn failing(ids: &[(&str, u32)]) -> Self {
            Self {
                failures: Mutex::new(ids.iter().map(|(id, n)| (id.to_string(), *n)).collect()),
                ..Self::default()
            }
        }

        fn broken(ids: &[&str]) -> Self {
            Self {
                always_fail: ids.iter().map(|id| id.to_string()).collect(),
                ..Self::default()
            }
        }

        fn calls_for(&self, id: &str) -> usize {
            self.calls.lock().unwrap().iter().filter(|call| *call == id).count()
        }
    }

    #[async_trait]
    impl AgentBridge for FlakyBridge {
        async fn spawn(&self, task: &str, _config: &SpawnConfig) -> SpawnResult {
            self.calls.lock().unwrap().push(task.to_string());
            if self.always_fail.iter().any(|id| id == task) {
                return SpawnResult::failed(format!("{} is broken", task));
            }
            let mut failures = self.failures.lock().unwrap();
            match failures.get_mut(task) {
                Some(left) if *left > 0 => {
                    *left -= 1;
                    SpawnResult::failed(format!("{} flaked", task))
                }
                _ => SpawnResult::ok(format!("did {}", task)),
            }
        }
    }

    fn scheduler(bridge: Arc<FlakyBridge>) -> TaskScheduler {
        TaskScheduler::new(bridge).with_prompt(|task, _| task.id.clone())
    }

    fn statuses(report: &SchedulerReport) -> Vec<(&str, TaskStatus)> {
        report.tasks.iter().map(|t| (t.id.as_str(), t.status)).collect()
    }

    #[test]
    fn test_ready_set_requires_completed_blockers() {
        let tasks = vec![
            Task::new("1", "a").with_status(TaskStatus::Completed),
            Task::new("2", "b").blocked_by(["1"]),
            Task::new("3", "c").blocked_by(["2"]),
            Task::new("4", "d").blocked_by(["missing"]),
        ];
        assert_eq!(ready_set(&tasks, UnresolvedPolicy::Block), vec!["2"]);
        assert_eq!(ready_set(&tasks, UnresolvedPolicy::Ignore), vec!["2", "4"]);
    }

    #[test]
    fn test_find_cycle_ignores_completed_tasks() {
        let tasks = vec![
            Task::new("A", "a").blocked_by(["B"]),
            Task::new("B", "b").blocked_by(["A"]),
        ];
        assert_eq!(find_cycle(&tasks), Some(vec!["A".into(), "B".into(), "A".into()]));

        let broken = vec![
            Task::new("A", "a").blocked_by(["B"]).with_status(TaskStatus::Completed),
            Task::new("B", "b").blocked_by(["A"]),
        ];
        assert_eq!(find_cycle(&broken), None);
    }

    #[tokio::test]
    async fn test_waves_follow_dependencies() {
        let bridge = Arc::new(FlakyBridge::default());
        let tasks = vec![Task::new("#1", "scaffold"), Task::new("#2", "fill in").blocked_by(["#1"])];

        let report = scheduler(bridge).run(tasks, "", &CancellationToken::new()).await.unwrap();
        assert_eq!(report.outcome, SchedulerOutcome::Completed);
        assert_eq!(report.waves.len(), 2);
        assert_eq!(report.waves[0].dispatched, vec!["#1"]);
        assert_eq!(report.waves[1].dispatched, vec!["#2"]);
        assert_eq!(
            statuses(&report),
            vec![("#1", TaskStatus::Completed), ("#2", TaskStatus::Completed)]
        );
        assert_eq!(report.outputs["#2"], "did #2");
    }

    #[tokio::test]
    async fn test_cycle_is_terminal_without_dispatch() {
        let bridge = Arc::new(FlakyBridge::default());
        let tasks = vec![
            Task::new("A", "a").blocked_by(["B"]),
            Task::new("B", "b").blocked_by(["A"]),
        ];
        let report = scheduler(bridge.clone()).run(tasks, "", &CancellationToken::new()).await.unwrap();
        assert!(matches!(
            report.outcome,
            SchedulerOutcome::Deadlocked(DeadlockError::Cycle { .. })
        ));
        assert!(report.waves.is_empty());
        assert!(bridge.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_self_blocked_task_is_a_cycle() {
        let bridge = Arc::new(FlakyBridge::default());
        let tasks = vec![Task::new("A", "a").blocked_by(["A"])];

        let report = scheduler(bridge.clone()).run(tasks, "", &CancellationToken::new()).await.unwrap();
        assert_eq!(
            report.outcome,
            SchedulerOutcome::Deadlocked(DeadlockError::Cycle {
                tasks: vec!["A".into(), "A".into()],
            })
        );
        assert!(bridge.calls.lock().unwrap().is_empty());
        assert_eq!(report.tasks[0].status, TaskStatus::Pending);
    }

    #[tokio::test]
    async fn test_failed_dependency_is_retried() {
        let bridge = Arc::new(FlakyBridge::failing(&[("A", 1)]));
        let tasks = vec![Task::new("A", "a"), Task::new("B", "b").blocked_by(["A"])];

        let report = scheduler(bridge.clone()).run(tasks, "", &CancellationToken::new()).await.unwrap();
        assert_eq!(report.outcome, SchedulerOutcome::Completed);
        assert_eq!(bridge.calls_for("A"), 2);
        assert_eq!(bridge.calls_for("B"), 1);
        assert!(report.errors.is_empty());
    }

    #[tokio::test]
    async fn test_error_dependency_budget_exhausted() {
        let bridge = Arc::new(FlakyBridge::broken(&["A"]));
        let tasks = vec![Task::new("A", "a"), Task::new("B", "b").blocked_by(["A"])];

        let report = scheduler(bridge.clone())
            .with_config(SchedulerConfig::default().with_max_retries(2))
            .run(tasks, "", &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(
            report.outcome,
            SchedulerOutcome::Deadlocked(DeadlockError::ErrorDependency {
                task: "B".into(),
                blocked_by: vec!["A".into()],
                retries: 2,
            })
        );
        assert_eq!(bridge.calls_for("A"), 3);
        assert_eq!(bridge.calls_for("B"), 0);
    }

    #[tokio::test]
    async fn test_sibling_failure_does_not_abort_wave() {
        let bridge = Arc::new(FlakyBridge::broken(&["x"]));
        let tasks = vec![Task::new("x", "x"), Task::new("y", "y")];

        let report = scheduler(bridge).run(tasks, "", &CancellationToken::new()).await.unwrap();
        assert_eq!(report.waves.len(), 1);
        assert_eq!(report.waves[0].completed, vec!["y"]);
        assert_eq!(report.outcome, SchedulerOutcome::PartiallyFailed { failed: vec!["x".into()] });
        assert_eq!(report.errors["x"], "x is broken");
    }

    #[tokio::test]
    async fn test_unresolved_reference_policies() {
        let tasks = vec![Task::new("1", "a"), Task::new("2", "b").blocked_by(["ghost"])];

        let blocked = scheduler(Arc::new(FlakyBridge::default()))
            .run(tasks.clone(), "", &CancellationToken::new())
            .await
            .unwrap();
        match blocked.outcome {
            SchedulerOutcome::Deadlocked(DeadlockError::Stalled { pending, unresolved }) => {
                assert_eq!(pending, vec!["2"]);
                assert_eq!(unresolved, vec![("2".to_string(), "ghost".to_string())]);
            }
            other => panic!("unexpected outcome {other:?}"),
        }

        let ignored = scheduler(Arc::new(FlakyBridge::default()))
            .with_config(SchedulerConfig::default().with_unresolved(UnresolvedPolicy::Ignore))
            .run(tasks, "", &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(ignored.outcome, SchedulerOutcome::Completed);
        assert_eq!(ignored.waves.len(), 1);
    }

    #[tokio::test]
    async fn test_interrupted_tasks_are_redispatched() {
        let bridge = Arc::new(FlakyBridge::default());
        let tasks = vec![
            Task::new("1", "a").with_status(TaskStatus::InProgress),
            Task::new("2", "b").with_status(TaskStatus::Completed),
        ];
        let report = scheduler(bridge.clone()).run(tasks, "", &CancellationToken::new()).await.unwrap();
        assert_eq!(report.outcome, SchedulerOutcome::Completed);
        assert_eq!(bridge.calls_for("1"), 1);
        assert_eq!(bridge.calls_for("2"), 0);
    }

    #[tokio::test]
    async fn test_cancelled_before_dispatch() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let report = scheduler(Arc::new(FlakyBridge::default()))
            .run(vec![Task::new("1", "a")], "", &cancel)
            .await
            .unwrap();
        assert_eq!(report.outcome, SchedulerOutcome::Cancelled);
        assert_eq!(report.tasks[0].status, TaskStatus::Pending);
    }

    #[tokio::test]
    async fn test_invalid_tasks_rejected() {
        let err = scheduler(Arc::new(FlakyBridge::default()))
            .run(vec![Task::new("a b", "spaces")], "", &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, NodeError::Validation(_)));
    }

    #[tokio::test]
    async fn test_default_prompt_includes_preamble() {
        let bridge = Arc::new(FlakyBridge::default());
        TaskScheduler::new(bridge.clone())
            .run(vec![Task::new("1", "write docs")], "Goal: ship", &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(*bridge.calls.lock().unwrap(), vec!["Goal: ship\n\nTask 1: write docs"]);
    }

    crate::workflow_state! {
        struct Build => BuildUpdate {
            tasks: Vec<Task> => merge_by_id,
        }
    }

    #[tokio::test]
    async fn test_scheduler_node_writes_tasks_back() {
        let bridge = Arc::new(FlakyBridge::default());
        let node = scheduler(bridge).into_node(
            "implement",
            |s: &Build| s.tasks.clone(),
            |tasks| BuildUpdate::default().tasks(tasks),
        );
        let graph = GraphBuilder::new()
            .start(node)
            .end()
            .compile(GraphConfig::default())
            .unwrap();

        let initial = Build::new("b").merge(
            BuildUpdate::default().tasks(vec![Task::new("1", "a"), Task::new("2", "b").blocked_by(["1"])]),
        );
        let outcome = graph.invoke(initial, ExecutionOptions::new()).await.unwrap();
        assert!(outcome.state.tasks.iter().all(Task::is_completed));
        assert_eq!(outcome.state.outputs["implement"]["waves"], 2);
        assert_eq!(outcome.state.outputs["implement"]["outcome"], "completed");
    }

    #[tokio::test]
    async fn test_scheduler_node_deadlock_fails_run() {
        let node = scheduler(Arc::new(FlakyBridge::default())).into_node(
            "implement",
            |s: &Build| s.tasks.clone(),
            |tasks| BuildUpdate::default().tasks(tasks),
        );
        let graph = GraphBuilder::new()
            .start(node)
            .end()
            .compile(GraphConfig::default())
            .unwrap();
        let initial = Build::new("b").merge(BuildUpdate::default().tasks(vec![
            Task::new("A", "a").blocked_by(["B"]),
            Task::new("B", "b").blocked_by(["A"]),
        ]));

        let outcome = graph.invoke(initial, ExecutionOptions::new()).await.unwrap();
        assert!(matches!(
            outcome.error,
            Some(crate::error::GraphError::Deadlock(DeadlockError::Cycle { .. }))
        ));
    }

    fn acyclic_tasks() -> impl Strategy<Value = Vec<Task>> {
        prop::collection::vec(prop::collection::vec(any::<prop::sample::Index>(), 0..3), 1..10).prop_map(
            |deps| {
                deps.iter()
                    .enumerate()
                    .map(|(i, picks)| {
                        let mut blockers: Vec<String> = if i == 0 {
                            Vec::new()
                        } else {
                            picks.iter().map(|pick| format!("t{}", pick.index(i))).collect()
                        };
                        blockers.sort();
                        blockers.dedup();
                        Task::new(format!("t{i}"), "work").blocked_by(blockers)
                    })
                    .collect()
            },
        )
    }

    proptest! {
        #[test]
        fn prop_acyclic_sets_complete_within_bounded_waves(tasks in acyclic_tasks()) {
            let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
            let count = tasks.len();
            let report = runtime
                .block_on(scheduler(Arc::new(FlakyBridge::default())).run(tasks, "", &CancellationToken::new()))
                .unwrap();
            prop_assert_eq!(report.outcome, SchedulerOutcome::Completed);
            prop_assert!(report.waves.len() <= count);
            prop_assert!(report.tasks.iter().all(Task::is_completed));
        }
    }
}
