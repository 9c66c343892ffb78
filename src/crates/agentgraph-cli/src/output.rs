//! Step and outcome rendering for `run` and `resume`.
//!
//! Text lines are for people; `--json` emits one object per line with an
//! `event` field of `step` or `finished`.

use agentgraph_core::{ExecutionOutcome, RunEvent, StepEvent, WorkflowState};
use serde_json::{json, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct StepPrinter {
    format: OutputFormat,
}

impl StepPrinter {
    pub fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    pub fn render<S: WorkflowState>(&self, event: &RunEvent<S>) -> String {
        match event {
            RunEvent::Step(step) => self.step(step),
            RunEvent::Finished(outcome) => self.finished(outcome),
        }
    }

    pub fn step<S: WorkflowState>(&self, event: &StepEvent<S>) -> String {
        match self.format {
            OutputFormat::Json => json!({
                "event": "step",
                "execution_id": event.execution_id,
                "step": event.step,
                "node": event.node,
                "kind": event.kind,
                "status": event.status.as_str(),
                "attempts": event.attempts,
                "caught_error": event.caught_error,
                "signals": event.signals,
                "tasks": tasks_of(&event.state),
            })
            .to_string(),
            OutputFormat::Text => {
                let mut line = format!(
                    "[{:>3}] {:<14} {:<9} {}",
                    event.step,
                    event.node,
                    event.kind.as_str(),
                    event.status.as_str()
                );
                if event.attempts > 1 {
                    line.push_str(&format!(" (attempt {})", event.attempts));
                }
                if event.caught_error {
                    line.push_str(" (error caught)");
                }
                line
            }
        }
    }

    pub fn finished<S: WorkflowState>(&self, outcome: &ExecutionOutcome<S>) -> String {
        let error = outcome.error.as_ref().map(|e| e.to_string());
        match self.format {
            OutputFormat::Json => json!({
                "event": "finished",
                "execution_id": outcome.execution_id,
                "status": outcome.status.as_str(),
                "steps": outcome.steps,
                "paused_at": outcome.paused_at,
                "pending_prompt": outcome.pending_prompt,
                "error": error,
                "caught_failures": outcome.failures.len(),
            })
            .to_string(),
            OutputFormat::Text => {
                let mut text = format!(
                    "{} {} after {} steps",
                    outcome.execution_id,
                    outcome.status.as_str(),
                    outcome.steps
                );
                if let Some(error) = error {
                    text.push_str(&format!("\n  error: {}", error));
                }
                if let Some(prompt) = &outcome.pending_prompt {
                    text.push_str(&format!("\n  waiting: {}", prompt));
                    text.push_str(&format!(
                        "\n  resume with: agentgraph resume {} --approve",
                        outcome.execution_id
                    ));
                }
                text
            }
        }
    }
}

fn tasks_of<S: WorkflowState>(state: &S) -> Value {
    serde_json::to_value(state)
        .ok()
        .and_then(|value| value.get("tasks").cloned())
        .unwrap_or(Value::Null)
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentgraph_core::prebuilt::RalphState;
    use agentgraph_core::{NodeKind, RunStatus, Task};

    fn event() -> StepEvent<RalphState> {
        let mut state = RalphState::for_goal("ship");
        state.tasks = vec![Task::new("1", "write parser")];
        StepEvent {
            execution_id: "run-1".to_string(),
            step: 4,
            node: "implement".to_string(),
            kind: NodeKind::Parallel,
            attempts: 2,
            status: RunStatus::Running,
            caught_error: false,
            signals: vec![],
            state,
        }
    }

    #[test]
    fn test_text_step_line() {
        let line = StepPrinter::new(OutputFormat::Text).step(&event());
        assert!(line.starts_with("[  4] implement"));
        assert!(line.contains("parallel"));
        assert!(line.ends_with("running (attempt 2)"));
    }

    #[test]
    fn test_json_step_line() {
        let line = StepPrinter::new(OutputFormat::Json).step(&event());
        let value: Value = serde_json::from_str(&line).unwrap();
        assert_eq!(value["event"], "step");
        assert_eq!(value["kind"], "parallel");
        assert_eq!(value["status"], "running");
        assert_eq!(value["tasks"][0]["id"], "1");
        assert!(!line.contains('\n'));
    }
}
