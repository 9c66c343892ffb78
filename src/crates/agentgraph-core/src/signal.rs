//! Control signals returned by nodes alongside their state updates
//!
//! | Signal | Executor reaction |
//! |--------|-------------------|
//! | `ContextWindowWarning` | logged and forwarded in the step event |
//! | `Checkpoint` | a labelled checkpoint is written after the step |
//! | `HumanInputRequired` | the run pauses; no further work is dequeued |
//! | `DebugReportGenerated` | logged and forwarded in the step event |

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Signal {
    /// The agent's context window is filling up; `usage` is a fraction in `0.0..=1.0`.
    ContextWindowWarning { usage: f64 },

    /// Request a checkpoint with the given label.
    Checkpoint { label: String },

    /// Pause the run until a caller resumes it with input.
    HumanInputRequired { prompt: String },

    DebugReportGenerated { report: Value },
}

impl Signal {
    pub fn checkpoint(label: impl Into<String>) -> Self {
        Signal::Checkpoint {
            label: label.into(),
        }
    }

    pub fn human_input(prompt: impl Into<String>) -> Self {
        Signal::HumanInputRequired {
            prompt: prompt.into(),
        }
    }

    /// The prompt to show when the signal halts traversal.
    pub fn pause_prompt(&self) -> Option<&str> {
        match self {
            Signal::HumanInputRequired { prompt } => Some(prompt),
            _ => None,
        }
    }
}
