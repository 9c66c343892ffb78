//! # agentgraph-cli
//!
//! Support code for the `agentgraph` binary: the `agentgraph.toml` schema, a
//! process-backed [`AgentBridge`](agentgraph_core::AgentBridge) and the step
//! printers used by `run` and `resume`.

pub mod bridge;
pub mod config;
pub mod input;
pub mod output;

pub use bridge::ProcessBridge;
pub use config::{AgentConfig, CheckpointBackend, CheckpointConfig, CliConfig, EngineConfig};
pub use input::resume_input;
pub use output::{OutputFormat, StepPrinter};
