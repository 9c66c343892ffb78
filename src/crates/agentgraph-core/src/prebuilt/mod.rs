//! Prebuilt workflows
//!
//! Ready-made graphs assembled from the public building blocks. They use
//! nothing a caller could not build with [`GraphBuilder`](crate::builder::GraphBuilder)
//! directly, so they double as worked examples.
//!
//! | Workflow | Shape |
//! |----------|-------|
//! | [`ralph`] | research → plan → approve → implement (task waves) → review, looping until approved |

pub mod ralph;

pub use ralph::{ralph_workflow, RalphConfig, RalphState, RalphUpdate, ReviewResult};
