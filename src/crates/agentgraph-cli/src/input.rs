//! Resume input assembled from `--input`, `--approve` and `--reject`.

use agentgraph_core::prebuilt::RalphUpdate;
use anyhow::Context;

/// Build the state update merged into a paused run before it continues.
///
/// `raw` is a JSON object of state fields; unknown fields are rejected.
/// `--approve` and `--reject` are applied on top of it.
pub fn resume_input(
    raw: Option<&str>,
    approve: bool,
    reject: Option<&str>,
) -> anyhow::Result<RalphUpdate> {
    let mut update = match raw {
        Some(raw) => serde_json::from_str::<RalphUpdate>(raw)
            .context("--input must be a JSON object of workflow state fields")?,
        None => RalphUpdate::default(),
    };
    if approve {
        update = update.approved(Some(true));
    }
    if let Some(feedback) = reject {
        update = update.approved(Some(false));
        if !feedback.trim().is_empty() {
            update = update.feedback(vec![feedback.to_string()]);
        }
    }
    Ok(update)
}
