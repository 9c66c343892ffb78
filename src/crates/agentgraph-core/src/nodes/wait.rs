//! Wait node - pause for human input

use super::{Node, NodeContext, NodeHandler, NodeId, NodeKind, NodeResult};
use crate::error::NodeError;
use crate::signal::Signal;
use crate::state::{StateUpdate, WorkflowState};
use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;

type PromptFn<S> = Arc<dyn Fn(&S) -> String + Send + Sync>;

/// Emits [`Signal::HumanInputRequired`] so the executor pauses the run.
///
/// When auto-approve is set (on the node or for the whole run) the node passes
/// straight through instead. Either way the prompt is recorded in `outputs`.
pub struct WaitNode<S: WorkflowState> {
    prompt: PromptFn<S>,
    auto_approve: bool,
}

impl<S: WorkflowState> WaitNode<S> {
    pub fn new(prompt: impl Into<String>) -> Self {
        let prompt = prompt.into();
        Self::with_prompt_fn(move |_| prompt.clone())
    }

    pub fn with_prompt_fn(prompt: impl Fn(&S) -> String + Send + Sync + 'static) -> Self {
        Self {
            prompt: Arc::new(prompt),
            auto_approve: false,
        }
    }

    pub fn auto_approve(mut self, auto_approve: bool) -> Self {
        self.auto_approve = auto_approve;
        self
    }
}

#[async_trait]
impl<S: WorkflowState> NodeHandler<S> for WaitNode<S> {
    async fn execute(&self, ctx: NodeContext<S>) -> Result<NodeResult<S>, NodeError> {
        let prompt = (self.prompt)(ctx.state());
        let approved = self.auto_approve || ctx.auto_approve;
        let update = S::Update::default().with_output(
            &ctx.node_id,
            json!({"prompt": prompt, "auto_approved": approved}),
        );

        if approved {
            Ok(NodeResult::update(update))
        } else {
            Ok(NodeResult::update(update).with_signal(Signal::human_input(prompt)))
        }
    }
}

impl<S: WorkflowState> Node<S> {
    pub fn wait(id: impl Into<NodeId>, wait: WaitNode<S>) -> Self {
        Node::new(id, NodeKind::Wait, wait)
    }
}
