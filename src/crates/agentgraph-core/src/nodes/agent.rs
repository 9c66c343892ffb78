//! Agent node - delegates a prompt to the agent bridge

use super::{Node, NodeContext, NodeHandler, NodeId, NodeKind, NodeResult};
use crate::bridge::{AgentBridge, SpawnConfig, SpawnResult};
use crate::error::NodeError;
use crate::state::{StateUpdate, WorkflowState};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

type PromptFn<S> = Arc<dyn Fn(&NodeContext<S>) -> String + Send + Sync>;
type ResponseFn<S> =
    Arc<dyn Fn(&NodeContext<S>, SpawnResult) -> Result<NodeResult<S>, NodeError> + Send + Sync>;

/// Builds a prompt from state, spawns an agent, maps the response to an update.
///
/// Without a response mapper, a successful spawn records its output under the
/// node id in `outputs`, and a failed spawn becomes [`NodeError::Bridge`].
pub struct AgentNode<S: WorkflowState> {
    bridge: Arc<dyn AgentBridge>,
    prompt: PromptFn<S>,
    config: SpawnConfig,
    on_response: Option<ResponseFn<S>>,
}

impl<S: WorkflowState> AgentNode<S> {
    pub fn new(
        bridge: Arc<dyn AgentBridge>,
        prompt: impl Fn(&NodeContext<S>) -> String + Send + Sync + 'static,
    ) -> Self {
        Self {
            bridge,
            prompt: Arc::new(prompt),
            config: SpawnConfig::default(),
            on_response: None,
        }
    }

    pub fn with_config(mut self, config: SpawnConfig) -> Self {
        self.config = config;
        self
    }

    /// Map the bridge result to a node result. Returning
    /// [`NodeError::Validation`] makes the node retry with a corrective prompt.
    pub fn on_response(
        mut self,
        f: impl Fn(&NodeContext<S>, SpawnResult) -> Result<NodeResult<S>, NodeError>
            + Send
            + Sync
            + 'static,
    ) -> Self {
        self.on_response = Some(Arc::new(f));
        self
    }

    fn render_prompt(&self, ctx: &NodeContext<S>) -> String {
        let prompt = (self.prompt)(ctx);
        match &ctx.previous_error {
            Some(error) => format!(
                "{}\n\nYour previous response was rejected: {}\nReturn a corrected response.",
                prompt, error
            ),
            None => prompt,
        }
    }
}

#[async_trait]
impl<S: WorkflowState> NodeHandler<S> for AgentNode<S> {
    async fn execute(&self, ctx: NodeContext<S>) -> Result<NodeResult<S>, NodeError> {
        let prompt = self.render_prompt(&ctx);
        debug!(
            node = %ctx.node_id,
            bridge = self.bridge.name(),
            attempt = ctx.attempt,
            prompt_len = prompt.len(),
            "spawning agent"
        );

        let result = tokio::select! {
            result = self.bridge.spawn(&prompt, &self.config) => result,
            _ = ctx.cancel.cancelled() => return Err(NodeError::Cancelled),
        };

        match &self.on_response {
            Some(map) => map(&ctx, result),
            None if result.success => Ok(NodeResult::update(
                S::Update::default().with_output(&ctx.node_id, Value::String(result.output)),
            )),
            None => Err(NodeError::Bridge(
                result
                    .error
                    .unwrap_or_else(|| "agent reported failure".to_string()),
            )),
        }
    }
}

impl<S: WorkflowState> Node<S> {
    pub fn agent(id: impl Into<NodeId>, agent: AgentNode<S>) -> Self {
        Node::new(id, NodeKind::Agent, agent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    crate::workflow_state! {
        struct Doc => DocUpdate {
            summary: String => replace,
        }
    }

    struct ScriptedBridge {
        replies: Mutex<Vec<SpawnResult>>,
        prompts: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl AgentBridge for ScriptedBridge {
        async fn spawn(&self, task: &str, _config: &SpawnConfig) -> SpawnResult {
            self.prompts.lock().unwrap().push(task.to_string());
            self.replies.lock().unwrap().remove(0)
        }
    }

    fn bridge(replies: Vec<SpawnResult>) -> Arc<ScriptedBridge> {
        Arc::new(ScriptedBridge {
            replies: Mutex::new(replies),
            prompts: Mutex::new(Vec::new()),
        })
    }

    #[tokio::test]
    async fn test_default_mapping_records_output() {
        let b = bridge(vec![SpawnResult::ok("done")]);
        let node = AgentNode::<Doc>::new(b.clone(), |ctx| format!("summarize {}", ctx.execution_id));

        let result = node.execute(NodeContext::new("summarize", Doc::new("r1"))).await.unwrap();
        let state = Doc::new("r1").merge(result.update.unwrap());
        assert_eq!(state.outputs["summarize"], Value::String("done".into()));
        assert_eq!(b.prompts.lock().unwrap()[0], "summarize r1");
    }

    #[tokio::test]
    async fn test_failed_spawn_is_bridge_error() {
        let node = AgentNode::<Doc>::new(bridge(vec![SpawnResult::failed("exit 1")]), |_| "x".into());
        let err = node.execute(NodeContext::new("n", Doc::new("r"))).await.unwrap_err();
        assert!(matches!(err, NodeError::Bridge(msg) if msg == "exit 1"));
    }

    #[tokio::test]
    async fn test_custom_mapping_and_corrective_prompt() {
        let b = bridge(vec![SpawnResult::ok("short")]);
        let node = AgentNode::<Doc>::new(b.clone(), |_| "write a summary".into()).on_response(
            |_ctx, result| Ok(NodeResult::update(DocUpdate::default().summary(result.output))),
        );

        let mut ctx = NodeContext::new("n", Doc::new("r"));
        ctx.previous_error = Some("summary was empty".into());
        let result = node.execute(ctx).await.unwrap();

        assert_eq!(result.update.unwrap().summary.as_deref(), Some("short"));
        let prompt = b.prompts.lock().unwrap()[0].clone();
        assert!(prompt.starts_with("write a summary"));
        assert!(prompt.contains("rejected: summary was empty"));
    }
}
