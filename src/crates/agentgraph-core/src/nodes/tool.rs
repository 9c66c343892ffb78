//! Tool node - a deterministic async operation bounded by a timeout

use super::{Node, NodeContext, NodeHandler, NodeId, NodeKind, NodeResult};
use crate::error::NodeError;
use crate::state::{StateUpdate, WorkflowState};
use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt};
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

type ToolFn<S> = Arc<dyn Fn(NodeContext<S>) -> BoxFuture<'static, Result<Value, NodeError>> + Send + Sync>;
type OutputFn<S> =
    Arc<dyn Fn(&NodeContext<S>, Value) -> Result<NodeResult<S>, NodeError> + Send + Sync>;

pub const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(30);

pub struct ToolNode<S: WorkflowState> {
    op: ToolFn<S>,
    timeout: Duration,
    on_output: Option<OutputFn<S>>,
}

impl<S: WorkflowState> ToolNode<S> {
    pub fn new<F, Fut>(op: F) -> Self
    where
        F: Fn(NodeContext<S>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, NodeError>> + Send + 'static,
    {
        Self {
            op: Arc::new(move |ctx| op(ctx).boxed()),
            timeout: DEFAULT_TOOL_TIMEOUT,
            on_output: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Map the tool's value to a node result; by default it is recorded in `outputs`.
    pub fn on_output(
        mut self,
        f: impl Fn(&NodeContext<S>, Value) -> Result<NodeResult<S>, NodeError> + Send + Sync + 'static,
    ) -> Self {
        self.on_output = Some(Arc::new(f));
        self
    }
}

#[async_trait]
impl<S: WorkflowState> NodeHandler<S> for ToolNode<S> {
    async fn execute(&self, ctx: NodeContext<S>) -> Result<NodeResult<S>, NodeError> {
        let value = match tokio::time::timeout(self.timeout, (self.op)(ctx.clone())).await {
            Ok(result) => result?,
            Err(_) => {
                warn!(node = %ctx.node_id, timeout_ms = self.timeout.as_millis() as u64, "tool timed out");
                return Err(NodeError::Timeout {
                    after_ms: self.timeout.as_millis() as u64,
                });
            }
        };

        match &self.on_output {
            Some(map) => map(&ctx, value),
            None => Ok(NodeResult::update(
                S::Update::default().with_output(&ctx.node_id, value),
            )),
        }
    }
}

impl<S: WorkflowState> Node<S> {
    pub fn tool(id: impl Into<NodeId>, tool: ToolNode<S>) -> Self {
        Node::new(id, NodeKind::Tool, tool)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    crate::workflow_state! {
        struct Files => FilesUpdate {
            count: usize => replace,
        }
    }

    #[tokio::test]
    async fn test_tool_output_recorded() {
        let tool = ToolNode::<Files>::new(|_ctx| async { Ok(json!({"files": 3})) });
        let result = tool.execute(NodeContext::new("scan", Files::new("r"))).await.unwrap();
        let state = Files::new("r").merge(result.update.unwrap());
        assert_eq!(state.outputs["scan"], json!({"files": 3}));
    }

    #[tokio::test]
    async fn test_tool_custom_output() {
        let tool = ToolNode::<Files>::new(|_ctx| async { Ok(json!(7)) }).on_output(|_ctx, value| {
            let count = value.as_u64().unwrap_or_default() as usize;
            Ok(NodeResult::update(FilesUpdate::default().count(count)))
        });
        let result = tool.execute(NodeContext::new("count", Files::new("r"))).await.unwrap();
        assert_eq!(result.update.unwrap().count, Some(7));
    }

    #[tokio::test(start_paused = true)]
    async fn test_tool_timeout() {
        let tool = ToolNode::<Files>::new(|_ctx| async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(Value::Null)
        })
        .with_timeout(Duration::from_millis(250));

        let err = tool.execute(NodeContext::new("slow", Files::new("r"))).await.unwrap_err();
        assert!(matches!(err, NodeError::Timeout { after_ms: 250 }));
    }
}
