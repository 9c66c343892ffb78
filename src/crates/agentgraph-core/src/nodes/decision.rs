//! Decision node - pure routing on state

use super::{Goto, Node, NodeContext, NodeHandler, NodeId, NodeKind, NodeResult};
use crate::error::NodeError;
use crate::graph::END;
use crate::state::WorkflowState;
use async_trait::async_trait;
use std::sync::Arc;

type RouterFn<S> = Arc<dyn Fn(&S) -> Option<NodeId> + Send + Sync>;

/// Routes to one of a declared set of branches, or to a fallback.
///
/// The router returns `None` when no branch matches; the fallback is used then.
/// With neither, or with a branch outside the declared set, the node raises
/// [`NodeError::Routing`], which the executor never retries. [`END`] is always
/// an acceptable branch.
pub struct DecisionNode<S: WorkflowState> {
    branches: Vec<NodeId>,
    fallback: Option<NodeId>,
    router: RouterFn<S>,
}

impl<S: WorkflowState> DecisionNode<S> {
    pub fn new<I, T>(branches: I, router: impl Fn(&S) -> Option<NodeId> + Send + Sync + 'static) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<NodeId>,
    {
        Self {
            branches: branches.into_iter().map(Into::into).collect(),
            fallback: None,
            router: Arc::new(router),
        }
    }

    pub fn with_fallback(mut self, fallback: impl Into<NodeId>) -> Self {
        self.fallback = Some(fallback.into());
        self
    }

    fn targets(&self) -> Vec<NodeId> {
        self.branches
            .iter()
            .chain(self.fallback.iter())
            .cloned()
            .collect()
    }
}

#[async_trait]
impl<S: WorkflowState> NodeHandler<S> for DecisionNode<S> {
    async fn execute(&self, ctx: NodeContext<S>) -> Result<NodeResult<S>, NodeError> {
        let target = (self.router)(ctx.state())
            .or_else(|| self.fallback.clone())
            .ok_or_else(|| {
                NodeError::Routing(format!(
                    "decision '{}' matched no branch and has no fallback",
                    ctx.node_id
                ))
            })?;

        if target == END {
            return Ok(NodeResult::goto(Goto::End));
        }
        if !self.branches.contains(&target) && self.fallback.as_ref() != Some(&target) {
            return Err(NodeError::Routing(format!(
                "decision '{}' routed to undeclared branch '{}'",
                ctx.node_id, target
            )));
        }
        Ok(NodeResult::goto(Goto::Node(target)))
    }
}

impl<S: WorkflowState> Node<S> {
    pub fn decision(id: impl Into<NodeId>, decision: DecisionNode<S>) -> Self {
        let targets = decision.targets();
        Node::new(id, NodeKind::Decision, decision).with_goto_targets(targets)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    crate::workflow_state! {
        struct Gate => GateUpdate {
            score: u32 => replace,
        }
    }

    fn gate(score: u32) -> NodeContext<Gate> {
        NodeContext::new("gate", Gate::new("r").merge(GateUpdate::default().score(score)))
    }

    fn router() -> DecisionNode<Gate> {
        DecisionNode::new(["ship", "rework"], |s: &Gate| match s.score {
            0 => None,
            1..=5 => Some("rework".to_string()),
            6..=9 => Some("ship".to_string()),
            _ => Some("elsewhere".to_string()),
        })
    }

    #[tokio::test]
    async fn test_routes_to_declared_branch() {
        let result = router().execute(gate(7)).await.unwrap();
        assert_eq!(result.goto, Some(Goto::node("ship")));
        assert!(result.update.is_none());
    }

    #[tokio::test]
    async fn test_no_match_uses_fallback_or_fails() {
        let err = router().execute(gate(0)).await.unwrap_err();
        assert!(matches!(err, NodeError::Routing(_)));

        let result = router().with_fallback("triage").execute(gate(0)).await.unwrap();
        assert_eq!(result.goto, Some(Goto::node("triage")));
    }

    #[tokio::test]
    async fn test_undeclared_branch_rejected() {
        let err = router().execute(gate(12)).await.unwrap_err();
        assert!(err.to_string().contains("undeclared branch 'elsewhere'"));
    }

    #[test]
    fn test_node_declares_goto_targets() {
        let node = Node::decision("gate", router().with_fallback("triage"));
        assert_eq!(node.goto_targets(), ["ship", "rework", "triage"]);
        assert_eq!(node.kind(), NodeKind::Decision);
    }
}
