//! Parallel node - concurrent child nodes with a merge strategy
//!
//! Every child sees the same state snapshot; their updates are merged only
//! after the strategy is satisfied, so children never observe each other.
//!
//! | Strategy | Waits for | Fails when |
//! |----------|-----------|------------|
//! | `All` | every child | any child fails |
//! | `First` | the first child to settle | that child failed |
//! | `Any` | the first child to succeed | every child failed |
//!
//! Concurrency is capped by the graph's `max_concurrency`. Children keep their
//! own retry policies; gotos returned by children are ignored.

use super::{Node, NodeContext, NodeHandler, NodeId, NodeKind, NodeResult};
use crate::error::NodeError;
use crate::retry::{execute_with_retry, Attempted};
use crate::signal::Signal;
use crate::state::{StateUpdate, WorkflowState};
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeStrategy {
    #[default]
    All,
    First,
    Any,
}

type MergeFn<S> =
    Arc<dyn Fn(Vec<<S as WorkflowState>::Update>) -> <S as WorkflowState>::Update + Send + Sync>;

pub struct ParallelNode<S: WorkflowState> {
    children: Vec<Node<S>>,
    strategy: MergeStrategy,
    merge: Option<MergeFn<S>>,
}

impl<S: WorkflowState> ParallelNode<S> {
    pub fn new(children: Vec<Node<S>>, strategy: MergeStrategy) -> Self {
        Self {
            children,
            strategy,
            merge: None,
        }
    }

    /// Merge the collected child updates (in child order) into one. Defaults
    /// to folding with [`StateUpdate::combine`].
    pub fn with_merge(
        mut self,
        merge: impl Fn(Vec<S::Update>) -> S::Update + Send + Sync + 'static,
    ) -> Self {
        self.merge = Some(Arc::new(merge));
        self
    }

    pub fn children(&self) -> &[Node<S>] {
        &self.children
    }

    fn finish(&self, node: &str, updates: Vec<S::Update>, signals: Vec<Signal>) -> NodeResult<S> {
        let update = if updates.is_empty() {
            None
        } else if let Some(merge) = &self.merge {
            Some(merge(updates))
        } else {
            updates.into_iter().reduce(StateUpdate::combine)
        };
        debug!(node, strategy = ?self.strategy, "parallel branches merged");
        NodeResult {
            update,
            goto: None,
            signals,
        }
    }
}

fn collect<S: WorkflowState>(
    parent: &str,
    child: &str,
    result: NodeResult<S>,
    updates: &mut Vec<S::Update>,
    signals: &mut Vec<Signal>,
) {
    if result.goto.is_some() {
        warn!(node = parent, child, "goto from parallel branch ignored");
    }
    updates.extend(result.update);
    signals.extend(result.signals);
}

fn branch_error(child: &str, attempted_attempts: u32, err: NodeError) -> NodeError {
    match err {
        NodeError::Cancelled => NodeError::Cancelled,
        err => NodeError::failed(format!(
            "branch '{}' failed after {} attempt(s): {}",
            child, attempted_attempts, err
        )),
    }
}

#[async_trait]
impl<S: WorkflowState> NodeHandler<S> for ParallelNode<S> {
    async fn execute(&self, ctx: NodeContext<S>) -> Result<NodeResult<S>, NodeError> {
        if self.children.is_empty() {
            return Ok(NodeResult::empty());
        }
        let limit = ctx
            .max_concurrency
            .unwrap_or(self.children.len())
            .clamp(1, self.children.len());
        let branches = ctx.cancel.child_token();

        let runs: Vec<_> = self.children.iter().map(|child| {
            let child_ctx = ctx.for_child(&child.id, branches.clone());
            async move {
                let attempted: Attempted<S> = execute_with_retry(child, child_ctx).await;
                (child.id.as_str(), attempted)
            }
        }).collect();

        let mut updates = Vec::new();
        let mut signals = Vec::new();

        match self.strategy {
            MergeStrategy::All => {
                let settled: Vec<_> = stream::iter(runs).buffered(limit).collect().await;
                for (child, attempted) in settled {
                    match attempted.result {
                        Ok(result) => collect(&ctx.node_id, child, result, &mut updates, &mut signals),
                        Err(err) => return Err(branch_error(child, attempted.attempts, err)),
                    }
                }
                Ok(self.finish(&ctx.node_id, updates, signals))
            }
            MergeStrategy::First | MergeStrategy::Any => {
                let mut settled = stream::iter(runs).buffer_unordered(limit);
                let mut failures = Vec::new();
                while let Some((child, attempted)) = settled.next().await {
                    match attempted.result {
                        Ok(result) => {
                            branches.cancel();
                            collect(&ctx.node_id, child, result, &mut updates, &mut signals);
                            return Ok(self.finish(&ctx.node_id, updates, signals));
                        }
                        Err(err) if self.strategy == MergeStrategy::First => {
                            branches.cancel();
                            return Err(branch_error(child, attempted.attempts, err));
                        }
                        Err(err) => failures.push(format!("{}: {}", child, err)),
                    }
                }
                Err(NodeError::failed(format!(
                    "all parallel branches failed: {}",
                    failures.join("; ")
                )))
            }
        }
    }
}

impl<S: WorkflowState> Node<S> {
    pub fn parallel(id: impl Into<NodeId>, parallel: ParallelNode<S>) -> Self {
        Node::new(id, NodeKind::Parallel, parallel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    crate::workflow_state! {
        struct Fan => FanUpdate {
            hits: Vec<String> => append,
            winner: String => replace,
        }
    }

    fn branch(id: &'static str, delay_ms: u64, fail: bool) -> Node<Fan> {
        Node::from_fn(id, move |_ctx| async move {
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            if fail {
                Err(NodeError::failed(format!("{} broke", id)))
            } else {
                Ok(NodeResult::update(
                    FanUpdate::default()
                        .hits(vec![id.to_string()])
                        .winner(id.to_string()),
                ))
            }
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_all_merges_in_child_order() {
        let node = ParallelNode::new(
            vec![branch("slow", 30, false), branch("fast", 10, false)],
            MergeStrategy::All,
        );
        let result = node.execute(NodeContext::new("fan", Fan::new("r"))).await.unwrap();
        let state = Fan::new("r").merge(result.update.unwrap());
        assert_eq!(state.hits, vec!["slow", "fast"]);
        assert_eq!(state.winner, "fast");
    }

    #[tokio::test(start_paused = true)]
    async fn test_all_fails_on_any_branch_error() {
        let node = ParallelNode::new(
            vec![branch("ok", 5, false), branch("bad", 1, true)],
            MergeStrategy::All,
        );
        let err = node.execute(NodeContext::new("fan", Fan::new("r"))).await.unwrap_err();
        assert!(err.to_string().contains("branch 'bad' failed"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_takes_earliest_settled() {
        let node = ParallelNode::new(
            vec![branch("slow", 50, false), branch("fast", 5, true)],
            MergeStrategy::First,
        );
        let err = node.execute(NodeContext::new("fan", Fan::new("r"))).await.unwrap_err();
        assert!(err.to_string().contains("fast broke"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_any_takes_first_success() {
        let node = ParallelNode::new(
            vec![branch("slow", 50, false), branch("broken", 5, true), branch("mid", 20, false)],
            MergeStrategy::Any,
        );
        let result = node.execute(NodeContext::new("fan", Fan::new("r"))).await.unwrap();
        assert_eq!(result.update.unwrap().winner.as_deref(), Some("mid"));

        let all_bad = ParallelNode::new(
            vec![branch("a", 1, true), branch("b", 2, true)],
            MergeStrategy::Any,
        );
        let err = all_bad.execute(NodeContext::new("fan", Fan::new("r"))).await.unwrap_err();
        assert!(err.to_string().contains("all parallel branches failed"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrency_is_bounded() {
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let children = (0..6)
            .map(|i| {
                let (running, peak) = (running.clone(), peak.clone());
                Node::<Fan>::from_fn(format!("b{i}"), move |_ctx| {
                    let (running, peak) = (running.clone(), peak.clone());
                    async move {
                        let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                        peak.fetch_max(now, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(10)).await;
                        running.fetch_sub(1, Ordering::SeqCst);
                        Ok(NodeResult::empty())
                    }
                })
            })
            .collect();

        let mut ctx = NodeContext::new("fan", Fan::new("r"));
        ctx.max_concurrency = Some(2);
        ParallelNode::new(children, MergeStrategy::All)
            .execute(ctx)
            .await
            .unwrap();
        assert_eq!(peak.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_custom_merge() {
        let node = ParallelNode::new(
            vec![branch("a", 0, false), branch("b", 0, false)],
            MergeStrategy::All,
        )
        .with_merge(|updates| FanUpdate::default().winner(format!("{} branches", updates.len())));
        let result = node.execute(NodeContext::new("fan", Fan::new("r"))).await.unwrap();
        assert_eq!(result.update.unwrap().winner.as_deref(), Some("2 branches"));
    }
}
