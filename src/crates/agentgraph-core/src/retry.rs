//! Retry policies - exponential backoff for failed node attempts
//!
//! A node without a policy is attempted once. With a policy, a failed attempt is
//! retried after a delay that grows geometrically:
//!
//! ```text
//! delay(n) = backoff × backoff_multiplier^(n - 1)      n = attempt that just failed
//! delay(n) = min(delay(n), max_backoff)
//! if jitter: delay(n) *= random(0.5..=1.5)
//! ```
//!
//! | Attempt failed | Default delay (100ms, ×2) |
//! |----------------|---------------------------|
//! | 1 | 100ms |
//! | 2 | 200ms |
//! | 3 | 400ms |
//! | 10 | 51.2s |
//! | 11 and later | 60s (`max_backoff`) |
//!
//! Errors that cannot change on retry ([`NodeError::is_retryable`]) end the loop
//! immediately, as does the cancellation token. A custom predicate narrows retries
//! further:
//!
//! ```rust
//! use agentgraph_core::error::NodeError;
//! use agentgraph_core::retry::RetryPolicy;
//! use std::time::Duration;
//!
//! let policy = RetryPolicy::new(4)
//!     .with_backoff(Duration::from_millis(250))
//!     .with_retry_on(|err| matches!(err, NodeError::Validation(_)));
//!
//! assert!(policy.should_retry(1, &NodeError::validation("not json")));
//! assert!(!policy.should_retry(1, &NodeError::failed("agent crashed")));
//! ```
//!
//! The loop itself lives in [`execute_with_retry`], shared by the executor and
//! the parallel node. Between attempts the node sees the previous error in
//! [`NodeContext::previous_error`](crate::nodes::NodeContext::previous_error) so
//! agent nodes can re-prompt with a correction.

use crate::error::NodeError;
use crate::nodes::{Node, NodeContext, NodeResult};
use crate::state::WorkflowState;
use rand::Rng;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

type RetryPredicate = Arc<dyn Fn(&NodeError) -> bool + Send + Sync>;

/// Configuration for retrying failed node executions
#[derive(Clone)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including the first)
    pub max_attempts: u32,

    /// Delay after the first failed attempt
    pub backoff: Duration,

    /// Multiplier applied to the delay after each further failure
    pub backoff_multiplier: f64,

    /// Upper bound for a single delay
    pub max_backoff: Duration,

    /// Whether to randomize delays by 0.5x-1.5x
    pub jitter: bool,

    retry_on: Option<RetryPredicate>,
}

impl RetryPolicy {
    /// Create a new retry policy with the given max attempts
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff: Duration::from_millis(100),
            backoff_multiplier: 2.0,
            max_backoff: Duration::from_secs(60),
            jitter: false,
            retry_on: None,
        }
    }

    /// A single attempt, no retries.
    pub fn none() -> Self {
        Self::new(1)
    }

    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    pub fn with_max_backoff(mut self, max_backoff: Duration) -> Self {
        self.max_backoff = max_backoff;
        self
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Only retry errors matching `predicate` (non-retryable errors are never retried).
    pub fn with_retry_on(
        mut self,
        predicate: impl Fn(&NodeError) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.retry_on = Some(Arc::new(predicate));
        self
    }

    /// Delay to wait after `attempt` (1-based) failed.
    ///
    /// Growth stops at `max_backoff` (60s by default): with the default 100ms
    /// base, every attempt from the 11th on waits the capped 60s.
    pub fn calculate_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let base = self.backoff.as_secs_f64() * self.backoff_multiplier.powi(exponent);
        let capped = base.min(self.max_backoff.as_secs_f64());

        let delay = if self.jitter {
            let mut rng = rand::thread_rng();
            capped * rng.gen_range(0.5..=1.5)
        } else {
            capped
        };

        Duration::from_secs_f64(delay.max(0.0))
    }

    /// Whether another attempt is allowed after `attempt` failed with `error`.
    pub fn should_retry(&self, attempt: u32, error: &NodeError) -> bool {
        attempt < self.max_attempts
            && error.is_retryable()
            && self.retry_on.as_ref().map_or(true, |pred| pred(error))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3)
    }
}

impl fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_attempts", &self.max_attempts)
            .field("backoff", &self.backoff)
            .field("backoff_multiplier", &self.backoff_multiplier)
            .field("max_backoff", &self.max_backoff)
            .field("jitter", &self.jitter)
            .field("retry_on", &self.retry_on.as_ref().map(|_| "<predicate>"))
            .finish()
    }
}

/// Result of running a node under its retry policy.
#[derive(Debug)]
pub(crate) struct Attempted<S: WorkflowState> {
    pub result: Result<NodeResult<S>, NodeError>,
    pub attempts: u32,
}

/// Run `node` until it succeeds, its policy gives up, or `ctx.cancel` fires.
pub(crate) async fn execute_with_retry<S: WorkflowState>(
    node: &Node<S>,
    mut ctx: NodeContext<S>,
) -> Attempted<S> {
    let policy = node.retry.clone().unwrap_or_else(RetryPolicy::none);
    let mut attempt = 1;

    loop {
        ctx.attempt = attempt;
        debug!(node = %node.id, attempt, "executing node");

        let error = match node.handler.execute(ctx.clone()).await {
            Ok(result) => {
                return Attempted {
                    result: Ok(result),
                    attempts: attempt,
                }
            }
            Err(error) => error,
        };

        if ctx.cancel.is_cancelled() || !policy.should_retry(attempt, &error) {
            return Attempted {
                result: Err(error),
                attempts: attempt,
            };
        }

        let delay = policy.calculate_delay(attempt);
        warn!(
            node = %node.id,
            attempt,
            max_attempts = policy.max_attempts,
            delay_ms = delay.as_millis() as u64,
            error = %error,
            "node attempt failed, retrying"
        );
        ctx.previous_error = Some(error.to_string());

        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = ctx.cancel.cancelled() => {
                return Attempted {
                    result: Err(NodeError::Cancelled),
                    attempts: attempt,
                };
            }
        }
        attempt += 1;
    }
}
