//! Wait node: pauses its path without blocking others

use async_trait::async_trait;
use std::time::Duration;

use super::{number_field, NodeContext, NodeExecutor};
use crate::engine::error::NodeError;
use crate::engine::result::NodeOutcome;
use crate::workflow::Node;

pub struct WaitExecutor;

#[async_trait]
impl NodeExecutor for WaitExecutor {
    fn node_type(&self) -> &'static str {
        "waitNode"
    }

    fn suspends(&self) -> bool {
        true
    }

    async fn execute(
        &self,
        node: &Node,
        ctx: &mut NodeContext<'_>,
    ) -> Result<NodeOutcome, NodeError> {
        let seconds = number_field(node, "waitTime", ctx)?
            .unwrap_or(ctx.env.config.default_wait_seconds as f64);
        if !seconds.is_finite() || seconds < 0.0 {
            return Err(NodeError::config(format!(
                "waitTime must be a non-negative number, got {}",
                seconds
            )));
        }

        let duration = Duration::try_from_secs_f64(seconds)
            .map_err(|e| NodeError::config(format!("waitTime {} is out of range: {}", seconds, e)))?;

        ctx.log.info(&node.id, format!("Waiting {} seconds", seconds));
        Ok(NodeOutcome::Sleep(duration))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::nodes::testing::Harness;
    use serde_json::json;
    use tokio_test::{assert_err, assert_ok};

    #[tokio::test]
    async fn test_wait_time_from_number_or_string() {
        let mut harness = Harness::single(Node::new("w", "waitNode", json!({"waitTime": 2})));
        assert_eq!(
            harness.run("w").await.unwrap(),
            NodeOutcome::Sleep(Duration::from_secs(2))
        );

        let mut harness = Harness::single(Node::new("w", "waitNode", json!({"waitTime": "{{delay}}"})));
        harness.variables.set("delay", json!(0.5)).unwrap();
        assert_eq!(
            harness.run("w").await.unwrap(),
            NodeOutcome::Sleep(Duration::from_millis(500))
        );
    }

    #[tokio::test]
    async fn test_default_wait() {
        let mut harness = Harness::single(Node::new("w", "waitNode", json!({})));
        assert_eq!(
            harness.run("w").await.unwrap(),
            NodeOutcome::Sleep(Duration::from_secs(5))
        );
    }

    #[tokio::test]
    async fn test_invalid_wait_time() {
        let mut harness = Harness::single(Node::new("w", "waitNode", json!({"waitTime": "soon"})));
        assert!(matches!(harness.run("w").await, Err(NodeError::Config(_))));

        let mut harness = Harness::single(Node::new("w", "waitNode", json!({"waitTime": -1})));
        assert!(matches!(harness.run("w").await, Err(NodeError::Config(_))));
    }

    #[tokio::test]
    async fn test_huge_wait_time_is_rejected() {
        let mut harness = Harness::single(Node::new("w", "waitNode", json!({"waitTime": 1e20})));
        let err = assert_err!(harness.run("w").await);
        assert!(matches!(err, NodeError::Config(_)));

        let mut harness = Harness::single(Node::new("w", "waitNode", json!({"waitTime": "{{delay}}"})));
        assert_ok!(harness.variables.set("delay", json!(1e300)));
        assert!(matches!(harness.run("w").await, Err(NodeError::Config(_))));
        assert!(harness.log.is_empty());
    }
}
