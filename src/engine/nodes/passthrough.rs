//! Fallback for node types without an executor

use async_trait::async_trait;

use super::{NodeContext, NodeExecutor};
use crate::engine::error::NodeError;
use crate::engine::result::NodeOutcome;
use crate::workflow::Node;

/// Completes immediately so unknown node types never fail a workflow
pub struct PassThroughExecutor;

#[async_trait]
impl NodeExecutor for PassThroughExecutor {
    fn node_type(&self) -> &'static str {
        "passthrough"
    }

    async fn execute(
        &self,
        node: &Node,
        ctx: &mut NodeContext<'_>,
    ) -> Result<NodeOutcome, NodeError> {
        ctx.log.warn(
            &node.id,
            format!("No executor for node type '{}', passing through", node.node_type),
        );
        Ok(NodeOutcome::next())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::nodes::testing::Harness;
    use crate::workflow::LogLevel;
    use serde_json::json;

    #[tokio::test]
    async fn test_unknown_type_passes_through_with_warning() {
        let mut harness = Harness::single(Node::new("n", "emailNode", json!({})));
        let outcome = harness.run("n").await.unwrap();

        assert_eq!(outcome, NodeOutcome::next());
        assert_eq!(harness.log.entries()[0].level, LogLevel::Warn);
        assert!(harness.log.messages()[0].contains("emailNode"));
    }
}
