//! Condition node: routes along the `true` or `false` handle

use async_trait::async_trait;
use serde_json::json;

use super::{NodeContext, NodeExecutor};
use crate::engine::error::NodeError;
use crate::engine::result::NodeOutcome;
use crate::workflow::expressions::try_evaluate_condition;
use crate::workflow::{handles, Branch, Node};

pub struct ConditionExecutor;

#[async_trait]
impl NodeExecutor for ConditionExecutor {
    fn node_type(&self) -> &'static str {
        "conditionNode"
    }

    async fn execute(
        &self,
        node: &Node,
        ctx: &mut NodeContext<'_>,
    ) -> Result<NodeOutcome, NodeError> {
        let condition = node
            .str_field("condition")
            .ok_or_else(|| NodeError::config("conditionNode requires 'condition'"))?;

        let result = match try_evaluate_condition(condition, &*ctx.variables) {
            Ok(result) => result,
            Err(e) if ctx.env.config.strict_conditions => return Err(e.into()),
            Err(e) => {
                ctx.log.warn(
                    &node.id,
                    format!("Condition could not be evaluated ({}), treating as false", e),
                );
                false
            }
        };

        ctx.results.insert(
            node.id.clone(),
            json!({ "condition": condition, "result": result }),
        );
        ctx.log
            .info(&node.id, format!("Condition evaluated to {}", result));

        let handle = if result { handles::TRUE } else { handles::FALSE };
        Ok(NodeOutcome::Done(Branch::named(handle)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::nodes::testing::Harness;

    fn condition(expr: &str) -> Harness {
        Harness::single(Node::new("d", "conditionNode", json!({ "condition": expr })))
    }

    #[tokio::test]
    async fn test_routes_true_and_false() {
        let mut harness = condition("{{user.count}} > 10");
        harness.variables.set("count", json!(15)).unwrap();
        assert_eq!(
            harness.run("d").await.unwrap(),
            NodeOutcome::Done(Branch::named("true"))
        );
        assert_eq!(
            harness.results["d"],
            json!({"condition": "{{user.count}} > 10", "result": true})
        );

        harness.variables.set("count", json!(3)).unwrap();
        assert_eq!(
            harness.run("d").await.unwrap(),
            NodeOutcome::Done(Branch::named("false"))
        );
    }

    #[tokio::test]
    async fn test_unresolved_placeholder_is_false() {
        let mut harness = condition("{{user.count}} > 10");
        assert_eq!(
            harness.run("d").await.unwrap(),
            NodeOutcome::Done(Branch::named("false"))
        );
        assert_eq!(harness.results["d"]["result"], json!(false));
    }

    #[tokio::test]
    async fn test_strict_conditions_fail_the_node() {
        let mut harness = condition("{{user.count}} > 10");
        harness.config.strict_conditions = true;
        assert!(matches!(harness.run("d").await, Err(NodeError::Condition(_))));
    }

    #[tokio::test]
    async fn test_missing_condition() {
        let mut harness = Harness::single(Node::new("d", "conditionNode", json!({})));
        assert!(matches!(harness.run("d").await, Err(NodeError::Config(_))));
    }
}
