//! Variable node: writes to the variable store
//!
//! `value` strings are placeholder-resolved, then parsed opportunistically
//! (JSON object/array, number, boolean, else the raw string).
//!
//! Operations:
//! - `set` (default) - store the value
//! - `increment` / `decrement` - add or subtract the value (default 1); absent counts as 0
//! - `append` - push the value onto an array; absent counts as empty
//! - `delete` - remove the variable

use async_trait::async_trait;
use serde_json::Value;

use super::{NodeContext, NodeExecutor};
use crate::engine::error::NodeError;
use crate::engine::result::NodeOutcome;
use crate::workflow::{coerce_value, stringify, Node};

pub struct VariableExecutor;

#[async_trait]
impl NodeExecutor for VariableExecutor {
    fn node_type(&self) -> &'static str {
        "variableNode"
    }

    async fn execute(
        &self,
        node: &Node,
        ctx: &mut NodeContext<'_>,
    ) -> Result<NodeOutcome, NodeError> {
        let name = node
            .str_field("variableName")
            .ok_or_else(|| NodeError::config("variableNode requires 'variableName'"))?;
        let operation = node.str_field("operation").unwrap_or("set");

        let value = match node.field("value") {
            Some(Value::String(s)) => coerce_value(&ctx.resolve(s)),
            Some(other) => ctx.resolve_value(other),
            None => Value::Null,
        };

        match operation {
            "set" => {
                let shown = stringify(&value);
                ctx.variables.set(name, value)?;
                ctx.log.info(&node.id, format!("Set {} = {}", name, shown));
            }
            "increment" | "decrement" => {
                let delta = if value.is_null() { Value::from(1) } else { value };
                let current = ctx.variables.get(name).cloned().unwrap_or(Value::from(0));
                let updated = add(&current, &delta, operation == "decrement")
                    .ok_or_else(|| {
                        NodeError::type_error(format!(
                            "Cannot {} '{}': {} and {} are not both numbers",
                            operation,
                            name,
                            stringify(&current),
                            stringify(&delta)
                        ))
                    })?;
                let shown = stringify(&updated);
                ctx.variables.set(name, updated)?;
                ctx.log.info(&node.id, format!("Set {} = {}", name, shown));
            }
            "append" => {
                let updated = match ctx.variables.get(name).cloned() {
                    None | Some(Value::Null) => Value::Array(vec![value]),
                    Some(Value::Array(mut items)) => {
                        items.push(value);
                        Value::Array(items)
                    }
                    Some(other) => {
                        return Err(NodeError::type_error(format!(
                            "Cannot append to '{}': {} is not an array",
                            name,
                            stringify(&other)
                        )))
                    }
                };
                ctx.variables.set(name, updated)?;
                ctx.log.info(&node.id, format!("Appended to {}", name));
            }
            "delete" => {
                ctx.variables.remove(name)?;
                ctx.log.info(&node.id, format!("Deleted {}", name));
            }
            other => {
                return Err(NodeError::config(format!(
                    "Unknown variable operation: {}",
                    other
                )))
            }
        }

        Ok(NodeOutcome::next())
    }
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Numeric add that stays integral when both sides are integers
fn add(current: &Value, delta: &Value, subtract: bool) -> Option<Value> {
    if let (Some(a), Some(b)) = (current.as_i64(), delta.as_i64()) {
        let result = if subtract { a.checked_sub(b) } else { a.checked_add(b) };
        if let Some(result) = result {
            return Some(Value::from(result));
        }
    }

    let (a, b) = (as_number(current)?, as_number(delta)?);
    let result = if subtract { a - b } else { a + b };
    if result.fract() == 0.0 && result.abs() < i64::MAX as f64 {
        Some(Value::from(result as i64))
    } else {
        serde_json::Number::from_f64(result).map(Value::Number)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::nodes::testing::Harness;
    use serde_json::json;

    fn variable(data: Value) -> Harness {
        Harness::single(Node::new("v", "variableNode", data))
    }

    #[tokio::test]
    async fn test_set_detects_value_types() {
        let cases = [
            (json!("{\"a\": 1}"), json!({"a": 1})),
            (json!("[1, 2]"), json!([1, 2])),
            (json!("7"), json!(7)),
            (json!("true"), json!(true)),
            (json!("plain"), json!("plain")),
            (json!(3.5), json!(3.5)),
        ];
        for (input, expected) in cases {
            let mut harness = variable(json!({"variableName": "x", "value": input}));
            harness.run("v").await.unwrap();
            assert_eq!(harness.variables.get("user.x"), Some(&expected));
        }
    }

    #[tokio::test]
    async fn test_set_resolves_placeholders() {
        let mut harness = variable(json!({"variableName": "workflow.greeting", "value": "hi {{name}}"}));
        harness.variables.set("name", json!("ada")).unwrap();
        harness.run("v").await.unwrap();
        assert_eq!(harness.variables.get("workflow.greeting"), Some(&json!("hi ada")));
    }

    #[tokio::test]
    async fn test_increment_and_decrement() {
        let mut harness = variable(json!({"variableName": "counter", "operation": "increment", "value": "{{item}}"}));
        harness.variables.set("item", json!(4)).unwrap();
        harness.run("v").await.unwrap();
        harness.run("v").await.unwrap();
        assert_eq!(harness.variables.get("counter"), Some(&json!(8)));

        let mut harness = variable(json!({"variableName": "n", "operation": "decrement"}));
        harness.variables.set("n", json!(2.5)).unwrap();
        harness.run("v").await.unwrap();
        assert_eq!(harness.variables.get("n"), Some(&json!(1.5)));
    }

    #[tokio::test]
    async fn test_increment_non_number_is_type_error() {
        let mut harness = variable(json!({"variableName": "name", "operation": "increment"}));
        harness.variables.set("name", json!("ada")).unwrap();
        assert!(matches!(harness.run("v").await, Err(NodeError::Type(_))));
    }

    #[tokio::test]
    async fn test_append_and_delete() {
        let mut harness = variable(json!({"variableName": "seen", "operation": "append", "value": "a"}));
        harness.run("v").await.unwrap();
        harness.run("v").await.unwrap();
        assert_eq!(harness.variables.get("seen"), Some(&json!(["a", "a"])));

        let mut harness = variable(json!({"variableName": "seen", "operation": "delete"}));
        harness.variables.set("seen", json!([1])).unwrap();
        harness.run("v").await.unwrap();
        assert_eq!(harness.variables.get("seen"), None);
    }

    #[tokio::test]
    async fn test_system_namespace_is_rejected() {
        let mut harness = variable(json!({"variableName": "system.executionId", "value": "x"}));
        assert!(matches!(harness.run("v").await, Err(NodeError::Variable(_))));
    }

    #[tokio::test]
    async fn test_unknown_operation() {
        let mut harness = variable(json!({"variableName": "x", "operation": "multiply"}));
        assert!(matches!(harness.run("v").await, Err(NodeError::Config(_))));
    }
}
