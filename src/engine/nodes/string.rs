//! String node: string operations into `outputVariable`
//!
//! Inputs (`input1`, `input2`) are placeholder-resolved; a result that names
//! an existing variable reads that variable, otherwise it is a literal.
//!
//! Operations: `concat`, `substring` (`startIndex`, `endIndex`), `replace`
//! (every occurrence of `input2` by `replacement`), `toLower`, `toUpper`,
//! `trim`, `split` (on `input2`), `length`.

use async_trait::async_trait;
use serde_json::Value;

use super::{number_field, NodeContext, NodeExecutor};
use crate::engine::error::NodeError;
use crate::engine::result::NodeOutcome;
use crate::workflow::expressions::sole_placeholder;
use crate::workflow::{stringify, Node};

pub struct StringExecutor;

#[async_trait]
impl NodeExecutor for StringExecutor {
    fn node_type(&self) -> &'static str {
        "stringNode"
    }

    async fn execute(
        &self,
        node: &Node,
        ctx: &mut NodeContext<'_>,
    ) -> Result<NodeOutcome, NodeError> {
        let operation = node
            .str_field("operation")
            .ok_or_else(|| NodeError::config("stringNode requires 'operation'"))?;
        let output = node
            .str_field("outputVariable")
            .ok_or_else(|| NodeError::config("stringNode requires 'outputVariable'"))?;
        let input1 = input(node, "input1", ctx)
            .ok_or_else(|| NodeError::config("stringNode requires 'input1'"))?;

        let result = match operation {
            "concat" => {
                let input2 = required_input2(node, operation, ctx)?;
                Value::String(stringify(&input1) + &stringify(&input2))
            }
            "substring" => {
                let text = as_text(&input1, operation)?;
                let chars: Vec<char> = text.chars().collect();
                let clamp = |n: f64| (n.max(0.0) as usize).min(chars.len());
                let start = clamp(number_field(node, "startIndex", ctx)?.unwrap_or(0.0));
                let end = clamp(
                    number_field(node, "endIndex", ctx)?.unwrap_or(chars.len() as f64),
                );
                let (start, end) = if start > end { (end, start) } else { (start, end) };
                Value::String(chars[start..end].iter().collect())
            }
            "replace" => {
                let text = as_text(&input1, operation)?;
                let search = stringify(&required_input2(node, operation, ctx)?);
                let replacement = node
                    .field("replacement")
                    .map(|v| ctx.resolve(&stringify(v)))
                    .unwrap_or_default();
                if search.is_empty() {
                    Value::String(text.to_string())
                } else {
                    Value::String(text.replace(&search, &replacement))
                }
            }
            "toLower" => Value::String(as_text(&input1, operation)?.to_lowercase()),
            "toUpper" => Value::String(as_text(&input1, operation)?.to_uppercase()),
            "trim" => Value::String(as_text(&input1, operation)?.trim().to_string()),
            "split" => {
                let text = as_text(&input1, operation)?;
                let separator = stringify(&required_input2(node, operation, ctx)?);
                let parts: Vec<Value> = if separator.is_empty() {
                    text.chars().map(|c| Value::String(c.to_string())).collect()
                } else {
                    text.split(separator.as_str())
                        .map(|s| Value::String(s.to_string()))
                        .collect()
                };
                Value::Array(parts)
            }
            "length" => {
                let len = match &input1 {
                    Value::String(s) => s.chars().count(),
                    Value::Array(items) => items.len(),
                    Value::Object(map) => map.len(),
                    other => {
                        return Err(NodeError::type_error(format!(
                            "length expects a string or collection, got {}",
                            other
                        )))
                    }
                };
                Value::from(len)
            }
            other => {
                return Err(NodeError::config(format!(
                    "Unknown string operation: {}",
                    other
                )))
            }
        };

        ctx.variables.set(output, result)?;
        ctx.log
            .info(&node.id, format!("{} stored in {}", operation, output));
        Ok(NodeOutcome::next())
    }
}

/// Resolve an input field to a variable's value or a literal
fn input(node: &Node, key: &str, ctx: &NodeContext<'_>) -> Option<Value> {
    match node.field(key)? {
        Value::String(raw) => {
            if let Some(value) = sole_placeholder(raw).and_then(|path| ctx.variables.get(path)) {
                return Some(value.clone());
            }
            let resolved = ctx.resolve(raw);
            if resolved.is_empty() {
                return None;
            }
            Some(
                ctx.variables
                    .get(&resolved)
                    .cloned()
                    .unwrap_or(Value::String(resolved)),
            )
        }
        other => Some(other.clone()),
    }
}

fn required_input2(node: &Node, operation: &str, ctx: &NodeContext<'_>) -> Result<Value, NodeError> {
    input(node, "input2", ctx)
        .ok_or_else(|| NodeError::config(format!("{} requires 'input2'", operation)))
}

fn as_text<'v>(value: &'v Value, operation: &str) -> Result<&'v str, NodeError> {
    value.as_str().ok_or_else(|| {
        NodeError::type_error(format!("{} expects a string, got {}", operation, value))
    })
}
