//! Foreach node: runs its `forEach` targets once per collection item
//!
//! ```yaml
//! - id: each-server
//!   type: foreachNode
//!   data:
//!     collectionVariable: workflow.servers   # array, or object iterated as [key, value]
//!     itemVariable: server                   # default `item`
//!     indexVariable: i
//!     parallelExecution: false
//!     continueOnError: false
//!     maxIterations: 100
//! ```
//!
//! Sequential runs share the execution's variable store and stop at the first
//! failed iteration unless `continueOnError` is set. Parallel runs give each
//! iteration its own copy of the store, then apply what each copy changed in
//! iteration order, so the highest index wins when two iterations write the
//! same variable.

use async_trait::async_trait;
use futures::future::join_all;
use serde_json::{json, Map, Value};

use super::{NodeContext, NodeExecutor};
use crate::engine::error::NodeError;
use crate::engine::result::NodeOutcome;
use crate::workflow::expressions::sole_placeholder;
use crate::workflow::{coerce_value, stringify, Branch, ExecutionLog, Node, VariableStore};

pub struct ForeachExecutor;

#[async_trait]
impl NodeExecutor for ForeachExecutor {
    fn node_type(&self) -> &'static str {
        "foreachNode"
    }

    async fn execute(
        &self,
        node: &Node,
        ctx: &mut NodeContext<'_>,
    ) -> Result<NodeOutcome, NodeError> {
        let items = collection(node, ctx)?;

        let limit = node
            .field("maxIterations")
            .and_then(Value::as_u64)
            .map(|n| (n as usize).min(ctx.env.config.max_iterations))
            .unwrap_or(ctx.env.config.max_iterations);
        if items.len() > limit {
            return Err(NodeError::config(format!(
                "Collection has {} items, exceeding the limit of {}",
                items.len(),
                limit
            )));
        }

        let workflow = ctx.env.workflow;
        let body: Vec<&Node> = workflow
            .outgoing(&node.id)
            .filter(|e| e.is_loop_body())
            .filter_map(|e| workflow.node(&e.target))
            .collect();
        if body.is_empty() {
            ctx.log.warn(&node.id, "Foreach has no forEach targets");
        }

        let binding = Binding {
            item: node.str_field("itemVariable").unwrap_or("item"),
            index: node.str_field("indexVariable"),
        };
        let continue_on_error = node.continue_on_error();
        let total = items.len();

        let failures = if node.flag("parallelExecution") {
            run_parallel(node, &body, &items, &binding, ctx).await?
        } else {
            run_sequential(node, &body, &items, &binding, continue_on_error, ctx).await?
        };

        ctx.results.insert(
            node.id.clone(),
            json!({ "iterations": total, "failed": failures }),
        );
        ctx.log.info(
            &node.id,
            format!("Foreach finished: {} iterations, {} failed", total, failures),
        );

        if failures > 0 && !continue_on_error {
            return Err(NodeError::Remote(format!(
                "{} of {} iterations failed",
                failures, total
            )));
        }
        Ok(NodeOutcome::next())
    }
}

struct Binding<'n> {
    item: &'n str,
    index: Option<&'n str>,
}

impl Binding<'_> {
    fn bind(&self, variables: &mut VariableStore, index: usize, item: &Value) -> Result<(), NodeError> {
        variables.set(self.item, item.clone())?;
        if let Some(name) = self.index {
            variables.set(name, Value::from(index))?;
        }
        Ok(())
    }
}

/// The items to iterate, in order
fn collection(node: &Node, ctx: &NodeContext<'_>) -> Result<Vec<Value>, NodeError> {
    let raw = node
        .str_field("collectionVariable")
        .ok_or_else(|| NodeError::config("foreachNode requires 'collectionVariable'"))?;
    let path = sole_placeholder(raw).unwrap_or(raw);

    let value = ctx
        .variables
        .get(path)
        .cloned()
        .ok_or_else(|| NodeError::config(format!("Collection variable not found: {}", path)))?;

    // stored output of a script is often a JSON string
    let value = match value {
        Value::String(s) => coerce_value(&s),
        other => other,
    };

    match value {
        Value::Array(items) => Ok(items),
        Value::Object(map) => Ok(map
            .into_iter()
            .map(|(key, value)| Value::Array(vec![Value::String(key), value]))
            .collect()),
        other => Err(NodeError::type_error(format!(
            "Collection '{}' is not an array or object: {}",
            path,
            stringify(&other)
        ))),
    }
}

/// Run every body node for one iteration
async fn run_body(body: &[&Node], ctx: &mut NodeContext<'_>) -> Result<(), NodeError> {
    for node in body {
        if ctx.env.cancel.is_cancelled() {
            return Err(NodeError::Cancelled);
        }
        let services = ctx.env.services;
        let branch = services.run_inline(node, ctx).await?;
        if branch == Branch::Error {
            return Err(NodeError::Remote(format!("Node {} failed", node.id)));
        }
    }
    Ok(())
}

fn iteration_message(index: usize, total: usize, item: &Value) -> String {
    format!("Iteration {}/{}: {}", index + 1, total, stringify(item))
}

async fn run_sequential(
    node: &Node,
    body: &[&Node],
    items: &[Value],
    binding: &Binding<'_>,
    continue_on_error: bool,
    ctx: &mut NodeContext<'_>,
) -> Result<usize, NodeError> {
    let mut failures = 0;
    for (index, item) in items.iter().enumerate() {
        if ctx.env.cancel.is_cancelled() {
            return Err(NodeError::Cancelled);
        }
        ctx.log
            .info(&node.id, iteration_message(index, items.len(), item));
        binding.bind(ctx.variables, index, item)?;

        let outcome = run_body(body, &mut ctx.for_iteration(index)).await;
        match outcome {
            Ok(()) => {}
            Err(NodeError::Cancelled) => return Err(NodeError::Cancelled),
            Err(e) => {
                failures += 1;
                ctx.log
                    .error(&node.id, format!("Iteration {} failed: {}", index + 1, e));
                if !continue_on_error {
                    break;
                }
            }
        }
    }
    Ok(failures)
}

/// Per-iteration state for parallel runs
struct Lane {
    variables: VariableStore,
    results: Map<String, Value>,
    log: ExecutionLog,
}

async fn run_parallel(
    node: &Node,
    body: &[&Node],
    items: &[Value],
    binding: &Binding<'_>,
    ctx: &mut NodeContext<'_>,
) -> Result<usize, NodeError> {
    let base = ctx.variables.clone();
    let mut lanes = Vec::with_capacity(items.len());
    for (index, item) in items.iter().enumerate() {
        let mut lane = Lane {
            variables: base.clone(),
            results: Map::new(),
            log: ExecutionLog::new(),
        };
        lane.log
            .info(&node.id, iteration_message(index, items.len(), item));
        binding.bind(&mut lane.variables, index, item)?;
        lanes.push(lane);
    }

    let env = ctx.env;
    let outcomes = join_all(lanes.iter_mut().enumerate().map(|(index, lane)| async move {
        let mut lane_ctx = NodeContext::new(
            env,
            &mut lane.variables,
            &mut lane.results,
            &mut lane.log,
        );
        lane_ctx.iteration = Some(index);
        run_body(body, &mut lane_ctx).await
    }))
    .await;

    let mut failures = 0;
    let mut cancelled = false;
    for (index, (lane, outcome)) in lanes.into_iter().zip(outcomes).enumerate() {
        ctx.variables.apply_changes(&base, &lane.variables);
        ctx.results.extend(lane.results);
        ctx.log.extend(lane.log);
        match outcome {
            Ok(()) => {}
            Err(NodeError::Cancelled) => cancelled = true,
            Err(e) => {
                failures += 1;
                ctx.log
                    .error(&node.id, format!("Iteration {} failed: {}", index + 1, e));
            }
        }
    }

    if cancelled {
        return Err(NodeError::Cancelled);
    }
    Ok(failures)
}
