//! Script node: runs a script on an agent
//!
//! ```yaml
//! - id: backup
//!   type: scriptNode
//!   data:
//!     scriptId: nightly-backup      # or inline `script:`
//!     assignedAgent: db-host        # else the execution's agent, else any online agent
//!     parameters:
//!       database: "{{workflow.database}}"
//!     outputVariable: backupPath
//! ```

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use super::{NodeContext, NodeExecutor};
use crate::bridge::JobReport;
use crate::engine::error::NodeError;
use crate::engine::result::{NodeOutcome, RemoteWork};
use crate::workflow::{coerce_value, Node, VariableStore};

pub struct ScriptExecutor;

#[async_trait]
impl NodeExecutor for ScriptExecutor {
    fn node_type(&self) -> &'static str {
        "scriptNode"
    }

    fn suspends(&self) -> bool {
        true
    }

    async fn execute(
        &self,
        node: &Node,
        ctx: &mut NodeContext<'_>,
    ) -> Result<NodeOutcome, NodeError> {
        let body = match (node.str_field("script"), node.str_field("scriptId")) {
            (Some(script), _) => script.to_string(),
            (None, Some(id)) => {
                ctx.env
                    .services
                    .load_script(id)
                    .await?
                    .ok_or_else(|| NodeError::config(format!("Script not found: {}", id)))?
                    .content
            }
            (None, None) => {
                return Err(NodeError::config(
                    "scriptNode requires 'script' or 'scriptId'",
                ))
            }
        };

        let script = ctx.resolve(&body);
        let parameters = node
            .field("parameters")
            .map(|p| ctx.resolve_value(p))
            .unwrap_or(Value::Null);

        let preferred = node.str_field("assignedAgent").or(ctx.env.default_agent);
        let agent_id = ctx.env.services.resolve_agent(preferred).await?;

        Ok(NodeOutcome::Dispatch(RemoteWork {
            agent_id,
            script,
            parameters,
        }))
    }
}

/// Record a successful agent report against the node
pub(crate) fn record_output(
    node: &Node,
    variables: &mut VariableStore,
    results: &mut Map<String, Value>,
    report: &JobReport,
) -> Result<(), NodeError> {
    let output = report.output.clone().unwrap_or_default();
    results.insert(
        node.id.clone(),
        json!({ "output": output, "exitCode": report.exit_code }),
    );
    if let Some(name) = node.str_field("outputVariable") {
        variables.set(name, coerce_value(&output))?;
    }
    Ok(())
}
