//! HTTP node: outbound request from the engine
//!
//! ```yaml
//! - id: notify
//!   type: httpNode
//!   data:
//!     url: "https://hooks.example.com/deploy/{{workflow.service}}"
//!     method: POST
//!     headers:
//!       Authorization: "Bearer {{workflow.token}}"
//!     body:
//!       status: "{{user.result}}"
//!     outputVariable: response
//!     timeoutMs: 5000
//! ```
//!
//! The response is recorded as `{status, headers, body}`; JSON bodies are
//! parsed, anything else is kept as text. Non-2xx statuses fail the node.

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::time::{Duration, Instant};
use tracing::debug;

use super::{number_field, NodeContext, NodeExecutor};
use crate::engine::error::NodeError;
use crate::engine::result::NodeOutcome;
use crate::workflow::{stringify, Node};

pub struct HttpExecutor;

#[async_trait]
impl NodeExecutor for HttpExecutor {
    fn node_type(&self) -> &'static str {
        "httpNode"
    }

    async fn execute(
        &self,
        node: &Node,
        ctx: &mut NodeContext<'_>,
    ) -> Result<NodeOutcome, NodeError> {
        let url = node
            .str_field("url")
            .map(|u| ctx.resolve(u))
            .ok_or_else(|| NodeError::config("httpNode requires 'url'"))?;
        let method_name = node.str_field("method").unwrap_or("GET").to_uppercase();
        let method = reqwest::Method::from_bytes(method_name.as_bytes())
            .map_err(|_| NodeError::config(format!("Unsupported HTTP method: {}", method_name)))?;
        let timeout_ms = number_field(node, "timeoutMs", ctx)?
            .map(|ms| ms.max(0.0) as u64)
            .unwrap_or(ctx.env.config.http_timeout_ms);

        let mut request = ctx
            .env
            .services
            .http_client()
            .request(method, &url)
            .timeout(Duration::from_millis(timeout_ms));

        if let Some(Value::Object(headers)) = node.field("headers") {
            for (name, value) in headers {
                request = request.header(name.as_str(), ctx.resolve(&stringify(value)));
            }
        }

        match node.field("body").map(|b| ctx.resolve_value(b)) {
            Some(Value::String(text)) => request = request.body(text),
            Some(body) => request = request.json(&body),
            None => {}
        }

        ctx.log
            .info(&node.id, format!("{} {}", method_name, url));
        let start = Instant::now();

        let response = tokio::select! {
            response = request.send() => response.map_err(|e| NodeError::Http(e.to_string()))?,
            _ = ctx.env.cancel.cancelled() => return Err(NodeError::Cancelled),
        };

        let status = response.status();
        let headers: Map<String, Value> = response
            .headers()
            .iter()
            .map(|(k, v)| {
                (
                    k.to_string(),
                    Value::String(v.to_str().unwrap_or("").to_string()),
                )
            })
            .collect();
        let text = response
            .text()
            .await
            .map_err(|e| NodeError::Http(e.to_string()))?;
        let body = if text.is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&text).unwrap_or(Value::String(text))
        };
        debug!(
            node_id = %node.id,
            "{} {} -> {} ({}ms)",
            method_name,
            url,
            status.as_u16(),
            start.elapsed().as_millis()
        );

        let result = json!({ "status": status.as_u16(), "headers": headers, "body": body });
        ctx.results.insert(node.id.clone(), result.clone());

        if !status.is_success() {
            return Err(NodeError::Http(format!(
                "{} {} returned status {}",
                method_name,
                url,
                status.as_u16()
            )));
        }

        if let Some(name) = node.str_field("outputVariable") {
            ctx.variables.set(name, result)?;
        }
        ctx.log
            .info(&node.id, format!("Response status {}", status.as_u16()));
        Ok(NodeOutcome::next())
    }
}
