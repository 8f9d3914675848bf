//! Node executors by type
//!
//! Each submodule implements [`NodeExecutor`] for one node type tag:
//! - `script` - `scriptNode`, dispatched to an agent
//! - `condition` - `conditionNode`, routes `true`/`false`
//! - `wait` - `waitNode`, timed pause
//! - `variable` - `variableNode`, set/increment/decrement/append/delete
//! - `string` - `stringNode`, string operations
//! - `foreach` - `foreachNode`, runs its `forEach` targets per item
//! - `http` - `httpNode`, outbound HTTP request
//! - `passthrough` - fallback for unknown types
//!
//! Executors never touch the document store or transport directly. Anything
//! beyond the variable store, results map, and log goes through
//! [`NodeServices`].

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::engine::error::NodeError;
use crate::engine::result::NodeOutcome;
use crate::workflow::expressions::{resolve_placeholders, resolve_value};
use crate::workflow::{Branch, EngineConfig, ExecutionLog, Node, Script, VariableStore, Workflow};

pub mod condition;
pub mod foreach;
pub mod http;
pub mod passthrough;
pub mod script;
pub mod string;
pub mod variable;
pub mod wait;

pub use condition::ConditionExecutor;
pub use foreach::ForeachExecutor;
pub use http::HttpExecutor;
pub use passthrough::PassThroughExecutor;
pub use script::ScriptExecutor;
pub use string::StringExecutor;
pub use variable::VariableExecutor;
pub use wait::WaitExecutor;

/// Handler for one node type
#[async_trait]
pub trait NodeExecutor: Send + Sync {
    /// Type tag this executor handles (e.g. `scriptNode`)
    fn node_type(&self) -> &'static str;

    /// Whether a run may pause for an agent or a timer
    fn suspends(&self) -> bool {
        false
    }

    async fn execute(
        &self,
        node: &Node,
        ctx: &mut NodeContext<'_>,
    ) -> Result<NodeOutcome, NodeError>;
}

/// Engine capabilities available to executors
#[async_trait]
pub trait NodeServices: Send + Sync {
    async fn load_script(&self, id: &str) -> Result<Option<Script>, NodeError>;

    /// Pick an agent: the preferred one if it is online, else the first online agent
    async fn resolve_agent(&self, preferred: Option<&str>) -> Result<String, NodeError>;

    fn http_client(&self) -> &reqwest::Client;

    /// Run a node to completion in place, including any remote round-trip.
    /// Used for foreach bodies; the node's job carries `ctx.iteration`.
    async fn run_inline(&self, node: &Node, ctx: &mut NodeContext<'_>) -> Result<Branch, NodeError>;
}

/// Read-only surroundings of a node run
#[derive(Clone, Copy)]
pub struct NodeEnv<'a> {
    pub execution_id: &'a str,
    /// The execution's default agent
    pub default_agent: Option<&'a str>,
    pub workflow: &'a Workflow,
    pub config: &'a EngineConfig,
    pub services: &'a dyn NodeServices,
    pub cancel: &'a CancellationToken,
}

/// Mutable execution state handed to one node run
pub struct NodeContext<'a> {
    pub env: NodeEnv<'a>,
    pub variables: &'a mut VariableStore,
    pub results: &'a mut Map<String, Value>,
    pub log: &'a mut ExecutionLog,
    /// Foreach iteration this run belongs to, if any
    pub iteration: Option<usize>,
}

impl<'a> NodeContext<'a> {
    pub fn new(
        env: NodeEnv<'a>,
        variables: &'a mut VariableStore,
        results: &'a mut Map<String, Value>,
        log: &'a mut ExecutionLog,
    ) -> Self {
        Self {
            env,
            variables,
            results,
            log,
            iteration: None,
        }
    }

    /// Reborrow for a nested run in the given iteration
    pub fn for_iteration(&mut self, index: usize) -> NodeContext<'_> {
        NodeContext {
            env: self.env,
            variables: &mut *self.variables,
            results: &mut *self.results,
            log: &mut *self.log,
            iteration: Some(index),
        }
    }

    /// Substitute `{{path}}` placeholders from the current variables
    pub fn resolve(&self, text: &str) -> String {
        resolve_placeholders(text, &*self.variables)
    }

    pub fn resolve_value(&self, value: &Value) -> Value {
        resolve_value(value, &*self.variables)
    }
}

/// Maps node type tags to executors
#[derive(Clone)]
pub struct NodeRegistry {
    executors: HashMap<String, Arc<dyn NodeExecutor>>,
    fallback: Arc<dyn NodeExecutor>,
}

impl Default for NodeRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

impl NodeRegistry {
    /// A registry where every type passes through
    pub fn empty() -> Self {
        Self {
            executors: HashMap::new(),
            fallback: Arc::new(PassThroughExecutor),
        }
    }

    pub fn with_builtins() -> Self {
        let mut registry = Self::empty();
        registry.register(Arc::new(ScriptExecutor));
        registry.register(Arc::new(ConditionExecutor));
        registry.register(Arc::new(WaitExecutor));
        registry.register(Arc::new(VariableExecutor));
        registry.register(Arc::new(StringExecutor));
        registry.register(Arc::new(ForeachExecutor));
        registry.register(Arc::new(HttpExecutor));
        registry
    }

    /// Add or replace the executor for its type tag
    pub fn register(&mut self, executor: Arc<dyn NodeExecutor>) {
        self.executors
            .insert(executor.node_type().to_string(), executor);
    }

    /// Executor for a type tag, falling back to pass-through
    pub fn get(&self, node_type: &str) -> Arc<dyn NodeExecutor> {
        self.executors
            .get(node_type)
            .cloned()
            .unwrap_or_else(|| Arc::clone(&self.fallback))
    }

    pub fn is_registered(&self, node_type: &str) -> bool {
        self.executors.contains_key(node_type)
    }
}

/// Read an integer-ish field: a number or a numeric string after placeholders
pub(crate) fn number_field(node: &Node, key: &str, ctx: &NodeContext<'_>) -> Result<Option<f64>, NodeError> {
    match node.field(key) {
        None => Ok(None),
        Some(Value::Number(n)) => Ok(n.as_f64()),
        Some(Value::String(s)) => {
            let resolved = ctx.resolve(s);
            resolved
                .trim()
                .parse::<f64>()
                .map(Some)
                .map_err(|_| NodeError::config(format!("'{}' must be a number, got '{}'", key, resolved)))
        }
        Some(other) => Err(NodeError::config(format!(
            "'{}' must be a number, got {}",
            key, other
        ))),
    }
}
