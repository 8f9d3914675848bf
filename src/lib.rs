//! # agentflow
//!
//! A workflow execution engine that walks graphs of typed nodes and dispatches
//! script jobs to remote agents.
//!
//! ## Features
//!
//! - **Declarative YAML/JSON workflows** - Nodes and edges, with branch handles
//! - **Asynchronous agents** - Script results arrive later, in any order
//! - **Three-tier variables** - `system`, `workflow`, and `user` namespaces with `{{ }}` placeholders
//! - **Control flow** - Conditions, foreach loops, waits, error edges
//!
//! ## Node types
//!
//! - **scriptNode**: Dispatch a script to an agent
//! - **conditionNode**: Route `true` / `false`
//! - **waitNode**: Pause for a number of seconds
//! - **variableNode**: Set, increment, append, or delete a variable
//! - **stringNode**: String operations
//! - **foreachNode**: Run the `forEach` body once per item
//! - **httpNode**: Outbound HTTP request
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::collections::HashMap;
//! use std::sync::Arc;
//! use agentflow::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let workflow: Workflow = serde_yaml::from_str(r#"
//! id: hello
//! nodes:
//!   - id: greet
//!     type: scriptNode
//!     data:
//!       script: "echo hello"
//!       outputVariable: greeting
//! "#)?;
//!
//!     let store = Arc::new(MemoryStore::new());
//!     store.save_workflow(&workflow).await?;
//!
//!     let (pool, results) = LocalAgentPool::new(vec![LocalAgentConfig::new("local")]);
//!     let pool = Arc::new(pool);
//!     let engine = Engine::new(store, pool.clone(), pool, EngineConfig::default());
//!
//!     let pump = engine.clone();
//!     tokio::spawn(async move { pump.pump_results(results).await });
//!
//!     let execution = engine
//!         .start_execution("hello", "me", None, HashMap::new())
//!         .await?;
//!     let execution = engine.wait_for(&execution.id).await?;
//!     println!("{:?}: {:?}", execution.status, execution.variables.get("greeting"));
//!     Ok(())
//! }
//! ```

pub mod bridge;
pub mod engine;
pub mod store;
pub mod workflow;

// Re-export main types
pub use bridge::{AgentRegistry, BridgeError, JobReport, JobRequest, JobTransport, LocalAgentPool};
pub use engine::{
    Engine, EngineError, GraphError, NodeContext, NodeError, NodeExecutor, NodeOutcome,
    NodeRegistry, WorkflowGraph,
};
pub use store::{DocumentStore, MemoryStore, StoreError};
pub use workflow::{
    Branch, Edge, EngineConfig, Execution, ExecutionStatus, Job, JobStatus, LoadError,
    LocalAgentConfig, Node, Script, VariableStore, Workflow, WorkflowLoader,
};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::bridge::{AgentRegistry, JobReport, JobTransport, LocalAgentPool};
    pub use crate::engine::{Engine, EngineError, NodeExecutor, NodeRegistry};
    pub use crate::store::{DocumentStore, MemoryStore};
    pub use crate::workflow::{
        EngineConfig, Execution, ExecutionStatus, LocalAgentConfig, Workflow, WorkflowLoader,
    };
}
