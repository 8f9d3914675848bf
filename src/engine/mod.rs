//! Workflow execution engine module
//!
//! This module contains:
//! - `coordinator` - The [`Engine`]: starts, steps, and cancels executions
//! - `scheduler` - Graph validation and ready-node selection
//! - `nodes` - Executors for each node type
//! - `error` - Engine and node error types
//! - `result` - Node outcomes

pub mod coordinator;
pub mod error;
pub mod nodes;
pub mod result;
pub mod scheduler;

pub use coordinator::Engine;
pub use error::{EngineError, NodeError};
pub use nodes::{NodeContext, NodeEnv, NodeExecutor, NodeRegistry, NodeServices};
pub use result::{NodeOutcome, RemoteWork};
pub use scheduler::{find_start_nodes, GraphError, Progress, WorkflowGraph};
