//! Workflow types and runtime documents
//!
//! This module contains the data the engine operates on:
//! - `graph` - Workflow, Node, Edge, and Branch routing
//! - `execution` - Execution documents, status, and logs
//! - `job` - Job and Script documents
//! - `variables` - The three-tier variable store
//! - `expressions` - `{{ }}` placeholders and condition evaluation
//! - `loader` - Load workflows from files and directories
//! - `engine_config` - Engine configuration loaded from YAML

pub mod engine_config;
pub mod execution;
pub mod expressions;
pub mod graph;
pub mod job;
pub mod loader;
pub mod variables;

pub use engine_config::{EngineConfig, LocalAgentConfig};
pub use execution::{
    Execution, ExecutionFailure, ExecutionLog, ExecutionStatus, LogEntry, LogLevel,
};
pub use expressions::{
    evaluate_condition, resolve_placeholders, resolve_value, try_evaluate_condition,
    ExpressionError,
};
pub use graph::{handles, Branch, Edge, Node, Workflow};
pub use job::{Job, JobStatus, Script};
pub use loader::{LoadError, WorkflowLoader};
pub use variables::{coerce_value, stringify, VariableError, VariableStore};
