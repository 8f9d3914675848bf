//! Engine error types

use crate::bridge::BridgeError;
use crate::engine::scheduler::GraphError;
use crate::store::StoreError;
use crate::workflow::{ExpressionError, VariableError};

/// Errors returned to callers of the engine API
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("Workflow not found: {0}")]
    WorkflowNotFound(String),

    #[error("Execution not found: {0}")]
    ExecutionNotFound(String),

    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Bridge error: {0}")]
    Bridge(#[from] BridgeError),

    #[error("Graph error: {0}")]
    Graph(#[from] GraphError),

    #[error("Timed out waiting for execution {0}")]
    Timeout(String),
}

/// Why a single node failed.
///
/// Node failures are contained: they fail the execution only when the node
/// has neither an `error` edge nor `continueOnError`.
#[derive(Debug, thiserror::Error)]
pub enum NodeError {
    /// Missing or malformed node configuration
    #[error("{0}")]
    Config(String),

    /// Input of the wrong kind for the operation
    #[error("{0}")]
    Type(String),

    /// Agent reported failure or the transport gave up
    #[error("{0}")]
    Remote(String),

    #[error("Condition error: {0}")]
    Condition(#[from] ExpressionError),

    #[error("Variable error: {0}")]
    Variable(#[from] VariableError),

    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("Dispatch failed: {0}")]
    Dispatch(#[from] BridgeError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Execution cancelled")]
    Cancelled,
}

impl NodeError {
    pub fn config(message: impl Into<String>) -> Self {
        NodeError::Config(message.into())
    }

    pub fn type_error(message: impl Into<String>) -> Self {
        NodeError::Type(message.into())
    }
}
