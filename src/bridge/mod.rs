//! Bridges to script agents
//!
//! The engine never talks to agents directly. It hands [`JobRequest`]s to a
//! [`JobTransport`] and receives [`JobReport`]s back through
//! `Engine::on_job_result`, exactly once per job. An [`AgentRegistry`] answers
//! which agents are online when a script node names no agent.
//!
//! - `local` - In-process agents that run scripts through a shell

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub mod local;

pub use local::LocalAgentPool;

/// Common error type for bridge operations
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("Unknown agent: {0}")]
    UnknownAgent(String),

    #[error("Agent offline: {0}")]
    AgentOffline(String),

    #[error("Dispatch failed: {0}")]
    DispatchFailed(String),

    #[error("Result channel closed")]
    Disconnected,

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// A script dispatched to an agent
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobRequest {
    pub job_id: String,
    pub execution_id: String,
    pub node_id: String,
    pub agent_id: String,
    pub script: String,
    #[serde(default)]
    pub parameters: Value,
}

/// An agent's verdict on one job
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobReport {
    pub job_id: String,
    pub success: bool,
    pub output: Option<String>,
    pub error: Option<String>,
    pub exit_code: Option<i32>,
}

impl JobReport {
    pub fn success(job_id: &str, output: impl Into<String>) -> Self {
        Self {
            job_id: job_id.to_string(),
            success: true,
            output: Some(output.into()),
            error: None,
            exit_code: Some(0),
        }
    }

    pub fn failure(job_id: &str, error: impl Into<String>) -> Self {
        Self {
            job_id: job_id.to_string(),
            success: false,
            output: None,
            error: Some(error.into()),
            exit_code: None,
        }
    }
}

/// Carries jobs to agents
#[async_trait]
pub trait JobTransport: Send + Sync {
    /// Fire-and-forget delivery; the result arrives later as a [`JobReport`]
    async fn dispatch(&self, request: &JobRequest) -> Result<(), BridgeError>;

    /// Best-effort cancellation signal for an in-flight job
    async fn cancel(&self, agent_id: &str, job_id: &str) -> Result<(), BridgeError>;
}

/// Resolves which agents can take work
#[async_trait]
pub trait AgentRegistry: Send + Sync {
    async fn is_online(&self, agent_id: &str) -> bool;

    /// Online agents in preference order
    async fn online_agents(&self) -> Vec<String>;
}
