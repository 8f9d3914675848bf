//! Job and Script documents
//!
//! A job backs exactly one node dispatch within one execution. Script nodes
//! create jobs that an agent completes remotely; every other node type creates
//! a local job that completes synchronously.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

use super::graph::Branch;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }
}

/// One dispatched unit of work
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: String,
    pub execution_id: String,
    pub node_id: String,
    pub node_type: String,

    /// Agent running the script; `None` for local nodes
    pub agent_id: Option<String>,
    pub script: Option<String>,
    #[serde(default)]
    pub parameters: Value,

    pub status: JobStatus,
    pub output: Option<String>,
    pub error: Option<String>,

    /// Branch the node selected once terminal; drives graph re-derivation
    pub branch: Option<Branch>,

    /// Foreach iteration index for loop-body dispatches
    pub iteration: Option<usize>,

    /// When a waiting node's timer fires
    #[serde(default)]
    pub resume_at: Option<DateTime<Utc>>,

    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Job {
    /// A job for a node that runs inside the engine
    pub fn local(execution_id: &str, node_id: &str, node_type: &str) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            execution_id: execution_id.to_string(),
            node_id: node_id.to_string(),
            node_type: node_type.to_string(),
            agent_id: None,
            script: None,
            parameters: Value::Null,
            status: JobStatus::Running,
            output: None,
            error: None,
            branch: None,
            iteration: None,
            resume_at: None,
            created_at: now,
            started_at: Some(now),
            completed_at: None,
        }
    }

    /// A queued job for a remote agent
    pub fn remote(
        execution_id: &str,
        node_id: &str,
        node_type: &str,
        agent_id: &str,
        script: &str,
        parameters: Value,
    ) -> Self {
        Self {
            agent_id: Some(agent_id.to_string()),
            script: Some(script.to_string()),
            parameters,
            status: JobStatus::Queued,
            started_at: None,
            ..Self::local(execution_id, node_id, node_type)
        }
    }

    pub fn with_iteration(mut self, iteration: Option<usize>) -> Self {
        self.iteration = iteration;
        self
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn is_remote(&self) -> bool {
        self.agent_id.is_some()
    }

    pub fn mark_running(&mut self) {
        self.status = JobStatus::Running;
        self.started_at = Some(Utc::now());
    }

    /// Complete successfully, recording the branch taken
    pub fn complete(&mut self, branch: Branch, output: Option<String>) {
        self.status = JobStatus::Completed;
        self.branch = Some(branch);
        if output.is_some() {
            self.output = output;
        }
        self.completed_at = Some(Utc::now());
    }

    /// Fail. `branch` is set when the graph walk continues past this node.
    pub fn fail(&mut self, error: &str, branch: Option<Branch>) {
        self.status = JobStatus::Failed;
        self.error = Some(error.to_string());
        self.branch = branch;
        self.completed_at = Some(Utc::now());
    }

    pub fn cancel(&mut self) {
        self.status = JobStatus::Cancelled;
        self.completed_at = Some(Utc::now());
    }

    /// Record the deadline of a timer started now
    pub fn resume_after(&mut self, duration: Duration) {
        self.resume_at = chrono::Duration::from_std(duration)
            .ok()
            .and_then(|delta| Utc::now().checked_add_signed(delta));
    }

    /// Time left on the timer; zero once the deadline has passed
    pub fn remaining_wait(&self) -> Option<Duration> {
        self.resume_at
            .map(|at| (at - Utc::now()).to_std().unwrap_or_default())
    }
}

/// A stored script that script nodes can reference by id
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Script {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    pub content: String,
}
