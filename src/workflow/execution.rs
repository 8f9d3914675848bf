//! Execution documents: one per run of a workflow
//!
//! An execution owns the run's variable store, its chronological log, the
//! per-node results map, and the first fatal error.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use tracing::{debug, error, info, warn};

use super::variables::VariableStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl ExecutionStatus {
    /// Terminal states are sinks
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ExecutionStatus::Completed | ExecutionStatus::Failed | ExecutionStatus::Cancelled
        )
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ExecutionStatus::Pending => "pending",
            ExecutionStatus::Running => "running",
            ExecutionStatus::Completed => "completed",
            ExecutionStatus::Failed => "failed",
            ExecutionStatus::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

/// One execution log line
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    pub node_id: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub message: String,
    pub level: LogLevel,
}

/// Append-only execution log.
///
/// Every entry is mirrored to `tracing` at the same level.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExecutionLog {
    entries: Vec<LogEntry>,
}

impl ExecutionLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, level: LogLevel, node_id: Option<&str>, message: impl Into<String>) {
        let message = message.into();
        let node = node_id.unwrap_or("-");
        match level {
            LogLevel::Debug => debug!(node_id = %node, "{}", message),
            LogLevel::Info => info!(node_id = %node, "{}", message),
            LogLevel::Warn => warn!(node_id = %node, "{}", message),
            LogLevel::Error => error!(node_id = %node, "{}", message),
        }

        // keep timestamps monotonic even if the wall clock steps backwards
        let now = Utc::now();
        let timestamp = match self.entries.last() {
            Some(last) if last.timestamp > now => last.timestamp,
            _ => now,
        };
        self.entries.push(LogEntry {
            node_id: node_id.map(str::to_string),
            timestamp,
            message,
            level,
        });
    }

    pub fn info(&mut self, node_id: &str, message: impl Into<String>) {
        self.push(LogLevel::Info, Some(node_id), message);
    }

    pub fn warn(&mut self, node_id: &str, message: impl Into<String>) {
        self.push(LogLevel::Warn, Some(node_id), message);
    }

    pub fn error(&mut self, node_id: &str, message: impl Into<String>) {
        self.push(LogLevel::Error, Some(node_id), message);
    }

    /// Append entries buffered elsewhere, keeping the log chronological
    pub fn extend(&mut self, mut other: ExecutionLog) {
        other.entries.sort_by_key(|e| e.timestamp);
        if let Some(floor) = self.entries.last().map(|e| e.timestamp) {
            for entry in &mut other.entries {
                if entry.timestamp < floor {
                    entry.timestamp = floor;
                }
            }
        }
        self.entries.append(&mut other.entries);
    }

    pub fn entries(&self) -> &[LogEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Messages only, in order
    pub fn messages(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.message.as_str()).collect()
    }
}

/// The first fatal failure of an execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionFailure {
    pub message: String,
    pub node_id: Option<String>,
}

/// One run of a workflow
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Execution {
    pub id: String,
    pub workflow_id: String,
    pub user_id: String,

    /// Default agent for script nodes without `assignedAgent`
    pub agent_id: Option<String>,

    pub status: ExecutionStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,

    pub logs: ExecutionLog,
    pub variables: VariableStore,

    /// Per-node results (condition outcomes, script output, HTTP responses)
    #[serde(default)]
    pub results: Map<String, Value>,

    pub error: Option<ExecutionFailure>,

    /// Optimistic-concurrency version, bumped by the store on every save
    #[serde(default)]
    pub version: u64,
}

impl Execution {
    pub fn new(workflow_id: &str, user_id: &str, agent_id: Option<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            workflow_id: workflow_id.to_string(),
            user_id: user_id.to_string(),
            agent_id,
            status: ExecutionStatus::Pending,
            started_at: Utc::now(),
            completed_at: None,
            logs: ExecutionLog::new(),
            variables: VariableStore::new(),
            results: Map::new(),
            error: None,
            version: 0,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Move to a terminal status. Returns false if already terminal.
    pub fn finish(&mut self, status: ExecutionStatus) -> bool {
        if self.is_terminal() {
            return false;
        }
        self.status = status;
        self.completed_at = Some(Utc::now());
        true
    }

    /// Fail the execution, recording only the first fatal error
    pub fn fail(&mut self, message: impl Into<String>, node_id: Option<&str>) -> bool {
        if !self.finish(ExecutionStatus::Failed) {
            return false;
        }
        if self.error.is_none() {
            self.error = Some(ExecutionFailure {
                message: message.into(),
                node_id: node_id.map(str::to_string),
            });
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_execution_is_pending() {
        let execution = Execution::new("wf", "alice", None);
        assert!(!execution.id.is_empty());
        assert_eq!(execution.status, ExecutionStatus::Pending);
        assert!(!execution.is_terminal());
    }

    #[test]
    fn test_terminal_states_are_sinks() {
        let mut execution = Execution::new("wf", "alice", None);
        execution.status = ExecutionStatus::Running;

        assert!(execution.fail("boom", Some("a")));
        assert!(!execution.finish(ExecutionStatus::Completed));
        assert!(!execution.fail("second", Some("b")));

        assert_eq!(execution.status, ExecutionStatus::Failed);
        let error = execution.error.unwrap();
        assert_eq!(error.message, "boom");
        assert_eq!(error.node_id.as_deref(), Some("a"));
    }

    #[test]
    fn test_log_extend_stays_chronological() {
        let mut log = ExecutionLog::new();
        let mut buffered = ExecutionLog::new();
        buffered.info("b", "buffered first");
        log.info("a", "direct");
        log.extend(buffered);

        assert_eq!(log.messages(), vec!["direct", "buffered first"]);
        let entries = log.entries();
        assert!(entries[0].timestamp <= entries[1].timestamp);
    }

    #[test]
    fn test_status_serialization() {
        let json = serde_json::to_string(&ExecutionStatus::Cancelled).unwrap();
        assert_eq!(json, "\"cancelled\"");
        assert_eq!(ExecutionStatus::Running.to_string(), "running");
    }
}
