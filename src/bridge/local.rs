//! Local agents
//!
//! Runs dispatched scripts on the host through a shell and reports the outcome
//! over an async channel. Job parameters are exported as `PARAM_<NAME>`
//! environment variables:
//!
//! ```yaml
//! - id: backup
//!   type: scriptNode
//!   data:
//!     assignedAgent: local
//!     script: "pg_dump $PARAM_DATABASE > /backups/$PARAM_DATABASE.sql"
//!     parameters:
//!       database: "{{workflow.database}}"
//! ```

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{AgentRegistry, BridgeError, JobReport, JobRequest, JobTransport};
use crate::workflow::{stringify, LocalAgentConfig};

/// A set of in-process agents keyed by id
pub struct LocalAgentPool {
    agents: HashMap<String, LocalAgentConfig>,
    order: Vec<String>,
    results: async_channel::Sender<JobReport>,
    running: Arc<Mutex<HashMap<String, JoinHandle<()>>>>,
}

impl LocalAgentPool {
    /// Create the pool and the receiving end of its result channel
    pub fn new(agents: Vec<LocalAgentConfig>) -> (Self, async_channel::Receiver<JobReport>) {
        let (results, receiver) = async_channel::unbounded();
        let order = agents.iter().map(|a| a.id.clone()).collect();
        let agents = agents.into_iter().map(|a| (a.id.clone(), a)).collect();
        let pool = Self {
            agents,
            order,
            results,
            running: Arc::new(Mutex::new(HashMap::new())),
        };
        (pool, receiver)
    }

    /// Number of scripts currently running
    pub fn in_flight(&self) -> usize {
        self.running.lock().map(|r| r.len()).unwrap_or(0)
    }
}

#[async_trait]
impl JobTransport for LocalAgentPool {
    async fn dispatch(&self, request: &JobRequest) -> Result<(), BridgeError> {
        let agent = self
            .agents
            .get(&request.agent_id)
            .cloned()
            .ok_or_else(|| BridgeError::UnknownAgent(request.agent_id.clone()))?;

        if self.results.is_closed() {
            return Err(BridgeError::Disconnected);
        }

        let request = request.clone();
        let job_id = request.job_id.clone();
        let results = self.results.clone();
        let running = Arc::clone(&self.running);

        // hold the lock across spawn so the task cannot deregister before it registers
        let mut guard = running
            .lock()
            .map_err(|e| BridgeError::DispatchFailed(e.to_string()))?;
        let task_running = Arc::clone(&self.running);
        let handle = tokio::spawn(async move {
            let report = run_script(&agent, &request).await;
            if let Ok(mut running) = task_running.lock() {
                running.remove(&request.job_id);
            }
            if results.send(report).await.is_err() {
                warn!(job_id = %request.job_id, "Result channel closed, dropping report");
            }
        });
        guard.insert(job_id, handle);
        Ok(())
    }

    async fn cancel(&self, agent_id: &str, job_id: &str) -> Result<(), BridgeError> {
        let handle = self
            .running
            .lock()
            .map_err(|e| BridgeError::DispatchFailed(e.to_string()))?
            .remove(job_id);
        if let Some(handle) = handle {
            info!(agent_id, job_id, "Aborting local script");
            handle.abort();
        }
        Ok(())
    }
}

#[async_trait]
impl AgentRegistry for LocalAgentPool {
    async fn is_online(&self, agent_id: &str) -> bool {
        self.agents.contains_key(agent_id)
    }

    async fn online_agents(&self) -> Vec<String> {
        self.order.clone()
    }
}

/// Run one script to completion and describe the outcome
async fn run_script(agent: &LocalAgentConfig, request: &JobRequest) -> JobReport {
    debug!(agent_id = %agent.id, job_id = %request.job_id, "Executing script");

    let mut cmd = Command::new(&agent.shell);
    cmd.arg("-c").arg(&request.script);
    cmd.envs(&agent.env);
    cmd.envs(parameter_env(&request.parameters));
    cmd.env("AGENTFLOW_JOB_ID", &request.job_id);
    cmd.env("AGENTFLOW_EXECUTION_ID", &request.execution_id);

    if let Some(dir) = &agent.working_dir {
        cmd.current_dir(dir);
    }

    // aborting the task drops the child, which must take the process with it
    cmd.kill_on_drop(true);
    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::piped());

    let output = match cmd.output().await {
        Ok(output) => output,
        Err(e) => {
            return JobReport::failure(&request.job_id, format!("Failed to execute script: {}", e))
        }
    };

    let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
    let exit_code = output.status.code();

    if output.status.success() {
        JobReport {
            job_id: request.job_id.clone(),
            success: true,
            output: Some(stdout),
            error: None,
            exit_code,
        }
    } else {
        let error = if stderr.is_empty() {
            format!("Script exited with code {}", exit_code.unwrap_or(-1))
        } else {
            stderr
        };
        JobReport {
            job_id: request.job_id.clone(),
            success: false,
            output: Some(stdout),
            error: Some(error),
            exit_code,
        }
    }
}

/// `{"dbName": "x"}` becomes `PARAM_DBNAME=x`
fn parameter_env(parameters: &Value) -> Vec<(String, String)> {
    match parameters {
        Value::Object(map) => map
            .iter()
            .map(|(key, value)| {
                let name: String = key
                    .chars()
                    .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_uppercase() } else { '_' })
                    .collect();
                (format!("PARAM_{}", name), stringify(value))
            })
            .collect(),
        _ => Vec::new(),
    }
}
