#![allow(dead_code)]

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use agentflow::prelude::*;
use agentflow::workflow::{Edge, Node};
use agentflow::{BridgeError, JobRequest};
use async_trait::async_trait;
use serde_json::{json, Value};
use tempfile::TempDir;

pub fn create_test_dir() -> TempDir {
    tempfile::tempdir().expect("Failed to create temp directory")
}

pub fn write_workflow(dir: &Path, filename: &str, content: &str) {
    fs::write(dir.join(filename), content).expect("Failed to write workflow file");
}

pub fn simple_workflow(id: &str) -> String {
    format!(
        r#"
id: {}
nodes:
  - id: greet
    type: variableNode
    data:
      variableName: greeting
      value: hello
"#,
        id
    )
}

// ============================================================================
// Agents
// ============================================================================

type Responder = Box<dyn Fn(&JobRequest) -> JobReport + Send + Sync>;

/// Transport that records every request. In answering mode it also replies
/// through a result channel, like a real agent would.
pub struct RecordingTransport {
    requests: Mutex<Vec<JobRequest>>,
    cancelled: Mutex<Vec<String>>,
    responder: Option<(Responder, async_channel::Sender<JobReport>)>,
}

impl RecordingTransport {
    /// Reports are delivered by the test through `Engine::on_job_result`
    pub fn manual() -> Arc<Self> {
        Arc::new(Self {
            requests: Mutex::new(Vec::new()),
            cancelled: Mutex::new(Vec::new()),
            responder: None,
        })
    }

    pub fn answering<F>(respond: F) -> (Arc<Self>, async_channel::Receiver<JobReport>)
    where
        F: Fn(&JobRequest) -> JobReport + Send + Sync + 'static,
    {
        let (sender, receiver) = async_channel::unbounded();
        let transport = Arc::new(Self {
            requests: Mutex::new(Vec::new()),
            cancelled: Mutex::new(Vec::new()),
            responder: Some((Box::new(respond), sender)),
        });
        (transport, receiver)
    }

    pub fn requests(&self) -> Vec<JobRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// Node ids in dispatch order
    pub fn dispatched_nodes(&self) -> Vec<String> {
        self.requests().into_iter().map(|r| r.node_id).collect()
    }

    /// The most recent request for a node
    pub fn request_for(&self, node_id: &str) -> JobRequest {
        self.requests()
            .into_iter()
            .rev()
            .find(|r| r.node_id == node_id)
            .unwrap_or_else(|| panic!("no request for node {}", node_id))
    }

    pub fn cancelled(&self) -> Vec<String> {
        self.cancelled.lock().unwrap().clone()
    }
}

#[async_trait]
impl JobTransport for RecordingTransport {
    async fn dispatch(&self, request: &JobRequest) -> Result<(), BridgeError> {
        self.requests.lock().unwrap().push(request.clone());
        if let Some((respond, results)) = &self.responder {
            results
                .send(respond(request))
                .await
                .map_err(|_| BridgeError::Disconnected)?;
        }
        Ok(())
    }

    async fn cancel(&self, _agent_id: &str, job_id: &str) -> Result<(), BridgeError> {
        self.cancelled.lock().unwrap().push(job_id.to_string());
        Ok(())
    }
}

#[async_trait]
impl AgentRegistry for RecordingTransport {
    async fn is_online(&self, agent_id: &str) -> bool {
        matches!(agent_id, "agent-1" | "builder")
    }

    async fn online_agents(&self) -> Vec<String> {
        vec!["agent-1".to_string()]
    }
}

// ============================================================================
// Workflows
// ============================================================================

pub fn workflow(id: &str, nodes: Vec<Node>, edges: Vec<Edge>) -> Workflow {
    Workflow {
        id: id.to_string(),
        name: None,
        variables: HashMap::new(),
        nodes,
        edges,
    }
}

pub fn script(id: &str, body: &str) -> Node {
    Node::new(id, "scriptNode", json!({ "script": body }))
}

pub fn set_var(id: &str, name: &str, value: Value) -> Node {
    Node::new(id, "variableNode", json!({ "variableName": name, "value": value }))
}

pub fn edge(source: &str, target: &str) -> Edge {
    Edge::new(&format!("{}-{}", source, target), source, target)
}

pub fn branch(source: &str, target: &str, handle: &str) -> Edge {
    Edge::new(&format!("{}-{}-{}", source, handle, target), source, target).with_handle(handle)
}

// ============================================================================
// Engines
// ============================================================================

pub struct TestEngine {
    pub engine: Engine,
    pub store: Arc<MemoryStore>,
    pub transport: Arc<RecordingTransport>,
}

impl TestEngine {
    /// Save the workflow and build an engine whose agents are answered by hand
    pub async fn manual(workflow: &Workflow) -> Self {
        Self::with_transport(workflow, RecordingTransport::manual()).await
    }

    pub async fn with_transport(workflow: &Workflow, transport: Arc<RecordingTransport>) -> Self {
        let store = Arc::new(MemoryStore::new());
        store.save_workflow(workflow).await.unwrap();
        let engine = Engine::new(
            store.clone(),
            transport.clone(),
            transport.clone(),
            EngineConfig::default(),
        );
        Self {
            engine,
            store,
            transport,
        }
    }

    /// An engine whose agent answers every request with `respond`
    pub async fn answering<F>(workflow: &Workflow, respond: F) -> Self
    where
        F: Fn(&JobRequest) -> JobReport + Send + Sync + 'static,
    {
        let (transport, results) = RecordingTransport::answering(respond);
        let test = Self::with_transport(workflow, transport).await;
        let pump = test.engine.clone();
        tokio::spawn(async move { pump.pump_results(results).await });
        test
    }

    pub async fn start(&self, workflow_id: &str, vars: Value) -> Execution {
        let initial = match vars {
            Value::Object(map) => map.into_iter().collect(),
            _ => HashMap::new(),
        };
        self.engine
            .start_execution(workflow_id, "tester", None, initial)
            .await
            .unwrap()
    }

    /// Report success for the latest job of `node_id`
    pub async fn succeed(&self, node_id: &str, output: &str) {
        let request = self.transport.request_for(node_id);
        self.engine
            .on_job_result(JobReport::success(&request.job_id, output))
            .await
            .unwrap();
    }

    /// Report failure for the latest job of `node_id`
    pub async fn fail(&self, node_id: &str, error: &str) {
        let request = self.transport.request_for(node_id);
        self.engine
            .on_job_result(JobReport::failure(&request.job_id, error))
            .await
            .unwrap();
    }

    pub async fn execution(&self, id: &str) -> Execution {
        self.engine.get_execution(id).await.unwrap()
    }

    /// Node ids that have a top-level job, in creation order
    pub async fn job_nodes(&self, execution_id: &str) -> Vec<String> {
        self.store
            .jobs_for_execution(execution_id)
            .await
            .unwrap()
            .into_iter()
            .filter(|j| j.iteration.is_none())
            .map(|j| j.node_id)
            .collect()
    }
}

/// A fresh single-threaded runtime. Dropping it kills every task it spawned,
/// which is how the tests simulate an engine process going away.
pub fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("Failed to build runtime")
}

pub fn paused_runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .start_paused(true)
        .build()
        .expect("Failed to build runtime")
}

/// Poll until `condition` holds, for work finishing on spawned tasks
pub async fn wait_until<F: Fn() -> bool>(condition: F) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

/// Position of the first log message equal to `message`
pub fn log_position(execution: &Execution, message: &str) -> usize {
    execution
        .logs
        .messages()
        .iter()
        .position(|m| *m == message)
        .unwrap_or_else(|| panic!("log message not found: {}", message))
}
