//! Execution coordinator - runs workflows and reacts to job results
//!
//! The [`Engine`] owns every live execution. Each step of an execution runs
//! under that execution's lock:
//! 1. Skip nodes on branches that were not taken
//! 2. Ask the scheduler for ready nodes and run their executors
//! 3. Dispatch remote work, start timers, or route the selected branch
//! 4. Complete the execution once nothing is ready and nothing is in flight
//!
//! A foreach whose body can wait on an agent or a timer runs in its own task
//! on a copy of the variables. It takes the lock again only to merge what it
//! changed and route its branch, so other paths keep moving meanwhile.
//!
//! Agent results re-enter through [`Engine::on_job_result`], in any order.
//! Progress is always re-derived from recorded branches, never from an
//! expected sequence, so repeated or reordered calls are harmless.

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, oneshot, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::bridge::{AgentRegistry, BridgeError, JobReport, JobRequest, JobTransport};
use crate::engine::error::{EngineError, NodeError};
use crate::engine::nodes::script::record_output;
use crate::engine::nodes::{NodeContext, NodeEnv, NodeRegistry, NodeServices};
use crate::engine::result::{NodeOutcome, RemoteWork};
use crate::engine::scheduler::{Progress, WorkflowGraph};
use crate::store::DocumentStore;
use crate::workflow::{
    handles, Branch, EngineConfig, Execution, ExecutionLog, ExecutionStatus, Job, LogLevel, Node,
    Script, VariableStore, Workflow,
};

/// The workflow execution engine
#[derive(Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

struct EngineInner {
    store: Arc<dyn DocumentStore>,
    transport: Arc<dyn JobTransport>,
    agents: Arc<dyn AgentRegistry>,
    registry: NodeRegistry,
    config: EngineConfig,
    http: reqwest::Client,

    /// Live executions by id
    runs: Mutex<HashMap<String, Arc<Run>>>,

    /// Foreach body jobs awaiting their report, by job id
    waiters: Mutex<HashMap<String, oneshot::Sender<JobReport>>>,

    /// Terminal transitions, for [`Engine::wait_for`]
    finished: broadcast::Sender<(String, ExecutionStatus)>,
}

/// One live execution
struct Run {
    cancel: CancellationToken,
    state: Mutex<RunState>,
}

struct RunState {
    workflow: Arc<Workflow>,
    graph: WorkflowGraph,
    execution: Execution,
    progress: Progress,
}

impl RunState {
    /// Nodes dispatched whose branch is not yet known
    fn in_flight(&self) -> usize {
        self.progress
            .dispatched
            .iter()
            .filter(|id| !self.progress.completed.contains(*id))
            .count()
    }
}

/// What a detached loop produced, waiting to be merged
struct LoopResult {
    job_id: String,
    base: VariableStore,
    variables: VariableStore,
    results: Map<String, Value>,
    log: ExecutionLog,
    outcome: Result<NodeOutcome, NodeError>,
}

enum Loaded {
    Live(Arc<Run>),
    Finished(Execution),
}

impl Engine {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        transport: Arc<dyn JobTransport>,
        agents: Arc<dyn AgentRegistry>,
        config: EngineConfig,
    ) -> Self {
        Self::with_registry(store, transport, agents, config, NodeRegistry::with_builtins())
    }

    /// Create an engine with a custom set of node executors
    pub fn with_registry(
        store: Arc<dyn DocumentStore>,
        transport: Arc<dyn JobTransport>,
        agents: Arc<dyn AgentRegistry>,
        config: EngineConfig,
        registry: NodeRegistry,
    ) -> Self {
        let (finished, _) = broadcast::channel(64);
        Self {
            inner: Arc::new(EngineInner {
                store,
                transport,
                agents,
                registry,
                config,
                http: reqwest::Client::new(),
                runs: Mutex::new(HashMap::new()),
                waiters: Mutex::new(HashMap::new()),
                finished,
            }),
        }
    }

    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.inner.store
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    /// Start a new execution of a stored workflow.
    ///
    /// An invalid graph yields an execution that is already `failed`.
    #[instrument(skip(self, agent_id, initial_variables))]
    pub async fn start_execution(
        &self,
        workflow_id: &str,
        user_id: &str,
        agent_id: Option<String>,
        initial_variables: HashMap<String, Value>,
    ) -> Result<Execution, EngineError> {
        let workflow = self
            .inner
            .store
            .get_workflow(workflow_id)
            .await?
            .ok_or_else(|| EngineError::WorkflowNotFound(workflow_id.to_string()))?;

        let mut execution = Execution::new(workflow_id, user_id, agent_id);
        execution.variables = VariableStore::seeded(&workflow.variables, &initial_variables);
        execution
            .variables
            .set_system("executionId", json!(execution.id));
        execution
            .variables
            .set_system("workflowId", json!(workflow.id));
        execution
            .variables
            .set_system("startTime", json!(execution.started_at.to_rfc3339()));
        execution
            .variables
            .set_system("environment", json!(self.inner.config.environment));
        execution.version = self.inner.store.save_execution(&execution).await?;

        info!(
            execution_id = %execution.id,
            "Starting workflow: {}",
            workflow.display_name()
        );

        let graph = match WorkflowGraph::build(&workflow) {
            Ok(graph) => graph,
            Err(e) => {
                execution.logs.push(
                    LogLevel::Error,
                    e.node_id(),
                    format!("Invalid workflow graph: {}", e),
                );
                execution.fail(e.to_string(), e.node_id());
                self.persist(&mut execution).await?;
                return Ok(execution);
            }
        };

        execution.status = ExecutionStatus::Running;
        execution.logs.push(
            LogLevel::Info,
            None,
            format!("Execution started for workflow {}", workflow.display_name()),
        );

        let run = Arc::new(Run {
            cancel: CancellationToken::new(),
            state: Mutex::new(RunState {
                workflow: Arc::new(workflow),
                graph,
                execution,
                progress: Progress::default(),
            }),
        });

        let mut guard = run.state.lock().await;
        let execution_id = guard.execution.id.clone();
        self.inner
            .runs
            .lock()
            .await
            .insert(execution_id, Arc::clone(&run));

        self.advance(&run, &mut guard, true).await?;
        Ok(guard.execution.clone())
    }

    /// Dispatch whatever became ready. Safe to call at any time; a call
    /// with nothing new to do changes nothing.
    #[instrument(skip(self))]
    pub async fn continue_execution(&self, execution_id: &str) -> Result<Execution, EngineError> {
        let run = match self.load(execution_id).await? {
            Loaded::Live(run) => run,
            Loaded::Finished(execution) => return Ok(execution),
        };
        let mut guard = run.state.lock().await;
        self.advance(&run, &mut guard, false).await?;
        Ok(guard.execution.clone())
    }

    /// Apply an agent's report for one job, then continue the execution
    #[instrument(skip(self, report), fields(job_id = %report.job_id, success = report.success))]
    pub async fn on_job_result(&self, report: JobReport) -> Result<(), EngineError> {
        let waiter = self.inner.waiters.lock().await.remove(&report.job_id);
        if let Some(waiter) = waiter {
            if waiter.send(report).is_err() {
                debug!("Foreach iteration stopped waiting for its job");
            }
            return Ok(());
        }

        let job = self.find_job(&report.job_id).await?;
        let run = match self.load(&job.execution_id).await? {
            Loaded::Live(run) => run,
            Loaded::Finished(_) => return self.record_late_report(job, &report).await,
        };

        let mut guard = run.state.lock().await;
        let state = &mut *guard;

        // re-read under the lock; a duplicate report may have won the race
        let mut job = self.find_job(&report.job_id).await?;
        if job.is_terminal() {
            debug!("Ignoring report for finished job");
            return Ok(());
        }
        if job.iteration.is_some() || state.execution.is_terminal() {
            return self.record_late_report(job, &report).await;
        }

        let workflow = Arc::clone(&state.workflow);
        let Some(node) = workflow.node(&job.node_id) else {
            return self.record_late_report(job, &report).await;
        };

        if report.success {
            let execution = &mut state.execution;
            let recorded = record_output(
                node,
                &mut execution.variables,
                &mut execution.results,
                &report,
            );
            match recorded {
                Ok(()) => {
                    job.complete(Branch::Next, report.output.clone());
                    self.inner.store.save_job(&job).await?;
                    self.complete_node(state, node, Branch::Next);
                }
                Err(e) => {
                    job.output = report.output.clone();
                    self.fail_node(state, node, &mut job, None, &e.to_string());
                    self.inner.store.save_job(&job).await?;
                }
            }
        } else {
            job.output = report.output.clone();
            self.fail_node(state, node, &mut job, None, &failure_message(&report));
            self.inner.store.save_job(&job).await?;
        }

        self.advance(&run, state, true).await
    }

    /// Cancel an execution and every job it still has in flight.
    /// Agents get a best-effort cancellation signal.
    #[instrument(skip(self))]
    pub async fn cancel_execution(&self, execution_id: &str) -> Result<Execution, EngineError> {
        let run = match self.load(execution_id).await? {
            Loaded::Live(run) => run,
            Loaded::Finished(execution) => return Ok(execution),
        };

        // before locking, so running loops and timers stop at once
        run.cancel.cancel();

        let mut guard = run.state.lock().await;
        let state = &mut *guard;
        if state.execution.is_terminal() {
            return Ok(state.execution.clone());
        }

        state.execution.finish(ExecutionStatus::Cancelled);
        state
            .execution
            .logs
            .push(LogLevel::Warn, None, "Execution cancelled");

        let jobs = self.inner.store.jobs_for_execution(execution_id).await?;
        for mut job in jobs.into_iter().filter(|j| !j.is_terminal()) {
            job.cancel();
            self.inner.store.save_job(&job).await?;
            if let Some(agent_id) = &job.agent_id {
                if let Err(e) = self.inner.transport.cancel(agent_id, &job.id).await {
                    warn!(job_id = %job.id, error = %e, "Failed to signal cancellation to agent");
                }
            }
        }

        self.persist(&mut state.execution).await?;
        Ok(state.execution.clone())
    }

    /// Last saved state of an execution
    pub async fn get_execution(&self, execution_id: &str) -> Result<Execution, EngineError> {
        self.inner
            .store
            .get_execution(execution_id)
            .await?
            .ok_or_else(|| EngineError::ExecutionNotFound(execution_id.to_string()))
    }

    /// Resolve once the execution reaches a terminal status
    pub async fn wait_for(&self, execution_id: &str) -> Result<Execution, EngineError> {
        let mut finished = self.inner.finished.subscribe();
        let execution = self.get_execution(execution_id).await?;
        if execution.is_terminal() {
            return Ok(execution);
        }

        loop {
            match finished.recv().await {
                Ok((id, _)) if id == execution_id => return self.get_execution(execution_id).await,
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(_)) => {
                    let execution = self.get_execution(execution_id).await?;
                    if execution.is_terminal() {
                        return Ok(execution);
                    }
                }
                Err(broadcast::error::RecvError::Closed) => {
                    return Err(EngineError::ExecutionNotFound(execution_id.to_string()))
                }
            }
        }
    }

    /// [`Engine::wait_for`] with an upper bound
    pub async fn wait_for_timeout(
        &self,
        execution_id: &str,
        timeout: Duration,
    ) -> Result<Execution, EngineError> {
        tokio::time::timeout(timeout, self.wait_for(execution_id))
            .await
            .map_err(|_| EngineError::Timeout(execution_id.to_string()))?
    }

    /// Feed agent reports into the engine until the channel closes
    pub async fn pump_results(&self, results: async_channel::Receiver<JobReport>) {
        while let Ok(report) = results.recv().await {
            let engine = self.clone();
            // each report waits on its own execution's lock
            tokio::spawn(async move {
                let job_id = report.job_id.clone();
                if let Err(e) = engine.on_job_result(report).await {
                    warn!(job_id = %job_id, error = %e, "Failed to apply job result");
                }
            });
        }
        debug!("Result channel closed");
    }

    // ------------------------------------------------------------------------
    // Stepping
    // ------------------------------------------------------------------------

    async fn advance(
        &self,
        run: &Arc<Run>,
        state: &mut RunState,
        mut changed: bool,
    ) -> Result<(), EngineError> {
        loop {
            if state.execution.is_terminal() || run.cancel.is_cancelled() {
                break;
            }

            let skipped = state.graph.mark_skipped(&mut state.progress);
            for node_id in &skipped {
                debug!(execution_id = %state.execution.id, node_id = %node_id, "Skipping node on untaken branch");
            }
            changed |= !skipped.is_empty();

            let ready = state.graph.find_ready_nodes(&state.progress);
            if ready.is_empty() {
                break;
            }
            changed = true;

            for node_id in ready {
                if state.execution.is_terminal() || run.cancel.is_cancelled() {
                    break;
                }
                self.run_node(run, state, &node_id).await?;
            }
        }

        if !state.execution.is_terminal() && !run.cancel.is_cancelled() && state.in_flight() == 0 {
            state.execution.finish(ExecutionStatus::Completed);
            state
                .execution
                .logs
                .push(LogLevel::Info, None, "Execution completed");
            changed = true;
        }

        if changed {
            self.persist(&mut state.execution).await?;
        }
        Ok(())
    }

    async fn run_node(
        &self,
        run: &Arc<Run>,
        state: &mut RunState,
        node_id: &str,
    ) -> Result<(), EngineError> {
        let workflow = Arc::clone(&state.workflow);
        let Some(node) = workflow.node(node_id) else {
            return Ok(());
        };

        state.progress.dispatched.insert(node.id.clone());
        state.execution.logs.info(
            &node.id,
            format!("Executing node {} ({})", node.id, node.node_type),
        );

        if self.loop_suspends(&workflow, &node.id) {
            let job = Job::local(&state.execution.id, &node.id, &node.node_type);
            self.inner.store.save_job(&job).await?;
            self.spawn_loop(run, state, job.id, &node.id);
            return Ok(());
        }

        // a node that continues past failure must leave no variable changes behind
        let snapshot = node
            .continue_on_error()
            .then(|| state.execution.variables.clone());

        let executor = self.inner.registry.get(&node.node_type);
        let outcome = {
            let execution = &mut state.execution;
            let env = NodeEnv {
                execution_id: &execution.id,
                default_agent: execution.agent_id.as_deref(),
                workflow: &workflow,
                config: &self.inner.config,
                services: &*self.inner,
                cancel: &run.cancel,
            };
            let mut ctx = NodeContext::new(
                env,
                &mut execution.variables,
                &mut execution.results,
                &mut execution.logs,
            );
            executor.execute(node, &mut ctx).await
        };

        let execution_id = state.execution.id.clone();
        match outcome {
            Ok(NodeOutcome::Done(branch)) => {
                let mut job = Job::local(&execution_id, &node.id, &node.node_type);
                job.complete(branch.clone(), None);
                self.inner.store.save_job(&job).await?;
                self.complete_node(state, node, branch);
            }
            Ok(NodeOutcome::Sleep(duration)) => {
                let mut job = Job::local(&execution_id, &node.id, &node.node_type);
                job.resume_after(duration);
                self.inner.store.save_job(&job).await?;
                self.spawn_timer(run, job.id, duration);
            }
            Ok(NodeOutcome::Dispatch(work)) => {
                let mut job = Job::remote(
                    &execution_id,
                    &node.id,
                    &node.node_type,
                    &work.agent_id,
                    &work.script,
                    work.parameters.clone(),
                );
                self.inner.store.save_job(&job).await?;

                match self.inner.transport.dispatch(&request_for(&job, &work)).await {
                    Ok(()) => {
                        job.mark_running();
                        debug!(job_id = %job.id, agent_id = %work.agent_id, "Dispatched job");
                    }
                    Err(e) => {
                        let message = NodeError::from(e).to_string();
                        self.fail_node(state, node, &mut job, snapshot, &message);
                    }
                }
                self.inner.store.save_job(&job).await?;
            }
            Err(NodeError::Cancelled) => {
                let mut job = Job::local(&execution_id, &node.id, &node.node_type);
                job.cancel();
                self.inner.store.save_job(&job).await?;
            }
            Err(e) => {
                let mut job = Job::local(&execution_id, &node.id, &node.node_type);
                self.fail_node(state, node, &mut job, snapshot, &e.to_string());
                self.inner.store.save_job(&job).await?;
            }
        }
        Ok(())
    }

    /// Record a finished node and traverse the edges its branch selects
    fn complete_node(&self, state: &mut RunState, node: &Node, branch: Branch) {
        state
            .execution
            .logs
            .info(&node.id, format!("Node {} completed", node.id));
        state.progress.record(&state.workflow, &node.id, &branch);
    }

    /// Route a node failure: `error` edge, then `continueOnError`, else fail the execution
    fn fail_node(
        &self,
        state: &mut RunState,
        node: &Node,
        job: &mut Job,
        snapshot: Option<VariableStore>,
        message: &str,
    ) {
        state
            .execution
            .logs
            .error(&node.id, format!("Node {} failed: {}", node.id, message));

        if state.workflow.has_handle(&node.id, handles::ERROR) {
            job.fail(message, Some(Branch::Error));
            state.progress.record(&state.workflow, &node.id, &Branch::Error);
        } else if node.continue_on_error() {
            if let Some(variables) = snapshot {
                state.execution.variables = variables;
            }
            job.fail(message, Some(Branch::Next));
            state
                .execution
                .logs
                .warn(&node.id, "Continuing past failed node");
            state.progress.record(&state.workflow, &node.id, &Branch::Next);
        } else {
            job.fail(message, None);
            state.execution.fail(message, Some(&node.id));
        }
    }

    fn spawn_timer(&self, run: &Arc<Run>, job_id: String, duration: Duration) {
        let engine = self.clone();
        let run = Arc::clone(run);
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(duration) => {}
                _ = run.cancel.cancelled() => return,
            }
            if let Err(e) = engine.finish_timer(&run, &job_id).await {
                error!(job_id = %job_id, error = %e, "Failed to resume after wait");
            }
        });
    }

    async fn finish_timer(&self, run: &Arc<Run>, job_id: &str) -> Result<(), EngineError> {
        let mut guard = run.state.lock().await;
        let state = &mut *guard;
        if state.execution.is_terminal() {
            return Ok(());
        }

        let mut job = self.find_job(job_id).await?;
        if job.is_terminal() {
            return Ok(());
        }

        let workflow = Arc::clone(&state.workflow);
        if let Some(node) = workflow.node(&job.node_id) {
            job.complete(Branch::Next, None);
            self.inner.store.save_job(&job).await?;
            self.complete_node(state, node, Branch::Next);
        }
        self.advance(run, state, true).await
    }

    /// Whether a node's loop body can pause for an agent or a timer
    fn loop_suspends(&self, workflow: &Workflow, node_id: &str) -> bool {
        let mut pending = vec![node_id];
        let mut seen = HashSet::new();
        while let Some(id) = pending.pop() {
            if !seen.insert(id) {
                continue;
            }
            for edge in workflow.outgoing(id).filter(|e| e.is_loop_body()) {
                let Some(target) = workflow.node(&edge.target) else {
                    continue;
                };
                if self.inner.registry.get(&target.node_type).suspends() {
                    return true;
                }
                pending.push(&target.id);
            }
        }
        false
    }

    /// Run a loop node off the execution lock, on a copy of the variables
    fn spawn_loop(&self, run: &Arc<Run>, state: &RunState, job_id: String, node_id: &str) {
        let engine = self.clone();
        let run = Arc::clone(run);
        let workflow = Arc::clone(&state.workflow);
        let execution_id = state.execution.id.clone();
        let default_agent = state.execution.agent_id.clone();
        let base = state.execution.variables.clone();
        let node_id = node_id.to_string();

        tokio::spawn(async move {
            let Some(node) = workflow.node(&node_id) else {
                return;
            };
            let mut variables = base.clone();
            let mut results = Map::new();
            let mut log = ExecutionLog::new();

            let outcome = {
                let env = NodeEnv {
                    execution_id: &execution_id,
                    default_agent: default_agent.as_deref(),
                    workflow: &workflow,
                    config: &engine.inner.config,
                    services: &*engine.inner,
                    cancel: &run.cancel,
                };
                let mut ctx = NodeContext::new(env, &mut variables, &mut results, &mut log);
                let executor = engine.inner.registry.get(&node.node_type);
                executor.execute(node, &mut ctx).await
            };

            let finished = LoopResult {
                job_id,
                base,
                variables,
                results,
                log,
                outcome,
            };
            if let Err(e) = engine.finish_loop(&run, finished).await {
                error!(node_id = %node_id, error = %e, "Failed to resume after loop");
            }
        });
    }

    async fn finish_loop(&self, run: &Arc<Run>, finished: LoopResult) -> Result<(), EngineError> {
        let mut guard = run.state.lock().await;
        let state = &mut *guard;
        if state.execution.is_terminal() {
            return Ok(());
        }

        let mut job = self.find_job(&finished.job_id).await?;
        if job.is_terminal() {
            return Ok(());
        }
        let workflow = Arc::clone(&state.workflow);
        let Some(node) = workflow.node(&job.node_id) else {
            return Ok(());
        };

        let LoopResult {
            base,
            variables,
            results,
            log,
            outcome,
            ..
        } = finished;
        state.execution.logs.extend(log);
        state.execution.results.extend(results);

        match outcome {
            Ok(NodeOutcome::Done(branch)) => {
                state.execution.variables.apply_changes(&base, &variables);
                job.complete(branch.clone(), None);
                self.inner.store.save_job(&job).await?;
                self.complete_node(state, node, branch);
            }
            Err(NodeError::Cancelled) => {
                job.cancel();
                self.inner.store.save_job(&job).await?;
            }
            outcome => {
                let message = match outcome {
                    Err(e) => e.to_string(),
                    Ok(_) => format!("{} must finish without suspending", node.node_type),
                };
                // continuing past the failure keeps none of the loop's writes
                if !node.continue_on_error() {
                    state.execution.variables.apply_changes(&base, &variables);
                }
                self.fail_node(state, node, &mut job, None, &message);
                self.inner.store.save_job(&job).await?;
            }
        }
        self.advance(run, state, true).await
    }

    /// Close out a job whose execution no longer routes results
    async fn record_late_report(&self, mut job: Job, report: &JobReport) -> Result<(), EngineError> {
        if job.is_terminal() {
            return Ok(());
        }
        debug!(job_id = %job.id, "Recording report for an execution that moved on");
        if report.success {
            job.complete(Branch::Next, report.output.clone());
        } else {
            job.output = report.output.clone();
            job.fail(&failure_message(report), None);
        }
        self.inner.store.save_job(&job).await?;
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Persistence
    // ------------------------------------------------------------------------

    async fn find_job(&self, job_id: &str) -> Result<Job, EngineError> {
        self.inner
            .store
            .get_job(job_id)
            .await?
            .ok_or_else(|| EngineError::JobNotFound(job_id.to_string()))
    }

    /// The live run, or a rebuilt one from stored jobs
    async fn load(&self, execution_id: &str) -> Result<Loaded, EngineError> {
        if let Some(run) = self.inner.runs.lock().await.get(execution_id) {
            return Ok(Loaded::Live(Arc::clone(run)));
        }

        let execution = self.get_execution(execution_id).await?;
        if execution.is_terminal() {
            return Ok(Loaded::Finished(execution));
        }

        let workflow = self
            .inner
            .store
            .get_workflow(&execution.workflow_id)
            .await?
            .ok_or_else(|| EngineError::WorkflowNotFound(execution.workflow_id.clone()))?;
        let graph = WorkflowGraph::build(&workflow)?;
        let jobs = self.inner.store.jobs_for_execution(execution_id).await?;
        let mut progress = Progress::from_jobs(&workflow, &jobs);

        // local work in flight lost its task with the previous engine
        let mut timers = Vec::new();
        let mut interrupted = Vec::new();
        for job in jobs {
            if job.iteration.is_some() || job.is_remote() || job.is_terminal() {
                continue;
            }
            match job.remaining_wait() {
                Some(remaining) => timers.push((job.id, remaining)),
                None => {
                    progress.dispatched.remove(&job.node_id);
                    interrupted.push(job);
                }
            }
        }
        debug!(
            execution_id,
            dispatched = progress.dispatched.len(),
            timers = timers.len(),
            rerun = interrupted.len(),
            "Rebuilt execution state from stored jobs"
        );

        let run = Arc::new(Run {
            cancel: CancellationToken::new(),
            state: Mutex::new(RunState {
                workflow: Arc::new(workflow),
                graph,
                execution,
                progress,
            }),
        });

        let inserted = match self.inner.runs.lock().await.entry(execution_id.to_string()) {
            Entry::Occupied(entry) => return Ok(Loaded::Live(Arc::clone(entry.get()))),
            Entry::Vacant(entry) => Arc::clone(entry.insert(run)),
        };

        // interrupted nodes run again on the next step
        for mut job in interrupted {
            job.cancel();
            self.inner.store.save_job(&job).await?;
        }
        for (job_id, remaining) in timers {
            self.spawn_timer(&inserted, job_id, remaining);
        }
        Ok(Loaded::Live(inserted))
    }

    async fn persist(&self, execution: &mut Execution) -> Result<(), EngineError> {
        execution.version = self.inner.store.save_execution(execution).await?;
        if execution.is_terminal() {
            self.inner.runs.lock().await.remove(&execution.id);
            info!(
                execution_id = %execution.id,
                status = %execution.status,
                "Execution finished"
            );
            // no subscribers is fine
            let _ = self
                .inner
                .finished
                .send((execution.id.clone(), execution.status));
        }
        Ok(())
    }
}

fn request_for(job: &Job, work: &RemoteWork) -> JobRequest {
    JobRequest {
        job_id: job.id.clone(),
        execution_id: job.execution_id.clone(),
        node_id: job.node_id.clone(),
        agent_id: work.agent_id.clone(),
        script: work.script.clone(),
        parameters: work.parameters.clone(),
    }
}

fn failure_message(report: &JobReport) -> String {
    report.error.clone().unwrap_or_else(|| match report.exit_code {
        Some(code) => format!("Script exited with code {}", code),
        None => "Script failed".to_string(),
    })
}

// ============================================================================
// Services for node executors
// ============================================================================

impl EngineInner {
    /// Dispatch a foreach body script and wait for its report
    async fn dispatch_inline(
        &self,
        node: &Node,
        work: RemoteWork,
        ctx: &mut NodeContext<'_>,
    ) -> Result<Branch, NodeError> {
        let mut job = Job::remote(
            ctx.env.execution_id,
            &node.id,
            &node.node_type,
            &work.agent_id,
            &work.script,
            work.parameters.clone(),
        )
        .with_iteration(ctx.iteration);
        self.store.save_job(&job).await?;

        // registered before dispatch so an immediate report finds it
        let (sender, receiver) = oneshot::channel();
        self.waiters.lock().await.insert(job.id.clone(), sender);

        if let Err(e) = self.transport.dispatch(&request_for(&job, &work)).await {
            self.waiters.lock().await.remove(&job.id);
            job.fail(&e.to_string(), None);
            self.store.save_job(&job).await?;
            return Err(e.into());
        }
        job.mark_running();
        self.store.save_job(&job).await?;

        let report = tokio::select! {
            report = receiver => report,
            _ = ctx.env.cancel.cancelled() => {
                self.waiters.lock().await.remove(&job.id);
                job.cancel();
                self.store.save_job(&job).await?;
                if let Err(e) = self.transport.cancel(&work.agent_id, &job.id).await {
                    warn!(job_id = %job.id, error = %e, "Failed to signal cancellation to agent");
                }
                return Err(NodeError::Cancelled);
            }
        };

        let Ok(report) = report else {
            job.fail("Result channel closed", None);
            self.store.save_job(&job).await?;
            return Err(NodeError::Remote("Result channel closed".to_string()));
        };

        if !report.success {
            let message = failure_message(&report);
            job.output = report.output.clone();
            job.fail(&message, None);
            self.store.save_job(&job).await?;
            return Err(NodeError::Remote(message));
        }

        if let Err(e) = record_output(node, ctx.variables, ctx.results, &report) {
            job.fail(&e.to_string(), None);
            self.store.save_job(&job).await?;
            return Err(e);
        }
        job.complete(Branch::Next, report.output.clone());
        self.store.save_job(&job).await?;
        Ok(Branch::Next)
    }
}

#[async_trait]
impl NodeServices for EngineInner {
    async fn load_script(&self, id: &str) -> Result<Option<Script>, NodeError> {
        Ok(self.store.get_script(id).await?)
    }

    async fn resolve_agent(&self, preferred: Option<&str>) -> Result<String, NodeError> {
        match preferred {
            Some(agent_id) if self.agents.is_online(agent_id).await => Ok(agent_id.to_string()),
            Some(agent_id) => Err(BridgeError::AgentOffline(agent_id.to_string()).into()),
            None => self
                .agents
                .online_agents()
                .await
                .into_iter()
                .next()
                .ok_or_else(|| NodeError::config("No agent available to run script")),
        }
    }

    fn http_client(&self) -> &reqwest::Client {
        &self.http
    }

    async fn run_inline(&self, node: &Node, ctx: &mut NodeContext<'_>) -> Result<Branch, NodeError> {
        ctx.log.info(
            &node.id,
            format!("Executing node {} ({})", node.id, node.node_type),
        );

        let executor = self.registry.get(&node.node_type);
        let (result, remote) = match executor.execute(node, ctx).await {
            Ok(NodeOutcome::Done(branch)) => (Ok(branch), false),
            Ok(NodeOutcome::Sleep(duration)) => {
                let slept = tokio::select! {
                    _ = tokio::time::sleep(duration) => Ok(Branch::Next),
                    _ = ctx.env.cancel.cancelled() => Err(NodeError::Cancelled),
                };
                (slept, false)
            }
            Ok(NodeOutcome::Dispatch(work)) => (self.dispatch_inline(node, work, ctx).await, true),
            Err(e) => (Err(e), false),
        };

        if !remote {
            let mut job = Job::local(ctx.env.execution_id, &node.id, &node.node_type)
                .with_iteration(ctx.iteration);
            match &result {
                Ok(branch) => job.complete(branch.clone(), None),
                Err(NodeError::Cancelled) => job.cancel(),
                Err(e) => job.fail(&e.to_string(), None),
            }
            self.store.save_job(&job).await?;
        }

        match &result {
            Ok(_) => ctx
                .log
                .info(&node.id, format!("Node {} completed", node.id)),
            Err(NodeError::Cancelled) => {}
            Err(e) => ctx
                .log
                .error(&node.id, format!("Node {} failed: {}", node.id, e)),
        }
        result
    }
}
