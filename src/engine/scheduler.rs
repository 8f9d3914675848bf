//! Graph scheduler
//!
//! Validates a workflow graph, computes start nodes, and, given the progress
//! of an execution, derives which nodes are ready to dispatch. Readiness is
//! always re-derived from [`Progress`] rather than from an expected sequence,
//! so completions may arrive in any order.
//!
//! A node is ready when it has not been dispatched, at least one incoming edge
//! was taken, and every incoming edge's source is resolved (completed or
//! skipped). A node whose incoming edges are all resolved but none taken is
//! skipped, which lets joins below a conditional still fire.

use std::collections::{HashMap, HashSet};

use crate::workflow::{Branch, Edge, Job, JobStatus, Node, Workflow};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GraphError {
    #[error("Duplicate node id: {0}")]
    DuplicateNode(String),

    #[error("Edge '{edge}' references non-existent node '{node}'")]
    DanglingEdge { edge: String, node: String },

    #[error("Workflow has no start nodes")]
    NoStartNodes,

    #[error("Cycle detected between nodes: {0:?}")]
    Cycle(Vec<String>),
}

impl GraphError {
    /// Node the error is attributable to, if any
    pub fn node_id(&self) -> Option<&str> {
        match self {
            GraphError::DuplicateNode(id) => Some(id),
            GraphError::DanglingEdge { .. } | GraphError::NoStartNodes => None,
            GraphError::Cycle(nodes) => nodes.first().map(String::as_str),
        }
    }
}

/// Nodes that are never the target of an edge, in definition order
pub fn find_start_nodes<'a>(nodes: &'a [Node], edges: &[Edge]) -> Vec<&'a Node> {
    let targets: HashSet<&str> = edges.iter().map(|e| e.target.as_str()).collect();
    nodes
        .iter()
        .filter(|n| !targets.contains(n.id.as_str()))
        .collect()
}

/// How far an execution has walked the graph
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Progress {
    /// Nodes with a top-level job, in flight or terminal
    pub dispatched: HashSet<String>,
    /// Nodes whose job finished with a branch to follow
    pub completed: HashSet<String>,
    /// Nodes on branches that were not taken
    pub skipped: HashSet<String>,
    /// Edge ids traversed by a completed node's branch
    pub taken_edges: HashSet<String>,
}

impl Progress {
    /// Re-derive progress from an execution's stored jobs.
    ///
    /// Foreach iteration jobs are not graph dispatches and are ignored. So are
    /// cancelled jobs: in a live execution they were interrupted by a restart
    /// and their node runs again.
    pub fn from_jobs(workflow: &Workflow, jobs: &[Job]) -> Self {
        let mut progress = Self::default();
        let graph_jobs = jobs
            .iter()
            .filter(|j| j.iteration.is_none() && j.status != JobStatus::Cancelled);
        for job in graph_jobs {
            progress.dispatched.insert(job.node_id.clone());
            if let (true, Some(branch)) = (job.is_terminal(), &job.branch) {
                progress.record(workflow, &job.node_id, branch);
            }
        }
        progress
    }

    /// Mark a node finished and traverse the edges its branch selects
    pub fn record(&mut self, workflow: &Workflow, node_id: &str, branch: &Branch) {
        self.completed.insert(node_id.to_string());
        for edge in workflow.outgoing(node_id) {
            if branch.takes(edge) {
                self.taken_edges.insert(edge.id.clone());
            }
        }
    }

    pub fn is_resolved(&self, node_id: &str) -> bool {
        self.completed.contains(node_id) || self.skipped.contains(node_id)
    }
}

/// Validated adjacency index over one workflow
#[derive(Debug, Clone)]
pub struct WorkflowGraph {
    order: Vec<String>,
    incoming: HashMap<String, Vec<Edge>>,
    start_nodes: Vec<String>,
    execution_levels: Vec<Vec<String>>,
}

impl WorkflowGraph {
    pub fn build(workflow: &Workflow) -> Result<Self, GraphError> {
        let mut order = Vec::with_capacity(workflow.nodes.len());
        let mut incoming: HashMap<String, Vec<Edge>> = HashMap::new();

        for node in &workflow.nodes {
            if incoming.contains_key(&node.id) {
                return Err(GraphError::DuplicateNode(node.id.clone()));
            }
            incoming.insert(node.id.clone(), Vec::new());
            order.push(node.id.clone());
        }

        for edge in &workflow.edges {
            for endpoint in [&edge.source, &edge.target] {
                if !incoming.contains_key(endpoint) {
                    return Err(GraphError::DanglingEdge {
                        edge: edge.id.clone(),
                        node: endpoint.clone(),
                    });
                }
            }
            if let Some(list) = incoming.get_mut(&edge.target) {
                list.push(edge.clone());
            }
        }

        let start_nodes: Vec<String> = find_start_nodes(&workflow.nodes, &workflow.edges)
            .into_iter()
            .map(|n| n.id.clone())
            .collect();
        if start_nodes.is_empty() {
            return Err(GraphError::NoStartNodes);
        }

        let execution_levels = Self::compute_execution_levels(&order, &workflow.edges)?;

        Ok(Self {
            order,
            incoming,
            start_nodes,
            execution_levels,
        })
    }

    /// Kahn layering in node definition order; leftover nodes form a cycle
    fn compute_execution_levels(
        order: &[String],
        edges: &[Edge],
    ) -> Result<Vec<Vec<String>>, GraphError> {
        let position: HashMap<&str, usize> = order
            .iter()
            .enumerate()
            .map(|(i, id)| (id.as_str(), i))
            .collect();
        let mut in_degree: HashMap<&str, usize> =
            order.iter().map(|id| (id.as_str(), 0)).collect();
        let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();

        for edge in edges {
            *in_degree.entry(edge.target.as_str()).or_insert(0) += 1;
            dependents
                .entry(edge.source.as_str())
                .or_default()
                .push(edge.target.as_str());
        }

        let mut levels: Vec<Vec<String>> = Vec::new();
        let mut current_level: Vec<&str> = order
            .iter()
            .map(String::as_str)
            .filter(|id| in_degree.get(id) == Some(&0))
            .collect();

        while !current_level.is_empty() {
            let mut next_level = Vec::new();
            for name in &current_level {
                for &dep in dependents.get(name).map(Vec::as_slice).unwrap_or(&[]) {
                    if let Some(degree) = in_degree.get_mut(dep) {
                        *degree -= 1;
                        if *degree == 0 {
                            next_level.push(dep);
                        }
                    }
                }
            }
            next_level.sort_by_key(|id| position.get(id).copied().unwrap_or(usize::MAX));
            levels.push(current_level.iter().map(|s| s.to_string()).collect());
            current_level = next_level;
        }

        let total_processed: usize = levels.iter().map(|l| l.len()).sum();
        if total_processed != order.len() {
            let placed: HashSet<&str> = levels.iter().flatten().map(String::as_str).collect();
            let cyclic = order
                .iter()
                .filter(|id| !placed.contains(id.as_str()))
                .cloned()
                .collect();
            return Err(GraphError::Cycle(cyclic));
        }

        Ok(levels)
    }

    pub fn start_nodes(&self) -> &[String] {
        &self.start_nodes
    }

    pub fn execution_levels(&self) -> &[Vec<String>] {
        &self.execution_levels
    }

    pub fn incoming(&self, node_id: &str) -> &[Edge] {
        self.incoming.get(node_id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Nodes fed only by `forEach` edges run inline inside their loop
    pub fn is_loop_body(&self, node_id: &str) -> bool {
        let incoming = self.incoming(node_id);
        !incoming.is_empty() && incoming.iter().all(Edge::is_loop_body)
    }

    /// Nodes ready to dispatch, in definition order
    pub fn find_ready_nodes(&self, progress: &Progress) -> Vec<String> {
        self.order
            .iter()
            .filter(|id| !progress.dispatched.contains(*id) && !progress.is_resolved(id))
            .filter(|id| {
                let incoming = self.incoming(id);
                if incoming.is_empty() {
                    return true;
                }
                incoming.iter().all(|e| progress.is_resolved(&e.source))
                    && incoming.iter().any(|e| progress.taken_edges.contains(&e.id))
            })
            .cloned()
            .collect()
    }

    /// Mark nodes on untaken branches as skipped, to a fixpoint.
    /// Returns the newly skipped nodes.
    pub fn mark_skipped(&self, progress: &mut Progress) -> Vec<String> {
        let mut newly_skipped = Vec::new();
        loop {
            let batch: Vec<String> = self
                .order
                .iter()
                .filter(|id| !progress.dispatched.contains(*id) && !progress.is_resolved(id))
                .filter(|id| {
                    let incoming = self.incoming(id);
                    !incoming.is_empty()
                        && incoming.iter().all(|e| progress.is_resolved(&e.source))
                        && !incoming.iter().any(|e| progress.taken_edges.contains(&e.id))
                })
                .cloned()
                .collect();

            if batch.is_empty() {
                return newly_skipped;
            }
            for id in batch {
                progress.skipped.insert(id.clone());
                newly_skipped.push(id);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}
