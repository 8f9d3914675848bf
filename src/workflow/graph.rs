//! Workflow, Node, and Edge definitions
//!
//! A workflow is an immutable graph of typed nodes connected by directed edges.
//! Edges may carry a `sourceHandle` to pick one of several outgoing branches
//! (`true`/`false` for conditions, `forEach`/`complete`/`error` for loops).

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;

// ============================================================================
// Workflow
// ============================================================================

/// A complete workflow definition
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Workflow {
    /// Workflow id (document key)
    pub id: String,

    /// Human-readable name
    #[serde(default)]
    pub name: Option<String>,

    /// Default values for the `workflow` variable namespace
    #[serde(default)]
    pub variables: HashMap<String, Value>,

    /// Graph nodes, in definition order
    #[serde(default)]
    pub nodes: Vec<Node>,

    /// Graph edges, in definition order
    #[serde(default)]
    pub edges: Vec<Edge>,
}

impl Workflow {
    /// Display name, falling back to the id
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }

    /// Look up a node by id
    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// Edges leaving `node_id`, in definition order
    pub fn outgoing<'a>(&'a self, node_id: &'a str) -> impl Iterator<Item = &'a Edge> + 'a {
        self.edges.iter().filter(move |e| e.source == node_id)
    }

    /// True if `node_id` has an outgoing edge with the given handle
    pub fn has_handle(&self, node_id: &str, handle: &str) -> bool {
        self.outgoing(node_id)
            .any(|e| e.source_handle.as_deref() == Some(handle))
    }
}

// ============================================================================
// Node
// ============================================================================

/// One step in the workflow graph
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub id: String,

    /// Type tag selecting the executor (e.g. `scriptNode`, `conditionNode`)
    #[serde(rename = "type")]
    pub node_type: String,

    /// Type-specific configuration
    #[serde(default)]
    pub data: Map<String, Value>,
}

impl Node {
    pub fn new(id: &str, node_type: &str, data: Value) -> Self {
        let data = match data {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        Self {
            id: id.to_string(),
            node_type: node_type.to_string(),
            data,
        }
    }

    /// Raw field from `data`
    pub fn field(&self, key: &str) -> Option<&Value> {
        self.data.get(key).filter(|v| !v.is_null())
    }

    /// String field from `data`; empty strings count as absent
    pub fn str_field(&self, key: &str) -> Option<&str> {
        self.field(key)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
    }

    /// Boolean flag from `data`, accepting `true` or `"true"`
    pub fn flag(&self, key: &str) -> bool {
        match self.field(key) {
            Some(Value::Bool(b)) => *b,
            Some(Value::String(s)) => s == "true",
            _ => false,
        }
    }

    pub fn continue_on_error(&self) -> bool {
        self.flag("continueOnError")
    }

    pub fn label(&self) -> &str {
        self.str_field("label").unwrap_or(&self.id)
    }
}

// ============================================================================
// Edge
// ============================================================================

/// Handle names with routing meaning
pub mod handles {
    pub const SUCCESS: &str = "success";
    pub const ERROR: &str = "error";
    pub const TRUE: &str = "true";
    pub const FALSE: &str = "false";
    pub const FOR_EACH: &str = "forEach";
    pub const COMPLETE: &str = "complete";
}

/// A directed connection between two nodes
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Edge {
    pub id: String,
    pub source: String,
    pub target: String,

    #[serde(default, deserialize_with = "deserialize_handle")]
    pub source_handle: Option<String>,

    #[serde(default, deserialize_with = "deserialize_handle")]
    pub target_handle: Option<String>,
}

impl Edge {
    pub fn new(id: &str, source: &str, target: &str) -> Self {
        Self {
            id: id.to_string(),
            source: source.to_string(),
            target: target.to_string(),
            source_handle: None,
            target_handle: None,
        }
    }

    pub fn with_handle(mut self, handle: &str) -> Self {
        self.source_handle = Some(handle.to_string());
        self
    }

    /// True for edges that lead into a foreach body
    pub fn is_loop_body(&self) -> bool {
        self.source_handle.as_deref() == Some(handles::FOR_EACH)
    }
}

/// Handles are strings on the wire, but YAML authors write `sourceHandle: true`
fn deserialize_handle<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum HandleHelper {
        Text(String),
        Flag(bool),
    }

    Ok(match Option::<HandleHelper>::deserialize(deserializer)? {
        Some(HandleHelper::Text(s)) if s.is_empty() => None,
        Some(HandleHelper::Text(s)) => Some(s),
        Some(HandleHelper::Flag(b)) => Some(b.to_string()),
        None => None,
    })
}

// ============================================================================
// Branch
// ============================================================================

/// The outgoing branch a finished node selected
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "handle", rename_all = "camelCase")]
pub enum Branch {
    /// Unhandled, `success`, and `complete` edges
    Next,
    /// Edges carrying exactly this handle
    Named(String),
    /// `error` edges
    Error,
}

impl Branch {
    pub fn named(handle: &str) -> Self {
        Branch::Named(handle.to_string())
    }

    /// Whether this branch traverses `edge`
    pub fn takes(&self, edge: &Edge) -> bool {
        let handle = edge.source_handle.as_deref();
        match self {
            Branch::Next => matches!(
                handle,
                None | Some(handles::SUCCESS) | Some(handles::COMPLETE)
            ),
            Branch::Named(name) => handle == Some(name.as_str()),
            Branch::Error => handle == Some(handles::ERROR),
        }
    }
}
