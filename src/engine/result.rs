//! Node outcome types

use serde_json::Value;
use std::time::Duration;

use crate::workflow::Branch;

/// What a node executor decided
#[derive(Debug, Clone, PartialEq)]
pub enum NodeOutcome {
    /// Finished in-process; follow this branch
    Done(Branch),

    /// Needs an agent; the engine creates the job and dispatches it
    Dispatch(RemoteWork),

    /// Pause this path, then follow [`Branch::Next`]
    Sleep(Duration),
}

impl NodeOutcome {
    pub fn next() -> Self {
        NodeOutcome::Done(Branch::Next)
    }
}

/// A script bound for an agent
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteWork {
    pub agent_id: String,
    pub script: String,
    pub parameters: Value,
}
