//! Document store seam
//!
//! The engine persists workflows, executions, jobs, and scripts through the
//! [`DocumentStore`] trait. Execution saves are versioned: a save whose
//! `version` does not match the stored document is rejected, so a stale
//! writer can never overwrite a newer step.
//!
//! - `memory` - In-process implementation used by the CLI and tests

use async_trait::async_trait;

use crate::workflow::{Execution, Job, Script, Workflow};

pub mod memory;

pub use memory::MemoryStore;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("Version conflict on execution {id}: expected {expected}, found {found}")]
    Conflict { id: String, expected: u64, found: u64 },

    #[error("Storage backend error: {0}")]
    Backend(String),
}

impl StoreError {
    pub fn not_found(kind: &'static str, id: &str) -> Self {
        StoreError::NotFound {
            kind,
            id: id.to_string(),
        }
    }
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn get_workflow(&self, id: &str) -> Result<Option<Workflow>, StoreError>;

    async fn save_workflow(&self, workflow: &Workflow) -> Result<(), StoreError>;

    async fn get_execution(&self, id: &str) -> Result<Option<Execution>, StoreError>;

    /// Save an execution, returning the new version.
    ///
    /// Fails with [`StoreError::Conflict`] when `execution.version` is stale.
    async fn save_execution(&self, execution: &Execution) -> Result<u64, StoreError>;

    async fn get_job(&self, id: &str) -> Result<Option<Job>, StoreError>;

    async fn save_job(&self, job: &Job) -> Result<(), StoreError>;

    /// All jobs of one execution, in creation order
    async fn jobs_for_execution(&self, execution_id: &str) -> Result<Vec<Job>, StoreError>;

    async fn get_script(&self, id: &str) -> Result<Option<Script>, StoreError>;

    async fn save_script(&self, script: &Script) -> Result<(), StoreError>;
}
