//! In-memory document store

use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

use super::{DocumentStore, StoreError};
use crate::workflow::{Execution, Job, Script, Workflow};

#[derive(Debug, Default)]
pub struct MemoryStore {
    workflows: RwLock<HashMap<String, Workflow>>,
    executions: RwLock<HashMap<String, Execution>>,
    jobs: RwLock<Vec<Job>>,
    scripts: RwLock<HashMap<String, Script>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Executions of one workflow, oldest first
    pub async fn executions_for_workflow(&self, workflow_id: &str) -> Vec<Execution> {
        let mut executions: Vec<Execution> = self
            .executions
            .read()
            .await
            .values()
            .filter(|e| e.workflow_id == workflow_id)
            .cloned()
            .collect();
        executions.sort_by_key(|e| e.started_at);
        executions
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn get_workflow(&self, id: &str) -> Result<Option<Workflow>, StoreError> {
        Ok(self.workflows.read().await.get(id).cloned())
    }

    async fn save_workflow(&self, workflow: &Workflow) -> Result<(), StoreError> {
        self.workflows
            .write()
            .await
            .insert(workflow.id.clone(), workflow.clone());
        Ok(())
    }

    async fn get_execution(&self, id: &str) -> Result<Option<Execution>, StoreError> {
        Ok(self.executions.read().await.get(id).cloned())
    }

    async fn save_execution(&self, execution: &Execution) -> Result<u64, StoreError> {
        let mut executions = self.executions.write().await;
        let found = executions.get(&execution.id).map(|e| e.version).unwrap_or(0);
        if found != execution.version {
            return Err(StoreError::Conflict {
                id: execution.id.clone(),
                expected: execution.version,
                found,
            });
        }

        let mut stored = execution.clone();
        stored.version = found + 1;
        executions.insert(stored.id.clone(), stored);
        Ok(found + 1)
    }

    async fn get_job(&self, id: &str) -> Result<Option<Job>, StoreError> {
        Ok(self.jobs.read().await.iter().find(|j| j.id == id).cloned())
    }

    async fn save_job(&self, job: &Job) -> Result<(), StoreError> {
        let mut jobs = self.jobs.write().await;
        match jobs.iter_mut().find(|j| j.id == job.id) {
            Some(existing) => *existing = job.clone(),
            None => jobs.push(job.clone()),
        }
        Ok(())
    }

    async fn jobs_for_execution(&self, execution_id: &str) -> Result<Vec<Job>, StoreError> {
        Ok(self
            .jobs
            .read()
            .await
            .iter()
            .filter(|j| j.execution_id == execution_id)
            .cloned()
            .collect())
    }

    async fn get_script(&self, id: &str) -> Result<Option<Script>, StoreError> {
        Ok(self.scripts.read().await.get(id).cloned())
    }

    async fn save_script(&self, script: &Script) -> Result<(), StoreError> {
        self.scripts
            .write()
            .await
            .insert(script.id.clone(), script.clone());
        Ok(())
    }
}
