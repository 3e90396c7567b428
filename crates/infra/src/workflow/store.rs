use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use thiserror::Error;

use adminhub_projects::ProjectId;

use super::types::WorkflowInstance;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum WorkflowStoreError {
    #[error("workflow already exists for project {0}")]
    AlreadyExists(ProjectId),

    #[error("workflow not found for project {0}")]
    NotFound(ProjectId),

    #[error("workflow storage error: {0}")]
    Storage(String),
}

/// Durable checkpoint storage for workflow instances, keyed by project id.
pub trait WorkflowStore: Send + Sync {
    /// Insert-if-absent; an existing instance yields `AlreadyExists`.
    fn create(&self, instance: &WorkflowInstance) -> Result<(), WorkflowStoreError>;

    fn load(&self, project_id: ProjectId) -> Result<Option<WorkflowInstance>, WorkflowStoreError>;

    /// Overwrite the checkpoint of an existing instance.
    fn save(&self, instance: &WorkflowInstance) -> Result<(), WorkflowStoreError>;

    /// Instances not yet in a terminal state.
    fn list_incomplete(&self) -> Result<Vec<WorkflowInstance>, WorkflowStoreError>;
}

impl<S> WorkflowStore for Arc<S>
where
    S: WorkflowStore + ?Sized,
{
    fn create(&self, instance: &WorkflowInstance) -> Result<(), WorkflowStoreError> {
        (**self).create(instance)
    }

    fn load(&self, project_id: ProjectId) -> Result<Option<WorkflowInstance>, WorkflowStoreError> {
        (**self).load(project_id)
    }

    fn save(&self, instance: &WorkflowInstance) -> Result<(), WorkflowStoreError> {
        (**self).save(instance)
    }

    fn list_incomplete(&self) -> Result<Vec<WorkflowInstance>, WorkflowStoreError> {
        (**self).list_incomplete()
    }
}

/// In-memory workflow store for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryWorkflowStore {
    instances: RwLock<HashMap<ProjectId, WorkflowInstance>>,
}

impl InMemoryWorkflowStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    pub fn len(&self) -> usize {
        self.instances.read().map(|m| m.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn poisoned() -> WorkflowStoreError {
        WorkflowStoreError::Storage("lock poisoned".to_string())
    }
}

impl WorkflowStore for InMemoryWorkflowStore {
    fn create(&self, instance: &WorkflowInstance) -> Result<(), WorkflowStoreError> {
        let mut instances = self.instances.write().map_err(|_| Self::poisoned())?;
        let id = instance.project_id();
        if instances.contains_key(&id) {
            return Err(WorkflowStoreError::AlreadyExists(id));
        }
        instances.insert(id, instance.clone());
        Ok(())
    }

    fn load(&self, project_id: ProjectId) -> Result<Option<WorkflowInstance>, WorkflowStoreError> {
        let instances = self.instances.read().map_err(|_| Self::poisoned())?;
        Ok(instances.get(&project_id).cloned())
    }

    fn save(&self, instance: &WorkflowInstance) -> Result<(), WorkflowStoreError> {
        let mut instances = self.instances.write().map_err(|_| Self::poisoned())?;
        let slot = instances
            .get_mut(&instance.project_id())
            .ok_or(WorkflowStoreError::NotFound(instance.project_id()))?;
        *slot = instance.clone();
        Ok(())
    }

    fn list_incomplete(&self) -> Result<Vec<WorkflowInstance>, WorkflowStoreError> {
        let instances = self.instances.read().map_err(|_| Self::poisoned())?;
        let mut out: Vec<WorkflowInstance> = instances
            .values()
            .filter(|i| !i.state.is_terminal())
            .cloned()
            .collect();
        out.sort_by_key(|i| i.created_at);
        Ok(out)
    }
}
