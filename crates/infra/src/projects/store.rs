use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use thiserror::Error;

use adminhub_core::{AggregateRoot, ExpectedVersion, TenantId};
use adminhub_projects::{Project, ProjectId};

use crate::outbox::{OutboxError, OutboxRecord, OutboxStore};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProjectStoreError {
    #[error("project already exists: {0}")]
    AlreadyExists(ProjectId),

    #[error("project not found: {0}")]
    NotFound(ProjectId),

    /// Stored version differs from the expected one.
    #[error("version conflict on project {id} (expected: {expected:?}, actual: {actual})")]
    Conflict {
        id: ProjectId,
        expected: ExpectedVersion,
        actual: u64,
    },

    #[error(transparent)]
    Outbox(#[from] OutboxError),

    #[error("project storage error: {0}")]
    Storage(String),
}

/// Tenant-isolated project persistence.
///
/// Every lookup is keyed by `(tenant_id, project_id)`; a project of another
/// tenant is indistinguishable from an absent one.
pub trait ProjectStore: Send + Sync {
    /// Persist a new project together with its creation outbox record, or
    /// neither.
    fn insert(&self, project: &Project, created: OutboxRecord) -> Result<(), ProjectStoreError>;

    fn get(&self, tenant_id: TenantId, id: ProjectId) -> Result<Option<Project>, ProjectStoreError>;

    /// All projects of the tenant, soft-deleted ones included, oldest first.
    fn list(&self, tenant_id: TenantId) -> Result<Vec<Project>, ProjectStoreError>;

    /// Compare-and-set write: succeeds only if the stored version matches
    /// `expected`.
    fn save(&self, project: &Project, expected: ExpectedVersion) -> Result<(), ProjectStoreError>;
}

impl<S> ProjectStore for Arc<S>
where
    S: ProjectStore + ?Sized,
{
    fn insert(&self, project: &Project, created: OutboxRecord) -> Result<(), ProjectStoreError> {
        (**self).insert(project, created)
    }

    fn get(&self, tenant_id: TenantId, id: ProjectId) -> Result<Option<Project>, ProjectStoreError> {
        (**self).get(tenant_id, id)
    }

    fn list(&self, tenant_id: TenantId) -> Result<Vec<Project>, ProjectStoreError> {
        (**self).list(tenant_id)
    }

    fn save(&self, project: &Project, expected: ExpectedVersion) -> Result<(), ProjectStoreError> {
        (**self).save(project, expected)
    }
}

/// In-memory project store for tests/dev.
///
/// The outbox append happens under the projects write lock, before the
/// insert: readers never observe a project whose creation record is missing.
#[derive(Debug)]
pub struct InMemoryProjectStore<O> {
    projects: RwLock<HashMap<(TenantId, ProjectId), Project>>,
    outbox: O,
}

impl<O: OutboxStore> InMemoryProjectStore<O> {
    pub fn new(outbox: O) -> Self {
        Self {
            projects: RwLock::new(HashMap::new()),
            outbox,
        }
    }

    pub fn outbox(&self) -> &O {
        &self.outbox
    }

    fn poisoned() -> ProjectStoreError {
        ProjectStoreError::Storage("lock poisoned".to_string())
    }
}

impl<O: OutboxStore> ProjectStore for InMemoryProjectStore<O> {
    fn insert(&self, project: &Project, created: OutboxRecord) -> Result<(), ProjectStoreError> {
        let mut projects = self.projects.write().map_err(|_| Self::poisoned())?;
        let key = (project.tenant_id(), project.id_typed());
        if projects.contains_key(&key) {
            return Err(ProjectStoreError::AlreadyExists(project.id_typed()));
        }

        self.outbox.append(created)?;
        projects.insert(key, project.clone());
        Ok(())
    }

    fn get(&self, tenant_id: TenantId, id: ProjectId) -> Result<Option<Project>, ProjectStoreError> {
        let projects = self.projects.read().map_err(|_| Self::poisoned())?;
        Ok(projects.get(&(tenant_id, id)).cloned())
    }

    fn list(&self, tenant_id: TenantId) -> Result<Vec<Project>, ProjectStoreError> {
        let projects = self.projects.read().map_err(|_| Self::poisoned())?;
        let mut out: Vec<Project> = projects
            .iter()
            .filter(|((t, _), _)| *t == tenant_id)
            .map(|(_, p)| p.clone())
            .collect();
        out.sort_by_key(|p| (p.audit().created_at, p.id_typed()));
        Ok(out)
    }

    fn save(&self, project: &Project, expected: ExpectedVersion) -> Result<(), ProjectStoreError> {
        let mut projects = self.projects.write().map_err(|_| Self::poisoned())?;
        let key = (project.tenant_id(), project.id_typed());
        let current = projects
            .get_mut(&key)
            .ok_or(ProjectStoreError::NotFound(project.id_typed()))?;

        if !expected.matches(current.version()) {
            return Err(ProjectStoreError::Conflict {
                id: project.id_typed(),
                expected,
                actual: current.version(),
            });
        }
        *current = project.clone();
        Ok(())
    }
}
