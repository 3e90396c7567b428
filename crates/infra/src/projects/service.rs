//! Project lifecycle: gated, tenant-scoped create/read/update/delete.
//!
//! ```text
//! create:  check member on tenant -> insert project + outbox record -> grant owner
//! update:  load (tenant-scoped) -> check editor on project -> compare-and-set
//! delete:  load (tenant-scoped) -> check owner on project -> soft delete (cascade)
//! ```
//!
//! Loads happen before checks so a foreign or missing project always
//! answers `NotFound`, never `Forbidden`.

use chrono::Utc;
use thiserror::Error;
use tracing::{debug, info};

use adminhub_auth::{
    AuthError, AuthorizationGate, GateError, ObjectRef, OwnedResource, Relation,
    RelationshipStore, RequestContext, Requirement,
};
use adminhub_core::{AggregateId, AggregateRoot, DomainError, ExpectedVersion, SoftDelete};
use adminhub_projects::{
    AddMilestone, CreateProject, MilestoneId, PROJECT_AGGREGATE_TYPE, Project, ProjectId,
    UpdateProject,
};

use super::store::{ProjectStore, ProjectStoreError};
use crate::outbox::{OutboxError, OutboxRecord};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ServiceError {
    #[error(transparent)]
    Auth(#[from] AuthError),

    /// Absent, soft-deleted or owned by another tenant.
    #[error("not found")]
    NotFound,

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("store error: {0}")]
    Store(String),
}

impl ServiceError {
    /// HTTP-equivalent status code.
    pub fn http_status(&self) -> u16 {
        match self {
            ServiceError::Auth(e) => e.http_status(),
            ServiceError::NotFound => 404,
            ServiceError::Conflict(_) => 409,
            ServiceError::Validation(_) => 400,
            ServiceError::Store(_) => 500,
        }
    }
}

impl From<DomainError> for ServiceError {
    fn from(value: DomainError) -> Self {
        match value {
            DomainError::Validation(msg) | DomainError::InvalidId(msg) => ServiceError::Validation(msg),
            DomainError::InvariantViolation(msg) => ServiceError::Validation(msg),
            DomainError::Conflict(msg) => ServiceError::Conflict(msg),
            DomainError::NotFound => ServiceError::NotFound,
        }
    }
}

impl From<ProjectStoreError> for ServiceError {
    fn from(value: ProjectStoreError) -> Self {
        match value {
            ProjectStoreError::NotFound(_) => ServiceError::NotFound,
            ProjectStoreError::Conflict { .. } => ServiceError::Conflict(value.to_string()),
            other => ServiceError::Store(other.to_string()),
        }
    }
}

impl From<OutboxError> for ServiceError {
    fn from(value: OutboxError) -> Self {
        ServiceError::Store(value.to_string())
    }
}

impl From<GateError<ServiceError>> for ServiceError {
    fn from(value: GateError<ServiceError>) -> Self {
        match value {
            GateError::Auth(e) => ServiceError::Auth(e),
            GateError::Mutation(e) => e,
        }
    }
}

struct CreatedProject(Project);

impl OwnedResource for CreatedProject {
    fn resource(&self) -> ObjectRef {
        ObjectRef::project(self.0.id_typed().as_aggregate_id())
    }
}

pub struct ProjectService<S, R> {
    store: S,
    gate: AuthorizationGate<R>,
}

impl<S, R> ProjectService<S, R>
where
    S: ProjectStore,
    R: RelationshipStore,
{
    pub fn new(store: S, gate: AuthorizationGate<R>) -> Self {
        Self { store, gate }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Create a project in the caller's tenant; the caller becomes owner.
    pub fn create(&self, ctx: &RequestContext, input: CreateProject) -> Result<Project, ServiceError> {
        let requirement = Requirement::new(Relation::MEMBER, ObjectRef::tenant(ctx.tenant_id));

        let created = self.gate.execute(ctx, &requirement, |ctx| {
            let id = ProjectId::generate();
            let (project, event) =
                Project::create(id, ctx.tenant_id, ctx.user_id, Utc::now(), &input)?;
            let record = OutboxRecord::from_event(
                ctx.tenant_id,
                id.as_aggregate_id(),
                PROJECT_AGGREGATE_TYPE,
                &event,
            )?;
            self.store.insert(&project, record)?;
            Ok::<_, ServiceError>(CreatedProject(project))
        })?;

        let project = created.0;
        info!(
            tenant_id = %project.tenant_id(),
            project_id = %project.id_typed(),
            created_by = %ctx.user_id,
            "project created"
        );
        Ok(project)
    }

    pub fn get(
        &self,
        ctx: &RequestContext,
        id: ProjectId,
        include_deleted: bool,
    ) -> Result<Project, ServiceError> {
        self.store
            .get(ctx.tenant_id, id)?
            .filter(|p| include_deleted || !p.is_deleted())
            .ok_or(ServiceError::NotFound)
    }

    pub fn list(&self, ctx: &RequestContext, include_deleted: bool) -> Result<Vec<Project>, ServiceError> {
        let mut projects = self.store.list(ctx.tenant_id)?;
        if !include_deleted {
            projects.retain(|p| !p.is_deleted());
        }
        Ok(projects)
    }

    /// Requires `editor`. A stale `expected_version` is a `Conflict`.
    pub fn update(
        &self,
        ctx: &RequestContext,
        id: ProjectId,
        cmd: UpdateProject,
    ) -> Result<Project, ServiceError> {
        let mut project = self.get(ctx, id, false)?;
        let loaded_version = project.version();

        let updated = self.gate.guard(ctx, &editor_on(id), |ctx| {
            project.update(&cmd, ctx.user_id, Utc::now())?;
            self.store.save(&project, ExpectedVersion::Exact(loaded_version))?;
            Ok::<_, ServiceError>(project)
        })?;

        debug!(project_id = %id, version = updated.version(), "project updated");
        Ok(updated)
    }

    /// Requires `owner`. Soft-deletes the project and its milestones in one
    /// write; deleting an already deleted project answers `NotFound`.
    pub fn delete(&self, ctx: &RequestContext, id: ProjectId) -> Result<(), ServiceError> {
        let mut project = self.get(ctx, id, false)?;
        let loaded_version = project.version();
        let requirement = Requirement::new(Relation::OWNER, project_object(id));

        self.gate.guard(ctx, &requirement, |ctx| {
            project.mark_deleted(ctx.user_id, Utc::now());
            self.store.save(&project, ExpectedVersion::Exact(loaded_version))?;
            Ok::<_, ServiceError>(())
        })?;

        info!(tenant_id = %ctx.tenant_id, project_id = %id, "project soft-deleted");
        Ok(())
    }

    /// Requires `editor`.
    pub fn add_milestone(
        &self,
        ctx: &RequestContext,
        project_id: ProjectId,
        cmd: AddMilestone,
    ) -> Result<Project, ServiceError> {
        let mut project = self.get(ctx, project_id, false)?;
        let loaded_version = project.version();

        let updated = self.gate.guard(ctx, &editor_on(project_id), |ctx| {
            let milestone_id = MilestoneId::new(AggregateId::new());
            project.add_milestone(milestone_id, &cmd, ctx.user_id, Utc::now())?;
            self.store.save(&project, ExpectedVersion::Exact(loaded_version))?;
            Ok::<_, ServiceError>(project)
        })?;

        debug!(project_id = %project_id, "milestone added");
        Ok(updated)
    }
}

fn project_object(id: ProjectId) -> ObjectRef {
    ObjectRef::project(id.as_aggregate_id())
}

fn editor_on(id: ProjectId) -> Requirement {
    Requirement::new(Relation::EDITOR, project_object(id))
}
