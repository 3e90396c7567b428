use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use adminhub_core::{
    AggregateId, AggregateRoot, AuditInfo, DomainError, DomainResult, Entity, ExpectedVersion,
    SoftDelete, TenantId, UserId,
};

use crate::{AddMilestone, CreateProject, Milestone, MilestoneId, ProjectCreated, UpdateProject};

const MAX_NAME_LEN: usize = 200;
const MAX_DESCRIPTION_LEN: usize = 2000;
const MAX_TITLE_LEN: usize = 200;

/// Project identifier (tenant-scoped via the project's `tenant_id`).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProjectId(pub AggregateId);

impl ProjectId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }

    pub fn generate() -> Self {
        Self(AggregateId::new())
    }

    pub fn as_aggregate_id(&self) -> AggregateId {
        self.0
    }
}

impl core::fmt::Display for ProjectId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Aggregate root: Project.
///
/// `version` starts at 1 on creation and grows by one per committed change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    id: ProjectId,
    tenant_id: TenantId,
    name: String,
    description: Option<String>,
    is_deleted: bool,
    audit: AuditInfo,
    version: u64,
    milestones: Vec<Milestone>,
}

impl Project {
    /// Create a project from caller input.
    ///
    /// Identity, tenant and audit fields come from the arguments; the ones
    /// carried by `input` are ignored.
    pub fn create(
        id: ProjectId,
        tenant_id: TenantId,
        by: UserId,
        at: DateTime<Utc>,
        input: &CreateProject,
    ) -> DomainResult<(Self, ProjectCreated)> {
        let name = validate_name(&input.name)?;
        let description = validate_description(input.description.as_deref())?;

        let project = Self {
            id,
            tenant_id,
            name,
            description,
            is_deleted: false,
            audit: AuditInfo::created(by, at),
            version: 1,
            milestones: Vec::new(),
        };
        let event = ProjectCreated {
            tenant_id,
            project_id: id,
            name: project.name.clone(),
            created_by: by,
            occurred_at: at,
        };
        Ok((project, event))
    }

    pub fn id_typed(&self) -> ProjectId {
        self.id
    }

    pub fn tenant_id(&self) -> TenantId {
        self.tenant_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn audit(&self) -> &AuditInfo {
        &self.audit
    }

    /// All milestones, including soft-deleted ones.
    pub fn milestones(&self) -> &[Milestone] {
        &self.milestones
    }

    pub fn active_milestones(&self) -> impl Iterator<Item = &Milestone> {
        self.milestones.iter().filter(|m| !m.is_deleted())
    }

    pub fn update(&mut self, cmd: &UpdateProject, by: UserId, at: DateTime<Utc>) -> DomainResult<()> {
        self.ensure_live()?;
        ExpectedVersion::Exact(cmd.expected_version).check(self.version)?;

        if cmd.name.is_none() && cmd.description.is_none() {
            return Err(DomainError::validation("update must change at least one field"));
        }
        let name = cmd.name.as_deref().map(validate_name).transpose()?;
        let description = match cmd.description.as_deref() {
            Some(d) => Some(validate_description(Some(d))?),
            None => None,
        };

        if let Some(name) = name {
            self.name = name;
        }
        if let Some(description) = description {
            self.description = description;
        }
        self.commit(by, at);
        Ok(())
    }

    pub fn add_milestone(
        &mut self,
        id: MilestoneId,
        cmd: &AddMilestone,
        by: UserId,
        at: DateTime<Utc>,
    ) -> DomainResult<&Milestone> {
        self.ensure_live()?;

        let title = cmd.title.trim();
        if title.is_empty() {
            return Err(DomainError::validation("milestone title cannot be empty"));
        }
        if title.chars().count() > MAX_TITLE_LEN {
            return Err(DomainError::validation(format!(
                "milestone title exceeds {MAX_TITLE_LEN} characters"
            )));
        }
        if self.milestones.iter().any(|m| m.id() == &id) {
            return Err(DomainError::conflict("milestone already exists"));
        }

        self.milestones
            .push(Milestone::new(id, title.to_string(), cmd.due_on));
        self.commit(by, at);
        Ok(&self.milestones[self.milestones.len() - 1])
    }

    fn ensure_live(&self) -> DomainResult<()> {
        if self.is_deleted {
            return Err(DomainError::not_found());
        }
        Ok(())
    }

    fn commit(&mut self, by: UserId, at: DateTime<Utc>) {
        self.audit.touch(by, at);
        self.version += 1;
    }
}

impl AggregateRoot for Project {
    type Id = ProjectId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

impl SoftDelete for Project {
    fn is_deleted(&self) -> bool {
        self.is_deleted
    }

    /// Cascades to every milestone; a second call changes nothing.
    fn mark_deleted(&mut self, by: UserId, at: DateTime<Utc>) {
        if self.is_deleted {
            return;
        }
        self.is_deleted = true;
        for milestone in &mut self.milestones {
            milestone.mark_deleted(by, at);
        }
        self.commit(by, at);
    }
}

fn validate_name(raw: &str) -> DomainResult<String> {
    let name = raw.trim();
    if name.is_empty() {
        return Err(DomainError::validation("name cannot be empty"));
    }
    if name.chars().count() > MAX_NAME_LEN {
        return Err(DomainError::validation(format!(
            "name exceeds {MAX_NAME_LEN} characters"
        )));
    }
    Ok(name.to_string())
}

/// Blank descriptions are stored as absent.
fn validate_description(raw: Option<&str>) -> DomainResult<Option<String>> {
    let Some(description) = raw.map(str::trim).filter(|d| !d.is_empty()) else {
        return Ok(None);
    };
    if description.chars().count() > MAX_DESCRIPTION_LEN {
        return Err(DomainError::validation(format!(
            "description exceeds {MAX_DESCRIPTION_LEN} characters"
        )));
    }
    Ok(Some(description.to_string()))
}
