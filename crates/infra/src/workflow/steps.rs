//! Provisioning steps. Every step must be idempotent: re-running it for the
//! same project converges on the same resources and tuples.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};

use tracing::{debug, info};

use adminhub_auth::{ObjectRef, Relation, RelationshipStore, RelationshipTuple, Subject};
use adminhub_projects::ProjectId;

use super::types::{ProvisioningRequest, StepKind, StepOutcome};

pub trait ProvisioningStep: Send + Sync {
    fn kind(&self) -> StepKind;

    fn run(&self, request: &ProvisioningRequest) -> StepOutcome;
}

impl<T> ProvisioningStep for Arc<T>
where
    T: ProvisioningStep + ?Sized,
{
    fn kind(&self) -> StepKind {
        (**self).kind()
    }

    fn run(&self, request: &ProvisioningRequest) -> StepOutcome {
        (**self).run(request)
    }
}

/// The three steps an engine runs, in order.
#[derive(Clone)]
pub struct WorkflowSteps {
    provision: Arc<dyn ProvisioningStep>,
    permissions: Arc<dyn ProvisioningStep>,
    notify: Arc<dyn ProvisioningStep>,
}

impl WorkflowSteps {
    pub fn new(
        provision: Arc<dyn ProvisioningStep>,
        permissions: Arc<dyn ProvisioningStep>,
        notify: Arc<dyn ProvisioningStep>,
    ) -> Self {
        Self {
            provision,
            permissions,
            notify,
        }
    }

    pub fn get(&self, kind: StepKind) -> &dyn ProvisioningStep {
        match kind {
            StepKind::ProvisionResources => self.provision.as_ref(),
            StepKind::ConfigurePermissions => self.permissions.as_ref(),
            StepKind::SendNotifications => self.notify.as_ref(),
        }
    }
}

impl core::fmt::Debug for WorkflowSteps {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("WorkflowSteps").finish_non_exhaustive()
    }
}

/// Resource ids are pure functions of the project id.
pub fn resource_ids(project_id: ProjectId) -> BTreeMap<String, String> {
    BTreeMap::from([
        ("database".to_string(), format!("db_{project_id}")),
        ("bucket".to_string(), format!("bucket_{project_id}")),
    ])
}

/// Provisions a database and a bucket per project.
///
/// Keeps a registry of what exists; a repeated run returns the existing
/// resources instead of creating new ones.
#[derive(Debug, Default)]
pub struct ResourceProvisioner {
    provisioned: RwLock<HashMap<ProjectId, BTreeMap<String, String>>>,
}

impl ResourceProvisioner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn provisioned(&self, project_id: ProjectId) -> Option<BTreeMap<String, String>> {
        self.provisioned
            .read()
            .ok()
            .and_then(|m| m.get(&project_id).cloned())
    }

    /// Number of projects with resources.
    pub fn provisioned_count(&self) -> usize {
        self.provisioned.read().map(|m| m.len()).unwrap_or(0)
    }
}

impl ProvisioningStep for ResourceProvisioner {
    fn kind(&self) -> StepKind {
        StepKind::ProvisionResources
    }

    fn run(&self, request: &ProvisioningRequest) -> StepOutcome {
        let Ok(mut provisioned) = self.provisioned.write() else {
            return StepOutcome::failed("resource registry unavailable");
        };

        let project_id = request.project_id;
        if let Some(existing) = provisioned.get(&project_id) {
            debug!(%project_id, "resources already provisioned");
            return StepOutcome::Succeeded(existing.clone());
        }

        let ids = resource_ids(project_id);
        provisioned.insert(project_id, ids.clone());
        info!(%project_id, tenant_id = %request.tenant_id, resources = ?ids, "resources provisioned");
        StepOutcome::Succeeded(ids)
    }
}

/// Writes the default relationships of a new project:
/// - `tenant:<t>` as `parent` of the project (tenant admins inherit owner)
/// - `tenant:<t>#member` as `viewer`
/// - the creator as `owner`, repairing a lost post-create grant
#[derive(Debug)]
pub struct PermissionConfigurator<R> {
    relationships: R,
}

impl<R: RelationshipStore> PermissionConfigurator<R> {
    pub fn new(relationships: R) -> Self {
        Self { relationships }
    }

    fn default_tuples(request: &ProvisioningRequest) -> Vec<RelationshipTuple> {
        let tenant = ObjectRef::tenant(request.tenant_id);
        let project = ObjectRef::project(request.project_id.as_aggregate_id());

        let mut tuples = vec![
            RelationshipTuple::new(Subject::object(tenant.clone()), Relation::PARENT, project.clone()),
            RelationshipTuple::new(
                Subject::userset(tenant, Relation::MEMBER),
                Relation::VIEWER,
                project.clone(),
            ),
        ];
        if let Some(creator) = request.requested_by {
            tuples.push(RelationshipTuple::new(Subject::user(creator), Relation::OWNER, project));
        }
        tuples
    }
}

impl<R: RelationshipStore> ProvisioningStep for PermissionConfigurator<R> {
    fn kind(&self) -> StepKind {
        StepKind::ConfigurePermissions
    }

    fn run(&self, request: &ProvisioningRequest) -> StepOutcome {
        let tuples = Self::default_tuples(request);
        let mut written = BTreeMap::new();

        for tuple in tuples {
            let key = format!("{}#{}", tuple.object, tuple.relation);
            let value = tuple.subject.to_string();
            if let Err(e) = self.relationships.write(tuple) {
                return StepOutcome::failed(format!("relationship write failed: {e}"));
            }
            written.insert(key, value);
        }

        debug!(project_id = %request.project_id, tuples = written.len(), "default permissions written");
        StepOutcome::Succeeded(written)
    }
}

/// Notification step that only emits a structured log line.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl ProvisioningStep for LogNotifier {
    fn kind(&self) -> StepKind {
        StepKind::SendNotifications
    }

    fn run(&self, request: &ProvisioningRequest) -> StepOutcome {
        info!(
            tenant_id = %request.tenant_id,
            project_id = %request.project_id,
            "project ready"
        );
        StepOutcome::ok()
    }
}
