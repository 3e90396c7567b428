use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use adminhub_core::{TenantId, UserId};
use adminhub_events::Event;

use crate::ProjectId;

pub const PROJECT_AGGREGATE_TYPE: &str = "project";
pub const PROJECT_CREATED: &str = "project.created";

/// Event: ProjectCreated. Triggers provisioning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectCreated {
    pub tenant_id: TenantId,
    pub project_id: ProjectId,
    pub name: String,
    pub created_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

impl Event for ProjectCreated {
    fn event_type(&self) -> &'static str {
        PROJECT_CREATED
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        self.occurred_at
    }
}
