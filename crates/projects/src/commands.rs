use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use adminhub_core::{AggregateId, TenantId, UserId};

/// Input: create a project.
///
/// `id`, `tenant_id`, `created_by` and `created_at` are accepted so existing
/// clients can keep sending them, but they are discarded: all four are
/// assigned server-side.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CreateProject {
    #[serde(default)]
    pub id: Option<AggregateId>,
    #[serde(default)]
    pub tenant_id: Option<TenantId>,
    #[serde(default)]
    pub created_by: Option<UserId>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,

    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
}

impl CreateProject {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }
}

/// Input: partial update guarded by the version the caller last read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateProject {
    pub expected_version: u64,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

/// Input: attach a milestone to a project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddMilestone {
    pub title: String,
    #[serde(default)]
    pub due_on: Option<NaiveDate>,
}
