use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use adminhub_core::{AggregateId, Entity, SoftDelete, UserId};

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MilestoneId(pub AggregateId);

impl MilestoneId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for MilestoneId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Child entity of a project; lives and dies with it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Milestone {
    id: MilestoneId,
    title: String,
    due_on: Option<NaiveDate>,
    is_deleted: bool,
}

impl Milestone {
    pub(crate) fn new(id: MilestoneId, title: String, due_on: Option<NaiveDate>) -> Self {
        Self {
            id,
            title,
            due_on,
            is_deleted: false,
        }
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn due_on(&self) -> Option<NaiveDate> {
        self.due_on
    }
}

impl Entity for Milestone {
    type Id = MilestoneId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

impl SoftDelete for Milestone {
    fn is_deleted(&self) -> bool {
        self.is_deleted
    }

    // Milestones carry no audit fields of their own.
    fn mark_deleted(&mut self, _by: UserId, _at: DateTime<Utc>) {
        self.is_deleted = true;
    }
}
