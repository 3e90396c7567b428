//! Relationship tuples: `(subject, relation, object)` facts.
//!
//! Textual forms follow the usual ReBAC conventions:
//! - object: `project:0190...`
//! - subject: `user:<uuid>`, `tenant:<id>` (object as subject, for parent
//!   links) or `tenant:<id>#member` (userset)

use core::str::FromStr;

use serde::{Deserialize, Serialize};

use adminhub_core::{AggregateId, TenantId, UserId};

use crate::Relation;
use crate::store::RelationshipStoreError;

const USER_TYPE: &str = "user";

/// A typed object reference (`type:id`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectRef {
    pub object_type: String,
    pub object_id: String,
}

impl ObjectRef {
    pub fn new(object_type: impl Into<String>, object_id: impl Into<String>) -> Self {
        Self {
            object_type: object_type.into(),
            object_id: object_id.into(),
        }
    }

    pub fn tenant(tenant_id: TenantId) -> Self {
        Self::new("tenant", tenant_id.to_string())
    }

    pub fn project(project_id: AggregateId) -> Self {
        Self::new("project", project_id.to_string())
    }
}

impl core::fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}:{}", self.object_type, self.object_id)
    }
}

impl FromStr for ObjectRef {
    type Err = RelationshipStoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (object_type, object_id) = s
            .split_once(':')
            .ok_or_else(|| RelationshipStoreError::Malformed(format!("object '{s}'")))?;
        if object_type.is_empty() || object_id.is_empty() || object_id.contains('#') {
            return Err(RelationshipStoreError::Malformed(format!("object '{s}'")));
        }
        Ok(Self::new(object_type, object_id))
    }
}

/// The subject side of a tuple.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Subject {
    /// An authenticated user.
    User { id: UserId },
    /// An object acting as subject (used by `parent` links).
    Object { object: ObjectRef },
    /// Everyone holding `relation` on `object`.
    Userset { object: ObjectRef, relation: Relation },
}

impl Subject {
    pub fn user(id: UserId) -> Self {
        Self::User { id }
    }

    pub fn object(object: ObjectRef) -> Self {
        Self::Object { object }
    }

    pub fn userset(object: ObjectRef, relation: Relation) -> Self {
        Self::Userset { object, relation }
    }
}

impl core::fmt::Display for Subject {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Subject::User { id } => write!(f, "{USER_TYPE}:{id}"),
            Subject::Object { object } => write!(f, "{object}"),
            Subject::Userset { object, relation } => write!(f, "{object}#{relation}"),
        }
    }
}

impl FromStr for Subject {
    type Err = RelationshipStoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some((object, relation)) = s.split_once('#') {
            if relation.is_empty() {
                return Err(RelationshipStoreError::Malformed(format!("subject '{s}'")));
            }
            return Ok(Subject::userset(
                object.parse()?,
                Relation::new(relation.to_string()),
            ));
        }

        let object: ObjectRef = s.parse()?;
        if object.object_type == USER_TYPE {
            let id = UserId::from_str(&object.object_id)
                .map_err(|e| RelationshipStoreError::Malformed(e.to_string()))?;
            return Ok(Subject::user(id));
        }
        Ok(Subject::object(object))
    }
}

/// A single relationship fact.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RelationshipTuple {
    pub subject: Subject,
    pub relation: Relation,
    pub object: ObjectRef,
}

impl RelationshipTuple {
    pub fn new(subject: Subject, relation: Relation, object: ObjectRef) -> Self {
        Self {
            subject,
            relation,
            object,
        }
    }
}

impl core::fmt::Display for RelationshipTuple {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}#{}@{}", self.object, self.relation, self.subject)
    }
}

/// Optional-field filter for listing tuples.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TupleFilter {
    pub subject: Option<Subject>,
    pub relation: Option<Relation>,
    pub object: Option<ObjectRef>,
}

impl TupleFilter {
    pub fn for_object(object: ObjectRef) -> Self {
        Self {
            object: Some(object),
            ..Self::default()
        }
    }

    pub fn matches(&self, tuple: &RelationshipTuple) -> bool {
        self.subject.as_ref().is_none_or(|s| *s == tuple.subject)
            && self.relation.as_ref().is_none_or(|r| *r == tuple.relation)
            && self.object.as_ref().is_none_or(|o| *o == tuple.object)
    }
}
