//! Entity trait, audit metadata and soft-delete support.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::id::UserId;

/// Entity marker + minimal interface.
pub trait Entity {
    /// Strongly-typed entity identifier.
    type Id: Clone + Eq + core::hash::Hash + core::fmt::Debug;

    /// Returns the entity identifier.
    fn id(&self) -> &Self::Id;
}

/// Entities that are marked inactive instead of being physically removed.
pub trait SoftDelete {
    fn is_deleted(&self) -> bool;

    /// Flag the entity as deleted. Must be idempotent.
    fn mark_deleted(&mut self, by: UserId, at: DateTime<Utc>);
}

/// Audit fields stamped server-side on every write.
///
/// Never populated from caller input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditInfo {
    pub created_by: UserId,
    pub created_at: DateTime<Utc>,
    pub updated_by: UserId,
    pub updated_at: DateTime<Utc>,
}

impl AuditInfo {
    pub fn created(by: UserId, at: DateTime<Utc>) -> Self {
        Self {
            created_by: by,
            created_at: at,
            updated_by: by,
            updated_at: at,
        }
    }

    pub fn touch(&mut self, by: UserId, at: DateTime<Utc>) {
        self.updated_by = by;
        self.updated_at = at;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn touch_keeps_creation_fields() {
        let creator = UserId::new();
        let editor = UserId::new();
        let t0 = Utc::now();
        let mut audit = AuditInfo::created(creator, t0);

        let t1 = t0 + chrono::Duration::seconds(5);
        audit.touch(editor, t1);

        assert_eq!(audit.created_by, creator);
        assert_eq!(audit.created_at, t0);
        assert_eq!(audit.updated_by, editor);
        assert_eq!(audit.updated_at, t1);
    }
}
