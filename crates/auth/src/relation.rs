use std::borrow::Cow;

use serde::{Deserialize, Serialize};

/// Relation name in a relationship tuple (e.g. "owner", "member").
///
/// Opaque at this layer; which relations imply which is decided by the
/// [`RelationSchema`](crate::RelationSchema).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Relation(Cow<'static, str>);

impl Relation {
    pub const OWNER: Relation = Relation(Cow::Borrowed("owner"));
    pub const EDITOR: Relation = Relation(Cow::Borrowed("editor"));
    pub const VIEWER: Relation = Relation(Cow::Borrowed("viewer"));
    pub const ADMIN: Relation = Relation(Cow::Borrowed("admin"));
    pub const MEMBER: Relation = Relation(Cow::Borrowed("member"));
    /// Links a child object to the object it inherits permissions from.
    pub const PARENT: Relation = Relation(Cow::Borrowed("parent"));

    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for Relation {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&'static str> for Relation {
    fn from(value: &'static str) -> Self {
        Self::new(value)
    }
}
