//! Relation derivation rules, per object type.
//!
//! Two kinds of rules are supported:
//! - **implication**: holding `owner` on a project implies `editor` on it
//! - **inheritance**: holding `admin` on the object linked through a
//!   `parent` tuple implies `owner` on the child

use std::collections::HashMap;

use crate::Relation;

/// "Relation `relation` on the object reached through `via` grants the target relation".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InheritRule {
    pub via: Relation,
    pub relation: Relation,
}

/// Rules for one object type.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TypeDefinition {
    /// relation -> stronger relations that imply it
    implied_by: HashMap<Relation, Vec<Relation>>,
    /// relation -> inheritance rules that grant it
    inherited: HashMap<Relation, Vec<InheritRule>>,
}

impl TypeDefinition {
    pub fn implied_by(&self, relation: &Relation) -> &[Relation] {
        self.implied_by.get(relation).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn inherited(&self, relation: &Relation) -> &[InheritRule] {
        self.inherited.get(relation).map(Vec::as_slice).unwrap_or(&[])
    }
}

/// Authorization model: which relations derive from which.
///
/// Types without a definition only answer direct and userset checks.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RelationSchema {
    types: HashMap<String, TypeDefinition>,
}

impl RelationSchema {
    pub fn new() -> Self {
        Self::default()
    }

    /// `stronger` on an object of `object_type` implies `relation` on it.
    pub fn imply(
        mut self,
        object_type: &str,
        relation: Relation,
        stronger: Relation,
    ) -> Self {
        self.types
            .entry(object_type.to_string())
            .or_default()
            .implied_by
            .entry(relation)
            .or_default()
            .push(stronger);
        self
    }

    /// `parent_relation` on the object linked via `via` implies `relation`.
    pub fn inherit(
        mut self,
        object_type: &str,
        relation: Relation,
        via: Relation,
        parent_relation: Relation,
    ) -> Self {
        self.types
            .entry(object_type.to_string())
            .or_default()
            .inherited
            .entry(relation)
            .or_default()
            .push(InheritRule {
                via,
                relation: parent_relation,
            });
        self
    }

    pub fn definition(&self, object_type: &str) -> Option<&TypeDefinition> {
        self.types.get(object_type)
    }

    /// The admin-service model.
    ///
    /// - tenant: `admin ⇒ member`
    /// - project: `owner ⇒ editor ⇒ viewer`, parent tenant `admin ⇒ owner`
    pub fn admin_default() -> Self {
        Self::new()
            .imply("tenant", Relation::MEMBER, Relation::ADMIN)
            .imply("project", Relation::EDITOR, Relation::OWNER)
            .imply("project", Relation::VIEWER, Relation::EDITOR)
            .inherit("project", Relation::OWNER, Relation::PARENT, Relation::ADMIN)
    }
}
