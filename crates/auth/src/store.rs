use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;

use crate::{ObjectRef, Relation, RelationshipTuple, Subject, TupleFilter};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RelationshipStoreError {
    /// The backend could not be reached or failed mid-operation.
    #[error("relationship backend unavailable: {0}")]
    Unavailable(String),

    /// A stored or supplied tuple could not be interpreted.
    #[error("malformed relationship data: {0}")]
    Malformed(String),
}

/// Result of evaluating a check (never persisted).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "decision", content = "reason", rename_all = "snake_case")]
pub enum CheckOutcome {
    Allowed,
    Denied,
    /// Evaluation failed; callers must treat this as denied.
    EvaluationError(String),
}

impl CheckOutcome {
    pub fn is_allowed(&self) -> bool {
        matches!(self, CheckOutcome::Allowed)
    }
}

/// Tuple storage + check evaluation.
///
/// Contract:
/// - `check` answers `Ok(false)` for absent relationships, never an error
/// - `write` is idempotent: an existing tuple is a successful no-op
/// - `remove` is idempotent: an absent tuple is a successful no-op
/// - all methods are safe to call concurrently
pub trait RelationshipStore: Send + Sync {
    fn check(
        &self,
        subject: &Subject,
        relation: &Relation,
        object: &ObjectRef,
    ) -> Result<bool, RelationshipStoreError>;

    fn write(&self, tuple: RelationshipTuple) -> Result<(), RelationshipStoreError>;

    fn remove(&self, tuple: &RelationshipTuple) -> Result<(), RelationshipStoreError>;

    fn read(&self, filter: &TupleFilter) -> Result<Vec<RelationshipTuple>, RelationshipStoreError>;

    /// Fail-closed decision wrapper around [`check`](Self::check).
    fn decide(&self, subject: &Subject, relation: &Relation, object: &ObjectRef) -> CheckOutcome {
        match self.check(subject, relation, object) {
            Ok(true) => CheckOutcome::Allowed,
            Ok(false) => CheckOutcome::Denied,
            Err(e) => CheckOutcome::EvaluationError(e.to_string()),
        }
    }
}

impl<S> RelationshipStore for Arc<S>
where
    S: RelationshipStore + ?Sized,
{
    fn check(
        &self,
        subject: &Subject,
        relation: &Relation,
        object: &ObjectRef,
    ) -> Result<bool, RelationshipStoreError> {
        (**self).check(subject, relation, object)
    }

    fn write(&self, tuple: RelationshipTuple) -> Result<(), RelationshipStoreError> {
        (**self).write(tuple)
    }

    fn remove(&self, tuple: &RelationshipTuple) -> Result<(), RelationshipStoreError> {
        (**self).remove(tuple)
    }

    fn read(&self, filter: &TupleFilter) -> Result<Vec<RelationshipTuple>, RelationshipStoreError> {
        (**self).read(filter)
    }
}
