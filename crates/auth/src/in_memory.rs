//! In-memory relationship store for tests/dev.

use std::collections::HashSet;
use std::sync::{Arc, RwLock};

use tracing::debug;

use crate::check::{TupleReader, evaluate};
use crate::{
    ObjectRef, Relation, RelationSchema, RelationshipStore, RelationshipStoreError,
    RelationshipTuple, Subject, TupleFilter,
};

/// Relationship store backed by a `HashSet` behind a `RwLock`.
///
/// Set semantics give idempotent writes and removes for free; a check runs
/// against a single consistent read guard.
#[derive(Debug)]
pub struct InMemoryRelationshipStore {
    tuples: RwLock<HashSet<RelationshipTuple>>,
    schema: Arc<RelationSchema>,
}

impl InMemoryRelationshipStore {
    pub fn new(schema: RelationSchema) -> Self {
        Self {
            tuples: RwLock::new(HashSet::new()),
            schema: Arc::new(schema),
        }
    }

    pub fn len(&self) -> usize {
        self.tuples.read().map(|t| t.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn poisoned() -> RelationshipStoreError {
        RelationshipStoreError::Unavailable("lock poisoned".to_string())
    }
}

impl Default for InMemoryRelationshipStore {
    fn default() -> Self {
        Self::new(RelationSchema::admin_default())
    }
}

struct Snapshot<'a>(&'a HashSet<RelationshipTuple>);

impl TupleReader for Snapshot<'_> {
    fn contains(&self, tuple: &RelationshipTuple) -> Result<bool, RelationshipStoreError> {
        Ok(self.0.contains(tuple))
    }

    fn subjects_of(
        &self,
        relation: &Relation,
        object: &ObjectRef,
    ) -> Result<Vec<Subject>, RelationshipStoreError> {
        Ok(self
            .0
            .iter()
            .filter(|t| t.relation == *relation && t.object == *object)
            .map(|t| t.subject.clone())
            .collect())
    }
}

impl RelationshipStore for InMemoryRelationshipStore {
    fn check(
        &self,
        subject: &Subject,
        relation: &Relation,
        object: &ObjectRef,
    ) -> Result<bool, RelationshipStoreError> {
        let tuples = self.tuples.read().map_err(|_| Self::poisoned())?;
        evaluate(&Snapshot(&tuples), &self.schema, subject, relation, object)
    }

    fn write(&self, tuple: RelationshipTuple) -> Result<(), RelationshipStoreError> {
        let mut tuples = self.tuples.write().map_err(|_| Self::poisoned())?;
        let rendered = tuple.to_string();
        if tuples.insert(tuple) {
            debug!(tuple = %rendered, "relationship written");
        }
        Ok(())
    }

    fn remove(&self, tuple: &RelationshipTuple) -> Result<(), RelationshipStoreError> {
        let mut tuples = self.tuples.write().map_err(|_| Self::poisoned())?;
        if tuples.remove(tuple) {
            debug!(%tuple, "relationship removed");
        }
        Ok(())
    }

    fn read(&self, filter: &TupleFilter) -> Result<Vec<RelationshipTuple>, RelationshipStoreError> {
        let tuples = self.tuples.read().map_err(|_| Self::poisoned())?;
        let mut out: Vec<RelationshipTuple> =
            tuples.iter().filter(|t| filter.matches(t)).cloned().collect();
        out.sort();
        Ok(out)
    }
}
