//! Check evaluation shared by every backend.
//!
//! A check `(subject, relation, object)` succeeds when any of these holds:
//! 1. the tuple is stored directly
//! 2. a stronger relation on the same object holds (schema implication)
//! 3. a userset subject stored on `(relation, object)` contains the subject
//! 4. an inheritance rule holds on an object linked through `via`
//!
//! Evaluation is depth-bounded and cycle-safe; hitting either bound answers
//! `false` for that branch.

use std::collections::HashSet;

use tracing::trace;

use crate::{ObjectRef, Relation, RelationSchema, RelationshipStoreError, RelationshipTuple, Subject};

/// Maximum recursion depth of a single check.
pub const MAX_CHECK_DEPTH: u32 = 16;

/// Read access to stored tuples, as needed by [`evaluate`].
pub trait TupleReader {
    fn contains(&self, tuple: &RelationshipTuple) -> Result<bool, RelationshipStoreError>;

    /// Subjects stored on `(relation, object)`.
    fn subjects_of(
        &self,
        relation: &Relation,
        object: &ObjectRef,
    ) -> Result<Vec<Subject>, RelationshipStoreError>;
}

/// Evaluate a check against `reader` using `schema`.
pub fn evaluate<R>(
    reader: &R,
    schema: &RelationSchema,
    subject: &Subject,
    relation: &Relation,
    object: &ObjectRef,
) -> Result<bool, RelationshipStoreError>
where
    R: TupleReader + ?Sized,
{
    let mut visited = HashSet::new();
    Evaluator {
        reader,
        schema,
        subject,
        visited: &mut visited,
    }
    .check(relation, object, 0)
}

struct Evaluator<'a, R: ?Sized> {
    reader: &'a R,
    schema: &'a RelationSchema,
    subject: &'a Subject,
    visited: &'a mut HashSet<(Relation, ObjectRef)>,
}

impl<R> Evaluator<'_, R>
where
    R: TupleReader + ?Sized,
{
    fn check(
        &mut self,
        relation: &Relation,
        object: &ObjectRef,
        depth: u32,
    ) -> Result<bool, RelationshipStoreError> {
        if depth > MAX_CHECK_DEPTH {
            trace!(%relation, %object, "check depth exceeded");
            return Ok(false);
        }
        if !self.visited.insert((relation.clone(), object.clone())) {
            return Ok(false);
        }

        let direct = RelationshipTuple::new(self.subject.clone(), relation.clone(), object.clone());
        if self.reader.contains(&direct)? {
            return Ok(true);
        }

        let schema = self.schema;
        let definition = schema.definition(&object.object_type);

        if let Some(def) = definition {
            for stronger in def.implied_by(relation) {
                if self.check(stronger, object, depth + 1)? {
                    return Ok(true);
                }
            }
        }

        for stored in self.reader.subjects_of(relation, object)? {
            if let Subject::Userset {
                object: set_object,
                relation: set_relation,
            } = stored
            {
                if self.check(&set_relation, &set_object, depth + 1)? {
                    return Ok(true);
                }
            }
        }

        if let Some(def) = definition {
            for rule in def.inherited(relation) {
                for linked in self.reader.subjects_of(&rule.via, object)? {
                    if let Subject::Object { object: parent } = linked {
                        if self.check(&rule.relation, &parent, depth + 1)? {
                            return Ok(true);
                        }
                    }
                }
            }
        }

        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use adminhub_core::UserId;

    use super::*;

    struct Tuples(HashSet<RelationshipTuple>);

    impl TupleReader for Tuples {
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

    struct Broken;

    impl TupleReader for Broken {
        fn contains(&self, _tuple: &RelationshipTuple) -> Result<bool, RelationshipStoreError> {
            Err(RelationshipStoreError::Unavailable("down".to_string()))
        }

        fn subjects_of(
            &self,
            _relation: &Relation,
            _object: &ObjectRef,
        ) -> Result<Vec<Subject>, RelationshipStoreError> {
            Err(RelationshipStoreError::Unavailable("down".to_string()))
        }
    }

    fn tuple(subject: Subject, relation: Relation, object: ObjectRef) -> RelationshipTuple {
        RelationshipTuple::new(subject, relation, object)
    }

    #[test]
    fn implied_and_inherited_relations_resolve() {
        let schema = RelationSchema::admin_default();
        let admin = Subject::user(UserId::new());
        let tenant = ObjectRef::new("tenant", "t1");
        let project = ObjectRef::new("project", "p1");

        let reader = Tuples(HashSet::from([
            tuple(admin.clone(), Relation::ADMIN, tenant.clone()),
            tuple(Subject::object(tenant.clone()), Relation::PARENT, project.clone()),
        ]));

        // admin on parent tenant -> owner -> editor -> viewer on the project
        for rel in [Relation::OWNER, Relation::EDITOR, Relation::VIEWER] {
            assert!(evaluate(&reader, &schema, &admin, &rel, &project).unwrap());
        }
        assert!(evaluate(&reader, &schema, &admin, &Relation::MEMBER, &tenant).unwrap());
    }

    #[test]
    fn userset_grants_members_only() {
        let schema = RelationSchema::admin_default();
        let member = Subject::user(UserId::new());
        let outsider = Subject::user(UserId::new());
        let tenant = ObjectRef::new("tenant", "t1");
        let project = ObjectRef::new("project", "p1");

        let reader = Tuples(HashSet::from([
            tuple(member.clone(), Relation::MEMBER, tenant.clone()),
            tuple(
                Subject::userset(tenant.clone(), Relation::MEMBER),
                Relation::VIEWER,
                project.clone(),
            ),
        ]));

        assert!(evaluate(&reader, &schema, &member, &Relation::VIEWER, &project).unwrap());
        assert!(!evaluate(&reader, &schema, &member, &Relation::EDITOR, &project).unwrap());
        assert!(!evaluate(&reader, &schema, &outsider, &Relation::VIEWER, &project).unwrap());
    }

    #[test]
    fn userset_cycles_terminate() {
        let schema = RelationSchema::new();
        let user = Subject::user(UserId::new());
        let a = ObjectRef::new("group", "a");
        let b = ObjectRef::new("group", "b");

        let reader = Tuples(HashSet::from([
            tuple(Subject::userset(b.clone(), Relation::MEMBER), Relation::MEMBER, a.clone()),
            tuple(Subject::userset(a.clone(), Relation::MEMBER), Relation::MEMBER, b.clone()),
        ]));

        assert!(!evaluate(&reader, &schema, &user, &Relation::MEMBER, &a).unwrap());
    }

    #[test]
    fn backend_errors_propagate() {
        let schema = RelationSchema::admin_default();
        let err = evaluate(
            &Broken,
            &schema,
            &Subject::user(UserId::new()),
            &Relation::VIEWER,
            &ObjectRef::new("project", "p1"),
        )
        .unwrap_err();
        assert!(matches!(err, RelationshipStoreError::Unavailable(_)));
    }
}
