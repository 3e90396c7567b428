//! Authorization gate around mutating operations.
//!
//! Every gated call runs three steps in order, none skippable:
//! 1. resolve the caller (`authenticate`, or an already-built [`RequestContext`])
//! 2. check the required relation; denied or unevaluable stops the call
//! 3. after a committed creation, grant `owner` on the new resource
//!
//! Step 3 is best-effort: a failed grant is logged, never surfaced.

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::{
    AuthClaims, AuthError, CheckOutcome, ObjectRef, Relation, RelationshipStore,
    RelationshipStoreError, RelationshipTuple, RequestContext,
};

/// Relation the caller must hold on an object before the mutation runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Requirement {
    pub relation: Relation,
    pub object: ObjectRef,
}

impl Requirement {
    pub fn new(relation: Relation, object: ObjectRef) -> Self {
        Self { relation, object }
    }
}

/// Implemented by mutation results that created a new resource.
pub trait OwnedResource {
    fn resource(&self) -> ObjectRef;
}

#[derive(Debug, Error)]
pub enum GateError<E> {
    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error("{0}")]
    Mutation(E),
}

/// Post-write ownership grant that did not persist.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("owner grant on {resource} failed: {source}")]
pub struct GrantFailure {
    pub resource: ObjectRef,
    #[source]
    pub source: RelationshipStoreError,
}

#[derive(Debug, Clone)]
pub struct AuthorizationGate<R> {
    store: R,
}

impl<R> AuthorizationGate<R>
where
    R: RelationshipStore,
{
    pub fn new(store: R) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &R {
        &self.store
    }

    pub fn authenticate(
        &self,
        claims: &AuthClaims,
        now: DateTime<Utc>,
    ) -> Result<RequestContext, AuthError> {
        RequestContext::from_claims(claims, now).inspect_err(|e| {
            info!(error = %e, "authentication rejected");
        })
    }

    pub fn authorize(&self, ctx: &RequestContext, requirement: &Requirement) -> Result<(), AuthError> {
        let subject = ctx.subject();
        match self
            .store
            .decide(&subject, &requirement.relation, &requirement.object)
        {
            CheckOutcome::Allowed => {
                debug!(
                    %subject,
                    relation = %requirement.relation,
                    object = %requirement.object,
                    "check allowed"
                );
                Ok(())
            }
            CheckOutcome::Denied => {
                info!(
                    %subject,
                    relation = %requirement.relation,
                    object = %requirement.object,
                    "check denied"
                );
                Err(AuthError::authorization(format!(
                    "missing '{}' on {}",
                    requirement.relation, requirement.object
                )))
            }
            CheckOutcome::EvaluationError(reason) => {
                warn!(
                    %subject,
                    relation = %requirement.relation,
                    object = %requirement.object,
                    %reason,
                    "check could not be evaluated; denying"
                );
                Err(AuthError::authorization("authorization unavailable"))
            }
        }
    }

    pub fn grant_owner(&self, ctx: &RequestContext, resource: &ObjectRef) -> Result<(), GrantFailure> {
        let tuple = RelationshipTuple::new(ctx.subject(), Relation::OWNER, resource.clone());
        self.store.write(tuple).map_err(|source| GrantFailure {
            resource: resource.clone(),
            source,
        })
    }

    /// Gate a mutation that does not create a resource.
    pub fn guard<T, E, F>(
        &self,
        ctx: &RequestContext,
        requirement: &Requirement,
        mutation: F,
    ) -> Result<T, GateError<E>>
    where
        F: FnOnce(&RequestContext) -> Result<T, E>,
    {
        self.authorize(ctx, requirement)?;
        mutation(ctx).map_err(GateError::Mutation)
    }

    /// Gate a creating mutation; the caller becomes `owner` of the result.
    ///
    /// `requirement` targets the collection (e.g. the tenant), never the
    /// resource about to be created.
    pub fn execute<T, E, F>(
        &self,
        ctx: &RequestContext,
        requirement: &Requirement,
        mutation: F,
    ) -> Result<T, GateError<E>>
    where
        T: OwnedResource,
        F: FnOnce(&RequestContext) -> Result<T, E>,
    {
        let created = self.guard(ctx, requirement, mutation)?;

        let resource = created.resource();
        match self.grant_owner(ctx, &resource) {
            Ok(()) => debug!(user_id = %ctx.user_id, %resource, "owner granted"),
            Err(failure) => warn!(user_id = %ctx.user_id, error = %failure, "grant failure"),
        }
        Ok(created)
    }
}
