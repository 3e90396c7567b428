//! `adminhub-auth`: authentication context and relationship-based authorization.
//!
//! Decoupled from transport and storage: backends implement
//! [`RelationshipStore`], transports hand over [`AuthClaims`].

pub mod check;
pub mod claims;
pub mod context;
pub mod error;
pub mod gate;
pub mod in_memory;
pub mod relation;
pub mod schema;
pub mod store;
pub mod tuple;

pub use check::{MAX_CHECK_DEPTH, TupleReader, evaluate};
pub use claims::{AuthClaims, TokenValidationError, validate_claims};
pub use context::RequestContext;
pub use error::AuthError;
pub use gate::{AuthorizationGate, GateError, GrantFailure, OwnedResource, Requirement};
pub use in_memory::InMemoryRelationshipStore;
pub use relation::Relation;
pub use schema::{InheritRule, RelationSchema, TypeDefinition};
pub use store::{CheckOutcome, RelationshipStore, RelationshipStoreError};
pub use tuple::{ObjectRef, RelationshipTuple, Subject, TupleFilter};
