//! `adminhub-core`: shared domain building blocks.
//!
//! Pure primitives only: identifiers, the domain error model, optimistic
//! concurrency expectations and audit metadata. No storage, no IO.

pub mod aggregate;
pub mod entity;
pub mod error;
pub mod id;

pub use aggregate::{AggregateRoot, ExpectedVersion};
pub use entity::{AuditInfo, Entity, SoftDelete};
pub use error::{DomainError, DomainResult};
pub use id::{AggregateId, TenantId, UserId};
