//! Tenant-scoped project persistence and lifecycle service.

pub mod postgres;
pub mod service;
pub mod store;

pub use postgres::PostgresProjectStore;
pub use service::{ProjectService, ServiceError};
pub use store::{InMemoryProjectStore, ProjectStore, ProjectStoreError};
