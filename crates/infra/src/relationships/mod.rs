//! Durable relationship-tuple backends.

pub mod postgres;

pub use postgres::PostgresRelationshipStore;
