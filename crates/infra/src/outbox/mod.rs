//! Transactional outbox: durable record of events still to be delivered.
//!
//! - `OutboxStore`: append / fetch due / acknowledge
//! - `OutboxRelay`: background delivery to registered `MessageHandler`s,
//!   retried with capped backoff until acknowledged
//! - `PostgresOutbox`: durable store; appends can join a caller's transaction
//! - `BusForwarder`: handler that fans records out on an `EventBus`

pub mod forwarder;
pub mod postgres;
pub mod relay;
pub mod store;

pub use forwarder::BusForwarder;
pub use postgres::PostgresOutbox;
pub use relay::{DrainStats, HandlerError, MessageHandler, OutboxRelay, RelayConfig, RelayHandle};
pub use store::{InMemoryOutbox, OutboxError, OutboxMessage, OutboxRecord, OutboxStatus, OutboxStore};
