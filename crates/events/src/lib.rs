//! `adminhub-events`: event envelopes and pub/sub mechanics.
//!
//! Domain-agnostic: concrete events live in the modules that emit them.

pub mod bus;
pub mod envelope;
pub mod event;
pub mod in_memory_bus;
pub mod tenant;

pub use bus::{EventBus, Subscription};
pub use envelope::EventEnvelope;
pub use event::Event;
pub use in_memory_bus::{InMemoryBusError, InMemoryEventBus};
pub use tenant::TenantScoped;
