//! Background workers.

pub mod bus_worker;

pub use bus_worker::{BusWorker, WorkerHandle};
