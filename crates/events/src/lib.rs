//! Event publishing/subscription mechanics.
//!
//! Transport-agnostic pub/sub used to broadcast scheduler outcomes to any
//! interested real-time listener. Concrete transports (Redis pub/sub) live in
//! `stationhub-infra`.

pub mod bus;
pub mod in_memory_bus;

pub use bus::{EventBus, Subscription};
pub use in_memory_bus::{InMemoryBusError, InMemoryEventBus};
