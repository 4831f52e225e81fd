//! Infrastructure event bus implementations.
//!
//! The bus abstraction lives in `stationhub-events`; this module provides the
//! Redis transport used to fan scheduler events out across instances.

#[cfg(feature = "redis")]
pub mod redis_pubsub;

#[cfg(feature = "redis")]
pub use redis_pubsub::{RedisBusError, RedisPubSubEventBus};
