//! `stationhub-core` : shared domain building blocks.
//!
//! Identifiers, the domain error model, optimistic-concurrency helpers and the
//! clock abstraction. No infrastructure concerns live here.

pub mod aggregate;
pub mod clock;
pub mod error;
pub mod id;

pub use aggregate::{AggregateRoot, ExpectedVersion};
pub use clock::{
    Clock, DisplayTimezone, ManualClock, SystemClock, from_storage_millis, to_storage_millis,
};
pub use error::{DomainError, DomainResult};
pub use id::{BookingId, InstanceId, StationId, UserId};
