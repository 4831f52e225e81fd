//! Infrastructure layer: coordination store, Redis adapters, configuration and
//! the distributed notification scheduler.

pub mod config;
pub mod coordination;
pub mod event_bus;
pub mod scheduler;

#[cfg(test)]
mod integration_tests;
