//! Fail-safe watchdog.
//!
//! Runs on every instance. When nobody holds the leadership lease it executes
//! badly overdue jobs itself, so a stalled election never stalls deadlines.

use std::sync::Arc;
use std::time::Duration;

use chrono::TimeDelta;
use tracing::{debug, warn};

use stationhub_core::Clock;

use super::SharedStore;
use super::claim::{JobClaimer, TickSummary};
use super::leadership::LeadershipManager;
use super::publisher::ExecutionPath;
use crate::config::ConfigError;
use crate::coordination::StoreResult;

#[derive(Debug)]
pub struct FailSafeWatchdog {
    claimer: Arc<JobClaimer>,
    leadership: Arc<LeadershipManager<SharedStore>>,
    clock: Arc<dyn Clock>,
    grace: TimeDelta,
    batch_size: usize,
}

impl FailSafeWatchdog {
    pub fn new(
        claimer: Arc<JobClaimer>,
        leadership: Arc<LeadershipManager<SharedStore>>,
        clock: Arc<dyn Clock>,
        grace: Duration,
        batch_size: usize,
    ) -> Result<Self, ConfigError> {
        let grace = TimeDelta::from_std(grace)
            .map_err(|_| ConfigError::Inconsistent("watchdog grace out of range".to_string()))?;
        Ok(Self {
            claimer,
            leadership,
            clock,
            grace,
            batch_size,
        })
    }

    /// Process jobs overdue by more than the grace delta, if there is no leader.
    pub fn tick(&self) -> StoreResult<TickSummary> {
        if let Some(leader) = self.leadership.current_leader()? {
            debug!(leader = %leader, "leader present; watchdog idle");
            return Ok(TickSummary::default());
        }

        let cutoff = self.clock.now() - self.grace;
        let summary = self
            .claimer
            .run_due(cutoff, self.batch_size, ExecutionPath::Watchdog, || true)?;
        if summary != TickSummary::default() {
            warn!(
                instance = %self.leadership.instance_id(),
                applied = summary.applied,
                skipped = summary.skipped,
                failed = summary.failed,
                "no leader; executed overdue jobs directly"
            );
        }
        Ok(summary)
    }
}
