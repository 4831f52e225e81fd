//! Leader-only queue processor.

use std::sync::Arc;

use tracing::debug;

use stationhub_core::Clock;

use super::SharedStore;
use super::claim::{JobClaimer, TickSummary};
use super::leadership::LeadershipManager;
use super::publisher::ExecutionPath;
use crate::coordination::StoreResult;

#[derive(Debug)]
pub struct JobProcessor {
    claimer: Arc<JobClaimer>,
    leadership: Arc<LeadershipManager<SharedStore>>,
    clock: Arc<dyn Clock>,
    batch_size: usize,
}

impl JobProcessor {
    pub fn new(
        claimer: Arc<JobClaimer>,
        leadership: Arc<LeadershipManager<SharedStore>>,
        clock: Arc<dyn Clock>,
        batch_size: usize,
    ) -> Self {
        Self {
            claimer,
            leadership,
            clock,
            batch_size,
        }
    }

    /// Claim and run up to one batch of due jobs, oldest first.
    ///
    /// Does nothing unless this instance leads, and stops mid-batch as soon as
    /// leadership is lost.
    pub fn tick(&self) -> StoreResult<TickSummary> {
        if !self.leadership.is_leader() {
            return Ok(TickSummary::default());
        }

        self.claimer.run_due(
            self.clock.now(),
            self.batch_size,
            ExecutionPath::Processor,
            || {
                let leading = self.leadership.is_leader();
                if !leading {
                    debug!("leadership lost mid-batch");
                }
                leading
            },
        )
    }
}
