//! Backup reconciler.
//!
//! Re-derives the jobs that should already have fired from booking state, so a
//! lost or corrupted queue cannot lose a deadline.

use std::sync::Arc;
use std::time::Duration;

use chrono::TimeDelta;
use tracing::{debug, info, warn};

use stationhub_booking::{BookingRepository, RepositoryError};
use stationhub_core::Clock;

use super::claim::{JobClaimer, TickSummary};
use super::job::Job;
use super::publisher::ExecutionPath;

#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    #[error("repository error: {0}")]
    Repository(#[from] RepositoryError),
    #[error("reconcile lag out of range: {0:?}")]
    Lag(Duration),
}

pub struct BackupReconciler {
    bookings: Arc<dyn BookingRepository>,
    claimer: Arc<JobClaimer>,
    clock: Arc<dyn Clock>,
    lag: TimeDelta,
    batch_size: usize,
}

impl core::fmt::Debug for BackupReconciler {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("BackupReconciler")
            .field("lag", &self.lag)
            .field("batch_size", &self.batch_size)
            .finish_non_exhaustive()
    }
}

impl BackupReconciler {
    pub fn new(
        bookings: Arc<dyn BookingRepository>,
        claimer: Arc<JobClaimer>,
        clock: Arc<dyn Clock>,
        lag: Duration,
        batch_size: usize,
    ) -> Result<Self, ReconcileError> {
        let lag = TimeDelta::from_std(lag).map_err(|_| ReconcileError::Lag(lag))?;
        Ok(Self {
            bookings,
            claimer,
            clock,
            lag,
            batch_size,
        })
    }

    /// Jobs implied by bookings whose deadline passed more than `lag` ago
    /// without the expected transition.
    pub fn missed_jobs(&self) -> Result<Vec<Job>, ReconcileError> {
        let cutoff = self.clock.now() - self.lag;
        let mut jobs: Vec<Job> = self
            .bookings
            .find_unstarted_before(cutoff, self.batch_size)?
            .iter()
            .map(Job::slot_start)
            .collect();
        jobs.extend(
            self.bookings
                .find_unexpired_before(cutoff, self.batch_size)?
                .iter()
                .map(Job::grace_expiration),
        );
        jobs.sort_by_key(|job| job.execute_at);
        Ok(jobs)
    }

    pub fn tick(&self) -> Result<TickSummary, ReconcileError> {
        let mut summary = TickSummary::default();

        for job in self.missed_jobs()? {
            match self.claimer.is_processed(&job.id) {
                Ok(true) => {
                    debug!(job_id = %job.id, "already processed; skipping");
                    continue;
                }
                Ok(false) => {}
                Err(e) => {
                    warn!(job_id = %job.id, error = %e, "processed marker unreadable; executing anyway");
                }
            }

            info!(job_id = %job.id, execute_at = %job.execute_at, "reconciling missed job");
            let outcome = self.claimer.execute_unqueued(&job, ExecutionPath::Reconciler);
            if let Err(e) = &outcome {
                warn!(job_id = %job.id, error = %e, "store error after reconciling job");
            }
            summary.record(&outcome);
        }
        Ok(summary)
    }
}
