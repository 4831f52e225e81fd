//! Claim protocol shared by every execution path:
//! lock, execute, remove, mark processed, release.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use stationhub_core::{Clock, InstanceId};

use super::SharedStore;
use super::executor::{ExecutionError, ExecutionOutcome, JobExecutor};
use super::job::{Job, JobId};
use super::keys::KeySpace;
use super::publisher::{ExecutionPath, JobEventSink, SchedulerEvent};
use super::queue::JobQueue;
use crate::coordination::{CoordinationStore, StoreResult};

/// Result of one claim attempt.
#[derive(Debug, Clone)]
pub enum ClaimOutcome {
    Executed(ExecutionOutcome),
    /// Someone else holds the job's lock.
    ClaimedElsewhere,
    /// The executor failed; the job stays queued.
    Failed(ExecutionError),
}

/// Process-wide execution counters.
#[derive(Debug, Default)]
pub struct ExecutionCounters {
    applied: AtomicU64,
    skipped: AtomicU64,
    failed: AtomicU64,
    claimed_elsewhere: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CounterSnapshot {
    pub applied: u64,
    pub skipped: u64,
    pub failed: u64,
    pub claimed_elsewhere: u64,
}

impl ExecutionCounters {
    fn record(&self, outcome: &ClaimOutcome) {
        let counter = match outcome {
            ClaimOutcome::Executed(ExecutionOutcome::Applied) => &self.applied,
            ClaimOutcome::Executed(ExecutionOutcome::Skipped(_)) => &self.skipped,
            ClaimOutcome::Failed(_) => &self.failed,
            ClaimOutcome::ClaimedElsewhere => &self.claimed_elsewhere,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            applied: self.applied.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            claimed_elsewhere: self.claimed_elsewhere.load(Ordering::Relaxed),
        }
    }
}

/// Per-tick tally, returned by the processor, watchdog and reconciler ticks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickSummary {
    pub applied: usize,
    pub skipped: usize,
    pub failed: usize,
    pub claimed_elsewhere: usize,
    pub store_errors: usize,
}

impl TickSummary {
    pub fn record(&mut self, outcome: &StoreResult<ClaimOutcome>) {
        match outcome {
            Ok(ClaimOutcome::Executed(ExecutionOutcome::Applied)) => self.applied += 1,
            Ok(ClaimOutcome::Executed(ExecutionOutcome::Skipped(_))) => self.skipped += 1,
            Ok(ClaimOutcome::Failed(_)) => self.failed += 1,
            Ok(ClaimOutcome::ClaimedElsewhere) => self.claimed_elsewhere += 1,
            Err(_) => self.store_errors += 1,
        }
    }

    /// Jobs that ran to completion (applied or stale).
    pub fn completed(&self) -> usize {
        self.applied + self.skipped
    }

    /// Attempts that leave the job in the queue.
    fn left_queued(&self) -> usize {
        self.failed + self.claimed_elsewhere + self.store_errors
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LockPolicy {
    /// No lock, no execution.
    Required,
    /// Execute without the lock if the store cannot hand one out.
    BestEffort,
}

pub struct JobClaimer {
    store: SharedStore,
    queue: Arc<JobQueue<SharedStore>>,
    keys: KeySpace,
    executor: Arc<dyn JobExecutor>,
    events: Arc<dyn JobEventSink>,
    clock: Arc<dyn Clock>,
    instance_id: InstanceId,
    lock_ttl: Duration,
    processed_ttl: Duration,
    counters: ExecutionCounters,
}

impl core::fmt::Debug for JobClaimer {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("JobClaimer")
            .field("instance_id", &self.instance_id)
            .field("lock_ttl", &self.lock_ttl)
            .field("processed_ttl", &self.processed_ttl)
            .finish_non_exhaustive()
    }
}

impl JobClaimer {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: SharedStore,
        queue: Arc<JobQueue<SharedStore>>,
        keys: KeySpace,
        executor: Arc<dyn JobExecutor>,
        events: Arc<dyn JobEventSink>,
        clock: Arc<dyn Clock>,
        instance_id: InstanceId,
        lock_ttl: Duration,
        processed_ttl: Duration,
    ) -> Self {
        Self {
            store,
            queue,
            keys,
            executor,
            events,
            clock,
            instance_id,
            lock_ttl,
            processed_ttl,
            counters: ExecutionCounters::default(),
        }
    }

    /// Claim a queued job and run it. Used by the processor and the watchdog.
    pub fn claim_and_execute(&self, job: &Job, path: ExecutionPath) -> StoreResult<ClaimOutcome> {
        self.run(job, path, LockPolicy::Required)
    }

    /// Run a job discovered from booking state rather than from the queue.
    ///
    /// A store outage must not stop this path, so the lock is best-effort;
    /// the executor's precondition check keeps a double run harmless.
    pub fn execute_unqueued(&self, job: &Job, path: ExecutionPath) -> StoreResult<ClaimOutcome> {
        self.run(job, path, LockPolicy::BestEffort)
    }

    /// Claim and run queued jobs due at or before `cutoff`, oldest first,
    /// until `batch_size` of them completed or no due job is left.
    ///
    /// Jobs that stay queued (failed, claimed elsewhere, store error) are
    /// paged past, so a head of permanently failing jobs cannot starve the
    /// jobs behind it. `proceed` is checked before every job; returning
    /// `false` ends the run.
    pub fn run_due(
        &self,
        cutoff: DateTime<Utc>,
        batch_size: usize,
        path: ExecutionPath,
        mut proceed: impl FnMut() -> bool,
    ) -> StoreResult<TickSummary> {
        let mut summary = TickSummary::default();
        let mut skip = 0;

        while summary.completed() < batch_size {
            let page = self
                .queue
                .due_page(cutoff, skip, batch_size - summary.completed())?;
            if page.is_empty() {
                break;
            }
            debug!(count = page.len(), skip, path = %path, "processing due jobs");

            let queued_before = summary.left_queued();
            let errors_before = summary.store_errors;
            for job in &page {
                if !proceed() {
                    debug!(path = %path, "stopping mid-batch");
                    return Ok(summary);
                }
                let outcome = self.claim_and_execute(job, path);
                if let Err(e) = &outcome {
                    warn!(job_id = %job.id, path = %path, error = %e, "store error while processing job");
                }
                summary.record(&outcome);
            }

            if summary.store_errors - errors_before == page.len() {
                // Store is failing every claim; the next tick retries.
                break;
            }
            skip += summary.left_queued() - queued_before;
        }
        Ok(summary)
    }

    /// Whether a processed marker exists for `id`.
    pub fn is_processed(&self, id: &JobId) -> StoreResult<bool> {
        Ok(self.store.get(&self.keys.processed(id))?.is_some())
    }

    pub fn counters(&self) -> CounterSnapshot {
        self.counters.snapshot()
    }

    fn run(&self, job: &Job, path: ExecutionPath, policy: LockPolicy) -> StoreResult<ClaimOutcome> {
        let lock_key = self.keys.lock(&job.id);
        let token = format!("{}:{}", self.instance_id, Uuid::now_v7());

        let locked = match self.store.set_if_absent(&lock_key, &token, self.lock_ttl) {
            Ok(true) => true,
            Ok(false) => {
                debug!(job_id = %job.id, path = %path, "job claimed elsewhere");
                let outcome = ClaimOutcome::ClaimedElsewhere;
                self.counters.record(&outcome);
                return Ok(outcome);
            }
            Err(e) if policy == LockPolicy::BestEffort => {
                warn!(job_id = %job.id, error = %e, "job lock unavailable; executing unlocked");
                false
            }
            Err(e) => return Err(e),
        };

        let result = self.execute_locked(job, path);

        if locked {
            if let Err(e) = self.store.delete_if_equals(&lock_key, &token) {
                // The TTL frees it eventually.
                warn!(job_id = %job.id, error = %e, "failed to release job lock");
            }
        }

        if let Ok(outcome) = &result {
            self.counters.record(outcome);
        }
        result
    }

    fn execute_locked(&self, job: &Job, path: ExecutionPath) -> StoreResult<ClaimOutcome> {
        match self.executor.execute(job) {
            Ok(outcome) => {
                let recorded = self.record_completion(job);
                info!(
                    job_id = %job.id,
                    job_type = %job.job_type(),
                    path = %path,
                    outcome = ?outcome,
                    "job executed"
                );
                self.events.emit(SchedulerEvent::completed(
                    job,
                    &self.instance_id,
                    path,
                    outcome.is_applied(),
                    self.clock.now(),
                ));
                recorded.map(|()| ClaimOutcome::Executed(outcome))
            }
            Err(e) => {
                warn!(job_id = %job.id, path = %path, error = %e, "job execution failed; left queued");
                self.events.emit(SchedulerEvent::failed(
                    job,
                    &self.instance_id,
                    path,
                    e.to_string(),
                    self.clock.now(),
                ));
                Ok(ClaimOutcome::Failed(e))
            }
        }
    }

    fn record_completion(&self, job: &Job) -> StoreResult<()> {
        self.queue.remove(&job.id)?;
        self.store.set(
            &self.keys.processed(&job.id),
            self.instance_id.as_str(),
            Some(self.processed_ttl),
        )
    }
}
