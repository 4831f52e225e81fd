//! Durable, time-ordered job queue on top of the coordination store.
//!
//! Layout: the sorted set at `queue` holds job ids scored by `execute_at`
//! millis; each job body lives at its own `job:<id>` key. Bodies are written
//! before the id is added, so a member whose body is missing is an orphan left
//! by a crash or a racing removal and is dropped on sight.

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use stationhub_core::{from_storage_millis, to_storage_millis};

use super::job::{Job, JobId};
use super::keys::KeySpace;
use crate::coordination::{CoordinationStore, StoreError, StoreResult};

#[derive(Debug)]
pub struct JobQueue<S> {
    store: S,
    keys: KeySpace,
}

impl<S: CoordinationStore> JobQueue<S> {
    pub fn new(store: S, keys: KeySpace) -> Self {
        Self { store, keys }
    }

    /// Add a job, overwriting any job with the same id.
    pub fn enqueue(&self, job: &Job) -> StoreResult<()> {
        let body =
            serde_json::to_string(job).map_err(|e| StoreError::Serialization(e.to_string()))?;
        self.store.set(&self.keys.job(&job.id), &body, None)?;
        self.store.sorted_add(
            &self.keys.queue(),
            job.id.as_str(),
            to_storage_millis(job.execute_at),
        )?;
        debug!(job_id = %job.id, execute_at = %job.execute_at, "job enqueued");
        Ok(())
    }

    /// Jobs due at or before `now`, ascending by `execute_at`, at most `max`.
    ///
    /// Non-destructive: the caller removes a job after it has been executed.
    pub fn pop_due(&self, now: DateTime<Utc>, max: usize) -> StoreResult<Vec<Job>> {
        self.due_page(now, 0, max)
    }

    /// Jobs with `execute_at <= cutoff`, ascending, at most `max`.
    pub fn due_before(&self, cutoff: DateTime<Utc>, max: usize) -> StoreResult<Vec<Job>> {
        self.due_page(cutoff, 0, max)
    }

    /// Like [`due_before`](Self::due_before), but skips the first `skip`
    /// members. Used to page past jobs that stay queued after a failed run.
    pub fn due_page(
        &self,
        cutoff: DateTime<Utc>,
        skip: usize,
        max: usize,
    ) -> StoreResult<Vec<Job>> {
        let members = self.store.sorted_range_by_score(
            &self.keys.queue(),
            0,
            to_storage_millis(cutoff),
            skip,
            max,
        )?;

        let mut jobs = Vec::with_capacity(members.len());
        for (member, _score) in members {
            let id = JobId::from_stored(member);
            if let Some(job) = self.load(&id)? {
                jobs.push(job);
            }
        }
        Ok(jobs)
    }

    /// Remove a job. Removing an already-removed job is a no-op.
    pub fn remove(&self, id: &JobId) -> StoreResult<bool> {
        let removed = self.store.sorted_remove(&self.keys.queue(), id.as_str())?;
        self.store.delete(&self.keys.job(id))?;
        Ok(removed)
    }

    /// Drop every job with `execute_at` before `instant`. Returns how many
    /// were dropped; each one is logged since it never ran.
    pub fn remove_older_than(&self, instant: DateTime<Utc>) -> StoreResult<usize> {
        let cutoff = to_storage_millis(instant) - 1;
        if cutoff < 0 {
            return Ok(0);
        }

        let members =
            self.store
                .sorted_range_by_score(&self.keys.queue(), 0, cutoff, 0, usize::MAX)?;

        let mut dropped = 0;
        for (member, score) in members {
            let id = JobId::from_stored(member);
            if self.remove(&id)? {
                dropped += 1;
                warn!(
                    job_id = %id,
                    execute_at = ?from_storage_millis(score),
                    "dropping stale job that never executed"
                );
            }
        }
        Ok(dropped)
    }

    pub fn contains(&self, id: &JobId) -> StoreResult<bool> {
        Ok(self.store.get(&self.keys.job(id))?.is_some())
    }

    pub fn len(&self) -> StoreResult<usize> {
        self.store.sorted_len(&self.keys.queue())
    }

    pub fn is_empty(&self) -> StoreResult<bool> {
        Ok(self.len()? == 0)
    }

    fn load(&self, id: &JobId) -> StoreResult<Option<Job>> {
        let Some(body) = self.store.get(&self.keys.job(id))? else {
            warn!(job_id = %id, "queue member has no job body; removing orphan");
            self.store.sorted_remove(&self.keys.queue(), id.as_str())?;
            return Ok(None);
        };

        match serde_json::from_str::<Job>(&body) {
            Ok(job) => Ok(Some(job)),
            Err(e) => {
                warn!(job_id = %id, error = %e, "unreadable job body; removing");
                self.remove(id)?;
                Ok(None)
            }
        }
    }
}
