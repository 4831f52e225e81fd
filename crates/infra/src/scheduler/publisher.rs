//! Scheduler events for real-time listeners.
//!
//! Events describe what happened to a job; they are not the source of truth.
//! Publishing is best-effort and a failed publish never fails a job.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use stationhub_core::{BookingId, InstanceId};
use stationhub_events::EventBus;

use super::job::{Job, JobId, JobType};

/// Which component ran a job.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionPath {
    Processor,
    Watchdog,
    Reconciler,
}

impl ExecutionPath {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionPath::Processor => "processor",
            ExecutionPath::Watchdog => "watchdog",
            ExecutionPath::Reconciler => "reconciler",
        }
    }
}

impl core::fmt::Display for ExecutionPath {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SchedulerEvent {
    JobCompleted {
        job_id: JobId,
        job_type: JobType,
        booking_id: BookingId,
        instance_id: InstanceId,
        path: ExecutionPath,
        /// `false` when the job turned out to be a stale no-op.
        applied: bool,
        #[serde(with = "chrono::serde::ts_milliseconds")]
        at: DateTime<Utc>,
    },
    JobFailed {
        job_id: JobId,
        job_type: JobType,
        booking_id: BookingId,
        instance_id: InstanceId,
        path: ExecutionPath,
        error: String,
        #[serde(with = "chrono::serde::ts_milliseconds")]
        at: DateTime<Utc>,
    },
}

impl SchedulerEvent {
    pub fn completed(
        job: &Job,
        instance_id: &InstanceId,
        path: ExecutionPath,
        applied: bool,
        at: DateTime<Utc>,
    ) -> Self {
        SchedulerEvent::JobCompleted {
            job_id: job.id.clone(),
            job_type: job.job_type(),
            booking_id: job.booking_id,
            instance_id: instance_id.clone(),
            path,
            applied,
            at,
        }
    }

    pub fn failed(
        job: &Job,
        instance_id: &InstanceId,
        path: ExecutionPath,
        error: impl Into<String>,
        at: DateTime<Utc>,
    ) -> Self {
        SchedulerEvent::JobFailed {
            job_id: job.id.clone(),
            job_type: job.job_type(),
            booking_id: job.booking_id,
            instance_id: instance_id.clone(),
            path,
            error: error.into(),
            at,
        }
    }

    pub fn job_id(&self) -> &JobId {
        match self {
            SchedulerEvent::JobCompleted { job_id, .. } | SchedulerEvent::JobFailed { job_id, .. } => {
                job_id
            }
        }
    }
}

/// Where the scheduler reports job outcomes.
pub trait JobEventSink: Send + Sync {
    fn emit(&self, event: SchedulerEvent);
}

/// Publishes scheduler events on an [`EventBus`], logging transport errors.
#[derive(Debug)]
pub struct JobEventPublisher<B> {
    bus: B,
}

impl<B> JobEventPublisher<B>
where
    B: EventBus<SchedulerEvent>,
{
    pub fn new(bus: B) -> Self {
        Self { bus }
    }

    pub fn bus(&self) -> &B {
        &self.bus
    }
}

impl<B> JobEventSink for JobEventPublisher<B>
where
    B: EventBus<SchedulerEvent>,
{
    fn emit(&self, event: SchedulerEvent) {
        let job_id = event.job_id().clone();
        match self.bus.publish(event) {
            Ok(()) => debug!(job_id = %job_id, "scheduler event published"),
            Err(e) => warn!(job_id = %job_id, error = ?e, "failed to publish scheduler event"),
        }
    }
}
