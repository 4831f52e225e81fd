//! The per-process notification scheduler.
//!
//! One `NotificationScheduler` is constructed per process with its clock,
//! store, repository and executor injected. `start` spawns the periodic tasks
//! every instance runs (leadership, watchdog, reconciler, cleanup); the
//! leader-only processor task is started and stopped on leadership changes.

use std::io;
use std::mem;
use std::sync::{Arc, Mutex};

use chrono::TimeDelta;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use stationhub_booking::{Booking, BookingRepository, BookingStatus};
use stationhub_core::{BookingId, Clock, InstanceId};

use super::SharedStore;
use super::claim::{CounterSnapshot, JobClaimer, TickSummary};
use super::executor::JobExecutor;
use super::job::{Job, JobId, JobType};
use super::keys::KeySpace;
use super::leadership::{LeadershipManager, Transition};
use super::processor::JobProcessor;
use super::publisher::JobEventSink;
use super::queue::JobQueue;
use super::reconciler::{BackupReconciler, ReconcileError};
use super::task::{TaskHandle, spawn_periodic};
use super::watchdog::FailSafeWatchdog;
use crate::config::{ConfigError, SchedulerConfig};
use crate::coordination::{StoreError, StoreResult};

#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Reconcile(#[from] ReconcileError),
    #[error("failed to spawn scheduler task: {0}")]
    Spawn(#[from] io::Error),
    #[cfg(feature = "redis")]
    #[error(transparent)]
    Bus(#[from] crate::event_bus::RedisBusError),
}

/// Collaborators injected into the scheduler.
pub struct SchedulerDeps {
    pub store: SharedStore,
    pub bookings: Arc<dyn BookingRepository>,
    pub executor: Arc<dyn JobExecutor>,
    pub events: Arc<dyn JobEventSink>,
    pub clock: Arc<dyn Clock>,
}

#[cfg(feature = "redis")]
impl SchedulerDeps {
    /// Redis-backed store and event bus, both taken from `config`.
    pub fn redis(
        config: &SchedulerConfig,
        bookings: Arc<dyn BookingRepository>,
        executor: Arc<dyn JobExecutor>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, SchedulerError> {
        use super::publisher::{JobEventPublisher, SchedulerEvent};
        use crate::coordination::RedisCoordinationStore;
        use crate::event_bus::RedisPubSubEventBus;

        let store = RedisCoordinationStore::new(&config.redis_url)?;
        let channel = KeySpace::new(config.key_prefix.clone()).events_channel();
        let bus = RedisPubSubEventBus::<SchedulerEvent>::new(&config.redis_url, channel)?;
        Ok(Self {
            store: Arc::new(store),
            bookings,
            executor,
            events: Arc::new(JobEventPublisher::new(bus)),
            clock,
        })
    }
}

/// Snapshot for health dashboards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SchedulerStats {
    pub instance_id: InstanceId,
    pub is_leader: bool,
    pub current_leader_id: Option<InstanceId>,
    pub pending_job_count: usize,
    pub counters: CounterSnapshot,
}

pub struct NotificationScheduler {
    config: SchedulerConfig,
    clock: Arc<dyn Clock>,
    stale_after: TimeDelta,
    queue: Arc<JobQueue<SharedStore>>,
    leadership: Arc<LeadershipManager<SharedStore>>,
    claimer: Arc<JobClaimer>,
    processor: JobProcessor,
    watchdog: FailSafeWatchdog,
    reconciler: BackupReconciler,
    tasks: Mutex<Vec<TaskHandle>>,
    processor_task: Mutex<Option<TaskHandle>>,
}

impl core::fmt::Debug for NotificationScheduler {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("NotificationScheduler")
            .field("instance_id", self.instance_id())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl NotificationScheduler {
    pub fn new(
        config: SchedulerConfig,
        instance_id: InstanceId,
        deps: SchedulerDeps,
    ) -> Result<Self, SchedulerError> {
        config.validate()?;
        let stale_after = TimeDelta::from_std(config.stale_after)
            .map_err(|_| ConfigError::Inconsistent("stale_after out of range".to_string()))?;

        let SchedulerDeps {
            store,
            bookings,
            executor,
            events,
            clock,
        } = deps;

        let keys = KeySpace::new(config.key_prefix.clone());
        let queue = Arc::new(JobQueue::new(store.clone(), keys.clone()));
        let leadership = Arc::new(LeadershipManager::new(
            store.clone(),
            clock.clone(),
            &keys,
            instance_id.clone(),
            config.lease_ttl,
        ));
        let claimer = Arc::new(JobClaimer::new(
            store,
            queue.clone(),
            keys,
            executor,
            events,
            clock.clone(),
            instance_id,
            config.job_lock_ttl,
            config.processed_ttl,
        ));

        let processor = JobProcessor::new(
            claimer.clone(),
            leadership.clone(),
            clock.clone(),
            config.processor_batch_size,
        );
        let watchdog = FailSafeWatchdog::new(
            claimer.clone(),
            leadership.clone(),
            clock.clone(),
            config.watchdog_grace,
            config.processor_batch_size,
        )?;
        let reconciler = BackupReconciler::new(
            bookings,
            claimer.clone(),
            clock.clone(),
            config.reconcile_lag,
            config.reconcile_batch_size,
        )?;

        Ok(Self {
            config,
            clock,
            stale_after,
            queue,
            leadership,
            claimer,
            processor,
            watchdog,
            reconciler,
            tasks: Mutex::new(Vec::new()),
            processor_task: Mutex::new(None),
        })
    }

    pub fn instance_id(&self) -> &InstanceId {
        self.leadership.instance_id()
    }

    pub fn is_leader(&self) -> bool {
        self.leadership.is_leader()
    }

    /// Whether the leader-only processor task is running.
    pub fn is_processing(&self) -> bool {
        self.processor_task.lock().unwrap().is_some()
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn queue(&self) -> &JobQueue<SharedStore> {
        &self.queue
    }

    /// Enqueue the jobs for every deadline of `booking` still in the future.
    ///
    /// Never fails the caller: store errors are logged and the reconciler
    /// covers whatever could not be enqueued.
    pub fn schedule_notifications(&self, booking: &Booking) -> Vec<JobId> {
        if booking.status() != BookingStatus::Confirmed {
            debug!(booking_id = %booking.id_typed(), status = %booking.status(), "not scheduling");
            return Vec::new();
        }

        let now = self.clock.now();
        let mut scheduled = Vec::with_capacity(2);
        for job_type in JobType::all() {
            let job = Job::for_type(job_type, booking);
            if job.execute_at <= now {
                debug!(job_id = %job.id, "deadline already passed; not scheduling");
                continue;
            }
            match self.queue.enqueue(&job) {
                Ok(()) => scheduled.push(job.id),
                Err(e) => warn!(job_id = %job.id, error = %e, "failed to schedule job"),
            }
        }
        scheduled
    }

    /// Remove the pending jobs of a booking. Returns how many were removed.
    ///
    /// Best-effort: a job that is already running finds the booking no longer
    /// confirmed and does nothing.
    pub fn cancel_notifications(&self, booking_id: BookingId) -> usize {
        JobType::all()
            .into_iter()
            .map(|job_type| JobId::for_booking(job_type, booking_id))
            .filter(|id| match self.queue.remove(id) {
                Ok(removed) => removed,
                Err(e) => {
                    warn!(job_id = %id, error = %e, "failed to cancel job");
                    false
                }
            })
            .count()
    }

    pub fn stats(&self) -> StoreResult<SchedulerStats> {
        Ok(SchedulerStats {
            instance_id: self.instance_id().clone(),
            is_leader: self.leadership.is_leader(),
            current_leader_id: self.leadership.current_leader()?,
            pending_job_count: self.queue.len()?,
            counters: self.claimer.counters(),
        })
    }

    pub fn leadership_tick(&self) -> Option<Transition> {
        self.leadership.tick()
    }

    pub fn processor_tick(&self) -> StoreResult<TickSummary> {
        self.processor.tick()
    }

    pub fn watchdog_tick(&self) -> StoreResult<TickSummary> {
        self.watchdog.tick()
    }

    pub fn reconciler_tick(&self) -> Result<TickSummary, ReconcileError> {
        self.reconciler.tick()
    }

    /// Drop jobs that have been due for longer than `stale_after`.
    pub fn cleanup_tick(&self) -> StoreResult<usize> {
        let dropped = self
            .queue
            .remove_older_than(self.clock.now() - self.stale_after)?;
        if dropped > 0 {
            info!(dropped, "stale job cleanup");
        }
        Ok(dropped)
    }

    /// Spawn the periodic tasks. Calling it twice is a no-op.
    pub fn start(self: &Arc<Self>) -> Result<(), SchedulerError> {
        let mut tasks = self.tasks.lock().unwrap();
        if !tasks.is_empty() {
            return Ok(());
        }

        let this = Arc::clone(self);
        tasks.push(spawn_periodic(
            "scheduler-leadership",
            self.config.leadership_interval,
            move || this.run_leadership_tick(),
        )?);

        let this = Arc::clone(self);
        tasks.push(spawn_periodic(
            "scheduler-watchdog",
            self.config.watchdog_interval,
            move || {
                if let Err(e) = this.watchdog_tick() {
                    warn!(error = %e, "watchdog tick failed");
                }
            },
        )?);

        let this = Arc::clone(self);
        tasks.push(spawn_periodic(
            "scheduler-reconciler",
            self.config.reconciler_interval,
            move || {
                if let Err(e) = this.reconciler_tick() {
                    warn!(error = %e, "reconciler tick failed");
                }
            },
        )?);

        let this = Arc::clone(self);
        tasks.push(spawn_periodic(
            "scheduler-cleanup",
            self.config.cleanup_interval,
            move || {
                if let Err(e) = this.cleanup_tick() {
                    warn!(error = %e, "cleanup tick failed");
                }
            },
        )?);

        info!(instance = %self.instance_id(), "notification scheduler started");
        Ok(())
    }

    /// Stop every task and give up the lease if we hold it.
    pub fn shutdown(&self) {
        let tasks = mem::take(&mut *self.tasks.lock().unwrap());
        for task in tasks {
            task.shutdown();
        }
        self.stop_processor();

        if let Err(e) = self.leadership.release() {
            warn!(instance = %self.instance_id(), error = %e, "failed to release lease");
        }
        info!(instance = %self.instance_id(), "notification scheduler stopped");
    }

    fn run_leadership_tick(self: &Arc<Self>) {
        match self.leadership_tick() {
            Some(Transition::Promoted) => self.start_processor(),
            Some(Transition::Demoted) => self.stop_processor(),
            None if self.is_leader() => self.start_processor(),
            None => {}
        }
    }

    fn start_processor(self: &Arc<Self>) {
        let mut slot = self.processor_task.lock().unwrap();
        if slot.is_some() {
            return;
        }

        let this = Arc::clone(self);
        match spawn_periodic(
            "scheduler-processor",
            self.config.processor_interval,
            move || {
                if let Err(e) = this.processor_tick() {
                    warn!(error = %e, "processor tick failed");
                }
            },
        ) {
            Ok(handle) => *slot = Some(handle),
            Err(e) => error!(error = %e, "failed to start job processor"),
        }
    }

    fn stop_processor(&self) {
        let handle = self.processor_task.lock().unwrap().take();
        if let Some(handle) = handle {
            handle.shutdown();
        }
    }
}
