//! Distributed notification scheduler.
//!
//! Booking deadlines become jobs in a time-ordered queue held by the
//! coordination store. Three independent paths execute them:
//!
//! - the leader's [`processor`], polling the queue;
//! - the [`watchdog`] on every instance, taking over when nobody leads;
//! - the [`reconciler`] on every instance, re-deriving missed jobs from
//!   booking state when the queue itself is lost.
//!
//! All three share the [`claim`] protocol, and the [`executor`] is idempotent
//! on booking state, so overlapping runs are harmless.

use std::sync::Arc;

use crate::coordination::CoordinationStore;

pub mod claim;
pub mod coordinator;
pub mod executor;
pub mod job;
pub mod keys;
pub mod leadership;
pub mod notify;
pub mod processor;
pub mod publisher;
pub mod queue;
pub mod reconciler;
pub mod task;
pub mod watchdog;

/// Store handle shared by every scheduler component.
pub type SharedStore = Arc<dyn CoordinationStore>;

pub use claim::{ClaimOutcome, CounterSnapshot, ExecutionCounters, JobClaimer, TickSummary};
pub use coordinator::{NotificationScheduler, SchedulerDeps, SchedulerError, SchedulerStats};
pub use executor::{
    BookingJobExecutor, ExecutionError, ExecutionOutcome, JobExecutor, SkipReason,
};
pub use job::{GraceExpirationPayload, Job, JobId, JobKind, JobType, SlotStartPayload};
pub use keys::KeySpace;
pub use leadership::{LeadershipManager, Transition};
pub use notify::{
    EmailTemplate, LoggingNotificationSender, NotificationSender, RecordingNotificationSender,
    SentNotification,
};
pub use processor::JobProcessor;
pub use publisher::{ExecutionPath, JobEventPublisher, JobEventSink, SchedulerEvent};
pub use queue::JobQueue;
pub use reconciler::{BackupReconciler, ReconcileError};
pub use task::{TaskHandle, spawn_periodic};
pub use watchdog::FailSafeWatchdog;
