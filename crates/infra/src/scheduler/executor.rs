//! Job execution against the booking record.
//!
//! The executor is idempotent on booking state: it re-reads the booking,
//! applies the transition only when the booking is still in the expected
//! precondition, and sends only the notifications whose sent-flag is unset.
//! The processor, the watchdog and the reconciler can all call it for the same
//! job without producing a second transition or a second flag.

use std::sync::Arc;

use tracing::{debug, info, warn};

use stationhub_booking::{
    Booking, BookingRepository, BookingStatus, CancelledBy, NoticeKind, NotificationChannel,
    RepositoryError,
};
use stationhub_core::{AggregateRoot, BookingId, Clock, DisplayTimezone, DomainError, ExpectedVersion};

use super::job::{Job, JobType};
use super::notify::{EmailTemplate, NotificationSender};

/// Load-evaluate-save rounds before a version conflict becomes a failure.
const MAX_SAVE_ATTEMPTS: u32 = 3;

/// Why an executed job changed nothing.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// Booking left the precondition state (checked in, cancelled, ...).
    Status(BookingStatus),
    /// Transition and notifications were already applied.
    AlreadyApplied,
}

impl core::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            SkipReason::Status(status) => write!(f, "booking is {status}"),
            SkipReason::AlreadyApplied => f.write_str("already applied"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionOutcome {
    /// The transition (or a missing notification) was applied.
    Applied,
    /// Stale job; treated as success.
    Skipped(SkipReason),
}

impl ExecutionOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, ExecutionOutcome::Applied)
    }
}

/// Hard failure: the job stays queued and is retried.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ExecutionError {
    #[error("booking not found: {0}")]
    BookingNotFound(BookingId),
    #[error("repository error: {0}")]
    Repository(RepositoryError),
    #[error("invalid transition: {0}")]
    Transition(#[from] DomainError),
}

impl From<RepositoryError> for ExecutionError {
    fn from(e: RepositoryError) -> Self {
        match e {
            RepositoryError::NotFound(id) => ExecutionError::BookingNotFound(id),
            other => ExecutionError::Repository(other),
        }
    }
}

/// Dispatches a job to its booking transition.
pub trait JobExecutor: Send + Sync {
    fn execute(&self, job: &Job) -> Result<ExecutionOutcome, ExecutionError>;
}

impl<T> JobExecutor for Arc<T>
where
    T: JobExecutor + ?Sized,
{
    fn execute(&self, job: &Job) -> Result<ExecutionOutcome, ExecutionError> {
        (**self).execute(job)
    }
}

/// Executes slot-start and grace-expiration jobs.
pub struct BookingJobExecutor {
    bookings: Arc<dyn BookingRepository>,
    sender: Arc<dyn NotificationSender>,
    clock: Arc<dyn Clock>,
    timezone: DisplayTimezone,
}

impl core::fmt::Debug for BookingJobExecutor {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("BookingJobExecutor")
            .field("timezone", &self.timezone)
            .finish_non_exhaustive()
    }
}

impl BookingJobExecutor {
    pub fn new(
        bookings: Arc<dyn BookingRepository>,
        sender: Arc<dyn NotificationSender>,
        clock: Arc<dyn Clock>,
        timezone: DisplayTimezone,
    ) -> Self {
        Self {
            bookings,
            sender,
            clock,
            timezone,
        }
    }

    fn template(job_type: JobType) -> EmailTemplate {
        match job_type {
            JobType::SlotStart => EmailTemplate::SlotStarted,
            JobType::GraceExpiration => EmailTemplate::NoShowExpired,
        }
    }

    /// Whether the job's transition is already reflected in the booking.
    fn already_applied(job_type: JobType, booking: &Booking) -> bool {
        match job_type {
            JobType::SlotStart => {
                booking.status() == BookingStatus::Confirmed && booking.is_slot_started()
            }
            JobType::GraceExpiration => {
                booking.status() == BookingStatus::Expired
                    && booking
                        .cancellation()
                        .is_some_and(|c| c.cancelled_by == CancelledBy::System)
            }
        }
    }

    fn apply(&self, job_type: JobType, booking: &mut Booking) -> Result<(), DomainError> {
        let now = self.clock.now();
        match job_type {
            JobType::SlotStart => booking.mark_slot_started(now),
            JobType::GraceExpiration => booking.expire_no_show(now),
        }
    }

    /// Channels with a recipient whose flag is still unset.
    fn pending_channels(kind: NoticeKind, booking: &Booking) -> Vec<NotificationChannel> {
        let contact = booking.contact();
        let mut channels = Vec::with_capacity(2);
        if contact.email.is_some() && !booking.is_notified(kind, NotificationChannel::Email) {
            channels.push(NotificationChannel::Email);
        }
        if contact.phone.is_some() && !booking.is_notified(kind, NotificationChannel::Sms) {
            channels.push(NotificationChannel::Sms);
        }
        channels
    }

    /// Send the pending notices, flag the ones that went out. Returns whether
    /// any flag changed.
    fn notify(&self, job: &Job, booking: &mut Booking) -> bool {
        let kind = job.job_type().notice();
        let template = Self::template(job.job_type());
        let mut changed = false;

        for channel in Self::pending_channels(kind, booking) {
            let contact = booking.contact();
            let sent = match channel {
                NotificationChannel::Email => {
                    let recipient = contact.email.as_deref().unwrap_or_default();
                    let data = template.data(booking, &self.timezone);
                    self.sender.send_email(template, recipient, &data)
                }
                NotificationChannel::Sms => {
                    let recipient = contact.phone.as_deref().unwrap_or_default();
                    let text = template.sms_text(booking, &self.timezone);
                    self.sender.send_sms(recipient, &text)
                }
            };

            match sent {
                Ok(()) => {
                    booking.mark_notified(kind, channel);
                    changed = true;
                }
                Err(e) => warn!(
                    job_id = %job.id,
                    channel = ?channel,
                    error = %e,
                    "notification failed"
                ),
            }
        }
        changed
    }
}

impl JobExecutor for BookingJobExecutor {
    fn execute(&self, job: &Job) -> Result<ExecutionOutcome, ExecutionError> {
        let job_type = job.job_type();
        let mut attempt = 0;

        // A conflicting save means the booking moved under us: re-read and
        // re-evaluate, so only a real precondition mismatch ends as a skip.
        let mut booking = loop {
            attempt += 1;
            let mut booking = self
                .bookings
                .find_by_id(job.booking_id)?
                .ok_or(ExecutionError::BookingNotFound(job.booking_id))?;

            if Self::already_applied(job_type, &booking) {
                if Self::pending_channels(job_type.notice(), &booking).is_empty() {
                    return Ok(ExecutionOutcome::Skipped(SkipReason::AlreadyApplied));
                }
                break booking;
            }
            if booking.status() != BookingStatus::Confirmed {
                debug!(job_id = %job.id, status = %booking.status(), "stale job skipped");
                return Ok(ExecutionOutcome::Skipped(SkipReason::Status(booking.status())));
            }

            self.apply(job_type, &mut booking)?;
            let expected = ExpectedVersion::Exact(booking.version());
            match self.bookings.save(&mut booking, expected) {
                Ok(()) => {
                    info!(
                        job_id = %job.id,
                        booking_id = %job.booking_id,
                        status = %booking.status(),
                        "booking transition applied"
                    );
                    break booking;
                }
                Err(RepositoryError::Conflict { .. }) if attempt < MAX_SAVE_ATTEMPTS => {
                    debug!(job_id = %job.id, attempt, "booking changed concurrently; re-evaluating");
                }
                Err(e) => return Err(e.into()),
            }
        };

        if self.notify(job, &mut booking) {
            let expected = ExpectedVersion::Exact(booking.version());
            if let Err(e) = self.bookings.save(&mut booking, expected) {
                // The notice went out; losing the flag only risks a resend.
                warn!(job_id = %job.id, error = %e, "failed to persist notification flags");
            }
        }

        Ok(ExecutionOutcome::Applied)
    }
}
