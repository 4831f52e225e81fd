//! Scheduled job types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stationhub_booking::{Booking, NoticeKind};
use stationhub_core::{BookingId, StationId, UserId};

/// Job type. Also the prefix of the deterministic job id.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    SlotStart,
    GraceExpiration,
}

impl JobType {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobType::SlotStart => "slot_start",
            JobType::GraceExpiration => "grace_expiration",
        }
    }

    fn id_prefix(&self) -> &'static str {
        match self {
            JobType::SlotStart => "start",
            JobType::GraceExpiration => "grace",
        }
    }

    pub fn notice(&self) -> NoticeKind {
        match self {
            JobType::SlotStart => NoticeKind::SlotStart,
            JobType::GraceExpiration => NoticeKind::GraceExpiration,
        }
    }

    pub fn all() -> [JobType; 2] {
        [JobType::SlotStart, JobType::GraceExpiration]
    }
}

impl core::fmt::Display for JobType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Deterministic job identifier: `<prefix>_<bookingId>`.
///
/// Scheduling the same job twice produces the same id, so the second enqueue
/// overwrites the first instead of duplicating it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    pub fn for_booking(job_type: JobType, booking_id: BookingId) -> Self {
        Self(format!("{}_{}", job_type.id_prefix(), booking_id))
    }

    /// Rebuild an id read back from the store.
    pub(crate) fn from_stored(raw: String) -> Self {
        Self(raw)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for JobId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Denormalized ids carried with a slot-start job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotStartPayload {
    pub user_id: UserId,
    pub station_id: StationId,
}

/// Denormalized ids carried with a grace-expiration job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraceExpirationPayload {
    pub user_id: UserId,
    pub station_id: StationId,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub slot_start: DateTime<Utc>,
}

/// Job kind with its strongly-typed payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum JobKind {
    SlotStart(SlotStartPayload),
    GraceExpiration(GraceExpirationPayload),
}

impl JobKind {
    pub fn job_type(&self) -> JobType {
        match self {
            JobKind::SlotStart(_) => JobType::SlotStart,
            JobKind::GraceExpiration(_) => JobType::GraceExpiration,
        }
    }
}

/// A unit of scheduled work. Never mutated once enqueued.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub booking_id: BookingId,
    /// When the job becomes due; the queue score (UTC epoch millis).
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub execute_at: DateTime<Utc>,
    pub kind: JobKind,
}

impl Job {
    /// The job that fires when the booked slot begins.
    pub fn slot_start(booking: &Booking) -> Self {
        let booking_id = booking.id_typed();
        Self {
            id: JobId::for_booking(JobType::SlotStart, booking_id),
            booking_id,
            execute_at: booking.start_time(),
            kind: JobKind::SlotStart(SlotStartPayload {
                user_id: booking.user_id(),
                station_id: booking.station_id(),
            }),
        }
    }

    /// The no-show cutoff at the end of the grace period.
    pub fn grace_expiration(booking: &Booking) -> Self {
        let booking_id = booking.id_typed();
        Self {
            id: JobId::for_booking(JobType::GraceExpiration, booking_id),
            booking_id,
            execute_at: booking.grace_deadline(),
            kind: JobKind::GraceExpiration(GraceExpirationPayload {
                user_id: booking.user_id(),
                station_id: booking.station_id(),
                slot_start: booking.start_time(),
            }),
        }
    }

    pub fn for_type(job_type: JobType, booking: &Booking) -> Self {
        match job_type {
            JobType::SlotStart => Self::slot_start(booking),
            JobType::GraceExpiration => Self::grace_expiration(booking),
        }
    }

    pub fn job_type(&self) -> JobType {
        self.kind.job_type()
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.execute_at <= now
    }
}
