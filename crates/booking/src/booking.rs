use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use stationhub_core::{AggregateRoot, BookingId, DomainError, DomainResult, StationId, UserId};

/// Grace period applied when a booking does not specify one.
pub fn default_grace_period() -> TimeDelta {
    TimeDelta::minutes(15)
}

/// Lifecycle status of a booking.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BookingStatus {
    Confirmed,
    Active,
    Completed,
    /// No-show: the grace period ran out without a check-in.
    Expired,
    Cancelled,
}

impl BookingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::Confirmed => "confirmed",
            BookingStatus::Active => "active",
            BookingStatus::Completed => "completed",
            BookingStatus::Expired => "expired",
            BookingStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            BookingStatus::Completed | BookingStatus::Expired | BookingStatus::Cancelled
        )
    }
}

impl core::fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which time-triggered notice a flag refers to.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoticeKind {
    SlotStart,
    GraceExpiration,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationChannel {
    Email,
    Sms,
}

/// Sent flags for one notice.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelFlags {
    pub email_sent: bool,
    pub sms_sent: bool,
}

impl ChannelFlags {
    pub fn is_sent(&self, channel: NotificationChannel) -> bool {
        match channel {
            NotificationChannel::Email => self.email_sent,
            NotificationChannel::Sms => self.sms_sent,
        }
    }

    fn mark(&mut self, channel: NotificationChannel) {
        match channel {
            NotificationChannel::Email => self.email_sent = true,
            NotificationChannel::Sms => self.sms_sent = true,
        }
    }
}

/// Per-notice, per-channel record of what has already been sent.
///
/// Used to avoid re-sending when a job runs more than once.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationLog {
    pub slot_start: ChannelFlags,
    pub grace_expiration: ChannelFlags,
}

impl NotificationLog {
    pub fn flags(&self, kind: NoticeKind) -> ChannelFlags {
        match kind {
            NoticeKind::SlotStart => self.slot_start,
            NoticeKind::GraceExpiration => self.grace_expiration,
        }
    }

    fn flags_mut(&mut self, kind: NoticeKind) -> &mut ChannelFlags {
        match kind {
            NoticeKind::SlotStart => &mut self.slot_start,
            NoticeKind::GraceExpiration => &mut self.grace_expiration,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelledBy {
    User,
    System,
}

/// Metadata attached when a booking ends without being used.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancellationInfo {
    pub reason: String,
    pub cancelled_at: DateTime<Utc>,
    pub cancelled_by: CancelledBy,
}

/// Where notices for a booking are delivered.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contact {
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
}

/// Input for creating a confirmed booking.
#[derive(Debug, Clone)]
pub struct NewBooking {
    pub id: BookingId,
    pub user_id: UserId,
    pub station_id: StationId,
    pub contact: Contact,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub grace_period: Option<TimeDelta>,
}

/// A reserved station slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Booking {
    id: BookingId,
    user_id: UserId,
    station_id: StationId,
    contact: Contact,
    start_time: DateTime<Utc>,
    end_time: DateTime<Utc>,
    grace_period: TimeDelta,
    status: BookingStatus,
    slot_started_at: Option<DateTime<Utc>>,
    checked_in_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    notifications: NotificationLog,
    cancellation: Option<CancellationInfo>,
    version: u64,
}

impl Booking {
    /// Create a booking in `confirmed` state.
    pub fn confirm(new: NewBooking) -> DomainResult<Self> {
        if new.end_time <= new.start_time {
            return Err(DomainError::validation("end_time must be after start_time"));
        }
        let grace_period = new.grace_period.unwrap_or_else(default_grace_period);
        if grace_period < TimeDelta::zero() {
            return Err(DomainError::validation("grace period cannot be negative"));
        }

        Ok(Self {
            id: new.id,
            user_id: new.user_id,
            station_id: new.station_id,
            contact: new.contact,
            start_time: new.start_time,
            end_time: new.end_time,
            grace_period,
            status: BookingStatus::Confirmed,
            slot_started_at: None,
            checked_in_at: None,
            completed_at: None,
            notifications: NotificationLog::default(),
            cancellation: None,
            version: 0,
        })
    }

    pub fn id_typed(&self) -> BookingId {
        self.id
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    pub fn station_id(&self) -> StationId {
        self.station_id
    }

    pub fn contact(&self) -> &Contact {
        &self.contact
    }

    pub fn start_time(&self) -> DateTime<Utc> {
        self.start_time
    }

    pub fn end_time(&self) -> DateTime<Utc> {
        self.end_time
    }

    pub fn grace_period(&self) -> TimeDelta {
        self.grace_period
    }

    /// Instant after which an un-checked-in booking becomes a no-show.
    pub fn grace_deadline(&self) -> DateTime<Utc> {
        self.start_time + self.grace_period
    }

    pub fn status(&self) -> BookingStatus {
        self.status
    }

    pub fn slot_started_at(&self) -> Option<DateTime<Utc>> {
        self.slot_started_at
    }

    pub fn is_slot_started(&self) -> bool {
        self.slot_started_at.is_some()
    }

    pub fn checked_in_at(&self) -> Option<DateTime<Utc>> {
        self.checked_in_at
    }

    pub fn notifications(&self) -> &NotificationLog {
        &self.notifications
    }

    pub fn cancellation(&self) -> Option<&CancellationInfo> {
        self.cancellation.as_ref()
    }

    /// Confirmed and the slot-start notice has not been applied yet.
    pub fn awaiting_start(&self) -> bool {
        self.status == BookingStatus::Confirmed && self.slot_started_at.is_none()
    }

    pub fn is_notified(&self, kind: NoticeKind, channel: NotificationChannel) -> bool {
        self.notifications.flags(kind).is_sent(channel)
    }

    pub fn mark_notified(&mut self, kind: NoticeKind, channel: NotificationChannel) {
        self.notifications.flags_mut(kind).mark(channel);
    }

    /// Record the version assigned by the repository after a successful save.
    pub fn record_saved(&mut self, version: u64) {
        self.version = version;
    }

    /// `confirmed -> confirmed+started`.
    pub fn mark_slot_started(&mut self, at: DateTime<Utc>) -> DomainResult<()> {
        self.ensure_status(BookingStatus::Confirmed, "mark slot started")?;
        if self.slot_started_at.is_some() {
            return Err(DomainError::invalid_transition("slot already started"));
        }
        self.slot_started_at = Some(at);
        Ok(())
    }

    /// `confirmed -> active`. Allowed before or after the slot-start notice.
    pub fn check_in(&mut self, at: DateTime<Utc>) -> DomainResult<()> {
        self.ensure_status(BookingStatus::Confirmed, "check in")?;
        self.status = BookingStatus::Active;
        self.checked_in_at = Some(at);
        Ok(())
    }

    /// `confirmed -> expired` when the grace period ran out without a check-in.
    pub fn expire_no_show(&mut self, at: DateTime<Utc>) -> DomainResult<()> {
        self.ensure_status(BookingStatus::Confirmed, "expire")?;
        if self.slot_started_at.is_none() {
            // Grace job overtook the start job; record the start as well.
            self.slot_started_at = Some(self.start_time);
        }
        self.status = BookingStatus::Expired;
        self.cancellation = Some(CancellationInfo {
            reason: "no_show".to_string(),
            cancelled_at: at,
            cancelled_by: CancelledBy::System,
        });
        Ok(())
    }

    /// `confirmed -> cancelled`.
    pub fn cancel(
        &mut self,
        at: DateTime<Utc>,
        reason: impl Into<String>,
        by: CancelledBy,
    ) -> DomainResult<()> {
        self.ensure_status(BookingStatus::Confirmed, "cancel")?;
        self.status = BookingStatus::Cancelled;
        self.cancellation = Some(CancellationInfo {
            reason: reason.into(),
            cancelled_at: at,
            cancelled_by: by,
        });
        Ok(())
    }

    /// `active -> completed`.
    pub fn complete(&mut self, at: DateTime<Utc>) -> DomainResult<()> {
        self.ensure_status(BookingStatus::Active, "complete")?;
        self.status = BookingStatus::Completed;
        self.completed_at = Some(at);
        Ok(())
    }

    fn ensure_status(&self, expected: BookingStatus, action: &str) -> DomainResult<()> {
        if self.status != expected {
            return Err(DomainError::invalid_transition(format!(
                "cannot {action} a booking in status {}",
                self.status
            )));
        }
        Ok(())
    }
}

impl AggregateRoot for Booking {
    type Id = BookingId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}
