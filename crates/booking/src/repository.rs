//! Booking persistence port.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};

use stationhub_core::{AggregateRoot, BookingId, ExpectedVersion};

use crate::booking::{Booking, BookingStatus};

/// Repository error.
#[derive(Debug, Clone, thiserror::Error)]
pub enum RepositoryError {
    #[error("booking not found: {0}")]
    NotFound(BookingId),
    #[error("version conflict on booking {id}: expected {expected:?}, actual {actual}")]
    Conflict {
        id: BookingId,
        expected: ExpectedVersion,
        actual: u64,
    },
    #[error("storage error: {0}")]
    Storage(String),
}

/// Read/write access to bookings.
///
/// `save` is an optimistic write: it fails with [`RepositoryError::Conflict`]
/// when the stored version differs from `expected`. Because every status
/// change bumps the version, a matching version also pins the status the
/// caller observed when it loaded the booking.
pub trait BookingRepository: Send + Sync {
    fn find_by_id(&self, id: BookingId) -> Result<Option<Booking>, RepositoryError>;

    /// Persist the booking and update its version in place.
    fn save(&self, booking: &mut Booking, expected: ExpectedVersion) -> Result<(), RepositoryError>;

    /// Confirmed bookings whose start time is at or before `cutoff` and whose
    /// slot-start notice was never applied. Oldest first.
    fn find_unstarted_before(
        &self,
        cutoff: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Booking>, RepositoryError>;

    /// Confirmed bookings whose grace deadline is at or before `cutoff`.
    /// Oldest deadline first.
    fn find_unexpired_before(
        &self,
        cutoff: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Booking>, RepositoryError>;
}

impl<R> BookingRepository for Arc<R>
where
    R: BookingRepository + ?Sized,
{
    fn find_by_id(&self, id: BookingId) -> Result<Option<Booking>, RepositoryError> {
        (**self).find_by_id(id)
    }

    fn save(&self, booking: &mut Booking, expected: ExpectedVersion) -> Result<(), RepositoryError> {
        (**self).save(booking, expected)
    }

    fn find_unstarted_before(
        &self,
        cutoff: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Booking>, RepositoryError> {
        (**self).find_unstarted_before(cutoff, limit)
    }

    fn find_unexpired_before(
        &self,
        cutoff: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Booking>, RepositoryError> {
        (**self).find_unexpired_before(cutoff, limit)
    }
}

/// In-memory booking repository for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryBookingRepository {
    bookings: RwLock<HashMap<BookingId, Booking>>,
    unavailable: AtomicBool,
}

impl InMemoryBookingRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Simulate a database outage: every call fails with `Storage` while set.
    pub fn set_available(&self, available: bool) {
        self.unavailable.store(!available, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<(), RepositoryError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(RepositoryError::Storage("repository unavailable".to_string()));
        }
        Ok(())
    }

    fn query<F, K>(&self, filter: F, sort_key: K, limit: usize) -> Result<Vec<Booking>, RepositoryError>
    where
        F: Fn(&Booking) -> bool,
        K: Fn(&Booking) -> DateTime<Utc>,
    {
        self.check_available()?;
        let bookings = self.bookings.read().unwrap();
        let mut result: Vec<_> = bookings.values().filter(|b| filter(b)).cloned().collect();
        result.sort_by_key(|b| sort_key(b));
        result.truncate(limit);
        Ok(result)
    }
}

impl BookingRepository for InMemoryBookingRepository {
    fn find_by_id(&self, id: BookingId) -> Result<Option<Booking>, RepositoryError> {
        self.check_available()?;
        Ok(self.bookings.read().unwrap().get(&id).cloned())
    }

    fn save(&self, booking: &mut Booking, expected: ExpectedVersion) -> Result<(), RepositoryError> {
        self.check_available()?;
        let mut bookings = self.bookings.write().unwrap();
        let id = booking.id_typed();

        let actual = match bookings.get(&id) {
            Some(stored) => stored.version(),
            None if matches!(expected, ExpectedVersion::Exact(_)) => {
                return Err(RepositoryError::NotFound(id));
            }
            None => 0,
        };

        if !expected.matches(actual) {
            return Err(RepositoryError::Conflict {
                id,
                expected,
                actual,
            });
        }

        booking.record_saved(actual + 1);
        bookings.insert(id, booking.clone());
        Ok(())
    }

    fn find_unstarted_before(
        &self,
        cutoff: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Booking>, RepositoryError> {
        self.query(
            |b| b.awaiting_start() && b.start_time() <= cutoff,
            |b| b.start_time(),
            limit,
        )
    }

    fn find_unexpired_before(
        &self,
        cutoff: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Booking>, RepositoryError> {
        self.query(
            |b| b.status() == BookingStatus::Confirmed && b.grace_deadline() <= cutoff,
            |b| b.grace_deadline(),
            limit,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::booking::{Contact, NewBooking};
    use chrono::{TimeDelta, TimeZone};
    use stationhub_core::{StationId, UserId};

    fn at(minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 5, 1, 9, minute, 0).unwrap()
    }

    fn booking_starting(start: DateTime<Utc>) -> Booking {
        Booking::confirm(NewBooking {
            id: BookingId::new(),
            user_id: UserId::new(),
            station_id: StationId::new(),
            contact: Contact::default(),
            start_time: start,
            end_time: start + TimeDelta::hours(1),
            grace_period: Some(TimeDelta::minutes(10)),
        })
        .unwrap()
    }

    #[test]
    fn save_assigns_versions() {
        let repo = InMemoryBookingRepository::new();
        let mut b = booking_starting(at(0));

        repo.save(&mut b, ExpectedVersion::Any).unwrap();
        assert_eq!(b.version(), 1);

        b.mark_slot_started(at(0)).unwrap();
        repo.save(&mut b, ExpectedVersion::Exact(1)).unwrap();
        assert_eq!(b.version(), 2);

        let stored = repo.find_by_id(b.id_typed()).unwrap().unwrap();
        assert!(stored.is_slot_started());
    }

    #[test]
    fn stale_save_is_a_conflict() {
        let repo = InMemoryBookingRepository::new();
        let mut b = booking_starting(at(0));
        repo.save(&mut b, ExpectedVersion::Any).unwrap();

        let mut first = repo.find_by_id(b.id_typed()).unwrap().unwrap();
        let mut second = first.clone();

        first.check_in(at(1)).unwrap();
        repo.save(&mut first, ExpectedVersion::Exact(1)).unwrap();

        second.mark_slot_started(at(1)).unwrap();
        let err = repo.save(&mut second, ExpectedVersion::Exact(1)).unwrap_err();
        assert!(matches!(err, RepositoryError::Conflict { actual: 2, .. }));
    }

    #[test]
    fn exact_save_of_unknown_booking_is_not_found() {
        let repo = InMemoryBookingRepository::new();
        let mut b = booking_starting(at(0));
        assert!(matches!(
            repo.save(&mut b, ExpectedVersion::Exact(1)),
            Err(RepositoryError::NotFound(_))
        ));
    }

    #[test]
    fn overdue_queries_filter_by_state_and_deadline() {
        let repo = InMemoryBookingRepository::new();

        let mut early = booking_starting(at(0));
        let mut late = booking_starting(at(30));
        let mut started = booking_starting(at(5));
        started.mark_slot_started(at(5)).unwrap();
        let mut checked_in = booking_starting(at(1));
        checked_in.check_in(at(1)).unwrap();

        for b in [&mut early, &mut late, &mut started, &mut checked_in] {
            repo.save(b, ExpectedVersion::Any).unwrap();
        }

        let unstarted = repo.find_unstarted_before(at(20), 10).unwrap();
        assert_eq!(unstarted.len(), 1);
        assert_eq!(unstarted[0].id_typed(), early.id_typed());

        // Grace is 10 minutes: early (09:10) and started (09:15) are past 09:20.
        let unexpired = repo.find_unexpired_before(at(20), 10).unwrap();
        let ids: Vec<_> = unexpired.iter().map(|b| b.id_typed()).collect();
        assert_eq!(ids, vec![early.id_typed(), started.id_typed()]);

        assert_eq!(repo.find_unexpired_before(at(20), 1).unwrap().len(), 1);
    }

    #[test]
    fn outage_surfaces_as_storage_error() {
        let repo = InMemoryBookingRepository::new();
        repo.set_available(false);
        assert!(matches!(
            repo.find_by_id(BookingId::new()),
            Err(RepositoryError::Storage(_))
        ));
    }
}
