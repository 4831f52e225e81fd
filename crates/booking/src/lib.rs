//! Booking domain as seen by the notification scheduler.
//!
//! The CRUD layer owns bookings; this crate carries the part of the record the
//! scheduler reads and mutates (status, start/grace deadlines, notification
//! flags) and the repository port it talks to. Pure logic, no IO.

pub mod booking;
pub mod repository;

pub use booking::{
    Booking, BookingStatus, CancellationInfo, CancelledBy, ChannelFlags, Contact, NewBooking,
    NoticeKind, NotificationChannel, NotificationLog,
};
pub use repository::{BookingRepository, InMemoryBookingRepository, RepositoryError};
