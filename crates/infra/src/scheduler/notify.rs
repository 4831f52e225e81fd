//! Notification side effects.
//!
//! Senders are opaque collaborators: their failures are logged by the executor
//! and never undo a booking transition.

use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::bail;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;

use stationhub_booking::Booking;
use stationhub_core::DisplayTimezone;

/// Email templates sent by the scheduler.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmailTemplate {
    SlotStarted,
    NoShowExpired,
}

impl EmailTemplate {
    pub fn as_str(&self) -> &'static str {
        match self {
            EmailTemplate::SlotStarted => "slot_started",
            EmailTemplate::NoShowExpired => "no_show_expired",
        }
    }

    /// Template data for `booking`, with times rendered in `tz`.
    pub fn data(&self, booking: &Booking, tz: &DisplayTimezone) -> serde_json::Value {
        json!({
            "booking_id": booking.id_typed().to_string(),
            "station_id": booking.station_id().to_string(),
            "name": booking.contact().name,
            "start_time": tz.format_time(booking.start_time()),
            "end_time": tz.format_time(booking.end_time()),
            "grace_deadline": tz.format_time(booking.grace_deadline()),
        })
    }

    /// Short SMS rendering of the same notice.
    pub fn sms_text(&self, booking: &Booking, tz: &DisplayTimezone) -> String {
        match self {
            EmailTemplate::SlotStarted => format!(
                "Your charging slot has started ({}-{}). Please check in by {}.",
                tz.format_time(booking.start_time()),
                tz.format_time(booking.end_time()),
                tz.format_time(booking.grace_deadline()),
            ),
            EmailTemplate::NoShowExpired => format!(
                "Your booking for {} expired because no check-in happened by {}.",
                tz.format_time(booking.start_time()),
                tz.format_time(booking.grace_deadline()),
            ),
        }
    }
}

pub trait NotificationSender: Send + Sync {
    fn send_email(
        &self,
        template: EmailTemplate,
        recipient: &str,
        data: &serde_json::Value,
    ) -> anyhow::Result<()>;

    fn send_sms(&self, recipient: &str, text: &str) -> anyhow::Result<()>;
}

impl<T> NotificationSender for Arc<T>
where
    T: NotificationSender + ?Sized,
{
    fn send_email(
        &self,
        template: EmailTemplate,
        recipient: &str,
        data: &serde_json::Value,
    ) -> anyhow::Result<()> {
        (**self).send_email(template, recipient, data)
    }

    fn send_sms(&self, recipient: &str, text: &str) -> anyhow::Result<()> {
        (**self).send_sms(recipient, text)
    }
}

/// Sender that only logs. Used when no delivery provider is wired.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingNotificationSender;

impl NotificationSender for LoggingNotificationSender {
    fn send_email(
        &self,
        template: EmailTemplate,
        recipient: &str,
        _data: &serde_json::Value,
    ) -> anyhow::Result<()> {
        info!(template = template.as_str(), recipient, "email notification");
        Ok(())
    }

    fn send_sms(&self, recipient: &str, text: &str) -> anyhow::Result<()> {
        info!(recipient, text, "sms notification");
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SentNotification {
    Email {
        template: EmailTemplate,
        recipient: String,
        data: serde_json::Value,
    },
    Sms {
        recipient: String,
        text: String,
    },
}

/// In-memory sender for tests/dev. Can be switched into a failing mode.
#[derive(Debug, Default)]
pub struct RecordingNotificationSender {
    sent: Mutex<Vec<SentNotification>>,
    failing: AtomicBool,
}

impl RecordingNotificationSender {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn all(&self) -> Vec<SentNotification> {
        self.sent.lock().unwrap().clone()
    }

    pub fn emails(&self, template: EmailTemplate) -> usize {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|n| matches!(n, SentNotification::Email { template: t, .. } if *t == template))
            .count()
    }

    pub fn sms_count(&self) -> usize {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|n| matches!(n, SentNotification::Sms { .. }))
            .count()
    }
}

impl NotificationSender for RecordingNotificationSender {
    fn send_email(
        &self,
        template: EmailTemplate,
        recipient: &str,
        data: &serde_json::Value,
    ) -> anyhow::Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            bail!("email provider unavailable");
        }
        self.sent.lock().unwrap().push(SentNotification::Email {
            template,
            recipient: recipient.to_string(),
            data: data.clone(),
        });
        Ok(())
    }

    fn send_sms(&self, recipient: &str, text: &str) -> anyhow::Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            bail!("sms provider unavailable");
        }
        self.sent.lock().unwrap().push(SentNotification::Sms {
            recipient: recipient.to_string(),
            text: text.to_string(),
        });
        Ok(())
    }
}
