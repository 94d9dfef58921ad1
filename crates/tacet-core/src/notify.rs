//! Outward notification seam.
//!
//! The booking flow reports created appointments to a sink after the
//! transaction commits. A failing sink is logged and swallowed; notification
//! must never fail a booking.

use chrono::{DateTime, Utc};
use tacet_storage::{AppointmentId, AppointmentStatus, TenantId, TunnelId};
use thiserror::Error;

#[derive(Clone, Debug)]
pub struct BookingNotification {
    pub tenant: TenantId,
    pub tunnel_id: TunnelId,
    pub appointment_id: AppointmentId,
    pub appointment_date: DateTime<Utc>,
    pub status: AppointmentStatus,
}

#[derive(Debug, Error)]
#[error("notification failed: {0}")]
pub struct NotifyError(pub String);

#[async_trait::async_trait]
pub trait NotificationSink: Send + Sync {
    async fn booking_created(&self, note: &BookingNotification) -> Result<(), NotifyError>;
}

/// Sink that drops everything. Default for tests and headless deployments.
pub struct NoopSink;

#[async_trait::async_trait]
impl NotificationSink for NoopSink {
    async fn booking_created(&self, _note: &BookingNotification) -> Result<(), NotifyError> {
        Ok(())
    }
}
