//! The store traits that backends implement.

use chrono::{DateTime, Utc};

use crate::{
    Appointment, AppointmentId, AppointmentStatus, CreateBookingRecords, NewAppointment,
    PinResetToken, RotateClientKeys, StaffCrypto, StaffKeyShare, StoreError, TenantId,
    ThrottleRecord, Tunnel, TunnelId, TunnelSummary, UserId,
};

/// Per-tenant datastore: tunnels, appointments, staff key shares, reset
/// tokens. Composite methods are atomic inside the backend — callers never
/// see a half-written booking or a half-consumed reset token.
#[async_trait::async_trait]
pub trait TenantStore: Send + Sync {
    // ───────────────────────────── Tunnels & bookings ──────────────────────────

    /// Insert tunnel + first appointment + all staff key shares in one
    /// transaction. Fails `AlreadyExists` when a tunnel for the email hash
    /// exists.
    async fn create_booking(
        &self,
        records: &CreateBookingRecords,
    ) -> Result<(TunnelId, AppointmentId), StoreError>;

    /// Book a further appointment against an existing tunnel.
    async fn create_appointment(
        &self,
        appointment: &NewAppointment,
    ) -> Result<AppointmentId, StoreError>;

    async fn get_tunnel(&self, id: &TunnelId) -> Result<Tunnel, StoreError>;

    async fn get_tunnel_by_email_hash(&self, email_hash: &str) -> Result<Tunnel, StoreError>;

    /// Non-secret projections only; the private share and wrapped tunnel key
    /// never leave through this method.
    async fn list_tunnels(&self) -> Result<Vec<TunnelSummary>, StoreError>;

    async fn get_appointment(&self, id: &AppointmentId) -> Result<Appointment, StoreError>;

    async fn list_appointments(&self, tunnel: &TunnelId) -> Result<Vec<Appointment>, StoreError>;

    /// Compare-and-set status update. Fails `Conflict` when the row is no
    /// longer in `expected`.
    async fn set_appointment_status(
        &self,
        id: &AppointmentId,
        expected: AppointmentStatus,
        to: AppointmentStatus,
    ) -> Result<(), StoreError>;

    // ───────────────────────────── Staff key shares ────────────────────────────

    async fn get_staff_key_share(
        &self,
        tunnel: &TunnelId,
        user: &UserId,
    ) -> Result<StaffKeyShare, StoreError>;

    async fn list_staff_key_shares(
        &self,
        tunnel: &TunnelId,
    ) -> Result<Vec<StaffKeyShare>, StoreError>;

    /// Drop all of a staff member's envelopes, for when they are removed
    /// from the tenant.
    async fn delete_staff_key_shares_for_user(&self, user: &UserId) -> Result<u64, StoreError>;

    // ───────────────────────────── PIN reset tokens ────────────────────────────

    async fn create_reset_token(&self, token: &PinResetToken) -> Result<(), StoreError>;

    async fn get_reset_token(&self, token: &str) -> Result<PinResetToken, StoreError>;

    /// Atomically mark the token used and rotate the tunnel's client key
    /// material. Fails `Conflict` when the token is already used or expired,
    /// `NotFound` when it is unknown.
    async fn consume_reset_and_rotate(
        &self,
        token: &str,
        now: DateTime<Utc>,
        rotate: &RotateClientKeys,
    ) -> Result<TunnelId, StoreError>;
}

/// Central datastore: staff authorization per tenant, staff key material,
/// and throttle records shared by all challenge types.
#[async_trait::async_trait]
pub trait CentralStore: Send + Sync {
    // ───────────────────────────── Staff authorization ─────────────────────────

    async fn set_access(
        &self,
        tenant: &TenantId,
        user: &UserId,
        granted: bool,
    ) -> Result<(), StoreError>;

    async fn is_access_granted(&self, tenant: &TenantId, user: &UserId)
        -> Result<bool, StoreError>;

    /// All access-granted staff of a tenant that currently hold active key
    /// material, with their public keys — the recipient set for envelope
    /// wrapping.
    async fn list_authorized_recipients(
        &self,
        tenant: &TenantId,
    ) -> Result<Vec<(UserId, Vec<u8>)>, StoreError>;

    // ───────────────────────────── Staff key material ──────────────────────────

    /// Persist fresh key material, deactivating (not merging with) any
    /// previous row for the user.
    async fn upsert_staff_crypto(&self, record: &StaffCrypto) -> Result<(), StoreError>;

    /// The user's active key material.
    async fn get_staff_crypto(&self, user: &UserId) -> Result<StaffCrypto, StoreError>;

    // ───────────────────────────── Throttle records ────────────────────────────

    async fn get_throttle(&self, id: &str) -> Result<Option<ThrottleRecord>, StoreError>;

    async fn put_throttle(&self, record: &ThrottleRecord) -> Result<(), StoreError>;

    async fn delete_throttle(&self, id: &str) -> Result<(), StoreError>;

    /// Sweep rows whose `reset_at` has passed; returns how many were deleted.
    async fn delete_expired_throttles(&self, now: DateTime<Utc>) -> Result<u64, StoreError>;
}
