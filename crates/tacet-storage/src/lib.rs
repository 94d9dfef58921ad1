//! Storage abstraction for tacet.
//!
//! Backend crates (e.g. tacet-store-sqlite) implement the traits in
//! [`store`] so the service layer never depends on a database engine or
//! schema details. Two datastores exist: a per-tenant store (tunnels,
//! appointments, staff key shares, reset tokens) and a central store
//! (staff authorization, staff key material, throttle records).

use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

mod store;

pub use store::{CentralStore, TenantStore};

/// Uniform error type for all storage backends.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("not found")]
    NotFound,
    #[error("already exists")]
    AlreadyExists,
    #[error("conflict")]
    Conflict,
    #[error("backend error: {0}")]
    Backend(String),
}

// ─────────────────────────────── Identifiers ──────────────────────────────────

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct TunnelId(pub Uuid);

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct AppointmentId(pub Uuid);

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct UserId(pub Uuid);

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ChannelId(pub Uuid);

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct AgentId(pub Uuid);

/// Tenant identifier as routed by the outer layers (slug, not a UUID).
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct TenantId(pub String);

impl std::fmt::Display for TenantId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ───────────────────────────── Appointment status ─────────────────────────────

/// Server-driven appointment lifecycle. Clients never change status after
/// creation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AppointmentStatus {
    New,
    Confirmed,
    Held,
    Rejected,
    NoShow,
}

impl AppointmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AppointmentStatus::New => "NEW",
            AppointmentStatus::Confirmed => "CONFIRMED",
            AppointmentStatus::Held => "HELD",
            AppointmentStatus::Rejected => "REJECTED",
            AppointmentStatus::NoShow => "NO_SHOW",
        }
    }

    pub fn parse(s: &str) -> Result<Self, StoreError> {
        match s {
            "NEW" => Ok(AppointmentStatus::New),
            "CONFIRMED" => Ok(AppointmentStatus::Confirmed),
            "HELD" => Ok(AppointmentStatus::Held),
            "REJECTED" => Ok(AppointmentStatus::Rejected),
            "NO_SHOW" => Ok(AppointmentStatus::NoShow),
            other => Err(StoreError::Backend(format!(
                "unknown appointment status: {other}"
            ))),
        }
    }

    /// Allowed server-driven transitions. Terminal states allow nothing.
    pub fn can_transition_to(&self, to: AppointmentStatus) -> bool {
        use AppointmentStatus::*;
        matches!(
            (self, to),
            (New, Confirmed) | (New, Rejected) | (Confirmed, Held) | (Confirmed, Rejected)
                | (Confirmed, NoShow)
        )
    }
}

impl std::fmt::Display for AppointmentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ──────────────────────────────── Records ─────────────────────────────────────

/// One client's booking relationship. The private key share is one Shamir
/// share, never the full key; the wrapped tunnel key is the client's own
/// envelope over the session key.
#[derive(Clone, Debug)]
pub struct Tunnel {
    pub id: TunnelId,
    pub email_hash: String,
    pub client_public_key: Vec<u8>,
    pub client_private_key_share: Vec<u8>,
    pub client_encrypted_tunnel_key: Vec<u8>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Non-secret projection of a tunnel. This is all `list_tunnels` ever
/// returns; the share and wrapped key are write-only through that interface.
#[derive(Clone, Debug)]
pub struct TunnelSummary {
    pub id: TunnelId,
    pub email_hash: String,
    pub client_public_key: Vec<u8>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Point-in-time envelope of a tunnel's session key for one staff member.
/// Immutable after creation.
#[derive(Clone, Debug)]
pub struct StaffKeyShare {
    pub tunnel_id: TunnelId,
    pub user_id: UserId,
    pub encrypted_tunnel_key: Vec<u8>,
}

#[derive(Clone, Debug)]
pub struct Appointment {
    pub id: AppointmentId,
    pub tunnel_id: TunnelId,
    pub channel_id: ChannelId,
    pub agent_id: AgentId,
    pub appointment_date: DateTime<Utc>,
    pub duration_minutes: i32,
    pub encrypted_payload: Vec<u8>,
    pub iv: Vec<u8>,
    pub auth_tag: Vec<u8>,
    pub status: AppointmentStatus,
}

/// Active key material for one staff member. The stored shard alone is not
/// the private key: `private_key = server_shard XOR passkey_shard`.
#[derive(Clone, Debug)]
pub struct StaffCrypto {
    pub user_id: UserId,
    pub public_key: Vec<u8>,
    pub private_key_share: Vec<u8>,
    pub passkey_id: String,
    pub is_active: bool,
}

/// Single-use, time-boxed PIN reset token.
#[derive(Clone, Debug)]
pub struct PinResetToken {
    pub token: String,
    pub email_hash: String,
    pub expires_at: DateTime<Utc>,
    pub used: bool,
}

/// Escalating-backoff state for one hashed identifier.
#[derive(Clone, Debug)]
pub struct ThrottleRecord {
    pub id: String,
    pub failed_attempts: i32,
    pub last_attempt_at: DateTime<Utc>,
    pub reset_at: DateTime<Utc>,
}

// ─────────────────────────────── Parameters ───────────────────────────────────

#[derive(Clone, Debug)]
pub struct NewTunnel {
    pub email_hash: String,
    pub client_public_key: Vec<u8>,
    pub client_private_key_share: Vec<u8>,
    pub client_encrypted_tunnel_key: Vec<u8>,
}

#[derive(Clone, Debug)]
pub struct NewAppointment {
    pub tunnel_id: TunnelId,
    pub channel_id: ChannelId,
    pub agent_id: AgentId,
    pub appointment_date: DateTime<Utc>,
    pub duration_minutes: i32,
    pub encrypted_payload: Vec<u8>,
    pub iv: Vec<u8>,
    pub auth_tag: Vec<u8>,
    pub status: AppointmentStatus,
}

#[derive(Clone, Debug)]
pub struct NewStaffKeyShare {
    pub user_id: UserId,
    pub encrypted_tunnel_key: Vec<u8>,
}

/// Everything the first booking writes in one tenant transaction: the tunnel,
/// its first appointment, and one wrapped-key row per authorized staff member.
#[derive(Clone, Debug)]
pub struct CreateBookingRecords {
    pub tunnel: NewTunnel,
    pub channel_id: ChannelId,
    pub agent_id: AgentId,
    pub appointment_date: DateTime<Utc>,
    pub duration_minutes: i32,
    pub encrypted_payload: Vec<u8>,
    pub iv: Vec<u8>,
    pub auth_tag: Vec<u8>,
    pub status: AppointmentStatus,
    pub staff_shares: Vec<NewStaffKeyShare>,
}

/// Client key rotation applied by a completed PIN reset.
#[derive(Clone, Debug)]
pub struct RotateClientKeys {
    pub client_public_key: Vec<u8>,
    pub client_private_key_share: Vec<u8>,
    pub client_encrypted_tunnel_key: Vec<u8>,
}
