//! Tunnel and booking lifecycle.
//!
//! The first booking by a client creates their tunnel: a fresh session key
//! encrypts the appointment payload, and the key is wrapped once for the
//! client and once per authorized staff member. The plaintext key lives only
//! on the stack inside `create_tunnel` and is zeroized on drop.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tacet_crypto::{generate_tunnel_key, kem, AuthTag, Iv, IV_LEN, TAG_LEN};
use tacet_storage::{
    AgentId, Appointment, AppointmentId, AppointmentStatus, CentralStore, ChannelId,
    CreateBookingRecords, NewAppointment, NewStaffKeyShare, NewTunnel, StoreError, TenantId,
    TunnelId, TunnelSummary, UserId,
};
use tracing::{info, warn};
use zeroize::Zeroizing;

use crate::envelope::{unwrap_tunnel_key, wrap_tunnel_key, RecipientKind};
use crate::error::CoreError;
use crate::notify::{BookingNotification, NotificationSink};
use crate::registry::TenantRegistry;

pub struct CreateTunnelParams {
    pub email_hash: String,
    pub client_public_key: Vec<u8>,
    pub client_private_key_share: Vec<u8>,
    pub channel_id: ChannelId,
    pub agent_id: AgentId,
    pub appointment_date: DateTime<Utc>,
    pub duration_minutes: i32,
    /// Plaintext appointment payload; encrypted before it touches storage.
    pub payload: Vec<u8>,
    /// Channels that require staff confirmation start bookings as NEW.
    pub requires_confirmation: bool,
}

/// Follow-up booking on an existing tunnel. The payload arrives already
/// encrypted client-side under the established session key.
pub struct AppointmentRequest {
    pub tunnel_id: TunnelId,
    pub channel_id: ChannelId,
    pub agent_id: AgentId,
    pub appointment_date: DateTime<Utc>,
    pub duration_minutes: i32,
    pub encrypted_payload: Vec<u8>,
    pub iv: Vec<u8>,
    pub auth_tag: Vec<u8>,
    pub requires_confirmation: bool,
}

#[derive(Clone, Debug)]
pub struct BookingCreated {
    pub tunnel_id: TunnelId,
    pub appointment_id: AppointmentId,
    pub appointment_date: DateTime<Utc>,
    pub status: AppointmentStatus,
}

pub struct TunnelService {
    registry: Arc<TenantRegistry>,
    central: Arc<dyn CentralStore>,
    notifier: Arc<dyn NotificationSink>,
}

impl TunnelService {
    pub fn new(
        registry: Arc<TenantRegistry>,
        central: Arc<dyn CentralStore>,
        notifier: Arc<dyn NotificationSink>,
    ) -> Self {
        Self {
            registry,
            central,
            notifier,
        }
    }

    /// First booking: create the tunnel, its first appointment, and one
    /// wrapped-key row per authorized staff member, atomically.
    pub async fn create_tunnel(
        &self,
        tenant: &TenantId,
        params: CreateTunnelParams,
    ) -> Result<BookingCreated, CoreError> {
        if params.email_hash.is_empty() {
            return Err(CoreError::Validation("email hash must not be empty".into()));
        }
        if params.client_public_key.len() != kem::PUBLIC_KEY_LEN {
            return Err(CoreError::Validation("malformed client public key".into()));
        }
        if params.duration_minutes <= 0 {
            return Err(CoreError::Validation("duration must be positive".into()));
        }

        // Precondition, read outside the tenant transaction: at least one
        // staff member must be able to open what we are about to write. A
        // concurrent revocation between this check and the commit is a
        // tolerated race.
        let recipients = self.central.list_authorized_recipients(tenant).await?;
        if recipients.is_empty() {
            return Err(CoreError::Conflict(
                "no staff member with active key material can read this booking".into(),
            ));
        }

        let key = generate_tunnel_key();
        let (encrypted_payload, iv, auth_tag) = tacet_crypto::encrypt(&params.payload, &key)
            .map_err(|e| CoreError::Internal(format!("payload encryption failed: {e}")))?;

        let client_encrypted_tunnel_key =
            wrap_tunnel_key(&key, RecipientKind::Client, &params.client_public_key)?;

        let mut staff_shares = Vec::with_capacity(recipients.len());
        for (user_id, public_key) in &recipients {
            staff_shares.push(NewStaffKeyShare {
                user_id: user_id.clone(),
                encrypted_tunnel_key: wrap_tunnel_key(&key, RecipientKind::Staff, public_key)?,
            });
        }

        let status = if params.requires_confirmation {
            AppointmentStatus::New
        } else {
            AppointmentStatus::Confirmed
        };

        let store = self.registry.get(tenant).await?;
        let (tunnel_id, appointment_id) = store
            .create_booking(&CreateBookingRecords {
                tunnel: NewTunnel {
                    email_hash: params.email_hash,
                    client_public_key: params.client_public_key,
                    client_private_key_share: params.client_private_key_share,
                    client_encrypted_tunnel_key,
                },
                channel_id: params.channel_id,
                agent_id: params.agent_id,
                appointment_date: params.appointment_date,
                duration_minutes: params.duration_minutes,
                encrypted_payload,
                iv: iv.0.to_vec(),
                auth_tag: auth_tag.0.to_vec(),
                status,
                staff_shares,
            })
            .await
            .map_err(|e| match e {
                StoreError::AlreadyExists => {
                    CoreError::Conflict("a tunnel already exists for this client".into())
                }
                other => other.into(),
            })?;

        info!(
            tenant = %tenant,
            tunnel = %tunnel_id.0,
            recipients = recipients.len(),
            "created tunnel with first booking"
        );

        let created = BookingCreated {
            tunnel_id,
            appointment_id,
            appointment_date: params.appointment_date,
            status,
        };
        self.notify(tenant, &created).await;
        Ok(created)
    }

    /// Book a further appointment against an existing tunnel.
    pub async fn create_appointment(
        &self,
        tenant: &TenantId,
        request: AppointmentRequest,
    ) -> Result<BookingCreated, CoreError> {
        if request.iv.len() != IV_LEN || request.auth_tag.len() != TAG_LEN {
            return Err(CoreError::Validation("malformed iv or auth tag".into()));
        }
        if request.duration_minutes <= 0 {
            return Err(CoreError::Validation("duration must be positive".into()));
        }

        let status = if request.requires_confirmation {
            AppointmentStatus::New
        } else {
            AppointmentStatus::Confirmed
        };

        let store = self.registry.get(tenant).await?;
        // Surface a missing tunnel as NotFound rather than a foreign key error.
        store.get_tunnel(&request.tunnel_id).await?;

        let appointment_id = store
            .create_appointment(&NewAppointment {
                tunnel_id: request.tunnel_id.clone(),
                channel_id: request.channel_id,
                agent_id: request.agent_id,
                appointment_date: request.appointment_date,
                duration_minutes: request.duration_minutes,
                encrypted_payload: request.encrypted_payload,
                iv: request.iv,
                auth_tag: request.auth_tag,
                status,
            })
            .await?;

        let created = BookingCreated {
            tunnel_id: request.tunnel_id,
            appointment_id,
            appointment_date: request.appointment_date,
            status,
        };
        self.notify(tenant, &created).await;
        Ok(created)
    }

    /// The client's tunnels, as non-secret projections. At most one exists
    /// per email hash.
    pub async fn get_client_tunnels(
        &self,
        tenant: &TenantId,
        email_hash: &str,
    ) -> Result<Vec<TunnelSummary>, CoreError> {
        let store = self.registry.get(tenant).await?;
        match store.get_tunnel_by_email_hash(email_hash).await {
            Ok(tunnel) => Ok(vec![TunnelSummary {
                id: tunnel.id,
                email_hash: tunnel.email_hash,
                client_public_key: tunnel.client_public_key,
                created_at: tunnel.created_at,
                updated_at: tunnel.updated_at,
            }]),
            Err(StoreError::NotFound) => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn list_appointments(
        &self,
        tenant: &TenantId,
        tunnel: &TunnelId,
    ) -> Result<Vec<Appointment>, CoreError> {
        let store = self.registry.get(tenant).await?;
        Ok(store.list_appointments(tunnel).await?)
    }

    /// Server-driven status transition. Anything outside the transition
    /// table, or a concurrent change underfoot, is a conflict.
    pub async fn update_status(
        &self,
        tenant: &TenantId,
        appointment: &AppointmentId,
        to: AppointmentStatus,
    ) -> Result<(), CoreError> {
        let store = self.registry.get(tenant).await?;
        let current = store.get_appointment(appointment).await?.status;

        if !current.can_transition_to(to) {
            return Err(CoreError::Conflict(format!(
                "cannot transition appointment from {current} to {to}"
            )));
        }

        store
            .set_appointment_status(appointment, current, to)
            .await
            .map_err(|e| match e {
                StoreError::Conflict => {
                    CoreError::Conflict("appointment status changed concurrently".into())
                }
                other => other.into(),
            })?;

        info!(tenant = %tenant, appointment = %appointment.0, from = %current, to = %to, "appointment status updated");
        Ok(())
    }

    /// Public keys of all staff who would receive an envelope today, for
    /// client-side wrapping.
    pub async fn list_staff_public_keys(
        &self,
        tenant: &TenantId,
    ) -> Result<Vec<(UserId, Vec<u8>)>, CoreError> {
        Ok(self.central.list_authorized_recipients(tenant).await?)
    }

    /// Staff read path: unwrap this staff member's envelope with their
    /// reconstructed private key and decrypt the payload. Every failure mode
    /// past the share lookup is the same authentication failure.
    pub async fn decrypt_appointment(
        &self,
        tenant: &TenantId,
        appointment: &AppointmentId,
        user: &UserId,
        private_key: &[u8],
    ) -> Result<Zeroizing<Vec<u8>>, CoreError> {
        let store = self.registry.get(tenant).await?;
        let record = store.get_appointment(appointment).await?;
        let share = store.get_staff_key_share(&record.tunnel_id, user).await?;

        let key = unwrap_tunnel_key(&share.encrypted_tunnel_key, RecipientKind::Staff, private_key)?;

        let iv = Iv::from_bytes(&record.iv)
            .map_err(|_| CoreError::Internal("stored iv malformed".into()))?;
        let tag = AuthTag::from_bytes(&record.auth_tag)
            .map_err(|_| CoreError::Internal("stored auth tag malformed".into()))?;

        tacet_crypto::decrypt(&record.encrypted_payload, &key, &iv, &tag)
            .map_err(|_| CoreError::AuthenticationFailure)
    }

    async fn notify(&self, tenant: &TenantId, created: &BookingCreated) {
        let note = BookingNotification {
            tenant: tenant.clone(),
            tunnel_id: created.tunnel_id.clone(),
            appointment_id: created.appointment_id.clone(),
            appointment_date: created.appointment_date,
            status: created.status,
        };
        // A failing sink never fails the booking.
        if let Err(e) = self.notifier.booking_created(&note).await {
            warn!(tenant = %tenant, error = %e, "booking notification failed");
        }
    }
}
