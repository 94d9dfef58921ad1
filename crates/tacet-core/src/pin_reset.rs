//! PIN reset flow.
//!
//! A reset token is single-use and time-boxed. Completing a reset rotates
//! all three client key fields on the tunnel and consumes the token in one
//! tenant-store transaction; staff key shares are untouched, so staff access
//! survives a client PIN reset.

use std::sync::Arc;

use chrono::{Duration, Utc};
use rand_core::RngCore;
use tacet_storage::{PinResetToken, RotateClientKeys, StoreError, TenantId, TunnelId};
use tracing::info;

use crate::error::CoreError;
use crate::registry::TenantRegistry;

const TOKEN_BYTES: usize = 32;

pub struct PinResetService {
    registry: Arc<TenantRegistry>,
    token_ttl: Duration,
}

impl PinResetService {
    pub fn new(registry: Arc<TenantRegistry>, token_ttl: Duration) -> Self {
        Self {
            registry,
            token_ttl,
        }
    }

    /// Issue a reset token for the client behind `email_hash`. Fails
    /// `NotFound` when no tunnel exists for the hash.
    pub async fn create_reset_token(
        &self,
        tenant: &TenantId,
        email_hash: &str,
    ) -> Result<String, CoreError> {
        let store = self.registry.get(tenant).await?;

        // Token issuance presumes an existing booking relationship.
        store.get_tunnel_by_email_hash(email_hash).await?;

        let mut raw = [0u8; TOKEN_BYTES];
        rand_core::OsRng.fill_bytes(&mut raw);
        let token = hex::encode(raw);

        store
            .create_reset_token(&PinResetToken {
                token: token.clone(),
                email_hash: email_hash.to_string(),
                expires_at: Utc::now() + self.token_ttl,
                used: false,
            })
            .await?;

        info!(tenant = %tenant, "issued pin reset token");
        Ok(token)
    }

    /// Check a token without consuming it; returns the email hash it was
    /// issued for.
    pub async fn verify_reset_token(
        &self,
        tenant: &TenantId,
        token: &str,
    ) -> Result<String, CoreError> {
        let store = self.registry.get(tenant).await?;
        let record = store.get_reset_token(token).await?;

        if record.used {
            return Err(CoreError::Validation("reset token already used".into()));
        }
        if record.expires_at <= Utc::now() {
            return Err(CoreError::Validation("reset token expired".into()));
        }
        Ok(record.email_hash)
    }

    /// Consume the token and rotate the tunnel's client key material. The
    /// new material is produced client-side from the new PIN; the server
    /// never sees the PIN or the recombined key.
    pub async fn complete_pin_reset(
        &self,
        tenant: &TenantId,
        token: &str,
        rotate: &RotateClientKeys,
    ) -> Result<TunnelId, CoreError> {
        if rotate.client_public_key.is_empty()
            || rotate.client_private_key_share.is_empty()
            || rotate.client_encrypted_tunnel_key.is_empty()
        {
            return Err(CoreError::Validation(
                "rotated client key material must not be empty".into(),
            ));
        }

        let store = self.registry.get(tenant).await?;
        let tunnel_id = store
            .consume_reset_and_rotate(token, Utc::now(), rotate)
            .await
            .map_err(|e| match e {
                StoreError::Conflict => {
                    CoreError::Validation("reset token already used or expired".into())
                }
                other => other.into(),
            })?;

        info!(tenant = %tenant, tunnel = %tunnel_id.0, "completed pin reset");
        Ok(tunnel_id)
    }
}
