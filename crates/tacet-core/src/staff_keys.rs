//! Split-key staff identity.
//!
//! A staff member's KEM private key is never stored whole. Provisioning
//! splits it into a server shard (persisted) and a passkey shard (derived
//! fresh from the authenticator assertion each time); the key exists only
//! transiently, XORed together inside `reconstruct`.

use std::sync::Arc;

use tacet_crypto::{derive_passkey_shard, kem, xor_shards};
use tacet_storage::{CentralStore, StaffCrypto, UserId};
use tracing::info;
use zeroize::Zeroizing;

use crate::error::CoreError;

pub struct StaffKeyService {
    central: Arc<dyn CentralStore>,
}

impl StaffKeyService {
    pub fn new(central: Arc<dyn CentralStore>) -> Self {
        Self { central }
    }

    /// Generate fresh key material bound to the given passkey and persist the
    /// server half, superseding any previous material for the user. Returns
    /// the new public key.
    pub async fn provision(
        &self,
        user: &UserId,
        passkey_id: &str,
        assertion: &[u8],
    ) -> Result<Vec<u8>, CoreError> {
        let passkey = passkey_id.to_string();
        let assertion = assertion.to_vec();

        // Keygen and shard derivation are CPU-bound.
        let (public_key, server_shard) = tokio::task::spawn_blocking(
            move || -> Result<(Vec<u8>, Zeroizing<Vec<u8>>), CoreError> {
                let (public_key, private_key) = kem::generate_keypair()
                    .map_err(|e| CoreError::Internal(format!("keygen failed: {e}")))?;
                let passkey_shard = derive_passkey_shard(&passkey, &assertion, private_key.len())
                    .map_err(|e| CoreError::Internal(format!("shard derivation failed: {e}")))?;
                let server_shard = xor_shards(&private_key, &passkey_shard)
                    .map_err(|e| CoreError::Internal(format!("shard split failed: {e}")))?;
                Ok((public_key, server_shard))
            },
        )
        .await??;

        self.central
            .upsert_staff_crypto(&StaffCrypto {
                user_id: user.clone(),
                public_key: public_key.clone(),
                private_key_share: server_shard.to_vec(),
                passkey_id: passkey_id.to_string(),
                is_active: true,
            })
            .await?;

        info!(user = %user.0, "provisioned staff key material");
        Ok(public_key)
    }

    /// Recombine the private key from the stored server shard and a live
    /// passkey assertion. A passkey id that does not match the provisioned
    /// one fails before any derivation; a wrong assertion yields garbage
    /// bytes that fail the decapsulation-key import check downstream, which
    /// the envelope layer surfaces as the generic authentication failure.
    pub async fn reconstruct(
        &self,
        user: &UserId,
        passkey_id: &str,
        assertion: &[u8],
    ) -> Result<Zeroizing<Vec<u8>>, CoreError> {
        let record = self.central.get_staff_crypto(user).await?;

        if record.passkey_id != passkey_id {
            return Err(CoreError::AuthenticationFailure);
        }

        let passkey_shard =
            derive_passkey_shard(passkey_id, assertion, record.private_key_share.len())
                .map_err(|e| CoreError::Internal(format!("shard derivation failed: {e}")))?;

        xor_shards(&record.private_key_share, &passkey_shard)
            .map_err(|e| CoreError::Internal(format!("shard recombination failed: {e}")))
    }

    /// The user's active public key.
    pub async fn public_key(&self, user: &UserId) -> Result<Vec<u8>, CoreError> {
        Ok(self.central.get_staff_crypto(user).await?.public_key)
    }
}
