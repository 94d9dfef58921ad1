//! End-to-end flows against in-memory SQLite stores.

use std::sync::Arc;

use chrono::{Duration, Utc};
use tacet_core::{
    unwrap_tunnel_key, wrap_tunnel_key, AppointmentRequest, CoreError, CreateTunnelParams,
    NoopSink, PinResetService, RecipientKind, StaffKeyService, TenantRegistry,
    TenantStoreProvider, ThrottleKind, ThrottleService, TunnelService,
};
use tacet_crypto::{hash_identifier, kem};
use tacet_storage::{
    AgentId, AppointmentStatus, CentralStore, ChannelId, RotateClientKeys, TenantId, TenantStore,
    UserId,
};
use tacet_store_sqlite::{CentralSqliteStore, TenantSqliteStore};
use uuid::Uuid;

struct MemProvider;

#[async_trait::async_trait]
impl TenantStoreProvider for MemProvider {
    async fn open(
        &self,
        _tenant: &TenantId,
    ) -> Result<Arc<dyn TenantStore>, CoreError> {
        let store = TenantSqliteStore::open_in_memory()
            .await
            .map_err(CoreError::from)?;
        Ok(Arc::new(store))
    }
}

struct Env {
    tenant: TenantId,
    registry: Arc<TenantRegistry>,
    central: Arc<CentralSqliteStore>,
    tunnels: TunnelService,
    staff_keys: StaffKeyService,
    pin_reset: PinResetService,
}

impl Env {
    async fn new() -> Self {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();

        let registry = Arc::new(TenantRegistry::new(Arc::new(MemProvider)));
        let central = Arc::new(CentralSqliteStore::open_in_memory().await.unwrap());

        let tunnels = TunnelService::new(
            Arc::clone(&registry),
            central.clone(),
            Arc::new(NoopSink),
        );
        let staff_keys = StaffKeyService::new(central.clone());
        let pin_reset = PinResetService::new(Arc::clone(&registry), Duration::minutes(30));

        Env {
            tenant: TenantId("clinic-a".into()),
            registry,
            central,
            tunnels,
            staff_keys,
            pin_reset,
        }
    }

    /// Provision key material and grant tenant access for one staff member.
    async fn add_staff(&self, passkey_id: &str, assertion: &[u8]) -> UserId {
        let user = UserId(Uuid::now_v7());
        self.staff_keys
            .provision(&user, passkey_id, assertion)
            .await
            .unwrap();
        self.central
            .set_access(&self.tenant, &user, true)
            .await
            .unwrap();
        user
    }

    fn booking_params(email: &str, client_public_key: Vec<u8>) -> CreateTunnelParams {
        CreateTunnelParams {
            email_hash: hash_identifier(email.as_bytes()),
            client_public_key,
            client_private_key_share: vec![7; 64],
            channel_id: ChannelId(Uuid::now_v7()),
            agent_id: AgentId(Uuid::now_v7()),
            appointment_date: Utc::now() + Duration::days(3),
            duration_minutes: 30,
            payload: b"reason: recurring migraine, prefers morning slots".to_vec(),
            requires_confirmation: true,
        }
    }
}

#[tokio::test]
async fn two_staff_booking_is_readable_by_everyone() {
    let env = Env::new().await;
    let alice = env.add_staff("pk-alice", b"assertion-alice").await;
    let bob = env.add_staff("pk-bob", b"assertion-bob").await;

    let (client_pk, client_sk) = kem::generate_keypair().unwrap();
    let created = env
        .tunnels
        .create_tunnel(&env.tenant, Env::booking_params("client@example.com", client_pk))
        .await
        .unwrap();
    assert_eq!(created.status, AppointmentStatus::New);

    // Exactly one envelope per authorized staff member.
    let store = env.registry.get(&env.tenant).await.unwrap();
    let shares = store.list_staff_key_shares(&created.tunnel_id).await.unwrap();
    assert_eq!(shares.len(), 2);

    // Both staff members can open the booking with their reconstructed keys.
    for (user, passkey, assertion) in [
        (&alice, "pk-alice", b"assertion-alice".as_slice()),
        (&bob, "pk-bob", b"assertion-bob".as_slice()),
    ] {
        let private_key = env
            .staff_keys
            .reconstruct(user, passkey, assertion)
            .await
            .unwrap();
        let plaintext = env
            .tunnels
            .decrypt_appointment(&env.tenant, &created.appointment_id, user, &private_key)
            .await
            .unwrap();
        assert_eq!(
            &plaintext[..],
            b"reason: recurring migraine, prefers morning slots"
        );
    }

    // The client opens their own envelope straight off the tunnel record.
    let tunnel = store.get_tunnel(&created.tunnel_id).await.unwrap();
    let key = unwrap_tunnel_key(
        &tunnel.client_encrypted_tunnel_key,
        RecipientKind::Client,
        &client_sk,
    )
    .unwrap();
    let appt = store.get_appointment(&created.appointment_id).await.unwrap();
    let plaintext = tacet_crypto::decrypt(
        &appt.encrypted_payload,
        &key,
        &tacet_crypto::Iv::from_bytes(&appt.iv).unwrap(),
        &tacet_crypto::AuthTag::from_bytes(&appt.auth_tag).unwrap(),
    )
    .unwrap();
    assert_eq!(
        &plaintext[..],
        b"reason: recurring migraine, prefers morning slots"
    );

    // A staff member without an envelope has nothing to decrypt with.
    let carol = env.add_staff("pk-carol", b"assertion-carol").await;
    let carol_key = env
        .staff_keys
        .reconstruct(&carol, "pk-carol", b"assertion-carol")
        .await
        .unwrap();
    let err = env
        .tunnels
        .decrypt_appointment(&env.tenant, &created.appointment_id, &carol, &carol_key)
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::NotFound));
}

#[tokio::test]
async fn booking_without_readable_staff_is_rejected_without_writes() {
    let env = Env::new().await;

    let (client_pk, _) = kem::generate_keypair().unwrap();
    let err = env
        .tunnels
        .create_tunnel(&env.tenant, Env::booking_params("client@example.com", client_pk))
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::Conflict(_)));

    let store = env.registry.get(&env.tenant).await.unwrap();
    assert!(store.list_tunnels().await.unwrap().is_empty());
}

#[tokio::test]
async fn granted_staff_without_key_material_does_not_count() {
    let env = Env::new().await;

    // Access granted, but never provisioned.
    env.central
        .set_access(&env.tenant, &UserId(Uuid::now_v7()), true)
        .await
        .unwrap();

    let (client_pk, _) = kem::generate_keypair().unwrap();
    let err = env
        .tunnels
        .create_tunnel(&env.tenant, Env::booking_params("client@example.com", client_pk))
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::Conflict(_)));
}

#[tokio::test]
async fn duplicate_client_booking_conflicts() {
    let env = Env::new().await;
    env.add_staff("pk-1", b"a").await;

    let (client_pk, _) = kem::generate_keypair().unwrap();
    env.tunnels
        .create_tunnel(
            &env.tenant,
            Env::booking_params("client@example.com", client_pk.clone()),
        )
        .await
        .unwrap();

    let err = env
        .tunnels
        .create_tunnel(&env.tenant, Env::booking_params("client@example.com", client_pk))
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::Conflict(_)));
}

#[tokio::test]
async fn follow_up_appointment_uses_the_established_key() {
    let env = Env::new().await;
    let staff = env.add_staff("pk-1", b"a").await;

    let (client_pk, client_sk) = kem::generate_keypair().unwrap();
    let created = env
        .tunnels
        .create_tunnel(&env.tenant, Env::booking_params("client@example.com", client_pk))
        .await
        .unwrap();

    // The client encrypts the follow-up payload under the session key.
    let store = env.registry.get(&env.tenant).await.unwrap();
    let tunnel = store.get_tunnel(&created.tunnel_id).await.unwrap();
    let key = unwrap_tunnel_key(
        &tunnel.client_encrypted_tunnel_key,
        RecipientKind::Client,
        &client_sk,
    )
    .unwrap();
    let (ct, iv, tag) = tacet_crypto::encrypt(b"follow-up: check healing", &key).unwrap();

    let follow_up = env
        .tunnels
        .create_appointment(
            &env.tenant,
            AppointmentRequest {
                tunnel_id: created.tunnel_id.clone(),
                channel_id: ChannelId(Uuid::now_v7()),
                agent_id: AgentId(Uuid::now_v7()),
                appointment_date: Utc::now() + Duration::days(10),
                duration_minutes: 15,
                encrypted_payload: ct,
                iv: iv.0.to_vec(),
                auth_tag: tag.0.to_vec(),
                requires_confirmation: false,
            },
        )
        .await
        .unwrap();
    assert_eq!(follow_up.status, AppointmentStatus::Confirmed);

    // Staff read it through the same envelope as the first appointment.
    let private_key = env.staff_keys.reconstruct(&staff, "pk-1", b"a").await.unwrap();
    let plaintext = env
        .tunnels
        .decrypt_appointment(&env.tenant, &follow_up.appointment_id, &staff, &private_key)
        .await
        .unwrap();
    assert_eq!(&plaintext[..], b"follow-up: check healing");

    let appointments = env
        .tunnels
        .list_appointments(&env.tenant, &created.tunnel_id)
        .await
        .unwrap();
    assert_eq!(appointments.len(), 2);
}

#[tokio::test]
async fn status_transitions_are_server_driven() {
    let env = Env::new().await;
    env.add_staff("pk-1", b"a").await;

    let (client_pk, _) = kem::generate_keypair().unwrap();
    let created = env
        .tunnels
        .create_tunnel(&env.tenant, Env::booking_params("client@example.com", client_pk))
        .await
        .unwrap();

    // NEW cannot jump straight to HELD.
    let err = env
        .tunnels
        .update_status(&env.tenant, &created.appointment_id, AppointmentStatus::Held)
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::Conflict(_)));

    env.tunnels
        .update_status(
            &env.tenant,
            &created.appointment_id,
            AppointmentStatus::Confirmed,
        )
        .await
        .unwrap();
    env.tunnels
        .update_status(&env.tenant, &created.appointment_id, AppointmentStatus::Held)
        .await
        .unwrap();

    // HELD is terminal.
    let err = env
        .tunnels
        .update_status(
            &env.tenant,
            &created.appointment_id,
            AppointmentStatus::Rejected,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::Conflict(_)));
}

#[tokio::test]
async fn tunnel_listing_exposes_no_secret_fields() {
    let env = Env::new().await;
    env.add_staff("pk-1", b"a").await;

    let (client_pk, _) = kem::generate_keypair().unwrap();
    let email_hash = hash_identifier(b"client@example.com");
    env.tunnels
        .create_tunnel(&env.tenant, Env::booking_params("client@example.com", client_pk.clone()))
        .await
        .unwrap();

    let summaries = env
        .tunnels
        .get_client_tunnels(&env.tenant, &email_hash)
        .await
        .unwrap();
    assert_eq!(summaries.len(), 1);
    assert_eq!(summaries[0].email_hash, email_hash);
    assert_eq!(summaries[0].client_public_key, client_pk);

    let none = env
        .tunnels
        .get_client_tunnels(&env.tenant, &hash_identifier(b"stranger@example.com"))
        .await
        .unwrap();
    assert!(none.is_empty());
}

#[tokio::test]
async fn pin_reset_rotates_client_keys_and_keeps_staff_access() {
    let env = Env::new().await;
    let staff = env.add_staff("pk-1", b"a").await;

    let (old_pk, old_sk) = kem::generate_keypair().unwrap();
    let email_hash = hash_identifier(b"client@example.com");
    let created = env
        .tunnels
        .create_tunnel(&env.tenant, Env::booking_params("client@example.com", old_pk))
        .await
        .unwrap();

    // Unknown client cannot request a reset.
    let err = env
        .pin_reset
        .create_reset_token(&env.tenant, &hash_identifier(b"stranger@example.com"))
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::NotFound));

    let token = env
        .pin_reset
        .create_reset_token(&env.tenant, &email_hash)
        .await
        .unwrap();
    assert_eq!(
        env.pin_reset
            .verify_reset_token(&env.tenant, &token)
            .await
            .unwrap(),
        email_hash
    );

    // Client-side: recover the session key with the old material and re-wrap
    // it under a fresh keypair derived from the new PIN.
    let store = env.registry.get(&env.tenant).await.unwrap();
    let tunnel = store.get_tunnel(&created.tunnel_id).await.unwrap();
    let key = unwrap_tunnel_key(
        &tunnel.client_encrypted_tunnel_key,
        RecipientKind::Client,
        &old_sk,
    )
    .unwrap();
    let (new_pk, new_sk) = kem::generate_keypair().unwrap();
    let new_wrap = wrap_tunnel_key(&key, RecipientKind::Client, &new_pk).unwrap();

    let tunnel_id = env
        .pin_reset
        .complete_pin_reset(
            &env.tenant,
            &token,
            &RotateClientKeys {
                client_public_key: new_pk.clone(),
                client_private_key_share: vec![9; 64],
                client_encrypted_tunnel_key: new_wrap,
            },
        )
        .await
        .unwrap();
    assert_eq!(tunnel_id, created.tunnel_id);

    // All three client fields rotated; new key opens the envelope.
    let rotated = store.get_tunnel(&created.tunnel_id).await.unwrap();
    assert_eq!(rotated.client_public_key, new_pk);
    let reopened = unwrap_tunnel_key(
        &rotated.client_encrypted_tunnel_key,
        RecipientKind::Client,
        &new_sk,
    )
    .unwrap();
    assert_eq!(reopened.as_bytes(), key.as_bytes());

    // Token is spent.
    assert!(matches!(
        env.pin_reset.verify_reset_token(&env.tenant, &token).await,
        Err(CoreError::Validation(_))
    ));
    assert!(matches!(
        env.pin_reset
            .complete_pin_reset(
                &env.tenant,
                &token,
                &RotateClientKeys {
                    client_public_key: vec![1],
                    client_private_key_share: vec![1],
                    client_encrypted_tunnel_key: vec![1],
                },
            )
            .await,
        Err(CoreError::Validation(_))
    ));

    // Staff envelopes were untouched by the reset.
    let private_key = env.staff_keys.reconstruct(&staff, "pk-1", b"a").await.unwrap();
    let plaintext = env
        .tunnels
        .decrypt_appointment(&env.tenant, &created.appointment_id, &staff, &private_key)
        .await
        .unwrap();
    assert_eq!(
        &plaintext[..],
        b"reason: recurring migraine, prefers morning slots"
    );
}

#[tokio::test]
async fn throttle_guards_reset_attempts() {
    let env = Env::new().await;
    let throttle = ThrottleService::new(env.central.clone(), Duration::hours(1));
    let t0 = Utc::now();

    for _ in 0..3 {
        throttle
            .record_failure_at("client@example.com", t0)
            .await
            .unwrap();
    }

    let decision = throttle
        .check_at("client@example.com", ThrottleKind::Pin, t0)
        .await;
    assert!(!decision.allowed);

    // Success clears the slate.
    throttle.clear("client@example.com").await.unwrap();
    let decision = throttle
        .check_at("client@example.com", ThrottleKind::Pin, t0)
        .await;
    assert!(decision.allowed);
}
