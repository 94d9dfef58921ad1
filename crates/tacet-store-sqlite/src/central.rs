//! Central store: staff authorization, staff key material, throttle records.

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use tacet_storage::{
    CentralStore, StaffCrypto, StoreError, TenantId, ThrottleRecord, UserId,
};

use crate::{backend_err, from_ts, open_pool, parse_uuid, ts};

static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations/central");

pub struct CentralSqliteStore {
    pool: SqlitePool,
}

impl CentralSqliteStore {
    pub async fn open(url: &str) -> Result<Self, StoreError> {
        let pool = open_pool(url).await?;
        MIGRATOR.run(&pool).await.map_err(backend_err)?;
        Ok(Self { pool })
    }

    pub async fn open_in_memory() -> Result<Self, StoreError> {
        Self::open("sqlite::memory:").await
    }
}

#[async_trait::async_trait]
impl CentralStore for CentralSqliteStore {
    async fn set_access(
        &self,
        tenant: &TenantId,
        user: &UserId,
        granted: bool,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO staff_access(tenant_id,user_id,granted) VALUES(?,?,?)
             ON CONFLICT(tenant_id,user_id) DO UPDATE SET granted=excluded.granted",
        )
        .bind(&tenant.0)
        .bind(user.0.to_string())
        .bind(i64::from(granted))
        .execute(&self.pool)
        .await
        .map_err(backend_err)?;
        Ok(())
    }

    async fn is_access_granted(
        &self,
        tenant: &TenantId,
        user: &UserId,
    ) -> Result<bool, StoreError> {
        let row = sqlx::query_as::<_, (i64,)>(
            "SELECT granted FROM staff_access WHERE tenant_id=? AND user_id=?",
        )
        .bind(&tenant.0)
        .bind(user.0.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(backend_err)?;

        Ok(matches!(row, Some((granted,)) if granted != 0))
    }

    async fn list_authorized_recipients(
        &self,
        tenant: &TenantId,
    ) -> Result<Vec<(UserId, Vec<u8>)>, StoreError> {
        let rows = sqlx::query_as::<_, (String, Vec<u8>)>(
            "SELECT c.user_id, c.public_key
               FROM staff_crypto c
               JOIN staff_access a ON a.user_id = c.user_id
              WHERE a.tenant_id=? AND a.granted=1 AND c.is_active=1
              ORDER BY c.user_id",
        )
        .bind(&tenant.0)
        .fetch_all(&self.pool)
        .await
        .map_err(backend_err)?;

        let mut out = Vec::with_capacity(rows.len());
        for (user_id, public_key) in rows {
            out.push((UserId(parse_uuid(&user_id)?), public_key));
        }
        Ok(out)
    }

    async fn upsert_staff_crypto(&self, record: &StaffCrypto) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await.map_err(backend_err)?;

        // supersede, never merge
        sqlx::query("UPDATE staff_crypto SET is_active=0 WHERE user_id=?")
            .bind(record.user_id.0.to_string())
            .execute(&mut *tx)
            .await
            .map_err(backend_err)?;

        sqlx::query(
            "INSERT INTO staff_crypto(user_id,public_key,private_key_share,passkey_id,
                                      is_active,created_at)
             VALUES(?,?,?,?,?,?)",
        )
        .bind(record.user_id.0.to_string())
        .bind(&record.public_key)
        .bind(&record.private_key_share)
        .bind(&record.passkey_id)
        .bind(i64::from(record.is_active))
        .bind(ts(Utc::now()))
        .execute(&mut *tx)
        .await
        .map_err(backend_err)?;

        tx.commit().await.map_err(backend_err)?;
        Ok(())
    }

    async fn get_staff_crypto(&self, user: &UserId) -> Result<StaffCrypto, StoreError> {
        let row = sqlx::query_as::<_, (String, Vec<u8>, Vec<u8>, String)>(
            "SELECT user_id,public_key,private_key_share,passkey_id
               FROM staff_crypto WHERE user_id=? AND is_active=1",
        )
        .bind(user.0.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(backend_err)?;

        match row {
            None => Err(StoreError::NotFound),
            Some((user_id, public_key, private_key_share, passkey_id)) => Ok(StaffCrypto {
                user_id: UserId(parse_uuid(&user_id)?),
                public_key,
                private_key_share,
                passkey_id,
                is_active: true,
            }),
        }
    }

    async fn get_throttle(&self, id: &str) -> Result<Option<ThrottleRecord>, StoreError> {
        let row = sqlx::query_as::<_, (String, i64, i64, i64)>(
            "SELECT id,failed_attempts,last_attempt_at,reset_at FROM throttle_records WHERE id=?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(backend_err)?;

        match row {
            None => Ok(None),
            Some((id, attempts, last, reset)) => Ok(Some(ThrottleRecord {
                id,
                failed_attempts: attempts as i32,
                last_attempt_at: from_ts(last)?,
                reset_at: from_ts(reset)?,
            })),
        }
    }

    async fn put_throttle(&self, record: &ThrottleRecord) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO throttle_records(id,failed_attempts,last_attempt_at,reset_at)
             VALUES(?,?,?,?)
             ON CONFLICT(id) DO UPDATE SET failed_attempts=excluded.failed_attempts,
                                           last_attempt_at=excluded.last_attempt_at,
                                           reset_at=excluded.reset_at",
        )
        .bind(&record.id)
        .bind(i64::from(record.failed_attempts))
        .bind(ts(record.last_attempt_at))
        .bind(ts(record.reset_at))
        .execute(&self.pool)
        .await
        .map_err(backend_err)?;
        Ok(())
    }

    async fn delete_throttle(&self, id: &str) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM throttle_records WHERE id=?")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(backend_err)?;
        Ok(())
    }

    async fn delete_expired_throttles(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM throttle_records WHERE reset_at<=?")
            .bind(ts(now))
            .execute(&self.pool)
            .await
            .map_err(backend_err)?;
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use uuid::Uuid;

    fn user() -> UserId {
        UserId(Uuid::new_v4())
    }

    fn crypto_for(user: &UserId, passkey: &str) -> StaffCrypto {
        StaffCrypto {
            user_id: user.clone(),
            public_key: vec![1; 32],
            private_key_share: vec![2; 32],
            passkey_id: passkey.to_string(),
            is_active: true,
        }
    }

    #[tokio::test]
    async fn access_grant_and_revoke() {
        let s = CentralSqliteStore::open_in_memory().await.unwrap();
        let tenant = TenantId("clinic-a".into());
        let u = user();

        assert!(!s.is_access_granted(&tenant, &u).await.unwrap());
        s.set_access(&tenant, &u, true).await.unwrap();
        assert!(s.is_access_granted(&tenant, &u).await.unwrap());
        s.set_access(&tenant, &u, false).await.unwrap();
        assert!(!s.is_access_granted(&tenant, &u).await.unwrap());
    }

    #[tokio::test]
    async fn recipients_require_grant_and_active_crypto() {
        let s = CentralSqliteStore::open_in_memory().await.unwrap();
        let tenant = TenantId("clinic-a".into());

        let with_both = user();
        s.set_access(&tenant, &with_both, true).await.unwrap();
        s.upsert_staff_crypto(&crypto_for(&with_both, "pk-1"))
            .await
            .unwrap();

        let grant_only = user();
        s.set_access(&tenant, &grant_only, true).await.unwrap();

        let crypto_only = user();
        s.upsert_staff_crypto(&crypto_for(&crypto_only, "pk-2"))
            .await
            .unwrap();

        let recipients = s.list_authorized_recipients(&tenant).await.unwrap();
        assert_eq!(recipients.len(), 1);
        assert_eq!(recipients[0].0, with_both);
    }

    #[tokio::test]
    async fn reprovisioning_supersedes_old_material() {
        let s = CentralSqliteStore::open_in_memory().await.unwrap();
        let u = user();

        s.upsert_staff_crypto(&crypto_for(&u, "pk-old")).await.unwrap();
        let mut newer = crypto_for(&u, "pk-new");
        newer.public_key = vec![9; 32];
        s.upsert_staff_crypto(&newer).await.unwrap();

        let active = s.get_staff_crypto(&u).await.unwrap();
        assert_eq!(active.passkey_id, "pk-new");
        assert_eq!(active.public_key, vec![9; 32]);
    }

    #[tokio::test]
    async fn missing_staff_crypto_is_notfound() {
        let s = CentralSqliteStore::open_in_memory().await.unwrap();
        let err = s.get_staff_crypto(&user()).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound));
    }

    #[tokio::test]
    async fn throttle_upsert_and_expiry_sweep() {
        let s = CentralSqliteStore::open_in_memory().await.unwrap();
        let now = Utc::now();

        assert!(s.get_throttle("id-1").await.unwrap().is_none());

        s.put_throttle(&ThrottleRecord {
            id: "id-1".into(),
            failed_attempts: 1,
            last_attempt_at: now,
            reset_at: now + Duration::hours(1),
        })
        .await
        .unwrap();

        s.put_throttle(&ThrottleRecord {
            id: "id-1".into(),
            failed_attempts: 2,
            last_attempt_at: now,
            reset_at: now + Duration::hours(1),
        })
        .await
        .unwrap();

        let rec = s.get_throttle("id-1").await.unwrap().unwrap();
        assert_eq!(rec.failed_attempts, 2);

        s.put_throttle(&ThrottleRecord {
            id: "id-expired".into(),
            failed_attempts: 5,
            last_attempt_at: now - Duration::hours(2),
            reset_at: now - Duration::hours(1),
        })
        .await
        .unwrap();

        let swept = s.delete_expired_throttles(now).await.unwrap();
        assert_eq!(swept, 1);
        assert!(s.get_throttle("id-expired").await.unwrap().is_none());
        assert!(s.get_throttle("id-1").await.unwrap().is_some());

        s.delete_throttle("id-1").await.unwrap();
        assert!(s.get_throttle("id-1").await.unwrap().is_none());
    }
}
