//! Per-tenant store: tunnels, appointments, staff key shares, reset tokens.

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use tacet_storage::{
    Appointment, AppointmentId, AppointmentStatus, CreateBookingRecords, NewAppointment,
    PinResetToken, RotateClientKeys, StaffKeyShare, StoreError, TenantStore, Tunnel, TunnelId,
    TunnelSummary, UserId,
};
use uuid::Uuid;

use crate::{backend_err, from_ts, insert_err, open_pool, parse_uuid, ts};

static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations/tenant");

pub struct TenantSqliteStore {
    pool: SqlitePool,
}

impl TenantSqliteStore {
    pub async fn open(url: &str) -> Result<Self, StoreError> {
        let pool = open_pool(url).await?;
        MIGRATOR.run(&pool).await.map_err(backend_err)?;
        Ok(Self { pool })
    }

    pub async fn open_in_memory() -> Result<Self, StoreError> {
        Self::open("sqlite::memory:").await
    }
}

type AppointmentRow = (
    String,
    String,
    String,
    String,
    i64,
    i64,
    Vec<u8>,
    Vec<u8>,
    Vec<u8>,
    String,
);

fn appointment_from_row(row: AppointmentRow) -> Result<Appointment, StoreError> {
    let (id, tunnel_id, channel_id, agent_id, date, duration, payload, iv, tag, status) = row;
    Ok(Appointment {
        id: AppointmentId(parse_uuid(&id)?),
        tunnel_id: TunnelId(parse_uuid(&tunnel_id)?),
        channel_id: tacet_storage::ChannelId(parse_uuid(&channel_id)?),
        agent_id: tacet_storage::AgentId(parse_uuid(&agent_id)?),
        appointment_date: from_ts(date)?,
        duration_minutes: duration as i32,
        encrypted_payload: payload,
        iv,
        auth_tag: tag,
        status: AppointmentStatus::parse(&status)?,
    })
}

#[async_trait::async_trait]
impl TenantStore for TenantSqliteStore {
    async fn create_booking(
        &self,
        records: &CreateBookingRecords,
    ) -> Result<(TunnelId, AppointmentId), StoreError> {
        let tunnel_id = Uuid::now_v7();
        let appointment_id = Uuid::now_v7();
        let now = ts(Utc::now());

        let mut tx = self.pool.begin().await.map_err(backend_err)?;

        sqlx::query(
            "INSERT INTO tunnels(id,email_hash,client_public_key,client_private_key_share,
                                 client_encrypted_tunnel_key,created_at,updated_at)
             VALUES(?,?,?,?,?,?,?)",
        )
        .bind(tunnel_id.to_string())
        .bind(&records.tunnel.email_hash)
        .bind(&records.tunnel.client_public_key)
        .bind(&records.tunnel.client_private_key_share)
        .bind(&records.tunnel.client_encrypted_tunnel_key)
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(insert_err)?;

        sqlx::query(
            "INSERT INTO appointments(id,tunnel_id,channel_id,agent_id,appointment_date,
                                      duration_minutes,encrypted_payload,iv,auth_tag,status)
             VALUES(?,?,?,?,?,?,?,?,?,?)",
        )
        .bind(appointment_id.to_string())
        .bind(tunnel_id.to_string())
        .bind(records.channel_id.0.to_string())
        .bind(records.agent_id.0.to_string())
        .bind(ts(records.appointment_date))
        .bind(i64::from(records.duration_minutes))
        .bind(&records.encrypted_payload)
        .bind(&records.iv)
        .bind(&records.auth_tag)
        .bind(records.status.as_str())
        .execute(&mut *tx)
        .await
        .map_err(insert_err)?;

        for share in &records.staff_shares {
            sqlx::query(
                "INSERT INTO staff_key_shares(tunnel_id,user_id,encrypted_tunnel_key)
                 VALUES(?,?,?)",
            )
            .bind(tunnel_id.to_string())
            .bind(share.user_id.0.to_string())
            .bind(&share.encrypted_tunnel_key)
            .execute(&mut *tx)
            .await
            .map_err(insert_err)?;
        }

        tx.commit().await.map_err(backend_err)?;
        Ok((TunnelId(tunnel_id), AppointmentId(appointment_id)))
    }

    async fn create_appointment(
        &self,
        appointment: &NewAppointment,
    ) -> Result<AppointmentId, StoreError> {
        // reject bookings against unknown tunnels up front
        let exists: Option<(String,)> = sqlx::query_as("SELECT id FROM tunnels WHERE id=?")
            .bind(appointment.tunnel_id.0.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(backend_err)?;
        if exists.is_none() {
            return Err(StoreError::NotFound);
        }

        let id = Uuid::now_v7();
        sqlx::query(
            "INSERT INTO appointments(id,tunnel_id,channel_id,agent_id,appointment_date,
                                      duration_minutes,encrypted_payload,iv,auth_tag,status)
             VALUES(?,?,?,?,?,?,?,?,?,?)",
        )
        .bind(id.to_string())
        .bind(appointment.tunnel_id.0.to_string())
        .bind(appointment.channel_id.0.to_string())
        .bind(appointment.agent_id.0.to_string())
        .bind(ts(appointment.appointment_date))
        .bind(i64::from(appointment.duration_minutes))
        .bind(&appointment.encrypted_payload)
        .bind(&appointment.iv)
        .bind(&appointment.auth_tag)
        .bind(appointment.status.as_str())
        .execute(&self.pool)
        .await
        .map_err(insert_err)?;

        Ok(AppointmentId(id))
    }

    async fn get_tunnel(&self, id: &TunnelId) -> Result<Tunnel, StoreError> {
        let row = sqlx::query_as::<_, (String, String, Vec<u8>, Vec<u8>, Vec<u8>, i64, i64)>(
            "SELECT id,email_hash,client_public_key,client_private_key_share,
                    client_encrypted_tunnel_key,created_at,updated_at
             FROM tunnels WHERE id=?",
        )
        .bind(id.0.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(backend_err)?;

        match row {
            None => Err(StoreError::NotFound),
            Some((id, email_hash, pk, share, wrap, created, updated)) => Ok(Tunnel {
                id: TunnelId(parse_uuid(&id)?),
                email_hash,
                client_public_key: pk,
                client_private_key_share: share,
                client_encrypted_tunnel_key: wrap,
                created_at: from_ts(created)?,
                updated_at: from_ts(updated)?,
            }),
        }
    }

    async fn get_tunnel_by_email_hash(&self, email_hash: &str) -> Result<Tunnel, StoreError> {
        let row = sqlx::query_as::<_, (String,)>("SELECT id FROM tunnels WHERE email_hash=?")
            .bind(email_hash)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend_err)?;

        match row {
            None => Err(StoreError::NotFound),
            Some((id,)) => self.get_tunnel(&TunnelId(parse_uuid(&id)?)).await,
        }
    }

    async fn list_tunnels(&self) -> Result<Vec<TunnelSummary>, StoreError> {
        let rows = sqlx::query_as::<_, (String, String, Vec<u8>, i64, i64)>(
            "SELECT id,email_hash,client_public_key,created_at,updated_at
             FROM tunnels ORDER BY created_at",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(backend_err)?;

        let mut out = Vec::with_capacity(rows.len());
        for (id, email_hash, pk, created, updated) in rows {
            out.push(TunnelSummary {
                id: TunnelId(parse_uuid(&id)?),
                email_hash,
                client_public_key: pk,
                created_at: from_ts(created)?,
                updated_at: from_ts(updated)?,
            });
        }
        Ok(out)
    }

    async fn get_appointment(&self, id: &AppointmentId) -> Result<Appointment, StoreError> {
        let row = sqlx::query_as::<_, AppointmentRow>(
            "SELECT id,tunnel_id,channel_id,agent_id,appointment_date,duration_minutes,
                    encrypted_payload,iv,auth_tag,status
             FROM appointments WHERE id=?",
        )
        .bind(id.0.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(backend_err)?;

        match row {
            None => Err(StoreError::NotFound),
            Some(row) => appointment_from_row(row),
        }
    }

    async fn list_appointments(&self, tunnel: &TunnelId) -> Result<Vec<Appointment>, StoreError> {
        let rows = sqlx::query_as::<_, AppointmentRow>(
            "SELECT id,tunnel_id,channel_id,agent_id,appointment_date,duration_minutes,
                    encrypted_payload,iv,auth_tag,status
             FROM appointments WHERE tunnel_id=? ORDER BY appointment_date",
        )
        .bind(tunnel.0.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(backend_err)?;

        rows.into_iter().map(appointment_from_row).collect()
    }

    async fn set_appointment_status(
        &self,
        id: &AppointmentId,
        expected: AppointmentStatus,
        to: AppointmentStatus,
    ) -> Result<(), StoreError> {
        let result = sqlx::query("UPDATE appointments SET status=? WHERE id=? AND status=?")
            .bind(to.as_str())
            .bind(id.0.to_string())
            .bind(expected.as_str())
            .execute(&self.pool)
            .await
            .map_err(backend_err)?;

        if result.rows_affected() > 0 {
            return Ok(());
        }

        // distinguish a missing row from a lost status race
        let exists: Option<(String,)> = sqlx::query_as("SELECT id FROM appointments WHERE id=?")
            .bind(id.0.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(backend_err)?;
        match exists {
            None => Err(StoreError::NotFound),
            Some(_) => Err(StoreError::Conflict),
        }
    }

    async fn get_staff_key_share(
        &self,
        tunnel: &TunnelId,
        user: &UserId,
    ) -> Result<StaffKeyShare, StoreError> {
        let row = sqlx::query_as::<_, (Vec<u8>,)>(
            "SELECT encrypted_tunnel_key FROM staff_key_shares WHERE tunnel_id=? AND user_id=?",
        )
        .bind(tunnel.0.to_string())
        .bind(user.0.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(backend_err)?;

        match row {
            None => Err(StoreError::NotFound),
            Some((wrap,)) => Ok(StaffKeyShare {
                tunnel_id: tunnel.clone(),
                user_id: user.clone(),
                encrypted_tunnel_key: wrap,
            }),
        }
    }

    async fn list_staff_key_shares(
        &self,
        tunnel: &TunnelId,
    ) -> Result<Vec<StaffKeyShare>, StoreError> {
        let rows = sqlx::query_as::<_, (String, Vec<u8>)>(
            "SELECT user_id,encrypted_tunnel_key FROM staff_key_shares
             WHERE tunnel_id=? ORDER BY user_id",
        )
        .bind(tunnel.0.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(backend_err)?;

        let mut out = Vec::with_capacity(rows.len());
        for (user_id, wrap) in rows {
            out.push(StaffKeyShare {
                tunnel_id: tunnel.clone(),
                user_id: UserId(parse_uuid(&user_id)?),
                encrypted_tunnel_key: wrap,
            });
        }
        Ok(out)
    }

    async fn delete_staff_key_shares_for_user(&self, user: &UserId) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM staff_key_shares WHERE user_id=?")
            .bind(user.0.to_string())
            .execute(&self.pool)
            .await
            .map_err(backend_err)?;
        Ok(result.rows_affected())
    }

    async fn create_reset_token(&self, token: &PinResetToken) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO pin_reset_tokens(token,email_hash,expires_at,used) VALUES(?,?,?,?)",
        )
        .bind(&token.token)
        .bind(&token.email_hash)
        .bind(ts(token.expires_at))
        .bind(i64::from(token.used))
        .execute(&self.pool)
        .await
        .map_err(insert_err)?;
        Ok(())
    }

    async fn get_reset_token(&self, token: &str) -> Result<PinResetToken, StoreError> {
        let row = sqlx::query_as::<_, (String, String, i64, i64)>(
            "SELECT token,email_hash,expires_at,used FROM pin_reset_tokens WHERE token=?",
        )
        .bind(token)
        .fetch_optional(&self.pool)
        .await
        .map_err(backend_err)?;

        match row {
            None => Err(StoreError::NotFound),
            Some((token, email_hash, expires, used)) => Ok(PinResetToken {
                token,
                email_hash,
                expires_at: from_ts(expires)?,
                used: used != 0,
            }),
        }
    }

    async fn consume_reset_and_rotate(
        &self,
        token: &str,
        now: DateTime<Utc>,
        rotate: &RotateClientKeys,
    ) -> Result<TunnelId, StoreError> {
        let mut tx = self.pool.begin().await.map_err(backend_err)?;

        let row: Option<(String,)> =
            sqlx::query_as("SELECT email_hash FROM pin_reset_tokens WHERE token=?")
                .bind(token)
                .fetch_optional(&mut *tx)
                .await
                .map_err(backend_err)?;
        let email_hash = match row {
            None => return Err(StoreError::NotFound),
            Some((h,)) => h,
        };

        let consumed =
            sqlx::query("UPDATE pin_reset_tokens SET used=1 WHERE token=? AND used=0 AND expires_at>?")
                .bind(token)
                .bind(ts(now))
                .execute(&mut *tx)
                .await
                .map_err(backend_err)?;
        if consumed.rows_affected() == 0 {
            return Err(StoreError::Conflict);
        }

        let rotated = sqlx::query(
            "UPDATE tunnels SET client_public_key=?, client_private_key_share=?,
                    client_encrypted_tunnel_key=?, updated_at=?
             WHERE email_hash=?",
        )
        .bind(&rotate.client_public_key)
        .bind(&rotate.client_private_key_share)
        .bind(&rotate.client_encrypted_tunnel_key)
        .bind(ts(now))
        .bind(&email_hash)
        .execute(&mut *tx)
        .await
        .map_err(backend_err)?;
        if rotated.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }

        let (tunnel_id,): (String,) = sqlx::query_as("SELECT id FROM tunnels WHERE email_hash=?")
            .bind(&email_hash)
            .fetch_one(&mut *tx)
            .await
            .map_err(backend_err)?;

        tx.commit().await.map_err(backend_err)?;
        Ok(TunnelId(parse_uuid(&tunnel_id)?))
    }
}
