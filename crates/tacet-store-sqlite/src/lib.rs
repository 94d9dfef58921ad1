//! SQLite backends for the tacet stores.
//!
//! Two independent databases mirror the deployment shape: one file (or
//! in-memory pool) per tenant, plus one central database shared by all
//! tenants. Both run their own embedded migrations on open.

use chrono::{DateTime, Utc};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;
use tacet_storage::StoreError;
use uuid::Uuid;

mod central;
mod tenant;

pub use central::CentralSqliteStore;
pub use tenant::TenantSqliteStore;

pub(crate) fn backend_err(e: impl std::fmt::Display) -> StoreError {
    StoreError::Backend(e.to_string())
}

/// Maps SQLite UNIQUE violations to `AlreadyExists`, everything else to
/// `Backend`.
pub(crate) fn insert_err(e: sqlx::Error) -> StoreError {
    let s = e.to_string();
    if s.contains("UNIQUE") {
        StoreError::AlreadyExists
    } else {
        StoreError::Backend(s)
    }
}

pub(crate) fn ts(dt: DateTime<Utc>) -> i64 {
    dt.timestamp()
}

pub(crate) fn from_ts(secs: i64) -> Result<DateTime<Utc>, StoreError> {
    DateTime::from_timestamp(secs, 0)
        .ok_or_else(|| StoreError::Backend(format!("timestamp out of range: {secs}")))
}

pub(crate) fn parse_uuid(s: &str) -> Result<Uuid, StoreError> {
    Uuid::try_parse(s).map_err(backend_err)
}

pub(crate) async fn open_pool(url: &str) -> Result<SqlitePool, StoreError> {
    SqlitePoolOptions::new()
        .max_connections(1)
        .connect(url)
        .await
        .map_err(backend_err)
}
