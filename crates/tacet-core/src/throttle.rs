//! Escalating-backoff throttle over low-entropy secrets.
//!
//! State lives in the central store keyed by hex(SHA-256(identifier)), so
//! raw identifiers never reach the database. A record disappears on success
//! (`clear`) or when its TTL passes; `check` never returns an error — if the
//! store is unreachable the decision fails closed.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tacet_crypto::hash_identifier;
use tacet_storage::{CentralStore, ThrottleRecord};
use tracing::warn;

use crate::error::CoreError;

/// Which challenge the failures belong to. PIN guesses escalate through a
/// backoff ladder; passkey ceremonies get a flat delay because the
/// authenticator already rate-limits.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ThrottleKind {
    Pin,
    Passkey,
}

impl ThrottleKind {
    /// Seconds the next attempt must wait, given the failures so far.
    fn delay_secs(self, failed_attempts: i32) -> i64 {
        match self {
            ThrottleKind::Pin => match failed_attempts {
                i32::MIN..=2 => 0,
                3..=4 => 60,
                5..=6 => 300,
                7..=8 => 900,
                _ => 1800,
            },
            ThrottleKind::Passkey => {
                if failed_attempts <= 2 {
                    0
                } else {
                    60
                }
            }
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct ThrottleDecision {
    pub allowed: bool,
    pub retry_after_ms: u64,
    pub failed_attempts: i32,
}

impl ThrottleDecision {
    fn allow(failed_attempts: i32) -> Self {
        Self {
            allowed: true,
            retry_after_ms: 0,
            failed_attempts,
        }
    }
}

pub struct ThrottleService {
    central: Arc<dyn CentralStore>,
    ttl: Duration,
}

impl ThrottleService {
    pub fn new(central: Arc<dyn CentralStore>, ttl: Duration) -> Self {
        Self { central, ttl }
    }

    pub async fn check(&self, identifier: &str, kind: ThrottleKind) -> ThrottleDecision {
        self.check_at(identifier, kind, Utc::now()).await
    }

    pub async fn check_at(
        &self,
        identifier: &str,
        kind: ThrottleKind,
        now: DateTime<Utc>,
    ) -> ThrottleDecision {
        let id = hash_identifier(identifier.as_bytes());

        let record = match self.central.get_throttle(&id).await {
            Ok(record) => record,
            Err(e) => {
                // Fail closed: an unreachable store must not open the door.
                warn!(error = %e, "throttle lookup failed, denying attempt");
                return ThrottleDecision {
                    allowed: false,
                    retry_after_ms: 1_000,
                    failed_attempts: 0,
                };
            }
        };

        let Some(record) = record else {
            return ThrottleDecision::allow(0);
        };

        if now >= record.reset_at {
            if let Err(e) = self.central.delete_throttle(&id).await {
                warn!(error = %e, "failed to drop expired throttle record");
            }
            return ThrottleDecision::allow(0);
        }

        let delay = kind.delay_secs(record.failed_attempts);
        if delay == 0 {
            return ThrottleDecision::allow(record.failed_attempts);
        }

        let ready_at = record.last_attempt_at + Duration::seconds(delay);
        if now >= ready_at {
            ThrottleDecision::allow(record.failed_attempts)
        } else {
            ThrottleDecision {
                allowed: false,
                retry_after_ms: (ready_at - now).num_milliseconds().max(0) as u64,
                failed_attempts: record.failed_attempts,
            }
        }
    }

    pub async fn record_failure(&self, identifier: &str) -> Result<(), CoreError> {
        self.record_failure_at(identifier, Utc::now()).await
    }

    /// Create or bump the failure counter. Concurrent bumps may undercount
    /// (last write wins); that is accepted.
    pub async fn record_failure_at(
        &self,
        identifier: &str,
        now: DateTime<Utc>,
    ) -> Result<(), CoreError> {
        let id = hash_identifier(identifier.as_bytes());

        let failed_attempts = match self.central.get_throttle(&id).await? {
            Some(record) if now < record.reset_at => record.failed_attempts + 1,
            _ => 1,
        };

        self.central
            .put_throttle(&ThrottleRecord {
                id,
                failed_attempts,
                last_attempt_at: now,
                reset_at: now + self.ttl,
            })
            .await?;
        Ok(())
    }

    /// Forget all failures for the identifier, on successful authentication.
    pub async fn clear(&self, identifier: &str) -> Result<(), CoreError> {
        let id = hash_identifier(identifier.as_bytes());
        self.central.delete_throttle(&id).await?;
        Ok(())
    }

    /// Best-effort sweep of expired records. Errors are logged, never
    /// propagated.
    pub async fn cleanup_expired(&self) -> u64 {
        match self.central.delete_expired_throttles(Utc::now()).await {
            Ok(swept) => swept,
            Err(e) => {
                warn!(error = %e, "throttle cleanup sweep failed");
                0
            }
        }
    }
}
