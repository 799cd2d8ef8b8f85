//! Session entity.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Where a session stands relative to the MFA requirement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MfaGate {
    /// Policy does not require a second factor for this session.
    NotRequired,
    /// Primary factor accepted; the session is unusable until MFA completes.
    Pending,
    /// Second factor verified.
    Completed,
}

/// Authenticated, bounded-lifetime handle entitling a principal to act.
///
/// A session is valid iff `now < absolute_expires_at`, the inactivity gap
/// does not exceed the policy timeout, and the MFA gate is not `Pending`.
/// Revocation is terminal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub user_id: String,
    pub created_at: DateTime<Utc>,
    pub absolute_expires_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
    pub ip_address: String,
    pub user_agent: String,
    pub mfa: MfaGate,
}

impl Session {
    /// Past absolute expiry. A session resolved at exactly
    /// `absolute_expires_at` is already expired.
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.absolute_expires_at
    }

    /// Idle longer than the inactivity timeout. A gap of exactly the
    /// timeout is still within bounds.
    #[must_use]
    pub fn is_inactive(&self, now: DateTime<Utc>, inactivity_timeout: Duration) -> bool {
        now - self.last_activity_at > inactivity_timeout
    }
}
