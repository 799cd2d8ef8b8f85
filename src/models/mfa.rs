//! MFA enrollment, challenge, and backup-code records.
//!
//! This state lives in a dedicated MFA store keyed by user id. The only
//! thing written back to the user record is the derived `mfa_enabled` flag
//! and the set of active methods.

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Supported second-factor methods.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MfaMethod {
    Totp,
    BackupCode,
}

impl fmt::Display for MfaMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Totp => "totp",
            Self::BackupCode => "backup_code",
        };
        f.write_str(s)
    }
}

/// Enrollment state of a single method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MfaMethodState {
    /// Secret material issued but not yet proven by the user.
    Pending,
    /// Fully enrolled; counts toward `mfa_enabled`.
    Active,
}

/// Per-method secret material and its enrollment state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MfaEnrollment {
    pub method: MfaMethod,
    pub state: MfaMethodState,
    /// Opaque secret handle (Base32 TOTP seed). Never surfaced after
    /// enrollment setup.
    pub secret: String,
    /// One-time token the user must echo back to confirm enrollment.
    pub confirmation_token: String,
    pub enrolled_at: DateTime<Utc>,
}

/// Short-lived, single-use verification challenge.
///
/// At most one live challenge exists per (user, method); issuing a new one
/// supersedes any prior challenge for that pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MfaChallenge {
    pub id: String,
    pub user_id: String,
    pub method: MfaMethod,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub consumed: bool,
}

impl MfaChallenge {
    /// A challenge verified at exactly `expires_at` is already expired.
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Hash of a single-use backup code.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupCode {
    pub hash: String,
    pub used: bool,
}

/// All MFA state for one user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MfaRecord {
    pub user_id: String,
    pub enrollments: HashMap<MfaMethod, MfaEnrollment>,
    pub backup_codes: Vec<BackupCode>,
    pub updated_at: DateTime<Utc>,
}

impl MfaRecord {
    #[must_use]
    pub fn new(user_id: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            user_id: user_id.into(),
            enrollments: HashMap::new(),
            backup_codes: Vec::new(),
            updated_at: now,
        }
    }

    /// Methods that are fully enrolled.
    #[must_use]
    pub fn active_methods(&self) -> Vec<MfaMethod> {
        self.enrollments
            .values()
            .filter(|e| e.state == MfaMethodState::Active)
            .map(|e| e.method)
            .collect()
    }

    /// `mfa_enabled` is derived: true iff at least one method is active.
    #[must_use]
    pub fn any_active(&self) -> bool {
        self.enrollments
            .values()
            .any(|e| e.state == MfaMethodState::Active)
    }
}
