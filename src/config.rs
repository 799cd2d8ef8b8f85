//! Policy and configuration bundle.
//!
//! A single immutable [`AccessControlConfig`] is captured by each manager at
//! construction. Runtime reconfiguration is out of scope.

use std::collections::{HashMap, HashSet};

use chrono::Duration;

use crate::error::{AccessError, AccessResult};
use crate::mfa::totp::TotpConfig;
use crate::models::audit::AuditSeverity;

/// Password strength and lifetime requirements, enforced on create/change
/// (never on login).
#[derive(Debug, Clone)]
pub struct PasswordPolicy {
    pub min_length: usize,
    pub require_uppercase: bool,
    pub require_lowercase: bool,
    pub require_digit: bool,
    pub require_special: bool,
    /// When set, logins with a credential older than this force a password
    /// change before a usable session is issued.
    pub max_age: Option<Duration>,
}

impl Default for PasswordPolicy {
    fn default() -> Self {
        Self {
            min_length: 8,
            require_uppercase: true,
            require_lowercase: true,
            require_digit: true,
            require_special: false,
            max_age: None,
        }
    }
}

impl PasswordPolicy {
    /// Validate a candidate password. A password of exactly `min_length`
    /// characters passes.
    pub fn validate(&self, password: &str) -> AccessResult<()> {
        if password.chars().count() < self.min_length {
            return Err(AccessError::invalid_input(format!(
                "password must be at least {} characters",
                self.min_length
            )));
        }
        if self.require_uppercase && !password.chars().any(|c| c.is_ascii_uppercase()) {
            return Err(AccessError::invalid_input(
                "password must contain an uppercase letter",
            ));
        }
        if self.require_lowercase && !password.chars().any(|c| c.is_ascii_lowercase()) {
            return Err(AccessError::invalid_input(
                "password must contain a lowercase letter",
            ));
        }
        if self.require_digit && !password.chars().any(|c| c.is_ascii_digit()) {
            return Err(AccessError::invalid_input("password must contain a digit"));
        }
        if self.require_special && password.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(AccessError::invalid_input(
                "password must contain a special character",
            ));
        }
        Ok(())
    }
}

/// Session lifetime policy.
#[derive(Debug, Clone)]
pub struct SessionPolicy {
    pub absolute_timeout: Duration,
    pub inactivity_timeout: Duration,
    /// Require a second factor on every session regardless of per-user
    /// enrollment.
    pub require_mfa: bool,
}

impl Default for SessionPolicy {
    fn default() -> Self {
        Self {
            absolute_timeout: Duration::hours(24),
            inactivity_timeout: Duration::hours(1),
            require_mfa: false,
        }
    }
}

/// MFA challenge and backup-code policy.
#[derive(Debug, Clone)]
pub struct MfaPolicy {
    pub challenge_lifetime: Duration,
    pub backup_code_count: usize,
    pub backup_code_length: usize,
    pub totp: TotpConfig,
}

impl Default for MfaPolicy {
    fn default() -> Self {
        Self {
            challenge_lifetime: Duration::minutes(15),
            backup_code_count: 10,
            backup_code_length: 8,
            totp: TotpConfig::default(),
        }
    }
}

/// Failed-login lockout policy. Lockout is user-level, not ip-level.
#[derive(Debug, Clone)]
pub struct LockoutPolicy {
    /// Failed attempts at `threshold - 1` do not lock; at `threshold` they do.
    pub threshold: u32,
    /// A locked account unlocks once this much time has passed since the
    /// last failed attempt.
    pub window: Duration,
}

impl Default for LockoutPolicy {
    fn default() -> Self {
        Self {
            threshold: 5,
            window: Duration::minutes(15),
        }
    }
}

/// Audit sink policy.
#[derive(Debug, Clone)]
pub struct AuditPolicy {
    /// Severities the loggers accept; entries outside this set are dropped
    /// without error.
    pub enabled_severities: HashSet<AuditSeverity>,
    pub retention: Duration,
}

impl Default for AuditPolicy {
    fn default() -> Self {
        Self {
            enabled_severities: AuditSeverity::ALL.into_iter().collect(),
            retention: Duration::days(90),
        }
    }
}

impl AuditPolicy {
    #[must_use]
    pub fn allows(&self, severity: AuditSeverity) -> bool {
        self.enabled_severities.contains(&severity)
    }
}

/// The complete policy bundle consumed by the managers.
#[derive(Debug, Clone)]
pub struct AccessControlConfig {
    pub password: PasswordPolicy,
    pub session: SessionPolicy,
    pub mfa: MfaPolicy,
    pub lockout: LockoutPolicy,
    pub audit: AuditPolicy,
    /// Role name → permission set seeding the RBAC manager.
    pub default_roles: HashMap<String, HashSet<String>>,
}

impl Default for AccessControlConfig {
    fn default() -> Self {
        let mut default_roles = HashMap::new();
        default_roles.insert(
            "admin".to_string(),
            ["user.admin", "audit.read", "attack.run", "incident.manage"]
                .into_iter()
                .map(String::from)
                .collect(),
        );
        default_roles.insert(
            "operator".to_string(),
            ["attack.run"].into_iter().map(String::from).collect(),
        );
        default_roles.insert(
            "auditor".to_string(),
            ["audit.read"].into_iter().map(String::from).collect(),
        );

        Self {
            password: PasswordPolicy::default(),
            session: SessionPolicy::default(),
            mfa: MfaPolicy::default(),
            lockout: LockoutPolicy::default(),
            audit: AuditPolicy::default(),
            default_roles,
        }
    }
}
