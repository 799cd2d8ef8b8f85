//! User entity and stored credential material.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::mfa::MfaMethod;

/// Opaque password hash with its algorithm tag. The core never interprets
/// the hash beyond handing it to the verifier for the tagged algorithm.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    pub hash: String,
    pub algorithm: String,
    pub last_changed: DateTime<Utc>,
}

/// A principal with stored credentials, role membership, and MFA state.
///
/// Invariants: `username` and `email` are unique across all users (enforced
/// at the store boundary); `mfa_enabled` is true iff at least one method in
/// the MFA store is fully enrolled; `failed_login_attempts` resets to zero
/// on successful authentication.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub username: String,
    pub email: String,
    pub credential: Credential,
    pub roles: HashSet<String>,
    pub active: bool,
    pub locked: bool,
    pub failed_login_attempts: u32,
    pub last_failed_login: Option<DateTime<Utc>>,
    pub mfa_enabled: bool,
    pub mfa_methods: HashSet<MfaMethod>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_login: Option<DateTime<Utc>>,
}

impl User {
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        username: impl Into<String>,
        email: impl Into<String>,
        credential: Credential,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            username: username.into(),
            email: email.into(),
            credential,
            roles: HashSet::new(),
            active: true,
            locked: false,
            failed_login_attempts: 0,
            last_failed_login: None,
            mfa_enabled: false,
            mfa_methods: HashSet::new(),
            created_at,
            updated_at: created_at,
            last_login: None,
        }
    }

    #[must_use]
    pub fn with_roles(mut self, roles: impl IntoIterator<Item = String>) -> Self {
        self.roles.extend(roles);
        self
    }
}
