//! Password hashing.
//!
//! Credentials carry an algorithm tag alongside the PHC hash string, so the
//! scheme can be rotated later without invalidating stored hashes: old tags
//! keep verifying with their original verifier.

use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use chrono::{DateTime, Utc};

use crate::error::{AccessError, AccessResult};
use crate::models::user::Credential;

pub const ALGORITHM_ARGON2ID: &str = "argon2id";

/// Hash a plaintext password into a fresh credential.
pub fn hash(password: &str, now: DateTime<Utc>) -> AccessResult<Credential> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| AccessError::internal(format!("password hashing failed: {e}")))?;
    Ok(Credential {
        hash: hash.to_string(),
        algorithm: ALGORITHM_ARGON2ID.to_string(),
        last_changed: now,
    })
}

/// Check a plaintext password against a stored credential. A mismatch is
/// `Ok(false)`; an unverifiable credential is an internal error.
pub fn verify(credential: &Credential, password: &str) -> AccessResult<bool> {
    match credential.algorithm.as_str() {
        ALGORITHM_ARGON2ID => {
            let parsed = PasswordHash::new(&credential.hash)
                .map_err(|e| AccessError::internal(format!("malformed stored hash: {e}")))?;
            match Argon2::default().verify_password(password.as_bytes(), &parsed) {
                Ok(()) => Ok(true),
                Err(argon2::password_hash::Error::Password) => Ok(false),
                Err(e) => Err(AccessError::internal(format!(
                    "password verification failed: {e}"
                ))),
            }
        }
        other => Err(AccessError::internal(format!(
            "unsupported password algorithm {other}"
        ))),
    }
}
