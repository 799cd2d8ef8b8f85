//! Error taxonomy for the access-control core.
//!
//! Every manager converts backing-store failures into one of these kinds
//! before returning. Login paths additionally collapse detail through
//! [`AccessError::sanitized_for_login`] so that external callers cannot
//! distinguish "unknown user" from "wrong password" from "locked account";
//! the audit log keeps the precise reason.

use thiserror::Error;

/// Result alias used throughout the crate.
pub type AccessResult<T> = Result<T, AccessError>;

/// The closed set of error kinds surfaced by the access-control core.
#[derive(Debug, Error)]
pub enum AccessError {
    /// Requested entity does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Uniqueness or state-transition violation.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Malformed argument or policy violation.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// No valid session or credentials. Deliberately carries no detail.
    #[error("authentication failed")]
    Unauthenticated,

    /// Authenticated but lacking permission.
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// Primary factor accepted but the MFA gate is still open.
    #[error("multi-factor authentication required")]
    MfaRequired,

    /// Credential, session, or challenge past its lifetime.
    #[error("expired: {0}")]
    Expired(String),

    /// User is locked out.
    #[error("account locked")]
    Locked,

    /// Store or sink temporarily unavailable; retry is appropriate.
    #[error("transient failure: {0}")]
    Transient(String),

    /// Request context cancelled or past its deadline.
    #[error("request cancelled: {0}")]
    Cancelled(String),

    /// Invariant violation; non-retryable.
    #[error("internal error: {0}")]
    Internal(String),
}

impl AccessError {
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn conflict(reason: impl Into<String>) -> Self {
        Self::Conflict(reason.into())
    }

    pub fn invalid_input(reason: impl Into<String>) -> Self {
        Self::InvalidInput(reason.into())
    }

    pub fn expired(what: impl Into<String>) -> Self {
        Self::Expired(what.into())
    }

    pub fn transient(reason: impl Into<String>) -> Self {
        Self::Transient(reason.into())
    }

    pub fn internal(reason: impl Into<String>) -> Self {
        Self::Internal(reason.into())
    }

    /// Whether a caller may reasonably retry the failed operation.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient(_))
    }

    /// Collapse login-failure detail to `Unauthenticated`.
    ///
    /// `NotFound`, `InvalidInput`, and `Locked` on a login path would let a
    /// caller enumerate accounts, so they all become `Unauthenticated`.
    /// Operational errors (`Transient`, `Cancelled`, `Internal`) and the
    /// deliberate signals (`MfaRequired`, `Expired` for an aged password)
    /// pass through unchanged.
    #[must_use]
    pub fn sanitized_for_login(self) -> Self {
        match self {
            e @ (Self::Transient(_)
            | Self::Cancelled(_)
            | Self::Internal(_)
            | Self::MfaRequired
            | Self::Expired(_)) => e,
            _ => Self::Unauthenticated,
        }
    }
}
