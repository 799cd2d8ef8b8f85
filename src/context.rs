//! Request context and principal propagation.
//!
//! A [`RequestContext`] rides along every manager call. It carries the
//! acting principal (used to populate audit actor fields), an optional
//! absolute deadline, and a cancellation token. Managers read the principal
//! but never write to it.

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;

use crate::error::{AccessError, AccessResult};

/// The identified actor on whose behalf a request executes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Principal {
    pub user_id: String,
    pub username: String,
    pub ip_address: String,
    pub user_agent: String,
}

impl Principal {
    #[must_use]
    pub fn new(user_id: impl Into<String>, username: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            username: username.into(),
            ip_address: String::new(),
            user_agent: String::new(),
        }
    }

    /// Principal for internally originated actions (sweeps, wiring).
    #[must_use]
    pub fn system() -> Self {
        Self::new("", "system")
    }

    #[must_use]
    pub fn with_ip_address(mut self, ip: impl Into<String>) -> Self {
        self.ip_address = ip.into();
        self
    }

    #[must_use]
    pub fn with_user_agent(mut self, agent: impl Into<String>) -> Self {
        self.user_agent = agent.into();
        self
    }
}

/// Per-request carrier of principal, deadline, and cancellation.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub principal: Principal,
    deadline: Option<DateTime<Utc>>,
    cancel: CancellationToken,
}

impl RequestContext {
    #[must_use]
    pub fn new(principal: Principal) -> Self {
        Self {
            principal,
            deadline: None,
            cancel: CancellationToken::new(),
        }
    }

    /// Context for internally originated actions.
    #[must_use]
    pub fn system() -> Self {
        Self::new(Principal::system())
    }

    #[must_use]
    pub fn with_deadline(mut self, at: DateTime<Utc>) -> Self {
        self.deadline = Some(at);
        self
    }

    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    #[must_use]
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    #[must_use]
    pub fn deadline(&self) -> Option<DateTime<Utc>> {
        self.deadline
    }

    /// Fail fast when the request has been cancelled or its deadline has
    /// passed. Called before every store mutation so that a cancelled
    /// request either applied its mutation fully or not at all.
    pub fn ensure_live(&self, now: DateTime<Utc>) -> AccessResult<()> {
        if self.cancel.is_cancelled() {
            return Err(AccessError::Cancelled("request cancelled".into()));
        }
        if let Some(deadline) = self.deadline {
            if now > deadline {
                return Err(AccessError::Cancelled("deadline exceeded".into()));
            }
        }
        Ok(())
    }
}
