//! Session lifecycle.
//!
//! Sessions die three ways: absolute expiry, inactivity, or explicit
//! revocation. Expiry checks happen on resolve, so a dead session is
//! removed the first time anyone presents it; `sweep_expired` exists for
//! the sessions nobody presents again.

use std::sync::Arc;

use tracing::{debug, info};

use crate::audit::AuditLogger;
use crate::clock::SharedClock;
use crate::config::SessionPolicy;
use crate::context::RequestContext;
use crate::error::{AccessError, AccessResult};
use crate::models::audit::{AuditAction, AuditEntry};
use crate::models::session::{MfaGate, Session};
use crate::models::user::User;
use crate::random::SharedIdGenerator;
use crate::store::SessionStore;

pub struct SessionManager {
    store: Arc<dyn SessionStore>,
    audit: Arc<dyn AuditLogger>,
    policy: SessionPolicy,
    clock: SharedClock,
    ids: SharedIdGenerator,
}

impl SessionManager {
    pub fn new(
        store: Arc<dyn SessionStore>,
        audit: Arc<dyn AuditLogger>,
        policy: SessionPolicy,
        clock: SharedClock,
        ids: SharedIdGenerator,
    ) -> Self {
        Self {
            store,
            audit,
            policy,
            clock,
            ids,
        }
    }

    #[must_use]
    pub fn policy(&self) -> &SessionPolicy {
        &self.policy
    }

    /// Mint a session for an authenticated user. The MFA gate starts in the
    /// state the login decided; a `Pending` session resolves to
    /// `MfaRequired` until the gate is completed.
    pub async fn issue(
        &self,
        ctx: &RequestContext,
        user: &User,
        gate: MfaGate,
    ) -> AccessResult<Session> {
        let now = self.clock.now();
        let session = Session {
            id: self.ids.generate(),
            user_id: user.id.clone(),
            created_at: now,
            absolute_expires_at: now + self.policy.absolute_timeout,
            last_activity_at: now,
            ip_address: ctx.principal.ip_address.clone(),
            user_agent: ctx.principal.user_agent.clone(),
            mfa: gate,
        };
        self.store.create(ctx, &session).await?;
        debug!(session_id = %session.id, user_id = %user.id, "session issued");
        Ok(session)
    }

    /// Fetch without touching activity or enforcing the MFA gate. Expired
    /// sessions still surface as `Expired` but are left in place.
    pub async fn peek(&self, ctx: &RequestContext, session_id: &str) -> AccessResult<Session> {
        let session = self.store.get(ctx, session_id).await?;
        let now = self.clock.now();
        if session.is_expired(now) || session.is_inactive(now, self.policy.inactivity_timeout) {
            return Err(AccessError::expired("session"));
        }
        Ok(session)
    }

    /// Validate a presented session and record activity.
    ///
    /// A session at exactly its absolute expiry is dead; an inactivity gap
    /// of exactly the timeout is still alive. Dead sessions are removed
    /// before the error returns.
    pub async fn resolve(&self, ctx: &RequestContext, session_id: &str) -> AccessResult<Session> {
        let mut session = self.store.get(ctx, session_id).await?;
        let now = self.clock.now();
        if session.is_expired(now) || session.is_inactive(now, self.policy.inactivity_timeout) {
            self.store.delete(ctx, session_id).await?;
            self.audit
                .append(
                    ctx,
                    AuditEntry::new(AuditAction::Logout, "session", "session expired")
                        .with_context(ctx)
                        .with_resource_id(&session.user_id)
                        .with_session_id(session_id)
                        .with_status("expired"),
                )
                .await?;
            return Err(AccessError::expired("session"));
        }
        if session.mfa == MfaGate::Pending {
            return Err(AccessError::MfaRequired);
        }
        if session.last_activity_at != now {
            session.last_activity_at = now;
            self.store.update(ctx, &session).await?;
        }
        Ok(session)
    }

    /// Close a pending MFA gate after second-factor verification.
    pub async fn complete_mfa_gate(
        &self,
        ctx: &RequestContext,
        session_id: &str,
    ) -> AccessResult<Session> {
        let mut session = self.store.get(ctx, session_id).await?;
        let now = self.clock.now();
        if session.is_expired(now) || session.is_inactive(now, self.policy.inactivity_timeout) {
            self.store.delete(ctx, session_id).await?;
            return Err(AccessError::expired("session"));
        }
        match session.mfa {
            MfaGate::Pending => {
                session.mfa = MfaGate::Completed;
                session.last_activity_at = now;
                self.store.update(ctx, &session).await?;
                info!(session_id, "mfa gate completed");
                Ok(session)
            }
            MfaGate::Completed | MfaGate::NotRequired => {
                Err(AccessError::conflict("session has no open mfa gate"))
            }
        }
    }

    /// Revoke a session. Revoking an unknown or already-revoked session
    /// succeeds; only a live revocation is audited.
    pub async fn revoke(&self, ctx: &RequestContext, session_id: &str) -> AccessResult<()> {
        let existing = match self.store.get(ctx, session_id).await {
            Ok(session) => Some(session),
            Err(AccessError::NotFound(_)) => None,
            Err(e) => return Err(e),
        };
        self.store.delete(ctx, session_id).await?;
        if let Some(session) = existing {
            self.audit
                .append(
                    ctx,
                    AuditEntry::new(AuditAction::Logout, "session", "session revoked")
                        .with_context(ctx)
                        .with_resource_id(&session.user_id)
                        .with_session_id(session_id)
                        .with_status("success"),
                )
                .await?;
        }
        Ok(())
    }

    /// Drop every session belonging to a user; returns how many died.
    pub async fn revoke_for_user(
        &self,
        ctx: &RequestContext,
        user_id: &str,
    ) -> AccessResult<usize> {
        let removed = self.store.delete_for_user(ctx, user_id).await?;
        if removed > 0 {
            self.audit
                .append(
                    ctx,
                    AuditEntry::new(AuditAction::Logout, "session", "all user sessions revoked")
                        .with_context(ctx)
                        .with_resource_id(user_id)
                        .with_status("success")
                        .with_metadata("revoked", removed.into()),
                )
                .await?;
        }
        Ok(removed)
    }

    pub async fn list_for_user(
        &self,
        ctx: &RequestContext,
        user_id: &str,
    ) -> AccessResult<Vec<Session>> {
        self.store.list_for_user(ctx, user_id).await
    }

    /// Remove every session that has expired or gone inactive. Intended to
    /// run on whatever schedule the embedding application prefers.
    pub async fn sweep_expired(&self, ctx: &RequestContext) -> AccessResult<usize> {
        let now = self.clock.now();
        let page = self
            .store
            .list(ctx, &crate::store::Filter::new(), 0, usize::MAX)
            .await?;
        let mut removed = 0;
        for session in page.items {
            if session.is_expired(now) || session.is_inactive(now, self.policy.inactivity_timeout)
            {
                self.store.delete(ctx, &session.id).await?;
                removed += 1;
            }
        }
        if removed > 0 {
            debug!(removed, "expired sessions swept");
        }
        Ok(removed)
    }
}
