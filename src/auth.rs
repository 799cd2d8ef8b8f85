//! Authentication: login, lockout, and the password lifecycle.
//!
//! Every login attempt leaves an audit entry with the precise failure
//! reason; the error returned to the caller is collapsed through
//! [`AccessError::sanitized_for_login`] so the API cannot be used to
//! enumerate accounts. Lockout counts consecutive failures inside the
//! lockout window and releases automatically once the window has passed.

use std::sync::Arc;

use tracing::{info, warn};

use crate::audit::AuditLogger;
use crate::clock::SharedClock;
use crate::config::{LockoutPolicy, PasswordPolicy};
use crate::context::RequestContext;
use crate::error::{AccessError, AccessResult};
use crate::models::audit::{AuditAction, AuditEntry, AuditSeverity};
use crate::models::session::{MfaGate, Session};
use crate::models::user::User;
use crate::password;
use crate::random::SharedIdGenerator;
use crate::session::SessionManager;
use crate::store::UserStore;

/// Outcome of a successful primary authentication.
#[derive(Debug, Clone)]
pub struct LoginResult {
    pub session: Session,
    /// True when the session was issued with a pending MFA gate; the caller
    /// must complete second-factor verification before the session resolves.
    pub mfa_required: bool,
}

pub struct AuthManager {
    user_store: Arc<dyn UserStore>,
    sessions: Arc<SessionManager>,
    audit: Arc<dyn AuditLogger>,
    password_policy: PasswordPolicy,
    lockout: LockoutPolicy,
    clock: SharedClock,
    ids: SharedIdGenerator,
}

impl AuthManager {
    pub fn new(
        user_store: Arc<dyn UserStore>,
        sessions: Arc<SessionManager>,
        audit: Arc<dyn AuditLogger>,
        password_policy: PasswordPolicy,
        lockout: LockoutPolicy,
        clock: SharedClock,
        ids: SharedIdGenerator,
    ) -> Self {
        Self {
            user_store,
            sessions,
            audit,
            password_policy,
            lockout,
            clock,
            ids,
        }
    }

    /// Create a user with a policy-checked password.
    pub async fn create_user(
        &self,
        ctx: &RequestContext,
        username: &str,
        email: &str,
        password: &str,
        roles: impl IntoIterator<Item = String>,
    ) -> AccessResult<User> {
        if username.trim().is_empty() {
            return Err(AccessError::invalid_input("username must not be empty"));
        }
        if !email.contains('@') {
            return Err(AccessError::invalid_input("email address is malformed"));
        }
        self.password_policy.validate(password)?;

        let now = self.clock.now();
        let user = User::new(
            self.ids.generate(),
            username,
            email,
            password::hash(password, now)?,
            now,
        )
        .with_roles(roles);
        self.user_store.create(ctx, &user).await?;

        info!(user_id = %user.id, username, "user created");
        self.audit
            .append(
                ctx,
                AuditEntry::new(AuditAction::Create, "user", format!("user {username} created"))
                    .with_context(ctx)
                    .with_resource_id(&user.id)
                    .with_status("success"),
            )
            .await?;
        Ok(user)
    }

    /// Authenticate with username and password.
    ///
    /// On success the session carries a pending MFA gate whenever the user
    /// has MFA enabled or session policy demands it. All account-state
    /// failures surface as `Unauthenticated`.
    pub async fn login(
        &self,
        ctx: &RequestContext,
        username: &str,
        password: &str,
    ) -> AccessResult<LoginResult> {
        self.login_inner(ctx, username, password)
            .await
            .map_err(AccessError::sanitized_for_login)
    }

    async fn login_inner(
        &self,
        ctx: &RequestContext,
        username: &str,
        password: &str,
    ) -> AccessResult<LoginResult> {
        let now = self.clock.now();
        let mut user = match self.user_store.get_by_username(ctx, username).await {
            Ok(user) => user,
            Err(e @ AccessError::NotFound(_)) => {
                self.audit_login(ctx, "", username, "failed_unknown_user", AuditSeverity::Medium)
                    .await?;
                return Err(e);
            }
            Err(e) => return Err(e),
        };

        if user.locked {
            let window_passed = user
                .last_failed_login
                .map_or(true, |at| now - at >= self.lockout.window);
            if window_passed {
                user.locked = false;
                user.failed_login_attempts = 0;
                user.updated_at = now;
                self.user_store.update(ctx, &user).await?;
                info!(user_id = %user.id, "lockout window elapsed, account unlocked");
            } else {
                self.audit_login(ctx, &user.id, username, "failed_locked", AuditSeverity::High)
                    .await?;
                return Err(AccessError::Locked);
            }
        }

        if !user.active {
            self.audit_login(ctx, &user.id, username, "failed_inactive", AuditSeverity::Medium)
                .await?;
            return Err(AccessError::Unauthenticated);
        }

        if !password::verify(&user.credential, password)? {
            return Err(self.record_failed_password(ctx, user, now).await?);
        }

        if let Some(max_age) = self.password_policy.max_age {
            if now - user.credential.last_changed > max_age {
                self.audit_login(
                    ctx,
                    &user.id,
                    username,
                    "failed_password_expired",
                    AuditSeverity::Medium,
                )
                .await?;
                return Err(AccessError::expired("password change required"));
            }
        }

        user.failed_login_attempts = 0;
        user.last_failed_login = None;
        user.last_login = Some(now);
        user.updated_at = now;
        self.user_store.update(ctx, &user).await?;

        let mfa_required = user.mfa_enabled || self.sessions.policy().require_mfa;
        let gate = if mfa_required {
            MfaGate::Pending
        } else {
            MfaGate::NotRequired
        };
        let session = self.sessions.issue(ctx, &user, gate).await?;

        self.audit
            .append(
                ctx,
                AuditEntry::new(AuditAction::Login, "auth", "login")
                    .with_actor(&user.id, username)
                    .with_environment(ctx)
                    .with_session_id(&session.id)
                    .with_status(if mfa_required { "mfa_pending" } else { "success" }),
            )
            .await?;

        Ok(LoginResult {
            session,
            mfa_required,
        })
    }

    /// Bump the failure counter, locking the account when the counter
    /// reaches the threshold. Returns the error the caller should surface.
    async fn record_failed_password(
        &self,
        ctx: &RequestContext,
        mut user: User,
        now: chrono::DateTime<chrono::Utc>,
    ) -> AccessResult<AccessError> {
        // failures older than the window do not accumulate
        let stale = user
            .last_failed_login
            .map_or(false, |at| now - at >= self.lockout.window);
        if stale {
            user.failed_login_attempts = 0;
        }
        user.failed_login_attempts += 1;
        user.last_failed_login = Some(now);
        let locked_now = user.failed_login_attempts >= self.lockout.threshold;
        user.locked = locked_now;
        user.updated_at = now;
        self.user_store.update(ctx, &user).await?;

        if locked_now {
            warn!(user_id = %user.id, attempts = user.failed_login_attempts, "account locked");
            self.audit
                .append(
                    ctx,
                    AuditEntry::new(
                        AuditAction::Security,
                        "auth",
                        "account locked after repeated failures",
                    )
                    .with_actor(&user.id, &user.username)
                    .with_environment(ctx)
                    .with_severity(AuditSeverity::High)
                    .with_status("locked")
                    .with_metadata("attempts", user.failed_login_attempts.into()),
                )
                .await?;
        }
        self.audit_login(
            ctx,
            &user.id,
            &user.username,
            "failed_password",
            AuditSeverity::Medium,
        )
        .await?;
        Ok(AccessError::Unauthenticated)
    }

    /// Revoke the presented session.
    pub async fn logout(&self, ctx: &RequestContext, session_id: &str) -> AccessResult<()> {
        self.sessions.revoke(ctx, session_id).await
    }

    /// Change a password with proof of the old one. All the user's sessions
    /// are revoked so stolen sessions do not outlive a credential rotation.
    pub async fn change_password(
        &self,
        ctx: &RequestContext,
        user_id: &str,
        old_password: &str,
        new_password: &str,
    ) -> AccessResult<()> {
        let mut user = self.user_store.get_by_id(ctx, user_id).await?;
        if !password::verify(&user.credential, old_password)? {
            self.audit
                .append(
                    ctx,
                    AuditEntry::new(
                        AuditAction::Security,
                        "user",
                        "password change rejected: wrong current password",
                    )
                    .with_context(ctx)
                    .with_resource_id(user_id)
                    .with_severity(AuditSeverity::Medium)
                    .with_status("failed"),
                )
                .await?;
            return Err(AccessError::Unauthenticated);
        }
        if old_password == new_password {
            return Err(AccessError::invalid_input(
                "new password must differ from the current one",
            ));
        }
        self.password_policy.validate(new_password)?;

        let now = self.clock.now();
        user.credential = password::hash(new_password, now)?;
        user.updated_at = now;
        self.user_store.update(ctx, &user).await?;
        let revoked = self.sessions.revoke_for_user(ctx, user_id).await?;

        info!(user_id, revoked, "password changed");
        self.audit
            .append(
                ctx,
                AuditEntry::new(AuditAction::Update, "user", "password changed")
                    .with_context(ctx)
                    .with_resource_id(user_id)
                    .with_status("success"),
            )
            .await?;
        Ok(())
    }

    /// Administrative reset: no proof of the old password, clears any
    /// lockout, and revokes existing sessions.
    pub async fn reset_password(
        &self,
        ctx: &RequestContext,
        user_id: &str,
        new_password: &str,
    ) -> AccessResult<()> {
        self.password_policy.validate(new_password)?;
        let mut user = self.user_store.get_by_id(ctx, user_id).await?;

        let now = self.clock.now();
        user.credential = password::hash(new_password, now)?;
        user.locked = false;
        user.failed_login_attempts = 0;
        user.last_failed_login = None;
        user.updated_at = now;
        self.user_store.update(ctx, &user).await?;
        self.sessions.revoke_for_user(ctx, user_id).await?;

        self.audit
            .append(
                ctx,
                AuditEntry::new(AuditAction::Update, "user", "password reset")
                    .with_context(ctx)
                    .with_resource_id(user_id)
                    .with_severity(AuditSeverity::Medium)
                    .with_status("success"),
            )
            .await?;
        Ok(())
    }

    /// Clear a lockout without touching the credential.
    pub async fn unlock_user(&self, ctx: &RequestContext, user_id: &str) -> AccessResult<()> {
        let mut user = self.user_store.get_by_id(ctx, user_id).await?;
        if !user.locked {
            return Ok(());
        }
        user.locked = false;
        user.failed_login_attempts = 0;
        user.last_failed_login = None;
        user.updated_at = self.clock.now();
        self.user_store.update(ctx, &user).await?;

        self.audit
            .append(
                ctx,
                AuditEntry::new(AuditAction::Update, "user", "account unlocked")
                    .with_context(ctx)
                    .with_resource_id(user_id)
                    .with_status("success"),
            )
            .await?;
        Ok(())
    }

    /// Enable or disable an account. Disabling revokes all sessions.
    pub async fn set_active(
        &self,
        ctx: &RequestContext,
        user_id: &str,
        active: bool,
    ) -> AccessResult<()> {
        let mut user = self.user_store.get_by_id(ctx, user_id).await?;
        if user.active == active {
            return Ok(());
        }
        user.active = active;
        user.updated_at = self.clock.now();
        self.user_store.update(ctx, &user).await?;
        if !active {
            self.sessions.revoke_for_user(ctx, user_id).await?;
        }

        self.audit
            .append(
                ctx,
                AuditEntry::new(
                    AuditAction::Update,
                    "user",
                    if active {
                        "account enabled"
                    } else {
                        "account disabled"
                    },
                )
                .with_context(ctx)
                .with_resource_id(user_id)
                .with_severity(AuditSeverity::Medium)
                .with_status("success"),
            )
            .await?;
        Ok(())
    }

    async fn audit_login(
        &self,
        ctx: &RequestContext,
        user_id: &str,
        username: &str,
        status: &str,
        severity: AuditSeverity,
    ) -> AccessResult<()> {
        self.audit
            .append(
                ctx,
                AuditEntry::new(AuditAction::Login, "auth", "login")
                    .with_actor(user_id, username)
                    .with_environment(ctx)
                    .with_severity(severity)
                    .with_status(status),
            )
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::MemoryAuditLogger;
    use crate::clock::{Clock, ManualClock};
    use crate::config::{AuditPolicy, SessionPolicy};
    use crate::random::SequenceIdGenerator;
    use crate::store::memory::{InMemorySessionStore, InMemoryUserStore};
    use crate::store::Filter;
    use chrono::{Duration, Utc};

    struct Fixture {
        auth: AuthManager,
        users: Arc<InMemoryUserStore>,
        audit: Arc<MemoryAuditLogger>,
        clock: Arc<ManualClock>,
        ctx: RequestContext,
    }

    fn fixture_with(password_policy: PasswordPolicy, session_policy: SessionPolicy) -> Fixture {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let ids: SharedIdGenerator = Arc::new(SequenceIdGenerator::new("id"));
        let users = Arc::new(InMemoryUserStore::new());
        let audit = Arc::new(MemoryAuditLogger::new(
            AuditPolicy::default(),
            clock.clone(),
            ids.clone(),
        ));
        let sessions = Arc::new(SessionManager::new(
            Arc::new(InMemorySessionStore::new()),
            audit.clone(),
            session_policy,
            clock.clone(),
            ids.clone(),
        ));
        let auth = AuthManager::new(
            users.clone(),
            sessions,
            audit.clone(),
            password_policy,
            LockoutPolicy::default(),
            clock.clone(),
            ids,
        );
        Fixture {
            auth,
            users,
            audit,
            clock,
            ctx: RequestContext::system(),
        }
    }

    fn fixture() -> Fixture {
        fixture_with(PasswordPolicy::default(), SessionPolicy::default())
    }

    const PASSWORD: &str = "Sw0rdfish-9";

    #[tokio::test]
    async fn login_issues_usable_session() {
        let f = fixture();
        f.auth
            .create_user(&f.ctx, "alice", "alice@example.com", PASSWORD, [])
            .await
            .unwrap();

        let result = f.auth.login(&f.ctx, "alice", PASSWORD).await.unwrap();
        assert!(!result.mfa_required);
        assert_eq!(result.session.mfa, MfaGate::NotRequired);

        let user = f.users.get_by_username(&f.ctx, "alice").await.unwrap();
        assert_eq!(user.last_login, Some(f.clock.now()));
    }

    #[tokio::test]
    async fn wrong_password_and_unknown_user_are_indistinguishable() {
        let f = fixture();
        f.auth
            .create_user(&f.ctx, "alice", "alice@example.com", PASSWORD, [])
            .await
            .unwrap();

        let wrong = f.auth.login(&f.ctx, "alice", "Wrong-Pass1").await;
        let unknown = f.auth.login(&f.ctx, "mallory", PASSWORD).await;
        assert!(matches!(wrong, Err(AccessError::Unauthenticated)));
        assert!(matches!(unknown, Err(AccessError::Unauthenticated)));

        // the audit log keeps the distinction the API hides
        let mut filter = Filter::new();
        filter.insert("status".into(), "failed_password".into());
        assert_eq!(f.audit.query(&f.ctx, &filter, 0, 10).await.unwrap().total, 1);
        filter.insert("status".into(), "failed_unknown_user".into());
        assert_eq!(f.audit.query(&f.ctx, &filter, 0, 10).await.unwrap().total, 1);
    }

    #[tokio::test]
    async fn lockout_at_threshold_and_automatic_release() {
        let f = fixture();
        f.auth
            .create_user(&f.ctx, "alice", "alice@example.com", PASSWORD, [])
            .await
            .unwrap();

        // four failures leave the account unlocked
        for _ in 0..4 {
            let _ = f.auth.login(&f.ctx, "alice", "Wrong-Pass1").await;
        }
        assert!(!f.users.get_by_username(&f.ctx, "alice").await.unwrap().locked);
        assert!(f.auth.login(&f.ctx, "alice", PASSWORD).await.is_ok());

        // five consecutive failures lock it; the right password stops working
        for _ in 0..5 {
            let _ = f.auth.login(&f.ctx, "alice", "Wrong-Pass1").await;
        }
        assert!(f.users.get_by_username(&f.ctx, "alice").await.unwrap().locked);
        assert!(matches!(
            f.auth.login(&f.ctx, "alice", PASSWORD).await,
            Err(AccessError::Unauthenticated)
        ));

        // lockout releases after the window
        f.clock.advance(Duration::minutes(15));
        assert!(f.auth.login(&f.ctx, "alice", PASSWORD).await.is_ok());
    }

    #[tokio::test]
    async fn lockout_event_is_audited_as_security() {
        let f = fixture();
        f.auth
            .create_user(&f.ctx, "alice", "alice@example.com", PASSWORD, [])
            .await
            .unwrap();
        for _ in 0..5 {
            let _ = f.auth.login(&f.ctx, "alice", "Wrong-Pass1").await;
        }

        let mut filter = Filter::new();
        filter.insert("action".into(), "security".into());
        filter.insert("min_severity".into(), "high".into());
        let page = f.audit.query(&f.ctx, &filter, 0, 10).await.unwrap();
        assert_eq!(page.total, 1);
        assert_eq!(page.items[0].status, "locked");
    }

    #[tokio::test]
    async fn mfa_enabled_user_gets_pending_gate() {
        let f = fixture();
        let user = f
            .auth
            .create_user(&f.ctx, "alice", "alice@example.com", PASSWORD, [])
            .await
            .unwrap();
        let mut user = f.users.get_by_id(&f.ctx, &user.id).await.unwrap();
        user.mfa_enabled = true;
        f.users.update(&f.ctx, &user).await.unwrap();

        let result = f.auth.login(&f.ctx, "alice", PASSWORD).await.unwrap();
        assert!(result.mfa_required);
        assert_eq!(result.session.mfa, MfaGate::Pending);
    }

    #[tokio::test]
    async fn session_policy_can_force_mfa_for_everyone() {
        let f = fixture_with(
            PasswordPolicy::default(),
            SessionPolicy {
                require_mfa: true,
                ..SessionPolicy::default()
            },
        );
        f.auth
            .create_user(&f.ctx, "alice", "alice@example.com", PASSWORD, [])
            .await
            .unwrap();
        let result = f.auth.login(&f.ctx, "alice", PASSWORD).await.unwrap();
        assert!(result.mfa_required);
    }

    #[tokio::test]
    async fn aged_password_forces_a_change() {
        let f = fixture_with(
            PasswordPolicy {
                max_age: Some(Duration::days(30)),
                ..PasswordPolicy::default()
            },
            SessionPolicy::default(),
        );
        f.auth
            .create_user(&f.ctx, "alice", "alice@example.com", PASSWORD, [])
            .await
            .unwrap();

        f.clock.advance(Duration::days(31));
        let res = f.auth.login(&f.ctx, "alice", PASSWORD).await;
        assert!(matches!(res, Err(AccessError::Expired(_))));
    }

    #[tokio::test]
    async fn change_password_requires_old_and_revokes_sessions() {
        let f = fixture();
        let user = f
            .auth
            .create_user(&f.ctx, "alice", "alice@example.com", PASSWORD, [])
            .await
            .unwrap();
        let login = f.auth.login(&f.ctx, "alice", PASSWORD).await.unwrap();

        let bad = f
            .auth
            .change_password(&f.ctx, &user.id, "Wrong-Pass1", "New-Passw0rd")
            .await;
        assert!(matches!(bad, Err(AccessError::Unauthenticated)));

        f.auth
            .change_password(&f.ctx, &user.id, PASSWORD, "New-Passw0rd")
            .await
            .unwrap();

        // the old session is gone, the new password works
        assert!(matches!(
            f.auth.login(&f.ctx, "alice", PASSWORD).await,
            Err(AccessError::Unauthenticated)
        ));
        assert!(f.auth.login(&f.ctx, "alice", "New-Passw0rd").await.is_ok());
        let sessions = f
            .auth
            .sessions
            .list_for_user(&f.ctx, &user.id)
            .await
            .unwrap();
        assert!(!sessions.iter().any(|s| s.id == login.session.id));
    }

    #[tokio::test]
    async fn reset_password_clears_lockout() {
        let f = fixture();
        let user = f
            .auth
            .create_user(&f.ctx, "alice", "alice@example.com", PASSWORD, [])
            .await
            .unwrap();
        for _ in 0..5 {
            let _ = f.auth.login(&f.ctx, "alice", "Wrong-Pass1").await;
        }
        assert!(f.users.get_by_id(&f.ctx, &user.id).await.unwrap().locked);

        f.auth
            .reset_password(&f.ctx, &user.id, "New-Passw0rd")
            .await
            .unwrap();
        assert!(f.auth.login(&f.ctx, "alice", "New-Passw0rd").await.is_ok());
    }

    #[tokio::test]
    async fn disabled_account_cannot_login() {
        let f = fixture();
        let user = f
            .auth
            .create_user(&f.ctx, "alice", "alice@example.com", PASSWORD, [])
            .await
            .unwrap();
        f.auth.set_active(&f.ctx, &user.id, false).await.unwrap();
        assert!(matches!(
            f.auth.login(&f.ctx, "alice", PASSWORD).await,
            Err(AccessError::Unauthenticated)
        ));
    }

    #[tokio::test]
    async fn weak_password_is_rejected_at_creation() {
        let f = fixture();
        let res = f
            .auth
            .create_user(&f.ctx, "alice", "alice@example.com", "short", [])
            .await;
        assert!(matches!(res, Err(AccessError::InvalidInput(_))));
    }
}
