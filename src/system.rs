//! Top-level assembly.
//!
//! [`AccessControlSystem`] wires the stores, the audit pipeline, and the
//! managers together in dependency order and tears them down in reverse.
//! Library users normally construct one through [`AccessControlSystem::builder`]
//! or the all-defaults [`AccessControlSystem::in_memory`].

use std::sync::Arc;

use tracing::info;

use crate::audit::{AuditLogger, MemoryAuditLogger};
use crate::auth::{AuthManager, LoginResult};
use crate::clock::{SharedClock, SystemClock};
use crate::config::AccessControlConfig;
use crate::context::RequestContext;
use crate::error::{AccessError, AccessResult};
use crate::mfa::MfaManager;
use crate::models::audit::{AuditAction, AuditEntry, AuditSeverity};
use crate::models::incident::SecurityIncident;
use crate::models::mfa::{MfaChallenge, MfaMethod};
use crate::models::session::Session;
use crate::models::vulnerability::Vulnerability;
use crate::random::{OsRandom, SharedIdGenerator, SharedRandom, UuidGenerator};
use crate::rbac::RbacManager;
use crate::security::{NewIncident, NewVulnerability, SecurityManager, SessionRevoker};
use crate::session::SessionManager;
use crate::store::memory::{
    InMemoryIncidentStore, InMemoryMfaStore, InMemorySessionStore, InMemoryUserStore,
    InMemoryVulnerabilityStore,
};
use crate::store::{IncidentStore, MfaStore, SessionStore, UserStore, VulnerabilityStore};

pub struct AccessControlSystem {
    users: Arc<dyn UserStore>,
    sessions_store: Arc<dyn SessionStore>,
    mfa_store: Arc<dyn MfaStore>,
    incidents: Arc<dyn IncidentStore>,
    vulns: Arc<dyn VulnerabilityStore>,
    audit: Arc<dyn AuditLogger>,
    auth: Arc<AuthManager>,
    sessions: Arc<SessionManager>,
    mfa: Arc<MfaManager>,
    rbac: Arc<RbacManager>,
    security: Arc<SecurityManager>,
}

impl AccessControlSystem {
    #[must_use]
    pub fn builder(config: AccessControlConfig) -> Builder {
        Builder::new(config)
    }

    /// Fully in-memory assembly with system clock, UUID ids, and OS
    /// randomness.
    pub async fn in_memory(config: AccessControlConfig) -> AccessResult<Self> {
        Self::builder(config).build().await
    }

    #[must_use]
    pub fn auth(&self) -> &AuthManager {
        &self.auth
    }

    #[must_use]
    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    #[must_use]
    pub fn mfa(&self) -> &MfaManager {
        &self.mfa
    }

    #[must_use]
    pub fn rbac(&self) -> &RbacManager {
        &self.rbac
    }

    #[must_use]
    pub fn security(&self) -> &SecurityManager {
        &self.security
    }

    #[must_use]
    pub fn audit(&self) -> &Arc<dyn AuditLogger> {
        &self.audit
    }

    #[must_use]
    pub fn users(&self) -> &Arc<dyn UserStore> {
        &self.users
    }

    /// Authenticate with a username and password.
    pub async fn login(
        &self,
        ctx: &RequestContext,
        username: &str,
        password: &str,
    ) -> AccessResult<LoginResult> {
        self.auth.login(ctx, username, password).await
    }

    pub async fn logout(&self, ctx: &RequestContext, session_id: &str) -> AccessResult<()> {
        self.auth.logout(ctx, session_id).await
    }

    /// Validate and touch a session.
    pub async fn resolve_session(
        &self,
        ctx: &RequestContext,
        session_id: &str,
    ) -> AccessResult<Session> {
        self.sessions.resolve(ctx, session_id).await
    }

    /// Open a second-factor challenge for the user.
    pub async fn start_mfa(
        &self,
        ctx: &RequestContext,
        user_id: &str,
        method: MfaMethod,
    ) -> AccessResult<MfaChallenge> {
        self.mfa.start_verification(ctx, user_id, method).await
    }

    /// Resolve a challenge and, on success, complete the session's MFA gate.
    pub async fn verify_mfa(
        &self,
        ctx: &RequestContext,
        session_id: &str,
        challenge_id: &str,
        code: &str,
    ) -> AccessResult<Session> {
        self.mfa.verify(ctx, challenge_id, code).await?;
        self.sessions.complete_mfa_gate(ctx, session_id).await
    }

    /// Err(`Forbidden`) unless the user holds the permission. Denials are
    /// recorded in the audit log before the error surfaces.
    pub async fn check_permission(
        &self,
        ctx: &RequestContext,
        user_id: &str,
        permission: &str,
    ) -> AccessResult<()> {
        match self.rbac.check(ctx, user_id, permission).await {
            Err(e @ AccessError::Forbidden(_)) => {
                self.audit
                    .append(
                        ctx,
                        AuditEntry::new(
                            AuditAction::Unauthorized,
                            "permission",
                            format!("denied {permission}"),
                        )
                        .with_context(ctx)
                        .with_resource_id(user_id)
                        .with_severity(AuditSeverity::Medium)
                        .with_status("denied")
                        .with_metadata("permission", permission.into()),
                    )
                    .await?;
                Err(e)
            }
            other => other,
        }
    }

    /// Record a caller-supplied audit event.
    pub async fn log_event(
        &self,
        ctx: &RequestContext,
        entry: AuditEntry,
    ) -> AccessResult<AuditEntry> {
        self.audit.append(ctx, entry).await
    }

    pub async fn report_incident(
        &self,
        ctx: &RequestContext,
        incident: NewIncident,
    ) -> AccessResult<SecurityIncident> {
        self.security.report_incident(ctx, incident).await
    }

    pub async fn report_vulnerability(
        &self,
        ctx: &RequestContext,
        vuln: NewVulnerability,
    ) -> AccessResult<Vulnerability> {
        self.security.report_vulnerability(ctx, vuln).await
    }

    /// Flush and release everything, managers before stores.
    pub async fn shutdown(&self) -> AccessResult<()> {
        self.audit.close().await?;
        self.mfa_store.close().await?;
        self.sessions_store.close().await?;
        self.incidents.close().await?;
        self.vulns.close().await?;
        self.users.close().await?;
        info!("access control system shut down");
        Ok(())
    }
}

pub struct Builder {
    config: AccessControlConfig,
    clock: SharedClock,
    ids: SharedIdGenerator,
    random: SharedRandom,
    users: Option<Arc<dyn UserStore>>,
    sessions: Option<Arc<dyn SessionStore>>,
    mfa: Option<Arc<dyn MfaStore>>,
    incidents: Option<Arc<dyn IncidentStore>>,
    vulns: Option<Arc<dyn VulnerabilityStore>>,
    audit: Option<Arc<dyn AuditLogger>>,
}

impl Builder {
    #[must_use]
    fn new(config: AccessControlConfig) -> Self {
        Self {
            config,
            clock: Arc::new(SystemClock),
            ids: Arc::new(UuidGenerator),
            random: Arc::new(OsRandom),
            users: None,
            sessions: None,
            mfa: None,
            incidents: None,
            vulns: None,
            audit: None,
        }
    }

    #[must_use]
    pub fn clock(mut self, clock: SharedClock) -> Self {
        self.clock = clock;
        self
    }

    #[must_use]
    pub fn id_generator(mut self, ids: SharedIdGenerator) -> Self {
        self.ids = ids;
        self
    }

    #[must_use]
    pub fn random(mut self, random: SharedRandom) -> Self {
        self.random = random;
        self
    }

    #[must_use]
    pub fn user_store(mut self, store: Arc<dyn UserStore>) -> Self {
        self.users = Some(store);
        self
    }

    #[must_use]
    pub fn session_store(mut self, store: Arc<dyn SessionStore>) -> Self {
        self.sessions = Some(store);
        self
    }

    #[must_use]
    pub fn mfa_store(mut self, store: Arc<dyn MfaStore>) -> Self {
        self.mfa = Some(store);
        self
    }

    #[must_use]
    pub fn incident_store(mut self, store: Arc<dyn IncidentStore>) -> Self {
        self.incidents = Some(store);
        self
    }

    #[must_use]
    pub fn vulnerability_store(mut self, store: Arc<dyn VulnerabilityStore>) -> Self {
        self.vulns = Some(store);
        self
    }

    #[must_use]
    pub fn audit_logger(mut self, audit: Arc<dyn AuditLogger>) -> Self {
        self.audit = Some(audit);
        self
    }

    pub async fn build(self) -> AccessResult<AccessControlSystem> {
        let users = self
            .users
            .unwrap_or_else(|| Arc::new(InMemoryUserStore::new()));
        let sessions_store = self
            .sessions
            .unwrap_or_else(|| Arc::new(InMemorySessionStore::new()));
        let mfa_store = self
            .mfa
            .unwrap_or_else(|| Arc::new(InMemoryMfaStore::new()));
        let incidents = self
            .incidents
            .unwrap_or_else(|| Arc::new(InMemoryIncidentStore::new()));
        let vulns = self
            .vulns
            .unwrap_or_else(|| Arc::new(InMemoryVulnerabilityStore::new()));
        let audit = self.audit.unwrap_or_else(|| {
            Arc::new(MemoryAuditLogger::new(
                self.config.audit.clone(),
                self.clock.clone(),
                self.ids.clone(),
            ))
        });
        audit.initialize().await?;

        let sessions = Arc::new(SessionManager::new(
            sessions_store.clone(),
            audit.clone(),
            self.config.session.clone(),
            self.clock.clone(),
            self.ids.clone(),
        ));
        let mfa = Arc::new(MfaManager::new(
            mfa_store.clone(),
            users.clone(),
            audit.clone(),
            self.config.mfa.clone(),
            self.clock.clone(),
            self.ids.clone(),
            self.random.clone(),
        )?);
        let rbac = Arc::new(RbacManager::new(
            users.clone(),
            audit.clone(),
            &self.config.default_roles,
            self.clock.clone(),
        ));
        let auth = Arc::new(AuthManager::new(
            users.clone(),
            sessions.clone(),
            audit.clone(),
            self.config.password.clone(),
            self.config.lockout.clone(),
            self.clock.clone(),
            self.ids.clone(),
        ));

        let revoker: SessionRevoker = {
            let sessions = sessions.clone();
            Arc::new(move |ctx: RequestContext, user_id: String| {
                let sessions = sessions.clone();
                Box::pin(async move { sessions.revoke_for_user(&ctx, &user_id).await })
            })
        };
        let security = Arc::new(SecurityManager::new(
            incidents.clone(),
            vulns.clone(),
            audit.clone(),
            revoker,
            self.clock.clone(),
            self.ids.clone(),
        ));

        info!("access control system assembled");
        Ok(AccessControlSystem {
            users,
            sessions_store,
            mfa_store,
            incidents,
            vulns,
            audit,
            auth,
            sessions,
            mfa,
            rbac,
            security,
        })
    }
}
