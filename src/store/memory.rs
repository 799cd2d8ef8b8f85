//! In-memory reference stores.
//!
//! Each store guards its map with a single reader-writer lock (sessions and
//! MFA records use sharded maps so per-key writes do not contend). List
//! queries iterate under the read lock and return clones, so callers may
//! mutate results freely. All mutations are local and atomic, which
//! satisfies the cancellation contract: a mutation is either fully applied
//! or not at all.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::RwLock;

use crate::context::RequestContext;
use crate::error::{AccessError, AccessResult};
use crate::models::incident::SecurityIncident;
use crate::models::mfa::{MfaChallenge, MfaMethod, MfaRecord};
use crate::models::session::Session;
use crate::models::user::User;
use crate::models::vulnerability::Vulnerability;
use crate::store::{
    filter_str, paginate, Filter, IncidentStore, MfaStore, Page, SessionStore, UserStore,
    VulnerabilityStore,
};

// ---------------------------------------------------------------------------
// Users

#[derive(Debug, Default)]
pub struct InMemoryUserStore {
    users: RwLock<HashMap<String, User>>,
}

impl InMemoryUserStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

fn user_matches(user: &User, filter: &Filter) -> bool {
    if let Some(v) = filter_str(filter, "username") {
        if user.username != v {
            return false;
        }
    }
    if let Some(v) = filter_str(filter, "email") {
        if user.email != v {
            return false;
        }
    }
    if let Some(v) = filter_str(filter, "role") {
        if !user.roles.contains(v) {
            return false;
        }
    }
    if let Some(v) = filter.get("active").and_then(serde_json::Value::as_bool) {
        if user.active != v {
            return false;
        }
    }
    if let Some(v) = filter.get("locked").and_then(serde_json::Value::as_bool) {
        if user.locked != v {
            return false;
        }
    }
    true
}

#[async_trait]
impl UserStore for InMemoryUserStore {
    async fn create(&self, ctx: &RequestContext, user: &User) -> AccessResult<()> {
        ctx.ensure_live(Utc::now())?;
        let mut users = self.users.write().await;
        if users.contains_key(&user.id) {
            return Err(AccessError::conflict(format!(
                "user id {} already exists",
                user.id
            )));
        }
        if users.values().any(|u| u.username == user.username) {
            return Err(AccessError::conflict(format!(
                "username {} already taken",
                user.username
            )));
        }
        if users.values().any(|u| u.email == user.email) {
            return Err(AccessError::conflict(format!(
                "email {} already registered",
                user.email
            )));
        }
        users.insert(user.id.clone(), user.clone());
        Ok(())
    }

    async fn get_by_id(&self, ctx: &RequestContext, id: &str) -> AccessResult<User> {
        ctx.ensure_live(Utc::now())?;
        self.users
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| AccessError::not_found(format!("user {id}")))
    }

    async fn get_by_username(&self, ctx: &RequestContext, username: &str) -> AccessResult<User> {
        ctx.ensure_live(Utc::now())?;
        self.users
            .read()
            .await
            .values()
            .find(|u| u.username == username)
            .cloned()
            .ok_or_else(|| AccessError::not_found(format!("user {username}")))
    }

    async fn get_by_email(&self, ctx: &RequestContext, email: &str) -> AccessResult<User> {
        ctx.ensure_live(Utc::now())?;
        self.users
            .read()
            .await
            .values()
            .find(|u| u.email == email)
            .cloned()
            .ok_or_else(|| AccessError::not_found(format!("user {email}")))
    }

    async fn update(&self, ctx: &RequestContext, user: &User) -> AccessResult<()> {
        ctx.ensure_live(Utc::now())?;
        let mut users = self.users.write().await;
        if !users.contains_key(&user.id) {
            return Err(AccessError::not_found(format!("user {}", user.id)));
        }
        if users
            .values()
            .any(|u| u.id != user.id && u.username == user.username)
        {
            return Err(AccessError::conflict(format!(
                "username {} already taken",
                user.username
            )));
        }
        if users
            .values()
            .any(|u| u.id != user.id && u.email == user.email)
        {
            return Err(AccessError::conflict(format!(
                "email {} already registered",
                user.email
            )));
        }
        users.insert(user.id.clone(), user.clone());
        Ok(())
    }

    async fn delete(&self, ctx: &RequestContext, id: &str) -> AccessResult<()> {
        ctx.ensure_live(Utc::now())?;
        self.users
            .write()
            .await
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| AccessError::not_found(format!("user {id}")))
    }

    async fn list(
        &self,
        ctx: &RequestContext,
        filter: &Filter,
        offset: usize,
        limit: usize,
    ) -> AccessResult<Page<User>> {
        ctx.ensure_live(Utc::now())?;
        let users = self.users.read().await;
        let mut matched: Vec<User> = users
            .values()
            .filter(|u| user_matches(u, filter))
            .cloned()
            .collect();
        matched.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(paginate(matched, offset, limit))
    }

    async fn close(&self) -> AccessResult<()> {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Sessions

/// Session store sharded by session id so concurrent touches on different
/// sessions never contend.
#[derive(Debug, Default)]
pub struct InMemorySessionStore {
    sessions: DashMap<String, Session>,
}

impl InMemorySessionStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn create(&self, ctx: &RequestContext, session: &Session) -> AccessResult<()> {
        ctx.ensure_live(Utc::now())?;
        if self.sessions.contains_key(&session.id) {
            return Err(AccessError::conflict(format!(
                "session id {} already exists",
                session.id
            )));
        }
        self.sessions.insert(session.id.clone(), session.clone());
        Ok(())
    }

    async fn get(&self, ctx: &RequestContext, id: &str) -> AccessResult<Session> {
        ctx.ensure_live(Utc::now())?;
        self.sessions
            .get(id)
            .map(|s| s.clone())
            .ok_or_else(|| AccessError::not_found(format!("session {id}")))
    }

    async fn update(&self, ctx: &RequestContext, session: &Session) -> AccessResult<()> {
        ctx.ensure_live(Utc::now())?;
        match self.sessions.get_mut(&session.id) {
            Some(mut slot) => {
                *slot = session.clone();
                Ok(())
            }
            None => Err(AccessError::not_found(format!("session {}", session.id))),
        }
    }

    async fn delete(&self, ctx: &RequestContext, id: &str) -> AccessResult<()> {
        ctx.ensure_live(Utc::now())?;
        self.sessions.remove(id);
        Ok(())
    }

    async fn list_for_user(
        &self,
        ctx: &RequestContext,
        user_id: &str,
    ) -> AccessResult<Vec<Session>> {
        ctx.ensure_live(Utc::now())?;
        Ok(self
            .sessions
            .iter()
            .filter(|e| e.user_id == user_id)
            .map(|e| e.clone())
            .collect())
    }

    async fn delete_for_user(&self, ctx: &RequestContext, user_id: &str) -> AccessResult<usize> {
        ctx.ensure_live(Utc::now())?;
        let ids: Vec<String> = self
            .sessions
            .iter()
            .filter(|e| e.user_id == user_id)
            .map(|e| e.id.clone())
            .collect();
        let mut removed = 0;
        for id in ids {
            if self.sessions.remove(&id).is_some() {
                removed += 1;
            }
        }
        Ok(removed)
    }

    async fn list(
        &self,
        ctx: &RequestContext,
        filter: &Filter,
        offset: usize,
        limit: usize,
    ) -> AccessResult<Page<Session>> {
        ctx.ensure_live(Utc::now())?;
        let mut matched: Vec<Session> = self
            .sessions
            .iter()
            .filter(|e| match filter_str(filter, "user_id") {
                Some(uid) => e.user_id == uid,
                None => true,
            })
            .map(|e| e.clone())
            .collect();
        matched.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id)));
        Ok(paginate(matched, offset, limit))
    }

    async fn close(&self) -> AccessResult<()> {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// MFA

/// MFA store keyed by user id. Challenge installation holds the per-pair
/// index entry while swapping, which serializes "at most one live challenge
/// per (user, method)" without a store-wide lock.
#[derive(Debug, Default)]
pub struct InMemoryMfaStore {
    records: DashMap<String, MfaRecord>,
    challenges: DashMap<String, MfaChallenge>,
    live: DashMap<(String, MfaMethod), String>,
}

impl InMemoryMfaStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MfaStore for InMemoryMfaStore {
    async fn get(&self, ctx: &RequestContext, user_id: &str) -> AccessResult<MfaRecord> {
        ctx.ensure_live(Utc::now())?;
        self.records
            .get(user_id)
            .map(|r| r.clone())
            .ok_or_else(|| AccessError::not_found(format!("mfa record for user {user_id}")))
    }

    async fn upsert(&self, ctx: &RequestContext, record: &MfaRecord) -> AccessResult<()> {
        ctx.ensure_live(Utc::now())?;
        self.records.insert(record.user_id.clone(), record.clone());
        Ok(())
    }

    async fn delete(&self, ctx: &RequestContext, user_id: &str) -> AccessResult<()> {
        ctx.ensure_live(Utc::now())?;
        self.records.remove(user_id);
        let stale: Vec<(String, MfaMethod)> = self
            .live
            .iter()
            .filter(|e| e.key().0 == user_id)
            .map(|e| e.key().clone())
            .collect();
        for key in stale {
            if let Some((_, id)) = self.live.remove(&key) {
                self.challenges.remove(&id);
            }
        }
        Ok(())
    }

    async fn put_challenge(
        &self,
        ctx: &RequestContext,
        challenge: &MfaChallenge,
    ) -> AccessResult<()> {
        ctx.ensure_live(Utc::now())?;
        let key = (challenge.user_id.clone(), challenge.method);
        let mut slot = self.live.entry(key).or_default();
        if !slot.is_empty() {
            self.challenges.remove(&*slot);
        }
        self.challenges
            .insert(challenge.id.clone(), challenge.clone());
        *slot = challenge.id.clone();
        Ok(())
    }

    async fn get_challenge(&self, ctx: &RequestContext, id: &str) -> AccessResult<MfaChallenge> {
        ctx.ensure_live(Utc::now())?;
        self.challenges
            .get(id)
            .map(|c| c.clone())
            .ok_or_else(|| AccessError::not_found(format!("mfa challenge {id}")))
    }

    async fn update_challenge(
        &self,
        ctx: &RequestContext,
        challenge: &MfaChallenge,
    ) -> AccessResult<()> {
        ctx.ensure_live(Utc::now())?;
        match self.challenges.get_mut(&challenge.id) {
            Some(mut slot) => {
                *slot = challenge.clone();
                Ok(())
            }
            None => Err(AccessError::not_found(format!(
                "mfa challenge {}",
                challenge.id
            ))),
        }
    }

    async fn remove_challenge(&self, ctx: &RequestContext, id: &str) -> AccessResult<()> {
        ctx.ensure_live(Utc::now())?;
        if let Some((_, challenge)) = self.challenges.remove(id) {
            self.live
                .remove_if(&(challenge.user_id, challenge.method), |_, v| v == id);
        }
        Ok(())
    }

    async fn close(&self) -> AccessResult<()> {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Incidents

#[derive(Debug, Default)]
pub struct InMemoryIncidentStore {
    incidents: RwLock<HashMap<String, SecurityIncident>>,
}

impl InMemoryIncidentStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

fn incident_matches(incident: &SecurityIncident, filter: &Filter) -> bool {
    if let Some(v) = filter_str(filter, "status") {
        if incident.status.to_string() != v {
            return false;
        }
    }
    if let Some(v) = filter_str(filter, "severity") {
        if incident.severity.to_string() != v {
            return false;
        }
    }
    if let Some(v) = filter_str(filter, "kind") {
        if incident.kind != v {
            return false;
        }
    }
    if let Some(v) = filter_str(filter, "reported_by") {
        if incident.reported_by != v {
            return false;
        }
    }
    if let Some(v) = filter_str(filter, "affected_system") {
        if !incident.affected_systems.iter().any(|s| s == v) {
            return false;
        }
    }
    true
}

#[async_trait]
impl IncidentStore for InMemoryIncidentStore {
    async fn create(&self, ctx: &RequestContext, incident: &SecurityIncident) -> AccessResult<()> {
        ctx.ensure_live(Utc::now())?;
        let mut incidents = self.incidents.write().await;
        if incidents.contains_key(&incident.id) {
            return Err(AccessError::conflict(format!(
                "incident id {} already exists",
                incident.id
            )));
        }
        incidents.insert(incident.id.clone(), incident.clone());
        Ok(())
    }

    async fn get(&self, ctx: &RequestContext, id: &str) -> AccessResult<SecurityIncident> {
        ctx.ensure_live(Utc::now())?;
        self.incidents
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| AccessError::not_found(format!("incident {id}")))
    }

    async fn update(&self, ctx: &RequestContext, incident: &SecurityIncident) -> AccessResult<()> {
        ctx.ensure_live(Utc::now())?;
        let mut incidents = self.incidents.write().await;
        if !incidents.contains_key(&incident.id) {
            return Err(AccessError::not_found(format!("incident {}", incident.id)));
        }
        incidents.insert(incident.id.clone(), incident.clone());
        Ok(())
    }

    async fn delete(&self, ctx: &RequestContext, id: &str) -> AccessResult<()> {
        ctx.ensure_live(Utc::now())?;
        self.incidents
            .write()
            .await
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| AccessError::not_found(format!("incident {id}")))
    }

    async fn list(
        &self,
        ctx: &RequestContext,
        filter: &Filter,
        offset: usize,
        limit: usize,
    ) -> AccessResult<Page<SecurityIncident>> {
        ctx.ensure_live(Utc::now())?;
        let incidents = self.incidents.read().await;
        let mut matched: Vec<SecurityIncident> = incidents
            .values()
            .filter(|i| incident_matches(i, filter))
            .cloned()
            .collect();
        matched.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id)));
        Ok(paginate(matched, offset, limit))
    }

    async fn close(&self) -> AccessResult<()> {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Vulnerabilities

#[derive(Debug, Default)]
pub struct InMemoryVulnerabilityStore {
    vulns: RwLock<HashMap<String, Vulnerability>>,
}

impl InMemoryVulnerabilityStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

fn vulnerability_matches(vuln: &Vulnerability, filter: &Filter) -> bool {
    if let Some(v) = filter_str(filter, "status") {
        if vuln.status.to_string() != v {
            return false;
        }
    }
    if let Some(v) = filter_str(filter, "severity") {
        if vuln.severity.to_string() != v {
            return false;
        }
    }
    if let Some(v) = filter_str(filter, "affected_system") {
        if !vuln.affected_systems.iter().any(|s| s == v) {
            return false;
        }
    }
    true
}

#[async_trait]
impl VulnerabilityStore for InMemoryVulnerabilityStore {
    async fn create(&self, ctx: &RequestContext, vuln: &Vulnerability) -> AccessResult<()> {
        ctx.ensure_live(Utc::now())?;
        let mut vulns = self.vulns.write().await;
        if vulns.contains_key(&vuln.id) {
            return Err(AccessError::conflict(format!(
                "vulnerability id {} already exists",
                vuln.id
            )));
        }
        vulns.insert(vuln.id.clone(), vuln.clone());
        Ok(())
    }

    async fn get(&self, ctx: &RequestContext, id: &str) -> AccessResult<Vulnerability> {
        ctx.ensure_live(Utc::now())?;
        self.vulns
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| AccessError::not_found(format!("vulnerability {id}")))
    }

    async fn update(&self, ctx: &RequestContext, vuln: &Vulnerability) -> AccessResult<()> {
        ctx.ensure_live(Utc::now())?;
        let mut vulns = self.vulns.write().await;
        if !vulns.contains_key(&vuln.id) {
            return Err(AccessError::not_found(format!("vulnerability {}", vuln.id)));
        }
        vulns.insert(vuln.id.clone(), vuln.clone());
        Ok(())
    }

    async fn delete(&self, ctx: &RequestContext, id: &str) -> AccessResult<()> {
        ctx.ensure_live(Utc::now())?;
        self.vulns
            .write()
            .await
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| AccessError::not_found(format!("vulnerability {id}")))
    }

    async fn list(
        &self,
        ctx: &RequestContext,
        filter: &Filter,
        offset: usize,
        limit: usize,
    ) -> AccessResult<Page<Vulnerability>> {
        ctx.ensure_live(Utc::now())?;
        let vulns = self.vulns.read().await;
        let mut matched: Vec<Vulnerability> = vulns
            .values()
            .filter(|v| vulnerability_matches(v, filter))
            .cloned()
            .collect();
        matched.sort_by(|a, b| b.discovered_at.cmp(&a.discovered_at).then(a.id.cmp(&b.id)));
        Ok(paginate(matched, offset, limit))
    }

    async fn close(&self) -> AccessResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::user::Credential;
    use chrono::Duration;

    fn user(id: &str, username: &str, email: &str) -> User {
        User::new(
            id,
            username,
            email,
            Credential {
                hash: "h".into(),
                algorithm: "argon2id".into(),
                last_changed: Utc::now(),
            },
            Utc::now(),
        )
    }

    #[tokio::test]
    async fn username_and_email_are_unique() {
        let store = InMemoryUserStore::new();
        let ctx = RequestContext::system();
        store
            .create(&ctx, &user("u1", "alice", "alice@example.com"))
            .await
            .unwrap();

        let dup_name = store
            .create(&ctx, &user("u2", "alice", "other@example.com"))
            .await;
        assert!(matches!(dup_name, Err(AccessError::Conflict(_))));

        let dup_email = store
            .create(&ctx, &user("u3", "bob", "alice@example.com"))
            .await;
        assert!(matches!(dup_email, Err(AccessError::Conflict(_))));
    }

    #[tokio::test]
    async fn create_then_get_round_trips() {
        let store = InMemoryUserStore::new();
        let ctx = RequestContext::system();
        let u = user("u1", "alice", "alice@example.com");
        store.create(&ctx, &u).await.unwrap();
        let fetched = store.get_by_id(&ctx, "u1").await.unwrap();
        assert_eq!(fetched.username, u.username);
        assert_eq!(fetched.email, u.email);
    }

    #[tokio::test]
    async fn session_delete_is_idempotent() {
        let store = InMemorySessionStore::new();
        let ctx = RequestContext::system();
        let now = Utc::now();
        let session = Session {
            id: "s1".into(),
            user_id: "u1".into(),
            created_at: now,
            absolute_expires_at: now + Duration::hours(24),
            last_activity_at: now,
            ip_address: String::new(),
            user_agent: String::new(),
            mfa: crate::models::session::MfaGate::NotRequired,
        };
        store.create(&ctx, &session).await.unwrap();
        store.delete(&ctx, "s1").await.unwrap();
        store.delete(&ctx, "s1").await.unwrap();
        assert!(matches!(
            store.get(&ctx, "s1").await,
            Err(AccessError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn new_challenge_supersedes_prior_for_same_pair() {
        let store = InMemoryMfaStore::new();
        let ctx = RequestContext::system();
        let now = Utc::now();
        let mk = |id: &str| MfaChallenge {
            id: id.into(),
            user_id: "u1".into(),
            method: MfaMethod::Totp,
            created_at: now,
            expires_at: now + Duration::minutes(15),
            consumed: false,
        };
        store.put_challenge(&ctx, &mk("c1")).await.unwrap();
        store.put_challenge(&ctx, &mk("c2")).await.unwrap();

        assert!(matches!(
            store.get_challenge(&ctx, "c1").await,
            Err(AccessError::NotFound(_))
        ));
        assert!(store.get_challenge(&ctx, "c2").await.is_ok());
    }

    #[tokio::test]
    async fn list_reports_unpaged_total() {
        let store = InMemoryUserStore::new();
        let ctx = RequestContext::system();
        for i in 0..5 {
            store
                .create(
                    &ctx,
                    &user(
                        &format!("u{i}"),
                        &format!("user{i}"),
                        &format!("user{i}@example.com"),
                    ),
                )
                .await
                .unwrap();
        }
        let page = store.list(&ctx, &Filter::new(), 0, 2).await.unwrap();
        assert_eq!(page.items.len(), 2);
        assert_eq!(page.total, 5);

        let tail = store.list(&ctx, &Filter::new(), 4, 2).await.unwrap();
        assert_eq!(tail.items.len(), 1);
        assert_eq!(tail.total, 5);
    }

    #[tokio::test]
    async fn cancelled_context_blocks_store_calls() {
        let store = InMemoryUserStore::new();
        let ctx = RequestContext::system();
        ctx.cancellation().cancel();
        let res = store.create(&ctx, &user("u1", "a", "a@example.com")).await;
        assert!(matches!(res, Err(AccessError::Cancelled(_))));
    }
}
