//! Typed storage contracts.
//!
//! Each store exposes CRUD plus list-with-filter behind an async trait so
//! concrete backends (in-memory, file, SQL, remote) can be swapped without
//! touching the managers. All operations take a [`RequestContext`] carrying
//! deadline and actor identity. Uniqueness constraints are enforced at the
//! store boundary and surface as [`AccessError::Conflict`]; missing rows are
//! [`AccessError::NotFound`], distinct from transient failures.

pub mod memory;

use std::collections::HashMap;

use async_trait::async_trait;

use crate::context::RequestContext;
use crate::error::AccessResult;
use crate::models::incident::SecurityIncident;
use crate::models::mfa::{MfaChallenge, MfaRecord};
use crate::models::session::Session;
use crate::models::user::User;
use crate::models::vulnerability::Vulnerability;

#[allow(unused_imports)] // doc links
use crate::error::AccessError;

/// Field → predicate mapping for list queries. Values are matched as
/// strings; unknown keys are ignored.
pub type Filter = HashMap<String, serde_json::Value>;

/// One page of results plus the total number of matches before paging.
#[derive(Debug, Clone)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: usize,
}

impl<T> Page<T> {
    #[must_use]
    pub fn empty() -> Self {
        Self {
            items: Vec::new(),
            total: 0,
        }
    }
}

/// Read a non-empty string predicate out of a filter.
pub(crate) fn filter_str<'a>(filter: &'a Filter, key: &str) -> Option<&'a str> {
    filter
        .get(key)
        .and_then(serde_json::Value::as_str)
        .filter(|s| !s.is_empty())
}

/// Slice one page out of a fully filtered result set.
pub(crate) fn paginate<T>(mut items: Vec<T>, offset: usize, limit: usize) -> Page<T> {
    let total = items.len();
    if offset >= total {
        return Page {
            items: Vec::new(),
            total,
        };
    }
    let items = items.drain(offset..).take(limit).collect();
    Page { items, total }
}

#[async_trait]
pub trait UserStore: Send + Sync {
    async fn create(&self, ctx: &RequestContext, user: &User) -> AccessResult<()>;
    async fn get_by_id(&self, ctx: &RequestContext, id: &str) -> AccessResult<User>;
    async fn get_by_username(&self, ctx: &RequestContext, username: &str) -> AccessResult<User>;
    async fn get_by_email(&self, ctx: &RequestContext, email: &str) -> AccessResult<User>;
    async fn update(&self, ctx: &RequestContext, user: &User) -> AccessResult<()>;
    async fn delete(&self, ctx: &RequestContext, id: &str) -> AccessResult<()>;
    async fn list(
        &self,
        ctx: &RequestContext,
        filter: &Filter,
        offset: usize,
        limit: usize,
    ) -> AccessResult<Page<User>>;
    async fn close(&self) -> AccessResult<()>;
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn create(&self, ctx: &RequestContext, session: &Session) -> AccessResult<()>;
    async fn get(&self, ctx: &RequestContext, id: &str) -> AccessResult<Session>;
    async fn update(&self, ctx: &RequestContext, session: &Session) -> AccessResult<()>;
    /// Idempotent: deleting an absent session succeeds.
    async fn delete(&self, ctx: &RequestContext, id: &str) -> AccessResult<()>;
    async fn list_for_user(&self, ctx: &RequestContext, user_id: &str)
        -> AccessResult<Vec<Session>>;
    /// Remove every session owned by the user; returns how many went away.
    async fn delete_for_user(&self, ctx: &RequestContext, user_id: &str) -> AccessResult<usize>;
    async fn list(
        &self,
        ctx: &RequestContext,
        filter: &Filter,
        offset: usize,
        limit: usize,
    ) -> AccessResult<Page<Session>>;
    async fn close(&self) -> AccessResult<()>;
}

#[async_trait]
pub trait MfaStore: Send + Sync {
    async fn get(&self, ctx: &RequestContext, user_id: &str) -> AccessResult<MfaRecord>;
    async fn upsert(&self, ctx: &RequestContext, record: &MfaRecord) -> AccessResult<()>;
    async fn delete(&self, ctx: &RequestContext, user_id: &str) -> AccessResult<()>;
    /// Install a challenge, superseding any live challenge for the same
    /// (user, method) pair.
    async fn put_challenge(&self, ctx: &RequestContext, challenge: &MfaChallenge)
        -> AccessResult<()>;
    async fn get_challenge(&self, ctx: &RequestContext, id: &str) -> AccessResult<MfaChallenge>;
    async fn update_challenge(
        &self,
        ctx: &RequestContext,
        challenge: &MfaChallenge,
    ) -> AccessResult<()>;
    async fn remove_challenge(&self, ctx: &RequestContext, id: &str) -> AccessResult<()>;
    async fn close(&self) -> AccessResult<()>;
}

#[async_trait]
pub trait IncidentStore: Send + Sync {
    async fn create(&self, ctx: &RequestContext, incident: &SecurityIncident) -> AccessResult<()>;
    async fn get(&self, ctx: &RequestContext, id: &str) -> AccessResult<SecurityIncident>;
    async fn update(&self, ctx: &RequestContext, incident: &SecurityIncident) -> AccessResult<()>;
    async fn delete(&self, ctx: &RequestContext, id: &str) -> AccessResult<()>;
    async fn list(
        &self,
        ctx: &RequestContext,
        filter: &Filter,
        offset: usize,
        limit: usize,
    ) -> AccessResult<Page<SecurityIncident>>;
    async fn close(&self) -> AccessResult<()>;
}

#[async_trait]
pub trait VulnerabilityStore: Send + Sync {
    async fn create(&self, ctx: &RequestContext, vuln: &Vulnerability) -> AccessResult<()>;
    async fn get(&self, ctx: &RequestContext, id: &str) -> AccessResult<Vulnerability>;
    async fn update(&self, ctx: &RequestContext, vuln: &Vulnerability) -> AccessResult<()>;
    async fn delete(&self, ctx: &RequestContext, id: &str) -> AccessResult<()>;
    async fn list(
        &self,
        ctx: &RequestContext,
        filter: &Filter,
        offset: usize,
        limit: usize,
    ) -> AccessResult<Page<Vulnerability>>;
    async fn close(&self) -> AccessResult<()>;
}
