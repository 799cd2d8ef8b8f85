//! Role-based access control.
//!
//! Role definitions live in the manager; assignments live on the user
//! record. Permissions are compared verbatim, with no wildcard or hierarchy
//! semantics. Removing a role definition leaves any user assignments
//! dangling; they simply grant nothing until the role is redefined.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::info;

use crate::audit::AuditLogger;
use crate::clock::SharedClock;
use crate::context::RequestContext;
use crate::error::{AccessError, AccessResult};
use crate::models::audit::{AuditAction, AuditEntry, AuditSeverity};
use crate::models::role::Role;
use crate::store::UserStore;

pub struct RbacManager {
    roles: RwLock<HashMap<String, Role>>,
    user_store: Arc<dyn UserStore>,
    audit: Arc<dyn AuditLogger>,
    clock: SharedClock,
}

impl RbacManager {
    /// Seed the role table from `default_roles` (name → permission set).
    pub fn new(
        user_store: Arc<dyn UserStore>,
        audit: Arc<dyn AuditLogger>,
        default_roles: &HashMap<String, HashSet<String>>,
        clock: SharedClock,
    ) -> Self {
        let roles = default_roles
            .iter()
            .map(|(name, permissions)| {
                (
                    name.clone(),
                    Role {
                        name: name.clone(),
                        description: String::new(),
                        permissions: permissions.clone(),
                    },
                )
            })
            .collect();
        Self {
            roles: RwLock::new(roles),
            user_store,
            audit,
            clock,
        }
    }

    pub async fn define_role(&self, ctx: &RequestContext, role: Role) -> AccessResult<()> {
        ctx.ensure_live(self.clock.now())?;
        if role.name.is_empty() {
            return Err(AccessError::invalid_input("role name must not be empty"));
        }
        let mut roles = self.roles.write().await;
        if roles.contains_key(&role.name) {
            return Err(AccessError::conflict(format!(
                "role {} already defined",
                role.name
            )));
        }
        let name = role.name.clone();
        roles.insert(name.clone(), role);
        drop(roles);

        self.audit
            .append(
                ctx,
                AuditEntry::new(AuditAction::Create, "role", format!("role {name} defined"))
                    .with_context(ctx)
                    .with_resource_id(name)
                    .with_status("success"),
            )
            .await?;
        Ok(())
    }

    pub async fn remove_role(&self, ctx: &RequestContext, name: &str) -> AccessResult<()> {
        ctx.ensure_live(self.clock.now())?;
        let removed = self.roles.write().await.remove(name);
        if removed.is_none() {
            return Err(AccessError::not_found(format!("role {name}")));
        }
        self.audit
            .append(
                ctx,
                AuditEntry::new(AuditAction::Delete, "role", format!("role {name} removed"))
                    .with_context(ctx)
                    .with_resource_id(name)
                    .with_severity(AuditSeverity::Medium)
                    .with_status("success"),
            )
            .await?;
        Ok(())
    }

    pub async fn get_role(&self, ctx: &RequestContext, name: &str) -> AccessResult<Role> {
        ctx.ensure_live(self.clock.now())?;
        self.roles
            .read()
            .await
            .get(name)
            .cloned()
            .ok_or_else(|| AccessError::not_found(format!("role {name}")))
    }

    pub async fn list_roles(&self, ctx: &RequestContext) -> AccessResult<Vec<Role>> {
        ctx.ensure_live(self.clock.now())?;
        let mut roles: Vec<Role> = self.roles.read().await.values().cloned().collect();
        roles.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(roles)
    }

    /// Grant a role to a user. Assigning a role the user already holds is a
    /// no-op.
    pub async fn assign_role(
        &self,
        ctx: &RequestContext,
        user_id: &str,
        role_name: &str,
    ) -> AccessResult<()> {
        ctx.ensure_live(self.clock.now())?;
        if !self.roles.read().await.contains_key(role_name) {
            return Err(AccessError::not_found(format!("role {role_name}")));
        }
        let mut user = self.user_store.get_by_id(ctx, user_id).await?;
        if !user.roles.insert(role_name.to_string()) {
            return Ok(());
        }
        user.updated_at = self.clock.now();
        self.user_store.update(ctx, &user).await?;

        info!(user_id, role = role_name, "role assigned");
        self.audit
            .append(
                ctx,
                AuditEntry::new(
                    AuditAction::Update,
                    "user",
                    format!("role {role_name} assigned"),
                )
                .with_context(ctx)
                .with_resource_id(user_id)
                .with_status("success")
                .with_change("roles", role_name.into()),
            )
            .await?;
        Ok(())
    }

    /// Revoke a role from a user. Revoking a role the user does not hold is
    /// `NotFound`.
    pub async fn revoke_role(
        &self,
        ctx: &RequestContext,
        user_id: &str,
        role_name: &str,
    ) -> AccessResult<()> {
        ctx.ensure_live(self.clock.now())?;
        let mut user = self.user_store.get_by_id(ctx, user_id).await?;
        if !user.roles.remove(role_name) {
            return Err(AccessError::not_found(format!(
                "role {role_name} on user {user_id}"
            )));
        }
        user.updated_at = self.clock.now();
        self.user_store.update(ctx, &user).await?;

        self.audit
            .append(
                ctx,
                AuditEntry::new(
                    AuditAction::Update,
                    "user",
                    format!("role {role_name} revoked"),
                )
                .with_context(ctx)
                .with_resource_id(user_id)
                .with_severity(AuditSeverity::Medium)
                .with_status("success")
                .with_change("roles", role_name.into()),
            )
            .await?;
        Ok(())
    }

    /// Union of the permission sets of every role the user holds.
    pub async fn effective_permissions(
        &self,
        ctx: &RequestContext,
        user_id: &str,
    ) -> AccessResult<HashSet<String>> {
        ctx.ensure_live(self.clock.now())?;
        let user = self.user_store.get_by_id(ctx, user_id).await?;
        let roles = self.roles.read().await;
        let mut permissions = HashSet::new();
        for role_name in &user.roles {
            if let Some(role) = roles.get(role_name) {
                permissions.extend(role.permissions.iter().cloned());
            }
        }
        Ok(permissions)
    }

    pub async fn has_permission(
        &self,
        ctx: &RequestContext,
        user_id: &str,
        permission: &str,
    ) -> AccessResult<bool> {
        ctx.ensure_live(self.clock.now())?;
        let user = self.user_store.get_by_id(ctx, user_id).await?;
        let roles = self.roles.read().await;
        Ok(user
            .roles
            .iter()
            .filter_map(|name| roles.get(name))
            .any(|role| role.grants(permission)))
    }

    /// Enforce a permission. A pure query: denials are logged by the
    /// caller, not here.
    pub async fn check(
        &self,
        ctx: &RequestContext,
        user_id: &str,
        permission: &str,
    ) -> AccessResult<()> {
        if self.has_permission(ctx, user_id, permission).await? {
            return Ok(());
        }
        Err(AccessError::Forbidden(format!(
            "missing permission {permission}"
        )))
    }
}
