//! Audit log records.
//!
//! Entries are append-only. When persisted they serialize to the JSON shape
//! consumed by external tooling: `id`, `timestamp` (RFC 3339), `user_id`,
//! `username`, `action`, `resource`, `resource_id`, `description`,
//! `ip_address`, `user_agent`, `severity`, `status`, `session_id`,
//! `metadata`, `changes`.

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::context::RequestContext;

/// Closed set of auditable actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditAction {
    Login,
    Logout,
    Create,
    Read,
    Update,
    Delete,
    Execute,
    Authorize,
    Unauthorized,
    System,
    Security,
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Login => "login",
            Self::Logout => "logout",
            Self::Create => "create",
            Self::Read => "read",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::Execute => "execute",
            Self::Authorize => "authorize",
            Self::Unauthorized => "unauthorized",
            Self::System => "system",
            Self::Security => "security",
        };
        f.write_str(s)
    }
}

/// Severity of an audit event, ordered from least to most urgent.
/// `Error` sits above `Critical` and marks internal faults rather than
/// security impact.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum AuditSeverity {
    #[default]
    Info,
    Low,
    Medium,
    High,
    Critical,
    Error,
}

impl fmt::Display for AuditSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Info => "info",
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
            Self::Error => "error",
        };
        f.write_str(s)
    }
}

impl AuditSeverity {
    /// All severities, in ascending order.
    pub const ALL: [AuditSeverity; 6] = [
        Self::Info,
        Self::Low,
        Self::Medium,
        Self::High,
        Self::Critical,
        Self::Error,
    ];
}

/// A single immutable audit record.
///
/// `id` and `timestamp` may be left empty/`None` on construction; the logger
/// stamps them on append.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: String,
    pub timestamp: Option<DateTime<Utc>>,
    pub user_id: String,
    pub username: String,
    pub action: AuditAction,
    pub resource: String,
    pub resource_id: String,
    pub description: String,
    pub ip_address: String,
    pub user_agent: String,
    pub severity: AuditSeverity,
    pub status: String,
    pub session_id: String,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
    #[serde(default)]
    pub changes: HashMap<String, serde_json::Value>,
}

impl AuditEntry {
    #[must_use]
    pub fn new(
        action: AuditAction,
        resource: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            id: String::new(),
            timestamp: None,
            user_id: String::new(),
            username: String::new(),
            action,
            resource: resource.into(),
            resource_id: String::new(),
            description: description.into(),
            ip_address: String::new(),
            user_agent: String::new(),
            severity: AuditSeverity::Info,
            status: String::new(),
            session_id: String::new(),
            metadata: HashMap::new(),
            changes: HashMap::new(),
        }
    }

    /// Fill actor and environment fields from the request principal.
    #[must_use]
    pub fn with_context(mut self, ctx: &RequestContext) -> Self {
        self.user_id = ctx.principal.user_id.clone();
        self.username = ctx.principal.username.clone();
        self.ip_address = ctx.principal.ip_address.clone();
        self.user_agent = ctx.principal.user_agent.clone();
        self
    }

    /// Fill only the environment fields, leaving the actor to
    /// [`AuditEntry::with_actor`]. Used when the acting principal is not yet
    /// authenticated as the user the entry concerns.
    #[must_use]
    pub fn with_environment(mut self, ctx: &RequestContext) -> Self {
        self.ip_address = ctx.principal.ip_address.clone();
        self.user_agent = ctx.principal.user_agent.clone();
        self
    }

    #[must_use]
    pub fn with_actor(mut self, user_id: impl Into<String>, username: impl Into<String>) -> Self {
        self.user_id = user_id.into();
        self.username = username.into();
        self
    }

    #[must_use]
    pub fn with_resource_id(mut self, id: impl Into<String>) -> Self {
        self.resource_id = id.into();
        self
    }

    #[must_use]
    pub fn with_severity(mut self, severity: AuditSeverity) -> Self {
        self.severity = severity;
        self
    }

    #[must_use]
    pub fn with_status(mut self, status: impl Into<String>) -> Self {
        self.status = status.into();
        self
    }

    #[must_use]
    pub fn with_session_id(mut self, id: impl Into<String>) -> Self {
        self.session_id = id.into();
        self
    }

    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    #[must_use]
    pub fn with_change(mut self, field: impl Into<String>, value: serde_json::Value) -> Self {
        self.changes.insert(field.into(), value);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Principal;

    #[test]
    fn serializes_with_contract_field_names() {
        let entry = AuditEntry::new(AuditAction::Login, "auth", "successful login")
            .with_actor("u1", "alice")
            .with_severity(AuditSeverity::Info)
            .with_status("success");

        let json = serde_json::to_value(&entry).unwrap();
        for field in [
            "id",
            "timestamp",
            "user_id",
            "username",
            "action",
            "resource",
            "resource_id",
            "description",
            "ip_address",
            "user_agent",
            "severity",
            "status",
            "session_id",
            "metadata",
            "changes",
        ] {
            assert!(json.get(field).is_some(), "missing field {field}");
        }
        assert_eq!(json["action"], "login");
        assert_eq!(json["severity"], "info");
    }

    #[test]
    fn context_populates_actor_fields() {
        let ctx = RequestContext::new(
            Principal::new("u1", "alice")
                .with_ip_address("10.0.0.1")
                .with_user_agent("cli/1.0"),
        );
        let entry = AuditEntry::new(AuditAction::Execute, "attack", "ran module").with_context(&ctx);
        assert_eq!(entry.user_id, "u1");
        assert_eq!(entry.ip_address, "10.0.0.1");
        assert_eq!(entry.user_agent, "cli/1.0");
    }

    #[test]
    fn severity_ordering_ascends() {
        assert!(AuditSeverity::Info < AuditSeverity::High);
        assert!(AuditSeverity::Critical < AuditSeverity::Error);
    }
}
