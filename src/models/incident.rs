//! Security incident records.

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::audit::AuditSeverity;

/// Incident lifecycle state.
///
/// Legal transitions: `Open ⇄ Pending`, `Open → Closed`, `Pending → Closed`,
/// and `Closed → Pending` (reopening goes through `Pending`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IncidentStatus {
    Open,
    Pending,
    Closed,
}

impl fmt::Display for IncidentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Open => "open",
            Self::Pending => "pending",
            Self::Closed => "closed",
        };
        f.write_str(s)
    }
}

/// Tracked security event with a lifecycle and resolution.
///
/// Invariant: `resolved_at` is set iff `status == Closed`, and is never
/// earlier than `created_at`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityIncident {
    pub id: String,
    pub title: String,
    pub kind: String,
    pub severity: AuditSeverity,
    pub status: IncidentStatus,
    pub detected_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub reported_by: String,
    pub assigned_to: String,
    pub affected_systems: Vec<String>,
    pub related_audit_ids: Vec<String>,
    #[serde(default)]
    pub details: HashMap<String, serde_json::Value>,
}

impl SecurityIncident {
    /// Whether `to` is a legal next state from the current one.
    #[must_use]
    pub fn can_transition_to(&self, to: IncidentStatus) -> bool {
        use IncidentStatus::{Closed, Open, Pending};
        match (self.status, to) {
            (Open, Pending | Closed) => true,
            (Pending, Open | Closed) => true,
            (Closed, Pending) => true,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn incident(status: IncidentStatus) -> SecurityIncident {
        let now = Utc::now();
        SecurityIncident {
            id: "i1".into(),
            title: "prompt injection observed".into(),
            kind: "injection".into(),
            severity: AuditSeverity::High,
            status,
            detected_at: now,
            created_at: now,
            updated_at: now,
            resolved_at: None,
            reported_by: String::new(),
            assigned_to: String::new(),
            affected_systems: vec![],
            related_audit_ids: vec![],
            details: HashMap::new(),
        }
    }

    #[test]
    fn closed_reopens_only_through_pending() {
        let closed = incident(IncidentStatus::Closed);
        assert!(closed.can_transition_to(IncidentStatus::Pending));
        assert!(!closed.can_transition_to(IncidentStatus::Open));
        assert!(!closed.can_transition_to(IncidentStatus::Closed));
    }

    #[test]
    fn open_can_close_directly() {
        let open = incident(IncidentStatus::Open);
        assert!(open.can_transition_to(IncidentStatus::Closed));
        assert!(open.can_transition_to(IncidentStatus::Pending));
        assert!(!open.can_transition_to(IncidentStatus::Open));
    }
}
