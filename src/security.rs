//! Incident and vulnerability tracking.
//!
//! Incidents move `Open ⇄ Pending → Closed` (reopening a closed incident
//! goes through `Pending`); vulnerabilities only move forward along their
//! remediation chain. Status updates demand that time has advanced past the
//! record's `updated_at`, which rejects stale concurrent writers.

use std::pin::Pin;
use std::sync::Arc;

use std::future::Future;

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use crate::audit::AuditLogger;
use crate::clock::SharedClock;
use crate::context::RequestContext;
use crate::error::{AccessError, AccessResult};
use crate::models::audit::{AuditAction, AuditEntry, AuditSeverity};
use crate::models::incident::{IncidentStatus, SecurityIncident};
use crate::models::vulnerability::{Vulnerability, VulnerabilitySeverity, VulnerabilityStatus};
use crate::random::SharedIdGenerator;
use crate::store::{Filter, IncidentStore, Page, VulnerabilityStore};

/// Callback that revokes every session of a user, returning how many died.
/// Injected so the security manager can contain an account without a
/// circular dependency on the session manager.
pub type SessionRevoker = Arc<
    dyn Fn(
            RequestContext,
            String,
        ) -> Pin<Box<dyn Future<Output = AccessResult<usize>> + Send>>
        + Send
        + Sync,
>;

/// Fields supplied by the reporter; everything else is stamped.
#[derive(Debug, Clone, Default)]
pub struct NewIncident {
    pub title: String,
    pub kind: String,
    pub severity: AuditSeverity,
    /// When the underlying event happened, if known; defaults to now.
    pub detected_at: Option<DateTime<Utc>>,
    pub assigned_to: String,
    pub affected_systems: Vec<String>,
    pub related_audit_ids: Vec<String>,
    pub details: std::collections::HashMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Default)]
pub struct NewVulnerability {
    pub title: String,
    pub description: String,
    pub severity: VulnerabilitySeverity,
    pub affected_systems: Vec<String>,
    pub details: std::collections::HashMap<String, serde_json::Value>,
}

pub struct SecurityManager {
    incidents: Arc<dyn IncidentStore>,
    vulns: Arc<dyn VulnerabilityStore>,
    audit: Arc<dyn AuditLogger>,
    revoker: SessionRevoker,
    clock: SharedClock,
    ids: SharedIdGenerator,
}

impl SecurityManager {
    pub fn new(
        incidents: Arc<dyn IncidentStore>,
        vulns: Arc<dyn VulnerabilityStore>,
        audit: Arc<dyn AuditLogger>,
        revoker: SessionRevoker,
        clock: SharedClock,
        ids: SharedIdGenerator,
    ) -> Self {
        Self {
            incidents,
            vulns,
            audit,
            revoker,
            clock,
            ids,
        }
    }

    pub async fn report_incident(
        &self,
        ctx: &RequestContext,
        new: NewIncident,
    ) -> AccessResult<SecurityIncident> {
        if new.title.trim().is_empty() {
            return Err(AccessError::invalid_input("incident title must not be empty"));
        }
        let now = self.clock.now();
        let incident = SecurityIncident {
            id: self.ids.generate(),
            title: new.title,
            kind: new.kind,
            severity: new.severity,
            status: IncidentStatus::Open,
            detected_at: new.detected_at.unwrap_or(now),
            created_at: now,
            updated_at: now,
            resolved_at: None,
            reported_by: ctx.principal.user_id.clone(),
            assigned_to: new.assigned_to,
            affected_systems: new.affected_systems,
            related_audit_ids: new.related_audit_ids,
            details: new.details,
        };
        self.incidents.create(ctx, &incident).await?;

        warn!(incident_id = %incident.id, severity = %incident.severity, "incident opened");
        self.audit
            .append(
                ctx,
                AuditEntry::new(
                    AuditAction::Create,
                    "incident",
                    format!("incident opened: {}", incident.title),
                )
                .with_context(ctx)
                .with_resource_id(&incident.id)
                .with_severity(incident.severity)
                .with_status("open"),
            )
            .await?;
        Ok(incident)
    }

    pub async fn get_incident(
        &self,
        ctx: &RequestContext,
        id: &str,
    ) -> AccessResult<SecurityIncident> {
        self.incidents.get(ctx, id).await
    }

    pub async fn list_incidents(
        &self,
        ctx: &RequestContext,
        filter: &Filter,
        offset: usize,
        limit: usize,
    ) -> AccessResult<Page<SecurityIncident>> {
        self.incidents.list(ctx, filter, offset, limit).await
    }

    /// Move an incident along its lifecycle. Illegal transitions (including
    /// a no-op to the same status) are conflicts, as is an update arriving
    /// before the clock has passed the record's `updated_at`.
    pub async fn update_incident_status(
        &self,
        ctx: &RequestContext,
        id: &str,
        to: IncidentStatus,
    ) -> AccessResult<SecurityIncident> {
        let mut incident = self.incidents.get(ctx, id).await?;
        let now = self.clock.now();
        if now <= incident.updated_at {
            return Err(AccessError::conflict(
                "incident was updated concurrently; retry",
            ));
        }
        if !incident.can_transition_to(to) {
            return Err(AccessError::conflict(format!(
                "illegal incident transition {} -> {to}",
                incident.status
            )));
        }
        let from = incident.status;
        incident.status = to;
        incident.resolved_at = match to {
            IncidentStatus::Closed => Some(now),
            _ => None,
        };
        incident.updated_at = now;
        self.incidents.update(ctx, &incident).await?;

        self.audit
            .append(
                ctx,
                AuditEntry::new(
                    AuditAction::Update,
                    "incident",
                    format!("incident {from} -> {to}"),
                )
                .with_context(ctx)
                .with_resource_id(id)
                .with_severity(incident.severity)
                .with_status(to.to_string())
                .with_change("status", to.to_string().into()),
            )
            .await?;
        Ok(incident)
    }

    pub async fn assign_incident(
        &self,
        ctx: &RequestContext,
        id: &str,
        assignee: &str,
    ) -> AccessResult<SecurityIncident> {
        let mut incident = self.incidents.get(ctx, id).await?;
        let now = self.clock.now();
        if now <= incident.updated_at {
            return Err(AccessError::conflict(
                "incident was updated concurrently; retry",
            ));
        }
        incident.assigned_to = assignee.to_string();
        incident.updated_at = now;
        self.incidents.update(ctx, &incident).await?;

        self.audit
            .append(
                ctx,
                AuditEntry::new(AuditAction::Update, "incident", "incident assigned")
                    .with_context(ctx)
                    .with_resource_id(id)
                    .with_status("assigned")
                    .with_change("assigned_to", assignee.into()),
            )
            .await?;
        Ok(incident)
    }

    /// Contain a compromised account: revoke every session it holds and
    /// record the action on the incident.
    pub async fn contain_user(
        &self,
        ctx: &RequestContext,
        incident_id: &str,
        user_id: &str,
    ) -> AccessResult<usize> {
        let mut incident = self.incidents.get(ctx, incident_id).await?;
        let revoked = (self.revoker)(ctx.clone(), user_id.to_string()).await?;

        incident
            .details
            .insert("contained_user".into(), user_id.into());
        incident
            .details
            .insert("sessions_revoked".into(), revoked.into());
        incident.updated_at = self.clock.now();
        self.incidents.update(ctx, &incident).await?;

        warn!(incident_id, user_id, revoked, "user contained");
        self.audit
            .append(
                ctx,
                AuditEntry::new(
                    AuditAction::Security,
                    "incident",
                    format!("user {user_id} contained"),
                )
                .with_context(ctx)
                .with_resource_id(incident_id)
                .with_severity(AuditSeverity::High)
                .with_status("contained")
                .with_metadata("sessions_revoked", revoked.into()),
            )
            .await?;
        Ok(revoked)
    }

    /// Escalate a security-relevant audit entry into an incident.
    ///
    /// Entries with the `Security` action at `High` severity or above open
    /// an incident automatically, linked back to the entry. Anything else
    /// is ignored.
    pub async fn process_audit_entry(
        &self,
        ctx: &RequestContext,
        entry: &AuditEntry,
    ) -> AccessResult<Option<SecurityIncident>> {
        if entry.action != AuditAction::Security || entry.severity < AuditSeverity::High {
            return Ok(None);
        }
        let incident = self
            .report_incident(
                ctx,
                NewIncident {
                    title: entry.description.clone(),
                    kind: "audit_escalation".into(),
                    severity: entry.severity,
                    detected_at: entry.timestamp,
                    related_audit_ids: vec![entry.id.clone()],
                    ..NewIncident::default()
                },
            )
            .await?;
        info!(incident_id = %incident.id, audit_id = %entry.id, "audit entry escalated");
        Ok(Some(incident))
    }

    pub async fn report_vulnerability(
        &self,
        ctx: &RequestContext,
        new: NewVulnerability,
    ) -> AccessResult<Vulnerability> {
        if new.title.trim().is_empty() {
            return Err(AccessError::invalid_input(
                "vulnerability title must not be empty",
            ));
        }
        let now = self.clock.now();
        let vuln = Vulnerability {
            id: self.ids.generate(),
            title: new.title,
            description: new.description,
            severity: new.severity,
            status: VulnerabilityStatus::Open,
            discovered_at: now,
            updated_at: now,
            mitigated_at: None,
            resolved_at: None,
            affected_systems: new.affected_systems,
            details: new.details,
        };
        self.vulns.create(ctx, &vuln).await?;

        self.audit
            .append(
                ctx,
                AuditEntry::new(
                    AuditAction::Create,
                    "vulnerability",
                    format!("vulnerability reported: {}", vuln.title),
                )
                .with_context(ctx)
                .with_resource_id(&vuln.id)
                .with_status("open"),
            )
            .await?;
        Ok(vuln)
    }

    pub async fn get_vulnerability(
        &self,
        ctx: &RequestContext,
        id: &str,
    ) -> AccessResult<Vulnerability> {
        self.vulns.get(ctx, id).await
    }

    pub async fn list_vulnerabilities(
        &self,
        ctx: &RequestContext,
        filter: &Filter,
        offset: usize,
        limit: usize,
    ) -> AccessResult<Page<Vulnerability>> {
        self.vulns.list(ctx, filter, offset, limit).await
    }

    /// Advance a vulnerability along `Open → Pending → Mitigated → Resolved`.
    /// Skipping ahead is allowed; standing still or moving backwards is a
    /// conflict. Stage timestamps are stamped the first time each stage is
    /// reached or passed.
    pub async fn update_vulnerability_status(
        &self,
        ctx: &RequestContext,
        id: &str,
        to: VulnerabilityStatus,
    ) -> AccessResult<Vulnerability> {
        let mut vuln = self.vulns.get(ctx, id).await?;
        let now = self.clock.now();
        if now <= vuln.updated_at {
            return Err(AccessError::conflict(
                "vulnerability was updated concurrently; retry",
            ));
        }
        if to.stage() <= vuln.status.stage() {
            return Err(AccessError::conflict(format!(
                "illegal vulnerability transition {} -> {to}",
                vuln.status
            )));
        }
        let from = vuln.status;
        vuln.status = to;
        if to.stage() >= VulnerabilityStatus::Mitigated.stage() && vuln.mitigated_at.is_none() {
            vuln.mitigated_at = Some(now);
        }
        if to == VulnerabilityStatus::Resolved {
            vuln.resolved_at = Some(now);
        }
        vuln.updated_at = now;
        self.vulns.update(ctx, &vuln).await?;

        self.audit
            .append(
                ctx,
                AuditEntry::new(
                    AuditAction::Update,
                    "vulnerability",
                    format!("vulnerability {from} -> {to}"),
                )
                .with_context(ctx)
                .with_resource_id(id)
                .with_status(to.to_string())
                .with_change("status", to.to_string().into()),
            )
            .await?;
        Ok(vuln)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::MemoryAuditLogger;
    use crate::clock::{Clock, ManualClock};
    use crate::config::AuditPolicy;
    use crate::random::SequenceIdGenerator;
    use crate::store::memory::{InMemoryIncidentStore, InMemoryVulnerabilityStore};
    use chrono::Duration;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Fixture {
        manager: SecurityManager,
        clock: Arc<ManualClock>,
        revoked: Arc<AtomicUsize>,
        ctx: RequestContext,
    }

    fn fixture() -> Fixture {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let ids: SharedIdGenerator = Arc::new(SequenceIdGenerator::new("id"));
        let audit = Arc::new(MemoryAuditLogger::new(
            AuditPolicy::default(),
            clock.clone(),
            ids.clone(),
        ));
        let revoked = Arc::new(AtomicUsize::new(0));
        let counter = revoked.clone();
        let revoker: SessionRevoker = Arc::new(move |_ctx, _user| {
            let counter = counter.clone();
            Box::pin(async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(3)
            })
        });
        let manager = SecurityManager::new(
            Arc::new(InMemoryIncidentStore::new()),
            Arc::new(InMemoryVulnerabilityStore::new()),
            audit,
            revoker,
            clock.clone(),
            ids,
        );
        Fixture {
            manager,
            clock,
            revoked,
            ctx: RequestContext::system(),
        }
    }

    fn incident_input(title: &str) -> NewIncident {
        NewIncident {
            title: title.into(),
            kind: "injection".into(),
            severity: AuditSeverity::High,
            ..NewIncident::default()
        }
    }

    #[tokio::test]
    async fn incident_lifecycle_follows_legal_transitions() {
        let f = fixture();
        let incident = f
            .manager
            .report_incident(&f.ctx, incident_input("prompt injection"))
            .await
            .unwrap();
        assert_eq!(incident.status, IncidentStatus::Open);

        f.clock.advance(Duration::seconds(1));
        let pending = f
            .manager
            .update_incident_status(&f.ctx, &incident.id, IncidentStatus::Pending)
            .await
            .unwrap();
        assert_eq!(pending.status, IncidentStatus::Pending);
        assert!(pending.resolved_at.is_none());

        f.clock.advance(Duration::seconds(1));
        let closed = f
            .manager
            .update_incident_status(&f.ctx, &incident.id, IncidentStatus::Closed)
            .await
            .unwrap();
        assert_eq!(closed.resolved_at, Some(f.clock.now()));

        // closed cannot jump straight back to open
        f.clock.advance(Duration::seconds(1));
        let reopen = f
            .manager
            .update_incident_status(&f.ctx, &incident.id, IncidentStatus::Open)
            .await;
        assert!(matches!(reopen, Err(AccessError::Conflict(_))));

        // reopening through pending clears the resolution
        let reopened = f
            .manager
            .update_incident_status(&f.ctx, &incident.id, IncidentStatus::Pending)
            .await
            .unwrap();
        assert!(reopened.resolved_at.is_none());
    }

    #[tokio::test]
    async fn same_status_update_is_a_conflict() {
        let f = fixture();
        let incident = f
            .manager
            .report_incident(&f.ctx, incident_input("x"))
            .await
            .unwrap();
        f.clock.advance(Duration::seconds(1));
        let res = f
            .manager
            .update_incident_status(&f.ctx, &incident.id, IncidentStatus::Open)
            .await;
        assert!(matches!(res, Err(AccessError::Conflict(_))));
    }

    #[tokio::test]
    async fn update_without_time_advance_is_rejected() {
        let f = fixture();
        let incident = f
            .manager
            .report_incident(&f.ctx, incident_input("x"))
            .await
            .unwrap();
        let res = f
            .manager
            .update_incident_status(&f.ctx, &incident.id, IncidentStatus::Pending)
            .await;
        assert!(matches!(res, Err(AccessError::Conflict(_))));
    }

    #[tokio::test]
    async fn high_severity_security_entries_escalate() {
        let f = fixture();
        let mut entry = AuditEntry::new(AuditAction::Security, "auth", "account locked")
            .with_severity(AuditSeverity::High);
        entry.id = "audit-42".into();
        entry.timestamp = Some(f.clock.now() - Duration::minutes(1));

        let incident = f
            .manager
            .process_audit_entry(&f.ctx, &entry)
            .await
            .unwrap()
            .expect("incident expected");
        assert_eq!(incident.kind, "audit_escalation");
        assert_eq!(incident.related_audit_ids, vec!["audit-42".to_string()]);
        assert_eq!(incident.detected_at, entry.timestamp.unwrap());

        // lower severities and other actions do not escalate
        let low = AuditEntry::new(AuditAction::Security, "auth", "x")
            .with_severity(AuditSeverity::Medium);
        assert!(f
            .manager
            .process_audit_entry(&f.ctx, &low)
            .await
            .unwrap()
            .is_none());
        let login = AuditEntry::new(AuditAction::Login, "auth", "x")
            .with_severity(AuditSeverity::Critical);
        assert!(f
            .manager
            .process_audit_entry(&f.ctx, &login)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn contain_user_revokes_sessions_and_annotates() {
        let f = fixture();
        let incident = f
            .manager
            .report_incident(&f.ctx, incident_input("compromise"))
            .await
            .unwrap();
        f.clock.advance(Duration::seconds(1));

        let revoked = f
            .manager
            .contain_user(&f.ctx, &incident.id, "u1")
            .await
            .unwrap();
        assert_eq!(revoked, 3);
        assert_eq!(f.revoked.load(Ordering::SeqCst), 1);

        let incident = f.manager.get_incident(&f.ctx, &incident.id).await.unwrap();
        assert_eq!(incident.details["contained_user"], "u1");
        assert_eq!(incident.details["sessions_revoked"], 3);
    }

    #[tokio::test]
    async fn vulnerability_chain_is_forward_only() {
        let f = fixture();
        let vuln = f
            .manager
            .report_vulnerability(
                &f.ctx,
                NewVulnerability {
                    title: "system prompt leak".into(),
                    severity: VulnerabilitySeverity::High,
                    ..NewVulnerability::default()
                },
            )
            .await
            .unwrap();

        f.clock.advance(Duration::seconds(1));
        // skipping ahead is allowed and stamps mitigated_at
        let mitigated = f
            .manager
            .update_vulnerability_status(&f.ctx, &vuln.id, VulnerabilityStatus::Mitigated)
            .await
            .unwrap();
        assert_eq!(mitigated.mitigated_at, Some(f.clock.now()));
        assert!(mitigated.resolved_at.is_none());

        f.clock.advance(Duration::seconds(1));
        let resolved = f
            .manager
            .update_vulnerability_status(&f.ctx, &vuln.id, VulnerabilityStatus::Resolved)
            .await
            .unwrap();
        assert_eq!(resolved.resolved_at, Some(f.clock.now()));

        f.clock.advance(Duration::seconds(1));
        let backwards = f
            .manager
            .update_vulnerability_status(&f.ctx, &vuln.id, VulnerabilityStatus::Open)
            .await;
        assert!(matches!(backwards, Err(AccessError::Conflict(_))));
    }
}
