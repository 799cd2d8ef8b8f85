//! In-memory audit sink.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::debug;

use crate::audit::{entry_matches, sort_entries, AuditLogger, MonotonicStamp};
use crate::clock::SharedClock;
use crate::config::AuditPolicy;
use crate::context::RequestContext;
use crate::error::{AccessError, AccessResult};
use crate::models::audit::AuditEntry;
use crate::random::SharedIdGenerator;
use crate::store::{paginate, Filter, Page};

/// Audit sink backed by a vector. The primary sink in tests and the default
/// assembly.
pub struct MemoryAuditLogger {
    entries: Mutex<Vec<AuditEntry>>,
    stamp: MonotonicStamp,
    policy: AuditPolicy,
    clock: SharedClock,
    ids: SharedIdGenerator,
}

impl MemoryAuditLogger {
    #[must_use]
    pub fn new(policy: AuditPolicy, clock: SharedClock, ids: SharedIdGenerator) -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
            stamp: MonotonicStamp::new(),
            policy,
            clock,
            ids,
        }
    }

    fn stamp_entry(&self, mut entry: AuditEntry) -> AuditEntry {
        if entry.id.is_empty() {
            entry.id = self.ids.generate();
        }
        let candidate = entry.timestamp.unwrap_or_else(|| self.clock.now());
        entry.timestamp = Some(self.stamp.stamp(candidate));
        entry
    }
}

#[async_trait]
impl AuditLogger for MemoryAuditLogger {
    async fn initialize(&self) -> AccessResult<()> {
        Ok(())
    }

    async fn append(&self, ctx: &RequestContext, entry: AuditEntry) -> AccessResult<AuditEntry> {
        ctx.ensure_live(self.clock.now())?;
        let entry = self.stamp_entry(entry);
        if !self.policy.allows(entry.severity) {
            debug!(severity = %entry.severity, "audit entry dropped by severity policy");
            return Ok(entry);
        }
        self.entries.lock().await.push(entry.clone());
        Ok(entry)
    }

    async fn get_by_id(&self, ctx: &RequestContext, id: &str) -> AccessResult<AuditEntry> {
        ctx.ensure_live(self.clock.now())?;
        self.entries
            .lock()
            .await
            .iter()
            .find(|e| e.id == id)
            .cloned()
            .ok_or_else(|| AccessError::not_found(format!("audit entry {id}")))
    }

    async fn query(
        &self,
        ctx: &RequestContext,
        filter: &Filter,
        offset: usize,
        limit: usize,
    ) -> AccessResult<Page<AuditEntry>> {
        ctx.ensure_live(self.clock.now())?;
        let entries = self.entries.lock().await;
        let mut matched: Vec<AuditEntry> = entries
            .iter()
            .filter(|e| entry_matches(e, filter))
            .cloned()
            .collect();
        sort_entries(&mut matched);
        Ok(paginate(matched, offset, limit))
    }

    async fn sweep_retention(
        &self,
        ctx: &RequestContext,
        cutoff: DateTime<Utc>,
    ) -> AccessResult<usize> {
        ctx.ensure_live(self.clock.now())?;
        let mut entries = self.entries.lock().await;
        let before = entries.len();
        entries.retain(|e| e.timestamp.map_or(true, |ts| ts >= cutoff));
        Ok(before - entries.len())
    }

    async fn close(&self) -> AccessResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{Clock, ManualClock};
    use crate::models::audit::{AuditAction, AuditSeverity};
    use crate::random::SequenceIdGenerator;
    use chrono::Duration;
    use std::sync::Arc;

    fn logger_at(clock: Arc<ManualClock>) -> MemoryAuditLogger {
        MemoryAuditLogger::new(
            AuditPolicy::default(),
            clock,
            Arc::new(SequenceIdGenerator::new("audit")),
        )
    }

    #[tokio::test]
    async fn append_stamps_id_and_timestamp() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let logger = logger_at(clock.clone());
        let ctx = RequestContext::system();

        let stored = logger
            .append(&ctx, AuditEntry::new(AuditAction::Login, "auth", "login"))
            .await
            .unwrap();
        assert_eq!(stored.id, "audit-0");
        assert_eq!(stored.timestamp, Some(clock.now()));
    }

    #[tokio::test]
    async fn timestamps_stay_monotone_across_clock_regression() {
        let start = Utc::now();
        let clock = Arc::new(ManualClock::new(start));
        let logger = logger_at(clock.clone());
        let ctx = RequestContext::system();

        let first = logger
            .append(&ctx, AuditEntry::new(AuditAction::Login, "auth", "a"))
            .await
            .unwrap();
        clock.set(start - Duration::minutes(5));
        let second = logger
            .append(&ctx, AuditEntry::new(AuditAction::Logout, "auth", "b"))
            .await
            .unwrap();
        assert!(second.timestamp >= first.timestamp);
    }

    #[tokio::test]
    async fn disabled_severity_is_dropped_silently() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let policy = AuditPolicy {
            enabled_severities: [AuditSeverity::High, AuditSeverity::Critical]
                .into_iter()
                .collect(),
            ..AuditPolicy::default()
        };
        let logger = MemoryAuditLogger::new(
            policy,
            clock,
            Arc::new(SequenceIdGenerator::new("audit")),
        );
        let ctx = RequestContext::system();

        let stamped = logger
            .append(&ctx, AuditEntry::new(AuditAction::Read, "user", "peek"))
            .await
            .unwrap();
        assert!(!stamped.id.is_empty());
        assert!(matches!(
            logger.get_by_id(&ctx, &stamped.id).await,
            Err(AccessError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn query_orders_newest_first_and_filters() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let logger = logger_at(clock.clone());
        let ctx = RequestContext::system();

        for (action, user) in [
            (AuditAction::Login, "u1"),
            (AuditAction::Execute, "u2"),
            (AuditAction::Logout, "u1"),
        ] {
            clock.advance(Duration::seconds(1));
            logger
                .append(
                    &ctx,
                    AuditEntry::new(action, "auth", "event").with_actor(user, user),
                )
                .await
                .unwrap();
        }

        let mut filter = Filter::new();
        filter.insert("user_id".into(), "u1".into());
        let page = logger.query(&ctx, &filter, 0, 10).await.unwrap();
        assert_eq!(page.total, 2);
        assert_eq!(page.items[0].action, AuditAction::Logout);
        assert_eq!(page.items[1].action, AuditAction::Login);
    }

    #[tokio::test]
    async fn retention_sweep_removes_old_entries() {
        let start = Utc::now();
        let clock = Arc::new(ManualClock::new(start));
        let logger = logger_at(clock.clone());
        let ctx = RequestContext::system();

        logger
            .append(&ctx, AuditEntry::new(AuditAction::Login, "auth", "old"))
            .await
            .unwrap();
        clock.advance(Duration::days(100));
        logger
            .append(&ctx, AuditEntry::new(AuditAction::Login, "auth", "new"))
            .await
            .unwrap();

        let removed = logger
            .sweep_retention(&ctx, start + Duration::days(10))
            .await
            .unwrap();
        assert_eq!(removed, 1);
        let page = logger.query(&ctx, &Filter::new(), 0, 10).await.unwrap();
        assert_eq!(page.total, 1);
        assert_eq!(page.items[0].description, "new");
    }
}
