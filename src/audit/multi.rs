//! Fan-out audit sink.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::error;

use crate::audit::AuditLogger;
use crate::context::RequestContext;
use crate::error::{AccessError, AccessResult};
use crate::models::audit::AuditEntry;
use crate::store::{Filter, Page};

/// Mirrors every append to all sinks. The first sink is the primary: it
/// stamps the entry, serves reads, and its sweep count is the one reported.
/// Appends are attempted on every sink even after a failure so sinks do not
/// drift apart more than necessary; the first error is returned.
pub struct MultiAuditLogger {
    sinks: Vec<Arc<dyn AuditLogger>>,
}

impl MultiAuditLogger {
    /// `sinks` must be non-empty; the first becomes the primary.
    #[must_use]
    pub fn new(sinks: Vec<Arc<dyn AuditLogger>>) -> Self {
        Self { sinks }
    }

    fn primary(&self) -> AccessResult<&Arc<dyn AuditLogger>> {
        self.sinks
            .first()
            .ok_or_else(|| AccessError::internal("multi audit logger has no sinks"))
    }
}

#[async_trait]
impl AuditLogger for MultiAuditLogger {
    async fn initialize(&self) -> AccessResult<()> {
        self.primary()?;
        let mut first_err = None;
        for sink in &self.sinks {
            if let Err(e) = sink.initialize().await {
                error!(error = %e, "audit sink initialize failed");
                first_err.get_or_insert(e);
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    async fn append(&self, ctx: &RequestContext, entry: AuditEntry) -> AccessResult<AuditEntry> {
        let primary = self.primary()?;
        // The primary stamps id and timestamp; mirrors receive the stamped
        // entry so every sink records identical bytes. A failed primary
        // still forwards the entry as received, so mirrors are never
        // skipped.
        let (stamped, mut first_err) = match primary.append(ctx, entry.clone()).await {
            Ok(stamped) => (stamped, None),
            Err(e) => {
                error!(error = %e, "audit primary append failed");
                (entry, Some(e))
            }
        };
        for sink in &self.sinks[1..] {
            if let Err(e) = sink.append(ctx, stamped.clone()).await {
                error!(error = %e, "audit mirror append failed");
                first_err.get_or_insert(e);
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(stamped),
        }
    }

    async fn get_by_id(&self, ctx: &RequestContext, id: &str) -> AccessResult<AuditEntry> {
        self.primary()?.get_by_id(ctx, id).await
    }

    async fn query(
        &self,
        ctx: &RequestContext,
        filter: &Filter,
        offset: usize,
        limit: usize,
    ) -> AccessResult<Page<AuditEntry>> {
        self.primary()?.query(ctx, filter, offset, limit).await
    }

    async fn sweep_retention(
        &self,
        ctx: &RequestContext,
        cutoff: DateTime<Utc>,
    ) -> AccessResult<usize> {
        let primary_removed = self.primary()?.sweep_retention(ctx, cutoff).await?;
        let mut first_err = None;
        for sink in &self.sinks[1..] {
            if let Err(e) = sink.sweep_retention(ctx, cutoff).await {
                error!(error = %e, "audit mirror sweep failed");
                first_err.get_or_insert(e);
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(primary_removed),
        }
    }

    async fn close(&self) -> AccessResult<()> {
        let mut first_err = None;
        for sink in &self.sinks {
            if let Err(e) = sink.close().await {
                first_err.get_or_insert(e);
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::MemoryAuditLogger;
    use crate::clock::ManualClock;
    use crate::config::AuditPolicy;
    use crate::models::audit::AuditAction;
    use crate::random::SequenceIdGenerator;

    fn memory_sink(prefix: &str, clock: Arc<ManualClock>) -> Arc<MemoryAuditLogger> {
        Arc::new(MemoryAuditLogger::new(
            AuditPolicy::default(),
            clock,
            Arc::new(SequenceIdGenerator::new(prefix)),
        ))
    }

    #[tokio::test]
    async fn mirrors_receive_the_primary_stamp() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let primary = memory_sink("p", clock.clone());
        let mirror = memory_sink("m", clock.clone());
        let multi = MultiAuditLogger::new(vec![
            primary.clone() as Arc<dyn AuditLogger>,
            mirror.clone() as Arc<dyn AuditLogger>,
        ]);
        multi.initialize().await.unwrap();
        let ctx = RequestContext::system();

        let stamped = multi
            .append(&ctx, AuditEntry::new(AuditAction::Login, "auth", "login"))
            .await
            .unwrap();
        // id came from the primary's generator, and the mirror stored it
        // verbatim rather than restamping
        assert_eq!(stamped.id, "p-0");
        let mirrored = mirror.get_by_id(&ctx, "p-0").await.unwrap();
        assert_eq!(mirrored.timestamp, stamped.timestamp);
    }

    struct FailingSink;

    #[async_trait]
    impl AuditLogger for FailingSink {
        async fn initialize(&self) -> AccessResult<()> {
            Ok(())
        }

        async fn append(
            &self,
            _ctx: &RequestContext,
            _entry: AuditEntry,
        ) -> AccessResult<AuditEntry> {
            Err(AccessError::transient("disk full"))
        }

        async fn get_by_id(&self, _ctx: &RequestContext, _id: &str) -> AccessResult<AuditEntry> {
            Err(AccessError::transient("disk full"))
        }

        async fn query(
            &self,
            _ctx: &RequestContext,
            _filter: &Filter,
            _offset: usize,
            _limit: usize,
        ) -> AccessResult<Page<AuditEntry>> {
            Err(AccessError::transient("disk full"))
        }

        async fn sweep_retention(
            &self,
            _ctx: &RequestContext,
            _cutoff: DateTime<Utc>,
        ) -> AccessResult<usize> {
            Err(AccessError::transient("disk full"))
        }

        async fn close(&self) -> AccessResult<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn failed_primary_still_feeds_the_mirrors() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let mirror = memory_sink("m", clock.clone());
        let multi = MultiAuditLogger::new(vec![
            Arc::new(FailingSink) as Arc<dyn AuditLogger>,
            mirror.clone() as Arc<dyn AuditLogger>,
        ]);
        multi.initialize().await.unwrap();
        let ctx = RequestContext::system();

        let res = multi
            .append(&ctx, AuditEntry::new(AuditAction::Login, "auth", "login"))
            .await;
        assert!(matches!(res, Err(AccessError::Transient(_))));

        // the mirror recorded the entry anyway, stamping it itself
        let page = mirror.query(&ctx, &Filter::new(), 0, 10).await.unwrap();
        assert_eq!(page.total, 1);
        assert_eq!(page.items[0].description, "login");
    }

    #[tokio::test]
    async fn reads_come_from_the_primary() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let primary = memory_sink("p", clock.clone());
        let mirror = memory_sink("m", clock.clone());
        let multi = MultiAuditLogger::new(vec![
            primary as Arc<dyn AuditLogger>,
            mirror as Arc<dyn AuditLogger>,
        ]);
        multi.initialize().await.unwrap();
        let ctx = RequestContext::system();

        multi
            .append(&ctx, AuditEntry::new(AuditAction::Login, "auth", "login"))
            .await
            .unwrap();
        let page = multi.query(&ctx, &Filter::new(), 0, 10).await.unwrap();
        assert_eq!(page.total, 1);
    }
}
