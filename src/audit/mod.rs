//! Append-only audit logging.
//!
//! Loggers stamp entries on append: a missing id gets a fresh one, and the
//! timestamp is forced monotone so the log never runs backwards even when
//! the wall clock does. Entries whose severity the [`AuditPolicy`] disables
//! are stamped and returned but not persisted.

pub mod file;
pub mod memory;
pub mod multi;

use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::context::RequestContext;
use crate::error::AccessResult;
use crate::models::audit::{AuditAction, AuditEntry, AuditSeverity};
use crate::store::{filter_str, Filter, Page};

pub use file::FileAuditLogger;
pub use memory::MemoryAuditLogger;
pub use multi::MultiAuditLogger;

#[allow(unused_imports)] // doc links
use crate::config::AuditPolicy;

/// Append-only audit sink with query support.
#[async_trait]
pub trait AuditLogger: Send + Sync {
    /// Prepare the sink (open files, load state). Idempotent.
    async fn initialize(&self) -> AccessResult<()>;

    /// Stamp and persist an entry. Returns the entry as stored, with id and
    /// timestamp filled in.
    async fn append(&self, ctx: &RequestContext, entry: AuditEntry) -> AccessResult<AuditEntry>;

    async fn get_by_id(&self, ctx: &RequestContext, id: &str) -> AccessResult<AuditEntry>;

    /// Entries matching the filter, newest first.
    async fn query(
        &self,
        ctx: &RequestContext,
        filter: &Filter,
        offset: usize,
        limit: usize,
    ) -> AccessResult<Page<AuditEntry>>;

    /// Drop entries stamped before `cutoff`; returns how many went away.
    async fn sweep_retention(
        &self,
        ctx: &RequestContext,
        cutoff: DateTime<Utc>,
    ) -> AccessResult<usize>;

    async fn close(&self) -> AccessResult<()>;
}

/// Monotone timestamp source. `stamp` never returns an instant earlier than
/// the one it returned last, regardless of what the clock reports.
#[derive(Debug)]
pub(crate) struct MonotonicStamp {
    last: Mutex<DateTime<Utc>>,
}

impl MonotonicStamp {
    pub(crate) fn new() -> Self {
        Self {
            last: Mutex::new(DateTime::<Utc>::MIN_UTC),
        }
    }

    pub(crate) fn stamp(&self, candidate: DateTime<Utc>) -> DateTime<Utc> {
        let mut last = self.last.lock().unwrap_or_else(|e| e.into_inner());
        let stamped = candidate.max(*last);
        *last = stamped;
        stamped
    }

    /// Seed the floor from entries recovered off disk.
    pub(crate) fn observe(&self, seen: DateTime<Utc>) {
        let mut last = self.last.lock().unwrap_or_else(|e| e.into_inner());
        if seen > *last {
            *last = seen;
        }
    }
}

fn severity_from_value(v: &str) -> Option<AuditSeverity> {
    serde_json::from_value(serde_json::Value::String(v.to_string())).ok()
}

fn action_from_value(v: &str) -> Option<AuditAction> {
    serde_json::from_value(serde_json::Value::String(v.to_string())).ok()
}

/// Shared query predicate for audit sinks.
///
/// Supported keys: `user_id`, `username`, `action`, `resource`,
/// `resource_id`, `status`, `session_id`, `severity` (exact),
/// `min_severity`, `since` (inclusive), `until` (exclusive). Unknown keys
/// are ignored; unparseable values match nothing.
pub(crate) fn entry_matches(entry: &AuditEntry, filter: &Filter) -> bool {
    for (key, field) in [
        ("user_id", &entry.user_id),
        ("username", &entry.username),
        ("resource", &entry.resource),
        ("resource_id", &entry.resource_id),
        ("status", &entry.status),
        ("session_id", &entry.session_id),
    ] {
        if let Some(v) = filter_str(filter, key) {
            if field != v {
                return false;
            }
        }
    }
    if let Some(v) = filter_str(filter, "action") {
        match action_from_value(v) {
            Some(action) if entry.action == action => {}
            _ => return false,
        }
    }
    if let Some(v) = filter_str(filter, "severity") {
        match severity_from_value(v) {
            Some(severity) if entry.severity == severity => {}
            _ => return false,
        }
    }
    if let Some(v) = filter_str(filter, "min_severity") {
        match severity_from_value(v) {
            Some(floor) if entry.severity >= floor => {}
            _ => return false,
        }
    }
    if let Some(v) = filter_str(filter, "since") {
        match (v.parse::<DateTime<Utc>>(), entry.timestamp) {
            (Ok(since), Some(ts)) if ts >= since => {}
            _ => return false,
        }
    }
    if let Some(v) = filter_str(filter, "until") {
        match (v.parse::<DateTime<Utc>>(), entry.timestamp) {
            (Ok(until), Some(ts)) if ts < until => {}
            _ => return false,
        }
    }
    true
}

/// Sort matched entries newest first, ties broken by id so paging is stable.
pub(crate) fn sort_entries(entries: &mut [AuditEntry]) {
    entries.sort_by(|a, b| {
        b.timestamp
            .cmp(&a.timestamp)
            .then_with(|| b.id.cmp(&a.id))
    });
}
