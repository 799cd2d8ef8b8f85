//! JSON-lines audit sink.
//!
//! One serialized [`AuditEntry`] per line, flushed on every append so a
//! crash loses at most the entry being written. The full log is also held
//! in memory for queries; `initialize` replays the file to rebuild that
//! cache and to seed the monotonic timestamp floor.

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::audit::{entry_matches, sort_entries, AuditLogger, MonotonicStamp};
use crate::clock::SharedClock;
use crate::config::AuditPolicy;
use crate::context::RequestContext;
use crate::error::{AccessError, AccessResult};
use crate::models::audit::AuditEntry;
use crate::random::SharedIdGenerator;
use crate::store::{paginate, Filter, Page};

struct Inner {
    writer: Option<BufWriter<File>>,
    cache: Vec<AuditEntry>,
}

pub struct FileAuditLogger {
    path: PathBuf,
    inner: Mutex<Inner>,
    stamp: MonotonicStamp,
    policy: AuditPolicy,
    clock: SharedClock,
    ids: SharedIdGenerator,
}

impl FileAuditLogger {
    #[must_use]
    pub fn new(
        path: impl Into<PathBuf>,
        policy: AuditPolicy,
        clock: SharedClock,
        ids: SharedIdGenerator,
    ) -> Self {
        Self {
            path: path.into(),
            inner: Mutex::new(Inner {
                writer: None,
                cache: Vec::new(),
            }),
            stamp: MonotonicStamp::new(),
            policy,
            clock,
            ids,
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn stamp_entry(&self, mut entry: AuditEntry) -> AuditEntry {
        if entry.id.is_empty() {
            entry.id = self.ids.generate();
        }
        let candidate = entry.timestamp.unwrap_or_else(|| self.clock.now());
        entry.timestamp = Some(self.stamp.stamp(candidate));
        entry
    }

    fn load_existing(&self) -> AccessResult<Vec<AuditEntry>> {
        let file = match File::open(&self.path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(AccessError::transient(format!(
                    "open audit log {}: {e}",
                    self.path.display()
                )))
            }
        };
        let mut entries = Vec::new();
        for (lineno, line) in BufReader::new(file).lines().enumerate() {
            let line = line.map_err(|e| {
                AccessError::transient(format!("read audit log {}: {e}", self.path.display()))
            })?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<AuditEntry>(&line) {
                Ok(entry) => {
                    if let Some(ts) = entry.timestamp {
                        self.stamp.observe(ts);
                    }
                    entries.push(entry);
                }
                Err(e) => {
                    // A torn tail line from a crash is tolerated; anything
                    // else would silently drop history.
                    warn!(
                        path = %self.path.display(),
                        line = lineno + 1,
                        error = %e,
                        "skipping unparseable audit log line"
                    );
                }
            }
        }
        Ok(entries)
    }

    fn write_line(writer: &mut BufWriter<File>, entry: &AuditEntry) -> AccessResult<()> {
        let line = serde_json::to_string(entry)
            .map_err(|e| AccessError::internal(format!("serialize audit entry: {e}")))?;
        writer
            .write_all(line.as_bytes())
            .and_then(|()| writer.write_all(b"\n"))
            .and_then(|()| writer.flush())
            .map_err(|e| AccessError::transient(format!("write audit log: {e}")))
    }
}

#[async_trait]
impl AuditLogger for FileAuditLogger {
    async fn initialize(&self) -> AccessResult<()> {
        let mut inner = self.inner.lock().await;
        if inner.writer.is_some() {
            return Ok(());
        }
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    AccessError::transient(format!(
                        "create audit log directory {}: {e}",
                        parent.display()
                    ))
                })?;
            }
        }
        let cache = self.load_existing()?;
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| {
                AccessError::transient(format!("open audit log {}: {e}", self.path.display()))
            })?;
        info!(path = %self.path.display(), recovered = cache.len(), "audit log opened");
        inner.cache = cache;
        inner.writer = Some(BufWriter::new(file));
        Ok(())
    }

    async fn append(&self, ctx: &RequestContext, entry: AuditEntry) -> AccessResult<AuditEntry> {
        ctx.ensure_live(self.clock.now())?;
        let entry = self.stamp_entry(entry);
        if !self.policy.allows(entry.severity) {
            return Ok(entry);
        }
        let mut inner = self.inner.lock().await;
        let writer = inner
            .writer
            .as_mut()
            .ok_or_else(|| AccessError::internal("audit log not initialized"))?;
        Self::write_line(writer, &entry)?;
        inner.cache.push(entry.clone());
        Ok(entry)
    }

    async fn get_by_id(&self, ctx: &RequestContext, id: &str) -> AccessResult<AuditEntry> {
        ctx.ensure_live(self.clock.now())?;
        self.inner
            .lock()
            .await
            .cache
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
        let inner = self.inner.lock().await;
        let mut matched: Vec<AuditEntry> = inner
            .cache
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
        let mut inner = self.inner.lock().await;
        if inner.writer.is_none() {
            return Err(AccessError::internal("audit log not initialized"));
        }
        let before = inner.cache.len();
        inner
            .cache
            .retain(|e| e.timestamp.map_or(true, |ts| ts >= cutoff));
        let removed = before - inner.cache.len();
        if removed == 0 {
            return Ok(0);
        }

        // Rewrite through a sibling temp file, then swap it into place so a
        // crash mid-sweep leaves either the old or the new log intact.
        let tmp = self.path.with_extension("jsonl.tmp");
        {
            let file = File::create(&tmp).map_err(|e| {
                AccessError::transient(format!("create {}: {e}", tmp.display()))
            })?;
            let mut writer = BufWriter::new(file);
            for entry in &inner.cache {
                Self::write_line(&mut writer, entry)?;
            }
        }
        inner.writer = None;
        std::fs::rename(&tmp, &self.path).map_err(|e| {
            AccessError::transient(format!("replace audit log {}: {e}", self.path.display()))
        })?;
        let file = OpenOptions::new()
            .append(true)
            .open(&self.path)
            .map_err(|e| {
                AccessError::transient(format!("reopen audit log {}: {e}", self.path.display()))
            })?;
        inner.writer = Some(BufWriter::new(file));
        info!(path = %self.path.display(), removed, "audit retention sweep rewrote log");
        Ok(removed)
    }

    async fn close(&self) -> AccessResult<()> {
        let mut inner = self.inner.lock().await;
        if let Some(mut writer) = inner.writer.take() {
            writer
                .flush()
                .map_err(|e| AccessError::transient(format!("flush audit log: {e}")))?;
        }
        Ok(())
    }
}
