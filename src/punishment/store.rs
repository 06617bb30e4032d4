//! Punishment store
//!
//! The storage seam of the engine. `SqliteStore` is the durable backend,
//! `MemoryStore` keeps everything in concurrent maps for tests and for hosts
//! that do not need persistence.

use crate::punishment::{
    AuditEntry, NewPunishment, Punishment, PunishmentId, PunishmentKind, StorageError,
    StorageResult, SubjectEntry,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

/// Persistence operations the engine and gates rely on.
///
/// Implementations must commit each call atomically: a record is either fully
/// written or not written at all.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PunishmentStore: Send + Sync {
    /// Persist a new record and return its id
    async fn create_punishment(&self, record: NewPunishment) -> StorageResult<PunishmentId>;

    /// Every record for the subject, active or not
    async fn find_by_subject(&self, subject: &str) -> StorageResult<Vec<Punishment>>;

    /// Records still flagged active for the subject, expired ones included
    async fn find_active_by_subject(&self, subject: &str) -> StorageResult<Vec<Punishment>>;

    /// Active address-scoped records of every subject last seen at `address`
    async fn find_active_by_address(&self, address: &str) -> StorageResult<Vec<Punishment>>;

    /// Lift every active record of `kind` for the subject.
    ///
    /// Sets `active = false` and fills a missing `end` with `at`. Returns the
    /// number of records changed.
    async fn deactivate(
        &self,
        subject: &str,
        kind: PunishmentKind,
        at: DateTime<Utc>,
    ) -> StorageResult<u64>;

    /// Mark one record inactive. Returns whether it was still active.
    async fn expire(&self, id: PunishmentId) -> StorageResult<bool>;

    /// Upsert the subject registry entry
    async fn record_subject_seen(&self, entry: &SubjectEntry) -> StorageResult<()>;

    async fn find_subject(&self, name: &str) -> StorageResult<Option<SubjectEntry>>;

    async fn append_audit_entry(&self, entry: AuditEntry) -> StorageResult<()>;

    /// Audit lines naming `target`, oldest first
    async fn audit_entries_for(&self, target: &str) -> StorageResult<Vec<AuditEntry>>;
}

/// Run a store call under a deadline, turning an elapsed deadline into
/// `StorageError::Timeout`.
///
/// # Errors
///
/// Returns the call's own error, or `StorageError::Timeout`.
pub async fn bounded<T, F>(limit: Duration, call: F) -> StorageResult<T>
where
    F: Future<Output = StorageResult<T>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(StorageError::Timeout(limit)),
    }
}

/// In-memory store
#[derive(Clone)]
pub struct MemoryStore {
    records: Arc<DashMap<i64, Punishment>>,
    subjects: Arc<DashMap<String, SubjectEntry>>,
    audit: Arc<DashMap<i64, AuditEntry>>,
    next_id: Arc<AtomicI64>,
    next_audit: Arc<AtomicI64>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            records: Arc::new(DashMap::new()),
            subjects: Arc::new(DashMap::new()),
            audit: Arc::new(DashMap::new()),
            next_id: Arc::new(AtomicI64::new(1)),
            next_audit: Arc::new(AtomicI64::new(1)),
        }
    }

    /// Insert a fully formed record, keeping its id. Used to seed history.
    pub fn insert(&self, record: Punishment) {
        self.next_id
            .fetch_max(record.id.0 + 1, Ordering::SeqCst);
        self.records.insert(record.id.0, record);
    }

    #[must_use]
    pub fn get(&self, id: PunishmentId) -> Option<Punishment> {
        self.records.get(&id.0).map(|entry| entry.value().clone())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn collect_where(&self, keep: impl Fn(&Punishment) -> bool) -> Vec<Punishment> {
        self.records
            .iter()
            .filter_map(|entry| {
                let record = entry.value();
                if keep(record) {
                    Some(record.clone())
                } else {
                    None
                }
            })
            .collect()
    }
}

#[async_trait]
impl PunishmentStore for MemoryStore {
    async fn create_punishment(&self, record: NewPunishment) -> StorageResult<PunishmentId> {
        let id = PunishmentId(self.next_id.fetch_add(1, Ordering::SeqCst));
        self.records.insert(id.0, record.with_id(id));
        Ok(id)
    }

    async fn find_by_subject(&self, subject: &str) -> StorageResult<Vec<Punishment>> {
        Ok(self.collect_where(|r| r.subject == subject))
    }

    async fn find_active_by_subject(&self, subject: &str) -> StorageResult<Vec<Punishment>> {
        Ok(self.collect_where(|r| r.subject == subject && r.active))
    }

    async fn find_active_by_address(&self, address: &str) -> StorageResult<Vec<Punishment>> {
        let names: Vec<String> = self
            .subjects
            .iter()
            .filter(|entry| entry.value().address == address)
            .map(|entry| entry.key().clone())
            .collect();

        Ok(self.collect_where(|r| {
            r.active && r.kind.traits().address_scoped && names.contains(&r.subject)
        }))
    }

    async fn deactivate(
        &self,
        subject: &str,
        kind: PunishmentKind,
        at: DateTime<Utc>,
    ) -> StorageResult<u64> {
        let mut changed = 0;
        for mut entry in self.records.iter_mut() {
            let record = entry.value_mut();
            if record.subject == subject && record.kind == kind && record.active {
                record.active = false;
                record.end.get_or_insert(at);
                changed += 1;
            }
        }
        Ok(changed)
    }

    async fn expire(&self, id: PunishmentId) -> StorageResult<bool> {
        Ok(self.records.get_mut(&id.0).is_some_and(|mut record| {
            let was_active = record.active;
            record.active = false;
            was_active
        }))
    }

    async fn record_subject_seen(&self, entry: &SubjectEntry) -> StorageResult<()> {
        self.subjects.insert(entry.name.clone(), entry.clone());
        Ok(())
    }

    async fn find_subject(&self, name: &str) -> StorageResult<Option<SubjectEntry>> {
        Ok(self.subjects.get(name).map(|entry| entry.value().clone()))
    }

    async fn append_audit_entry(&self, entry: AuditEntry) -> StorageResult<()> {
        let seq = self.next_audit.fetch_add(1, Ordering::SeqCst);
        self.audit.insert(seq, entry);
        Ok(())
    }

    async fn audit_entries_for(&self, target: &str) -> StorageResult<Vec<AuditEntry>> {
        let mut lines: Vec<(i64, AuditEntry)> = self
            .audit
            .iter()
            .filter(|entry| entry.value().target == target)
            .map(|entry| (*entry.key(), entry.value().clone()))
            .collect();
        lines.sort_by_key(|(seq, _)| *seq);
        Ok(lines.into_iter().map(|(_, entry)| entry).collect())
    }
}
