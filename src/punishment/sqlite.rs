//! SQLite punishment store
//!
//! Timestamps are stored as epoch milliseconds. The schema is created on open.

use crate::punishment::{
    AuditEntry, NewPunishment, Punishment, PunishmentId, PunishmentKind, PunishmentStore, Source,
    StorageError, StorageResult, SubjectEntry,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;
use std::time::Duration;
use tracing::info;

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS subjects (
        name TEXT PRIMARY KEY,
        stable_id TEXT,
        address TEXT NOT NULL,
        last_seen INTEGER NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_subjects_address ON subjects (address)",
    "CREATE TABLE IF NOT EXISTS punishments (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        subject TEXT NOT NULL,
        reason TEXT NOT NULL,
        operator TEXT NOT NULL,
        kind TEXT NOT NULL,
        start_at INTEGER,
        end_at INTEGER,
        duration_seconds INTEGER,
        active INTEGER NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_punishments_subject ON punishments (subject, active)",
    "CREATE TABLE IF NOT EXISTS audit_log (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        action_type TEXT NOT NULL,
        operator TEXT NOT NULL,
        target TEXT NOT NULL,
        reason TEXT NOT NULL,
        timestamp INTEGER NOT NULL,
        source TEXT NOT NULL DEFAULT 'ingame'
    )",
];

const PUNISHMENT_COLUMNS: &str =
    "p.id, p.subject, p.reason, p.operator, p.kind, p.start_at, p.end_at, p.duration_seconds, p.active";

/// Pool settings for `SqliteStore::open`
#[derive(Debug, Clone)]
pub struct PoolSettings {
    pub max_connections: u32,
    pub acquire_timeout: Duration,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_connections: 5,
            acquire_timeout: Duration::from_secs(3),
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct PunishmentRow {
    id: i64,
    subject: String,
    reason: String,
    operator: String,
    kind: String,
    start_at: Option<i64>,
    end_at: Option<i64>,
    duration_seconds: Option<i64>,
    active: bool,
}

#[derive(Debug, sqlx::FromRow)]
struct SubjectRow {
    name: String,
    stable_id: Option<String>,
    address: String,
    last_seen: i64,
}

#[derive(Debug, sqlx::FromRow)]
struct AuditRow {
    action_type: String,
    operator: String,
    target: String,
    reason: String,
    timestamp: i64,
    source: String,
}

fn from_millis(millis: i64) -> StorageResult<DateTime<Utc>> {
    DateTime::from_timestamp_millis(millis)
        .ok_or_else(|| StorageError::Corrupt(format!("timestamp {millis} out of range")))
}

fn optional_millis(millis: Option<i64>) -> StorageResult<Option<DateTime<Utc>>> {
    millis.map(from_millis).transpose()
}

impl TryFrom<PunishmentRow> for Punishment {
    type Error = StorageError;

    fn try_from(row: PunishmentRow) -> Result<Self, Self::Error> {
        let kind = PunishmentKind::from_str(&row.kind)
            .map_err(|e| StorageError::Corrupt(format!("punishment {}: {e}", row.id)))?;
        Ok(Self {
            id: PunishmentId(row.id),
            subject: row.subject,
            reason: row.reason,
            operator: row.operator,
            kind,
            start: optional_millis(row.start_at)?,
            end: optional_millis(row.end_at)?,
            duration_seconds: row.duration_seconds,
            active: row.active,
        })
    }
}

impl TryFrom<SubjectRow> for SubjectEntry {
    type Error = StorageError;

    fn try_from(row: SubjectRow) -> Result<Self, Self::Error> {
        Ok(Self {
            name: row.name,
            stable_id: row.stable_id,
            address: row.address,
            last_seen: from_millis(row.last_seen)?,
        })
    }
}

impl TryFrom<AuditRow> for AuditEntry {
    type Error = StorageError;

    fn try_from(row: AuditRow) -> Result<Self, Self::Error> {
        let source = match row.source.as_str() {
            "ingame" => Source::Ingame,
            "discord" => Source::Discord,
            "socket" => Source::Socket,
            "console" => Source::Console,
            other => return Err(StorageError::Corrupt(format!("audit source '{other}'"))),
        };
        Ok(Self {
            action: row.action_type,
            operator: row.operator,
            target: row.target,
            reason: row.reason,
            source,
            timestamp: from_millis(row.timestamp)?,
        })
    }
}

fn convert_all<R, T>(rows: Vec<R>) -> StorageResult<Vec<T>>
where
    T: TryFrom<R, Error = StorageError>,
{
    rows.into_iter().map(T::try_from).collect()
}

/// Pooled SQLite store
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (creating if missing) the database at `url` and make sure the
    /// schema exists.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Database` if the url is invalid, the pool cannot
    /// connect, or the schema cannot be created.
    pub async fn open(url: &str, settings: &PoolSettings) -> StorageResult<Self> {
        let options = SqliteConnectOptions::from_str(url)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(settings.acquire_timeout);

        let pool = SqlitePoolOptions::new()
            .max_connections(settings.max_connections)
            .acquire_timeout(settings.acquire_timeout)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.init_schema().await?;
        info!(
            url = %url,
            max_connections = settings.max_connections,
            "Punishment database ready"
        );
        Ok(store)
    }

    async fn init_schema(&self) -> StorageResult<()> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl PunishmentStore for SqliteStore {
    async fn create_punishment(&self, record: NewPunishment) -> StorageResult<PunishmentId> {
        let result = sqlx::query(
            "INSERT INTO punishments
                (subject, reason, operator, kind, start_at, end_at, duration_seconds, active)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&record.subject)
        .bind(&record.reason)
        .bind(&record.operator)
        .bind(record.kind.as_str())
        .bind(record.start.map(|t| t.timestamp_millis()))
        .bind(record.end.map(|t| t.timestamp_millis()))
        .bind(record.duration_seconds)
        .bind(record.active)
        .execute(&self.pool)
        .await?;
        Ok(PunishmentId(result.last_insert_rowid()))
    }

    async fn find_by_subject(&self, subject: &str) -> StorageResult<Vec<Punishment>> {
        let rows = sqlx::query_as::<_, PunishmentRow>(&format!(
            "SELECT {PUNISHMENT_COLUMNS} FROM punishments p WHERE p.subject = ?"
        ))
        .bind(subject)
        .fetch_all(&self.pool)
        .await?;
        convert_all(rows)
    }

    async fn find_active_by_subject(&self, subject: &str) -> StorageResult<Vec<Punishment>> {
        let rows = sqlx::query_as::<_, PunishmentRow>(&format!(
            "SELECT {PUNISHMENT_COLUMNS} FROM punishments p WHERE p.subject = ? AND p.active = 1"
        ))
        .bind(subject)
        .fetch_all(&self.pool)
        .await?;
        convert_all(rows)
    }

    async fn find_active_by_address(&self, address: &str) -> StorageResult<Vec<Punishment>> {
        let rows = sqlx::query_as::<_, PunishmentRow>(&format!(
            "SELECT {PUNISHMENT_COLUMNS} FROM punishments p
             JOIN subjects s ON s.name = p.subject
             WHERE s.address = ? AND p.active = 1 AND p.kind IN ('ipban', 'tempipban')"
        ))
        .bind(address)
        .fetch_all(&self.pool)
        .await?;
        convert_all(rows)
    }

    async fn deactivate(
        &self,
        subject: &str,
        kind: PunishmentKind,
        at: DateTime<Utc>,
    ) -> StorageResult<u64> {
        let result = sqlx::query(
            "UPDATE punishments SET active = 0, end_at = COALESCE(end_at, ?)
             WHERE subject = ? AND kind = ? AND active = 1",
        )
        .bind(at.timestamp_millis())
        .bind(subject)
        .bind(kind.as_str())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn expire(&self, id: PunishmentId) -> StorageResult<bool> {
        let result = sqlx::query("UPDATE punishments SET active = 0 WHERE id = ? AND active = 1")
            .bind(id.0)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn record_subject_seen(&self, entry: &SubjectEntry) -> StorageResult<()> {
        sqlx::query(
            "INSERT INTO subjects (name, stable_id, address, last_seen) VALUES (?, ?, ?, ?)
             ON CONFLICT(name) DO UPDATE SET
                stable_id = COALESCE(excluded.stable_id, subjects.stable_id),
                address = excluded.address,
                last_seen = excluded.last_seen",
        )
        .bind(&entry.name)
        .bind(&entry.stable_id)
        .bind(&entry.address)
        .bind(entry.last_seen.timestamp_millis())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_subject(&self, name: &str) -> StorageResult<Option<SubjectEntry>> {
        sqlx::query_as::<_, SubjectRow>(
            "SELECT name, stable_id, address, last_seen FROM subjects WHERE name = ?",
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await?
        .map(SubjectEntry::try_from)
        .transpose()
    }

    async fn append_audit_entry(&self, entry: AuditEntry) -> StorageResult<()> {
        sqlx::query(
            "INSERT INTO audit_log (action_type, operator, target, reason, timestamp, source)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&entry.action)
        .bind(&entry.operator)
        .bind(&entry.target)
        .bind(&entry.reason)
        .bind(entry.timestamp.timestamp_millis())
        .bind(entry.source.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn audit_entries_for(&self, target: &str) -> StorageResult<Vec<AuditEntry>> {
        let rows = sqlx::query_as::<_, AuditRow>(
            "SELECT action_type, operator, target, reason, timestamp, source
             FROM audit_log WHERE target = ? ORDER BY id ASC",
        )
        .bind(target)
        .fetch_all(&self.pool)
        .await?;
        convert_all(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn at(seconds: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000 + seconds, 0).unwrap()
    }

    async fn open_temp() -> (SqliteStore, TempDir) {
        let dir = TempDir::new().unwrap();
        let url = format!("sqlite://{}", dir.path().join("punishments.db").display());
        let store = SqliteStore::open(&url, &PoolSettings::default())
            .await
            .unwrap();
        (store, dir)
    }

    fn tempban(subject: &str) -> NewPunishment {
        NewPunishment {
            subject: subject.to_string(),
            reason: "xray".to_string(),
            operator: "Alice".to_string(),
            kind: PunishmentKind::Tempban,
            start: Some(at(0)),
            end: Some(at(3600)),
            duration_seconds: Some(3600),
            active: true,
        }
    }

    #[tokio::test]
    async fn test_records_survive_reopen() {
        let dir = TempDir::new().unwrap();
        let url = format!("sqlite://{}", dir.path().join("punishments.db").display());

        let store = SqliteStore::open(&url, &PoolSettings::default())
            .await
            .unwrap();
        let id = store.create_punishment(tempban("Bob")).await.unwrap();
        store.close().await;

        let reopened = SqliteStore::open(&url, &PoolSettings::default())
            .await
            .unwrap();
        let records = reopened.find_active_by_subject("Bob").await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].id, id);
        assert_eq!(records[0].kind, PunishmentKind::Tempban);
        assert_eq!(records[0].end, Some(at(3600)));
        assert_eq!(records[0].duration_seconds, Some(3600));
    }

    #[tokio::test]
    async fn test_deactivate_and_expire() {
        let (store, _dir) = open_temp().await;
        let ban = store
            .create_punishment(NewPunishment {
                kind: PunishmentKind::Ban,
                end: None,
                duration_seconds: None,
                ..tempban("Bob")
            })
            .await
            .unwrap();
        let timed = store.create_punishment(tempban("Bob")).await.unwrap();

        let changed = store
            .deactivate("Bob", PunishmentKind::Ban, at(10))
            .await
            .unwrap();
        assert_eq!(changed, 1);
        assert!(store.expire(timed).await.unwrap());
        assert!(!store.expire(timed).await.unwrap());

        let all = store.find_by_subject("Bob").await.unwrap();
        assert!(all.iter().all(|r| !r.active));
        let ban = all.iter().find(|r| r.id == ban).unwrap();
        assert_eq!(ban.end, Some(at(10)));
        let timed = all.iter().find(|r| r.id == timed).unwrap();
        assert_eq!(timed.end, Some(at(3600)));
    }

    #[tokio::test]
    async fn test_deactivate_lifts_every_matching_record() {
        let (store, _dir) = open_temp().await;
        store.create_punishment(tempban("Bob")).await.unwrap();
        store.create_punishment(tempban("Bob")).await.unwrap();
        store.create_punishment(tempban("Eve")).await.unwrap();

        let changed = store
            .deactivate("Bob", PunishmentKind::Tempban, at(30))
            .await
            .unwrap();
        assert_eq!(changed, 2);
        assert!(store.find_active_by_subject("Bob").await.unwrap().is_empty());
        assert_eq!(store.find_active_by_subject("Eve").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_subject_upsert_and_address_join() {
        let (store, _dir) = open_temp().await;
        let entry = SubjectEntry {
            name: "Bob".to_string(),
            stable_id: Some("uuid-bob".to_string()),
            address: "10.0.0.1".to_string(),
            last_seen: at(0),
        };
        store.record_subject_seen(&entry).await.unwrap();
        store
            .record_subject_seen(&SubjectEntry {
                stable_id: None,
                address: "10.0.0.2".to_string(),
                last_seen: at(5),
                ..entry
            })
            .await
            .unwrap();

        let seen = store.find_subject("Bob").await.unwrap().unwrap();
        assert_eq!(seen.address, "10.0.0.2");
        assert_eq!(seen.stable_id.as_deref(), Some("uuid-bob"));

        store
            .create_punishment(NewPunishment {
                kind: PunishmentKind::Tempipban,
                ..tempban("Bob")
            })
            .await
            .unwrap();
        store.create_punishment(tempban("Bob")).await.unwrap();

        assert!(store.find_active_by_address("10.0.0.1").await.unwrap().is_empty());
        let hits = store.find_active_by_address("10.0.0.2").await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].kind, PunishmentKind::Tempipban);
    }

    #[tokio::test]
    async fn test_audit_log_round_trip() {
        let (store, _dir) = open_temp().await;
        store
            .append_audit_entry(AuditEntry {
                action: "TEMPBAN".to_string(),
                operator: "Alice".to_string(),
                target: "Bob".to_string(),
                reason: "xray (Duration: 1h)".to_string(),
                source: Source::Discord,
                timestamp: at(0),
            })
            .await
            .unwrap();

        let lines = store.audit_entries_for("Bob").await.unwrap();
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].source, Source::Discord);
        assert_eq!(lines[0].reason, "xray (Duration: 1h)");
    }
}
