//! Durable session backend on SQLite
//!
//! JSON-valued `metadata`, `settings` and `result` columns; timestamps as
//! fixed-width RFC 3339 text so `expires_at <= ?` compares correctly.
//!
//! `update` is an optimistic read-modify-write guarded by a `version`
//! column: the write only lands if nobody else wrote in between, otherwise
//! the mutator is re-applied to the fresh row. A row deleted in between
//! (sweep, cancel) is reported as `NotFound` rather than recreated.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use std::future::Future;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tokio::time::Instant;
use tonedesk_common::session::{
    OperationRecord, OperationStatus, ProcessedArtifact, Session, SessionPhase, UserId,
};
use tonedesk_common::time::{parse_db_timestamp, to_db_timestamp, Clock};
use tonedesk_common::{Error, Result};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{SessionBackend, SessionMutator};

const SESSION_COLUMNS: &str = "id, user_id, artifact_path, original_filename, metadata, \
     settings, phase, result, version, created_at, updated_at, expires_at";

/// Longest time a write keeps retrying while the database is locked
const MAX_LOCK_WAIT_MS: u64 = 5000;

/// Optimistic update attempts before reporting contention
const MAX_UPDATE_ATTEMPTS: u32 = 5;

pub struct SqliteBackend {
    pool: SqlitePool,
}

impl SqliteBackend {
    /// Open (creating if needed) the database at `database_url` and ensure
    /// the tables exist
    pub async fn connect(database_url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .busy_timeout(Duration::from_secs(5));

        // Every connection to an in-memory database is a separate database
        let max_connections = if database_url.contains(":memory:") { 1 } else { 5 };

        debug!(database_url, max_connections, "Connecting to session database");
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(5))
            .connect_with(options)
            .await?;

        let backend = Self { pool };
        backend.init_tables().await?;
        Ok(backend)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Create `user_sessions` and `operation_queue` if they don't exist
    pub async fn init_tables(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS user_sessions (
                id TEXT PRIMARY KEY,
                user_id INTEGER NOT NULL UNIQUE,
                artifact_path TEXT NOT NULL,
                original_filename TEXT NOT NULL,
                metadata TEXT NOT NULL DEFAULT '{}',
                settings TEXT NOT NULL,
                phase TEXT NOT NULL DEFAULT 'awaiting_configuration',
                result TEXT,
                version INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                expires_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_user_sessions_expires_at ON user_sessions(expires_at)",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS operation_queue (
                id TEXT PRIMARY KEY,
                user_id INTEGER NOT NULL,
                session_id TEXT NOT NULL,
                operation TEXT NOT NULL,
                status TEXT NOT NULL
                    CHECK (status IN ('pending', 'processing', 'completed', 'failed')),
                error TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        info!("Database tables initialized (user_sessions, operation_queue)");
        Ok(())
    }

    /// Operation rows for one user, oldest first
    pub async fn operations(&self, user_id: UserId) -> Result<Vec<OperationRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT id, user_id, session_id, operation, status, error, created_at, updated_at
            FROM operation_queue
            WHERE user_id = ?
            ORDER BY created_at, rowid
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(operation_from_row).collect()
    }
}

#[async_trait]
impl SessionBackend for SqliteBackend {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    async fn insert(&self, session: Session) -> Result<Option<Session>> {
        let delete_sql = format!(
            "DELETE FROM user_sessions WHERE user_id = ? RETURNING {}",
            SESSION_COLUMNS
        );
        let values = SessionValues::encode(&session)?;

        retry_on_lock("insert_session", MAX_LOCK_WAIT_MS, || async {
            let mut tx = self.pool.begin().await?;

            let replaced = sqlx::query(&delete_sql)
                .bind(session.user_id)
                .fetch_optional(&mut *tx)
                .await?
                .map(|row| session_from_row(&row))
                .transpose()?;

            sqlx::query(
                r#"
                INSERT INTO user_sessions (
                    id, user_id, artifact_path, original_filename, metadata,
                    settings, phase, result, version, created_at, updated_at, expires_at
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, 0, ?, ?, ?)
                "#,
            )
            .bind(session.id.to_string())
            .bind(session.user_id)
            .bind(&values.artifact_path)
            .bind(&session.original_filename)
            .bind(&values.metadata)
            .bind(&values.settings)
            .bind(session.phase.as_str())
            .bind(&values.result)
            .bind(to_db_timestamp(session.created_at))
            .bind(to_db_timestamp(session.updated_at))
            .bind(to_db_timestamp(session.expires_at))
            .execute(&mut *tx)
            .await?;

            tx.commit().await?;
            Ok::<_, Error>(replaced)
        })
        .await
    }

    async fn get_by_user(&self, user_id: UserId) -> Result<Option<Session>> {
        let sql = format!("SELECT {} FROM user_sessions WHERE user_id = ?", SESSION_COLUMNS);
        sqlx::query(&sql)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?
            .map(|row| session_from_row(&row))
            .transpose()
    }

    async fn get_by_id(&self, id: Uuid) -> Result<Option<Session>> {
        let sql = format!("SELECT {} FROM user_sessions WHERE id = ?", SESSION_COLUMNS);
        sqlx::query(&sql)
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?
            .map(|row| session_from_row(&row))
            .transpose()
    }

    async fn update(
        &self,
        id: Uuid,
        mutator: &SessionMutator,
        clock: &dyn Clock,
    ) -> Result<Session> {
        let select_sql = format!("SELECT {} FROM user_sessions WHERE id = ?", SESSION_COLUMNS);

        for attempt in 1..=MAX_UPDATE_ATTEMPTS {
            let row = sqlx::query(&select_sql)
                .bind(id.to_string())
                .fetch_optional(&self.pool)
                .await?
                .ok_or_else(|| Error::NotFound(format!("session {}", id)))?;

            let version: i64 = row.try_get("version")?;
            let mut session = session_from_row(&row)?;
            mutator(&mut session)?;
            session.id = id;
            session.touch(clock.now());
            let values = SessionValues::encode(&session)?;

            let written = retry_on_lock("update_session", MAX_LOCK_WAIT_MS, || async {
                let result = sqlx::query(
                    r#"
                    UPDATE user_sessions SET
                        artifact_path = ?, original_filename = ?, metadata = ?,
                        settings = ?, phase = ?, result = ?,
                        updated_at = ?, expires_at = ?, version = version + 1
                    WHERE id = ? AND version = ?
                    "#,
                )
                .bind(&values.artifact_path)
                .bind(&session.original_filename)
                .bind(&values.metadata)
                .bind(&values.settings)
                .bind(session.phase.as_str())
                .bind(&values.result)
                .bind(to_db_timestamp(session.updated_at))
                .bind(to_db_timestamp(session.expires_at))
                .bind(id.to_string())
                .bind(version)
                .execute(&self.pool)
                .await?;
                Ok::<_, Error>(result.rows_affected())
            })
            .await?;

            if written == 1 {
                return Ok(session);
            }
            debug!(session_id = %id, attempt, "Session changed during update, retrying");
        }

        Err(Error::Internal(format!(
            "session {} kept changing during update ({} attempts)",
            id, MAX_UPDATE_ATTEMPTS
        )))
    }

    async fn delete(&self, id: Uuid) -> Result<Option<Session>> {
        let sql = format!(
            "DELETE FROM user_sessions WHERE id = ? RETURNING {}",
            SESSION_COLUMNS
        );
        let id_text = id.to_string();
        retry_on_lock("delete_session", MAX_LOCK_WAIT_MS, || async {
            sqlx::query(&sql)
                .bind(&id_text)
                .fetch_optional(&self.pool)
                .await?
                .map(|row| session_from_row(&row))
                .transpose()
        })
        .await
    }

    async fn delete_expired(&self, clock: &dyn Clock) -> Result<Vec<Session>> {
        let sql = format!(
            "DELETE FROM user_sessions WHERE expires_at <= ? RETURNING {}",
            SESSION_COLUMNS
        );
        retry_on_lock("delete_expired", MAX_LOCK_WAIT_MS, || async {
            // Evaluated per attempt so a lock wait never uses a stale "now"
            let now = to_db_timestamp(clock.now());
            let rows = sqlx::query(&sql).bind(now).fetch_all(&self.pool).await?;
            rows.iter().map(session_from_row).collect::<Result<Vec<Session>>>()
        })
        .await
    }

    async fn record_operation(&self, record: &OperationRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO operation_queue (
                id, user_id, session_id, operation, status, error, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(record.id.to_string())
        .bind(record.user_id)
        .bind(record.session_id.to_string())
        .bind(&record.operation)
        .bind(record.status.as_str())
        .bind(&record.error)
        .bind(to_db_timestamp(record.created_at))
        .bind(to_db_timestamp(record.updated_at))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn set_operation_status(
        &self,
        id: Uuid,
        status: OperationStatus,
        error: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let result = sqlx::query(
            "UPDATE operation_queue SET status = ?, error = ?, updated_at = ? WHERE id = ?",
        )
        .bind(status.as_str())
        .bind(error)
        .bind(to_db_timestamp(now))
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(Error::NotFound(format!("operation {}", id)));
        }
        Ok(())
    }

    async fn reset_stale_processing(&self, now: DateTime<Utc>) -> Result<u64> {
        let expires_at = now + tonedesk_common::session::session_ttl();
        let result = sqlx::query(
            r#"
            UPDATE user_sessions SET
                phase = 'awaiting_configuration',
                updated_at = ?, expires_at = ?, version = version + 1
            WHERE phase = 'processing'
            "#,
        )
        .bind(to_db_timestamp(now))
        .bind(to_db_timestamp(expires_at))
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}

/// Column values that need encoding before binding
struct SessionValues {
    artifact_path: String,
    metadata: String,
    settings: String,
    result: Option<String>,
}

impl SessionValues {
    fn encode(session: &Session) -> Result<Self> {
        Ok(Self {
            artifact_path: session.artifact_path.to_string_lossy().into_owned(),
            metadata: serde_json::to_string(&session.metadata)?,
            settings: serde_json::to_string(&session.settings)?,
            result: session
                .result
                .as_ref()
                .map(serde_json::to_string)
                .transpose()?,
        })
    }
}

fn parse_uuid(value: &str, column: &str) -> Result<Uuid> {
    Uuid::parse_str(value)
        .map_err(|e| Error::Internal(format!("Failed to parse {}: {}", column, e)))
}

fn session_from_row(row: &SqliteRow) -> Result<Session> {
    let id: String = row.try_get("id")?;
    let artifact_path: String = row.try_get("artifact_path")?;
    let metadata: String = row.try_get("metadata")?;
    let settings: String = row.try_get("settings")?;
    let phase: String = row.try_get("phase")?;
    let result: Option<String> = row.try_get("result")?;
    let created_at: String = row.try_get("created_at")?;
    let updated_at: String = row.try_get("updated_at")?;
    let expires_at: String = row.try_get("expires_at")?;

    Ok(Session {
        id: parse_uuid(&id, "session id")?,
        user_id: row.try_get("user_id")?,
        artifact_path: PathBuf::from(artifact_path),
        original_filename: row.try_get("original_filename")?,
        metadata: serde_json::from_str(&metadata)?,
        settings: serde_json::from_str(&settings)?,
        phase: phase.parse::<SessionPhase>()?,
        result: result
            .map(|text| serde_json::from_str::<ProcessedArtifact>(&text))
            .transpose()?,
        created_at: parse_db_timestamp(&created_at)?,
        updated_at: parse_db_timestamp(&updated_at)?,
        expires_at: parse_db_timestamp(&expires_at)?,
    })
}

fn operation_from_row(row: &SqliteRow) -> Result<OperationRecord> {
    let id: String = row.try_get("id")?;
    let session_id: String = row.try_get("session_id")?;
    let status: String = row.try_get("status")?;
    let created_at: String = row.try_get("created_at")?;
    let updated_at: String = row.try_get("updated_at")?;

    Ok(OperationRecord {
        id: parse_uuid(&id, "operation id")?,
        user_id: row.try_get("user_id")?,
        session_id: parse_uuid(&session_id, "session id")?,
        operation: row.try_get("operation")?,
        status: status.parse::<OperationStatus>()?,
        error: row.try_get("error")?,
        created_at: parse_db_timestamp(&created_at)?,
        updated_at: parse_db_timestamp(&updated_at)?,
    })
}

fn is_lock_error(err: &Error) -> bool {
    match err {
        Error::Database(sqlx::Error::Database(db_err)) => {
            // SQLITE_BUSY (5) and SQLITE_LOCKED (6)
            matches!(db_err.code().as_deref(), Some("5") | Some("6"))
                || db_err.message().contains("database is locked")
        }
        _ => false,
    }
}

/// Retry a write while SQLite reports lock contention, with exponential
/// backoff from 10 ms capped at 1 s, for at most `max_wait_ms`
async fn retry_on_lock<F, Fut, T>(operation_name: &str, max_wait_ms: u64, mut operation: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let start_time = Instant::now();
    let max_duration = Duration::from_millis(max_wait_ms);
    let mut attempt = 0u32;
    let mut backoff_ms = 10u64;

    loop {
        attempt += 1;
        match operation().await {
            Ok(result) => {
                if attempt > 1 {
                    debug!(operation = operation_name, attempt, "Database operation succeeded after retry");
                }
                return Ok(result);
            }
            Err(err) if is_lock_error(&err) => {
                let elapsed = start_time.elapsed();
                if elapsed >= max_duration {
                    warn!(
                        operation = operation_name,
                        attempt,
                        elapsed_ms = elapsed.as_millis() as u64,
                        "Database still locked, giving up"
                    );
                    return Err(err);
                }
                debug!(
                    operation = operation_name,
                    attempt,
                    backoff_ms,
                    "Database locked, will retry after backoff"
                );
                tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                backoff_ms = (backoff_ms * 2).min(1000);
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tonedesk_common::session::{AudioMetadata, EqBand};
    use tonedesk_common::time::ManualClock;

    async fn backend() -> (SqliteBackend, tempfile::TempDir) {
        let temp = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}?mode=rwc", temp.path().join("sessions.db").display());
        (SqliteBackend::connect(&url).await.unwrap(), temp)
    }

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 6, 1, 12, 0, 0).unwrap()
    }

    fn session(user_id: UserId) -> Session {
        Session::new(
            user_id,
            PathBuf::from(format!("/tmp/{}.mp3", user_id)),
            "song.mp3".into(),
            AudioMetadata {
                codec: "mp3".into(),
                sample_rate: 44_100,
                channels: 2,
                duration_secs: 12.5,
                ..AudioMetadata::default()
            },
            start(),
        )
    }

    #[tokio::test]
    async fn test_session_persists_all_columns() {
        let (backend, _temp) = backend().await;
        let s = session(1);
        backend.insert(s.clone()).await.unwrap();

        let loaded = backend.get_by_user(1).await.unwrap().unwrap();
        assert_eq!(loaded, s);
    }

    #[tokio::test]
    async fn test_insert_replaces_by_user() {
        let (backend, _temp) = backend().await;
        let first = session(2);
        let second = session(2);
        backend.insert(first.clone()).await.unwrap();

        let replaced = backend.insert(second.clone()).await.unwrap().unwrap();
        assert_eq!(replaced.id, first.id);
        assert!(backend.get_by_id(first.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_update_applies_mutator_and_slides_expiry() {
        let (backend, _temp) = backend().await;
        let clock = ManualClock::new(start());
        let s = session(3);
        backend.insert(s.clone()).await.unwrap();

        clock.advance(chrono::Duration::seconds(90));
        let updated = backend
            .update(
                s.id,
                &|s: &mut Session| {
                    s.settings.eq.push(EqBand::new(100.0, 3.0));
                    Ok(())
                },
                &clock,
            )
            .await
            .unwrap();

        assert_eq!(updated.expires_at, start() + chrono::Duration::seconds(90 + 300));
        let reloaded = backend.get_by_id(s.id).await.unwrap().unwrap();
        assert_eq!(reloaded.settings.eq, vec![EqBand::new(100.0, 3.0)]);
        assert_eq!(reloaded.expires_at, updated.expires_at);
    }

    #[tokio::test]
    async fn test_update_after_delete_is_not_found() {
        let (backend, _temp) = backend().await;
        let clock = ManualClock::new(start());
        let s = session(4);
        backend.insert(s.clone()).await.unwrap();
        backend.delete(s.id).await.unwrap();

        let result = backend.update(s.id, &|_: &mut Session| Ok(()), &clock).await;
        assert!(matches!(result, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn test_delete_expired_uses_boundary() {
        let (backend, _temp) = backend().await;
        let clock = ManualClock::new(start());
        let s = session(5);
        backend.insert(s.clone()).await.unwrap();

        clock.set(s.expires_at - chrono::Duration::microseconds(1));
        assert!(backend.delete_expired(&clock).await.unwrap().is_empty());

        clock.set(s.expires_at);
        let removed = backend.delete_expired(&clock).await.unwrap();
        assert_eq!(removed.len(), 1);
        assert_eq!(removed[0].id, s.id);
    }

    #[tokio::test]
    async fn test_operation_lifecycle() {
        let (backend, _temp) = backend().await;
        let s = session(6);
        let record = OperationRecord::pending(6, s.id, "process", start());
        backend.record_operation(&record).await.unwrap();
        backend
            .set_operation_status(record.id, OperationStatus::Failed, Some("timeout"), start())
            .await
            .unwrap();

        let rows = backend.operations(6).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].status, OperationStatus::Failed);
        assert_eq!(rows[0].error.as_deref(), Some("timeout"));
    }

    #[tokio::test]
    async fn test_reset_stale_processing() {
        let (backend, _temp) = backend().await;
        let mut s = session(7);
        s.phase = SessionPhase::Processing;
        backend.insert(s.clone()).await.unwrap();

        assert_eq!(backend.reset_stale_processing(start()).await.unwrap(), 1);
        let reloaded = backend.get_by_id(s.id).await.unwrap().unwrap();
        assert_eq!(reloaded.phase, SessionPhase::AwaitingConfiguration);
    }

    #[tokio::test]
    async fn test_closed_pool_reports_connectivity_error() {
        let (backend, _temp) = backend().await;
        backend.pool().close().await;

        let err = backend.get_by_user(1).await.unwrap_err();
        assert!(err.is_connectivity());
    }
}
