//! Session Store
//!
//! Per-user processing state with a sliding five-minute expiry. Callers use
//! [`SessionStore`]; the backend behind it is either the SQLite database or
//! the in-process map, chosen at startup.
//!
//! When the durable backend becomes unreachable the store switches to the
//! in-process backend for the rest of the process lifetime. The switch is
//! logged once and is not reported to callers as a failure.

pub mod memory;
pub mod sqlite;
pub mod sweeper;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tonedesk_common::session::{
    AudioMetadata, OperationRecord, OperationStatus, Session, UserId,
};
use tonedesk_common::time::Clock;
use tonedesk_common::{Error, Result};
use tracing::{debug, info, warn};
use uuid::Uuid;

pub use memory::MemoryBackend;
pub use sqlite::SqliteBackend;
pub use sweeper::Sweeper;

/// Read-modify-write step applied to a session by [`SessionStore::update`].
///
/// May run more than once (on a lost optimistic race, or again on the
/// fallback backend), so it must not have side effects outside the session.
pub type SessionMutator = dyn Fn(&mut Session) -> Result<()> + Send + Sync;

/// Storage backend abstraction
#[async_trait]
pub trait SessionBackend: Send + Sync {
    fn name(&self) -> &'static str;

    /// Store `session`, removing and returning any other session of the
    /// same user
    async fn insert(&self, session: Session) -> Result<Option<Session>>;

    async fn get_by_user(&self, user_id: UserId) -> Result<Option<Session>>;

    async fn get_by_id(&self, id: Uuid) -> Result<Option<Session>>;

    /// Apply `mutator` atomically and refresh the expiry from `clock` at
    /// write time. `Error::NotFound` when the session no longer exists.
    async fn update(&self, id: Uuid, mutator: &SessionMutator, clock: &dyn Clock)
        -> Result<Session>;

    async fn delete(&self, id: Uuid) -> Result<Option<Session>>;

    /// Remove and return every session expired at the moment of deletion
    async fn delete_expired(&self, clock: &dyn Clock) -> Result<Vec<Session>>;

    async fn record_operation(&self, record: &OperationRecord) -> Result<()>;

    async fn set_operation_status(
        &self,
        id: Uuid,
        status: OperationStatus,
        error: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<()>;

    /// Move sessions stuck in `processing` back to `awaiting_configuration`
    async fn reset_stale_processing(&self, now: DateTime<Utc>) -> Result<u64>;
}

pub struct SessionStore {
    primary: Arc<dyn SessionBackend>,
    fallback: Arc<MemoryBackend>,
    degraded: AtomicBool,
    clock: Arc<dyn Clock>,
}

impl SessionStore {
    /// Store backed only by the in-process map
    pub fn in_memory(clock: Arc<dyn Clock>) -> Self {
        let memory = Arc::new(MemoryBackend::new());
        Self {
            primary: memory.clone(),
            fallback: memory,
            degraded: AtomicBool::new(false),
            clock,
        }
    }

    /// Store backed by `primary`, falling back to memory on connectivity loss
    pub fn with_backend(primary: Arc<dyn SessionBackend>, clock: Arc<dyn Clock>) -> Self {
        Self {
            primary,
            fallback: Arc::new(MemoryBackend::new()),
            degraded: AtomicBool::new(false),
            clock,
        }
    }

    /// True once the durable backend has been abandoned
    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::Acquire)
    }

    pub fn backend_name(&self) -> &'static str {
        self.active().name()
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    fn active(&self) -> &dyn SessionBackend {
        if self.is_degraded() {
            self.fallback.as_ref() as &dyn SessionBackend
        } else {
            self.primary.as_ref()
        }
    }

    /// Decide whether `err` should switch the store to the fallback backend
    fn degrade_on(&self, operation: &str, err: &Error) -> bool {
        if !err.is_connectivity() {
            return false;
        }
        if !self.degraded.swap(true, Ordering::AcqRel) {
            warn!(
                operation,
                backend = self.primary.name(),
                error = %err,
                "Session backend unreachable, continuing with in-memory sessions"
            );
        }
        true
    }

    /// Create a session for `user_id`, destroying any previous one and its files
    pub async fn create(
        &self,
        user_id: UserId,
        artifact_path: PathBuf,
        original_filename: String,
        metadata: AudioMetadata,
    ) -> Result<Session> {
        let session = Session::new(
            user_id,
            artifact_path,
            original_filename,
            metadata,
            self.clock.now(),
        );

        let replaced = match self.active().insert(session.clone()).await {
            Err(e) if self.degrade_on("create", &e) => {
                self.fallback.insert(session.clone()).await?
            }
            other => other?,
        };

        if let Some(old) = replaced {
            info!(user_id, session_id = %old.id, "Replacing previous session");
            for path in old.backing_files() {
                if path != session.artifact_path {
                    discard_file(path).await;
                }
            }
        }

        debug!(user_id, session_id = %session.id, "Session created");
        Ok(session)
    }

    pub async fn get(&self, user_id: UserId) -> Result<Option<Session>> {
        match self.active().get_by_user(user_id).await {
            Err(e) if self.degrade_on("get", &e) => self.fallback.get_by_user(user_id).await,
            other => other,
        }
    }

    pub async fn get_by_id(&self, id: Uuid) -> Result<Option<Session>> {
        match self.active().get_by_id(id).await {
            Err(e) if self.degrade_on("get_by_id", &e) => self.fallback.get_by_id(id).await,
            other => other,
        }
    }

    /// Atomically mutate a session; the expiry is recomputed at write time
    pub async fn update<F>(&self, id: Uuid, mutator: F) -> Result<Session>
    where
        F: Fn(&mut Session) -> Result<()> + Send + Sync + 'static,
    {
        let clock = self.clock.as_ref();
        match self.active().update(id, &mutator, clock).await {
            Err(e) if self.degrade_on("update", &e) => {
                self.fallback.update(id, &mutator, clock).await
            }
            other => other,
        }
    }

    /// Remove a session and its backing files. Missing sessions are a no-op.
    pub async fn delete(&self, id: Uuid) -> Result<()> {
        let removed = match self.active().delete(id).await {
            Err(e) if self.degrade_on("delete", &e) => self.fallback.delete(id).await?,
            other => other?,
        };
        if let Some(session) = removed {
            for path in session.backing_files() {
                discard_file(path).await;
            }
            debug!(user_id = session.user_id, session_id = %id, "Session deleted");
        }
        Ok(())
    }

    /// Delete every expired session and its files, returning how many went
    pub async fn sweep_expired(&self) -> Result<usize> {
        let clock = self.clock.as_ref();
        let expired = match self.active().delete_expired(clock).await {
            Err(e) if self.degrade_on("sweep_expired", &e) => {
                self.fallback.delete_expired(clock).await?
            }
            other => other?,
        };

        for session in &expired {
            for path in session.backing_files() {
                discard_file(path).await;
            }
            info!(user_id = session.user_id, session_id = %session.id, "Expired session removed");
        }
        Ok(expired.len())
    }

    pub async fn record_operation(&self, record: &OperationRecord) -> Result<()> {
        match self.active().record_operation(record).await {
            Err(e) if self.degrade_on("record_operation", &e) => {
                self.fallback.record_operation(record).await
            }
            other => other,
        }
    }

    pub async fn set_operation_status(
        &self,
        id: Uuid,
        status: OperationStatus,
        error: Option<&str>,
    ) -> Result<()> {
        let now = self.clock.now();
        match self.active().set_operation_status(id, status, error, now).await {
            Err(e) if self.degrade_on("set_operation_status", &e) => {
                self.fallback.set_operation_status(id, status, error, now).await
            }
            other => other,
        }
    }

    pub async fn reset_stale_processing(&self) -> Result<u64> {
        let now = self.clock.now();
        match self.active().reset_stale_processing(now).await {
            Err(e) if self.degrade_on("reset_stale_processing", &e) => {
                self.fallback.reset_stale_processing(now).await
            }
            other => other,
        }
    }
}

/// Remove a file, treating "already gone" as success
pub async fn discard_file(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => debug!(path = %path.display(), "Removed file"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove file"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tonedesk_common::session::{session_ttl, SessionPhase};
    use tonedesk_common::time::ManualClock;

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 6, 1, 12, 0, 0).unwrap()
    }

    fn store_with_clock() -> (SessionStore, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(start()));
        (SessionStore::in_memory(clock.clone()), clock)
    }

    fn touch_file(dir: &Path, name: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, b"audio").unwrap();
        path
    }

    #[tokio::test]
    async fn test_update_refreshes_expiry_from_write_time() {
        let (store, clock) = store_with_clock();
        let session = store
            .create(1, PathBuf::from("/tmp/x.mp3"), "x.mp3".into(), AudioMetadata::default())
            .await
            .unwrap();

        clock.advance(chrono::Duration::minutes(3));
        let updated = store
            .update(session.id, |s| {
                s.settings.normalize = true;
                Ok(())
            })
            .await
            .unwrap();

        assert_eq!(updated.updated_at, clock.now());
        assert_eq!(updated.expires_at, updated.updated_at + session_ttl());
        assert!(updated.settings.normalize);
    }

    #[tokio::test]
    async fn test_create_replaces_session_and_removes_old_files() {
        let temp = tempfile::tempdir().unwrap();
        let (store, _clock) = store_with_clock();
        let old_path = touch_file(temp.path(), "old.mp3");
        let new_path = touch_file(temp.path(), "new.mp3");

        let old = store
            .create(5, old_path.clone(), "old.mp3".into(), AudioMetadata::default())
            .await
            .unwrap();
        let new = store
            .create(5, new_path.clone(), "new.mp3".into(), AudioMetadata::default())
            .await
            .unwrap();

        assert!(!old_path.exists());
        assert!(new_path.exists());
        assert!(store.get_by_id(old.id).await.unwrap().is_none());
        assert_eq!(store.get(5).await.unwrap().unwrap().id, new.id);
    }

    #[tokio::test]
    async fn test_sweep_boundary_exactly_at_expiry_is_expired() {
        let temp = tempfile::tempdir().unwrap();
        let (store, clock) = store_with_clock();
        let path = touch_file(temp.path(), "a.mp3");
        let session = store
            .create(9, path.clone(), "a.mp3".into(), AudioMetadata::default())
            .await
            .unwrap();

        clock.set(session.expires_at - chrono::Duration::microseconds(1));
        assert_eq!(store.sweep_expired().await.unwrap(), 0);
        assert!(path.exists());
        assert!(store.get(9).await.unwrap().is_some());

        clock.set(session.expires_at);
        assert_eq!(store.sweep_expired().await.unwrap(), 1);
        assert!(!path.exists());
        assert!(store.get(9).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_sweep_spares_session_extended_by_update() {
        let (store, clock) = store_with_clock();
        let session = store
            .create(3, PathBuf::from("/tmp/none.mp3"), "n.mp3".into(), AudioMetadata::default())
            .await
            .unwrap();

        clock.advance(chrono::Duration::minutes(4));
        store.update(session.id, |_| Ok(())).await.unwrap();
        clock.advance(chrono::Duration::minutes(2));

        assert_eq!(store.sweep_expired().await.unwrap(), 0);
        assert!(store.get(3).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_delete_is_idempotent_when_file_missing() {
        let (store, _clock) = store_with_clock();
        let session = store
            .create(4, PathBuf::from("/tmp/definitely-missing.mp3"), "m.mp3".into(), AudioMetadata::default())
            .await
            .unwrap();

        store.delete(session.id).await.unwrap();
        store.delete(session.id).await.unwrap();
        assert!(store.get(4).await.unwrap().is_none());
    }

    /// Backend whose every call fails as if the database were unreachable
    struct UnreachableBackend;

    #[async_trait]
    impl SessionBackend for UnreachableBackend {
        fn name(&self) -> &'static str {
            "unreachable"
        }
        async fn insert(&self, _session: Session) -> Result<Option<Session>> {
            Err(Error::Database(sqlx::Error::PoolClosed))
        }
        async fn get_by_user(&self, _user_id: UserId) -> Result<Option<Session>> {
            Err(Error::Database(sqlx::Error::PoolClosed))
        }
        async fn get_by_id(&self, _id: Uuid) -> Result<Option<Session>> {
            Err(Error::Database(sqlx::Error::PoolClosed))
        }
        async fn update(
            &self,
            _id: Uuid,
            _mutator: &SessionMutator,
            _clock: &dyn Clock,
        ) -> Result<Session> {
            Err(Error::Database(sqlx::Error::PoolClosed))
        }
        async fn delete(&self, _id: Uuid) -> Result<Option<Session>> {
            Err(Error::Database(sqlx::Error::PoolClosed))
        }
        async fn delete_expired(&self, _clock: &dyn Clock) -> Result<Vec<Session>> {
            Err(Error::Database(sqlx::Error::PoolClosed))
        }
        async fn record_operation(&self, _record: &OperationRecord) -> Result<()> {
            Err(Error::Database(sqlx::Error::PoolClosed))
        }
        async fn set_operation_status(
            &self,
            _id: Uuid,
            _status: OperationStatus,
            _error: Option<&str>,
            _now: DateTime<Utc>,
        ) -> Result<()> {
            Err(Error::Database(sqlx::Error::PoolClosed))
        }
        async fn reset_stale_processing(&self, _now: DateTime<Utc>) -> Result<u64> {
            Err(Error::Database(sqlx::Error::PoolClosed))
        }
    }

    #[tokio::test]
    async fn test_connectivity_failure_degrades_to_memory() {
        let clock = Arc::new(ManualClock::new(start()));
        let store = SessionStore::with_backend(Arc::new(UnreachableBackend), clock);
        assert!(!store.is_degraded());

        let session = store
            .create(11, PathBuf::from("/tmp/d.mp3"), "d.mp3".into(), AudioMetadata::default())
            .await
            .unwrap();

        assert!(store.is_degraded());
        assert_eq!(store.backend_name(), "memory");
        let loaded = store.get(11).await.unwrap().unwrap();
        assert_eq!(loaded.id, session.id);
        assert_eq!(loaded.phase, SessionPhase::AwaitingConfiguration);
    }

    /// Backend that fails queries without being unreachable
    struct BrokenQueryBackend(MemoryBackend);

    #[async_trait]
    impl SessionBackend for BrokenQueryBackend {
        fn name(&self) -> &'static str {
            "broken"
        }
        async fn insert(&self, session: Session) -> Result<Option<Session>> {
            self.0.insert(session).await
        }
        async fn get_by_user(&self, _user_id: UserId) -> Result<Option<Session>> {
            Err(Error::Database(sqlx::Error::RowNotFound))
        }
        async fn get_by_id(&self, id: Uuid) -> Result<Option<Session>> {
            self.0.get_by_id(id).await
        }
        async fn update(
            &self,
            id: Uuid,
            mutator: &SessionMutator,
            clock: &dyn Clock,
        ) -> Result<Session> {
            self.0.update(id, mutator, clock).await
        }
        async fn delete(&self, id: Uuid) -> Result<Option<Session>> {
            self.0.delete(id).await
        }
        async fn delete_expired(&self, clock: &dyn Clock) -> Result<Vec<Session>> {
            self.0.delete_expired(clock).await
        }
        async fn record_operation(&self, record: &OperationRecord) -> Result<()> {
            self.0.record_operation(record).await
        }
        async fn set_operation_status(
            &self,
            id: Uuid,
            status: OperationStatus,
            error: Option<&str>,
            now: DateTime<Utc>,
        ) -> Result<()> {
            self.0.set_operation_status(id, status, error, now).await
        }
        async fn reset_stale_processing(&self, now: DateTime<Utc>) -> Result<u64> {
            self.0.reset_stale_processing(now).await
        }
    }

    #[tokio::test]
    async fn test_query_error_does_not_degrade() {
        let clock = Arc::new(ManualClock::new(start()));
        let store =
            SessionStore::with_backend(Arc::new(BrokenQueryBackend(MemoryBackend::new())), clock);

        assert!(store.get(1).await.is_err());
        assert!(!store.is_degraded());
    }
}
