//! In-process session backend
//!
//! Process-wide map populated at startup and torn down with the process.
//! All access goes through [`SessionBackend`]; the lock is held across each
//! read-modify-write so updates are atomic per call.
//!
//! Operation rows are kept only while in flight: a row that reaches
//! `completed` or `failed` is dropped, as are a session's rows when the
//! session goes. The durable backend keeps the full history.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;
use tonedesk_common::session::{OperationRecord, OperationStatus, Session, SessionPhase, UserId};
use tonedesk_common::time::Clock;
use tonedesk_common::{Error, Result};
use uuid::Uuid;

use super::{SessionBackend, SessionMutator};

#[derive(Default)]
struct Inner {
    sessions: HashMap<Uuid, Session>,
    by_user: HashMap<UserId, Uuid>,
    operations: HashMap<Uuid, OperationRecord>,
}

impl Inner {
    fn remove(&mut self, id: Uuid) -> Option<Session> {
        let session = self.sessions.remove(&id)?;
        if self.by_user.get(&session.user_id) == Some(&id) {
            self.by_user.remove(&session.user_id);
        }
        self.operations.retain(|_, op| op.session_id != id);
        Some(session)
    }
}

#[derive(Default)]
pub struct MemoryBackend {
    inner: RwLock<Inner>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Operations that have not reached a terminal status
    pub async fn in_flight_operations(&self) -> Vec<OperationRecord> {
        let mut rows: Vec<OperationRecord> =
            self.inner.read().await.operations.values().cloned().collect();
        rows.sort_by_key(|r| r.created_at);
        rows
    }
}

#[async_trait]
impl SessionBackend for MemoryBackend {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn insert(&self, session: Session) -> Result<Option<Session>> {
        let mut inner = self.inner.write().await;
        let replaced = match inner.by_user.get(&session.user_id).copied() {
            Some(previous) => inner.remove(previous),
            None => None,
        };
        inner.by_user.insert(session.user_id, session.id);
        inner.sessions.insert(session.id, session);
        Ok(replaced)
    }

    async fn get_by_user(&self, user_id: UserId) -> Result<Option<Session>> {
        let inner = self.inner.read().await;
        Ok(inner
            .by_user
            .get(&user_id)
            .and_then(|id| inner.sessions.get(id))
            .cloned())
    }

    async fn get_by_id(&self, id: Uuid) -> Result<Option<Session>> {
        Ok(self.inner.read().await.sessions.get(&id).cloned())
    }

    async fn update(
        &self,
        id: Uuid,
        mutator: &SessionMutator,
        clock: &dyn Clock,
    ) -> Result<Session> {
        let mut inner = self.inner.write().await;
        let current = inner
            .sessions
            .get(&id)
            .ok_or_else(|| Error::NotFound(format!("session {}", id)))?;

        // Mutate a copy so a failing mutator leaves the record untouched
        let mut updated = current.clone();
        mutator(&mut updated)?;
        updated.id = id;
        updated.touch(clock.now());

        inner.sessions.insert(id, updated.clone());
        Ok(updated)
    }

    async fn delete(&self, id: Uuid) -> Result<Option<Session>> {
        Ok(self.inner.write().await.remove(id))
    }

    async fn delete_expired(&self, clock: &dyn Clock) -> Result<Vec<Session>> {
        let mut inner = self.inner.write().await;
        let now = clock.now();
        let expired: Vec<Uuid> = inner
            .sessions
            .values()
            .filter(|s| s.is_expired(now))
            .map(|s| s.id)
            .collect();

        Ok(expired.into_iter().filter_map(|id| inner.remove(id)).collect())
    }

    async fn record_operation(&self, record: &OperationRecord) -> Result<()> {
        self.inner
            .write()
            .await
            .operations
            .insert(record.id, record.clone());
        Ok(())
    }

    async fn set_operation_status(
        &self,
        id: Uuid,
        status: OperationStatus,
        error: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let mut inner = self.inner.write().await;
        if matches!(status, OperationStatus::Completed | OperationStatus::Failed) {
            // Already gone with its session
            inner.operations.remove(&id);
            return Ok(());
        }
        let record = inner
            .operations
            .get_mut(&id)
            .ok_or_else(|| Error::NotFound(format!("operation {}", id)))?;
        record.status = status;
        record.error = error.map(str::to_string);
        record.updated_at = now;
        Ok(())
    }

    async fn reset_stale_processing(&self, now: DateTime<Utc>) -> Result<u64> {
        let mut inner = self.inner.write().await;
        let mut count = 0;
        for session in inner.sessions.values_mut() {
            if session.phase == SessionPhase::Processing {
                session.phase = SessionPhase::AwaitingConfiguration;
                session.touch(now);
                count += 1;
            }
        }
        Ok(count)
    }
}
